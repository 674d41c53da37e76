use crate::model::ConditionBand;

/// Marketplace condition ids and the band each one reports into.
const CONDITION_CODES: &[(i32, ConditionBand)] = &[
    (1000, ConditionBand::New),     // New
    (1500, ConditionBand::LikeNew), // New other
    (1750, ConditionBand::LikeNew), // New with defects
    (2000, ConditionBand::LikeNew), // Certified refurbished
    (2500, ConditionBand::Good),    // Seller refurbished
    (2750, ConditionBand::LikeNew), // Like new
    (3000, ConditionBand::Used),    // Used
    (4000, ConditionBand::LikeNew), // Very good
    (5000, ConditionBand::Good),    // Good
    (6000, ConditionBand::Fair),    // Acceptable
    (7000, ConditionBand::Fair),    // For parts or not working
];

/// Unknown codes fall back to `Used`.
pub fn map_condition_to_band(code: i32) -> ConditionBand {
    CONDITION_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, band)| *band)
        .unwrap_or(ConditionBand::Used)
}
