// Core structs: Listing, NormalizedListing, StatGroup, DealGrade, RankedDeal
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A single marketplace observation as delivered by a listing source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub item_id: String,
    pub title: String,
    #[serde(default)]
    pub raw_model_field: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    pub price_cents: i64,
    #[serde(default)]
    pub shipping_cents: i64,
    pub condition_code: i32,
    pub observed_at: DateTime<Utc>,
    pub url: String,
}

impl Listing {
    /// Price to the door: item price plus shipping.
    pub fn total_cents(&self) -> i64 {
        self.price_cents.saturating_add(self.shipping_cents)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionBand {
    New,
    LikeNew,
    Good,
    Used,
    Fair,
}

impl ConditionBand {
    pub const ALL: [ConditionBand; 5] = [
        ConditionBand::New,
        ConditionBand::LikeNew,
        ConditionBand::Good,
        ConditionBand::Used,
        ConditionBand::Fair,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionBand::New => "NEW",
            ConditionBand::LikeNew => "LIKE_NEW",
            ConditionBand::Good => "GOOD",
            ConditionBand::Used => "USED",
            ConditionBand::Fair => "FAIR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariantTier {
    Tour,
    Limited,
    Retail,
}

/// Closed vocabulary of rarity tags. Adding one means adding a rule in `variant.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VariantTag {
    #[serde(rename = "CIRCLE_T")]
    CircleT,
    #[serde(rename = "GSS")]
    Gss,
    #[serde(rename = "009")]
    Nine,
    #[serde(rename = "BUTTON_BACK")]
    ButtonBack,
    #[serde(rename = "TEI3")]
    Tei3,
    #[serde(rename = "GARAGE")]
    Garage,
    #[serde(rename = "LIMITED")]
    Limited,
    #[serde(rename = "TOUR_ISSUE")]
    TourIssue,
    #[serde(rename = "PROTO")]
    Proto,
    #[serde(rename = "SMALL_SLANT")]
    SmallSlant,
}

impl VariantTag {
    pub const ALL: [VariantTag; 10] = [
        VariantTag::CircleT,
        VariantTag::Gss,
        VariantTag::Nine,
        VariantTag::ButtonBack,
        VariantTag::Tei3,
        VariantTag::Garage,
        VariantTag::Limited,
        VariantTag::TourIssue,
        VariantTag::Proto,
        VariantTag::SmallSlant,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VariantTag::CircleT => "CIRCLE_T",
            VariantTag::Gss => "GSS",
            VariantTag::Nine => "009",
            VariantTag::ButtonBack => "BUTTON_BACK",
            VariantTag::Tei3 => "TEI3",
            VariantTag::Garage => "GARAGE",
            VariantTag::Limited => "LIMITED",
            VariantTag::TourIssue => "TOUR_ISSUE",
            VariantTag::Proto => "PROTO",
            VariantTag::SmallSlant => "SMALL_SLANT",
        }
    }

    pub fn tier(&self) -> VariantTier {
        match self {
            VariantTag::CircleT
            | VariantTag::TourIssue
            | VariantTag::Proto
            | VariantTag::Gss
            | VariantTag::Nine => VariantTier::Tour,
            VariantTag::ButtonBack
            | VariantTag::Tei3
            | VariantTag::Garage
            | VariantTag::Limited
            | VariantTag::SmallSlant => VariantTier::Limited,
        }
    }
}

impl fmt::Display for VariantTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ConditionBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A listing with its derived classification. Built once by the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedListing {
    pub listing: Listing,
    pub model_key: String,
    pub variant_tier: Option<VariantTier>,
    pub variant_tag: Option<VariantTag>,
    pub condition_band: ConditionBand,
}

impl NormalizedListing {
    pub fn total_cents(&self) -> i64 {
        self.listing.total_cents()
    }

    pub fn is_classifiable(&self) -> bool {
        !self.model_key.is_empty()
    }
}

/// Variant dimension of a stat group key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariantKey {
    /// All variants collapsed together.
    Any,
    /// Listings with no variant tag.
    Base,
    Tag(VariantTag),
}

impl VariantKey {
    pub fn from_tag(tag: Option<VariantTag>) -> Self {
        tag.map(VariantKey::Tag).unwrap_or(VariantKey::Base)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VariantKey::Any => "ANY",
            VariantKey::Base => "",
            VariantKey::Tag(tag) => tag.as_str(),
        }
    }
}

impl FromStr for VariantKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ANY" => Ok(VariantKey::Any),
            "" => Ok(VariantKey::Base),
            other => VariantTag::ALL
                .iter()
                .find(|t| t.as_str() == other)
                .map(|t| VariantKey::Tag(*t))
                .ok_or_else(|| format!("unknown variant key: {}", other)),
        }
    }
}

/// Condition dimension of a stat group key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConditionKey {
    Any,
    Band(ConditionBand),
}

impl ConditionKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKey::Any => "ANY",
            ConditionKey::Band(band) => band.as_str(),
        }
    }
}

impl FromStr for ConditionKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "ANY" {
            return Ok(ConditionKey::Any);
        }
        ConditionBand::ALL
            .iter()
            .find(|b| b.as_str() == s)
            .map(|b| ConditionKey::Band(*b))
            .ok_or_else(|| format!("unknown condition key: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatKey {
    pub model_key: String,
    pub variant: VariantKey,
    pub condition: ConditionKey,
    pub window_days: u32,
}

/// Nearest-rank percentile summary of listing totals, in cents.
#[derive(Debug, Clone, PartialEq)]
pub struct StatGroup {
    pub key: StatKey,
    pub n: usize,
    pub p10: i64,
    pub p25: i64,
    pub p50: i64,
    pub p75: i64,
    pub p90: i64,
    pub dispersion_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GradeLetter {
    D,
    C,
    B,
    A,
}

impl GradeLetter {
    pub fn as_str(&self) -> &'static str {
        match self {
            GradeLetter::A => "A",
            GradeLetter::B => "B",
            GradeLetter::C => "C",
            GradeLetter::D => "D",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GradeLetter::A => "Great",
            GradeLetter::B => "Strong",
            GradeLetter::C => "Solid",
            GradeLetter::D => "Above market",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DealGrade {
    pub letter: Option<GradeLetter>,
    pub label: Option<&'static str>,
    pub delta_pct: Option<f64>,
}

impl DealGrade {
    pub fn ungraded() -> Self {
        Self::default()
    }

    pub fn is_graded(&self) -> bool {
        self.letter.is_some()
    }
}

/// Which model key produced the stat match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Exact,
    Degraded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedDeal {
    pub listing: NormalizedListing,
    pub group: StatGroup,
    pub grade: DealGrade,
    pub label: String,
    pub savings_amount_cents: i64,
    pub savings_percent: f64,
    pub window_days_used: u32,
    /// 0 = exact variant and condition, 1 = any variant, 2 = any variant and condition.
    pub fallback_level: usize,
    pub match_tier: MatchTier,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RankedFeed {
    pub deals: Vec<RankedDeal>,
    pub window_hours_used: Option<u32>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid response status: {0}")]
    InvalidResponse(u16),
    #[error("JSON decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
