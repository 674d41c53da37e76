//! Rarity and variant detection from listing titles.

use crate::model::VariantTag;
use regex::Regex;
use std::sync::LazyLock;

/// Ordered detection rules. The first matching rule wins, so tour and Circle T
/// signals sit above the specific limited runs, and generic "limited" is last.
static VARIANT_RULES: LazyLock<Vec<(Regex, VariantTag)>> = LazyLock::new(|| {
    [
        (r"\bcircle\s*t\b|\bct\b", VariantTag::CircleT),
        (r"\btour\s*(issue|only|use|dept|department)\b", VariantTag::TourIssue),
        (r"\bproto(type)?\b", VariantTag::Proto),
        (r"\bgss\b|\bgerman\s+stainless\b", VariantTag::Gss),
        (r"\b009[mhs]?\b", VariantTag::Nine),
        (r"\bbutton\s*back\b", VariantTag::ButtonBack),
        (r"\bte[il]-?3\b", VariantTag::Tei3),
        (r"\bgarage\b", VariantTag::Garage),
        (r"\bsmall\s*slant\b", VariantTag::SmallSlant),
        (r"\blimited\b|\bltd\b", VariantTag::Limited),
    ]
    .into_iter()
    .map(|(pattern, tag)| {
        let rx = Regex::new(&format!("(?i){}", pattern)).expect("Invalid variant regex");
        (rx, tag)
    })
    .collect()
});

/// Titles describing a part sold on its own; these never carry a variant.
const PART_ONLY_HINTS: &[&str] = &[
    "headcover only",
    "cover only",
    "weight kit",
    "weights only",
    "grip only",
    "shaft only",
    "head only",
];

/// Keywords that keep a listing out of the base (non-variant) population.
/// Plain substring membership.
pub const VARIANT_KEYWORDS: &[&str] = &[
    "circle t",
    "tour only",
    "tour issue",
    "tour use",
    "tour dept",
    "tour",
    "prototype",
    "proto",
    "limited",
    "limited run",
    "limited edition",
    "garage",
    "my girl",
    "009",
    "009m",
    "009h",
    "gss",
    "button back",
    "hive",
    "damascus",
    "dass",
    "pld",
    "small batch",
    "custom shop",
    "tiffany",
    "snow",
];

pub fn is_part_only_title(lowercase_title: &str) -> bool {
    PART_ONLY_HINTS.iter().any(|hint| lowercase_title.contains(hint))
}

/// First matching variant tag for a title, or `None` for a retail/base listing.
pub fn detect_variant(title: &str) -> Option<VariantTag> {
    if is_part_only_title(&title.to_lowercase()) {
        return None;
    }
    VARIANT_RULES
        .iter()
        .find(|(rx, _)| rx.is_match(title))
        .map(|(_, tag)| *tag)
}

/// Keyword membership test used to exclude collectible variants from base stats.
pub fn is_variant_title(title: &str) -> bool {
    let lower = title.to_lowercase();
    VARIANT_KEYWORDS.iter().any(|k| lower.contains(k))
}
