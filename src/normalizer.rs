use crate::condition::map_condition_to_band;
use crate::model::{Listing, NormalizedListing, VariantTier};
use crate::variant::{detect_variant, is_part_only_title};

/// Brand and category noise removed from model keys. Partial matches are removed too,
/// so longer tokens must precede their prefixes.
const STOPLIST: &[&str] = &[
    "scotty",
    "cameron",
    "titleist",
    "odyssey",
    "taylormade",
    "bettinardi",
    "callaway",
    "evnroll",
    "mizuno",
    "putters",
    "putter",
    "golf",
];

const ACCESSORY_TOKENS: &[&str] = &[
    "weight", "weights", "screw", "screws", "wrench", "wrenches", "tool", "tools", "plate",
    "plates", "cover", "covers", "headcover", "headcovers", "kit", "kits", "head", "shaft",
    "grip",
];

const HEADCOVER_INCLUDED: &[&str] = &["with", "w/", "includes", "incl", "plus"];

/// Canonical model key: lowercase, stoplist removed, whitespace collapsed.
pub fn normalize_model_key(text: &str) -> String {
    let mut key = text.to_lowercase();
    for token in STOPLIST {
        key = key.replace(token, " ");
    }
    collapse_whitespace(&key)
}

/// Looser key matching rows written by the old aggregation job, which stripped
/// punctuation outright ("newport 2.5" was stored as "newport 25").
pub fn degrade_model_key(text: &str) -> String {
    let key = normalize_model_key(text);
    let stripped: String = key
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    collapse_whitespace(&stripped)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Headcovers, weight kits and part-only listings that would poison putter prices.
pub fn is_accessory_title(title: &str) -> bool {
    let text = title.trim().to_lowercase();
    if text.is_empty() || is_part_only_title(&text) {
        return true;
    }

    let tokens: Vec<&str> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let accessory_hits = tokens.iter().filter(|t| ACCESSORY_TOKENS.contains(t)).count();

    let compact = text.replace(' ', "");
    if compact.contains("headcover") {
        let bundled = HEADCOVER_INCLUDED.iter().any(|w| {
            text.contains(&format!("{} headcover", w))
                || text.contains(&format!("{} head cover", w))
                || text.contains(&format!("{} a headcover", w))
        });
        if !bundled {
            return true;
        }
    }

    if accessory_hits >= 3 {
        return true;
    }
    tokens.len() <= 2 && accessory_hits > 0
}

/// Derives the model key, variant and condition band for one listing.
pub fn normalize_listing(listing: Listing) -> NormalizedListing {
    let model_source = listing
        .raw_model_field
        .as_deref()
        .map(|raw| raw.replace("::", " ").replace('|', " "))
        .filter(|raw| !normalize_model_key(raw).is_empty())
        .unwrap_or_else(|| listing.title.clone());
    let model_key = normalize_model_key(&model_source);

    let variant_tag = detect_variant(&listing.title);
    let variant_tier = match variant_tag {
        Some(tag) => Some(tag.tier()),
        None if is_part_only_title(&listing.title.to_lowercase()) => None,
        None => Some(VariantTier::Retail),
    };
    let condition_band = map_condition_to_band(listing.condition_code);

    NormalizedListing {
        listing,
        model_key,
        variant_tier,
        variant_tag,
        condition_band,
    }
}

pub fn normalize_all(listings: Vec<Listing>) -> Vec<NormalizedListing> {
    listings.into_iter().map(normalize_listing).collect()
}

/// Drops accessory listings and listings without a usable model key.
pub fn retain_putters(listings: Vec<NormalizedListing>) -> Vec<NormalizedListing> {
    listings
        .into_iter()
        .filter(|l| l.is_classifiable() && !is_accessory_title(&l.listing.title))
        .collect()
}
