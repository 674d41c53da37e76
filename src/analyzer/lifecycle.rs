use crate::model::Listing;
use std::collections::HashMap;

/// Collapses repeated observations of an item to the newest one, so a relisted or
/// repriced item counts once with its refreshed total.
pub fn latest_observations(listings: Vec<Listing>) -> Vec<Listing> {
    let mut latest: HashMap<String, Listing> = HashMap::new();

    for listing in listings {
        match latest.get(&listing.item_id) {
            Some(existing) if existing.observed_at >= listing.observed_at => {}
            _ => {
                latest.insert(listing.item_id.clone(), listing);
            }
        }
    }

    let mut result: Vec<Listing> = latest.into_values().collect();
    result.sort_by(|a, b| a.item_id.cmp(&b.item_id));
    result
}
