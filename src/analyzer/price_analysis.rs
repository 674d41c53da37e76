use crate::model::{
    ConditionKey, MatchTier, NormalizedListing, StatGroup, StatKey, VariantKey,
};
use crate::normalizer::degrade_model_key;
use crate::variant::is_variant_title;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

pub const DEFAULT_MIN_SAMPLES: usize = 4;

/// How listings are bucketed before percentiles are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// (variant tag or base, condition band)
    PerVariant,
    /// (ANY variant, condition band)
    AnyVariant,
    /// (ANY variant, ANY condition)
    Collapsed,
}

impl Granularity {
    fn key_parts(&self, listing: &NormalizedListing) -> (VariantKey, ConditionKey) {
        match self {
            Granularity::PerVariant => (
                VariantKey::from_tag(listing.variant_tag),
                ConditionKey::Band(listing.condition_band),
            ),
            Granularity::AnyVariant => (VariantKey::Any, ConditionKey::Band(listing.condition_band)),
            Granularity::Collapsed => (VariantKey::Any, ConditionKey::Any),
        }
    }
}

/// Nearest-rank percentile over ascending values: index `ceil(p/100 * L) - 1`, clamped.
pub fn percentile(sorted: &[i64], p: u32) -> Option<i64> {
    if sorted.is_empty() {
        return None;
    }
    let len = sorted.len();
    let rank = (p as usize * len).div_ceil(100);
    let idx = rank.saturating_sub(1).min(len - 1);
    Some(sorted[idx])
}

fn in_window(listing: &NormalizedListing, now: DateTime<Utc>, window_days: u32) -> bool {
    listing.listing.observed_at >= now - Duration::days(i64::from(window_days))
}

fn is_aggregatable(listing: &NormalizedListing) -> bool {
    listing.is_classifiable() && listing.total_cents() > 0
}

/// Builds a stat group from raw totals, or `None` when the sample is too thin.
pub fn summarize(key: StatKey, mut totals: Vec<i64>, min_samples: usize) -> Option<StatGroup> {
    if totals.is_empty() || totals.len() < min_samples {
        return None;
    }
    totals.sort_unstable();

    let p10 = percentile(&totals, 10)?;
    let p25 = percentile(&totals, 25)?;
    let p50 = percentile(&totals, 50)?;
    let p75 = percentile(&totals, 75)?;
    let p90 = percentile(&totals, 90)?;
    let dispersion_ratio = if p50 > 0 {
        (p90 - p10) as f64 / p50 as f64
    } else {
        f64::NAN
    };

    Some(StatGroup {
        key,
        n: totals.len(),
        p10,
        p25,
        p50,
        p75,
        p90,
        dispersion_ratio,
    })
}

fn collect_groups(
    buckets: BTreeMap<(String, VariantKey, ConditionKey), Vec<i64>>,
    window_days: u32,
    min_samples: usize,
) -> Vec<StatGroup> {
    let total = buckets.len();
    let groups: Vec<StatGroup> = buckets
        .into_iter()
        .filter_map(|((model_key, variant, condition), totals)| {
            let key = StatKey {
                model_key,
                variant,
                condition,
                window_days,
            };
            summarize(key, totals, min_samples)
        })
        .collect();
    debug!(
        "window {}d: {} of {} groups kept (min samples {})",
        window_days,
        groups.len(),
        total,
        min_samples
    );
    groups
}

/// Percentile groups for listings observed within `window_days` of `now`.
pub fn build_stats(
    listings: &[NormalizedListing],
    now: DateTime<Utc>,
    window_days: u32,
    granularity: Granularity,
    min_samples: usize,
) -> Vec<StatGroup> {
    let mut buckets: BTreeMap<(String, VariantKey, ConditionKey), Vec<i64>> = BTreeMap::new();
    for listing in listings {
        if !is_aggregatable(listing) || !in_window(listing, now, window_days) {
            continue;
        }
        let (variant, condition) = granularity.key_parts(listing);
        buckets
            .entry((listing.model_key.clone(), variant, condition))
            .or_default()
            .push(listing.total_cents());
    }
    collect_groups(buckets, window_days, min_samples)
}

/// Per-model stats over the base population: tagged listings and any keyword-variant
/// title are left out. This is the baseline variant premiums are measured against.
pub fn build_base_stats(
    listings: &[NormalizedListing],
    now: DateTime<Utc>,
    window_days: u32,
    min_samples: usize,
) -> Vec<StatGroup> {
    let mut buckets: BTreeMap<(String, VariantKey, ConditionKey), Vec<i64>> = BTreeMap::new();
    for listing in listings {
        if !is_aggregatable(listing)
            || !in_window(listing, now, window_days)
            || listing.variant_tag.is_some()
            || is_variant_title(&listing.listing.title)
        {
            continue;
        }
        buckets
            .entry((listing.model_key.clone(), VariantKey::Base, ConditionKey::Any))
            .or_default()
            .push(listing.total_cents());
    }
    collect_groups(buckets, window_days, min_samples)
}

/// A stat group chosen for a listing, with how far the lookup had to fall back.
#[derive(Debug, Clone, Copy)]
pub struct StatMatch<'a> {
    pub group: &'a StatGroup,
    pub fallback_level: usize,
    pub match_tier: MatchTier,
}

/// All stat groups for one window, indexed for lookup.
#[derive(Debug, Clone, Default)]
pub struct StatTable {
    window_days: u32,
    groups: HashMap<StatKey, StatGroup>,
    models: HashSet<String>,
}

impl StatTable {
    pub fn from_groups(window_days: u32, groups: impl IntoIterator<Item = StatGroup>) -> Self {
        let mut table = Self {
            window_days,
            ..Self::default()
        };
        for group in groups {
            table.insert(group);
        }
        table
    }

    /// Per-variant, any-variant, collapsed and base views in one table.
    pub fn build(
        listings: &[NormalizedListing],
        now: DateTime<Utc>,
        window_days: u32,
        min_samples: usize,
    ) -> Self {
        let mut groups = Vec::new();
        for granularity in [
            Granularity::PerVariant,
            Granularity::AnyVariant,
            Granularity::Collapsed,
        ] {
            groups.extend(build_stats(listings, now, window_days, granularity, min_samples));
        }
        groups.extend(build_base_stats(listings, now, window_days, min_samples));
        Self::from_groups(window_days, groups)
    }

    fn insert(&mut self, group: StatGroup) {
        self.models.insert(group.key.model_key.clone());
        self.groups.insert(group.key.clone(), group);
    }

    pub fn window_days(&self) -> u32 {
        self.window_days
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, key: &StatKey) -> Option<&StatGroup> {
        self.groups.get(key)
    }

    pub fn group(
        &self,
        model_key: &str,
        variant: VariantKey,
        condition: ConditionKey,
    ) -> Option<&StatGroup> {
        self.get(&StatKey {
            model_key: model_key.to_string(),
            variant,
            condition,
            window_days: self.window_days,
        })
    }

    pub fn has_model(&self, model_key: &str) -> bool {
        self.models.contains(model_key)
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(String::as_str)
    }

    /// Groups sorted by key, for stable output.
    pub fn groups(&self) -> Vec<&StatGroup> {
        let mut groups: Vec<&StatGroup> = self.groups.values().collect();
        groups.sort_by(|a, b| a.key.cmp(&b.key));
        groups
    }

    /// Exact model key first, then its degraded form for legacy rows.
    pub fn resolve_model(&self, model_key: &str) -> Option<(String, MatchTier)> {
        if self.has_model(model_key) {
            return Some((model_key.to_string(), MatchTier::Exact));
        }
        let degraded = degrade_model_key(model_key);
        if !degraded.is_empty() && degraded != model_key && self.has_model(&degraded) {
            return Some((degraded, MatchTier::Degraded));
        }
        None
    }

    /// Walks (variant, band) -> (ANY, band) -> (ANY, ANY) for each model key tier.
    pub fn lookup(&self, listing: &NormalizedListing) -> Option<StatMatch<'_>> {
        if !listing.is_classifiable() {
            return None;
        }
        let band = ConditionKey::Band(listing.condition_band);
        let paths = [
            (VariantKey::from_tag(listing.variant_tag), band),
            (VariantKey::Any, band),
            (VariantKey::Any, ConditionKey::Any),
        ];

        let degraded = degrade_model_key(&listing.model_key);
        let mut candidates = vec![(listing.model_key.as_str(), MatchTier::Exact)];
        if !degraded.is_empty() && degraded != listing.model_key {
            candidates.push((degraded.as_str(), MatchTier::Degraded));
        }

        for (model_key, match_tier) in candidates {
            for (fallback_level, (variant, condition)) in paths.iter().enumerate() {
                if let Some(group) = self.group(model_key, *variant, *condition) {
                    return Some(StatMatch {
                        group,
                        fallback_level,
                        match_tier,
                    });
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConditionBand, Listing, VariantTag, VariantTier};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn listing(
        model_key: &str,
        total: i64,
        band: ConditionBand,
        tag: Option<VariantTag>,
        days_ago: i64,
    ) -> NormalizedListing {
        NormalizedListing {
            listing: Listing {
                item_id: format!("{}-{}-{}", model_key, total, days_ago),
                title: format!("{} putter", model_key),
                raw_model_field: None,
                brand: None,
                price_cents: total,
                shipping_cents: 0,
                condition_code: 3000,
                observed_at: now() - Duration::days(days_ago),
                url: String::new(),
            },
            model_key: model_key.to_string(),
            variant_tier: Some(tag.map(|t| t.tier()).unwrap_or(VariantTier::Retail)),
            variant_tag: tag,
            condition_band: band,
        }
    }

    fn used(model_key: &str, totals: &[i64]) -> Vec<NormalizedListing> {
        totals
            .iter()
            .map(|t| listing(model_key, *t, ConditionBand::Used, None, 1))
            .collect()
    }

    #[test]
    fn nearest_rank_percentiles() {
        let sorted = [100, 200, 300, 400, 500, 600, 700, 800, 900, 1000];
        assert_eq!(percentile(&sorted, 10), Some(100));
        assert_eq!(percentile(&sorted, 25), Some(300));
        assert_eq!(percentile(&sorted, 50), Some(500));
        assert_eq!(percentile(&sorted, 90), Some(900));
        assert_eq!(percentile(&sorted, 100), Some(1000));
        assert_eq!(percentile(&sorted, 0), Some(100));
        assert_eq!(percentile(&[], 50), None);
    }

    #[test]
    fn percentiles_are_monotonic() {
        for len in 4..40 {
            let totals: Vec<i64> = (0..len).map(|i| ((i * 7919) % 503) as i64 + 1).collect();
            let group = summarize(
                StatKey {
                    model_key: "m".into(),
                    variant: VariantKey::Any,
                    condition: ConditionKey::Any,
                    window_days: 60,
                },
                totals,
                DEFAULT_MIN_SAMPLES,
            )
            .unwrap();
            assert!(group.p10 <= group.p25);
            assert!(group.p25 <= group.p50);
            assert!(group.p50 <= group.p75);
            assert!(group.p75 <= group.p90);
        }
    }

    #[test]
    fn small_groups_are_dropped() {
        let listings = used("newport 2", &[10000, 20000, 30000]);
        let groups = build_stats(&listings, now(), 60, Granularity::PerVariant, DEFAULT_MIN_SAMPLES);
        assert!(groups.is_empty());
    }

    #[test]
    fn computes_group_summary() {
        let listings = used("newport 2", &[40000, 10000, 30000, 20000]);
        let groups = build_stats(&listings, now(), 60, Granularity::PerVariant, DEFAULT_MIN_SAMPLES);
        assert_eq!(groups.len(), 1);
        let g = &groups[0];
        assert_eq!(g.n, 4);
        assert_eq!(g.key.variant, VariantKey::Base);
        assert_eq!(g.key.condition, ConditionKey::Band(ConditionBand::Used));
        assert_eq!((g.p10, g.p25, g.p50, g.p75, g.p90), (10000, 10000, 20000, 30000, 40000));
        assert!((g.dispersion_ratio - 1.5).abs() < 1e-9);
    }

    #[test]
    fn input_order_does_not_matter() {
        let mut listings = used("newport 2", &[50000, 12000, 33000, 27000, 41000, 19000]);
        let forward = build_stats(&listings, now(), 60, Granularity::Collapsed, DEFAULT_MIN_SAMPLES);
        listings.reverse();
        let backward = build_stats(&listings, now(), 60, Granularity::Collapsed, DEFAULT_MIN_SAMPLES);
        assert_eq!(forward, backward);
    }

    #[test]
    fn window_filters_old_listings() {
        let mut listings = used("newport 2", &[10000, 20000, 30000]);
        listings.push(listing("newport 2", 40000, ConditionBand::Used, None, 90));
        assert!(build_stats(&listings, now(), 60, Granularity::Collapsed, 4).is_empty());
        assert_eq!(build_stats(&listings, now(), 120, Granularity::Collapsed, 4).len(), 1);
    }

    #[test]
    fn granularity_controls_grouping() {
        let mut listings = used("newport 2", &[10000, 20000]);
        listings.push(listing("newport 2", 30000, ConditionBand::Good, None, 1));
        listings.push(listing("newport 2", 40000, ConditionBand::Used, Some(VariantTag::CircleT), 1));

        assert!(build_stats(&listings, now(), 60, Granularity::PerVariant, 2).len() == 1);
        let any_variant = build_stats(&listings, now(), 60, Granularity::AnyVariant, 2);
        assert_eq!(any_variant.len(), 1);
        assert_eq!(any_variant[0].n, 3);
        let collapsed = build_stats(&listings, now(), 60, Granularity::Collapsed, 2);
        assert_eq!(collapsed[0].n, 4);
        assert_eq!(collapsed[0].key.condition, ConditionKey::Any);
    }

    #[test]
    fn unclassifiable_and_free_listings_are_skipped() {
        let mut listings = used("", &[10000, 20000, 30000, 40000]);
        listings.extend(used("newport", &[0, 0, 0, 0]));
        assert!(build_stats(&listings, now(), 60, Granularity::Collapsed, 4).is_empty());
    }

    #[test]
    fn base_stats_exclude_keyword_variants() {
        let mut listings = used("newport 2", &[10000, 20000, 30000, 40000]);
        let mut tour = listing("newport 2", 90000, ConditionBand::Used, None, 1);
        tour.listing.title = "Newport 2 Tour Rat".into();
        listings.push(tour);
        listings.push(listing("newport 2", 80000, ConditionBand::Used, Some(VariantTag::Tei3), 1));
        let base = build_base_stats(&listings, now(), 60, 4);
        assert_eq!(base.len(), 1);
        assert_eq!(base[0].n, 4);
        assert_eq!(base[0].p90, 40000);
    }

    #[test]
    fn lookup_falls_back_to_wider_groups() {
        let mut listings = used("newport 2", &[10000, 20000, 30000, 40000]);
        listings.push(listing("newport 2", 35000, ConditionBand::Good, None, 1));
        let table = StatTable::build(&listings, now(), 60, 4);

        let exact = listing("newport 2", 15000, ConditionBand::Used, None, 0);
        let m = table.lookup(&exact).unwrap();
        assert_eq!(m.fallback_level, 0);
        assert_eq!(m.match_tier, MatchTier::Exact);

        let good = listing("newport 2", 15000, ConditionBand::Good, None, 0);
        let m = table.lookup(&good).unwrap();
        assert_eq!(m.fallback_level, 2);
        assert_eq!(m.group.key.condition, ConditionKey::Any);
        assert_eq!(m.group.n, 5);

        let unknown = listing("phantom x", 15000, ConditionBand::Used, None, 0);
        assert!(table.lookup(&unknown).is_none());
    }

    #[test]
    fn lookup_uses_degraded_key_for_legacy_rows() {
        let legacy = used("newport 25", &[10000, 20000, 30000, 40000]);
        let table = StatTable::build(&legacy, now(), 60, 4);

        let current = listing("newport 2.5", 15000, ConditionBand::Used, None, 0);
        let m = table.lookup(&current).unwrap();
        assert_eq!(m.match_tier, MatchTier::Degraded);
        assert_eq!(m.group.key.model_key, "newport 25");
        assert_eq!(
            table.resolve_model("newport 2.5"),
            Some(("newport 25".to_string(), MatchTier::Degraded))
        );
        assert_eq!(
            table.resolve_model("newport 25"),
            Some(("newport 25".to_string(), MatchTier::Exact))
        );
    }
}
