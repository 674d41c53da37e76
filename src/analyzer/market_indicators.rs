use crate::analyzer::price_analysis::StatTable;
use crate::model::{ConditionBand, ConditionKey, MatchTier, VariantKey, VariantTag};
use crate::normalizer::normalize_model_key;
use std::collections::BTreeMap;

pub const DEFAULT_MIN_UPLIFT_SUPPORT: usize = 12;

/// How much a variant tag lifts the median over the plain model, across models.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantUplift {
    pub tag: VariantTag,
    pub ratio: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionDelta {
    pub band: ConditionBand,
    pub p50: i64,
    pub n: usize,
    /// Band median relative to the all-condition median; negative is cheaper.
    pub delta_pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionDeltas {
    pub model_key: String,
    pub match_tier: MatchTier,
    pub overall_p50: i64,
    pub deltas: Vec<ConditionDelta>,
}

pub struct MarketAnalyzer;

impl MarketAnalyzer {
    /// Median of variant-p50 / base-p50 per tag, across models. Each (model, band)
    /// variant group is compared with the model's base baseline: the (BASE, ANY)
    /// group, which leaves tagged and keyword-variant titles out. Tags seen on fewer
    /// than `min_support` groups are left out.
    pub fn variant_uplifts(table: &StatTable, min_support: usize) -> Vec<VariantUplift> {
        let mut ratios: BTreeMap<VariantTag, Vec<f64>> = BTreeMap::new();

        for group in table.groups() {
            let VariantKey::Tag(tag) = group.key.variant else {
                continue;
            };
            let Some(base) = table.group(&group.key.model_key, VariantKey::Base, ConditionKey::Any)
            else {
                continue;
            };
            if base.p50 <= 0 || group.p50 <= 0 {
                continue;
            }
            ratios
                .entry(tag)
                .or_default()
                .push(group.p50 as f64 / base.p50 as f64);
        }

        ratios
            .into_iter()
            .filter(|(_, values)| values.len() >= min_support.max(1))
            .filter_map(|(tag, mut values)| {
                let support = values.len();
                median(&mut values).map(|ratio| VariantUplift {
                    tag,
                    ratio,
                    support,
                })
            })
            .collect()
    }

    /// Per-band medians against the all-condition median for one model.
    pub fn condition_deltas(table: &StatTable, model_text: &str) -> Option<ConditionDeltas> {
        let requested = normalize_model_key(model_text);
        if requested.is_empty() {
            return None;
        }
        let (model_key, match_tier) = table.resolve_model(&requested)?;
        let overall = table.group(&model_key, VariantKey::Any, ConditionKey::Any)?;
        if overall.p50 <= 0 {
            return None;
        }

        let deltas = ConditionBand::ALL
            .iter()
            .filter_map(|band| {
                let group = table.group(&model_key, VariantKey::Any, ConditionKey::Band(*band))?;
                Some(ConditionDelta {
                    band: *band,
                    p50: group.p50,
                    n: group.n,
                    delta_pct: (group.p50 - overall.p50) as f64 / overall.p50 as f64,
                })
            })
            .collect();

        Some(ConditionDeltas {
            model_key,
            match_tier,
            overall_p50: overall.p50,
            deltas,
        })
    }

    /// Models starting with the first 3..=12 characters of the normalized query,
    /// most-sampled first.
    pub fn suggest_models(table: &StatTable, query: &str, limit: usize) -> Vec<String> {
        let requested = normalize_model_key(query);
        if requested.is_empty() {
            return Vec::new();
        }
        let prefix_len = requested.chars().count().clamp(3, 12);
        let prefix: String = requested.chars().take(prefix_len).collect();

        let mut candidates: Vec<(usize, &str)> = table
            .models()
            .filter(|m| m.starts_with(&prefix))
            .map(|m| {
                let n = table
                    .group(m, VariantKey::Any, ConditionKey::Any)
                    .map(|g| g.n)
                    .unwrap_or(0);
                (n, m)
            })
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        candidates
            .into_iter()
            .take(limit)
            .map(|(_, m)| m.to_string())
            .collect()
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Listing, NormalizedListing, VariantTier};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn listing(model: &str, total: i64, band: ConditionBand, tag: Option<VariantTag>) -> NormalizedListing {
        NormalizedListing {
            listing: Listing {
                item_id: format!("{model}-{total}"),
                title: model.to_string(),
                raw_model_field: None,
                brand: None,
                price_cents: total,
                shipping_cents: 0,
                condition_code: 3000,
                observed_at: now() - Duration::days(1),
                url: String::new(),
            },
            model_key: model.to_string(),
            variant_tier: Some(tag.map(|t| t.tier()).unwrap_or(VariantTier::Retail)),
            variant_tag: tag,
            condition_band: band,
        }
    }

    fn population(
        model: &str,
        totals: &[i64],
        band: ConditionBand,
        tag: Option<VariantTag>,
    ) -> Vec<NormalizedListing> {
        totals.iter().map(|t| listing(model, *t, band, tag)).collect()
    }

    #[test]
    fn uplift_is_median_ratio_across_models() {
        let mut listings = Vec::new();
        for (model, base, premium) in [
            ("newport", 20000, 60000),
            ("newport 2", 25000, 50000),
            ("fastback", 10000, 40000),
        ] {
            listings.extend(population(model, &[base; 4], ConditionBand::Used, None));
            listings.extend(population(
                model,
                &[premium; 4],
                ConditionBand::Used,
                Some(VariantTag::CircleT),
            ));
        }
        let table = StatTable::build(&listings, now(), 60, 4);

        let uplifts = MarketAnalyzer::variant_uplifts(&table, 3);
        assert_eq!(uplifts.len(), 1);
        assert_eq!(uplifts[0].tag, VariantTag::CircleT);
        assert_eq!(uplifts[0].support, 3);
        assert!((uplifts[0].ratio - 3.0).abs() < 1e-9);

        assert!(MarketAnalyzer::variant_uplifts(&table, 4).is_empty());
    }

    #[test]
    fn uplift_baseline_is_collapsed_base_group() {
        let mut listings = Vec::new();
        for (model, premium) in [("a", 40000), ("b", 60000)] {
            // One retail listing per band: no per-band base group survives min_samples.
            for band in [
                ConditionBand::New,
                ConditionBand::LikeNew,
                ConditionBand::Good,
                ConditionBand::Used,
            ] {
                listings.push(listing(model, 20000, band, None));
            }
            listings.extend(population(
                model,
                &[premium; 4],
                ConditionBand::Used,
                Some(VariantTag::CircleT),
            ));
        }
        let table = StatTable::build(&listings, now(), 60, 4);
        assert!(table.group("a", VariantKey::Base, ConditionKey::Band(ConditionBand::Used)).is_none());
        assert_eq!(table.group("a", VariantKey::Base, ConditionKey::Any).map(|g| g.p50), Some(20000));

        let uplifts = MarketAnalyzer::variant_uplifts(&table, 1);
        assert_eq!(uplifts.len(), 1);
        assert_eq!(uplifts[0].tag, VariantTag::CircleT);
        assert_eq!(uplifts[0].support, 2);
        assert!((uplifts[0].ratio - 2.5).abs() < 1e-9);
    }

    #[test]
    fn keyword_titles_stay_out_of_uplift_baseline() {
        let mut listings = population("newport", &[20000; 4], ConditionBand::Used, None);
        let mut keyword = population("newport", &[90000; 4], ConditionBand::Good, None);
        for l in &mut keyword {
            l.listing.title = "Newport Tiffany".into();
        }
        listings.extend(keyword);
        listings.extend(population(
            "newport",
            &[40000; 4],
            ConditionBand::Used,
            Some(VariantTag::Garage),
        ));
        let table = StatTable::build(&listings, now(), 60, 4);

        let uplifts = MarketAnalyzer::variant_uplifts(&table, 1);
        assert_eq!(uplifts.len(), 1);
        assert!((uplifts[0].ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn condition_deltas_against_overall_median() {
        let mut listings = population("newport 2", &[30000; 4], ConditionBand::New, None);
        listings.extend(population("newport 2", &[20000; 4], ConditionBand::Used, None));
        listings.extend(population("newport 2", &[15000; 2], ConditionBand::Fair, None));
        let table = StatTable::build(&listings, now(), 60, 4);

        let deltas = MarketAnalyzer::condition_deltas(&table, "Scotty Cameron Newport 2").unwrap();
        assert_eq!(deltas.model_key, "newport 2");
        assert_eq!(deltas.match_tier, MatchTier::Exact);
        assert_eq!(deltas.overall_p50, 20000);
        assert_eq!(deltas.deltas.len(), 2);
        assert_eq!(deltas.deltas[0].band, ConditionBand::New);
        assert!((deltas.deltas[0].delta_pct - 0.5).abs() < 1e-9);
        assert_eq!(deltas.deltas[1].band, ConditionBand::Used);
        assert_eq!(deltas.deltas[1].delta_pct, 0.0);

        assert!(MarketAnalyzer::condition_deltas(&table, "Phantom X").is_none());
        assert!(MarketAnalyzer::condition_deltas(&table, "putter").is_none());
    }

    #[test]
    fn suggestions_rank_by_sample_size() {
        let mut listings = population("newport 2", &[20000; 4], ConditionBand::Used, None);
        listings.extend(population("newport", &[20000; 6], ConditionBand::Used, None));
        listings.extend(population("fastback", &[20000; 8], ConditionBand::Used, None));
        let table = StatTable::build(&listings, now(), 60, 4);

        assert_eq!(
            MarketAnalyzer::suggest_models(&table, "Scotty Newp", 5),
            vec!["newport".to_string(), "newport 2".to_string()]
        );
        assert_eq!(MarketAnalyzer::suggest_models(&table, "newport", 1), vec!["newport".to_string()]);
        assert!(MarketAnalyzer::suggest_models(&table, "Newport 3", 5).is_empty());
        assert!(MarketAnalyzer::suggest_models(&table, "", 5).is_empty());
    }
}
