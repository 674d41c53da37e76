use crate::analyzer::grading::{GradeInput, GradePolicy, grade_deal};
use crate::analyzer::price_analysis::StatTable;
use crate::model::{NormalizedListing, RankedDeal, RankedFeed};
use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

/// Curated display labels keyed by model key.
pub type LabelCatalog = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct RankOptions {
    /// Candidate rolling windows in hours; tried narrowest first.
    pub windows_hours: Vec<u32>,
    /// Graded deals a window must yield to be accepted.
    pub min_count: usize,
    pub min_savings_pct: Option<f64>,
    pub max_dispersion: Option<f64>,
    pub limit: Option<usize>,
    pub policy: GradePolicy,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            windows_hours: vec![24, 48, 72],
            min_count: 6,
            min_savings_pct: None,
            max_dispersion: None,
            limit: None,
            policy: GradePolicy::default(),
        }
    }
}

/// Ranks graded deals from the narrowest rolling window that yields `min_count` of them.
/// When none does, the widest window's deals are returned as they are.
pub fn rank_deals(
    listings: &[NormalizedListing],
    table: &StatTable,
    now: DateTime<Utc>,
    options: &RankOptions,
    labels: &LabelCatalog,
) -> RankedFeed {
    let mut windows = options.windows_hours.clone();
    windows.sort_unstable();
    windows.dedup();

    let mut feed = RankedFeed::default();
    for hours in windows {
        let cutoff = now - Duration::hours(i64::from(hours));
        let mut deals: Vec<RankedDeal> = listings
            .iter()
            .filter(|l| l.listing.observed_at >= cutoff)
            .filter_map(|l| build_deal(l, table, options, labels))
            .collect();
        deals.sort_by(compare_deals);

        let enough = deals.len() >= options.min_count;
        feed = RankedFeed {
            deals,
            window_hours_used: Some(hours),
        };
        if enough {
            break;
        }
        debug!(
            "{}h window yielded {} deals (need {}), widening",
            hours,
            feed.deals.len(),
            options.min_count
        );
    }

    if let Some(limit) = options.limit {
        feed.deals.truncate(limit);
    }
    feed
}

fn build_deal(
    listing: &NormalizedListing,
    table: &StatTable,
    options: &RankOptions,
    labels: &LabelCatalog,
) -> Option<RankedDeal> {
    let found = table.lookup(listing)?;
    let group = found.group;
    let total = listing.total_cents();

    let grade = grade_deal(GradeInput::new(total, group), &options.policy);
    if !grade.is_graded() {
        return None;
    }
    let savings_percent = grade.delta_pct?;

    // Only listings under the median are deals; the rest must not fill `min_count`.
    if savings_percent <= 0.0 {
        return None;
    }
    if options.min_savings_pct.is_some_and(|min| savings_percent < min) {
        return None;
    }
    if options
        .max_dispersion
        .is_some_and(|max| group.dispersion_ratio > max)
    {
        return None;
    }

    let label = compose_deal_label(
        labels.get(&listing.model_key).map(String::as_str),
        listing.listing.raw_model_field.as_deref(),
        &listing.listing.title,
    );

    Some(RankedDeal {
        listing: listing.clone(),
        group: group.clone(),
        grade,
        label,
        savings_amount_cents: group.p50 - total,
        savings_percent,
        window_days_used: group.key.window_days,
        fallback_level: found.fallback_level,
        match_tier: found.match_tier,
    })
}

/// Best savings first; equal savings go to the cheaper total.
fn compare_deals(a: &RankedDeal, b: &RankedDeal) -> Ordering {
    b.savings_percent
        .partial_cmp(&a.savings_percent)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.listing.total_cents().cmp(&b.listing.total_cents()))
        .then_with(|| a.listing.listing.item_id.cmp(&b.listing.listing.item_id))
}

/// Human-readable deal label: curated label, then the delimited model key without
/// its leading brand segment, then the raw title.
pub fn compose_deal_label(curated: Option<&str>, raw_model_key: Option<&str>, title: &str) -> String {
    if let Some(label) = curated.map(str::trim).filter(|l| !l.is_empty()) {
        return label.to_string();
    }

    if let Some(raw) = raw_model_key {
        let segments = model_key_segments(raw);
        if segments.len() >= 2 {
            return segments[1..]
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
        }
    }

    title.trim().to_string()
}

/// Splits on pipes and on dots that are neither decimal points ("2.5") nor
/// abbreviations followed by a space ("No. 7").
fn model_key_segments(raw: &str) -> Vec<String> {
    let chars: Vec<char> = raw.chars().collect();
    let mut segments = Vec::new();
    let mut current = String::new();

    for (i, c) in chars.iter().enumerate() {
        let is_delimiter = match c {
            '|' => true,
            '.' => {
                let prev_digit = i > 0 && chars[i - 1].is_ascii_digit();
                let next = chars.get(i + 1);
                let next_digit = next.is_some_and(|n| n.is_ascii_digit());
                let next_space = next.is_some_and(|n| n.is_whitespace());
                !(prev_digit && next_digit) && !next_space
            }
            _ => false,
        };
        if is_delimiter {
            segments.push(std::mem::take(&mut current));
        } else {
            current.push(*c);
        }
    }
    segments.push(current);

    segments
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
