use chrono::{Duration, Utc};
use putter_deals::analyzer::{
    LabelCatalog, MarketAnalyzer, StatTable, latest_observations, rank_deals,
};
use putter_deals::cache::StatsCache;
use putter_deals::config::{AppConfig, load_config};
use putter_deals::normalizer::{normalize_all, retain_putters};
use putter_deals::source::{ListingSource, build_sources, fetch_all};
use putter_deals::storage::SqliteStorage;
use putter_deals::utils::format_cents;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const SUGGESTION_LIMIT: usize = 5;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());
    let config = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Config load error ({}): {}", config_path, e);
            return;
        }
    };

    let sources = match build_sources(&config.sources) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to set up listing sources: {}", e);
            return;
        }
    };

    let mut storage = match SqliteStorage::new(&config.database_path) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to initialize storage: {}", e);
            return;
        }
    };

    let mut cache: StatsCache<u32, StatTable> =
        StatsCache::new(Duration::minutes(config.market.cache_ttl_minutes));
    match cache.warm_from(&storage, &config.market.stats_windows()) {
        Ok(0) => {}
        Ok(loaded) => info!("Reusing {} stored stats windows", loaded),
        Err(e) => warn!("Failed to load stored stats: {}", e),
    }
    let labels = config.label_catalog();

    loop {
        info!("Starting cycle over {} sources...", sources.len());
        run_cycle(&config, &sources, &mut storage, &mut cache, &labels).await;

        info!(
            "Waiting for timer ({}s) or Ctrl-C...",
            config.check_interval_seconds
        );
        tokio::select! {
            _ = sleep(std::time::Duration::from_secs(config.check_interval_seconds)) => {
                info!("Timer triggered.");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down.");
                break;
            }
        }
    }
}

/// One pass: ingest, aggregate every stats window, rank and report.
async fn run_cycle(
    config: &AppConfig,
    sources: &[Box<dyn ListingSource>],
    storage: &mut SqliteStorage,
    cache: &mut StatsCache<u32, StatTable>,
    labels: &LabelCatalog,
) {
    let now = Utc::now();
    let market = &config.market;
    let windows = market.stats_windows();
    let Some(&widest_days) = windows.last() else {
        warn!("No stats windows configured");
        return;
    };

    let fetched = fetch_all(sources).await;
    match storage.save_listings(&fetched) {
        Ok(saved) => info!("Saved {} observations", saved),
        Err(e) => warn!("DB save error: {}", e),
    }

    let horizon = now - Duration::days(i64::from(widest_days));
    match storage.prune_listings_before(horizon) {
        Ok(0) => {}
        Ok(removed) => info!("Pruned {} observations older than {}d", removed, widest_days),
        Err(e) => warn!("Prune failed: {}", e),
    }

    let recent = match storage.listings_since(horizon) {
        Ok(listings) => listings,
        Err(e) => {
            warn!("Failed to load recent listings: {}", e);
            return;
        }
    };
    let observed = recent.len();
    let listings = retain_putters(normalize_all(latest_observations(recent)));
    info!(
        "{} putter listings from {} observations",
        listings.len(),
        observed
    );

    cache.purge_expired();
    let mut tables = Vec::with_capacity(windows.len());
    for window_days in windows {
        if let Some(table) = cache.get(&window_days) {
            debug!("Reusing cached {}d stats ({} groups)", window_days, table.len());
            tables.push(table.clone());
            continue;
        }

        let table = StatTable::build(&listings, now, window_days, market.min_samples);
        info!("Built {}d stats: {} groups", window_days, table.len());
        if let Err(e) = storage.replace_stats(window_days, &table.groups(), now) {
            warn!("Stats update failed for {}d: {}", window_days, e);
        }
        cache.insert(window_days, table.clone());
        tables.push(table);
    }

    // Narrowest window grades, widest backs the market indicators.
    let (Some(grading_table), Some(wide_table)) = (tables.first(), tables.last()) else {
        return;
    };

    let feed = rank_deals(&listings, grading_table, now, &market.rank_options(), labels);
    match feed.window_hours_used {
        Some(hours) => info!("Top {} deals from the {}h window:", feed.deals.len(), hours),
        None => info!("No deals to rank."),
    }
    for deal in &feed.deals {
        info!(
            "[{}] {} | {} ({:.1}% / {} under median {}) | {}",
            deal.grade.letter.map(|l| l.as_str()).unwrap_or("-"),
            deal.label,
            format_cents(deal.listing.total_cents()),
            deal.savings_percent * 100.0,
            format_cents(deal.savings_amount_cents),
            format_cents(deal.group.p50),
            deal.listing.listing.url
        );
    }

    if let Some(top) = feed.deals.first() {
        if let Some(deltas) = MarketAnalyzer::condition_deltas(wide_table, &top.listing.model_key) {
            for delta in &deltas.deltas {
                debug!(
                    "{} {}: median {} ({:+.1}%, n={})",
                    deltas.model_key,
                    delta.band,
                    format_cents(delta.p50),
                    delta.delta_pct * 100.0,
                    delta.n
                );
            }
        }
    }

    for uplift in MarketAnalyzer::variant_uplifts(wide_table, market.min_uplift_support) {
        info!(
            "Variant {} trades at {:.2}x base (support {})",
            uplift.tag, uplift.ratio, uplift.support
        );
    }

    for model_key in labels.keys() {
        if wide_table.resolve_model(model_key).is_none() {
            let suggestions = MarketAnalyzer::suggest_models(wide_table, model_key, SUGGESTION_LIMIT);
            warn!(
                "Curated label '{}' matches no stats; did you mean {:?}",
                model_key, suggestions
            );
        }
    }
}
