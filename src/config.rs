use crate::analyzer::grading::{
    DEFAULT_DISCOUNT_MULTIPLIER, DEFAULT_DISPERSION_THRESHOLD, GradePolicy,
};
use crate::analyzer::market_indicators::DEFAULT_MIN_UPLIFT_SUPPORT;
use crate::analyzer::price_analysis::DEFAULT_MIN_SAMPLES;
use crate::analyzer::ranking::{LabelCatalog, RankOptions};
use crate::cache::DEFAULT_TTL_MINUTES;
use crate::model::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

/// Where listings are read from each cycle.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    File { path: String },
    Http { url: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_dispersion_threshold")]
    pub dispersion_threshold: f64,
    #[serde(default = "default_discount_multiplier")]
    pub discount_multiplier: f64,
    #[serde(default = "default_stats_window_days")]
    pub stats_window_days: Vec<u32>,
    #[serde(default = "default_rank_windows_hours")]
    pub rank_windows_hours: Vec<u32>,
    #[serde(default = "default_min_count")]
    pub min_count: usize,
    #[serde(default = "default_limit")]
    pub limit: Option<usize>,
    /// `null` disables the filter.
    #[serde(default = "default_min_savings_pct")]
    pub min_savings_pct: Option<f64>,
    #[serde(default = "default_max_dispersion")]
    pub max_dispersion: Option<f64>,
    #[serde(default = "default_cache_ttl_minutes")]
    pub cache_ttl_minutes: i64,
    #[serde(default = "default_min_uplift_support")]
    pub min_uplift_support: usize,
}

fn default_min_samples() -> usize {
    DEFAULT_MIN_SAMPLES
}

fn default_dispersion_threshold() -> f64 {
    DEFAULT_DISPERSION_THRESHOLD
}

fn default_discount_multiplier() -> f64 {
    DEFAULT_DISCOUNT_MULTIPLIER
}

fn default_stats_window_days() -> Vec<u32> {
    vec![60, 90, 180]
}

fn default_rank_windows_hours() -> Vec<u32> {
    vec![24, 48, 72]
}

fn default_min_count() -> usize {
    6
}

fn default_limit() -> Option<usize> {
    Some(12)
}

fn default_min_savings_pct() -> Option<f64> {
    Some(0.2)
}

fn default_max_dispersion() -> Option<f64> {
    Some(5.0)
}

fn default_cache_ttl_minutes() -> i64 {
    DEFAULT_TTL_MINUTES
}

fn default_min_uplift_support() -> usize {
    DEFAULT_MIN_UPLIFT_SUPPORT
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            dispersion_threshold: default_dispersion_threshold(),
            discount_multiplier: default_discount_multiplier(),
            stats_window_days: default_stats_window_days(),
            rank_windows_hours: default_rank_windows_hours(),
            min_count: default_min_count(),
            limit: default_limit(),
            min_savings_pct: default_min_savings_pct(),
            max_dispersion: default_max_dispersion(),
            cache_ttl_minutes: default_cache_ttl_minutes(),
            min_uplift_support: default_min_uplift_support(),
        }
    }
}

impl MarketConfig {
    pub fn grade_policy(&self) -> GradePolicy {
        GradePolicy {
            discount_multiplier: self.discount_multiplier,
            dispersion_threshold: self.dispersion_threshold,
        }
    }

    pub fn rank_options(&self) -> RankOptions {
        RankOptions {
            windows_hours: self.rank_windows_hours.clone(),
            min_count: self.min_count,
            min_savings_pct: self.min_savings_pct,
            max_dispersion: self.max_dispersion,
            limit: self.limit,
            policy: self.grade_policy(),
        }
    }

    /// Stats windows ascending, without duplicates. The narrowest is used for grading.
    pub fn stats_windows(&self) -> Vec<u32> {
        let mut windows = self.stats_window_days.clone();
        windows.sort_unstable();
        windows.dedup();
        windows
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_samples < 1 {
            return Err(ConfigError::Invalid("market.min_samples must be at least 1".into()));
        }
        if !(self.discount_multiplier > 0.0) {
            return Err(ConfigError::Invalid("market.discount_multiplier must be positive".into()));
        }
        if !(self.dispersion_threshold > 0.0) {
            return Err(ConfigError::Invalid("market.dispersion_threshold must be positive".into()));
        }
        if self.stats_window_days.is_empty() || self.stats_window_days.contains(&0) {
            return Err(ConfigError::Invalid(
                "market.stats_window_days must list positive day counts".into(),
            ));
        }
        if self.rank_windows_hours.is_empty() || self.rank_windows_hours.contains(&0) {
            return Err(ConfigError::Invalid(
                "market.rank_windows_hours must list positive hour counts".into(),
            ));
        }
        if self.cache_ttl_minutes < 0 {
            return Err(ConfigError::Invalid("market.cache_ttl_minutes must not be negative".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    pub check_interval_seconds: u64,
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub model_labels: HashMap<String, String>,
}

fn default_database_path() -> String {
    "data.db".to_string()
}

impl AppConfig {
    pub fn label_catalog(&self) -> LabelCatalog {
        self.model_labels.clone()
    }
}

pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    config.market.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_config_gets_market_defaults() {
        let file = write_config(
            r#"{
                "check_interval_seconds": 900,
                "sources": [
                    {"kind": "file", "path": "feed.json"},
                    {"kind": "http", "url": "https://feeds.example.com/putters"}
                ]
            }"#,
        );
        let config = load_config(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.database_path, "data.db");
        assert_eq!(
            config.sources,
            vec![
                SourceConfig::File { path: "feed.json".into() },
                SourceConfig::Http { url: "https://feeds.example.com/putters".into() },
            ]
        );
        assert_eq!(config.market, MarketConfig::default());
        assert_eq!(config.market.rank_options(), RankOptions {
            limit: Some(12),
            min_savings_pct: Some(0.2),
            max_dispersion: Some(5.0),
            ..RankOptions::default()
        });
        assert!(config.model_labels.is_empty());
    }

    #[test]
    fn market_overrides_and_labels() {
        let file = write_config(
            r#"{
                "database_path": "/tmp/deals.db",
                "check_interval_seconds": 60,
                "sources": [],
                "market": {
                    "min_samples": 8,
                    "stats_window_days": [180, 60, 60],
                    "min_savings_pct": 0.1,
                    "max_dispersion": null,
                    "limit": null
                },
                "model_labels": {"newport 2": "Newport 2"}
            }"#,
        );
        let config = load_config(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.market.min_samples, 8);
        assert_eq!(config.market.stats_windows(), vec![60, 180]);
        assert_eq!(config.market.rank_options().min_savings_pct, Some(0.1));
        assert_eq!(config.market.rank_options().limit, None);
        assert_eq!(config.market.rank_options().max_dispersion, None);
        assert_eq!(
            config.label_catalog().get("newport 2").map(String::as_str),
            Some("Newport 2")
        );
    }

    #[test]
    fn rejects_invalid_market_settings() {
        for market in [
            r#"{"min_samples": 0}"#,
            r#"{"discount_multiplier": 0}"#,
            r#"{"dispersion_threshold": -1.0}"#,
            r#"{"stats_window_days": []}"#,
            r#"{"rank_windows_hours": [0, 24]}"#,
        ] {
            let file = write_config(&format!(
                r#"{{"check_interval_seconds": 60, "sources": [], "market": {market}}}"#
            ));
            let err = load_config(file.path().to_str().unwrap()).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{market}: {err}");
        }
    }

    #[test]
    fn missing_or_malformed_file() {
        assert!(matches!(
            load_config("/nonexistent/config.json"),
            Err(ConfigError::Io(_))
        ));
        let file = write_config("{ not json");
        assert!(matches!(
            load_config(file.path().to_str().unwrap()),
            Err(ConfigError::Parse(_))
        ));
    }
}
