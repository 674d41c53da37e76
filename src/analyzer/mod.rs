// Analyzer module: percentile stats, grading, ranking and market indicators.

pub mod grading;
pub mod lifecycle;
pub mod market_indicators;
pub mod price_analysis;
pub mod ranking;

// Re-export the pipeline entry points for ease of use.
pub use grading::{GradeInput, GradePolicy, grade_deal};
pub use lifecycle::latest_observations;
pub use market_indicators::{ConditionDeltas, MarketAnalyzer, VariantUplift};
pub use price_analysis::{StatMatch, StatTable, build_base_stats, build_stats};
pub use ranking::{LabelCatalog, RankOptions, rank_deals};
