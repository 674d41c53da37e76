pub mod analyzer;
pub mod cache;
pub mod condition;
pub mod config;
pub mod model;
pub mod normalizer;
pub mod source;
pub mod storage;
pub mod utils;
pub mod variant;
