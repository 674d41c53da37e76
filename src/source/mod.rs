// Listing sources: where each cycle's observations come from.

use crate::config::SourceConfig;
use crate::model::{Listing, SourceError};
use futures::future::join_all;
use reqwest::Client;
use std::path::PathBuf;
use tracing::{info, warn};

#[async_trait::async_trait]
pub trait ListingSource: Send + Sync {
    fn name(&self) -> String;
    async fn fetch(&self) -> Result<Vec<Listing>, SourceError>;
}

/// A JSON array of listings on disk.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl ListingSource for JsonFileSource {
    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn fetch(&self) -> Result<Vec<Listing>, SourceError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// A feed endpoint returning a JSON array of listings.
pub struct HttpFeedSource {
    client: Client,
    url: String,
}

impl HttpFeedSource {
    pub fn new(url: impl Into<String>) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(concat!("putter-deals/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl ListingSource for HttpFeedSource {
    fn name(&self) -> String {
        format!("http:{}", self.url)
    }

    async fn fetch(&self) -> Result<Vec<Listing>, SourceError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::InvalidResponse(response.status().as_u16()));
        }
        Ok(response.json::<Vec<Listing>>().await?)
    }
}

pub fn build_sources(configs: &[SourceConfig]) -> Result<Vec<Box<dyn ListingSource>>, SourceError> {
    configs
        .iter()
        .map(|config| -> Result<Box<dyn ListingSource>, SourceError> {
            match config {
                SourceConfig::File { path } => Ok(Box::new(JsonFileSource::new(path))),
                SourceConfig::Http { url } => Ok(Box::new(HttpFeedSource::new(url.clone())?)),
            }
        })
        .collect()
}

/// Fetches every source concurrently. A failing source is logged and skipped.
pub async fn fetch_all(sources: &[Box<dyn ListingSource>]) -> Vec<Listing> {
    let results = join_all(sources.iter().map(|source| async move {
        (source.name(), source.fetch().await)
    }))
    .await;

    let mut listings = Vec::new();
    for (name, result) in results {
        match result {
            Ok(batch) => {
                info!("Fetched {} listings from {}", batch.len(), name);
                listings.extend(batch);
            }
            Err(e) => warn!("Source {} failed: {}", name, e),
        }
    }
    listings
}
