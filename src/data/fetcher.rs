//! The [`DataSetFetcher`] used in production

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

use super::fedwatch::{self, FedWatchSnapshot};
use super::{macro_data, rates, DataSet, DataSetFetcher, MarketDataSource, ProviderError};

/// Builds each data-set's payload from a [`MarketDataSource`]
#[derive(Debug)]
pub struct MarketDataFetcher<S> {
    source: S,
    fedwatch_snapshot: Option<PathBuf>,
}

impl<S: MarketDataSource> MarketDataFetcher<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            fedwatch_snapshot: None,
        }
    }

    /// Read Fed odds from this JSON file on every fetch instead of the
    /// built-in snapshot
    pub fn with_fedwatch_snapshot(mut self, path: Option<PathBuf>) -> Self {
        self.fedwatch_snapshot = path;
        self
    }

    async fn fedwatch_snapshot(&self) -> Result<FedWatchSnapshot, ProviderError> {
        match &self.fedwatch_snapshot {
            Some(path) => fedwatch::load_snapshot(path).await,
            None => Ok(FedWatchSnapshot::default()),
        }
    }
}

#[async_trait]
impl<S: MarketDataSource> DataSetFetcher for MarketDataFetcher<S> {
    async fn fetch(&self, data_set: DataSet) -> Result<Value, ProviderError> {
        let today = Utc::now().date_naive();
        debug!(key = %data_set, "Building payload");

        let payload = match data_set {
            DataSet::Macro => serde_json::to_value(macro_data::build(&self.source, today).await?)?,
            DataSet::Rates => serde_json::to_value(rates::build(&self.source, today).await?)?,
            DataSet::FedWatch => {
                serde_json::to_value(fedwatch::build(self.fedwatch_snapshot().await?)?)?
            }
        };
        Ok(payload)
    }
}
