//! Directory service client.
//!
//! Two listings: the most-clicked stations and a by-name search.  Every
//! call goes to the network; nothing is cached and nothing is retried.

use std::time::Duration;

use async_trait::async_trait;
use radio_proto::config::DirectoryConfig;
use radio_proto::station::{normalize_stations, RawStation, StationRecord};
use reqwest::header::{HeaderValue, ACCEPT};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Transport failure, timeout, non-success status or undecodable body.
    #[error("network error: {0}")]
    Network(String),
    /// The service answered but nothing usable survived normalization.
    #[error("no usable stations in response")]
    Empty,
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Network(e.to_string())
    }
}

/// A source of station listings.  The session core only talks to this.
#[async_trait]
pub trait StationDirectory: Send + Sync {
    async fn list_top_stations(&self, limit: usize) -> Result<Vec<StationRecord>, FetchError>;

    async fn search_by_name(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StationRecord>, FetchError>;
}

pub struct DirectoryClient {
    client: reqwest::Client,
    base_url: String,
}

impl DirectoryClient {
    pub fn new(config: &DirectoryConfig) -> Result<Self, FetchError> {
        Self::with_timeout(&config.base_url, &config.user_agent, config.request_timeout())
    }

    pub fn with_timeout(
        base_url: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn top_stations_url(&self, limit: usize) -> String {
        format!(
            "{}/stations/topclick?limit={}&hidebroken=true",
            self.base_url, limit
        )
    }

    pub fn search_url(&self, query: &str, limit: usize) -> String {
        format!(
            "{}/stations/byname/{}?limit={}&hidebroken=true",
            self.base_url,
            urlencoding::encode(query),
            limit
        )
    }

    async fn fetch(&self, url: &str) -> Result<Vec<StationRecord>, FetchError> {
        debug!("directory: GET {}", url);
        let response = self
            .client
            .get(url)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Network(format!("HTTP {}", status)));
        }

        // Decode entry by entry so one odd record cannot sink the whole list.
        let entries: Vec<Value> = response.json().await?;
        let total = entries.len();
        let raw = entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<RawStation>(entry) {
                Ok(raw) => Some(raw),
                Err(e) => {
                    debug!("directory: skipping malformed entry: {}", e);
                    None
                }
            });
        let stations = normalize_stations(raw);
        debug!("directory: kept {} of {} entries", stations.len(), total);

        if stations.is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(stations)
    }
}

#[async_trait]
impl StationDirectory for DirectoryClient {
    async fn list_top_stations(&self, limit: usize) -> Result<Vec<StationRecord>, FetchError> {
        self.fetch(&self.top_stations_url(limit)).await
    }

    async fn search_by_name(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StationRecord>, FetchError> {
        self.fetch(&self.search_url(query, limit)).await
    }
}
