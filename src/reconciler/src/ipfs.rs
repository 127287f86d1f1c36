//! Content-addressed fetch client and descriptor resolver.
//!
//! Event descriptions live on IPFS. [`IpfsGateway`] reads them over an HTTP
//! gateway; [`ContentResolver`] turns the raw bytes into a JSON object without
//! caching anything. Persisting the result is the caller's job.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ContentError, FetchError};
use crate::Config;

/// Client for a content-addressed store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetch the raw bytes stored under `hash`.
    async fn get(&self, hash: &str) -> Result<Vec<u8>, FetchError>;
}

/// IPFS HTTP gateway client.
pub struct IpfsGateway {
    client: Client,
    base_url: String,
}

impl IpfsGateway {
    /// Create a gateway client from configuration.
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.ipfs_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.ipfs_gateway_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ContentFetcher for IpfsGateway {
    async fn get(&self, hash: &str) -> Result<Vec<u8>, FetchError> {
        let url = format!("{}/ipfs/{}", self.base_url, hash);
        debug!("Fetching IPFS object {}", url);

        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(FetchError::NotFound(hash.to_string())),
            status if !status.is_success() => Err(FetchError::Network(format!(
                "gateway returned status: {}",
                status
            ))),
            _ => Ok(response.bytes().await?.to_vec()),
        }
    }
}

/// Fetches descriptor JSON by content hash.
pub struct ContentResolver<F> {
    fetcher: F,
}

impl<F: ContentFetcher> ContentResolver<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    /// Fetch and parse the JSON object stored under `hash`.
    pub async fn resolve(&self, hash: &str) -> Result<Map<String, Value>, ContentError> {
        let bytes = self
            .fetcher
            .get(hash)
            .await
            .map_err(|source| ContentError::Unavailable {
                hash: hash.to_string(),
                source,
            })?;

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(ContentError::Malformed {
                hash: hash.to_string(),
                reason: format!("expected object, got {}", json_type(&other)),
            }),
            Err(e) => Err(ContentError::Malformed {
                hash: hash.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
