use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::AssetResponse;
use crate::error::AssetError;

/// Where the worker goes when the cache is not enough.
#[async_trait]
pub trait AssetNetwork: Send + Sync {
    async fn get(&self, url: &Url) -> Result<AssetResponse, AssetError>;
}

/// No client-wide timeout: only navigation is bounded, by the worker.
pub struct HttpNetwork {
    client: reqwest::Client,
}

impl HttpNetwork {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .build()
            .context("building asset http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetNetwork for HttpNetwork {
    async fn get(&self, url: &Url) -> Result<AssetResponse, AssetError> {
        debug!(%url, "asset network fetch");
        let fetch_error = |err: reqwest::Error| AssetError::Fetch {
            url: url.to_string(),
            message: err.to_string(),
        };
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(fetch_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(fetch_error)?;
        Ok(AssetResponse {
            status,
            headers,
            body,
        })
    }
}
