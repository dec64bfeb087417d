use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::{PreviewOptions, ProviderKind, ProviderSpec};
use crate::error::NetworkError;

/// Page metadata as a provider reported it. Every field is optional; the
/// resolver fills the gaps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetadata {
    /// The page URL after redirects, when the provider reports one.
    pub resolved_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
}

/// One metadata-extraction service in the fallback chain.
#[async_trait]
pub trait PreviewProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(&self, url: &str) -> Result<PageMetadata, NetworkError>;
}

pub fn from_config(options: &PreviewOptions) -> anyhow::Result<Vec<Box<dyn PreviewProvider>>> {
    use anyhow::Context;

    let client = reqwest::Client::builder()
        .timeout(options.request_timeout())
        .user_agent(options.user_agent.clone())
        .build()
        .context("building preview http client")?;
    Ok(options
        .providers
        .iter()
        .map(|spec| build(spec, client.clone()))
        .collect())
}

fn build(spec: &ProviderSpec, client: reqwest::Client) -> Box<dyn PreviewProvider> {
    match spec.kind {
        ProviderKind::Jsonlink => Box::new(JsonLinkProvider {
            client,
            endpoint: spec.endpoint.clone(),
        }),
        ProviderKind::Microlink => Box::new(MicrolinkProvider {
            client,
            endpoint: spec.endpoint.clone(),
        }),
    }
}

async fn get_json_body(
    provider: &'static str,
    client: &reqwest::Client,
    endpoint: &str,
    url: &str,
) -> Result<String, NetworkError> {
    debug!(provider, url, "requesting preview metadata");
    let response = client
        .get(endpoint)
        .query(&[("url", url)])
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|source| NetworkError::Transport { provider, source })?;
    let status = response.status();
    if !status.is_success() {
        return Err(NetworkError::Status {
            provider,
            status: status.as_u16(),
        });
    }
    response
        .text()
        .await
        .map_err(|source| NetworkError::Transport { provider, source })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Reads `{ title, description, url, images: [..], image, icon }` from a
/// jsonlink-style endpoint.
pub struct JsonLinkProvider {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct JsonLinkBody {
    url: Option<String>,
    title: Option<String>,
    description: Option<String>,
    #[serde(default)]
    images: Vec<String>,
    image: Option<String>,
    icon: Option<String>,
}

const JSONLINK: &str = "jsonlink";

pub fn parse_jsonlink(body: &str) -> Result<PageMetadata, NetworkError> {
    let parsed: JsonLinkBody = serde_json::from_str(body).map_err(|err| NetworkError::Parse {
        provider: JSONLINK,
        message: err.to_string(),
    })?;
    let image = parsed
        .images
        .into_iter()
        .find(|img| !img.trim().is_empty())
        .or_else(|| non_empty(parsed.image))
        .or_else(|| non_empty(parsed.icon));
    Ok(PageMetadata {
        resolved_url: non_empty(parsed.url),
        title: non_empty(parsed.title),
        description: non_empty(parsed.description),
        image,
    })
}

#[async_trait]
impl PreviewProvider for JsonLinkProvider {
    fn name(&self) -> &'static str {
        JSONLINK
    }

    async fn extract(&self, url: &str) -> Result<PageMetadata, NetworkError> {
        let body = get_json_body(JSONLINK, &self.client, &self.endpoint, url).await?;
        parse_jsonlink(&body)
    }
}

/// Reads `{ data: { title, description, url, image, logo } }` from a
/// microlink-style endpoint. `image` may be a string or `{ url }`.
pub struct MicrolinkProvider {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct MicrolinkEnvelope {
    status: Option<String>,
    data: Option<MicrolinkData>,
}

#[derive(Debug, Deserialize)]
struct MicrolinkData {
    url: Option<String>,
    title: Option<String>,
    description: Option<String>,
    image: Option<MicrolinkAsset>,
    logo: Option<MicrolinkAsset>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MicrolinkAsset {
    Url(String),
    Object { url: Option<String> },
}

impl MicrolinkAsset {
    fn into_url(self) -> Option<String> {
        match self {
            MicrolinkAsset::Url(url) => non_empty(Some(url)),
            MicrolinkAsset::Object { url } => non_empty(url),
        }
    }
}

const MICROLINK: &str = "microlink";

pub fn parse_microlink(body: &str) -> Result<PageMetadata, NetworkError> {
    let parsed: MicrolinkEnvelope =
        serde_json::from_str(body).map_err(|err| NetworkError::Parse {
            provider: MICROLINK,
            message: err.to_string(),
        })?;
    if parsed.status.as_deref().is_some_and(|s| s != "success") {
        return Err(NetworkError::Parse {
            provider: MICROLINK,
            message: format!("status {}", parsed.status.unwrap_or_default()),
        });
    }
    let data = parsed.data.ok_or_else(|| NetworkError::Parse {
        provider: MICROLINK,
        message: "missing data".into(),
    })?;
    let image = data
        .image
        .and_then(MicrolinkAsset::into_url)
        .or_else(|| data.logo.and_then(MicrolinkAsset::into_url));
    Ok(PageMetadata {
        resolved_url: non_empty(data.url),
        title: non_empty(data.title),
        description: non_empty(data.description),
        image,
    })
}

#[async_trait]
impl PreviewProvider for MicrolinkProvider {
    fn name(&self) -> &'static str {
        MICROLINK
    }

    async fn extract(&self, url: &str) -> Result<PageMetadata, NetworkError> {
        let body = get_json_body(MICROLINK, &self.client, &self.endpoint, url).await?;
        parse_microlink(&body)
    }
}
