//! Offline cache for the application shell.
//!
//! The worker runs as its own task and is reached only through
//! [`AssetHandle`]; it owns a separate database and knows nothing about
//! messages or previews.

use bytes::Bytes;
use url::Url;

pub mod bucket;
pub mod network;
pub mod worker;

pub use bucket::CacheStorage;
pub use network::{AssetNetwork, HttpNetwork};
pub use worker::{spawn, AssetHandle, AssetWorker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    Cors,
    NoCors,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    pub method: String,
    pub url: Url,
    pub mode: RequestMode,
}

impl AssetRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: "GET".into(),
            url,
            mode: RequestMode::SameOrigin,
        }
    }

    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl AssetResponse {
    pub fn ok(content_type: &str, body: Bytes) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type".into(), content_type.into())],
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
}

/// What the worker decided for one intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Respond {
        response: AssetResponse,
        source: ResponseSource,
    },
    /// Not intercepted; the caller talks to the network itself.
    Passthrough,
    /// Nothing cached and the network failed.
    NetworkError,
}

/// Cache key for a URL: the URL without its fragment.
pub(crate) fn cache_key(url: &Url) -> String {
    let mut key = url.clone();
    key.set_fragment(None);
    key.into()
}
