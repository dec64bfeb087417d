use thiserror::Error;

/// A requested mutation was rejected; the store is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("category name cannot be empty")]
    EmptyCategoryName,
    #[error("category '{0}' already exists")]
    DuplicateCategory(String),
    #[error("category '{0}' cannot be deleted")]
    ReservedCategory(String),
    #[error("category '{0}' not found")]
    UnknownCategory(String),
    #[error("category '{0}' has no message list")]
    VirtualCategory(String),
    #[error("message id '{0}' already exists")]
    DuplicateMessageId(String),
    #[error("'{0}' is not a valid URL")]
    MalformedUrl(String),
    #[error("message cannot be empty")]
    EmptyMessage,
}

/// Failure talking to a preview provider.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("{provider} returned HTTP {status}")]
    Status { provider: &'static str, status: u16 },
    #[error("{provider} request failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} returned an unreadable body: {message}")]
    Parse {
        provider: &'static str,
        message: String,
    },
    #[error("no preview provider could resolve {0}")]
    Exhausted(String),
}

/// Failure reading or writing a persisted document.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

/// Failure inside the offline asset cache worker.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("fetching {url} failed: {message}")]
    Fetch { url: String, message: String },
    #[error("fetching {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("navigation fetch timed out after {0} ms")]
    Timeout(u64),
    #[error("no cached or network response for {0}")]
    NoResponse(String),
    #[error("invalid asset URL {0}")]
    InvalidUrl(String),
    #[error("cache bucket {0} is not installed")]
    NotInstalled(String),
    #[error("asset cache storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error("asset worker is not running")]
    WorkerGone,
}

impl From<rusqlite::Error> for AssetError {
    fn from(err: rusqlite::Error) -> Self {
        AssetError::Storage(StorageError::Database(err))
    }
}
