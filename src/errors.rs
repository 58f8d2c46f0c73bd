use std::time::Duration;
use thiserror::Error;

/// Errors raised while fetching raw content from a source.
///
/// `Network` and `RateLimited` are retryable, `Malformed` is not.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited by source (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Malformed(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// 解析错误：页面结构缺失或内容无法识别
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Expected structure not found: {0}")]
    MissingStructure(String),

    #[error("JSON parsing error: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Source reported an error: {0}")]
    Upstream(String),
}

/// A symbol's history is too short for a metric window.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Insufficient data for {metric} on {symbol}: need {required} observations, have {available}")]
pub struct InsufficientDataError {
    pub symbol: String,
    pub metric: String,
    pub required: usize,
    pub available: usize,
}

/// 通知发送错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Platform error: {0}")]
    Platform(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Corrupt data: {0}")]
    Corrupt(String),
}

impl From<arrow_schema::ArrowError> for StorageError {
    fn from(e: arrow_schema::ArrowError) -> Self {
        StorageError::Arrow(e.to_string())
    }
}

/// Run-level failures. Each one is fatal to the current run only.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("All sources unreachable ({failures} fetch failures)")]
    AllSourcesUnreachable { failures: usize },

    #[error("Cleaning produced an empty dataset")]
    EmptyDataset,

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Analysis invariant violated: {0}")]
    Invariant(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

// 用于从字符串创建错误
impl From<String> for PipelineError {
    fn from(s: String) -> Self {
        PipelineError::Unknown(s)
    }
}

// 用于从&str创建错误
impl From<&str> for PipelineError {
    fn from(s: &str) -> Self {
        PipelineError::Unknown(s.to_string())
    }
}
