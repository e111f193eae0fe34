//! Configuration structures and types for image-publisher
//!
//! This module provides type-safe configuration management with serde support.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Catalog API generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawApiVersion", into = "String")]
pub enum ApiVersion {
    V1,
    V2,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawApiVersion {
    Number(u64),
    Text(String),
}

impl ApiVersion {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().trim_start_matches(['v', 'V']) {
            "1" | "1.0" => Some(Self::V1),
            "2" | "2.0" => Some(Self::V2),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "1",
            Self::V2 => "2",
        }
    }
}

impl TryFrom<RawApiVersion> for ApiVersion {
    type Error = String;

    fn try_from(raw: RawApiVersion) -> Result<Self, Self::Error> {
        let text = match raw {
            RawApiVersion::Number(n) => n.to_string(),
            RawApiVersion::Text(s) => s,
        };
        Self::parse(&text).ok_or_else(|| format!("unsupported image API version '{}'", text))
    }
}

impl From<ApiVersion> for String {
    fn from(version: ApiVersion) -> Self {
        version.as_str().to_string()
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_str())
    }
}

/// Root configuration object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublisherConfig {
    /// Schema version (required)
    pub version: String,

    /// Extend from base configuration file (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    /// Image catalog settings
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Staging object store (required only for task imports)
    #[serde(skip_serializing_if = "Option::is_none", rename = "objectStore")]
    pub object_store: Option<ObjectStoreConfig>,

    /// Publish defaults
    #[serde(default)]
    pub publish: PublishDefaults,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,
}

/// Image catalog settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogConfig {
    /// Versioned catalog endpoint, e.g. https://image.example.com/v2
    #[serde(default)]
    pub endpoint: String,

    /// Negotiated image API version (default: 2)
    #[serde(rename = "imageApiVersion", default = "default_api_version")]
    pub image_api_version: ApiVersion,

    /// Import through asynchronous tasks instead of direct PUT (v2 only)
    #[serde(rename = "useTasks", default)]
    pub use_tasks: bool,
}

fn default_api_version() -> ApiVersion {
    ApiVersion::V2
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            image_api_version: default_api_version(),
            use_tasks: false,
        }
    }
}

/// Object store settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectStoreConfig {
    /// Account endpoint, e.g. https://object-store.example.com/v1/AUTH_x
    pub endpoint: String,

    /// Discovery endpoint serving /info (default: scheme and host of `endpoint`)
    #[serde(skip_serializing_if = "Option::is_none", rename = "infoEndpoint")]
    pub info_endpoint: Option<String>,

    /// Preferred segment size in bytes, capped by the store's limit
    #[serde(skip_serializing_if = "Option::is_none", rename = "segmentSize")]
    pub segment_size: Option<u64>,
}

/// Publish defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishDefaults {
    /// Staging container for task imports (default: "images")
    #[serde(default = "default_container")]
    pub container: String,

    #[serde(rename = "diskFormat", default = "default_disk_format")]
    pub disk_format: String,

    #[serde(rename = "containerFormat", default = "default_container_format")]
    pub container_format: String,

    /// Wait for the image to become active (default: true)
    #[serde(default = "default_true")]
    pub wait: bool,

    /// Overall publication budget in seconds (default: 3600)
    #[serde(rename = "timeoutSecs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Delay between status polls in seconds (default: 2)
    #[serde(rename = "pollIntervalSecs", default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_container() -> String {
    "images".to_string()
}

fn default_disk_format() -> String {
    "qcow2".to_string()
}

fn default_container_format() -> String {
    "bare".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_poll_interval_secs() -> u64 {
    2
}

impl Default for PublishDefaults {
    fn default() -> Self {
        Self {
            container: default_container(),
            disk_format: default_disk_format(),
            container_format: default_container_format(),
            wait: true,
            timeout_secs: default_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl PublishDefaults {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    /// Per-request timeout in seconds; 0 disables it (default: 0, uploads can be long)
    #[serde(rename = "requestTimeoutSecs", default)]
    pub request_timeout_secs: u64,

    /// Connect timeout in seconds (default: 30)
    #[serde(rename = "connectTimeoutSecs", default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 0,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            extends: None,
            catalog: CatalogConfig::default(),
            object_store: None,
            publish: PublishDefaults::default(),
            http: HttpConfig::default(),
        }
    }
}
