//! Advertised object-store size limits, fetched once and shared

use crate::core::error::Result;
use crate::object_store::client::ObjectStoreClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;

/// 5 GiB, the usual single-object ceiling
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024 * 1024;
/// 1 MiB
pub const DEFAULT_MIN_SEGMENT_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreLimits {
    /// Largest single object the store accepts
    pub max_file_size: u64,
    /// Objects smaller than this are never segmented
    pub min_segment_size: u64,
    /// Static large objects are available; otherwise dynamic manifests are used
    pub static_large_objects: bool,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            min_segment_size: DEFAULT_MIN_SEGMENT_SIZE,
            static_large_objects: true,
        }
    }
}

impl StoreLimits {
    /// Read limits out of an `/info` document; missing values take defaults
    pub fn from_info(info: &Value) -> Self {
        let slo = info.get("slo");
        Self {
            max_file_size: info
                .pointer("/swift/max_file_size")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_MAX_FILE_SIZE),
            min_segment_size: slo
                .and_then(|slo| slo.get("min_segment_size"))
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_MIN_SEGMENT_SIZE),
            static_large_objects: slo.is_some(),
        }
    }
}

/// Single-assignment cache for [`StoreLimits`]
///
/// Concurrent callers share one fetch; later callers never hit the network.
#[derive(Debug, Default)]
pub struct StoreLimitsCache {
    cell: OnceCell<StoreLimits>,
}

impl StoreLimitsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<StoreLimits> {
        self.cell.get().copied()
    }

    pub async fn get_or_fetch(&self, client: &ObjectStoreClient) -> Result<StoreLimits> {
        let limits = self
            .cell
            .get_or_try_init(|| async {
                let limits = match client.info().await? {
                    Some(info) => StoreLimits::from_info(&info),
                    None => StoreLimits::default(),
                };
                tracing::debug!(
                    max_file_size = limits.max_file_size,
                    min_segment_size = limits.min_segment_size,
                    slo = limits.static_large_objects,
                    "object store limits"
                );
                Ok::<_, crate::core::error::PublishError>(limits)
            })
            .await?;
        Ok(*limits)
    }
}
