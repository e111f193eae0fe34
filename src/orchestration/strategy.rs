//! Upload strategy selection

use crate::core::config::ApiVersion;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the artifact reaches the catalog. Chosen once per publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadStrategy {
    /// Register, then PUT the bytes onto the record (catalog v1)
    V1DirectPut,
    /// Register, then PUT the bytes onto the file sub-resource (catalog v2)
    V2DirectPut,
    /// Stage in the object store, then let an import task pull it in
    V2TaskImport,
}

impl UploadStrategy {
    /// Decision table over the negotiated version and the import preference.
    /// v1 has no tasks, so the preference is ignored there.
    pub fn select(version: ApiVersion, use_tasks: bool) -> Self {
        match (version, use_tasks) {
            (ApiVersion::V1, _) => Self::V1DirectPut,
            (ApiVersion::V2, false) => Self::V2DirectPut,
            (ApiVersion::V2, true) => Self::V2TaskImport,
        }
    }

    pub fn requires_staging(self) -> bool {
        self == Self::V2TaskImport
    }

    /// Whether metadata can be patched after registration
    pub fn supports_patch(self) -> bool {
        self != Self::V1DirectPut
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1DirectPut => "v1-direct-put",
            Self::V2DirectPut => "v2-direct-put",
            Self::V2TaskImport => "v2-task-import",
        }
    }
}

impl fmt::Display for UploadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
