//! Canonical image record
//!
//! Both catalog generations are mapped onto [`CatalogImageRecord`]. The
//! mapping keeps every field it does not understand in the property map, so
//! nothing a deployment returns is lost.

use crate::artifact::ArtifactDigests;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Reserved property holding the artifact MD5
pub const RESERVED_MD5: &str = "owner_specified.shade.md5";
/// Reserved property holding the artifact SHA-256
pub const RESERVED_SHA256: &str = "owner_specified.shade.sha256";
/// Reserved property holding `<container>/<object>` of the source artifact
pub const RESERVED_OBJECT: &str = "owner_specified.shade.object";

/// Lifecycle status of a catalog record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ImageStatus {
    Queued,
    Saving,
    Active,
    Killed,
    Deleted,
    PendingDelete,
    /// Anything a deployment reports that has no equivalent above
    Other(String),
}

impl ImageStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => Self::Queued,
            "saving" | "importing" | "uploading" => Self::Saving,
            "active" => Self::Active,
            "killed" | "error" => Self::Killed,
            "deleted" => Self::Deleted,
            "pending_delete" => Self::PendingDelete,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::Saving => "saving",
            Self::Active => "active",
            Self::Killed => "killed",
            Self::Deleted => "deleted",
            Self::PendingDelete => "pending_delete",
            Self::Other(other) => other,
        }
    }

    /// The record will never become active
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Killed | Self::Deleted | Self::PendingDelete)
    }
}

impl From<String> for ImageStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<ImageStatus> for String {
    fn from(status: ImageStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical catalog image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogImageRecord {
    pub id: Option<String>,
    pub name: String,
    pub status: ImageStatus,
    pub container_format: Option<String>,
    pub disk_format: Option<String>,
    pub size: Option<u64>,
    pub visibility: String,
    pub protected: bool,
    pub min_disk: u64,
    pub min_ram: u64,
    pub checksum: Option<String>,
    pub tags: BTreeSet<String>,
    /// Custom and deployment-specific fields, including the reserved ones
    pub properties: BTreeMap<String, Value>,
}

/// Keys mapped onto dedicated fields; everything else is a property
const KNOWN_KEYS: &[&str] = &[
    "id",
    "name",
    "status",
    "container_format",
    "disk_format",
    "size",
    "visibility",
    "is_public",
    "protected",
    "min_disk",
    "min_ram",
    "checksum",
    "tags",
    "properties",
];

impl CatalogImageRecord {
    /// Map a raw v1 or v2 catalog payload onto the canonical record.
    ///
    /// v1 nests custom properties under `properties` and states visibility as
    /// `is_public`; v2 has them at the top level. Pure and deterministic.
    pub fn normalize(raw: &Map<String, Value>) -> Self {
        let mut properties = BTreeMap::new();

        // v1 nests custom properties; they are flattened first so that a
        // top-level field of the same name wins.
        if let Some(Value::Object(nested)) = raw.get("properties") {
            for (key, value) in nested {
                properties.insert(key.clone(), value.clone());
            }
        }
        for (key, value) in raw {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                properties.insert(key.clone(), value.clone());
            }
        }

        let visibility = match raw.get("visibility").and_then(Value::as_str) {
            Some(visibility) => visibility.to_string(),
            None => {
                let is_public = raw
                    .get("is_public")
                    .or_else(|| properties.get("is_public"))
                    .map(truthy)
                    .unwrap_or(false);
                let visibility = if is_public { "public" } else { "private" };
                visibility.to_string()
            }
        };
        // is_public only expresses visibility; keep it out of the properties
        properties.remove("is_public");

        let tags = match raw.get("tags") {
            Some(Value::Array(tags)) => tags
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => BTreeSet::new(),
        };

        Self {
            id: raw.get("id").and_then(scalar_string),
            name: raw
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            status: raw
                .get("status")
                .and_then(Value::as_str)
                .map(ImageStatus::parse)
                .unwrap_or(ImageStatus::Queued),
            container_format: raw
                .get("container_format")
                .and_then(Value::as_str)
                .map(str::to_string),
            disk_format: raw
                .get("disk_format")
                .and_then(Value::as_str)
                .map(str::to_string),
            size: raw.get("size").and_then(integer),
            visibility,
            protected: raw.get("protected").map(truthy).unwrap_or(false),
            min_disk: raw.get("min_disk").and_then(integer).unwrap_or(0),
            min_ram: raw.get("min_ram").and_then(integer).unwrap_or(0),
            checksum: raw
                .get("checksum")
                .and_then(Value::as_str)
                .map(str::to_string),
            tags,
            properties,
        }
    }

    /// String value of a property
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Current value of `key`, whether it is a dedicated field or a property
    pub fn attribute(&self, key: &str) -> Option<Value> {
        match key {
            "name" => Some(Value::from(self.name.clone())),
            "visibility" => Some(Value::from(self.visibility.clone())),
            "protected" => Some(Value::from(self.protected)),
            "min_disk" => Some(Value::from(self.min_disk)),
            "min_ram" => Some(Value::from(self.min_ram)),
            "container_format" => self.container_format.clone().map(Value::from),
            "disk_format" => self.disk_format.clone().map(Value::from),
            _ => self.properties.get(key).cloned(),
        }
    }

    /// Digests recorded in the reserved properties, if both are present
    pub fn reserved_digests(&self) -> Option<ArtifactDigests> {
        Some(ArtifactDigests {
            md5: self.property(RESERVED_MD5)?.to_ascii_lowercase(),
            sha256: self.property(RESERVED_SHA256)?.to_ascii_lowercase(),
        })
    }

    /// Whether this record was created from an artifact with these digests
    pub fn matches_artifact(&self, digests: &ArtifactDigests) -> bool {
        self.reserved_digests().as_ref() == Some(digests)
    }

    pub fn source_locator(&self) -> Option<&str> {
        self.property(RESERVED_OBJECT)
    }

    pub fn is_active(&self) -> bool {
        self.status == ImageStatus::Active
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn integer(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        Value::Number(n) => n.as_u64().is_some_and(|n| n != 0),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn v2_payload() -> Map<String, Value> {
        object(json!({
            "image_state": "available",
            "container_format": "bare",
            "min_ram": 0,
            "ramdisk_id": null,
            "file": "/v2/images/a9b1/file",
            "size": 3402170368u64,
            "disk_format": "qcow2",
            "id": "a9b1",
            "schema": "/v2/schemas/image",
            "status": "active",
            "tags": [],
            "visibility": "private",
            "min_disk": 40,
            "name": "fake_image",
            "checksum": "ee36e35a297980dee1b514de9803ec6d",
            "owner_specified.shade.md5": "93b885adfe0da089cdf634904fd59f71",
            "owner_specified.shade.sha256": "6e340b9cffb37a989ca544e6bb780a2c78901d3fb33738768511a30617afa01d",
            "owner_specified.shade.object": "images/fake_image",
            "protected": false
        }))
    }

    #[test]
    fn test_normalize_v2() {
        let record = CatalogImageRecord::normalize(&v2_payload());

        assert_eq!(record.id.as_deref(), Some("a9b1"));
        assert_eq!(record.name, "fake_image");
        assert_eq!(record.status, ImageStatus::Active);
        assert_eq!(record.size, Some(3402170368));
        assert_eq!(record.min_disk, 40);
        assert_eq!(record.visibility, "private");
        assert!(!record.protected);
        assert_eq!(record.source_locator(), Some("images/fake_image"));
        // unknown fields are preserved
        assert_eq!(record.properties["image_state"], "available");
        assert_eq!(record.properties["ramdisk_id"], Value::Null);
    }

    #[test]
    fn test_normalize_v1_flattens_properties() {
        let raw = object(json!({
            "id": "42",
            "name": "42 name",
            "status": "active",
            "is_public": true,
            "deleted": false,
            "properties": {
                "owner_specified.shade.md5": "abc",
                "owner_specified.shade.sha256": "def",
                "owner_specified.shade.object": "images/42 name"
            }
        }));

        let record = CatalogImageRecord::normalize(&raw);

        assert_eq!(record.visibility, "public");
        assert_eq!(record.property(RESERVED_MD5), Some("abc"));
        assert_eq!(record.properties["deleted"], false);
        assert!(!record.properties.contains_key("is_public"));
        assert!(!record.properties.contains_key("properties"));
    }

    #[test]
    fn test_normalize_v1_nested_is_public() {
        let raw = object(json!({
            "id": "42",
            "name": "n",
            "properties": {"is_public": false}
        }));

        let record = CatalogImageRecord::normalize(&raw);
        assert_eq!(record.visibility, "private");
        assert_eq!(record.status, ImageStatus::Queued);
    }

    #[test]
    fn test_normalize_is_stable() {
        let raw = v2_payload();
        let first = CatalogImageRecord::normalize(&raw);
        let second = CatalogImageRecord::normalize(&raw);

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_matches_artifact() {
        let record = CatalogImageRecord::normalize(&v2_payload());
        let digests = ArtifactDigests {
            md5: "93b885adfe0da089cdf634904fd59f71".to_string(),
            sha256: "6e340b9cffb37a989ca544e6bb780a2c78901d3fb33738768511a30617afa01d"
                .to_string(),
        };

        assert!(record.matches_artifact(&digests));

        let other = ArtifactDigests {
            md5: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            ..digests
        };
        assert!(!record.matches_artifact(&other));
    }

    #[test]
    fn test_record_without_reserved_properties() {
        let mut raw = v2_payload();
        raw.remove(RESERVED_MD5);

        let record = CatalogImageRecord::normalize(&raw);
        assert!(record.reserved_digests().is_none());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(ImageStatus::parse("ACTIVE"), ImageStatus::Active);
        assert!(ImageStatus::parse("killed").is_failed());
        assert_eq!(
            ImageStatus::parse("deactivated"),
            ImageStatus::Other("deactivated".to_string())
        );
    }

    #[test]
    fn test_attribute() {
        let record = CatalogImageRecord::normalize(&v2_payload());

        assert_eq!(record.attribute("min_disk"), Some(json!(40)));
        assert_eq!(record.attribute("visibility"), Some(json!("private")));
        assert_eq!(record.attribute("schema"), Some(json!("/v2/schemas/image")));
        assert_eq!(record.attribute("missing"), None);
    }
}
