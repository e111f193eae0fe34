//! Caller metadata: coercion, registration bodies, reconciliation patches
//!
//! Everything here is pure. Coercion runs before the first network call so a
//! bad value never leaves a half-created record behind.

use crate::artifact::ArtifactDigests;
use crate::catalog::record::{CatalogImageRecord, RESERVED_MD5, RESERVED_OBJECT, RESERVED_SHA256};
use crate::core::error::{PublishError, Result};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Fields the catalog schema stores as integers
const INTEGER_FIELDS: &[&str] = &["min_disk", "min_ram"];

/// Metadata as the caller supplied it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageMetadata {
    pub is_public: bool,
    /// Integer, possibly given as text
    pub min_disk: Option<String>,
    /// Integer, possibly given as text
    pub min_ram: Option<String>,
    pub protected: Option<bool>,
    /// Free-form properties; the catalog stores them as strings
    pub properties: BTreeMap<String, Value>,
    /// Free-form properties sent with their JSON type
    pub meta: BTreeMap<String, Value>,
}

/// Validated metadata, ready to go on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttributes {
    pub visibility: &'static str,
    pub min_disk: Option<u64>,
    pub min_ram: Option<u64>,
    pub protected: Option<bool>,
    pub properties: BTreeMap<String, String>,
    pub meta: BTreeMap<String, Value>,
}

impl ImageAttributes {
    /// Validate and coerce caller metadata.
    ///
    /// # Examples
    ///
    /// ```
    /// use image_publisher::orchestration::properties::{ImageAttributes, ImageMetadata};
    ///
    /// let metadata = ImageMetadata {
    ///     min_disk: Some("0".to_string()),
    ///     ..Default::default()
    /// };
    /// assert_eq!(ImageAttributes::from_metadata(&metadata).unwrap().min_disk, Some(0));
    ///
    /// let metadata = ImageMetadata {
    ///     min_disk: Some("fish".to_string()),
    ///     ..Default::default()
    /// };
    /// assert!(ImageAttributes::from_metadata(&metadata).is_err());
    /// ```
    pub fn from_metadata(metadata: &ImageMetadata) -> Result<Self> {
        let mut min_disk = metadata
            .min_disk
            .as_deref()
            .map(|value| parse_integer("min_disk", value))
            .transpose()?;
        let mut min_ram = metadata
            .min_ram
            .as_deref()
            .map(|value| parse_integer("min_ram", value))
            .transpose()?;
        let mut protected = metadata.protected;
        let mut properties = BTreeMap::new();

        for (key, value) in &metadata.properties {
            reject_reserved(key)?;
            let text = render(value);
            match key.as_str() {
                "min_disk" if min_disk.is_none() => min_disk = Some(parse_integer(key, &text)?),
                "min_ram" if min_ram.is_none() => min_ram = Some(parse_integer(key, &text)?),
                "protected" if protected.is_none() => protected = Some(parse_bool(key, &text)?),
                _ => {
                    properties.insert(key.clone(), text);
                }
            }
        }

        let mut meta = BTreeMap::new();
        for (key, value) in &metadata.meta {
            reject_reserved(key)?;
            let value = if INTEGER_FIELDS.contains(&key.as_str()) {
                match value {
                    Value::String(text) => Value::from(parse_integer(key, text)?),
                    number if number.is_u64() => number.clone(),
                    _ => {
                        return Err(PublishError::validation(
                            key,
                            "must be a non-negative integer",
                        ));
                    }
                }
            } else {
                value.clone()
            };
            meta.insert(key.clone(), value);
        }

        Ok(Self {
            visibility: if metadata.is_public { "public" } else { "private" },
            min_disk,
            min_ram,
            protected,
            properties,
            meta,
        })
    }

    /// Every attribute the finished record should carry, keyed by wire name
    pub fn desired(&self, reserved: &BTreeMap<String, String>) -> BTreeMap<String, Value> {
        let mut desired: BTreeMap<String, Value> = reserved
            .iter()
            .map(|(key, value)| (key.clone(), Value::from(value.clone())))
            .collect();

        desired.insert("visibility".to_string(), Value::from(self.visibility));
        if let Some(min_disk) = self.min_disk {
            desired.insert("min_disk".to_string(), Value::from(min_disk));
        }
        if let Some(min_ram) = self.min_ram {
            desired.insert("min_ram".to_string(), Value::from(min_ram));
        }
        if let Some(protected) = self.protected {
            desired.insert("protected".to_string(), Value::from(protected));
        }
        for (key, value) in &self.properties {
            desired.insert(key.clone(), Value::from(value.clone()));
        }
        for (key, value) in &self.meta {
            desired.insert(key.clone(), value.clone());
        }
        desired
    }
}

/// The three reserved idempotence properties
pub fn reserved_properties(digests: &ArtifactDigests, locator: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (RESERVED_MD5.to_string(), digests.md5.clone()),
        (RESERVED_SHA256.to_string(), digests.sha256.clone()),
        (RESERVED_OBJECT.to_string(), locator.to_string()),
    ])
}

/// Image formats for registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFormats {
    pub disk_format: String,
    pub container_format: String,
}

/// v2 registration body: everything at the top level
pub fn v2_create_body(
    name: &str,
    formats: &ImageFormats,
    reserved: &BTreeMap<String, String>,
    attributes: &ImageAttributes,
) -> Value {
    let mut body = Map::new();
    body.insert("name".to_string(), json!(name));
    body.insert("disk_format".to_string(), json!(formats.disk_format));
    body.insert("container_format".to_string(), json!(formats.container_format));
    for (key, value) in attributes.desired(reserved) {
        body.insert(key, value);
    }
    Value::Object(body)
}

/// v1 registration body: custom properties and `is_public` nested under
/// `properties`, since v1 has no patch call to add them later
pub fn v1_create_body(
    name: &str,
    formats: &ImageFormats,
    reserved: &BTreeMap<String, String>,
    attributes: &ImageAttributes,
) -> Value {
    let mut properties = Map::new();
    for (key, value) in reserved {
        properties.insert(key.clone(), json!(value));
    }
    for (key, value) in &attributes.properties {
        properties.insert(key.clone(), json!(value));
    }
    for (key, value) in &attributes.meta {
        properties.insert(key.clone(), value.clone());
    }
    properties.insert(
        "is_public".to_string(),
        json!(attributes.visibility == "public"),
    );

    let mut body = Map::new();
    body.insert("name".to_string(), json!(name));
    body.insert("container_format".to_string(), json!(formats.container_format));
    body.insert("disk_format".to_string(), json!(formats.disk_format));
    if let Some(min_disk) = attributes.min_disk {
        body.insert("min_disk".to_string(), json!(min_disk));
    }
    if let Some(min_ram) = attributes.min_ram {
        body.insert("min_ram".to_string(), json!(min_ram));
    }
    if let Some(protected) = attributes.protected {
        body.insert("protected".to_string(), json!(protected));
    }
    body.insert("properties".to_string(), Value::Object(properties));
    Value::Object(body)
}

/// JSON-patch operations that bring `record` up to `desired`.
///
/// Absent attributes are added, differing ones replaced, equal ones left
/// alone. Reserved properties are only ever added: a record that already
/// carries different ones belongs to another artifact. Operations are
/// ordered by path.
pub fn build_patch(record: &CatalogImageRecord, desired: &BTreeMap<String, Value>) -> Vec<Value> {
    desired
        .iter()
        .filter_map(|(key, value)| {
            let op = match record.attribute(key) {
                None => "add",
                Some(current) if &current == value => return None,
                Some(_) if is_reserved(key) => {
                    tracing::warn!(
                        id = record.id.as_deref(),
                        property = %key,
                        "record carries a different reserved property, leaving it alone"
                    );
                    return None;
                }
                Some(_) => "replace",
            };
            Some(json!({
                "op": op,
                "path": format!("/{}", escape_pointer(key)),
                "value": value,
            }))
        })
        .collect()
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn parse_integer(field: &str, value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        PublishError::validation(field, format!("'{}' is not a non-negative integer", value))
    })
}

fn parse_bool(field: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(PublishError::validation(
            field,
            format!("'{}' is not a boolean", value),
        )),
    }
}

fn is_reserved(key: &str) -> bool {
    [RESERVED_MD5, RESERVED_SHA256, RESERVED_OBJECT].contains(&key)
}

fn reject_reserved(key: &str) -> Result<()> {
    if is_reserved(key) {
        return Err(PublishError::validation(
            key,
            "reserved for publication bookkeeping",
        ));
    }
    Ok(())
}

/// Text form of a property value; strings are taken verbatim
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
