//! Catalog wire calls for both API generations

use crate::catalog::record::CatalogImageRecord;
use crate::catalog::tasks::UploadTask;
use crate::core::config::ApiVersion;
use crate::core::error::{PublishError, Result};
use crate::transport::{
    HttpRequest, HttpTransport, Method, RequestBody, decode_json, join_path, resolve_link,
    send_checked,
};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

/// Content type of v2 metadata patches
pub const JSON_PATCH_CONTENT_TYPE: &str = "application/openstack-images-v2.1-json-patch";

/// Upper bound on followed `next` links, guards against a looping server
const MAX_PAGES: usize = 1000;

/// Thin client over the catalog API of one negotiated version
pub struct CatalogClient {
    transport: Arc<dyn HttpTransport>,
    endpoint: String,
    version: ApiVersion,
}

impl CatalogClient {
    /// `endpoint` is the versioned catalog root, e.g. `https://image.example.com/v2`
    pub fn new(transport: Arc<dyn HttpTransport>, endpoint: &str, version: ApiVersion) -> Self {
        Self {
            transport,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            version,
        }
    }

    pub fn version(&self) -> ApiVersion {
        self.version
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Endpoint URL with `segments` appended; ids and names are escaped
    fn url(&self, segments: &[&str]) -> Result<String> {
        Ok(join_path(&self.endpoint, segments)?.into())
    }

    /// All records, normalized
    pub async fn list_images(&self) -> Result<Vec<CatalogImageRecord>> {
        let raw = match self.version {
            ApiVersion::V1 => self.list_raw_v1().await?,
            ApiVersion::V2 => self.list_raw_v2().await?,
        };
        Ok(raw.iter().map(CatalogImageRecord::normalize).collect())
    }

    async fn list_raw_v1(&self) -> Result<Vec<Map<String, Value>>> {
        let url = self.url(&["images", "detail"])?;
        let response = send_checked(self.transport.as_ref(), HttpRequest::new(Method::Get, &url)).await?;
        let body: Value = decode_json(&url, &response)?;
        Ok(image_objects(&body))
    }

    async fn list_raw_v2(&self) -> Result<Vec<Map<String, Value>>> {
        let mut images = Vec::new();
        let mut next = Some(self.url(&["images"])?);
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            let response =
                send_checked(self.transport.as_ref(), HttpRequest::new(Method::Get, &url)).await?;
            let body: Value = decode_json(&url, &response)?;
            images.extend(image_objects(&body));

            if let Some(link) = body.get("next").and_then(Value::as_str) {
                if pages >= MAX_PAGES {
                    tracing::warn!(pages, "stopped following image list pagination");
                    break;
                }
                next = Some(resolve_link(&self.endpoint, link)?);
            }
        }

        Ok(images)
    }

    /// Register a record; returns it as the catalog echoed it back
    pub async fn create_image(&self, body: Value) -> Result<CatalogImageRecord> {
        let url = self.url(&["images"])?;
        let response =
            send_checked(self.transport.as_ref(), HttpRequest::new(Method::Post, &url).json(body))
                .await?;
        let body: Value = decode_json(&url, &response)?;

        // v1 wraps the record in {"image": {...}}
        let raw = match body.get("image") {
            Some(Value::Object(image)) => image,
            _ => body.as_object().ok_or_else(|| PublishError::Transport {
                method: "POST".to_string(),
                url: url.clone(),
                status: Some(response.status),
                message: "image creation returned no record".to_string(),
            })?,
        };
        Ok(CatalogImageRecord::normalize(raw))
    }

    /// v1: stream the artifact into the record itself
    pub async fn upload_v1(&self, id: &str, artifact: &Path, size: u64, md5: &str) -> Result<()> {
        let request = HttpRequest::new(Method::Put, self.url(&["images", id])?)
            .header("content-type", "application/octet-stream")
            .header("x-image-meta-checksum", md5)
            .header("x-glance-registry-purge-props", "false")
            .body(RequestBody::File {
                path: artifact.to_path_buf(),
                offset: 0,
                length: size,
            });
        send_checked(self.transport.as_ref(), request).await?;
        Ok(())
    }

    /// v2: stream the artifact into the file sub-resource
    pub async fn upload_v2(&self, id: &str, artifact: &Path, size: u64) -> Result<()> {
        let request = HttpRequest::new(Method::Put, self.url(&["images", id, "file"])?)
            .header("content-type", "application/octet-stream")
            .body(RequestBody::File {
                path: artifact.to_path_buf(),
                offset: 0,
                length: size,
            });
        send_checked(self.transport.as_ref(), request).await?;
        Ok(())
    }

    /// Delete a record. An already missing record counts as deleted.
    pub async fn delete_image(&self, id: &str) -> Result<()> {
        let url = self.url(&["images", id])?;
        match send_checked(self.transport.as_ref(), HttpRequest::new(Method::Delete, url)).await {
            Err(error) if error.status() == Some(404) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    /// Apply a JSON-patch to a v2 record
    pub async fn patch_image(&self, id: &str, operations: Vec<Value>) -> Result<()> {
        let request = HttpRequest::new(Method::Patch, self.url(&["images", id])?)
            .json_with_content_type(Value::Array(operations), JSON_PATCH_CONTENT_TYPE);
        send_checked(self.transport.as_ref(), request).await?;
        Ok(())
    }

    pub async fn create_task(&self, body: Value) -> Result<UploadTask> {
        let url = self.url(&["tasks"])?;
        let response =
            send_checked(self.transport.as_ref(), HttpRequest::new(Method::Post, &url).json(body))
                .await?;
        decode_json(&url, &response)
    }

    pub async fn get_task(&self, id: &str) -> Result<UploadTask> {
        let url = self.url(&["tasks", id])?;
        let response =
            send_checked(self.transport.as_ref(), HttpRequest::new(Method::Get, &url)).await?;
        decode_json(&url, &response)
    }
}

/// Image objects of a list payload; tolerates a bare array
fn image_objects(body: &Value) -> Vec<Map<String, Value>> {
    let items = match body {
        Value::Array(items) => items,
        other => match other.get("images") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
    };
    items.iter().filter_map(|item| item.as_object().cloned()).collect()
}
