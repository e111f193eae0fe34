//! Staging an artifact into the object store
//!
//! Order of calls: limits (cached), container lookup, container creation when
//! missing, object lookup, then the upload itself. An existing object of the
//! same size is reused as is; there is no byte-level comparison.

use crate::artifact::{ArtifactDescriptor, ChecksumComputer};
use crate::core::error::{PublishError, Result};
use crate::object_store::client::ObjectStoreClient;
use crate::object_store::limits::StoreLimitsCache;
use crate::object_store::segments::{StagingSegmentPlan, segments_container};
use crate::transport::RequestBody;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

pub const MD5_HEADER: &str = "x-object-meta-x-shade-md5";
pub const SHA256_HEADER: &str = "x-object-meta-x-shade-sha256";

/// Where the artifact ended up
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagedObject {
    pub container: String,
    pub object: String,
    pub plan: StagingSegmentPlan,
    /// The object was already there with the right size
    pub reused: bool,
}

impl StagedObject {
    /// `<container>/<object>`, the form import tasks refer to
    pub fn locator(&self) -> String {
        format!("{}/{}", self.container, self.object)
    }
}

pub struct ObjectStoreStager<'a> {
    client: &'a ObjectStoreClient,
    limits: &'a StoreLimitsCache,
    segment_size: Option<u64>,
}

impl<'a> ObjectStoreStager<'a> {
    pub fn new(
        client: &'a ObjectStoreClient,
        limits: &'a StoreLimitsCache,
        segment_size: Option<u64>,
    ) -> Self {
        Self {
            client,
            limits,
            segment_size,
        }
    }

    /// Upload `artifact` as `container/object`.
    ///
    /// Transport failures become [`PublishError::Staging`]. Segments
    /// uploaded before a failure are left in place.
    pub async fn stage(
        &self,
        artifact: &ArtifactDescriptor,
        container: &str,
        object: &str,
    ) -> Result<StagedObject> {
        self.stage_inner(artifact, container, object)
            .await
            .map_err(|error| match error {
                PublishError::Transport { .. } => PublishError::Staging {
                    object: format!("{}/{}", container, object),
                    message: error.to_string(),
                },
                other => other,
            })
    }

    async fn stage_inner(
        &self,
        artifact: &ArtifactDescriptor,
        container: &str,
        object: &str,
    ) -> Result<StagedObject> {
        let limits = self.limits.get_or_fetch(self.client).await?;
        let plan = StagingSegmentPlan::plan(artifact.size(), &limits, self.segment_size);

        self.ensure_container(container).await?;

        let mut staged = StagedObject {
            container: container.to_string(),
            object: object.to_string(),
            plan,
            reused: false,
        };

        if let Some(existing) = self.client.object_size(container, object).await? {
            if existing == artifact.size() {
                tracing::info!(container, object, size = existing, "reusing staged object");
                staged.reused = true;
                return Ok(staged);
            }
            tracing::debug!(container, object, existing, "replacing staged object of different size");
        }

        let headers = digest_headers(artifact);
        if plan.is_segmented() {
            self.upload_segmented(artifact, container, object, &plan, headers)
                .await?;
        } else {
            tracing::info!(container, object, size = artifact.size(), "uploading object");
            let mut headers = headers;
            headers.insert(
                "content-type".to_string(),
                "application/octet-stream".to_string(),
            );
            self.client
                .put_object(container, object, &headers, file_range(artifact, 0, artifact.size()))
                .await?;
        }

        Ok(staged)
    }

    async fn ensure_container(&self, container: &str) -> Result<()> {
        if self.client.container_exists(container).await? {
            return Ok(());
        }

        tracing::info!(container, "creating container");
        self.client.create_container(container).await?;

        if !self.client.container_exists(container).await? {
            return Err(PublishError::Staging {
                object: container.to_string(),
                message: "container is still missing after creation".to_string(),
            });
        }
        Ok(())
    }

    async fn upload_segmented(
        &self,
        artifact: &ArtifactDescriptor,
        container: &str,
        object: &str,
        plan: &StagingSegmentPlan,
        headers: BTreeMap<String, String>,
    ) -> Result<()> {
        let segment_container = segments_container(container);
        self.ensure_container(&segment_container).await?;

        tracing::info!(
            container,
            object,
            segments = plan.segment_count,
            segment_size = plan.segment_size,
            slo = plan.static_large_object,
            "uploading segmented object"
        );

        let mut manifest = Vec::new();
        for segment in plan.segments() {
            let name = plan.segment_name(object, &segment);
            let etag =
                ChecksumComputer::md5_range(artifact.path(), segment.offset, segment.length).await?;

            let mut segment_headers = headers.clone();
            segment_headers.insert("etag".to_string(), etag.clone());
            self.client
                .put_object(
                    &segment_container,
                    &name,
                    &segment_headers,
                    file_range(artifact, segment.offset, segment.length),
                )
                .await?;
            tracing::debug!(segment = segment.index, object = %name, "uploaded segment");

            manifest.push(json!({
                "path": format!("/{}/{}", segment_container, name),
                "etag": etag,
                "size_bytes": segment.length,
            }));
        }

        if plan.static_large_object {
            self.client
                .put_slo_manifest(container, object, &headers, serde_json::Value::Array(manifest))
                .await?;
        } else {
            let mut headers = headers;
            headers.insert(
                "x-object-manifest".to_string(),
                format!("{}/{}", segment_container, plan.segment_prefix(object)),
            );
            self.client
                .put_object(container, object, &headers, RequestBody::Empty)
                .await?;
        }
        Ok(())
    }
}

/// Metadata headers carrying the artifact digests
pub fn digest_headers(artifact: &ArtifactDescriptor) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert(MD5_HEADER.to_string(), artifact.digests().md5.clone());
    headers.insert(SHA256_HEADER.to_string(), artifact.digests().sha256.clone());
    headers
}

fn file_range(artifact: &ArtifactDescriptor, offset: u64, length: u64) -> RequestBody {
    RequestBody::File {
        path: artifact.path().to_path_buf(),
        offset,
        length,
    }
}
