//! Image Publisher - orchestrates one image publication
//!
//! Sequence: digests, duplicate check, strategy dispatch (direct PUT or
//! staging plus import task), confirmation, metadata reconciliation.
//! Failures after something was created undo what this publication created
//! and surface the original error unchanged.

use crate::artifact::{ArtifactDescriptor, ArtifactDigests, ChecksumComputer};
use crate::catalog::reader::find_duplicate;
use crate::catalog::{CatalogClient, CatalogImageRecord, CatalogReader, TaskPoller, UploadTask};
use crate::core::error::{PublishError, Result, RollbackError};
use crate::core::poll::{Deadline, PollOptions, PollStatus, Poller};
use crate::core::state_machine::{PublicationState, PublicationStateMachine, StateTransition};
use crate::object_store::{ObjectStoreStager, StagedObject};
use crate::orchestration::context::PublishContext;
use crate::orchestration::properties::{
    ImageAttributes, ImageFormats, ImageMetadata, build_patch, reserved_properties,
    v1_create_body, v2_create_body,
};
use crate::orchestration::strategy::UploadStrategy;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// What to publish and how. Unset options fall back to configuration.
#[derive(Debug, Clone, Default)]
pub struct PublishRequest {
    /// Target image name
    pub name: String,

    /// Local artifact
    pub artifact: PathBuf,

    /// Digests computed by the caller; skips reading the artifact
    pub digests: Option<ArtifactDigests>,

    /// Staging container, also part of the source locator
    pub container: Option<String>,

    pub disk_format: Option<String>,
    pub container_format: Option<String>,

    pub metadata: ImageMetadata,

    /// Import through a task (v2 only)
    pub use_tasks: Option<bool>,

    /// Wait until the image is active and reconciled
    pub wait: Option<bool>,

    /// Overall budget for the publication
    pub timeout: Option<Duration>,

    /// Upload even if an identical artifact is already published under this name
    pub allow_duplicates: bool,
}

impl PublishRequest {
    pub fn new(name: impl Into<String>, artifact: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            artifact: artifact.into(),
            ..Default::default()
        }
    }
}

/// Publishing report returned after a publication
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub name: String,
    pub strategy: UploadStrategy,
    pub state: PublicationState,
    pub record: Option<CatalogImageRecord>,
    pub task: Option<UploadTask>,
    pub staged: Option<StagedObject>,
    /// The artifact was already published; nothing was uploaded
    pub duplicate: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub duration_ms: i64,
    pub transitions: Vec<StateTransition>,
}

/// Everything decided before the first network call
struct Prepared {
    strategy: UploadStrategy,
    attributes: ImageAttributes,
    formats: ImageFormats,
    container: String,
    wait: bool,
    timeout: Duration,
}

/// Resources this publication created or observed, for rollback and reporting
#[derive(Default)]
struct Progress {
    created_id: Option<String>,
    record: Option<CatalogImageRecord>,
    task: Option<UploadTask>,
    staged: Option<StagedObject>,
    duplicate: bool,
    /// Record ids seen before anything was created
    preexisting: Option<HashSet<String>>,
}

/// Main image publisher orchestrator
pub struct ImagePublisher {
    context: Arc<PublishContext>,
    state_machine: PublicationStateMachine,
    rollback_errors: Vec<RollbackError>,
}

impl ImagePublisher {
    pub fn new(context: Arc<PublishContext>) -> Self {
        Self {
            context,
            state_machine: PublicationStateMachine::new(),
            rollback_errors: Vec::new(),
        }
    }

    /// Cleanup failures of the last publication
    pub fn rollback_errors(&self) -> &[RollbackError] {
        &self.rollback_errors
    }

    /// State machine of the last publication
    pub fn state_machine(&self) -> &PublicationStateMachine {
        &self.state_machine
    }

    /// Publish one artifact.
    ///
    /// Input errors are reported before any network call. Publishing an
    /// artifact that is already published under `name` returns the existing
    /// record without uploading anything.
    pub async fn publish(&mut self, request: PublishRequest) -> Result<PublishReport> {
        self.state_machine = PublicationStateMachine::new();
        self.rollback_errors.clear();

        let prepared = self.prepare(&request)?;
        let deadline = Deadline::after(prepared.timeout);
        let mut progress = Progress::default();

        let span = tracing::info_span!(
            "publish",
            image = %request.name,
            strategy = %prepared.strategy
        );

        let result = self
            .run(&request, &prepared, &deadline, &mut progress)
            .instrument(span)
            .await;

        match result {
            Ok(()) => Ok(self.report(&request, &prepared, progress)),
            Err(error) => {
                tracing::error!(image = %request.name, error = %error, code = error.code(), "publication failed");
                if self.state_machine.get_state().requires_rollback() {
                    self.rollback(&progress).await;
                }
                self.state_machine.fail(&error.to_string());
                Err(error)
            }
        }
    }

    fn prepare(&self, request: &PublishRequest) -> Result<Prepared> {
        let config = self.context.config();

        if request.name.trim().is_empty() {
            return Err(PublishError::validation("name", "must not be empty"));
        }

        let attributes = ImageAttributes::from_metadata(&request.metadata)?;

        let strategy = UploadStrategy::select(
            self.context.api_version(),
            request.use_tasks.unwrap_or(config.catalog.use_tasks),
        );
        if strategy.requires_staging() {
            self.context.object_store()?;
        }

        Ok(Prepared {
            strategy,
            attributes,
            formats: ImageFormats {
                disk_format: request
                    .disk_format
                    .clone()
                    .unwrap_or_else(|| config.publish.disk_format.clone()),
                container_format: request
                    .container_format
                    .clone()
                    .unwrap_or_else(|| config.publish.container_format.clone()),
            },
            container: request
                .container
                .clone()
                .unwrap_or_else(|| config.publish.container.clone()),
            wait: request.wait.unwrap_or(config.publish.wait),
            timeout: request.timeout.unwrap_or_else(|| config.publish.timeout()),
        })
    }

    async fn run(
        &mut self,
        request: &PublishRequest,
        prepared: &Prepared,
        deadline: &Deadline,
        progress: &mut Progress,
    ) -> Result<()> {
        let artifact = match &request.digests {
            Some(digests) => {
                ArtifactDescriptor::with_digests(&request.artifact, digests.clone()).await?
            }
            None => ChecksumComputer::compute(&request.artifact).await?,
        };
        self.state_machine.transition(
            PublicationState::Checksummed,
            metadata(&[("size", json!(artifact.size()))]),
        );

        let context = self.context.clone();
        let catalog = context.catalog();

        if !request.allow_duplicates {
            deadline.check("duplicate check")?;
            let images = CatalogReader::new(catalog).list().await?;
            if let Some(existing) = find_duplicate(&images, &request.name, artifact.digests()) {
                tracing::info!(id = existing.id.as_deref(), "artifact already published");
                self.state_machine
                    .transition(PublicationState::DedupChecked, None);
                self.state_machine.transition(
                    PublicationState::Reconciled,
                    metadata(&[("duplicate", json!(true))]),
                );
                progress.duplicate = true;
                progress.record = Some(existing);
                return Ok(());
            }
            progress.preexisting = Some(record_ids(&images));
        }
        self.state_machine
            .transition(PublicationState::DedupChecked, None);

        let locator = format!("{}/{}", prepared.container, request.name);
        let reserved = reserved_properties(artifact.digests(), &locator);

        match prepared.strategy {
            UploadStrategy::V1DirectPut | UploadStrategy::V2DirectPut => {
                self.direct_put(request, prepared, &artifact, &reserved, deadline, progress)
                    .await
            }
            UploadStrategy::V2TaskImport => {
                self.task_import(request, prepared, &artifact, &reserved, deadline, progress)
                    .await
            }
        }
    }

    async fn direct_put(
        &mut self,
        request: &PublishRequest,
        prepared: &Prepared,
        artifact: &ArtifactDescriptor,
        reserved: &BTreeMap<String, String>,
        deadline: &Deadline,
        progress: &mut Progress,
    ) -> Result<()> {
        let context = self.context.clone();
        let catalog = context.catalog();

        self.state_machine
            .transition(PublicationState::Registering, None);
        deadline.check("image registration")?;

        let body = match prepared.strategy {
            UploadStrategy::V1DirectPut => {
                v1_create_body(&request.name, &prepared.formats, reserved, &prepared.attributes)
            }
            _ => v2_create_body(&request.name, &prepared.formats, reserved, &prepared.attributes),
        };
        let created = catalog.create_image(body).await?;
        let id = created.id.clone().ok_or_else(|| PublishError::Transport {
            method: "POST".to_string(),
            url: format!("{}/images", catalog.endpoint()),
            status: None,
            message: "catalog returned a record without id".to_string(),
        })?;
        tracing::info!(id = %id, "registered image");
        progress.created_id = Some(id.clone());
        progress.record = Some(created);

        self.state_machine.transition(
            PublicationState::Uploading,
            metadata(&[("id", json!(id))]),
        );
        deadline.check("image upload")?;

        match prepared.strategy {
            UploadStrategy::V1DirectPut => {
                catalog
                    .upload_v1(&id, artifact.path(), artifact.size(), &artifact.digests().md5)
                    .await?
            }
            _ => {
                catalog
                    .upload_v2(&id, artifact.path(), artifact.size())
                    .await?
            }
        }
        tracing::info!(id = %id, size = artifact.size(), "uploaded image data");

        if !prepared.wait {
            return Ok(());
        }

        let record = self
            .wait_for_record(catalog, deadline, |images| {
                images
                    .iter()
                    .find(|image| image.id.as_deref() == Some(id.as_str()))
                    .cloned()
            })
            .await?;
        self.state_machine.transition(PublicationState::Active, None);

        let desired = prepared.attributes.desired(reserved);
        let record = self.reconcile(catalog, prepared.strategy, record, &desired).await?;
        progress.record = Some(record);
        self.state_machine
            .transition(PublicationState::Reconciled, None);
        Ok(())
    }

    async fn task_import(
        &mut self,
        request: &PublishRequest,
        prepared: &Prepared,
        artifact: &ArtifactDescriptor,
        reserved: &BTreeMap<String, String>,
        deadline: &Deadline,
        progress: &mut Progress,
    ) -> Result<()> {
        let context = self.context.clone();
        let catalog = context.catalog();

        // An import never adopts a record that existed before it was submitted
        let preexisting = match progress.preexisting.take() {
            Some(ids) => ids,
            None => {
                deadline.check("image listing")?;
                record_ids(&CatalogReader::new(catalog).list().await?)
            }
        };

        self.state_machine.transition(
            PublicationState::Staging,
            metadata(&[("container", json!(prepared.container))]),
        );
        deadline.check("staging")?;

        let stager = ObjectStoreStager::new(
            context.object_store()?,
            context.store_limits(),
            context.segment_size(),
        );
        let staged = stager
            .stage(artifact, &prepared.container, &request.name)
            .await?;
        let import_from = staged.locator();
        progress.staged = Some(staged);

        self.state_machine.transition(
            PublicationState::Importing,
            metadata(&[("import_from", json!(import_from))]),
        );
        deadline.check("import task submission")?;

        let task = catalog
            .create_task(json!({
                "type": "import",
                "input": {
                    "import_from": import_from,
                    "image_properties": {"name": request.name},
                },
            }))
            .await?;
        tracing::info!(task_id = %task.id, "submitted import task");
        let task_id = task.id.clone();
        progress.task = Some(task);

        if !prepared.wait {
            return Ok(());
        }

        let task = TaskPoller::new(catalog, self.poll_options())
            .wait(&task_id, deadline)
            .await?;
        let produced_id = task.image_id().map(str::to_string);
        if produced_id.is_some() {
            progress.created_id = produced_id.clone();
        }
        progress.task = Some(task);

        let record = self
            .wait_for_record(catalog, deadline, |images| {
                locate_imported(
                    images,
                    produced_id.as_deref(),
                    artifact.digests(),
                    &request.name,
                    &preexisting,
                )
            })
            .await?;
        if progress.created_id.is_none() && record.matches_artifact(artifact.digests()) {
            progress.created_id = record.id.clone();
        }
        self.state_machine.transition(
            PublicationState::Active,
            metadata(&[("id", json!(record.id))]),
        );

        let desired = prepared.attributes.desired(reserved);
        let record = self.reconcile(catalog, prepared.strategy, record, &desired).await?;
        progress.record = Some(record);
        self.state_machine
            .transition(PublicationState::Reconciled, None);
        Ok(())
    }

    /// Poll the listing until `locate` yields an active record.
    ///
    /// A located record that can no longer become active is an error.
    async fn wait_for_record<F>(
        &self,
        catalog: &CatalogClient,
        deadline: &Deadline,
        locate: F,
    ) -> Result<CatalogImageRecord>
    where
        F: Fn(&[CatalogImageRecord]) -> Option<CatalogImageRecord>,
    {
        let locate = &locate;
        Poller::new(self.poll_options())
            .poll("image to become active", deadline, move || async move {
                let images = catalog.list_images().await?;
                match locate(&images) {
                    Some(record) if record.is_active() => Ok(PollStatus::Ready(record)),
                    Some(record) if record.status.is_failed() => Err(PublishError::Transport {
                        method: "GET".to_string(),
                        url: format!("{}/images", catalog.endpoint()),
                        status: None,
                        message: format!(
                            "image {} entered status {}",
                            record.id.as_deref().unwrap_or(&record.name),
                            record.status
                        ),
                    }),
                    Some(record) => {
                        tracing::debug!(status = %record.status, "image not active yet");
                        Ok(PollStatus::Pending)
                    }
                    None => Ok(PollStatus::Pending),
                }
            })
            .await
    }

    /// Patch in whatever the record is missing, then read it back
    async fn reconcile(
        &self,
        catalog: &CatalogClient,
        strategy: UploadStrategy,
        record: CatalogImageRecord,
        desired: &BTreeMap<String, Value>,
    ) -> Result<CatalogImageRecord> {
        // v1 has no patch call; everything went in at registration
        if !strategy.supports_patch() {
            return Ok(record);
        }
        let Some(id) = record.id.clone() else {
            return Ok(record);
        };

        let operations = build_patch(&record, desired);
        if operations.is_empty() {
            return Ok(record);
        }

        tracing::info!(id = %id, operations = operations.len(), "reconciling image metadata");
        catalog.patch_image(&id, operations).await?;

        let refreshed = CatalogReader::new(catalog).find(&id).await?;
        Ok(refreshed.unwrap_or(record))
    }

    /// Delete what this publication created. Never touches pre-existing records.
    async fn rollback(&mut self, progress: &Progress) {
        if let Some(task) = &progress.task {
            tracing::warn!(task_id = %task.id, "import task cannot be deleted and is retained by the catalog");
        }
        if let Some(staged) = &progress.staged {
            tracing::warn!(object = %staged.locator(), "staged object is left in place");
        }

        let Some(id) = &progress.created_id else {
            return;
        };

        let context = self.context.clone();
        match context.catalog().delete_image(id).await {
            Ok(()) => tracing::info!(id = %id, "rolled back image"),
            Err(error) => {
                let failure = RollbackError {
                    resource: format!("image {}", id),
                    message: error.to_string(),
                };
                tracing::error!(error = %failure, "rollback failed");
                self.rollback_errors.push(failure);
            }
        }
    }

    fn poll_options(&self) -> PollOptions {
        PollOptions {
            interval: self.context.config().publish.poll_interval(),
        }
    }

    fn report(
        &self,
        request: &PublishRequest,
        prepared: &Prepared,
        progress: Progress,
    ) -> PublishReport {
        let state = self.state_machine.get_state();
        PublishReport {
            name: request.name.clone(),
            strategy: prepared.strategy,
            state,
            record: progress.record,
            task: progress.task,
            staged: progress.staged,
            duplicate: progress.duplicate,
            published_at: (state == PublicationState::Reconciled).then(Utc::now),
            duration_ms: self.state_machine.get_elapsed_time(),
            transitions: self.state_machine.transitions().to_vec(),
        }
    }
}

/// Record produced by an import: by task result, then by reserved
/// properties, then by a unique name. Without a task result only records
/// absent from `preexisting` qualify.
fn locate_imported(
    images: &[CatalogImageRecord],
    image_id: Option<&str>,
    digests: &ArtifactDigests,
    name: &str,
    preexisting: &HashSet<String>,
) -> Option<CatalogImageRecord> {
    if let Some(id) = image_id {
        return images
            .iter()
            .find(|image| image.id.as_deref() == Some(id))
            .cloned();
    }

    let mut candidates = images.iter().filter(|image| {
        image.name == name
            && image
                .id
                .as_deref()
                .is_some_and(|id| !preexisting.contains(id))
    });
    if let Some(record) = candidates
        .clone()
        .find(|image| image.matches_artifact(digests))
    {
        return Some(record.clone());
    }

    match (candidates.next(), candidates.next()) {
        (Some(record), None) => Some(record.clone()),
        _ => None,
    }
}

fn record_ids(images: &[CatalogImageRecord]) -> HashSet<String> {
    images.iter().filter_map(|image| image.id.clone()).collect()
}

fn metadata(pairs: &[(&str, Value)]) -> Option<HashMap<String, Value>> {
    Some(
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect(),
    )
}
