pub mod artifact;
pub mod catalog;
pub mod core;
pub mod object_store;
pub mod orchestration;
pub mod security;
pub mod transport;

pub use artifact::{ArtifactDescriptor, ArtifactDigests, ChecksumComputer};
pub use catalog::{CatalogImageRecord, CatalogReader, ImageStatus, TaskPoller, UploadTask};
pub use self::core::*;
pub use object_store::{ObjectStoreStager, StagingSegmentPlan, StoreLimits};
pub use orchestration::{
    ImagePublisher, PublishContext, PublishReport, PublishRequest, UploadStrategy,
};
pub use security::Credentials;
pub use transport::{HttpTransport, ReqwestTransport};
