//! Object-store staging for task-based imports

pub mod client;
pub mod limits;
pub mod segments;
pub mod stager;

pub use client::ObjectStoreClient;
pub use limits::{StoreLimits, StoreLimitsCache};
pub use segments::{Segment, StagingSegmentPlan};
pub use stager::{ObjectStoreStager, StagedObject};
