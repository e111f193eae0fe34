//! Local image artifact and its content digests

pub mod checksum;

pub use checksum::{ArtifactDescriptor, ArtifactDigests, ChecksumComputer};
