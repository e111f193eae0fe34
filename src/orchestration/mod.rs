//! Orchestration layer for image publication
//!
//! Strategy selection, caller metadata handling, the session context and the
//! publication state machine driver.

pub mod context;
pub mod image_publisher;
pub mod properties;
pub mod strategy;

// Re-export main types for convenience
pub use context::PublishContext;
pub use image_publisher::{ImagePublisher, PublishReport, PublishRequest};
pub use properties::{ImageAttributes, ImageMetadata};
pub use strategy::UploadStrategy;
