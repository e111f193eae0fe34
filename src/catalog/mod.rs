//! Image catalog access
//!
//! Wire calls for both catalog generations, the canonical record, lookups
//! and import task tracking.

pub mod client;
pub mod reader;
pub mod record;
pub mod tasks;

pub use client::CatalogClient;
pub use reader::CatalogReader;
pub use record::{CatalogImageRecord, ImageStatus, RESERVED_MD5, RESERVED_OBJECT, RESERVED_SHA256};
pub use tasks::{TaskPoller, TaskStatus, UploadTask};
