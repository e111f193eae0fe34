pub mod config;
pub mod config_loader;
pub mod error;
pub mod poll;
pub mod state_machine;

pub use config::{
    ApiVersion, CatalogConfig, HttpConfig, ObjectStoreConfig, PublishDefaults, PublisherConfig,
};
pub use config_loader::{ConfigLoadOptions, ConfigLoader, ConfigValidationResult};
pub use error::*;
pub use poll::{Deadline, PollOptions, PollStatus, Poller};
pub use state_machine::{PublicationState, PublicationStateMachine, StateTransition};
