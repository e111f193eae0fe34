//! Session context shared by every publication
//!
//! Built once from configuration and credentials and read-only afterwards,
//! except for the store limits, which are filled in at most once.

use crate::catalog::CatalogClient;
use crate::core::config::{ApiVersion, PublisherConfig};
use crate::core::error::{PublishError, Result};
use crate::object_store::{ObjectStoreClient, StoreLimitsCache};
use crate::security::Credentials;
use crate::transport::{HttpTransport, ReqwestTransport};
use std::sync::Arc;

pub struct PublishContext {
    config: PublisherConfig,
    catalog: CatalogClient,
    object_store: Option<ObjectStoreClient>,
    store_limits: StoreLimitsCache,
}

impl PublishContext {
    /// Context over an arbitrary transport
    pub fn new(config: PublisherConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let catalog = CatalogClient::new(
            transport.clone(),
            &config.catalog.endpoint,
            config.catalog.image_api_version,
        );
        let object_store = config.object_store.as_ref().map(|store| {
            ObjectStoreClient::new(
                transport.clone(),
                &store.endpoint,
                store.info_endpoint.as_deref(),
            )
        });

        Self {
            config,
            catalog,
            object_store,
            store_limits: StoreLimitsCache::new(),
        }
    }

    /// Context talking HTTP through reqwest with `credentials`
    pub fn connect(config: PublisherConfig, credentials: Credentials) -> Result<Self> {
        tracing::debug!(
            catalog = %config.catalog.endpoint,
            version = %config.catalog.image_api_version,
            token = %credentials.masked(),
            "connecting"
        );
        let transport = ReqwestTransport::new(&config.http, credentials)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    pub fn api_version(&self) -> ApiVersion {
        self.catalog.version()
    }

    pub fn catalog(&self) -> &CatalogClient {
        &self.catalog
    }

    /// The object store, required by task-based imports
    pub fn object_store(&self) -> Result<&ObjectStoreClient> {
        self.object_store.as_ref().ok_or_else(|| {
            PublishError::Config(
                "task-based import needs objectStore.endpoint to be configured".to_string(),
            )
        })
    }

    pub fn store_limits(&self) -> &StoreLimitsCache {
        &self.store_limits
    }

    pub fn segment_size(&self) -> Option<u64> {
        self.config
            .object_store
            .as_ref()
            .and_then(|store| store.segment_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ObjectStoreConfig;
    use crate::transport::mock::ScriptedTransport;

    fn config() -> PublisherConfig {
        let mut config = PublisherConfig::default();
        config.catalog.endpoint = "https://image.example.com/v2".to_string();
        config
    }

    #[test]
    fn test_without_object_store() {
        let context = PublishContext::new(config(), Arc::new(ScriptedTransport::new()));

        assert_eq!(context.api_version(), ApiVersion::V2);
        assert_eq!(context.object_store().unwrap_err().code(), "CONFIG_ERROR");
        assert!(context.store_limits().get().is_none());
    }

    #[test]
    fn test_with_object_store() {
        let mut config = config();
        config.object_store = Some(ObjectStoreConfig {
            endpoint: "https://object-store.example.com/v1/AUTH_x".to_string(),
            info_endpoint: None,
            segment_size: Some(1000),
        });

        let context = PublishContext::new(config, Arc::new(ScriptedTransport::new()));
        assert!(context.object_store().is_ok());
        assert_eq!(context.segment_size(), Some(1000));
    }

    #[test]
    fn test_connect() {
        let context = PublishContext::connect(config(), Credentials::with_token("gAAAAABk-token"));
        assert!(context.is_ok());
    }
}
