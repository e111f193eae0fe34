//! Read side of the catalog: listing, lookup, duplicate detection

use crate::artifact::ArtifactDigests;
use crate::catalog::client::CatalogClient;
use crate::catalog::record::CatalogImageRecord;
use crate::core::error::{PublishError, Result};

pub struct CatalogReader<'a> {
    client: &'a CatalogClient,
}

impl<'a> CatalogReader<'a> {
    pub fn new(client: &'a CatalogClient) -> Self {
        Self { client }
    }

    pub async fn list(&self) -> Result<Vec<CatalogImageRecord>> {
        self.client.list_images().await
    }

    /// Look a record up by id or name.
    ///
    /// Returns `None` when nothing matches. An id match always wins; more
    /// than one name match is [`PublishError::Ambiguous`].
    pub async fn find(&self, name_or_id: &str) -> Result<Option<CatalogImageRecord>> {
        let images = self.list().await?;
        select(images, name_or_id)
    }

    /// Like [`find`](Self::find) but exactly one record is required
    pub async fn find_one(&self, name_or_id: &str) -> Result<CatalogImageRecord> {
        self.find(name_or_id)
            .await?
            .ok_or_else(|| PublishError::NotFound {
                name_or_id: name_or_id.trim().to_string(),
            })
    }

    /// A record named `name` that was created from an artifact with `digests`
    pub async fn find_published(
        &self,
        name: &str,
        digests: &ArtifactDigests,
    ) -> Result<Option<CatalogImageRecord>> {
        let images = self.list().await?;
        Ok(find_duplicate(&images, name, digests))
    }
}

/// Pick the record matching `name_or_id` out of a listing
pub fn select(
    images: Vec<CatalogImageRecord>,
    name_or_id: &str,
) -> Result<Option<CatalogImageRecord>> {
    let wanted = name_or_id.trim();

    if let Some(record) = images.iter().find(|image| {
        image
            .id
            .as_deref()
            .is_some_and(|id| id.eq_ignore_ascii_case(wanted))
    }) {
        return Ok(Some(record.clone()));
    }

    let mut named: Vec<_> = images.into_iter().filter(|image| image.name == wanted).collect();
    match named.len() {
        0 => Ok(None),
        1 => Ok(named.pop()),
        count => Err(PublishError::Ambiguous {
            name: wanted.to_string(),
            count,
        }),
    }
}

/// First record named `name` whose reserved properties carry `digests`
pub fn find_duplicate(
    images: &[CatalogImageRecord],
    name: &str,
    digests: &ArtifactDigests,
) -> Option<CatalogImageRecord> {
    images
        .iter()
        .find(|image| image.name == name && image.matches_artifact(digests))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::record::{RESERVED_MD5, RESERVED_SHA256};
    use crate::core::config::ApiVersion;
    use crate::transport::Method;
    use crate::transport::mock::ScriptedTransport;
    use serde_json::{Value, json};
    use std::sync::Arc;

    const IMAGES: &str = "https://image.example.com/v2/images";

    fn record(value: Value) -> CatalogImageRecord {
        CatalogImageRecord::normalize(value.as_object().unwrap())
    }

    fn digests() -> ArtifactDigests {
        ArtifactDigests {
            md5: "93b885adfe0da089cdf634904fd59f71".to_string(),
            sha256: "6e340b9cffb37a989ca544e6bb780a2c78901d3fb33738768511a30617afa01d"
                .to_string(),
        }
    }

    fn catalog(images: Value) -> (Arc<ScriptedTransport>, CatalogClient) {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on(
            Method::Get,
            IMAGES,
            vec![ScriptedTransport::json(200, json!({ "images": images }))],
        );
        let client = CatalogClient::new(
            transport.clone(),
            "https://image.example.com/v2",
            ApiVersion::V2,
        );
        (transport, client)
    }

    #[test]
    fn test_select_prefers_id() {
        let images = vec![
            record(json!({"id": "ABC", "name": "x"})),
            record(json!({"id": "def", "name": "abc"})),
        ];

        let found = select(images, " abc ").unwrap().unwrap();
        assert_eq!(found.id.as_deref(), Some("ABC"));
    }

    #[test]
    fn test_select_ambiguous_name() {
        let images = vec![
            record(json!({"id": "1", "name": "dup"})),
            record(json!({"id": "2", "name": "dup"})),
        ];

        let error = select(images, "dup").unwrap_err();
        assert!(matches!(error, PublishError::Ambiguous { count: 2, .. }));
    }

    #[test]
    fn test_find_duplicate_requires_name_and_digests() {
        let published = json!({
            "id": "1",
            "name": "fake_image",
            RESERVED_MD5: digests().md5,
            RESERVED_SHA256: digests().sha256,
        });
        let images = vec![record(published)];

        assert!(find_duplicate(&images, "fake_image", &digests()).is_some());
        assert!(find_duplicate(&images, "other", &digests()).is_none());
    }

    #[tokio::test]
    async fn test_find_absent_is_none() {
        let (_, client) = catalog(json!([]));
        let reader = CatalogReader::new(&client);

        assert!(reader.find("nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_one_absent_is_not_found() {
        let (_, client) = catalog(json!([{"id": "1", "name": "a"}]));
        let reader = CatalogReader::new(&client);

        let error = reader.find_one("b").await.unwrap_err();
        assert_eq!(error.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_find_published() {
        let (transport, client) = catalog(json!([{
            "id": "1",
            "name": "fake_image",
            RESERVED_MD5: digests().md5,
            RESERVED_SHA256: digests().sha256,
        }]));
        let reader = CatalogReader::new(&client);

        let found = reader.find_published("fake_image", &digests()).await.unwrap();
        assert_eq!(found.unwrap().id.as_deref(), Some("1"));
        assert_eq!(transport.count(Method::Get, IMAGES), 1);
    }
}
