//! Object-store wire calls

use crate::core::error::{PublishError, Result};
use crate::transport::{
    HttpRequest, HttpResponse, HttpTransport, Method, RequestBody, Url, join_path, parse_url,
    send_checked,
};
use std::collections::BTreeMap;
use std::fmt;
use std::iter;
use std::sync::Arc;

pub struct ObjectStoreClient {
    transport: Arc<dyn HttpTransport>,
    endpoint: String,
    info_endpoint: Option<String>,
}

impl fmt::Debug for ObjectStoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreClient")
            .field("endpoint", &self.endpoint)
            .field("info_endpoint", &self.info_endpoint)
            .finish_non_exhaustive()
    }
}

impl ObjectStoreClient {
    /// `endpoint` is the account URL; capability discovery defaults to
    /// `/info` at its origin.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        endpoint: &str,
        info_endpoint: Option<&str>,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.to_string(),
            info_endpoint: info_endpoint.map(str::to_string),
        }
    }

    pub fn info_url(&self) -> Result<Url> {
        match &self.info_endpoint {
            Some(info) => parse_url(info),
            None => parse_url(&self.endpoint)?.join("/info").map_err(|e| {
                PublishError::Config(format!("no info URL for '{}': {}", self.endpoint, e))
            }),
        }
    }

    pub fn container_url(&self, container: &str) -> Result<Url> {
        join_path(&self.endpoint, &[container])
    }

    /// Object names keep their `/` separators; every piece is escaped
    pub fn object_url(&self, container: &str, object: &str) -> Result<Url> {
        let segments: Vec<&str> = iter::once(container).chain(object.split('/')).collect();
        join_path(&self.endpoint, &segments)
    }

    /// Capability document, or `None` if the store does not publish one
    pub async fn info(&self) -> Result<Option<serde_json::Value>> {
        let request = HttpRequest::new(Method::Get, self.info_url()?);
        match send_checked(self.transport.as_ref(), request).await {
            Ok(response) => Ok(serde_json::from_slice(&response.body).ok()),
            Err(error) if error.status() == Some(404) => Ok(None),
            Err(error) => Err(error),
        }
    }

    pub async fn container_exists(&self, container: &str) -> Result<bool> {
        let request = HttpRequest::new(Method::Head, self.container_url(container)?);
        Ok(self.head(request).await?.is_some())
    }

    /// Create a container; an existing one is not an error
    pub async fn create_container(&self, container: &str) -> Result<()> {
        let request = HttpRequest::new(Method::Put, self.container_url(container)?);
        match send_checked(self.transport.as_ref(), request).await {
            Err(error) if error.status() == Some(409) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    /// Size of an existing object, `None` when there is no such object
    pub async fn object_size(&self, container: &str, object: &str) -> Result<Option<u64>> {
        let request = HttpRequest::new(Method::Head, self.object_url(container, object)?);
        Ok(self.head(request).await?.map(|response| {
            response
                .header("content-length")
                .and_then(|length| length.parse().ok())
                .unwrap_or(0)
        }))
    }

    pub async fn put_object(
        &self,
        container: &str,
        object: &str,
        headers: &BTreeMap<String, String>,
        body: RequestBody,
    ) -> Result<HttpResponse> {
        self.put(self.object_url(container, object)?, headers, body).await
    }

    /// Store a static large object manifest
    pub async fn put_slo_manifest(
        &self,
        container: &str,
        object: &str,
        headers: &BTreeMap<String, String>,
        manifest: serde_json::Value,
    ) -> Result<HttpResponse> {
        let mut url = self.object_url(container, object)?;
        url.set_query(Some("multipart-manifest=put"));
        self.put(url, headers, RequestBody::Json(manifest)).await
    }

    async fn put(
        &self,
        url: Url,
        headers: &BTreeMap<String, String>,
        body: RequestBody,
    ) -> Result<HttpResponse> {
        let mut request = HttpRequest::new(Method::Put, url).body(body);
        for (name, value) in headers {
            request = request.header(name, value.as_str());
        }
        send_checked(self.transport.as_ref(), request).await
    }

    async fn head(&self, request: HttpRequest) -> Result<Option<HttpResponse>> {
        match send_checked(self.transport.as_ref(), request).await {
            Ok(response) => Ok(Some(response)),
            Err(error) if error.status() == Some(404) => Ok(None),
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::ScriptedTransport;
    use serde_json::json;

    const ENDPOINT: &str = "https://object-store.example.com/v1/AUTH_x";

    fn client() -> (Arc<ScriptedTransport>, ObjectStoreClient) {
        let transport = Arc::new(ScriptedTransport::new());
        let client = ObjectStoreClient::new(transport.clone(), ENDPOINT, None);
        (transport, client)
    }

    #[tokio::test]
    async fn test_info_url_defaults_to_origin() {
        let (transport, client) = client();
        transport.on(
            Method::Get,
            "https://object-store.example.com/info",
            vec![ScriptedTransport::json(200, json!({"swift": {"max_file_size": 1000}}))],
        );

        let info = client.info().await.unwrap().unwrap();
        assert_eq!(info["swift"]["max_file_size"], 1000);
    }

    #[tokio::test]
    async fn test_info_missing() {
        let (transport, client) = client();
        transport.on(
            Method::Get,
            "https://object-store.example.com/info",
            vec![ScriptedTransport::status(404)],
        );

        assert!(client.info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_container_lookup_and_create() {
        let (transport, client) = client();
        let url = format!("{}/images", ENDPOINT);
        transport.on(Method::Head, &url, vec![ScriptedTransport::status(404)]);
        transport.on(Method::Put, &url, vec![ScriptedTransport::status(409)]);

        assert!(!client.container_exists("images").await.unwrap());
        assert!(client.create_container("images").await.is_ok());
    }

    #[tokio::test]
    async fn test_object_size() {
        let (transport, client) = client();
        let url = format!("{}/images/disk", ENDPOINT);
        transport.on(
            Method::Head,
            &url,
            vec![ScriptedTransport::with_headers(
                ScriptedTransport::status(200),
                &[("Content-Length", "1024")],
            )],
        );

        assert_eq!(client.object_size("images", "disk").await.unwrap(), Some(1024));
    }

    #[tokio::test]
    async fn test_head_server_error_propagates() {
        let (transport, client) = client();
        let url = format!("{}/images", ENDPOINT);
        transport.on(Method::Head, &url, vec![ScriptedTransport::status(500)]);

        assert!(client.container_exists("images").await.is_err());
    }

    #[test]
    fn test_object_names_are_escaped() {
        let (_, client) = client();

        assert_eq!(
            client.object_url("images", "nightly#3").unwrap().as_str(),
            format!("{}/images/nightly%233", ENDPOINT)
        );
        assert_eq!(
            client.object_url("images", "disk?v=2").unwrap().as_str(),
            format!("{}/images/disk%3Fv=2", ENDPOINT)
        );
        assert_eq!(
            client.object_url("images_segments", "img/slo/25/10/00000000").unwrap().as_str(),
            format!("{}/images_segments/img/slo/25/10/00000000", ENDPOINT)
        );
    }

    #[test]
    fn test_explicit_info_url() {
        let client = ObjectStoreClient::new(
            Arc::new(ScriptedTransport::new()),
            ENDPOINT,
            Some("https://capabilities.example.com/info"),
        );
        assert_eq!(
            client.info_url().unwrap().as_str(),
            "https://capabilities.example.com/info"
        );
    }

    #[tokio::test]
    async fn test_slo_manifest_query() {
        let (transport, client) = client();
        let url = format!("{}/images/nightly%233?multipart-manifest=put", ENDPOINT);
        transport.on(Method::Put, &url, vec![ScriptedTransport::status(201)]);

        client
            .put_slo_manifest("images", "nightly#3", &BTreeMap::new(), json!([]))
            .await
            .unwrap();
        assert_eq!(transport.calls(), vec![("PUT".to_string(), url)]);
    }
}
