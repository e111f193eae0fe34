//! HTTP transport seam
//!
//! Every wire call of the publication workflow goes through [`HttpTransport`].
//! Authentication, connection pooling and TLS live behind it; the workflow
//! only builds requests and interprets status codes.

pub mod http;
#[cfg(test)]
pub mod mock;

use crate::core::error::{PublishError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub use http::ReqwestTransport;
pub use reqwest::Url;

/// HTTP method subset used by the catalog and the object store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request payload
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    /// A byte range of a local file, streamed without buffering
    File {
        path: PathBuf,
        offset: u64,
        length: u64,
    },
}

impl RequestBody {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Outgoing request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// Header names are kept lowercase
    pub headers: BTreeMap<String, String>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn json(self, body: serde_json::Value) -> Self {
        self.json_with_content_type(body, "application/json")
    }

    pub fn json_with_content_type(mut self, body: serde_json::Value, content_type: &str) -> Self {
        self.body = RequestBody::Json(body);
        self.header("content-type", content_type)
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }
}

/// Response as seen by the workflow
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are kept lowercase
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The external HTTP collaborator
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request.
    ///
    /// Any status code is a successful send; only failures to get a response
    /// at all (DNS, connect, TLS, broken stream) are errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Send `request` and turn non-2xx answers into [`PublishError::Transport`]
pub async fn send_checked(
    transport: &dyn HttpTransport,
    request: HttpRequest,
) -> Result<HttpResponse> {
    let method = request.method;
    let url = request.url.clone();
    tracing::debug!(%method, %url, "sending request");

    let response = transport.send(request).await?;
    if response.is_success() {
        return Ok(response);
    }

    Err(PublishError::Transport {
        method: method.to_string(),
        url,
        status: Some(response.status),
        message: truncate(&response.text(), 512),
    })
}

/// Decode a JSON response body
pub fn decode_json<T: DeserializeOwned>(request_url: &str, response: &HttpResponse) -> Result<T> {
    serde_json::from_slice(&response.body).map_err(|e| PublishError::Transport {
        method: "decode".to_string(),
        url: request_url.to_string(),
        status: Some(response.status),
        message: format!("unexpected response body: {}", e),
    })
}

/// Parse an endpoint taken from configuration
pub fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| PublishError::Config(format!("invalid URL '{}': {}", url, e)))
}

/// `base` with `segments` appended, each percent-encoded as a single path
/// segment.
///
/// `("https://store.example.com/v1/AUTH_x", ["images", "nightly#3"])` gives
/// `https://store.example.com/v1/AUTH_x/images/nightly%233`.
pub fn join_path(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = parse_url(base)?;
    url.path_segments_mut()
        .map_err(|_| PublishError::Config(format!("'{}' cannot carry a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Resolve a link the server returned. Relative links resolve under `base`
/// itself, not next to its last segment.
pub fn resolve_link(base: &str, link: &str) -> Result<String> {
    let base = parse_url(&format!("{}/", base.trim_end_matches('/')))?;
    base.join(link)
        .map(String::from)
        .map_err(|e| PublishError::Transport {
            method: "GET".to_string(),
            url: base.to_string(),
            status: None,
            message: format!("unusable link '{}': {}", link, e),
        })
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::ScriptedTransport;

    #[test]
    fn test_request_builder_lowercases_headers() {
        let request = HttpRequest::new(Method::Put, "https://x/images/1")
            .header("Content-Type", "application/octet-stream")
            .header("X-Image-Meta-Checksum", "abc");

        assert_eq!(
            request.headers.get("content-type").map(String::as_str),
            Some("application/octet-stream")
        );
        assert!(request.headers.contains_key("x-image-meta-checksum"));
    }

    #[test]
    fn test_json_sets_content_type() {
        let request = HttpRequest::new(Method::Post, "https://x/images")
            .json(serde_json::json!({"name": "a"}));

        assert_eq!(request.headers["content-type"], "application/json");
        assert_eq!(request.body.as_json().unwrap()["name"], "a");
    }

    #[tokio::test]
    async fn test_send_checked_maps_status_to_transport_error() {
        let transport = ScriptedTransport::new();
        transport.on(
            Method::Get,
            "https://image.example.com/v2/tasks/1",
            vec![ScriptedTransport::status_text(503, "Random error")],
        );

        let error = send_checked(
            &transport,
            HttpRequest::new(Method::Get, "https://image.example.com/v2/tasks/1"),
        )
        .await
        .unwrap_err();

        assert_eq!(error.status(), Some(503));
        assert!(error.is_transient());
        assert!(error.to_string().contains("Random error"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }

    #[test]
    fn test_join_path_escapes_segments() {
        let base = "https://object-store.example.com/v1/AUTH_x";

        let url = join_path(base, &["images", "nightly#3"]).unwrap();
        assert_eq!(url.path(), "/v1/AUTH_x/images/nightly%233");
        assert_eq!(url.fragment(), None);

        let url = join_path(base, &["images", "disk?v=2"]).unwrap();
        assert_eq!(url.as_str(), format!("{}/images/disk%3Fv=2", base));
        assert_eq!(url.query(), None);

        let url = join_path("https://image.example.com/v2/", &["images", "42 name"]).unwrap();
        assert_eq!(url.as_str(), "https://image.example.com/v2/images/42%20name");
    }

    #[test]
    fn test_join_path_rejects_garbage_endpoint() {
        let error = join_path("not a url", &["images"]).unwrap_err();
        assert_eq!(error.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_resolve_link() {
        let base = "https://image.example.com/v2";
        assert_eq!(
            resolve_link(base, "/v2/images?marker=abc").unwrap(),
            "https://image.example.com/v2/images?marker=abc"
        );
        assert_eq!(
            resolve_link(base, "https://other.example.com/v2/images").unwrap(),
            "https://other.example.com/v2/images"
        );
        assert_eq!(
            resolve_link(base, "images?marker=abc").unwrap(),
            "https://image.example.com/v2/images?marker=abc"
        );
    }

    #[test]
    fn test_decode_json_error_is_transport() {
        let response = HttpResponse {
            status: 200,
            headers: BTreeMap::new(),
            body: b"not json".to_vec(),
        };
        let result: Result<serde_json::Value> = decode_json("https://x", &response);
        assert!(matches!(result, Err(PublishError::Transport { .. })));
    }
}
