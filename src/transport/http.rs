//! reqwest-backed transport

use super::{HttpRequest, HttpResponse, HttpTransport, Method, RequestBody};
use crate::core::config::HttpConfig;
use crate::core::error::{PublishError, Result};
use crate::security::Credentials;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Header carrying the session token
const AUTH_HEADER: &str = "x-auth-token";

/// [`HttpTransport`] over a shared `reqwest::Client`
pub struct ReqwestTransport {
    client: reqwest::Client,
    credentials: Credentials,
}

impl ReqwestTransport {
    pub fn new(config: &HttpConfig, credentials: Credentials) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("image-publisher/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));

        if config.request_timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.request_timeout_secs));
        }

        let client = builder
            .build()
            .map_err(|e| PublishError::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            credentials,
        })
    }

    async fn build_body(request: &HttpRequest) -> Result<reqwest::Body> {
        let body = match &request.body {
            RequestBody::Empty => reqwest::Body::from(Vec::new()),
            RequestBody::Json(value) => reqwest::Body::from(serde_json::to_vec(value).map_err(
                |e| PublishError::validation("body", format!("cannot encode JSON: {}", e)),
            )?),
            RequestBody::Bytes(bytes) => reqwest::Body::from(bytes.clone()),
            RequestBody::File {
                path,
                offset,
                length,
            } => {
                let io_error = |source| PublishError::Io {
                    path: path.clone(),
                    source,
                };
                let mut file = tokio::fs::File::open(path).await.map_err(io_error)?;
                file.seek(std::io::SeekFrom::Start(*offset))
                    .await
                    .map_err(io_error)?;
                reqwest::Body::wrap_stream(ReaderStream::new(file.take(*length)))
            }
        };
        Ok(body)
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(Self::method(request.method), &request.url);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let RequestBody::File { length, .. } = &request.body {
            builder = builder.header(reqwest::header::CONTENT_LENGTH, *length);
        }
        if let Some(token) = self.credentials.token() {
            builder = builder.header(AUTH_HEADER, token.expose_secret());
        }

        let transport_error = |message: String| PublishError::Transport {
            method: request.method.to_string(),
            url: request.url.clone(),
            status: None,
            message,
        };

        if request.body != RequestBody::Empty {
            builder = builder.body(Self::build_body(&request).await?);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(e.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
