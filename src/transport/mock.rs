//! Scripted transport for tests
//!
//! Routes are keyed by method and full URL (query string included). Each
//! route answers from a queue; once only one response is left it keeps being
//! returned. Every request is recorded, so tests can assert exact call
//! sequences or that nothing was sent at all.

use super::{HttpRequest, HttpResponse, HttpTransport, Method, RequestBody};
use crate::core::error::{PublishError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

/// A request as it was sent, with file bodies resolved to their bytes
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub json: Option<serde_json::Value>,
    pub bytes: Option<Vec<u8>>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<HttpResponse>>>,
    history: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the response queue for `method url`
    pub fn on(&self, method: Method, url: &str, responses: Vec<HttpResponse>) {
        self.routes
            .lock()
            .unwrap()
            .insert((method, url.to_string()), responses.into());
    }

    pub fn json(status: u16, body: serde_json::Value) -> HttpResponse {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        HttpResponse {
            status,
            headers,
            body: serde_json::to_vec(&body).unwrap(),
        }
    }

    pub fn status(status: u16) -> HttpResponse {
        HttpResponse {
            status,
            ..Default::default()
        }
    }

    pub fn status_text(status: u16, text: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: BTreeMap::new(),
            body: text.as_bytes().to_vec(),
        }
    }

    pub fn with_headers(mut response: HttpResponse, headers: &[(&str, &str)]) -> HttpResponse {
        for (name, value) in headers {
            response
                .headers
                .insert(name.to_ascii_lowercase(), value.to_string());
        }
        response
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.history.lock().unwrap().clone()
    }

    /// `(METHOD, url)` pairs in send order
    pub fn calls(&self) -> Vec<(String, String)> {
        self.requests()
            .into_iter()
            .map(|r| (r.method.to_string(), r.url))
            .collect()
    }

    pub fn count(&self, method: Method, url: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }

    fn record(&self, request: &HttpRequest) {
        let (json, bytes) = match &request.body {
            RequestBody::Empty => (None, None),
            RequestBody::Json(value) => (Some(value.clone()), None),
            RequestBody::Bytes(bytes) => (None, Some(bytes.clone())),
            RequestBody::File {
                path,
                offset,
                length,
            } => {
                let content = std::fs::read(path).unwrap_or_default();
                let start = (*offset as usize).min(content.len());
                let end = (start + *length as usize).min(content.len());
                (None, Some(content[start..end].to_vec()))
            }
        };

        self.history.lock().unwrap().push(RecordedRequest {
            method: request.method,
            url: request.url.clone(),
            headers: request.headers.clone(),
            json,
            bytes,
        });
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.record(&request);

        let mut routes = self.routes.lock().unwrap();
        let Some(queue) = routes.get_mut(&(request.method, request.url.clone())) else {
            return Err(PublishError::Transport {
                method: request.method.to_string(),
                url: request.url,
                status: None,
                message: "no scripted route".to_string(),
            });
        };

        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(response.unwrap_or_else(|| Self::status(200)))
    }
}
