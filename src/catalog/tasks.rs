//! Asynchronous import tasks

use crate::catalog::client::CatalogClient;
use crate::core::error::{PublishError, Result};
use crate::core::poll::{Deadline, PollOptions, PollStatus, Poller};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a server-side import task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Success,
    Failure,
    #[serde(other)]
    Unknown,
}

/// An import task as reported by the catalog. Never mutated locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTask {
    pub id: String,

    #[serde(rename = "type", default)]
    pub task_type: String,

    pub status: TaskStatus,

    #[serde(default)]
    pub input: Value,

    #[serde(default)]
    pub result: Option<Value>,

    #[serde(default)]
    pub message: String,
}

impl UploadTask {
    /// Identifier of the record the task produced, when the deployment says
    pub fn image_id(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|result| result.get("image_id"))
            .and_then(Value::as_str)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, TaskStatus::Success | TaskStatus::Failure)
    }
}

/// Follows an import task until it finishes
pub struct TaskPoller<'a> {
    client: &'a CatalogClient,
    poller: Poller,
}

impl<'a> TaskPoller<'a> {
    pub fn new(client: &'a CatalogClient, options: PollOptions) -> Self {
        Self {
            client,
            poller: Poller::new(options),
        }
    }

    /// Poll `task_id` until success, failure, or the deadline.
    ///
    /// 5xx and 429 answers count as "still running". A reported failure
    /// becomes [`PublishError::ImportFailed`] with the task's own message.
    pub async fn wait(&self, task_id: &str, deadline: &Deadline) -> Result<UploadTask> {
        let what = format!("import task {}", task_id);
        let client = self.client;

        let task = self
            .poller
            .poll(&what, deadline, move || async move {
                let task = client.get_task(task_id).await?;
                tracing::debug!(task_id, status = ?task.status, "polled import task");
                if task.is_finished() {
                    Ok(PollStatus::Ready(task))
                } else {
                    Ok(PollStatus::Pending)
                }
            })
            .await?;

        match task.status {
            TaskStatus::Success => {
                tracing::info!(task_id, image_id = task.image_id(), "import task succeeded");
                Ok(task)
            }
            _ => Err(PublishError::ImportFailed {
                task_id: task.id.clone(),
                message: if task.message.is_empty() {
                    "no reason given".to_string()
                } else {
                    task.message.clone()
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ApiVersion;
    use crate::transport::Method;
    use crate::transport::mock::ScriptedTransport;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const TASKS: &str = "https://image.example.com/v2/tasks/t-1";

    fn setup(responses: Vec<crate::transport::HttpResponse>) -> (Arc<ScriptedTransport>, CatalogClient) {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on(Method::Get, TASKS, responses);
        let client = CatalogClient::new(
            transport.clone(),
            "https://image.example.com/v2",
            ApiVersion::V2,
        );
        (transport, client)
    }

    fn options() -> PollOptions {
        PollOptions {
            interval: Duration::from_millis(10),
        }
    }

    fn task(status: &str) -> Value {
        json!({
            "id": "t-1",
            "type": "import",
            "status": status,
            "result": {"image_id": "img-1"}
        })
    }

    #[test]
    fn test_task_deserialize() {
        let task: UploadTask = serde_json::from_value(json!({
            "id": "t-1",
            "type": "import",
            "status": "weird",
        }))
        .unwrap();

        assert_eq!(task.status, TaskStatus::Unknown);
        assert!(task.image_id().is_none());
        assert!(!task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let (transport, client) = setup(vec![
            ScriptedTransport::status_text(503, "Random error"),
            ScriptedTransport::json(200, task("processing")),
            ScriptedTransport::json(200, task("success")),
        ]);

        let deadline = Deadline::after(Duration::from_secs(5));
        let task = TaskPoller::new(&client, options())
            .wait("t-1", &deadline)
            .await
            .unwrap();

        assert_eq!(task.image_id(), Some("img-1"));
        assert_eq!(transport.count(Method::Get, TASKS), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_import_failed() {
        let mut failed = task("failure");
        failed["message"] = json!("Image format not supported");
        let (_, client) = setup(vec![ScriptedTransport::json(200, failed)]);

        let deadline = Deadline::after(Duration::from_secs(5));
        let error = TaskPoller::new(&client, options())
            .wait("t-1", &deadline)
            .await
            .unwrap_err();

        match error {
            PublishError::ImportFailed { task_id, message } => {
                assert_eq!(task_id, "t-1");
                assert_eq!(message, "Image format not supported");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_finishing_times_out() {
        let (_, client) = setup(vec![ScriptedTransport::json(200, task("pending"))]);

        let deadline = Deadline::after(Duration::from_secs(1));
        let error = TaskPoller::new(&client, options())
            .wait("t-1", &deadline)
            .await
            .unwrap_err();

        assert!(matches!(error, PublishError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_503_times_out() {
        let (_, client) = setup(vec![ScriptedTransport::status(503)]);

        let deadline = Deadline::after(Duration::from_secs(1));
        let error = TaskPoller::new(&client, options())
            .wait("t-1", &deadline)
            .await
            .unwrap_err();

        assert_eq!(error.code(), "TIMEOUT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_propagates() {
        let (transport, client) = setup(vec![ScriptedTransport::status(404)]);

        let deadline = Deadline::after(Duration::from_secs(5));
        let error = TaskPoller::new(&client, options())
            .wait("t-1", &deadline)
            .await
            .unwrap_err();

        assert_eq!(error.status(), Some(404));
        assert_eq!(transport.count(Method::Get, TASKS), 1);
    }
}
