//! Webhook delivery on terminal job transitions
//!
//! Delivery is at-least-once with bounded retry: one initial attempt plus
//! one retry per schedule entry, sleeping the entry's delay first. A 2xx
//! stops; any 4xx other than 408/429 is a permanent failure. Delivery is
//! fire-and-forget from the job's perspective and never changes its status.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::jobs::job::{Job, JobStatus, WebhookConfig, WebhookMethod};

/// Timestamps and timing for the webhook payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMetadata {
    pub created_at: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,

    pub execution_time: u64,
}

/// The JSON body posted to the webhook. `result` and `error` are mutually
/// exclusive.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub job_id: String,
    pub workflow_id: String,
    pub status: JobStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub metadata: WebhookMetadata,
}

impl WebhookPayload {
    /// Build the payload from a terminal job.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            workflow_id: job.workflow_id.clone(),
            status: job.status,
            result: job.result.clone(),
            error: job.error.clone(),
            metadata: WebhookMetadata {
                created_at: job.created_at.to_rfc3339(),
                started_at: job.started_at.map(|t| t.to_rfc3339()),
                completed_at: job.completed_at.map(|t| t.to_rfc3339()),
                execution_time: job.execution_time_ms.unwrap_or(0),
            },
        }
    }
}

/// Delivers webhook payloads with bounded retry.
pub struct WebhookDispatcher {
    client: Client,
    retry_schedule: Vec<Duration>,
}

impl WebhookDispatcher {
    pub fn new(retry_schedule: Vec<Duration>) -> Self {
        Self {
            client: Client::new(),
            retry_schedule,
        }
    }

    /// Deliver the payload, retrying on transient failures.
    pub async fn deliver(
        &self,
        config: &WebhookConfig,
        payload: &WebhookPayload,
    ) -> Result<(), EngineError> {
        let attempts = self.retry_schedule.len() + 1;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry_schedule[attempt - 1]).await;
            }

            match self.send(config, payload).await {
                Ok(status) if status.is_success() => {
                    info!(job_id = %payload.job_id, url = %config.url, attempt, "webhook delivered");
                    return Ok(());
                }
                Ok(status) if is_permanent(status) => {
                    warn!(job_id = %payload.job_id, url = %config.url, %status, "webhook rejected permanently");
                    return Err(EngineError::Webhook(format!(
                        "permanent failure: {}",
                        status
                    )));
                }
                Ok(status) => {
                    warn!(job_id = %payload.job_id, url = %config.url, %status, attempt, "webhook attempt failed");
                }
                Err(e) => {
                    warn!(job_id = %payload.job_id, url = %config.url, error = %e, attempt, "webhook attempt failed");
                }
            }
        }

        Err(EngineError::Webhook(format!(
            "delivery to {} failed after {} attempts",
            config.url, attempts
        )))
    }

    async fn send(
        &self,
        config: &WebhookConfig,
        payload: &WebhookPayload,
    ) -> Result<reqwest::StatusCode, reqwest::Error> {
        let mut request = match config.method {
            WebhookMethod::Post => self.client.post(&config.url),
            WebhookMethod::Put => self.client.put(&config.url),
        };
        for (name, value) in &config.headers {
            request = request.header(name, value);
        }
        let response = request.json(payload).send().await?;
        Ok(response.status())
    }
}

/// 4xx responses other than 408 (timeout) and 429 (rate limit) will not
/// succeed on retry.
fn is_permanent(status: reqwest::StatusCode) -> bool {
    status.is_client_error()
        && status != reqwest::StatusCode::REQUEST_TIMEOUT
        && status != reqwest::StatusCode::TOO_MANY_REQUESTS
}
