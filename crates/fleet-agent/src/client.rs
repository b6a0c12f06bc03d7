use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use tracing::debug;

use fleet_core::{PollReply, TaskResult, WorkerError};

use crate::config::AgentConfig;

pub const WORKER_ID_HEADER: &str = "X-Worker-ID";
pub const WORKER_VERSION_HEADER: &str = "X-Worker-Version";

/// Thin wrapper over the task server's two endpoints. Identity and version
/// ride along as headers on every request.
pub struct ServerClient {
    http: reqwest::Client,
    base_url: String,
    poll_timeout: Duration,
    submit_timeout: Duration,
}

impl ServerClient {
    pub fn new(config: &AgentConfig, worker_id: &str, version: &str) -> Result<Self, WorkerError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            WORKER_ID_HEADER,
            HeaderValue::from_str(worker_id)
                .map_err(|e| WorkerError::Transport(format!("worker id not header-safe: {e}")))?,
        );
        headers.insert(
            WORKER_VERSION_HEADER,
            HeaderValue::from_str(version)
                .map_err(|e| WorkerError::Transport(format!("version not header-safe: {e}")))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| WorkerError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            poll_timeout: config.poll_timeout,
            submit_timeout: config.submit_timeout,
        })
    }

    /// Ask the server for the next unit of work.
    pub async fn fetch_task(&self) -> Result<PollReply, WorkerError> {
        debug!("Polling {}/get_task", self.base_url);

        let response = self
            .http
            .get(format!("{}/get_task", self.base_url))
            .timeout(self.poll_timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| WorkerError::Transport(e.to_string()))?;

        response
            .json::<PollReply>()
            .await
            .map_err(|e| WorkerError::Transport(format!("unreadable poll reply: {e}")))
    }

    /// Report one task's outcome.
    pub async fn submit_result(&self, result: &TaskResult) -> Result<(), WorkerError> {
        self.http
            .post(format!("{}/submit_result", self.base_url))
            .timeout(self.submit_timeout)
            .json(result)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| WorkerError::Transport(e.to_string()))?;
        Ok(())
    }
}
