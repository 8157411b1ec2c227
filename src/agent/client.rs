use super::{AgentTransport, ByteStream, Event};
use crate::models::RunRequest;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde_json::{Map, Value};
use std::time::Duration;

/// REST client for the agent backend's `/run`, `/run_sse` and session APIs.
pub struct AgentHttpClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl AgentHttpClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self::new_with_client(base_url, timeout, Client::new())
    }

    pub fn new_with_client(base_url: String, timeout: Duration, client: Client) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fail with [`Error::Transport`] on any non-2xx status, keeping the body.
    async fn ensure_success(response: Response, endpoint: &str) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::error!("Agent {} error (status {}): {}", endpoint, status, body);
        Err(Error::Transport {
            status: status.as_u16(),
            body,
        })
    }
}

/// Parse a `/run` body: an event array, or a single bare event.
pub fn parse_run_body(body: &str) -> Result<Vec<Event>> {
    match serde_json::from_str::<Value>(body)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(Error::from))
            .collect(),
        object @ Value::Object(_) => Ok(vec![serde_json::from_value(object)?]),
        other => Err(Error::Generic(format!(
            "Unexpected /run response: expected an event array, got {}",
            other
        ))),
    }
}

#[async_trait]
impl AgentTransport for AgentHttpClient {
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
        state: Option<&Map<String, Value>>,
    ) -> Result<()> {
        let url = format!(
            "{}/apps/{}/users/{}/sessions/{}",
            self.base_url,
            urlencoding::encode(app_name),
            urlencoding::encode(user_id),
            urlencoding::encode(session_id)
        );
        let body = Value::Object(state.cloned().unwrap_or_default());

        tracing::debug!("Creating agent session {}", session_id);

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send session request to agent: {}", e);
                e
            })?;

        let status = response.status();
        if status == StatusCode::CONFLICT || status == StatusCode::BAD_REQUEST {
            let text = response.text().await.unwrap_or_default();
            if status == StatusCode::CONFLICT || text.to_lowercase().contains("already exists") {
                tracing::debug!("Session {} already exists", session_id);
                return Ok(());
            }
            tracing::error!("Agent session error (status {}): {}", status, text);
            return Err(Error::Transport {
                status: status.as_u16(),
                body: text,
            });
        }

        Self::ensure_success(response, "session").await?;
        Ok(())
    }

    async fn run(&self, request: &RunRequest) -> Result<Vec<Event>> {
        tracing::debug!("Sending /run request for session {}", request.session_id);

        let response = self
            .client
            .post(format!("{}/run", self.base_url))
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send /run request to agent: {}", e);
                e
            })?;

        let body = Self::ensure_success(response, "/run").await?.text().await?;
        parse_run_body(&body).map_err(|e| {
            tracing::error!("Failed to parse /run response: {}\nBody: {}", e, body);
            e
        })
    }

    async fn open_stream(&self, request: &RunRequest) -> Result<ByteStream> {
        tracing::debug!("Opening /run_sse stream for session {}", request.session_id);

        // The timeout only bounds the wait for response headers; the body
        // may legitimately stream for longer.
        let send = self
            .client
            .post(format!("{}/run_sse", self.base_url))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| {
                Error::Stream(format!(
                    "Timed out after {:?} waiting for /run_sse response",
                    self.timeout
                ))
            })?
            .map_err(|e| {
                tracing::error!("Failed to send /run_sse request to agent: {}", e);
                e
            })?;

        let response = Self::ensure_success(response, "/run_sse").await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::Stream(e.to_string())))
            .boxed())
    }
}
