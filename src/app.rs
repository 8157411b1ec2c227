//! Application orchestration for chat turns against the agent backend.

use crate::agent::{AgentHttpClient, AgentTransport, Event};
use crate::models::{Config, RunRequest};
use crate::response::{process, ProcessedResponse, ResponseAccumulator};
use crate::stream::{SessionState, StreamObserver, StreamSession};
use crate::{Error, Result};
use chrono::Local;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

const SESSION_RETRY_ATTEMPTS: usize = 3;
const SESSION_RETRY_INTERVAL: Duration = Duration::from_millis(2000);

/// Per-turn options shared by buffered and streaming sends.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Fold partial events into the response as well.
    pub include_partial: bool,
    pub state_delta: Option<Map<String, Value>>,
}

/// One user/session conversation with a single agent app.
pub struct App {
    transport: Box<dyn AgentTransport>,
    app_name: String,
    user_id: String,
    session_id: String,
    artifact_dir: Option<PathBuf>,
    retry_interval: Duration,
}

impl App {
    /// Build an app around any transport.
    ///
    /// Tests use this to inject [`crate::agent::MockAgentClient`].
    pub fn with_transport(
        transport: Box<dyn AgentTransport>,
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            artifact_dir: None,
            retry_interval: SESSION_RETRY_INTERVAL,
        }
    }

    /// Construct an app talking HTTP to the backend described by `config`.
    pub fn from_config(config: &Config) -> Self {
        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        info!(
            "Agent app '{}' at {} (user: {}, session: {})",
            config.app_name, config.base_url, config.user_id, session_id
        );

        let client = AgentHttpClient::new(config.base_url.clone(), config.timeout);
        let mut app = Self::with_transport(
            Box::new(client),
            config.app_name.clone(),
            config.user_id.clone(),
            session_id,
        );
        app.artifact_dir = config.artifact_dir.clone();
        app
    }

    pub fn with_artifact_dir(mut self, dir: PathBuf) -> Self {
        self.artifact_dir = Some(dir);
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Create the session if it does not exist yet, retrying transient failures.
    pub async fn ensure_session(&self, state: Option<&Map<String, Value>>) -> Result<()> {
        let strategy = FixedInterval::new(self.retry_interval).take(SESSION_RETRY_ATTEMPTS);

        RetryIf::spawn(
            strategy,
            move || async move {
                self.transport
                    .create_session(&self.app_name, &self.user_id, &self.session_id, state)
                    .await
                    .map_err(|e| {
                        warn!("Session setup attempt failed: {}", e);
                        e
                    })
            },
            is_transient,
        )
        .await?;

        info!("Session {} ready", self.session_id);
        Ok(())
    }

    /// Send one message in buffered mode and reduce the returned events.
    pub async fn send(&self, text: &str, options: SendOptions) -> Result<ProcessedResponse> {
        let request = self.request(text, false, options.state_delta);
        let events = self.transport.run(&request).await?;
        info!("Received {} events from /run", events.len());
        Ok(process(&events, options.include_partial))
    }

    /// Send one message in streaming mode.
    ///
    /// `on_text` receives user-visible text as it arrives. Returns `None` when
    /// the stream was cancelled through `cancel`.
    pub async fn send_streaming<F>(
        &self,
        text: &str,
        options: SendOptions,
        cancel: CancellationToken,
        on_text: F,
    ) -> Result<Option<ProcessedResponse>>
    where
        F: FnMut(&str) + Send,
    {
        let request = self.request(text, true, options.state_delta);
        let mut observer = LiveObserver::new(options.include_partial, on_text);

        let summary = StreamSession::with_cancellation(cancel)
            .run(self.transport.as_ref(), &request, &mut observer)
            .await;

        match summary.state {
            SessionState::Completed => Ok(Some(observer.accumulator.finish())),
            SessionState::Cancelled => {
                info!("Stream cancelled after {} events", summary.events);
                Ok(None)
            }
            SessionState::Failed => Err(observer
                .error
                .take()
                .unwrap_or_else(|| Error::Stream("stream failed".to_string()))),
            other => Err(Error::Generic(format!(
                "stream session ended in non-terminal state {:?}",
                other
            ))),
        }
    }

    /// Write decoded images under `{artifact_dir}/{date}_{session}/`.
    ///
    /// Returns the written paths; does nothing without an artifact directory.
    pub fn save_artifacts(&self, response: &ProcessedResponse) -> Result<Vec<PathBuf>> {
        let (Some(base), Some(artifacts)) = (&self.artifact_dir, &response.artifacts) else {
            return Ok(Vec::new());
        };
        if artifacts.images.is_empty() {
            return Ok(Vec::new());
        }

        let date = Local::now().format("%Y-%m-%d").to_string();
        let dir = base.join(format!("{}_{}", date, self.session_id));
        fs::create_dir_all(&dir)?;

        let mut written = Vec::new();
        for (index, image) in artifacts.images.iter().enumerate() {
            let Some(bytes) = image.bytes() else {
                warn!(
                    "Image {} ({}) could not be decoded, not saving it",
                    index + 1,
                    image.mime_type()
                );
                continue;
            };

            // Display names come from the backend; never let them leave `dir`.
            let name = image.file_name(index);
            let name = Path::new(&name)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("image-{}", index + 1));

            let path = dir.join(name);
            fs::write(&path, bytes)?;
            info!("Saved image artifact: {}", path.display());
            written.push(path);
        }
        Ok(written)
    }

    fn request(
        &self,
        text: &str,
        streaming: bool,
        state_delta: Option<Map<String, Value>>,
    ) -> RunRequest {
        let request =
            RunRequest::user_text(&self.app_name, &self.user_id, &self.session_id, text)
                .with_streaming(streaming);
        match state_delta {
            Some(delta) => request.with_state_delta(delta),
            None => request,
        }
    }
}

fn is_transient(error: &Error) -> bool {
    match error {
        Error::Http(_) | Error::Stream(_) => true,
        Error::Transport { status, .. } => *status >= 500 || *status == 429,
        _ => false,
    }
}

/// Folds events into a response while forwarding visible text to a callback.
///
/// Partial events carry text deltas; when the backend sends none, text from
/// the final events is forwarded instead.
struct LiveObserver<F> {
    accumulator: ResponseAccumulator,
    on_text: F,
    saw_partial: bool,
    error: Option<Error>,
}

impl<F> LiveObserver<F>
where
    F: FnMut(&str) + Send,
{
    fn new(include_partial: bool, on_text: F) -> Self {
        Self {
            accumulator: ResponseAccumulator::new(include_partial),
            on_text,
            saw_partial: false,
            error: None,
        }
    }
}

impl<F> StreamObserver for LiveObserver<F>
where
    F: FnMut(&str) + Send,
{
    fn on_event(&mut self, event: &Event) {
        self.accumulator.apply(event);

        if event.partial {
            self.saw_partial = true;
        } else if self.saw_partial {
            return;
        }

        for part in event.parts() {
            if part.is_thought() {
                continue;
            }
            if let Some(text) = part.text.as_deref() {
                (self.on_text)(text);
            }
        }
    }

    fn on_error(&mut self, error: Error) {
        self.error = Some(error);
    }
}
