use super::{AgentTransport, ByteStream, Event};
use crate::models::RunRequest;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

/// One scripted element of a mock stream body.
#[derive(Debug, Clone)]
pub enum MockChunk {
    Data(Bytes),
    /// Fails the read with [`Error::Stream`].
    Error(String),
}

impl MockChunk {
    pub fn text(text: &str) -> Self {
        MockChunk::Data(Bytes::copy_from_slice(text.as_bytes()))
    }
}

#[derive(Clone)]
pub struct MockAgentClient {
    run_responses: Arc<Mutex<Vec<Vec<Event>>>>,
    stream_chunks: Arc<Mutex<Vec<MockChunk>>>,
    hang_after_chunks: bool,
    failure: Option<(u16, String)>,
    requests: Arc<Mutex<Vec<RunRequest>>>,
    sessions: Arc<Mutex<Vec<String>>>,
    session_failures: Arc<Mutex<usize>>,
}

impl MockAgentClient {
    pub fn new() -> Self {
        Self {
            run_responses: Arc::new(Mutex::new(Vec::new())),
            stream_chunks: Arc::new(Mutex::new(Vec::new())),
            hang_after_chunks: false,
            failure: None,
            requests: Arc::new(Mutex::new(Vec::new())),
            sessions: Arc::new(Mutex::new(Vec::new())),
            session_failures: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_run_response(self, events: Vec<Event>) -> Self {
        self.run_responses.lock().unwrap().push(events);
        self
    }

    pub fn with_stream_chunk(self, chunk: MockChunk) -> Self {
        self.stream_chunks.lock().unwrap().push(chunk);
        self
    }

    pub fn with_stream_text(self, text: &str) -> Self {
        self.with_stream_chunk(MockChunk::text(text))
    }

    /// Keep the stream open forever after the scripted chunks.
    pub fn hanging(mut self) -> Self {
        self.hang_after_chunks = true;
        self
    }

    /// Fail every call with a transport error.
    pub fn failing(mut self, status: u16, body: &str) -> Self {
        self.failure = Some((status, body.to_string()));
        self
    }

    /// Fail the next `count` session creations with a 503.
    pub fn with_session_failures(self, count: usize) -> Self {
        *self.session_failures.lock().unwrap() = count;
        self
    }

    /// Session ids of every create-session attempt, failed ones included.
    pub fn get_sessions(&self) -> Vec<String> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn get_requests(&self) -> Vec<RunRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, request: &RunRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.failure {
            Some((status, body)) => Err(Error::Transport {
                status: *status,
                body: body.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl Default for MockAgentClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentTransport for MockAgentClient {
    async fn create_session(
        &self,
        _app_name: &str,
        _user_id: &str,
        session_id: &str,
        _state: Option<&Map<String, Value>>,
    ) -> Result<()> {
        self.sessions.lock().unwrap().push(session_id.to_string());

        let mut failures = self.session_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(Error::Transport {
                status: 503,
                body: "session service unavailable".to_string(),
            });
        }
        Ok(())
    }

    async fn run(&self, request: &RunRequest) -> Result<Vec<Event>> {
        self.record(request)?;

        let responses = self.run_responses.lock().unwrap();
        if responses.is_empty() {
            Ok(vec![Event {
                turn_complete: true,
                ..Event::with_text(format!(
                    "Echo: {}",
                    request
                        .new_message
                        .parts
                        .iter()
                        .filter_map(|p| p.text.as_deref())
                        .collect::<Vec<_>>()
                        .join(" ")
                ))
            }])
        } else {
            let index = (self.get_requests().len() - 1) % responses.len();
            Ok(responses[index].clone())
        }
    }

    async fn open_stream(&self, request: &RunRequest) -> Result<ByteStream> {
        self.record(request)?;

        let chunks: Vec<Result<Bytes>> = self
            .stream_chunks
            .lock()
            .unwrap()
            .iter()
            .map(|chunk| match chunk {
                MockChunk::Data(bytes) => Ok(bytes.clone()),
                MockChunk::Error(message) => Err(Error::Stream(message.clone())),
            })
            .collect();

        let body = stream::iter(chunks);
        if self.hang_after_chunks {
            Ok(body.chain(stream::pending()).boxed())
        } else {
            Ok(body.boxed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_run_echoes_message() {
        let client = MockAgentClient::new();
        let events = client
            .run(&RunRequest::user_text("app", "u", "s", "ping"))
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert!(events[0].turn_complete);
        assert_eq!(events[0].parts()[0].text.as_deref(), Some("Echo: ping"));
    }

    #[tokio::test]
    async fn test_custom_run_responses_cycle() {
        let client = MockAgentClient::new()
            .with_run_response(vec![Event::with_text("one")])
            .with_run_response(vec![Event::with_text("two")]);
        let request = RunRequest::user_text("app", "u", "s", "x");

        let first = client.run(&request).await.unwrap();
        let second = client.run(&request).await.unwrap();
        let third = client.run(&request).await.unwrap();

        assert_eq!(first[0].parts()[0].text.as_deref(), Some("one"));
        assert_eq!(second[0].parts()[0].text.as_deref(), Some("two"));
        assert_eq!(third, first);
        assert_eq!(client.get_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_stream_replays_chunks() {
        let client = MockAgentClient::new()
            .with_stream_text("data: {\"a\"")
            .with_stream_text(":1}\n\n");
        let mut stream = client
            .open_stream(&RunRequest::user_text("app", "u", "s", "x"))
            .await
            .unwrap();

        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, b"data: {\"a\":1}\n\n");
    }

    #[tokio::test]
    async fn test_hanging_stream_stays_open_after_chunks() {
        let client = MockAgentClient::new()
            .with_stream_text("data: {}\n\n")
            .hanging();
        let mut stream = client
            .open_stream(&RunRequest::user_text("app", "u", "s", "x"))
            .await
            .unwrap();

        assert!(stream.next().await.unwrap().is_ok());

        let mut next = tokio_test::task::spawn(stream.next());
        tokio_test::assert_pending!(next.poll());
    }

    #[tokio::test]
    async fn test_session_failures_are_consumed() {
        let client = MockAgentClient::new().with_session_failures(1);

        assert!(client.create_session("app", "u", "s", None).await.is_err());
        assert!(client.create_session("app", "u", "s", None).await.is_ok());
        assert_eq!(client.get_sessions(), vec!["s".to_string(), "s".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_client() {
        let client = MockAgentClient::new().failing(503, "unavailable");
        let err = client
            .run(&RunRequest::user_text("app", "u", "s", "x"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
    }
}
