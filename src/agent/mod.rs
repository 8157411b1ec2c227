//! Agent backend integration
//!
//! Provides the wire types exchanged with the agent backend and the
//! transports that carry them: a reqwest client for the HTTP API and an
//! in-memory mock for tests.

pub mod client;
pub mod mock;
pub mod types;

pub use client::AgentHttpClient;
pub use mock::{MockAgentClient, MockChunk};
pub use types::{Content, Event, Part};

use crate::models::RunRequest;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

/// Raw response body of a streaming run.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Ensure a conversation session exists; an existing session is not an error.
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
        state: Option<&Map<String, Value>>,
    ) -> Result<()>;

    /// Buffered mode: the full event list for one run.
    async fn run(&self, request: &RunRequest) -> Result<Vec<Event>>;

    /// Streaming mode: the undecoded event-stream body for one run.
    async fn open_stream(&self, request: &RunRequest) -> Result<ByteStream>;
}
