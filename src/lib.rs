//! Client for a conversational agent backend
//!
//! Sends user messages to the agent over its buffered (`/run`) or streaming
//! (`/run_sse`) API, reassembles streamed JSON events, and reduces the event
//! list into a single displayable response with text, images, tool activity
//! and code execution results.

pub mod agent;
pub mod app;
pub mod error;
pub mod models;
pub mod response;
pub mod stream;

pub use error::{Error, Result};
