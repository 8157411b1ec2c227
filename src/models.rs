//! Data models and structures
//!
//! Defines the outbound run request sent to the agent backend and the
//! environment-driven client configuration.

use crate::agent::types::Part;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_USER_ID: &str = "user";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewMessage {
    pub parts: Vec<Part>,
    pub role: String,
}

/// Body of both `/run` and `/run_sse`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub new_message: NewMessage,
    pub streaming: bool,
    pub state_delta: Option<Map<String, Value>>,
}

impl RunRequest {
    /// Build a request carrying one user text part.
    pub fn user_text(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            new_message: NewMessage {
                parts: vec![Part::text(text)],
                role: "user".to_string(),
            },
            streaming: false,
            state_delta: None,
        }
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_state_delta(mut self, state_delta: Map<String, Value>) -> Self {
        self.state_delta = Some(state_delta);
        self
    }
}

// Configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub app_name: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub timeout: Duration,
    pub artifact_dir: Option<PathBuf>,
}

/// Values that take precedence over the environment, typically from the CLI.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub app_name: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl ConfigOverrides {
    fn get(&self, key: &str) -> Option<String> {
        match key {
            "AGENT_APP_NAME" => self.app_name.clone(),
            "AGENT_USER_ID" => self.user_id.clone(),
            "AGENT_SESSION_ID" => self.session_id.clone(),
            _ => None,
        }
    }

    /// A lookup that answers from the overrides first, then from `fallback`.
    pub fn layered<'a, F>(&'a self, fallback: F) -> impl Fn(&str) -> Option<String> + 'a
    where
        F: Fn(&str) -> Option<String> + 'a,
    {
        move |key| self.get(key).or_else(|| fallback(key))
    }
}

impl Config {
    /// Load `.env`, then read the process environment under `overrides`.
    pub fn from_env(overrides: &ConfigOverrides) -> crate::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(overrides.layered(|key| std::env::var(key).ok()))
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let timeout_secs = match non_empty("AGENT_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                crate::Error::Config(format!(
                    "AGENT_TIMEOUT_SECS must be a whole number of seconds, got '{}'",
                    raw
                ))
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            base_url: non_empty("AGENT_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            app_name: non_empty("AGENT_APP_NAME")
                .ok_or_else(|| crate::Error::Config("AGENT_APP_NAME not set".to_string()))?,
            user_id: non_empty("AGENT_USER_ID").unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            session_id: non_empty("AGENT_SESSION_ID"),
            timeout: Duration::from_secs(timeout_secs),
            artifact_dir: non_empty("AGENT_ARTIFACT_DIR").map(PathBuf::from),
        })
    }
}
