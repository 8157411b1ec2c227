use agent_chat_client::app::{App, SendOptions};
use agent_chat_client::models::{Config, ConfigOverrides};
use agent_chat_client::response::ProcessedResponse;
use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Map, Value};
use std::io::Write;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "agent-chat-client")]
#[command(about = "Send a message to an agent backend and print its response")]
struct CliArgs {
    /// Message text to send.
    #[arg(value_name = "MESSAGE")]
    message: String,

    /// Use the streaming endpoint and print text as it arrives.
    #[arg(long)]
    stream: bool,

    /// Fold partial events into the final response.
    #[arg(long)]
    include_partial: bool,

    /// Print the processed response as JSON.
    #[arg(long)]
    json: bool,

    /// Agent app name (overrides AGENT_APP_NAME).
    #[arg(long)]
    app: Option<String>,

    /// User id (overrides AGENT_USER_ID).
    #[arg(long)]
    user: Option<String>,

    /// Session id (overrides AGENT_SESSION_ID).
    #[arg(long)]
    session: Option<String>,

    /// Session state delta as a JSON object.
    #[arg(long, value_name = "JSON", value_parser = parse_state_arg)]
    state: Option<Map<String, Value>>,
}

fn parse_state_arg(input: &str) -> std::result::Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(input) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(format!("State '{}' must be a JSON object", input)),
        Err(e) => Err(format!("Invalid state JSON '{}': {}", input, e)),
    }
}

impl CliArgs {
    fn config_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            app_name: self.app.clone(),
            user_id: self.user.clone(),
            session_id: self.session.clone(),
        }
    }
}

fn print_response(
    response: &ProcessedResponse,
    as_json: bool,
    text_already_shown: bool,
) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    if !text_already_shown && !response.text_content.is_empty() {
        println!("{}", response.text_content);
    }

    if let Some(tools) = &response.tool_activity {
        for (call, result) in tools.pairs() {
            let status = if result.is_some() { "done" } else { "pending" };
            println!("[tool] {} ({})", call.name, status);
        }
    }
    if let Some(blocks) = &response.code_activity {
        for block in blocks {
            println!("[code:{}]\n{}", block.language, block.code);
            if let Some(result) = &block.result {
                println!("[result] {}", result);
            }
        }
    }
    if let Some(message) = &response.metadata.error_message {
        println!("[error] {}", message);
    }
    Ok(())
}

async fn run(args: CliArgs) -> Result<()> {
    let config = Config::from_env(&args.config_overrides())
        .context("Failed to load configuration")?;
    let app = App::from_config(&config);

    app.ensure_session(None)
        .await
        .context("Failed to create agent session")?;

    let options = SendOptions {
        include_partial: args.include_partial,
        state_delta: args.state.clone(),
    };

    let (response, streamed) = if args.stream {
        let cancel = CancellationToken::new();
        let on_ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling stream");
                on_ctrl_c.cancel();
            }
        });

        let print_live = !args.json;
        let outcome = app
            .send_streaming(&args.message, options, cancel, |text| {
                if print_live {
                    print!("{}", text);
                    let _ = std::io::stdout().flush();
                }
            })
            .await?;
        if print_live {
            println!();
        }

        match outcome {
            Some(response) => (response, print_live),
            None => {
                warn!("Stream cancelled");
                return Ok(());
            }
        }
    } else {
        (app.send(&args.message, options).await?, false)
    };

    print_response(&response, args.json, streamed)?;

    for path in app.save_artifacts(&response)? {
        info!("Wrote {}", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_chat_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = CliArgs::parse();

    match run(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Request failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_state_arg_object() {
        let state = parse_state_arg(r#"{"tier":"gold","visits":3}"#).unwrap();
        assert_eq!(state.get("tier"), Some(&Value::String("gold".to_string())));
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_parse_state_arg_rejects_non_objects() {
        assert!(parse_state_arg("[1,2]").unwrap_err().contains("JSON object"));
        assert!(parse_state_arg("{oops").unwrap_err().contains("Invalid state JSON"));
    }

    #[test]
    fn test_cli_flags() {
        let args = CliArgs::parse_from([
            "agent-chat-client",
            "hello there",
            "--stream",
            "--app",
            "bank",
            "--state",
            r#"{"a":1}"#,
        ]);
        assert_eq!(args.message, "hello there");
        assert!(args.stream);
        assert!(!args.json);
        assert_eq!(args.app.as_deref(), Some("bank"));
        assert_eq!(args.state.as_ref().unwrap().len(), 1);

        let overrides = args.config_overrides();
        assert_eq!(overrides.app_name.as_deref(), Some("bank"));
        assert!(overrides.user_id.is_none());
    }
}
