//! External article parser invoked as `<cli> <link>`.
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

/// Deadline for one parser invocation.
const PARSER_TIMEOUT: Duration = Duration::from_secs(30);

/// Class of the `<div>` that wraps parsed article bodies.
pub const PARSED_CONTAINER_CLASS: &str = "mercury-parsed";

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("Failed to start article parser: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Article parser exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
    #[error("Article parser timed out after {0}s")]
    Timeout(u64),
    #[error("Invalid article parser output: {0}")]
    BadOutput(#[from] serde_json::Error),
}

/// Extracts an enriched HTML body for an article link.
#[async_trait]
pub trait ArticleParser: Send + Sync {
    async fn parse(&self, link: &str) -> Result<String, ParserError>;
}

/// Wrap parser output in the well-known container tag.
pub fn wrap_parsed(content: &str) -> String {
    format!(r#"<div class="{PARSED_CONTAINER_CLASS}">{content}</div>"#)
}

#[derive(Debug, Deserialize)]
struct ParserOutput {
    #[serde(default)]
    content: Option<String>,
}

/// Runs a Mercury-compatible command line parser that prints
/// `{"content": "<html>"}` on stdout.
#[derive(Debug, Clone)]
pub struct MercuryParser {
    cli: PathBuf,
    timeout: Duration,
}

impl MercuryParser {
    pub fn new(cli: impl Into<PathBuf>) -> Self {
        Self {
            cli: cli.into(),
            timeout: PARSER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ArticleParser for MercuryParser {
    async fn parse(&self, link: &str) -> Result<String, ParserError> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.cli).arg(link).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| ParserError::Timeout(self.timeout.as_secs()))??;

        if !output.status.success() {
            return Err(ParserError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let parsed: ParserOutput = serde_json::from_slice(&output.stdout)?;
        Ok(parsed.content.unwrap_or_default())
    }
}
