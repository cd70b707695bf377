use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::OrchestraError;

pub const DEFAULT_AGENT_EXECUTABLE: &str = "claude";
const COMMAND_LOG_CHARS: usize = 200;

/// What the agent reported back for one command.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub success: bool,
    pub output: String,
    pub duration: Duration,
}

/// The outbound seam to an external coding agent.
///
/// Implementations must return promptly once `cancel` fires; the caller
/// handles timeouts by cancelling the token and dropping the future.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn execute_command(
        &self,
        command: &str,
        working_dir: &Path,
        cancel: CancellationToken,
    ) -> Result<AgentResponse, OrchestraError>;
}

#[derive(Debug, Clone)]
pub struct CliConnectorSettings {
    pub executable: String,
    /// Arguments placed before the command text, e.g. `-p` for print mode.
    pub args: Vec<String>,
}

impl Default for CliConnectorSettings {
    fn default() -> Self {
        Self {
            executable: DEFAULT_AGENT_EXECUTABLE.to_string(),
            args: vec!["-p".to_string()],
        }
    }
}

/// Runs the agent executable non-interactively in the repository directory
/// and collects its combined output.
pub struct CliAgentConnector {
    settings: CliConnectorSettings,
}

impl CliAgentConnector {
    pub fn new(settings: CliConnectorSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl AgentConnector for CliAgentConnector {
    async fn execute_command(
        &self,
        command: &str,
        working_dir: &Path,
        cancel: CancellationToken,
    ) -> Result<AgentResponse, OrchestraError> {
        debug!(
            executable = %self.settings.executable,
            cwd = %working_dir.display(),
            command = %command.chars().take(COMMAND_LOG_CHARS).collect::<String>(),
            "Spawning agent"
        );
        let start = Instant::now();

        let child = Command::new(&self.settings.executable)
            .args(&self.settings.args)
            .arg(command)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OrchestraError::AgentConnection(format!(
                "Failed to start {}: {}", self.settings.executable, e
            )))?;

        let output = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(executable = %self.settings.executable, "Agent call cancelled, killing process");
                return Err(OrchestraError::Cancelled("agent call cancelled".to_string()));
            }
            out = child.wait_with_output() => out.map_err(|e| {
                OrchestraError::AgentConnection(format!("Lost agent process: {}", e))
            })?,
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        Ok(AgentResponse {
            success: output.status.success(),
            output: text,
            duration: start.elapsed(),
        })
    }
}
