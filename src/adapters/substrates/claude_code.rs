//! Claude Code CLI substrate implementation.
//!
//! Spawns one `claude --print` process per task attempt inside the plan's
//! working directory and streams its stdout back line by line.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentConfig, SubstrateOutput, SubstrateRequest};
use crate::domain::ports::Substrate;

/// Claude Code CLI substrate configuration.
#[derive(Debug, Clone)]
pub struct ClaudeCodeConfig {
    /// Path to claude CLI binary
    pub binary_path: String,
    /// Model to use; CLI default when unset
    pub model: Option<String>,
    /// Output format for print mode (text, json, stream-json)
    pub output_format: String,
    /// Additional CLI flags
    pub extra_flags: Vec<String>,
}

impl Default for ClaudeCodeConfig {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for ClaudeCodeConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            binary_path: config.binary_path.clone(),
            model: config.model.clone(),
            output_format: config.output_format.clone(),
            extra_flags: config.extra_flags.clone(),
        }
    }
}

/// Claude Code CLI substrate.
pub struct ClaudeCodeSubstrate {
    config: ClaudeCodeConfig,
}

impl ClaudeCodeSubstrate {
    /// Substrate running the CLI described by `config`.
    pub fn new(config: ClaudeCodeConfig) -> Self {
        Self { config }
    }

    /// Build CLI arguments for a request.
    fn build_args(&self, request: &SubstrateRequest) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            self.config.output_format.clone(),
        ];

        if self.config.output_format == "stream-json" {
            args.push("--verbose".to_string());
        }

        if let Some(ref model) = self.config.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        // Edits must land without an interactive permission prompt.
        args.push("--dangerously-skip-permissions".to_string());

        args.extend(self.config.extra_flags.iter().cloned());

        args.push(request.prompt.clone());
        args
    }

    /// Extract displayable text from one stream-json line.
    fn parse_stream_json(line: &str) -> Option<String> {
        let json: serde_json::Value = serde_json::from_str(line).ok()?;
        let event_type = json.get("type").and_then(|t| t.as_str())?;

        match event_type {
            "assistant" => {
                let content = json.get("message")?.get("content")?.as_array()?;
                let text: Vec<&str> = content
                    .iter()
                    .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
                    .collect();
                (!text.is_empty()).then(|| text.join("\n"))
            }
            "content_block_delta" | "text" => json
                .get("text")
                .or_else(|| json.get("delta").and_then(|d| d.get("text")))
                .and_then(|c| c.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            "result" => json.get("result").and_then(|r| r.as_str()).map(str::to_string),
            "error" => json
                .get("error")
                .and_then(|e| e.get("message"))
                .or_else(|| json.get("message"))
                .and_then(|m| m.as_str())
                .map(|m| format!("error: {m}")),
            _ => None,
        }
    }

    /// Turn one stdout line into an output chunk, if it carries any text.
    fn parse_output_line(&self, line: &str) -> Option<String> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        if self.config.output_format == "stream-json" && trimmed.starts_with('{') {
            return Self::parse_stream_json(trimmed);
        }

        Some(line.to_string())
    }

    async fn run(&self, request: &SubstrateRequest, output_tx: &mpsc::Sender<String>) -> DomainResult<SubstrateOutput> {
        let mut cmd = Command::new(&self.config.binary_path);
        cmd.args(self.build_args(request))
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("CADENCE_TASK_ID", request.task_id.to_string());

        let mut child = cmd
            .spawn()
            .map_err(|e| DomainError::AgentInvocation(format!("Failed to spawn {}: {e}", self.config.binary_path)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DomainError::AgentInvocation("Failed to capture stdout".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| DomainError::AgentInvocation("Failed to capture stderr".to_string()))?;

        // Drain stderr concurrently so a chatty agent cannot block on a full pipe.
        let stderr_reader = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut output_text = String::new();
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(chunk) = self.parse_output_line(&line) {
                output_text.push_str(&chunk);
                output_text.push('\n');
                let _ = output_tx.send(chunk).await;
            }
        }

        let exit_status = child
            .wait()
            .await
            .map_err(|e| DomainError::AgentInvocation(format!("Failed to wait for process: {e}")))?;
        let error_text = stderr_reader.await.unwrap_or_default();

        if !exit_status.success() {
            let message = if error_text.trim().is_empty() {
                format!("Process exited with code: {:?}", exit_status.code())
            } else {
                error_text.trim().to_string()
            };
            return Err(DomainError::AgentInvocation(message));
        }

        Ok(SubstrateOutput {
            output: output_text.trim_end().to_string(),
            exit_code: exit_status.code(),
        })
    }
}

#[async_trait]
impl Substrate for ClaudeCodeSubstrate {
    fn name(&self) -> &'static str {
        "claude_code"
    }

    async fn is_available(&self) -> DomainResult<bool> {
        let output = Command::new(&self.config.binary_path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        Ok(output.is_ok_and(|out| out.status.success()))
    }

    async fn execute(
        &self,
        request: SubstrateRequest,
        output_tx: mpsc::Sender<String>,
    ) -> DomainResult<SubstrateOutput> {
        tracing::debug!(task_id = %request.task_id, dir = %request.working_dir.display(), "spawning claude");

        match tokio::time::timeout(request.timeout, self.run(&request, &output_tx)).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::AgentInvocation(format!(
                "Agent timed out after {}s",
                request.timeout.as_secs()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    fn request(prompt: &str) -> SubstrateRequest {
        SubstrateRequest::new(Uuid::new_v4(), prompt, ".", Duration::from_secs(5))
    }

    #[test]
    fn test_build_args_puts_prompt_last() {
        let substrate = ClaudeCodeSubstrate::new(ClaudeCodeConfig {
            model: Some("sonnet".into()),
            extra_flags: vec!["--max-turns".into(), "40".into()],
            ..ClaudeCodeConfig::default()
        });
        let args = substrate.build_args(&request("do the thing"));

        assert_eq!(args[0], "--print");
        assert!(args.windows(2).any(|w| w[0] == "--model" && w[1] == "sonnet"));
        assert!(args.contains(&"--max-turns".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("do the thing"));
    }

    #[test]
    fn test_parse_stream_json_assistant_text() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Editing lib.rs"}]}}"#;
        assert_eq!(ClaudeCodeSubstrate::parse_stream_json(line).as_deref(), Some("Editing lib.rs"));
        assert_eq!(ClaudeCodeSubstrate::parse_stream_json(r#"{"type":"ping"}"#), None);
    }

    #[test]
    fn test_plain_text_lines_pass_through() {
        let substrate = ClaudeCodeSubstrate::new(ClaudeCodeConfig::default());
        assert_eq!(substrate.parse_output_line("  ").as_deref(), None);
        assert_eq!(substrate.parse_output_line("{not json").as_deref(), Some("{not json"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_agent_failure() {
        let substrate = ClaudeCodeSubstrate::new(ClaudeCodeConfig {
            binary_path: "/nonexistent/claude-binary".into(),
            ..ClaudeCodeConfig::default()
        });
        assert!(!substrate.is_available().await.unwrap());

        let (tx, _rx) = mpsc::channel(4);
        let err = substrate.execute(request("x"), tx).await.unwrap_err();
        assert!(matches!(err, DomainError::AgentInvocation(_)));
    }
}
