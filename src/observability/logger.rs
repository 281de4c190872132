//! Markdown audit log for agent workflows.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::provider::Message;

const HEADER: &str = "# Durable Agent Log";

/// Appends a markdown record of workflow activity to one file.
///
/// Each record is a timestamped section: workflow starts, LLM interactions,
/// tool executions, orchestration turns, errors and completions. Activities
/// of several instances may log at once, so appends are serialized.
#[derive(Debug)]
pub struct Logger {
    log_file: PathBuf,
    log_level: String,
    write_lock: Mutex<()>,
}

impl Logger {
    /// Open (or create) `log_file`, creating parent directories.
    ///
    /// `log_level` defaults to `INFO`; at `DEBUG` the full message list of
    /// every LLM call is recorded.
    pub fn new(log_file: &Path, log_level: Option<&str>) -> Result<Self> {
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }

        let logger = Self {
            log_file: log_file.to_path_buf(),
            log_level: log_level.unwrap_or("INFO").to_uppercase(),
            write_lock: Mutex::new(()),
        };
        if !logger.log_file.exists() {
            logger.append(&format!("{}\n\nLog started: {}\n\n---\n\n", HEADER, Utc::now().to_rfc3339()))?;
        }
        Ok(logger)
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    fn is_debug(&self) -> bool {
        self.log_level == "DEBUG"
    }

    fn append(&self, content: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .with_context(|| format!("Failed to open log file: {}", self.log_file.display()))?;
        file.write_all(content.as_bytes())
            .context("Failed to write to log file")
    }

    /// `heading` at markdown depth `level`, stamped with the current time
    fn section(&self, level: usize, heading: &str, body: &str) -> Result<()> {
        self.append(&format!(
            "{} {} - {}\n\n{}\n\n",
            "#".repeat(level),
            heading,
            Utc::now().to_rfc3339(),
            body.trim_end()
        ))
    }

    pub fn log_workflow_start(&self, agent: &str, instance_id: &str, task: &str) -> Result<()> {
        self.section(
            2,
            "Workflow Started",
            &format!("**Agent:** {}\n**Instance:** `{}`\n**Task:** {}", agent, instance_id, task),
        )
    }

    /// One model call. Calls with no input and no output are skipped.
    pub fn log_llm_interaction(&self, messages: &[Message], response: &Message, model: &str) -> Result<()> {
        if messages.is_empty() && response.content.trim().is_empty() && !response.has_tool_calls() {
            tracing::debug!("skipping log entry for empty LLM interaction");
            return Ok(());
        }

        let mut body = format!("**Model:** {}\n\n", model);
        if self.is_debug() {
            let rendered = serde_json::to_string_pretty(messages).unwrap_or_else(|_| "[]".to_string());
            body.push_str(&format!("**Messages:**\n```json\n{}\n```\n\n", rendered));
        } else if !messages.is_empty() {
            body.push_str(&format!("**Messages:** {} messages\n\n", messages.len()));
        }
        body.push_str(&format!("**Response:**\n```\n{}\n```\n", response.content));
        if response.has_tool_calls() {
            let names: Vec<&str> = response.tool_calls.iter().map(|call| call.name.as_str()).collect();
            body.push_str(&format!("\n**Tool calls:** {}\n", names.join(", ")));
        }

        self.section(3, "LLM Interaction", &body)
    }

    pub fn log_tool_execution(&self, tool_name: &str, tool_args: &str, result: &str, success: bool) -> Result<()> {
        let label = if success { "Result" } else { "Error" };
        self.section(
            3,
            "Tool Execution",
            &format!("**Tool:** {}\n**Args:** {}\n**{}:** {}", tool_name, tool_args, label, result),
        )
    }

    pub fn log_orchestration_turn(&self, turn: u32, agent: &str, instruction: &str, response: &str) -> Result<()> {
        self.section(
            2,
            &format!("Orchestration Turn {}", turn),
            &format!(
                "**Agent:** {}\n\n**Instruction:**\n```\n{}\n```\n\n**Response:**\n```\n{}\n```",
                agent, instruction, response
            ),
        )
    }

    /// An error, followed by `key: value` context lines
    pub fn log_error(&self, error: &str, context: &[(&str, &str)]) -> Result<()> {
        let mut body = format!("**Error:** {}\n", error);
        for (key, value) in context {
            body.push_str(&format!("- {}: {}\n", key, value));
        }
        self.section(3, "Error", &body)
    }

    /// Terminal status of an instance; closes the instance's part of the log
    pub fn log_completion(&self, instance_id: &str, status: &str, output: &str) -> Result<()> {
        self.section(
            3,
            &format!("Workflow {}", status),
            &format!("**Instance:** `{}`\n\n**Output:**\n```\n{}\n```\n\n---", instance_id, output),
        )
    }
}

#[cfg(test)]
mod tests;
