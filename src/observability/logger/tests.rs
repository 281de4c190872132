use super::*;
use crate::provider::ToolCall;
use tempfile::tempdir;

#[test]
fn test_logger_creation() {
    let temp_dir = tempdir().unwrap();
    let log_path = temp_dir.path().join("test.md");

    let logger = Logger::new(&log_path, Some("debug")).unwrap();
    assert_eq!(logger.log_file(), log_path.as_path());
    assert_eq!(logger.log_level(), "DEBUG");
}

#[test]
fn test_log_file_creation() {
    let temp_dir = tempdir().unwrap();
    let log_path = temp_dir.path().join("logs").join("test.md");

    let _logger = Logger::new(&log_path, None).unwrap();
    assert!(log_path.exists());

    let content = std::fs::read_to_string(&log_path).unwrap();
    assert!(content.contains("# Durable Agent Log"));
    assert!(content.contains("Log started:"));
}

#[test]
fn test_workflow_entries() {
    let temp_dir = tempdir().unwrap();
    let log_path = temp_dir.path().join("test.md");
    let logger = Logger::new(&log_path, None).unwrap();

    logger.log_workflow_start("writer", "wf-1", "draft a haiku").unwrap();
    logger
        .log_llm_interaction(
            &[Message::user("draft a haiku")],
            &Message::assistant_with_tools(
                "",
                vec![ToolCall::new("call-1", "syllables", serde_json::json!({"text": "moon"}))],
            ),
            "gpt-test",
        )
        .unwrap();
    logger
        .log_tool_execution("syllables", r#"{"text":"moon"}"#, "1", true)
        .unwrap();
    logger.log_orchestration_turn(1, "poet", "Task: haiku", "an old silent pond").unwrap();
    logger.log_completion("wf-1", "completed", "an old silent pond").unwrap();

    let content = std::fs::read_to_string(&log_path).unwrap();
    assert!(content.contains("## Workflow Started"));
    assert!(content.contains("**Instance:** `wf-1`"));
    assert!(content.contains("### LLM Interaction"));
    assert!(content.contains("**Messages:** 1 messages"));
    assert!(content.contains("**Tool calls:** syllables"));
    assert!(content.contains("### Tool Execution"));
    assert!(content.contains("## Orchestration Turn 1"));
    assert!(content.contains("### Workflow completed"));
}

#[test]
fn test_debug_level_includes_messages() {
    let temp_dir = tempdir().unwrap();
    let log_path = temp_dir.path().join("test.md");
    let logger = Logger::new(&log_path, Some("DEBUG")).unwrap();

    logger
        .log_llm_interaction(&[Message::user("secret plan")], &Message::assistant("ok"), "gpt-test")
        .unwrap();

    let content = std::fs::read_to_string(&log_path).unwrap();
    assert!(content.contains("```json"));
    assert!(content.contains("secret plan"));
}

#[test]
fn test_empty_interaction_is_skipped() {
    let temp_dir = tempdir().unwrap();
    let log_path = temp_dir.path().join("test.md");
    let logger = Logger::new(&log_path, None).unwrap();

    logger.log_llm_interaction(&[], &Message::assistant("  "), "gpt-test").unwrap();

    let content = std::fs::read_to_string(&log_path).unwrap();
    assert!(!content.contains("LLM Interaction"));
}

#[test]
fn test_error_with_context() {
    let temp_dir = tempdir().unwrap();
    let log_path = temp_dir.path().join("test.md");
    let logger = Logger::new(&log_path, None).unwrap();

    logger
        .log_error("remote agent timed out", &[("instance_id", "wf-9"), ("agent", "poet")])
        .unwrap();

    let content = std::fs::read_to_string(&log_path).unwrap();
    assert!(content.contains("### Error - "));
    assert!(content.contains("**Error:** remote agent timed out"));
    assert!(content.contains("- instance_id: wf-9"));
    assert!(content.contains("- agent: poet"));
}
