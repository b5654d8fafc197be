//! Canned payloads matching the ingest and mechanism contracts.

use serde_json::{json, Value};

/// A minimal normalized conversation with one turn.
pub fn conversation(session_id: &str, source: &str, created_at: &str) -> Value {
    json!({
        "schema_version": "1.2",
        "session_id": session_id,
        "source": source,
        "created_at": created_at,
        "turns": [{
            "turn_id": 1,
            "user_message": {"content": "Please help me fix the failing build"},
            "assistant_response": {
                "content": "Looking at the error output now.",
                "tool_uses": [{"tool_name": "shell", "success": true}],
            },
        }],
        "metadata": {
            "total_turns": 1,
            "total_tool_uses": 1,
            "primary_language": "rust",
            "detected_domains": ["build"],
            "llm_metadata": {"task_type": "debugging", "outcome": "resolved", "difficulty": 4},
        },
    })
}

/// A session mechanism record that passes contract validation.
pub fn valid_session_mechanism(session_id: &str, created_at: &str) -> Value {
    json!({
        "schema_version": "session-mechanism.v1",
        "session_id": session_id,
        "created_at": created_at,
        "week": "2026-W06",
        "summary": "开场上下文不足导致澄清循环",
        "what_happened": ["首轮目标不清，出现往返澄清"],
        "why": [{
            "hypothesis": "开场上下文不足",
            "confidence": 0.7,
            "evidence": [{
                "session_id": session_id,
                "turn_id": 1,
                "snippet": "Please help me fix the failing build",
            }],
        }],
        "how_to_improve": [{
            "trigger": "新任务启动",
            "action": "开场写目标、边界、完成标准",
            "expected_gain": "减少澄清轮次",
            "validation_window": "next-7-days",
        }],
        "labels": ["kickoff-context-gap"],
        "generated_by": {
            "engine": "api",
            "provider": "claude_cli",
            "model": "sonnet",
            "run_id": "run-fixture",
            "generated_at": created_at,
        },
    })
}

/// An incremental mechanism payload with one valid L3 report.
pub fn valid_incremental_payload(period_id: &str) -> Value {
    json!({
        "schema_version": "incremental-mechanism.v1",
        "period_id": period_id,
        "week": period_id,
        "generated_at": "2026-02-06T11:00:00+00:00",
        "source_run_id": "run-fixture",
        "coverage": {"sessions_total": 1, "sessions_with_mechanism": 1},
        "reports": [{
            "dimension": "incremental-root-causes",
            "layer": "L3",
            "title": format!("增量根因假设 - {}", period_id),
            "key_insights": "开场上下文不足导致澄清循环。",
            "detail_lines": [
                "现象：首轮任务边界不清，出现往返澄清。",
                "改进：开场写目标、边界、完成标准。",
            ],
            "conversations_analyzed": 1,
            "period": period_id,
            "date": "2026-02-06",
        }],
    })
}
