use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One normalized conversation as produced by the external ingest parsers.
///
/// The ingest schema is tolerant by design: every field defaults so that a
/// record missing optional metadata still loads. Files that fail to decode at
/// all are skipped by the store layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    pub schema_version: Option<String>,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Turn {
    #[serde(default)]
    pub turn_id: u64,
    #[serde(default)]
    pub user_message: UserMessage,
    #[serde(default)]
    pub assistant_response: AssistantResponse,
    #[serde(default)]
    pub corrections: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantResponse {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_uses: Vec<ToolUse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolUse {
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub input: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub total_turns: Option<u64>,
    #[serde(default)]
    pub total_tool_uses: Option<u64>,
    #[serde(default)]
    pub primary_language: Option<String>,
    #[serde(default)]
    pub detected_domains: Vec<String>,
    /// Free-form enrichment block added by the external heuristic enricher.
    #[serde(default)]
    pub llm_metadata: Option<Value>,
}

/// Closed set of ingest platform tags.
pub const SOURCES: [&str; 5] = ["chatgpt", "claude_code", "codex", "gemini", "claude_web"];

pub fn is_known_source(source: &str) -> bool {
    SOURCES.contains(&source)
}
