use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DIGEST_SCHEMA: &str = "session-digest.v1";

/// Bounded view of one conversation, suitable for a single Skill prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDigest {
    pub schema_version: String,
    pub session_id: String,
    pub source: String,
    pub model: String,
    pub title: String,
    pub created_at: String,
    pub week: String,
    pub turn_count: u64,
    pub tool_count: u64,
    pub primary_language: String,
    pub detected_domains: Vec<String>,
    pub llm_metadata: DigestLlmMetadata,
    pub timeline: Vec<TimelineItem>,
}

/// Enrichment subset carried into the prompt. Values are passed through
/// untyped; the enricher's output shape is not a contract of this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestLlmMetadata {
    pub conversation_intent: Option<Value>,
    pub task_type: Option<Value>,
    pub actual_domains: Vec<Value>,
    pub difficulty: Option<Value>,
    pub outcome: Option<Value>,
    pub key_topics: Vec<Value>,
    pub prompt_quality: Value,
    pub cognitive_patterns: Vec<Value>,
    pub conversation_summary: String,
}

impl Default for DigestLlmMetadata {
    fn default() -> Self {
        Self {
            conversation_intent: None,
            task_type: None,
            actual_domains: Vec::new(),
            difficulty: None,
            outcome: None,
            key_topics: Vec::new(),
            prompt_quality: Value::Object(serde_json::Map::new()),
            cognitive_patterns: Vec::new(),
            conversation_summary: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineItem {
    pub turn_id: u64,
    pub user_snippet: String,
    pub assistant_snippet: String,
    pub correction_count: usize,
    pub tools: Vec<String>,
}
