use serde::{Deserialize, Serialize};

pub const SESSION_SCHEMA: &str = "session-mechanism.v1";
pub const INCREMENTAL_SCHEMA: &str = "incremental-mechanism.v1";

/// Normalized per-session mechanism record.
///
/// This is the *candidate* shape produced by the output normalizer; it only
/// becomes a valid SessionMechanismV1 once the contract validator accepts its
/// JSON rendering. Incremental payloads stay untyped (`serde_json::Value`)
/// because their report list is open-ended at the model boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMechanism {
    pub schema_version: String,
    pub session_id: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_id: Option<String>,
    pub what_happened: Vec<String>,
    pub why: Vec<WhyItem>,
    pub how_to_improve: Vec<ActionItem>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub summary: String,
    pub generated_by: GeneratedBy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhyItem {
    pub hypothesis: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub session_id: String,
    pub turn_id: u64,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionItem {
    pub trigger: String,
    pub action: String,
    pub expected_gain: String,
    pub validation_window: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedBy {
    pub engine: String,
    pub provider: String,
    pub model: String,
    pub run_id: String,
    pub generated_at: String,
}
