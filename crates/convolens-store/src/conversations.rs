use convolens_types::util::date_prefix;
use convolens_types::Conversation;
use std::fs;
use std::path::Path;

/// Optional filters for conversation loading. Dates are inclusive ISO dates
/// compared against the date prefix of `created_at`.
#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    pub since: Option<String>,
    pub until: Option<String>,
    pub source: Option<String>,
}

/// Load conversations from local JSON files with optional filters, sorted by
/// `created_at` descending. Malformed files are silently skipped; they are
/// not errors at this layer.
pub fn load_conversations(dir: &Path, filter: &ConversationFilter) -> Vec<Conversation> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut conversations: Vec<Conversation> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let Ok(conv) = serde_json::from_str::<Conversation>(&content) else {
            continue;
        };

        if let Some(source) = &filter.source {
            if conv.source.as_deref() != Some(source.as_str()) {
                continue;
            }
        }

        let created = date_prefix(&conv.created_at);
        if let Some(since) = &filter.since {
            if created < since.as_str() {
                continue;
            }
        }
        if let Some(until) = &filter.until {
            if created > until.as_str() {
                continue;
            }
        }

        conversations.push(conv);
    }

    conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    conversations
}

/// Load a single conversation by session id (filename stem).
pub fn get_conversation(dir: &Path, session_id: &str) -> Option<Conversation> {
    let path = dir.join(format!("{}.json", session_id));
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Count source conversations in a date range, for coverage accounting.
pub fn count_conversations_in_period(dir: &Path, since: Option<&str>, until: Option<&str>) -> usize {
    let filter = ConversationFilter {
        since: since.map(str::to_string),
        until: until.map(str::to_string),
        source: None,
    };
    load_conversations(dir, &filter).len()
}
