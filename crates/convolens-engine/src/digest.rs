use convolens_types::util::{snippet, week_label};
use convolens_types::{
    Conversation, DigestLlmMetadata, SessionDigest, TimelineItem, Turn, DIGEST_SCHEMA,
};
use serde_json::Value;

const MAX_TIMELINE_TURNS: usize = 12;
const USER_SNIPPET_CHARS: usize = 140;
const ASSISTANT_SNIPPET_CHARS: usize = 120;

/// Build a bounded SessionDigest from a normalized conversation.
pub fn build_session_digest(conv: &Conversation) -> SessionDigest {
    let turns = select_timeline_turns(&conv.turns, MAX_TIMELINE_TURNS);

    let timeline: Vec<TimelineItem> = turns
        .iter()
        .enumerate()
        .map(|(offset, turn)| {
            let fallback_id = (offset + 1) as u64;
            TimelineItem {
                turn_id: if turn.turn_id > 0 { turn.turn_id } else { fallback_id },
                user_snippet: snippet(&turn.user_message.content, USER_SNIPPET_CHARS),
                assistant_snippet: snippet(&turn.assistant_response.content, ASSISTANT_SNIPPET_CHARS),
                correction_count: turn.corrections.len(),
                tools: turn
                    .assistant_response
                    .tool_uses
                    .iter()
                    .filter(|t| !t.tool_name.is_empty())
                    .map(|t| t.tool_name.clone())
                    .collect(),
            }
        })
        .collect();

    let metadata = &conv.metadata;
    SessionDigest {
        schema_version: DIGEST_SCHEMA.to_string(),
        session_id: conv.session_id.clone(),
        source: conv.source.clone().unwrap_or_else(|| "unknown".to_string()),
        model: conv.model.clone().unwrap_or_else(|| "unknown".to_string()),
        title: conv.title.clone().unwrap_or_default(),
        created_at: conv.created_at.clone(),
        week: week_label(&conv.created_at),
        turn_count: metadata.total_turns.unwrap_or(conv.turns.len() as u64),
        tool_count: metadata.total_tool_uses.unwrap_or(0),
        primary_language: metadata
            .primary_language
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        detected_domains: metadata.detected_domains.clone(),
        llm_metadata: llm_metadata_subset(metadata.llm_metadata.as_ref()),
        timeline,
    }
}

/// Select representative turns while controlling prompt size.
///
/// First turns anchor task framing, last turns anchor outcome; overlap is
/// deduplicated by turn_id keeping the first occurrence.
fn select_timeline_turns(turns: &[Turn], max_turns: usize) -> Vec<Turn> {
    if turns.len() <= max_turns {
        return turns.to_vec();
    }

    let head = max_turns / 2;
    let tail = max_turns - head;
    let mut selected: Vec<Turn> = turns[..head].to_vec();
    selected.extend_from_slice(&turns[turns.len() - tail..]);

    let mut deduped: Vec<Turn> = Vec::with_capacity(selected.len());
    let mut seen_turn_ids: std::collections::HashSet<u64> = std::collections::HashSet::new();
    for turn in selected {
        if turn.turn_id > 0 && !seen_turn_ids.insert(turn.turn_id) {
            continue;
        }
        deduped.push(turn);
    }
    deduped
}

fn llm_metadata_subset(llm: Option<&Value>) -> DigestLlmMetadata {
    let Some(map) = llm.and_then(Value::as_object) else {
        return DigestLlmMetadata::default();
    };

    let list = |key: &str| -> Vec<Value> {
        map.get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    };

    DigestLlmMetadata {
        conversation_intent: map.get("conversation_intent").cloned().filter(|v| !v.is_null()),
        task_type: map.get("task_type").cloned().filter(|v| !v.is_null()),
        actual_domains: list("actual_domains"),
        difficulty: map.get("difficulty").cloned().filter(|v| !v.is_null()),
        outcome: map.get("outcome").cloned().filter(|v| !v.is_null()),
        key_topics: list("key_topics"),
        prompt_quality: map
            .get("prompt_quality")
            .filter(|v| v.is_object())
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
        cognitive_patterns: list("cognitive_patterns"),
        conversation_summary: map
            .get("conversation_summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convolens_types::{AssistantResponse, Metadata, ToolUse, UserMessage};

    fn turn(turn_id: u64, user: &str) -> Turn {
        Turn {
            turn_id,
            user_message: UserMessage {
                content: user.to_string(),
            },
            assistant_response: AssistantResponse {
                content: format!("reply to {}", user),
                tool_uses: vec![ToolUse {
                    tool_name: "shell".to_string(),
                    success: Some(true),
                    input: None,
                }],
            },
            corrections: Vec::new(),
        }
    }

    fn conversation(turn_count: usize) -> Conversation {
        Conversation {
            session_id: "s-1".to_string(),
            source: Some("codex".to_string()),
            created_at: "2026-02-06T10:00:00Z".to_string(),
            turns: (1..=turn_count as u64).map(|i| turn(i, &format!("msg {}", i))).collect(),
            metadata: Metadata::default(),
            ..Default::default()
        }
    }

    #[test]
    fn short_conversation_keeps_all_turns() {
        let digest = build_session_digest(&conversation(12));
        assert_eq!(digest.timeline.len(), 12);
        let ids: Vec<u64> = digest.timeline.iter().map(|t| t.turn_id).collect();
        assert_eq!(ids, (1..=12).collect::<Vec<u64>>());
    }

    #[test]
    fn long_conversation_takes_head_and_tail() {
        let digest = build_session_digest(&conversation(13));
        assert_eq!(digest.timeline.len(), 12);
        let ids: Vec<u64> = digest.timeline.iter().map(|t| t.turn_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 8, 9, 10, 11, 12, 13]);
    }

    #[test]
    fn overlapping_selection_dedupes_by_turn_id() {
        // 13 turns where the tail overlaps head ids.
        let mut conv = conversation(13);
        for t in conv.turns.iter_mut().skip(7) {
            t.turn_id -= 7;
        }
        let digest = build_session_digest(&conv);
        let ids: Vec<u64> = digest.timeline.iter().map(|t| t.turn_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn snippets_are_bounded() {
        let mut conv = conversation(1);
        conv.turns[0].user_message.content = "x".repeat(500);
        conv.turns[0].assistant_response.content = "y".repeat(500);
        let digest = build_session_digest(&conv);
        assert_eq!(digest.timeline[0].user_snippet.chars().count(), 140);
        assert_eq!(digest.timeline[0].assistant_snippet.chars().count(), 120);
    }

    #[test]
    fn digest_carries_identity_and_week() {
        let digest = build_session_digest(&conversation(2));
        assert_eq!(digest.schema_version, DIGEST_SCHEMA);
        assert_eq!(digest.session_id, "s-1");
        assert_eq!(digest.source, "codex");
        assert_eq!(digest.week, "2026-W06");
        assert_eq!(digest.turn_count, 2);
        assert_eq!(digest.timeline[0].tools, vec!["shell".to_string()]);
    }
}
