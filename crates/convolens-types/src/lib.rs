pub mod conversation;
pub mod digest;
pub mod dimensions;
pub mod mechanism;
pub mod quality;
pub mod util;

pub use conversation::{AssistantResponse, Conversation, Metadata, ToolUse, Turn, UserMessage};
pub use digest::{DigestLlmMetadata, SessionDigest, TimelineItem, DIGEST_SCHEMA};
pub use mechanism::{
    ActionItem, Evidence, GeneratedBy, SessionMechanism, WhyItem, INCREMENTAL_SCHEMA,
    SESSION_SCHEMA,
};
