pub mod bundles;
pub mod conversations;
pub mod error;
pub mod layout;
pub mod sidecars;

pub use bundles::{load_run_bundle, write_run_bundle};
pub use conversations::{count_conversations_in_period, get_conversation, load_conversations, ConversationFilter};
pub use error::{Error, Result};
pub use layout::SkillRoot;
pub use sidecars::{
    canonical_json, filter_sessions_by_period, load_session_sidecars, read_json,
    write_json_if_changed, WriteOutcome,
};
