pub mod digest;
pub mod evidence;
pub mod normalize;
pub mod validate;

pub use digest::build_session_digest;
pub use evidence::{
    build_incremental_input, compact_session_for_incremental, dedupe_evidence,
    has_valid_evidence_item, select_diverse_evidence, session_has_mechanism_signal,
};
pub use normalize::{
    coerce_incremental_payload, normalize_session_batch, normalize_session_output,
    sanitize_session_output, RunContext,
};
pub use validate::{validate_incremental_mechanism, validate_session_mechanism};
