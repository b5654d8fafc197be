pub mod backend;
pub mod error;
pub mod extract;
pub mod pool;
pub mod prompt;
pub mod provider;
pub mod runtime;

pub use backend::{InferError, InferKind, ProviderBackend, SkillBackend};
pub use error::{Error, Result};
pub use provider::Provider;
pub use runtime::{
    execute_incremental, execute_session_batch, run_incremental, run_session_batch,
    IncrementalRunConfig, SessionBatchConfig,
};
