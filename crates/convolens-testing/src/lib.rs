//! Test fixtures shared across convolens integration tests.

pub mod fixtures;
pub mod world;

pub use fixtures::{conversation, valid_incremental_payload, valid_session_mechanism};
pub use world::TestWorld;
