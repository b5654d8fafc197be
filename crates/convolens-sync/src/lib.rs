pub mod client;
pub mod config;
pub mod error;
pub mod quality;
pub mod reports;
pub mod sync;

pub use client::{blocks, NotionClient, ReportDb};
pub use config::{load_config, SyncConfig};
pub use error::{Error, Result};
pub use quality::evaluate_payload_quality;
pub use reports::{build_reports_from_incremental, Report};
pub use sync::{
    load_incremental_mechanism, prepare_reports, print_dry_run, sync_prepared,
    sync_reports_from_incremental,
};
