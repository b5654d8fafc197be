pub mod backfill;
pub mod doctor;
pub mod incremental;
pub mod run;
pub mod test_runner;
