mod args;
mod commands;
mod handlers;
mod window;

pub use args::{BackfillArgs, Cli, Commands, DiagnoseCommand, IncrementalArgs, RunArgs};
pub use commands::run;
