use crate::args::{Cli, Commands, DiagnoseCommand, RunArgs};
use crate::handlers;
use anyhow::Result;
use convolens_store::SkillRoot;

/// Dispatch a parsed CLI invocation; returns the process exit code.
pub fn run(cli: Cli) -> Result<i32> {
    let root = SkillRoot::new(&cli.root);

    let Some(command) = cli.command else {
        return handlers::run::handle(&root, &RunArgs::default());
    };

    match command {
        Commands::Run(args) => handlers::run::handle(&root, &args),
        Commands::Doctor { json } => handlers::doctor::handle(&root, json),
        Commands::Test { mode } => handlers::test_runner::handle(mode),
        Commands::Diagnose { command } => match command {
            DiagnoseCommand::Backfill(args) => handlers::backfill::handle(&root, &args),
            DiagnoseCommand::Incremental(args) => handlers::incremental::handle(&root, &args),
        },
    }
}
