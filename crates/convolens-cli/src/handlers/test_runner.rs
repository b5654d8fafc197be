//! `test`: compile-check then run the suites.

use crate::args::TestMode;
use anyhow::Result;
use std::process::Command;

/// Fixed segmented targets covering the contract, runtime and sync cores.
const SEGMENTED_PACKAGES: [&str; 4] = [
    "convolens-engine",
    "convolens-skill",
    "convolens-sync",
    "convolens",
];

pub fn handle(mode: TestMode) -> Result<i32> {
    let rc = run_cargo("check", &["--workspace".to_string()]);
    if rc != 0 {
        return Ok(rc);
    }

    let test_args: Vec<String> = match mode {
        TestMode::Segmented => SEGMENTED_PACKAGES
            .iter()
            .flat_map(|package| ["-p".to_string(), package.to_string()])
            .collect(),
        TestMode::Full => vec!["--workspace".to_string()],
    };
    Ok(run_cargo("test", &test_args))
}

fn run_cargo(subcommand: &str, extra: &[String]) -> i32 {
    let mut cmd = Command::new("cargo");
    cmd.arg(subcommand).args(extra);
    println!("[pipeline] exec: cargo {} {}", subcommand, extra.join(" "));
    match cmd.status() {
        Ok(status) => status.code().unwrap_or(1),
        Err(err) => {
            eprintln!("ERROR: failed to run cargo: {}", err);
            2
        }
    }
}
