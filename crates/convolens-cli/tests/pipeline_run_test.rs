#![cfg(unix)]

use convolens_testing::TestWorld;
use predicates::prelude::*;

fn command(world: &TestWorld) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("convolens");
    world.configure_command(&mut cmd);
    cmd
}

fn world_with_stubs() -> TestWorld {
    let world = TestWorld::new();
    for script in ["ingest_claude_code", "ingest_codex", "auto_enricher", "sync_stats", "dashboard"] {
        world.write_stub_script(script, 0);
    }
    world
}

#[test]
fn dry_run_chain_reaches_every_stage() {
    let world = world_with_stubs();

    command(&world)
        .args(["run", "--dry-run", "--skip-backfill", "--since", "2026-01-01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("step=ingest_claude_code done"))
        .stdout(predicate::str::contains("step=enrich_heuristic done"))
        .stdout(predicate::str::contains("step=diagnose_incremental done"))
        .stdout(predicate::str::contains("step=sync_stats done"))
        .stdout(predicate::str::contains("step=dashboard done"))
        .stdout(predicate::str::contains("\"schema_version\": \"pipeline-run-summary.v1\""))
        .stdout(predicate::str::contains("\"ok\": true"));

    // Stage arguments are forwarded to the external executables.
    let ingest_log = std::fs::read_to_string(world.path("ingest_claude_code.log")).unwrap();
    assert!(ingest_log.contains("--since 2026-01-01"));
    let stats_log = std::fs::read_to_string(world.path("sync_stats.log")).unwrap();
    assert!(stats_log.contains("--append --period 2026-01-01_to_today"));
    assert!(stats_log.contains("--dry-run"));
    let dashboard_log = std::fs::read_to_string(world.path("dashboard.log")).unwrap();
    assert!(dashboard_log.contains("--report-limit 50"));
    assert!(dashboard_log.contains("--no-notion"));
}

#[test]
fn failing_stage_halts_the_chain() {
    let world = world_with_stubs();
    world.write_stub_script("auto_enricher", 3);

    command(&world)
        .args(["run", "--dry-run", "--skip-backfill"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("step=enrich_heuristic failed rc=3"));

    // Later stages never ran.
    assert!(!world.path("sync_stats.log").exists());
}

#[test]
fn skip_flags_bypass_external_stages() {
    let world = TestWorld::new();
    world.write_stub_script("sync_stats", 0);
    world.write_stub_script("dashboard", 0);

    command(&world)
        .args(["run", "--dry-run", "--skip-ingest", "--skip-enrich", "--skip-backfill"])
        .assert()
        .success()
        .stdout(predicate::str::contains("step=sync_stats done"));
    assert!(!world.path("ingest_claude_code.log").exists());
}

#[test]
fn missing_stage_executable_is_fatal() {
    let world = TestWorld::new();

    command(&world)
        .args(["run", "--dry-run", "--skip-backfill"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("step=ingest_claude_code failed"));
}

#[test]
fn full_mode_widens_the_window_to_all_time() {
    let world = world_with_stubs();

    command(&world)
        .args(["run", "--mode", "full", "--dry-run", "--skip-backfill"])
        .assert()
        .success();

    let stats_log = std::fs::read_to_string(world.path("sync_stats.log")).unwrap();
    assert!(stats_log.contains("--period rolling_all-time"));
}
