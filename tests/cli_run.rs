// tests/cli_run.rs
//
// End-to-end runs through `taskgraph::run`, using real processes.

#![cfg(unix)]

use std::error::Error;
use std::fs;
use std::path::Path;

use clap::Parser;
use taskgraph::cli::CliArgs;
use taskgraph_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

const PIPELINE: &str = r#"
[scheduler]
num_cores = 2
cache_dir = ".cache"

[file.words]
path = "words.txt"

[execution.sort]
program = "sort"
stdin = "words"

[execution.count]
program = "sh"
args = ["-c", "wc -l < sorted.txt > count.txt"]
inputs = { "sorted.txt" = "sort.stdout" }
outputs = ["count.txt"]

[[export]]
file = "sort.stdout"
path = "out/sorted.txt"

[[export]]
file = "count.count.txt"
path = "out/count.txt"
"#;

fn write_project(dir: &Path, config: &str) -> Result<String, Box<dyn Error>> {
    fs::write(dir.join("words.txt"), "pear\napple\nfig\n")?;
    let config_path = dir.join("Taskgraph.toml");
    fs::write(&config_path, config)?;
    Ok(config_path.to_string_lossy().into_owned())
}

fn args(config: &str, extra: &[&str]) -> CliArgs {
    let mut argv = vec!["taskgraph", "--config", config];
    argv.extend_from_slice(extra);
    CliArgs::parse_from(argv)
}

#[tokio::test]
async fn pipeline_runs_and_exports() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let config = write_project(dir.path(), PIPELINE)?;

    let report = with_timeout(taskgraph::run(args(&config, &[]))).await?;

    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.exported, 2);
    assert_eq!(
        fs::read_to_string(dir.path().join("out/sorted.txt"))?,
        "apple\nfig\npear\n"
    );
    assert_eq!(fs::read_to_string(dir.path().join("out/count.txt"))?.trim(), "3");
    assert!(dir.path().join(".cache/index.toml").is_file());

    // Second run is served from the cache and produces the same exports.
    fs::remove_dir_all(dir.path().join("out"))?;
    let again = with_timeout(taskgraph::run(args(&config, &[]))).await?;
    assert!(again.is_success(), "{again:?}");
    assert_eq!(
        fs::read_to_string(dir.path().join("out/sorted.txt"))?,
        "apple\nfig\npear\n"
    );
    Ok(())
}

#[tokio::test]
async fn no_cache_leaves_no_cache_directory() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let config = write_project(dir.path(), PIPELINE)?;

    let report = with_timeout(taskgraph::run(args(&config, &["--no-cache", "--num-cores", "1"]))).await?;

    assert!(report.is_success(), "{report:?}");
    assert!(!dir.path().join(".cache").exists());
    Ok(())
}

#[tokio::test]
async fn dry_run_executes_nothing() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let config = write_project(dir.path(), PIPELINE)?;

    let report = with_timeout(taskgraph::run(args(&config, &["--dry-run"]))).await?;

    assert!(report.completed);
    assert_eq!(report.succeeded, 0);
    assert!(!dir.path().join("out").exists());
    Ok(())
}

const WITH_FAILURE: &str = r#"
[scheduler]
num_cores = 1

[execution.broken]
program = "sh"
args = ["-c", "echo 'no such target' >&2; exit 2"]

[execution.fine]
program = "echo"
args = ["ok"]

[execution.after]
program = "cat"
stdin = "broken.stdout"

[[export]]
file = "fine.stdout"
path = "fine.txt"

[[export]]
file = "after.stdout"
path = "after.txt"
"#;

#[tokio::test]
async fn keep_going_finishes_independent_work() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let config = write_project(dir.path(), WITH_FAILURE)?;

    let report = with_timeout(taskgraph::run(args(&config, &["--keep-going"]))).await?;

    assert!(report.completed);
    assert!(!report.is_success());
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].1.contains("no such target"), "{report:?}");
    assert_eq!(fs::read_to_string(dir.path().join("fine.txt"))?, "ok\n");
    assert_eq!(report.skipped_exports, vec!["after.stdout".to_string()]);
    Ok(())
}

#[tokio::test]
async fn failure_stops_the_run_by_default() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let config = write_project(dir.path(), WITH_FAILURE)?;

    let report = with_timeout(taskgraph::run(args(&config, &[]))).await?;

    assert!(!report.completed);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.exported, 0);
    assert!(!dir.path().join("after.txt").exists());
    Ok(())
}

#[tokio::test]
async fn invalid_config_is_an_error() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let config = write_project(dir.path(), "[execution.a]\nprogram = \"cat\"\nstdin = \"ghost\"\n")?;

    let err = with_timeout(taskgraph::run(args(&config, &[])))
        .await
        .expect_err("validation fails");
    assert!(format!("{err:#}").contains("ghost"));
    Ok(())
}
