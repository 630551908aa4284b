//! Unit tests for the fetch command line

use clap::Parser;
use std::time::Duration;

use kline_backfill::cli::{Cli, Commands, FetchArgs};

fn fetch_args(args: &[&str]) -> FetchArgs {
    let mut argv = vec!["kline-backfill", "fetch"];
    argv.extend_from_slice(args);
    match Cli::parse_from(argv).command {
        Commands::Fetch(args) => args,
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn test_cli_defaults_to_max_retries_5() {
    let args = fetch_args(&["--start", "2024-01-01"]);
    assert_eq!(args.max_retries, 5);
    assert_eq!(args.to_config().unwrap().retry.max_attempts(), 6);
}

#[test]
fn test_cli_respects_custom_flags() {
    let args = fetch_args(&[
        "--start",
        "2024-01-01",
        "--max-retries",
        "10",
        "--max-bars",
        "500",
        "--politeness-ms",
        "250",
        "--rate-limit-weight",
        "600",
        "--concurrency",
        "8",
    ]);
    let config = args.to_config().unwrap();
    assert_eq!(config.retry.max_retries, 10);
    assert_eq!(config.max_bars, 500);
    assert_eq!(config.politeness_delay, Duration::from_millis(250));
    assert_eq!(config.rate_limit.max_weight, 600);
    assert_eq!(args.concurrency, 8);
}

#[test]
fn test_cli_rejects_out_of_range_values() {
    for args in [
        vec!["kline-backfill", "fetch", "--max-retries", "21"],
        vec!["kline-backfill", "fetch", "--max-bars", "1001"],
        vec!["kline-backfill", "fetch", "--max-bars", "0"],
        vec!["kline-backfill", "fetch", "--concurrency", "0"],
        vec!["kline-backfill", "fetch", "--days-ago", "1,5"],
    ] {
        assert!(Cli::try_parse_from(&args).is_err(), "{args:?}");
    }
}

#[test]
fn test_blank_api_key_is_ignored() {
    let args = fetch_args(&["--start", "2024-01-01", "--api-key", "  "]);
    assert_eq!(args.to_config().unwrap().api_key, None);
}

#[test]
fn test_days_ago_plan() {
    let args = fetch_args(&["--days-ago", "3,1", "--interval", "1d"]);
    let planned = args.plan().unwrap();
    assert_eq!(planned.len(), 1);
    let job = &planned[0].job;
    assert_eq!(job.end_time - job.start_time, 2 * 86_400_000);
    assert!(planned[0].output.ends_with("BTCUSDT_1d.csv"));
}
