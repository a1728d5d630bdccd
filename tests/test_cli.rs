//! Tests for CLI argument parsing and end-to-end command runs

use assert_cmd::Command;
use clap::Parser;
use predicates::prelude::*;
use std::path::{Path, PathBuf};

use airfuse::cli::{Cli, Commands};
use airfuse::pipeline::{CorrelationMethod, DbscanEps, FusionMode, SourcePaths};

#[path = "common/mod.rs"]
mod common;

use common::*;

fn source_args(paths: &SourcePaths) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        paths.pollution.display().to_string(),
        "-c".to_string(),
        paths.cities.display().to_string(),
    ];
    for indicator in &paths.indicators {
        args.push("-w".to_string());
        args.push(indicator.display().to_string());
    }
    args
}

fn output_args(dir: &Path) -> Vec<String> {
    vec![
        "-o".to_string(),
        dir.display().to_string(),
        "--no-confirm".to_string(),
    ]
}

#[test]
fn test_cli_default_values() {
    let cli = Cli::parse_from(["airfuse", "-p", "p.csv", "-c", "c.csv", "-w", "w.csv"]);

    assert!(cli.command.is_none());
    assert_eq!(cli.output_dir, PathBuf::from("airfuse_output"));
    assert_eq!(cli.fusion_mode, FusionMode::LatestYear);
    assert_eq!(cli.correlation_method, CorrelationMethod::Spearman);
    assert_eq!(cli.target, "pm25");
    assert_eq!(cli.knn_k, 5);
    assert_eq!(cli.dbscan_eps, DbscanEps::Fixed(1.5));
    assert_eq!(cli.min_quality, 0);
    assert_eq!(cli.seed, 42);
    assert!(!cli.bundle, "Default bundle should be false");
    assert!(!cli.no_confirm, "Default no_confirm should be false");
    assert_eq!(
        cli.infer_schema_length, 10000,
        "Default schema inference should be 10000"
    );
}

#[test]
fn test_cli_source_paths() {
    let cli = Cli::parse_from([
        "airfuse",
        "--pollution",
        "openaq.csv",
        "--cities",
        "cities.parquet",
        "--indicators",
        "worldbank_economy.csv",
        "--indicators",
        "worldbank_energy.csv",
    ]);

    let paths = cli.source_paths().unwrap();
    assert_eq!(paths.pollution, PathBuf::from("openaq.csv"));
    assert_eq!(paths.cities, PathBuf::from("cities.parquet"));
    assert_eq!(paths.indicators.len(), 2);
}

#[test]
fn test_cli_analysis_overrides() {
    let cli = Cli::parse_from([
        "airfuse",
        "-w",
        "w.csv",
        "--correlation-method",
        "pearson",
        "--knn-k",
        "8",
        "--top-pairs",
        "3",
        "--min-quality",
        "2",
        "--seed",
        "7",
        "--target",
        "NO2",
    ]);

    let config = cli.analysis_config();
    assert_eq!(config.correlation_method, CorrelationMethod::Pearson);
    assert_eq!(config.knn_k, 8);
    assert_eq!(config.top_divergent_pairs, 3);
    assert_eq!(config.min_quality, 2);
    assert_eq!(config.seed, 7);
    assert_eq!(config.target, "no2");
}

#[test]
fn test_cli_subcommands() {
    let cli = Cli::parse_from(["airfuse", "-w", "w.csv", "check"]);
    assert!(matches!(cli.command, Some(Commands::Check)));

    let cli = Cli::parse_from(["airfuse", "fuse"]);
    assert!(matches!(cli.command, Some(Commands::Fuse)));
}

#[test]
fn test_cli_rejects_invalid_values() {
    assert!(Cli::try_parse_from(["airfuse", "--skew-threshold", "-1"]).is_err());
    assert!(Cli::try_parse_from(["airfuse", "--zscore-cutoff", "abc"]).is_err());
    assert!(Cli::try_parse_from(["airfuse", "--fusion-mode", "median"]).is_err());
    assert!(Cli::try_parse_from(["airfuse", "--dbscan-eps", "wide"]).is_err());
}

#[test]
fn test_check_command_runs_on_indicator_files() {
    let (_temp_dir, paths) = write_synthetic_sources(12);
    let mut args = Vec::new();
    for indicator in &paths.indicators {
        args.push("-w".to_string());
        args.push(indicator.display().to_string());
    }
    args.push("check".to_string());

    Command::cargo_bin("airfuse")
        .unwrap()
        .args(&args)
        .assert()
        .success()
        .stdout(predicate::str::contains("indicator record(s)"));
}

#[test]
fn test_check_command_requires_indicators() {
    Command::cargo_bin("airfuse")
        .unwrap()
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--indicators"));
}

#[test]
fn test_fuse_command_writes_both_tables() {
    let (temp_dir, paths) = write_synthetic_sources(12);
    let out = temp_dir.path().join("fused");
    let mut args = source_args(&paths);
    args.extend(output_args(&out));
    args.push("fuse".to_string());

    Command::cargo_bin("airfuse")
        .unwrap()
        .args(&args)
        .assert()
        .success();

    assert!(out.join("fused_latest.csv").exists());
    assert!(out.join("fused_mean.csv").exists());
    assert!(!out.join("analysis_report.json").exists());
}

#[test]
fn test_full_run_writes_report_and_bundle() {
    let (temp_dir, paths) = write_synthetic_sources(24);
    let out = temp_dir.path().join("results");
    let mut args = source_args(&paths);
    args.extend(output_args(&out));
    args.push("--bundle".to_string());

    Command::cargo_bin("airfuse")
        .unwrap()
        .args(&args)
        .assert()
        .success();

    for name in [
        "fused_latest.csv",
        "fused_mean.csv",
        "correlations.csv",
        "trends.csv",
        "chi2_tests.csv",
        "pca_loadings.csv",
        "graph_edges.csv",
        "model_evaluations.csv",
        "analysis_report.json",
        "airfuse_outputs.zip",
    ] {
        assert!(out.join(name).exists(), "missing {}", name);
    }
}

#[test]
fn test_full_run_fails_on_missing_source() {
    let (temp_dir, mut paths) = write_synthetic_sources(12);
    paths.pollution = temp_dir.path().join("does_not_exist.csv");
    let mut args = source_args(&paths);
    args.extend(output_args(&temp_dir.path().join("out")));

    Command::cargo_bin("airfuse")
        .unwrap()
        .args(&args)
        .assert()
        .failure();
}
