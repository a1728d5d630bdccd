//! Airfuse: Air-Pollution Fusion and Analysis CLI Tool
//!
//! Loads pollution, city and development-indicator tables, reconciles their
//! country codes, writes the fused per-country tables and runs the analysis
//! suite over the selected one.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;

use airfuse::cli::{confirm_overwrite, Cli, Commands};
use airfuse::pipeline::loader::load_indicators;
use airfuse::pipeline::{
    fuse_all, load_sources, missing_indicator_codes, resolve, run_analyses, AnalysisConfig,
    CountryTable, FusionOutputs, OutlierFilter, SourceTables,
};
use airfuse::report::{
    export_analysis_report, export_result_tables, package_outputs, write_fused_table,
    AnalysisReport, AnalysisSummary, FusionOverview,
};
use airfuse::utils::{
    create_spinner, finish_with_success, finish_with_warning, print_banner, print_completion,
    print_config, print_count, print_info, print_step_header, print_step_time, print_success,
    print_warning,
};

const REPORT_FILE: &str = "analysis_report.json";
const BUNDLE_FILE: &str = "airfuse_outputs.zip";
/// Skip reasons printed before the remainder is summarized as a count.
const MAX_WARNINGS: usize = 15;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Check) => run_check(&cli),
        Some(Commands::Fuse) => run_fuse(&cli),
        None => run_pipeline(&cli),
    }
}

/// Report catalog indicator codes missing from the indicator files.
fn run_check(cli: &Cli) -> Result<()> {
    let paths = cli.indicator_paths().map_err(anyhow::Error::msg)?;
    print_step_header(1, "Indicator Completeness Check");

    let mut records = Vec::new();
    for path in paths {
        records.extend(load_indicators(path, cli.infer_schema_length)?);
    }
    print_count("indicator record(s)", records.len(), None);

    let missing = missing_indicator_codes(&records);
    if missing.is_empty() {
        print_success("Every catalog indicator is present");
        return Ok(());
    }
    for (axis, codes) in &missing {
        print_warning(&format!(
            "{}: {} missing ({})",
            axis,
            codes.len(),
            codes.iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    Ok(())
}

/// Load, resolve and fuse, then write both fused tables.
fn run_fuse(cli: &Cli) -> Result<()> {
    let config = cli.analysis_config();
    if !prepare_output_dir(cli)? {
        return Ok(());
    }
    let (_, countries, outputs) = load_resolve_fuse(cli, &config)?;
    write_fused_tables(&outputs, &cli.output_dir, 4)?;
    print_info(&format!(
        "{} countries, {} unresolved",
        outputs.latest.rows.len(),
        countries.unresolved().len()
    ));
    print_completion();
    Ok(())
}

fn run_pipeline(cli: &Cli) -> Result<()> {
    let config = cli.analysis_config();
    let paths = cli.source_paths().map_err(anyhow::Error::msg)?;
    let mut inputs: Vec<&Path> = vec![paths.pollution.as_path(), paths.cities.as_path()];
    inputs.extend(paths.indicators.iter().map(PathBuf::as_path));

    print_banner(env!("CARGO_PKG_VERSION"));
    print_config(&inputs, &cli.output_dir, &config);

    if !prepare_output_dir(cli)? {
        return Ok(());
    }

    let (tables, countries, outputs) = load_resolve_fuse(cli, &config)?;
    let mut written = write_fused_tables(&outputs, &cli.output_dir, 4)?;

    // Step 5: Analyses
    print_step_header(5, "Analysis Suite");
    let step_start = Instant::now();
    let table = outputs.select(config.fusion_mode);
    let spinner = create_spinner(&format!(
        "Running correlation, PCA, similarity graph and models on {}...",
        table.mode.file_name()
    ));
    let suite = run_analyses(table, &tables.pollution, &config);
    let skips = suite.skip_reasons();
    if skips.is_empty() {
        finish_with_success(&spinner, "Analyses complete");
    } else {
        finish_with_warning(
            &spinner,
            &format!("Analyses complete with {} skip(s)", skips.len()),
        );
        for reason in skips.iter().take(MAX_WARNINGS) {
            print_warning(reason);
        }
        if skips.len() > MAX_WARNINGS {
            print_info(&format!(
                "{} more skip(s) recorded in {}",
                skips.len() - MAX_WARNINGS,
                REPORT_FILE
            ));
        }
    }
    print_step_time(step_start.elapsed());

    // Step 6: Export
    print_step_header(6, "Export Results");
    let step_start = Instant::now();
    let spinner = create_spinner("Writing result tables and report...");
    written.extend(export_result_tables(&suite, &cli.output_dir)?);

    let overview = FusionOverview::new(&countries, table);
    let missing_codes = missing_indicator_codes(&tables.indicators);
    let report = AnalysisReport::new(
        &inputs,
        &cli.output_dir,
        &config,
        overview.clone(),
        &missing_codes,
        &suite,
    );
    let report_path = cli.output_dir.join(REPORT_FILE);
    export_analysis_report(&report, &report_path)?;
    written.push(report_path);
    finish_with_success(
        &spinner,
        &format!("Wrote {} file(s) to {}", written.len(), cli.output_dir.display()),
    );

    if cli.bundle {
        let zip_path = cli.output_dir.join(BUNDLE_FILE);
        package_outputs(&written, &zip_path)?;
        print_success(&format!("Bundled outputs into {}", zip_path.display()));
    }
    print_step_time(step_start.elapsed());

    AnalysisSummary::new(&overview, &suite).display();
    print_completion();
    Ok(())
}

/// Create the output directory, asking before writing into a non-empty one.
/// Returns false when the user declines.
fn prepare_output_dir(cli: &Cli) -> Result<bool> {
    if !cli.no_confirm && !confirm_overwrite(&cli.output_dir)? {
        println!("Cancelled by user.");
        return Ok(false);
    }
    std::fs::create_dir_all(&cli.output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            cli.output_dir.display()
        )
    })?;
    Ok(true)
}

/// Steps 1-3: load the sources, resolve country keys, build both fused tables.
fn load_resolve_fuse(
    cli: &Cli,
    config: &AnalysisConfig,
) -> Result<(SourceTables, CountryTable, FusionOutputs)> {
    let paths = cli.source_paths().map_err(anyhow::Error::msg)?;

    // Step 1: Load
    print_step_header(1, "Load Sources");
    let step_start = Instant::now();
    let spinner = create_spinner("Reading pollution, city and indicator files...");
    let tables = load_sources(&paths, cli.infer_schema_length)?;
    finish_with_success(&spinner, "Sources loaded");
    println!("\n    {} Source records:", style("✧").cyan());
    println!("      Pollution measurements: {}", tables.pollution.len());
    println!("      City rows: {}", tables.cities.len());
    println!("      Indicator observations: {}", tables.indicators.len());
    print_step_time(step_start.elapsed());

    // Step 2: Resolve
    print_step_header(2, "Resolve Country Keys");
    let step_start = Instant::now();
    let countries = resolve(&tables);
    print_count("distinct countries", countries.len(), None);
    let unresolved = countries.unresolved();
    if unresolved.is_empty() {
        print_success("Every identifier cross-referenced");
    } else {
        print_count(
            "unresolved identifier(s)",
            unresolved.len(),
            Some("(kept and flagged)"),
        );
        for err in unresolved.iter().take(MAX_WARNINGS) {
            print_warning(&err.to_string());
        }
    }
    print_step_time(step_start.elapsed());

    // Step 3: Fuse
    print_step_header(3, "Fuse Sources");
    let step_start = Instant::now();
    let outputs = fuse_all(&tables, &countries, OutlierFilter::from(config))
        .context("Failed to build the fused table")?;
    print_count(
        "fused column(s)",
        outputs.latest.columns.len(),
        Some(&format!("over {} countries", outputs.latest.rows.len())),
    );
    print_step_time(step_start.elapsed());

    Ok((tables, countries, outputs))
}

/// Step 4: write both fused tables
fn write_fused_tables(outputs: &FusionOutputs, output_dir: &Path, step: u8) -> Result<Vec<PathBuf>> {
    print_step_header(step, "Write Fused Tables");
    let step_start = Instant::now();
    let mut written = Vec::new();
    for table in [&outputs.latest, &outputs.mean] {
        let path = write_fused_table(table, output_dir)?;
        print_success(&format!("Saved {}", path.display()));
        written.push(path);
    }
    print_step_time(step_start.elapsed());
    Ok(written)
}
