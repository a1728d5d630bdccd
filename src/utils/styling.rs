//! Terminal styling utilities for step-by-step console output

use console::{style, Emoji};
use std::path::Path;
use std::time::Duration;

use crate::pipeline::config::AnalysisConfig;

// Emoji icons with fallbacks for terminals that don't support them
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "[*] ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", ">> ");
pub static CHART: Emoji<'_, '_> = Emoji("📊 ", "");
pub static FOLDER: Emoji<'_, '_> = Emoji("📂 ", "");
pub static TARGET: Emoji<'_, '_> = Emoji("🎯 ", "");
pub static SAVE: Emoji<'_, '_> = Emoji("💾 ", "");
pub static LINK: Emoji<'_, '_> = Emoji("🔗 ", "");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!] ");

/// Print the application banner
pub fn print_banner(version: &str) {
    let banner = r#"
     █████╗ ██╗██████╗ ███████╗██╗   ██╗███████╗███████╗
    ██╔══██╗██║██╔══██╗██╔════╝██║   ██║██╔════╝██╔════╝
    ███████║██║██████╔╝█████╗  ██║   ██║███████╗█████╗
    ██╔══██║██║██╔══██╗██╔══╝  ██║   ██║╚════██║██╔══╝
    ██║  ██║██║██║  ██║██║     ╚██████╔╝███████║███████╗
    ╚═╝  ╚═╝╚═╝╚═╝  ╚═╝╚═╝      ╚═════╝ ╚══════╝╚══════╝
    "#;

    println!();
    println!("{}", style(banner).cyan().bold());
    println!(
        "    {}",
        style("Air quality, cities and development indicators, fused").dim()
    );
    println!("    {}", style(format!("v{}", version)).dim());
    println!("    {}", style("━".repeat(50)).dim());
    println!();
}

/// Print configuration card
pub fn print_config(inputs: &[&Path], output: &Path, config: &AnalysisConfig) {
    let box_width = 56;
    let line = "─".repeat(box_width - 2);

    println!("    ┌{}┐", line);
    println!(
        "    │ {}{}│",
        style("⚙️  Configuration").cyan().bold(),
        " ".repeat(box_width - 20)
    );
    println!("    ├{}┤", line);
    for input in inputs {
        println!("    │  {} Input:  {:<39}│", FOLDER, truncate_path(input, 38));
    }
    println!(
        "    │  {} Target: {:<39}│",
        TARGET,
        truncate_string(&config.target_column(), 38)
    );
    println!("    │  {} Output: {:<39}│", SAVE, truncate_path(output, 38));
    println!("    ├{}┤", line);
    println!(
        "    │  {} Fusion mode:        {:<27}│",
        CHART,
        style(config.fusion_mode).yellow()
    );
    println!(
        "    │  {} Correlation method: {:<27}│",
        LINK,
        style(config.correlation_method).yellow()
    );
    println!("    └{}┘", line);
    println!();
}

/// Print a step header with styling
pub fn print_step_header(step_num: u8, title: &str) {
    println!();
    println!(
        "    {} {} {}",
        style(format!("STEP {}", step_num)).cyan().bold(),
        style("│").dim(),
        style(title).white().bold()
    );
    println!("    {}", style("─".repeat(50)).dim());
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("    {} {}", style("✓").green().bold(), style(message).green());
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("    {} {}", INFO, message);
}

/// Print a warning for a skipped analysis, feature or model
pub fn print_warning(message: &str) {
    println!("    {} {}", WARN, style(message).yellow());
}

/// Print the elapsed time of a step
pub fn print_step_time(elapsed: Duration) {
    println!(
        "      {}",
        style(format!("⏱  {:.2}s", elapsed.as_secs_f64())).dim()
    );
}

/// Print the final completion message
pub fn print_completion() {
    println!();
    println!(
        "    {} {}",
        ROCKET,
        style("Airfuse analysis complete!").green().bold()
    );
    println!();
}

/// Print a styled count message
pub fn print_count(description: &str, count: usize, detail: Option<&str>) {
    if let Some(info) = detail {
        println!(
            "      Found {} {} {}",
            style(count).yellow().bold(),
            description,
            style(info).dim()
        );
    } else {
        println!("      Found {} {}", style(count).yellow().bold(), description);
    }
}

fn truncate_path(path: &Path, max_len: usize) -> String {
    let path_str = path.display().to_string();
    truncate_string(&path_str, max_len)
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let tail: String = s
            .chars()
            .rev()
            .take(max_len.saturating_sub(3))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("...{}", tail)
    }
}
