//! Analysis summary tables for the terminal

use comfy_table::{presets::UTF8_FULL_CONDENSED, Attribute, Cell, Color, Table};
use console::style;

use crate::pipeline::{Analysis, AnalysisSuite};

use super::export::FusionOverview;

const TOP_CORRELATIONS: usize = 10;

fn header(icon: &str, title: &str) {
    println!();
    println!("    {} {}", style(icon).cyan(), style(title).white().bold());
    println!("    {}", style("─".repeat(50)).dim());
    println!();
}

fn print_indented(table: &Table) {
    for line in table.to_string().lines() {
        println!("    {}", line);
    }
}

fn new_table(columns: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(
        columns
            .iter()
            .map(|c| Cell::new(c).add_attribute(Attribute::Bold))
            .collect::<Vec<_>>(),
    );
    table
}

fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    value
        .map(|v| format!("{:.*}", decimals, v))
        .unwrap_or_else(|| "-".to_string())
}

fn status_cell<T>(analysis: &Analysis<T>, available: impl FnOnce(&T) -> String) -> Cell {
    match analysis {
        Analysis::Available(value) => Cell::new(available(value)).fg(Color::Green),
        Analysis::Unavailable { reason } => Cell::new(format!("skipped: {}", reason)).fg(Color::Yellow),
    }
}

/// Summary of one analysis run
#[derive(Debug)]
pub struct AnalysisSummary<'a> {
    pub fusion: &'a FusionOverview,
    pub suite: &'a AnalysisSuite,
}

impl<'a> AnalysisSummary<'a> {
    pub fn new(fusion: &'a FusionOverview, suite: &'a AnalysisSuite) -> Self {
        Self { fusion, suite }
    }

    pub fn display(&self) {
        self.display_overview();
        self.display_correlations();
        self.display_models();
    }

    fn display_overview(&self) {
        header("📋", "ANALYSIS SUMMARY");
        let suite = self.suite;
        let mut table = new_table(&["Metric", "Value"]);

        table.add_row(vec![
            Cell::new("🌍 Countries fused"),
            Cell::new(self.fusion.n_countries),
        ]);
        table.add_row(vec![
            Cell::new("❓ Unresolved identifiers"),
            Cell::new(self.fusion.unresolved.len()).fg(if self.fusion.unresolved.is_empty() {
                Color::White
            } else {
                Color::Red
            }),
        ]);
        table.add_row(vec![
            Cell::new("✅ Eligible for analysis"),
            Cell::new(suite.n_eligible)
                .fg(Color::Green)
                .add_attribute(Attribute::Bold),
        ]);
        table.add_row(vec![
            Cell::new("🗂️  Fusion mode"),
            Cell::new(suite.fusion_mode),
        ]);
        table.add_row(vec![
            Cell::new("🔗 Significant correlations"),
            Cell::new(format!(
                "{} of {} ({} skipped)",
                suite.correlations.significant().count(),
                suite.correlations.results.len(),
                suite.correlations.skipped.len()
            )),
        ]);
        table.add_row(vec![
            Cell::new("📈 Pollutant trends"),
            Cell::new(format!(
                "{} fitted, {} significant, {} skipped",
                suite.trends.trends.len(),
                suite.trends.trends.iter().filter(|t| t.significant).count(),
                suite.trends.skipped.len()
            )),
        ]);
        table.add_row(vec![
            Cell::new("🧮 Chi-square tests"),
            Cell::new(format!(
                "{} of {} significant ({} skipped)",
                suite.independence.tests.iter().filter(|t| t.significant).count(),
                suite.independence.tests.len(),
                suite.independence.skipped.len()
            )),
        ]);
        table.add_row(vec![
            Cell::new("📊 PCA"),
            status_cell(&suite.pca, |m| {
                format!(
                    "{} components, {:.1}% variance",
                    m.components.len(),
                    m.cumulative_variance() * 100.0
                )
            }),
        ]);
        table.add_row(vec![
            Cell::new("🕸️  Similarity graph"),
            status_cell(&suite.graph, |g| {
                let communities = g
                    .partition
                    .value()
                    .map(|p| p.n_communities.to_string())
                    .unwrap_or_else(|| "no".to_string());
                format!(
                    "{} nodes, {} communities, {} kNN / {} DBSCAN outliers",
                    g.nodes.len(),
                    communities,
                    g.knn_outliers().len(),
                    g.dbscan_outliers().len()
                )
            }),
        ]);
        table.add_row(vec![
            Cell::new("🎯 Predictive models"),
            status_cell(&suite.models, |r| {
                format!(
                    "{} evaluated, best: {}",
                    r.evaluations.len(),
                    r.best_model.as_deref().unwrap_or("-")
                )
            }),
        ]);
        print_indented(&table);

        let exceeding: Vec<String> = suite
            .descriptive
            .pollutants
            .iter()
            .filter_map(|p| {
                p.share_exceeding
                    .map(|share| format!("{} {:.0}%", p.column, share * 100.0))
            })
            .collect();
        if !exceeding.is_empty() {
            println!();
            println!(
                "      {} {}",
                style("Above WHO annual guideline:").yellow(),
                exceeding.join(", ")
            );
        }
    }

    fn display_correlations(&self) {
        let top = self.suite.correlations.top(TOP_CORRELATIONS);
        if top.is_empty() {
            return;
        }
        header("🔗", "STRONGEST SIGNIFICANT CORRELATIONS");
        let mut table = new_table(&["Pollutant", "Feature", "r", "p", "n"]);
        for r in top {
            let color = if r.coefficient > 0.0 { Color::Red } else { Color::Cyan };
            table.add_row(vec![
                Cell::new(&r.feature_a),
                Cell::new(crate::pipeline::catalog::label(&r.feature_b)),
                Cell::new(format!("{:+.3}", r.coefficient)).fg(color),
                Cell::new(format!("{:.4}", r.p_value)),
                Cell::new(r.sample_size),
            ]);
        }
        print_indented(&table);
    }

    fn display_models(&self) {
        let Some(report) = self.suite.models.value() else {
            return;
        };
        header("🎯", &format!("MODELS FOR {}", report.target.to_uppercase()));
        let mut table = new_table(&["Model", "CV R²", "CV MAE", "Train R²", "Test R²", "Gap", "LOO R²"]);
        for e in &report.evaluations {
            let gap = e.holdout.value().map(|h| h.overfit_gap);
            let gap_color = match gap {
                Some(g) if g > 0.2 => Color::Red,
                Some(g) if g > 0.1 => Color::Yellow,
                _ => Color::White,
            };
            let name = if report.best_model.as_deref() == Some(e.model_name.as_str()) {
                Cell::new(&e.model_name).add_attribute(Attribute::Bold).fg(Color::Green)
            } else {
                Cell::new(&e.model_name)
            };
            table.add_row(vec![
                name,
                Cell::new(format!("{:.3} ± {:.3}", e.cross_val_mean(), e.cross_val_std())),
                Cell::new(format!("{:.2}", e.cross_validation.mae_mean)),
                Cell::new(fmt_opt(e.train_score(), 3)),
                Cell::new(fmt_opt(e.test_score(), 3)),
                Cell::new(fmt_opt(gap, 3)).fg(gap_color),
                Cell::new(fmt_opt(e.loo.value().map(|l| l.r2), 3)),
            ]);
        }
        for s in &report.skipped {
            table.add_row(vec![
                Cell::new(&s.model_name).fg(Color::Yellow),
                Cell::new(format!("skipped: {}", s.reason)).fg(Color::Yellow),
            ]);
        }
        print_indented(&table);

        if let Some(residuals) = report.residuals.value() {
            println!();
            println!(
                "      {} {}:",
                style("Largest residuals").yellow(),
                style(format!("({})", residuals.model_name)).dim()
            );
            for r in &residuals.largest {
                println!(
                    "        {} {} {:+.2}",
                    style("•").dim(),
                    r.country,
                    r.residual
                );
            }
        }
        if let Some(ranking) = report.importance.value() {
            println!();
            println!("      {}:", style("Consolidated feature importance").yellow());
            for f in ranking.iter().take(5) {
                println!(
                    "        {} {} {}",
                    style("•").dim(),
                    f.label,
                    style(format!("(mean rank {:.1})", f.mean_rank)).dim()
                );
            }
        }
    }
}
