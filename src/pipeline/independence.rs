//! Chi-square tests of independence between categorical country attributes.

use serde::Serialize;

use super::catalog;
use super::error::AnalysisError;
use super::fusion::FusedRow;
use super::stats;

/// Fewer classified countries than this and a test is not attempted.
pub const MIN_OBSERVATIONS: usize = 10;

const EXCEEDS: &str = "exceeds";
const WITHIN: &str = "within";

/// Observed counts of two categorical variables. Only labels seen at least
/// once get a row or column, in the order the variable defines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContingencyTable {
    pub row_variable: String,
    pub column_variable: String,
    pub row_labels: Vec<String>,
    pub column_labels: Vec<String>,
    /// `counts[row][column]`
    pub counts: Vec<Vec<u64>>,
}

impl ContingencyTable {
    pub fn from_pairs(
        row_variable: &str,
        row_order: &[&str],
        column_variable: &str,
        column_order: &[&str],
        pairs: &[(&str, &str)],
    ) -> Self {
        let row_labels: Vec<String> = row_order
            .iter()
            .filter(|label| pairs.iter().any(|(r, _)| r == *label))
            .map(|label| label.to_string())
            .collect();
        let column_labels: Vec<String> = column_order
            .iter()
            .filter(|label| pairs.iter().any(|(_, c)| c == *label))
            .map(|label| label.to_string())
            .collect();

        let mut counts = vec![vec![0u64; column_labels.len()]; row_labels.len()];
        for (r, c) in pairs {
            let i = row_labels.iter().position(|l| l == r);
            let j = column_labels.iter().position(|l| l == c);
            if let (Some(i), Some(j)) = (i, j) {
                counts[i][j] += 1;
            }
        }

        Self {
            row_variable: row_variable.to_string(),
            column_variable: column_variable.to_string(),
            row_labels,
            column_labels,
            counts,
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    pub fn degrees_of_freedom(&self) -> usize {
        self.row_labels.len().saturating_sub(1) * self.column_labels.len().saturating_sub(1)
    }
}

/// Outcome of one chi-square test of independence.
#[derive(Debug, Clone, Serialize)]
pub struct IndependenceTest {
    pub name: String,
    pub n: u64,
    pub chi2: f64,
    pub dof: usize,
    pub p_value: f64,
    /// Effect size in [0, 1].
    pub cramers_v: f64,
    /// Yates continuity correction applies to 2x2 tables.
    pub yates_corrected: bool,
    pub significant: bool,
    pub table: ContingencyTable,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedTest {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndependenceReport {
    pub tests: Vec<IndependenceTest>,
    pub skipped: Vec<SkippedTest>,
}

/// Pearson's chi-square on a contingency table, with Cramér's V.
pub fn chi_square_test(
    name: &str,
    table: ContingencyTable,
) -> Result<IndependenceTest, AnalysisError> {
    let n = table.total();
    if (n as usize) < MIN_OBSERVATIONS {
        return Err(AnalysisError::insufficient(format!(
            "{} classified countries for {} (need {})",
            n, name, MIN_OBSERVATIONS
        )));
    }
    for (variable, labels) in [
        (&table.row_variable, &table.row_labels),
        (&table.column_variable, &table.column_labels),
    ] {
        if labels.len() < 2 {
            return Err(AnalysisError::degenerate(
                variable.as_str(),
                format!("only {} observed category", labels.len()),
            ));
        }
    }

    let total = n as f64;
    let row_sums: Vec<f64> = table
        .counts
        .iter()
        .map(|row| row.iter().sum::<u64>() as f64)
        .collect();
    let column_sums: Vec<f64> = (0..table.column_labels.len())
        .map(|j| table.counts.iter().map(|row| row[j]).sum::<u64>() as f64)
        .collect();

    let dof = table.degrees_of_freedom();
    let yates_corrected = dof == 1;
    let mut chi2 = 0.0;
    for (i, row) in table.counts.iter().enumerate() {
        for (j, &observed) in row.iter().enumerate() {
            let expected = row_sums[i] * column_sums[j] / total;
            let mut diff = (observed as f64 - expected).abs();
            if yates_corrected {
                diff -= diff.min(0.5);
            }
            chi2 += diff * diff / expected;
        }
    }

    let p_value = stats::chi_square_survival(chi2, dof)
        .ok_or_else(|| AnalysisError::degenerate(name, "chi-square statistic undefined"))?;
    let min_dim = table.row_labels.len().min(table.column_labels.len()) - 1;
    let cramers_v = (chi2 / (total * min_dim as f64)).sqrt().min(1.0);

    Ok(IndependenceTest {
        name: name.to_string(),
        n,
        chi2,
        dof,
        p_value,
        cramers_v,
        yates_corrected,
        significant: p_value < 0.05,
        table,
    })
}

/// PM2.5 band of a concentration; `None` for non-positive values.
pub fn pm25_level(value: f64) -> Option<&'static str> {
    if value.is_nan() || value <= 0.0 {
        return None;
    }
    catalog::PM25_LEVELS
        .iter()
        .find(|(upper, _)| value <= *upper)
        .map(|(_, label)| *label)
}

/// Income category against PM2.5 WHO exceedance and against PM2.5 band.
pub fn independence_tests(rows: &[&FusedRow]) -> IndependenceReport {
    let pm25 = catalog::pollutant_column("pm25");
    let income_order: Vec<&str> = catalog::INCOME_BINS.iter().map(|(_, l)| *l).collect();
    let level_order: Vec<&str> = catalog::PM25_LEVELS.iter().map(|(_, l)| *l).collect();
    let classified: Vec<(&str, f64)> = rows
        .iter()
        .filter_map(|r| Some((r.category(catalog::INCOME_CATEGORY)?, r.number(&pm25)?)))
        .collect();

    let mut candidates = Vec::new();
    if let Some(threshold) = catalog::who_threshold("pm25") {
        let pairs: Vec<(&str, &str)> = classified
            .iter()
            .map(|(income, v)| (*income, if *v > threshold.value { EXCEEDS } else { WITHIN }))
            .collect();
        candidates.push((
            "income_category vs pm25_who_exceedance",
            ContingencyTable::from_pairs(
                catalog::INCOME_CATEGORY,
                &income_order,
                "pm25_who_exceedance",
                &[WITHIN, EXCEEDS],
                &pairs,
            ),
        ));
    }
    let pairs: Vec<(&str, &str)> = classified
        .iter()
        .filter_map(|(income, v)| Some((*income, pm25_level(*v)?)))
        .collect();
    candidates.push((
        "income_category vs pm25_level",
        ContingencyTable::from_pairs(
            catalog::INCOME_CATEGORY,
            &income_order,
            "pm25_level",
            &level_order,
            &pairs,
        ),
    ));

    let mut report = IndependenceReport::default();
    for (name, table) in candidates {
        match chi_square_test(name, table) {
            Ok(test) => report.tests.push(test),
            Err(err) => report.skipped.push(SkippedTest {
                name: name.to_string(),
                reason: err.to_string(),
            }),
        }
    }
    report
}
