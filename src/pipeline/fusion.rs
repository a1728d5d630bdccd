//! Fusion of the three sources into one wide per-country table, with
//! derived features and a coverage-based quality score.

use std::collections::{BTreeMap, BTreeSet};

use polars::prelude::*;
use serde::Serialize;

use super::catalog;
use super::config::{AnalysisConfig, FusionMode};
use super::error::AnalysisError;
use super::loader::{IndicatorRecord, SourceTables};
use super::resolver::{Country, CountryTable};
use super::stats;

/// Which source a fused column came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnSource {
    Pollution,
    Indicator,
    City,
    Derived,
}

/// Structured provenance of a flat column name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnKey {
    pub source: ColumnSource,
    /// Thematic axis of an indicator column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub axis: Option<String>,
    /// Pollutant parameter, indicator code or raw column name.
    pub code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    pub key: ColumnKey,
    pub kind: ColumnKind,
}

/// A present cell value. Missing cells are simply absent from the row map.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Category(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) => Some(*v),
            FieldValue::Category(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Number(_) => None,
            FieldValue::Category(s) => Some(s),
        }
    }
}

/// One row per canonical country.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedRow {
    pub country: Country,
    pub values: BTreeMap<String, FieldValue>,
    pub n_available_pollutants: usize,
    pub quality_score: u8,
}

impl FusedRow {
    pub fn key(&self) -> &str {
        &self.country.canonical_key
    }

    pub fn number(&self, column: &str) -> Option<f64> {
        self.values.get(column).and_then(FieldValue::as_f64)
    }

    pub fn category(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(FieldValue::as_str)
    }
}

/// The fused matrix. Frozen once built.
#[derive(Debug, Clone, Serialize)]
pub struct FusedTable {
    pub mode: FusionMode,
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<FusedRow>,
}

impl FusedTable {
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn numeric_column(&self, name: &str) -> Vec<Option<f64>> {
        self.rows.iter().map(|r| r.number(name)).collect()
    }

    /// Pollutant columns in priority order.
    pub fn pollutant_columns(&self) -> Vec<String> {
        catalog::POLLUTANTS
            .iter()
            .map(|p| catalog::pollutant_column(p))
            .filter(|c| self.has_column(c))
            .collect()
    }

    /// Numeric indicator and city columns, excluding coordinates.
    pub fn explanatory_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Numeric)
            .filter(|c| matches!(c.key.source, ColumnSource::Indicator | ColumnSource::City))
            .filter(|c| c.name != catalog::LATITUDE && c.name != catalog::LONGITUDE)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Rows usable by coverage-gated analyses.
    pub fn eligible_rows(&self, min_quality: u8) -> Vec<&FusedRow> {
        self.rows
            .iter()
            .filter(|r| !r.country.unresolved && r.quality_score >= min_quality)
            .collect()
    }

    pub fn row(&self, key: &str) -> Option<&FusedRow> {
        self.rows.iter().find(|r| r.key() == key)
    }

    /// Flat polars view: identity columns, coverage, then every fused column.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let mut columns: Vec<Column> = vec![
            Column::new(
                "country".into(),
                self.rows.iter().map(|r| r.key().to_string()).collect::<Vec<_>>(),
            ),
            Column::new(
                "iso2".into(),
                self.rows.iter().map(|r| r.country.iso2.clone()).collect::<Vec<_>>(),
            ),
            Column::new(
                "iso3".into(),
                self.rows.iter().map(|r| r.country.iso3.clone()).collect::<Vec<_>>(),
            ),
            Column::new(
                "display_name".into(),
                self.rows
                    .iter()
                    .map(|r| r.country.display_name.clone())
                    .collect::<Vec<_>>(),
            ),
            Column::new(
                "unresolved".into(),
                self.rows.iter().map(|r| r.country.unresolved).collect::<Vec<_>>(),
            ),
            Column::new(
                "n_available_pollutants".into(),
                self.rows
                    .iter()
                    .map(|r| r.n_available_pollutants as u32)
                    .collect::<Vec<_>>(),
            ),
            Column::new(
                "quality_score".into(),
                self.rows.iter().map(|r| r.quality_score as u32).collect::<Vec<_>>(),
            ),
        ];
        for meta in &self.columns {
            let column = match meta.kind {
                ColumnKind::Numeric => Column::new(
                    meta.name.as_str().into(),
                    self.numeric_column(&meta.name),
                ),
                ColumnKind::Categorical => Column::new(
                    meta.name.as_str().into(),
                    self.rows
                        .iter()
                        .map(|r| r.category(&meta.name).map(str::to_string))
                        .collect::<Vec<_>>(),
                ),
            };
            columns.push(column);
        }
        DataFrame::new(columns)
    }
}

/// Both fusion outputs, built from the same sources.
#[derive(Debug, Clone)]
pub struct FusionOutputs {
    pub latest: FusedTable,
    pub mean: FusedTable,
}

impl FusionOutputs {
    pub fn select(&self, mode: FusionMode) -> &FusedTable {
        match mode {
            FusionMode::LatestYear => &self.latest,
            FusionMode::AllYearsMean => &self.mean,
        }
    }
}

/// Options of the indicator outlier filter.
#[derive(Debug, Clone, Copy)]
pub struct OutlierFilter {
    pub zscore_cutoff: f64,
    pub min_group: usize,
}

impl Default for OutlierFilter {
    fn default() -> Self {
        Self {
            zscore_cutoff: 3.0,
            min_group: 5,
        }
    }
}

impl From<&AnalysisConfig> for OutlierFilter {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            zscore_cutoff: config.zscore_cutoff,
            min_group: config.zscore_min_group,
        }
    }
}

/// Build both the latest-year and the all-years-mean tables.
pub fn fuse_all(
    tables: &SourceTables,
    countries: &CountryTable,
    filter: OutlierFilter,
) -> Result<FusionOutputs, AnalysisError> {
    Ok(FusionOutputs {
        latest: fuse(tables, countries, FusionMode::LatestYear, filter)?,
        mean: fuse(tables, countries, FusionMode::AllYearsMean, filter)?,
    })
}

/// Fuse the sources into one row per canonical country.
pub fn fuse(
    tables: &SourceTables,
    countries: &CountryTable,
    mode: FusionMode,
    filter: OutlierFilter,
) -> Result<FusedTable, AnalysisError> {
    if countries.is_empty() {
        return Err(AnalysisError::insufficient(
            "no country could be identified in any source",
        ));
    }

    let mut columns: Vec<ColumnMeta> = Vec::new();
    let mut cells: BTreeMap<String, BTreeMap<String, FieldValue>> = countries
        .keys()
        .map(|k| (k.clone(), BTreeMap::new()))
        .collect();

    // Pollutants
    for (parameter, per_country) in pivot_pollution(tables, countries, mode) {
        let name = catalog::pollutant_column(&parameter);
        for (key, value) in per_country {
            if let Some(row) = cells.get_mut(&key) {
                row.insert(name.clone(), FieldValue::Number(value));
            }
        }
        columns.push(ColumnMeta {
            name,
            key: ColumnKey {
                source: ColumnSource::Pollution,
                axis: None,
                code: parameter,
            },
            kind: ColumnKind::Numeric,
        });
    }

    // Indicators
    let kept = filter_indicator_outliers(&tables.indicators, filter);
    let (indicator_values, axes) = latest_indicator_values(&kept, countries);
    for (code, axis) in &axes {
        columns.push(ColumnMeta {
            name: code.clone(),
            key: ColumnKey {
                source: ColumnSource::Indicator,
                axis: axis.clone(),
                code: code.clone(),
            },
            kind: ColumnKind::Numeric,
        });
    }
    for ((key, code), value) in indicator_values {
        if let Some(row) = cells.get_mut(&key) {
            row.insert(code, FieldValue::Number(value));
        }
    }

    // City attributes, first non-missing value per country wins
    let mut city_columns: BTreeSet<String> = BTreeSet::new();
    for city in &tables.cities {
        let Some(key) = countries.key_for_city(city) else {
            continue;
        };
        let Some(row) = cells.get_mut(&key) else {
            continue;
        };
        for (name, value) in &city.attributes {
            city_columns.insert(name.clone());
            if let Some(v) = value {
                row.entry(name.clone()).or_insert(FieldValue::Number(*v));
            }
        }
    }
    for name in city_columns {
        if axes.contains_key(&name) {
            continue;
        }
        columns.push(ColumnMeta {
            key: ColumnKey {
                source: ColumnSource::City,
                axis: None,
                code: name.clone(),
            },
            name,
            kind: ColumnKind::Numeric,
        });
    }

    let mut rows: Vec<FusedRow> = countries
        .iter()
        .map(|country| FusedRow {
            values: cells.remove(&country.canonical_key).unwrap_or_default(),
            country: country.clone(),
            n_available_pollutants: 0,
            quality_score: 0,
        })
        .collect();

    let pollutant_names: Vec<String> = columns
        .iter()
        .filter(|c| c.key.source == ColumnSource::Pollution)
        .map(|c| c.name.clone())
        .collect();

    add_pollution_index(&mut rows, &pollutant_names, &mut columns);
    add_income_category(&mut rows, &mut columns);
    add_population_quartile(&mut rows, &mut columns);

    for row in &mut rows {
        row.n_available_pollutants = pollutant_names
            .iter()
            .filter(|p| row.values.contains_key(p.as_str()))
            .count();
        row.quality_score = quality_score(row);
    }

    Ok(FusedTable {
        mode,
        columns,
        rows,
    })
}

/// Pivot pollutant observations to one value per (parameter, country).
/// Parameters come out in priority order.
fn pivot_pollution(
    tables: &SourceTables,
    countries: &CountryTable,
    mode: FusionMode,
) -> Vec<(String, BTreeMap<String, f64>)> {
    let mut observations: BTreeMap<(String, String), Vec<(Option<i32>, f64)>> = BTreeMap::new();
    for record in &tables.pollution {
        let Some(value) = record.average else {
            continue;
        };
        if !catalog::POLLUTANTS.contains(&record.parameter.as_str()) {
            continue;
        }
        let key = countries.key_for_iso2(&record.country_code);
        observations
            .entry((record.parameter.clone(), key))
            .or_default()
            .push((record.year, value));
    }

    catalog::POLLUTANTS
        .iter()
        .filter_map(|parameter| {
            let per_country: BTreeMap<String, f64> = observations
                .iter()
                .filter(|((p, _), _)| p == parameter)
                .filter_map(|((_, key), obs)| {
                    let value = match mode {
                        FusionMode::LatestYear => {
                            let latest = obs.iter().map(|(y, _)| *y).max()?;
                            let at_latest: Vec<f64> = obs
                                .iter()
                                .filter(|(y, _)| *y == latest)
                                .map(|(_, v)| *v)
                                .collect();
                            stats::mean(&at_latest)?
                        }
                        FusionMode::AllYearsMean => {
                            let all: Vec<f64> = obs.iter().map(|(_, v)| *v).collect();
                            stats::mean(&all)?
                        }
                    };
                    Some((key.clone(), value))
                })
                .collect();
            if per_country.is_empty() {
                None
            } else {
                Some((parameter.to_string(), per_country))
            }
        })
        .collect()
}

/// Drop indicator values farther than `zscore_cutoff` population standard
/// deviations from their indicator-code group mean. Groups smaller than
/// `min_group` and constant groups are left untouched.
pub fn filter_indicator_outliers(
    records: &[IndicatorRecord],
    filter: OutlierFilter,
) -> Vec<IndicatorRecord> {
    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for record in records {
        if let Some(v) = record.value {
            groups.entry(record.code.as_str()).or_default().push(v);
        }
    }

    let bounds: BTreeMap<&str, (f64, f64)> = groups
        .iter()
        .filter(|(_, values)| values.len() >= filter.min_group)
        .filter_map(|(code, values)| {
            let mean = stats::mean(values)?;
            let std = stats::std_dev(values, 0)?;
            (std > 0.0).then_some((*code, (mean, std)))
        })
        .collect();

    records
        .iter()
        .filter(|r| {
            let Some(value) = r.value else {
                return false;
            };
            match bounds.get(r.code.as_str()) {
                Some((mean, std)) => ((value - mean) / std).abs() < filter.zscore_cutoff,
                None => true,
            }
        })
        .cloned()
        .collect()
}

type IndicatorCells = BTreeMap<(String, String), f64>;

/// Most recent non-missing value per (country, indicator); ties go to the
/// last-inserted record. Also returns each code's axis (first seen).
fn latest_indicator_values(
    records: &[IndicatorRecord],
    countries: &CountryTable,
) -> (IndicatorCells, BTreeMap<String, Option<String>>) {
    let mut latest: BTreeMap<(String, String), (Option<i32>, f64)> = BTreeMap::new();
    let mut axes: BTreeMap<String, Option<String>> = BTreeMap::new();

    for record in records {
        let Some(value) = record.value else {
            continue;
        };
        let entry_axis = axes.entry(record.code.clone()).or_insert(None);
        if entry_axis.is_none() {
            *entry_axis = record.axis.clone();
        }
        let key = (countries.key_for_iso3(&record.economy), record.code.clone());
        let newer = latest
            .get(&key)
            .map_or(true, |(year, _)| record.year >= *year);
        if newer {
            latest.insert(key, (record.year, value));
        }
    }

    let values = latest.into_iter().map(|(k, (_, v))| (k, v)).collect();
    (values, axes)
}

fn derived_column(name: &str, kind: ColumnKind) -> ColumnMeta {
    ColumnMeta {
        name: name.to_string(),
        key: ColumnKey {
            source: ColumnSource::Derived,
            axis: None,
            code: name.to_string(),
        },
        kind,
    }
}

/// Mean of min-max normalized pollutants; zero-range pollutants are skipped.
fn add_pollution_index(rows: &mut [FusedRow], pollutants: &[String], columns: &mut Vec<ColumnMeta>) {
    let ranges: Vec<(&String, f64, f64)> = pollutants
        .iter()
        .filter_map(|p| {
            let values: Vec<f64> = rows.iter().filter_map(|r| r.number(p)).collect();
            stats::min_max(&values).map(|(min, max)| (p, min, max))
        })
        .collect();

    for row in rows.iter_mut() {
        let normalized: Vec<f64> = ranges
            .iter()
            .filter_map(|(p, min, max)| row.number(p).map(|v| (v - min) / (max - min)))
            .collect();
        if let Some(index) = stats::mean(&normalized) {
            row.values
                .insert(catalog::POLLUTION_INDEX.to_string(), FieldValue::Number(index));
        }
    }
    columns.push(derived_column(catalog::POLLUTION_INDEX, ColumnKind::Numeric));
}

/// Income category from GDP per capita using fixed bins.
pub fn income_category(gdp_per_capita: f64) -> Option<&'static str> {
    if !gdp_per_capita.is_finite() || gdp_per_capita < 0.0 {
        return None;
    }
    catalog::INCOME_BINS
        .iter()
        .rev()
        .find(|(lower, _)| gdp_per_capita >= *lower)
        .map(|(_, label)| *label)
}

fn add_income_category(rows: &mut [FusedRow], columns: &mut Vec<ColumnMeta>) {
    for row in rows.iter_mut() {
        if let Some(label) = row.number(catalog::GDP_PER_CAPITA).and_then(income_category) {
            row.values.insert(
                catalog::INCOME_CATEGORY.to_string(),
                FieldValue::Category(label.to_string()),
            );
        }
    }
    columns.push(derived_column(catalog::INCOME_CATEGORY, ColumnKind::Categorical));
}

/// Rank-based quartile labels over the present values; `None` for missing
/// inputs, and for everyone when fewer than four values exist.
pub fn quartile_labels(values: &[Option<f64>]) -> Vec<Option<&'static str>> {
    let present: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect();
    let mut labels = vec![None; values.len()];
    if present.len() < 4 {
        return labels;
    }
    let n = present.len();
    let only_values: Vec<f64> = present.iter().map(|(_, v)| *v).collect();
    let ranks = stats::min_ranks(&only_values);
    for ((idx, _), rank) in present.iter().zip(ranks) {
        let quartile = ((rank - 1) * 4 / n).min(3);
        labels[*idx] = Some(catalog::QUARTILE_LABELS[quartile]);
    }
    labels
}

fn add_population_quartile(rows: &mut [FusedRow], columns: &mut Vec<ColumnMeta>) {
    let inputs: Vec<Option<f64>> = rows.iter().map(population).collect();
    for (row, label) in rows.iter_mut().zip(quartile_labels(&inputs)) {
        if let Some(label) = label {
            row.values.insert(
                catalog::POPULATION_QUARTILE.to_string(),
                FieldValue::Category(label.to_string()),
            );
        }
    }
    columns.push(derived_column(catalog::POPULATION_QUARTILE, ColumnKind::Categorical));
}

/// First population figure present, in [`catalog::POPULATION_SOURCES`] order.
pub fn population(row: &FusedRow) -> Option<f64> {
    catalog::POPULATION_SOURCES.iter().find_map(|c| row.number(c))
}

/// One point each for: at least three pollutants, population data, city-count data.
pub fn quality_score(row: &FusedRow) -> u8 {
    let mut score = 0;
    if row.n_available_pollutants >= 3 {
        score += 1;
    }
    if population(row).is_some() {
        score += 1;
    }
    if row.number(catalog::CITY_COUNT).is_some() {
        score += 1;
    }
    score
}
