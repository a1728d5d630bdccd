//! Source loader for CSV and Parquet files
//!
//! Each of the three sources is read fully into memory through polars,
//! validated against its required columns and converted into typed records.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use polars::prelude::*;

use super::catalog;

/// One pollutant observation (country, parameter, year).
#[derive(Debug, Clone, PartialEq)]
pub struct PollutionRecord {
    pub country_code: String,
    pub country_name: Option<String>,
    pub year: Option<i32>,
    pub parameter: String,
    pub average: Option<f64>,
}

/// One row of the city/population aggregate source.
#[derive(Debug, Clone, PartialEq)]
pub struct CityRecord {
    pub country: Option<String>,
    pub iso2: Option<String>,
    pub iso3: Option<String>,
    /// Every numeric attribute of the row, keyed by its source column name.
    pub attributes: BTreeMap<String, Option<f64>>,
}

/// One World Bank indicator observation.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorRecord {
    pub economy: String,
    pub year: Option<i32>,
    pub code: String,
    pub name: Option<String>,
    pub value: Option<f64>,
    /// Thematic axis of the file the record came from, if recognised.
    pub axis: Option<String>,
}

/// All records of the three sources.
#[derive(Debug, Clone, Default)]
pub struct SourceTables {
    pub pollution: Vec<PollutionRecord>,
    pub cities: Vec<CityRecord>,
    pub indicators: Vec<IndicatorRecord>,
}

/// Input locations of the three sources.
#[derive(Debug, Clone)]
pub struct SourcePaths {
    pub pollution: PathBuf,
    pub cities: PathBuf,
    pub indicators: Vec<PathBuf>,
}

const POLLUTION_COLUMNS: [&str; 4] = ["country_code", "year", "parameter", "average"];
const CITY_COLUMNS: [&str; 2] = ["country_code_iso2", "country_code_iso3"];
const INDICATOR_COLUMNS: [&str; 4] = ["economy", "year", "indicator_code", "value"];
const CITY_KEY_COLUMNS: [&str; 3] = ["country", "country_code_iso2", "country_code_iso3"];

/// Load a dataset from a file (CSV or Parquet based on extension)
///
/// `infer_schema_length` of 0 scans the full CSV file for type inference.
pub fn load_dataset(path: &Path, infer_schema_length: usize) -> Result<DataFrame> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let lf = match extension.as_str() {
        "csv" => {
            let schema_length = if infer_schema_length == 0 {
                None
            } else {
                Some(infer_schema_length)
            };
            LazyCsvReader::new(path)
                .with_infer_schema_length(schema_length)
                .finish()
                .with_context(|| format!("Failed to load CSV file: {}", path.display()))?
        }
        "parquet" => LazyFrame::scan_parquet(path, Default::default())
            .with_context(|| format!("Failed to load Parquet file: {}", path.display()))?,
        _ => anyhow::bail!(
            "Unsupported file format: {}. Supported formats: csv, parquet",
            extension
        ),
    };

    lf.collect()
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// Fail with the list of absent columns if any required column is missing.
pub fn require_columns(df: &DataFrame, required: &[&str], source: &str) -> Result<()> {
    let present: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|c| !present.iter().any(|p| p == c))
        .collect();
    if !missing.is_empty() {
        anyhow::bail!(
            "{} source is missing required column(s) {:?}. Available columns: {:?}",
            source,
            missing,
            present
        );
    }
    Ok(())
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

/// Read a column as trimmed strings; empty strings become missing.
fn string_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let column = df
        .column(name)?
        .cast(&DataType::String)
        .with_context(|| format!("Column '{}' cannot be read as text", name))?;
    let values = column
        .as_materialized_series()
        .str()?
        .iter()
        .map(|v| {
            v.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .collect();
    Ok(values)
}

/// Read a column as f64; unparseable and non-finite values become missing.
fn float_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df
        .column(name)?
        .cast(&DataType::Float64)
        .with_context(|| format!("Column '{}' cannot be read as numbers", name))?;
    let values = column
        .as_materialized_series()
        .f64()?
        .iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect();
    Ok(values)
}

fn year_column(df: &DataFrame, name: &str) -> Result<Vec<Option<i32>>> {
    Ok(float_column(df, name)?
        .into_iter()
        .map(|v| v.map(|y| y.round() as i32))
        .collect())
}

/// Load the pollution source. Rows without a country code or parameter are skipped.
pub fn load_pollution(path: &Path, infer_schema_length: usize) -> Result<Vec<PollutionRecord>> {
    let df = load_dataset(path, infer_schema_length)?;
    require_columns(&df, &POLLUTION_COLUMNS, "Pollution")?;

    let codes = string_column(&df, "country_code")?;
    let names = if has_column(&df, "country_name") {
        string_column(&df, "country_name")?
    } else {
        vec![None; df.height()]
    };
    let years = year_column(&df, "year")?;
    let parameters = string_column(&df, "parameter")?;
    let averages = float_column(&df, "average")?;

    let records = codes
        .into_iter()
        .zip(names)
        .zip(years)
        .zip(parameters)
        .zip(averages)
        .filter_map(|((((code, name), year), parameter), average)| {
            Some(PollutionRecord {
                country_code: code?,
                country_name: name,
                year,
                parameter: parameter?.to_lowercase().replace('.', ""),
                average,
            })
        })
        .collect();
    Ok(records)
}

/// Load the city/population source; every numeric column is kept as an attribute.
pub fn load_cities(path: &Path, infer_schema_length: usize) -> Result<Vec<CityRecord>> {
    let df = load_dataset(path, infer_schema_length)?;
    require_columns(&df, &CITY_COLUMNS, "City")?;

    let countries = if has_column(&df, "country") {
        string_column(&df, "country")?
    } else {
        vec![None; df.height()]
    };
    let iso2 = string_column(&df, "country_code_iso2")?;
    let iso3 = string_column(&df, "country_code_iso3")?;

    let numeric_columns: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|col| {
            col.dtype().is_primitive_numeric() && !CITY_KEY_COLUMNS.contains(&col.name().as_str())
        })
        .map(|col| col.name().to_string())
        .collect();
    let mut numeric_values = Vec::with_capacity(numeric_columns.len());
    for name in &numeric_columns {
        numeric_values.push(float_column(&df, name)?);
    }

    let records = (0..df.height())
        .map(|row| CityRecord {
            country: countries[row].clone(),
            iso2: iso2[row].clone(),
            iso3: iso3[row].clone(),
            attributes: numeric_columns
                .iter()
                .zip(&numeric_values)
                .map(|(name, values)| (name.clone(), values[row]))
                .collect(),
        })
        .collect();
    Ok(records)
}

/// Load one indicator file. The thematic axis is derived from the file stem.
pub fn load_indicators(path: &Path, infer_schema_length: usize) -> Result<Vec<IndicatorRecord>> {
    let df = load_dataset(path, infer_schema_length)?;
    require_columns(&df, &INDICATOR_COLUMNS, "Indicator")?;

    let axis = path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(catalog::axis_from_stem)
        .map(str::to_string);

    let economies = string_column(&df, "economy")?;
    let years = year_column(&df, "year")?;
    let codes = string_column(&df, "indicator_code")?;
    let names = if has_column(&df, "indicator_name") {
        string_column(&df, "indicator_name")?
    } else {
        vec![None; df.height()]
    };
    let values = float_column(&df, "value")?;

    let records = economies
        .into_iter()
        .zip(years)
        .zip(codes)
        .zip(names)
        .zip(values)
        .filter_map(|((((economy, year), code), name), value)| {
            Some(IndicatorRecord {
                economy: economy?,
                year,
                code: code?,
                name,
                value,
                axis: axis.clone(),
            })
        })
        .collect();
    Ok(records)
}

/// Load all three sources.
pub fn load_sources(paths: &SourcePaths, infer_schema_length: usize) -> Result<SourceTables> {
    let pollution = load_pollution(&paths.pollution, infer_schema_length)?;
    let cities = load_cities(&paths.cities, infer_schema_length)?;
    let mut indicators = Vec::new();
    for path in &paths.indicators {
        indicators.extend(load_indicators(path, infer_schema_length)?);
    }
    Ok(SourceTables {
        pollution,
        cities,
        indicators,
    })
}
