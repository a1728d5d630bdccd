//! Shared test utilities and fixture generators

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tempfile::TempDir;

use airfuse::pipeline::fusion::{
    ColumnKey, ColumnKind, ColumnMeta, ColumnSource, FieldValue, FusedRow, FusedTable,
};
use airfuse::pipeline::loader::{
    CityRecord, IndicatorRecord, PollutionRecord, SourcePaths, SourceTables,
};
use airfuse::pipeline::resolver::{Country, SourcePresence};
use airfuse::pipeline::FusionMode;

pub const LATEST_YEAR: i32 = 2022;
pub const EARLIER_YEAR: i32 = 2020;
/// Earlier-year pollution readings are this multiple of the latest ones.
pub const EARLIER_FACTOR: f64 = 1.2;

/// Pollution-only identifier with no city cross-reference.
pub const ORPHAN_ISO2: &str = "XK";
/// Indicator-only aggregate with no city cross-reference.
pub const ORPHAN_ISO3: &str = "WLD";

/// One synthetic country. PM2.5 is a near-linear function of GDP per
/// capita and industry share; NO2 follows the vehicle rate.
#[derive(Debug, Clone)]
pub struct SyntheticCountry {
    pub iso2: String,
    pub iso3: String,
    pub name: String,
    pub gdp: f64,
    pub urban_share: f64,
    pub industry: f64,
    pub vehicles: f64,
    pub co2: f64,
    pub population: f64,
    pub city_count: Option<i64>,
    pub city_population: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub pm25: f64,
    pub no2: f64,
    pub pm10: f64,
    pub o3: Option<f64>,
}

impl SyntheticCountry {
    /// (axis, indicator code, latest value)
    pub fn indicators(&self) -> Vec<(&'static str, &'static str, f64)> {
        vec![
            ("economy", "NY.GDP.PCAP.CD", self.gdp),
            ("economy", "NV.IND.TOTL.ZS", self.industry),
            ("demography", "SP.URB.TOTL.IN.ZS", self.urban_share),
            ("demography", "SP.POP.TOTL", self.population),
            ("transport", "IS.VEH.NVEH.P3", self.vehicles),
            ("energy", "EN.ATM.CO2E.PC", self.co2),
        ]
    }

    /// (raw parameter name, latest reading)
    pub fn pollutants(&self) -> Vec<(&'static str, f64)> {
        let mut readings = vec![("PM2.5", self.pm25), ("NO2", self.no2), ("PM10", self.pm10)];
        if let Some(o3) = self.o3 {
            readings.push(("O3", o3));
        }
        readings
    }
}

/// Deterministic country `i` of a world of `n`. The last country has no
/// city count, so its quality score is 2 instead of 3.
pub fn synthetic_country(i: usize, n: usize) -> SyntheticCountry {
    let letter = |k: usize| (b'A' + (k % 26) as u8) as char;
    let iso2 = format!("{}{}", letter(i / 26), letter(i));
    let gdp = 1000.0 + 1500.0 * i as f64;
    let industry = 15.0 + ((i * 11) % 20) as f64;
    let vehicles = 50.0 + ((i * 13) % 40) as f64 * 10.0;
    let noise = ((i * 37) % 11) as f64 / 10.0 - 0.5;
    let pm25 = 2.0 + 0.004 * gdp + 0.3 * industry + noise;

    SyntheticCountry {
        iso3: format!("{}X", iso2),
        name: format!("Country {}", iso2),
        iso2,
        gdp,
        urban_share: 40.0 + ((i * 7) % 50) as f64,
        industry,
        vehicles,
        co2: 1.0 + ((i * 5) % 15) as f64,
        population: 1e6 * (1 + (i * 3) % 17) as f64,
        city_count: (i + 1 != n).then(|| 1 + ((i * 3) % 9) as i64),
        city_population: 1e5 * (1 + (i * 5) % 23) as f64,
        latitude: -40.0 + 3.5 * i as f64,
        longitude: -100.0 + 9.0 * ((i * 7) % 23) as f64,
        pm25,
        no2: 10.0 + 0.05 * vehicles + 2.0 * (i as f64).cos(),
        pm10: 1.8 * pm25 + 3.0 + noise,
        o3: (i % 2 == 0).then(|| 60.0 + ((i * 17) % 30) as f64),
    }
}

pub fn synthetic_world(n: usize) -> Vec<SyntheticCountry> {
    (0..n).map(|i| synthetic_country(i, n)).collect()
}

/// In-memory sources for the synthetic world, including one orphan
/// identifier in the pollution source and one in the indicator source.
pub fn synthetic_tables(n: usize) -> SourceTables {
    let world = synthetic_world(n);
    let mut tables = SourceTables::default();

    for c in &world {
        for (parameter, value) in c.pollutants() {
            for (year, factor) in [(EARLIER_YEAR, EARLIER_FACTOR), (LATEST_YEAR, 1.0)] {
                tables.pollution.push(PollutionRecord {
                    country_code: c.iso2.clone(),
                    country_name: Some(c.name.clone()),
                    year: Some(year),
                    parameter: parameter.to_lowercase().replace('.', ""),
                    average: Some(value * factor),
                });
            }
        }

        let mut attributes = BTreeMap::new();
        attributes.insert("nb_villes".to_string(), c.city_count.map(|v| v as f64));
        attributes.insert("population_urbaine_totale".to_string(), Some(c.city_population));
        attributes.insert("latitude_moyenne".to_string(), Some(c.latitude));
        attributes.insert("longitude_moyenne".to_string(), Some(c.longitude));
        tables.cities.push(CityRecord {
            country: Some(c.name.clone()),
            iso2: Some(c.iso2.clone()),
            iso3: Some(c.iso3.clone()),
            attributes,
        });

        for (axis, code, value) in c.indicators() {
            tables.indicators.push(indicator(&c.iso3, 2019, code, 0.9 * value, axis));
            tables.indicators.push(indicator(&c.iso3, 2021, code, value, axis));
        }
    }

    tables.pollution.push(PollutionRecord {
        country_code: ORPHAN_ISO2.to_string(),
        country_name: Some("Kosovo".to_string()),
        year: Some(LATEST_YEAR),
        parameter: "pm25".to_string(),
        average: Some(30.0),
    });
    tables
        .indicators
        .push(indicator(ORPHAN_ISO3, 2021, "NY.GDP.PCAP.CD", 12_000.0, "economy"));
    tables
}

pub fn indicator(economy: &str, year: i32, code: &str, value: f64, axis: &str) -> IndicatorRecord {
    IndicatorRecord {
        economy: economy.to_string(),
        year: Some(year),
        code: code.to_string(),
        name: None,
        value: Some(value),
        axis: Some(axis.to_string()),
    }
}

pub fn pollution(code: &str, year: i32, parameter: &str, average: f64) -> PollutionRecord {
    PollutionRecord {
        country_code: code.to_string(),
        country_name: None,
        year: Some(year),
        parameter: parameter.to_string(),
        average: Some(average),
    }
}

pub fn city(iso2: &str, iso3: &str, name: &str, attributes: &[(&str, f64)]) -> CityRecord {
    CityRecord {
        country: Some(name.to_string()),
        iso2: Some(iso2.to_string()),
        iso3: Some(iso3.to_string()),
        attributes: attributes
            .iter()
            .map(|(k, v)| (k.to_string(), Some(*v)))
            .collect(),
    }
}

/// Write `df` as CSV into `dir` and return its path.
pub fn write_csv(dir: &Path, file_name: &str, df: &mut DataFrame) -> PathBuf {
    let path = dir.join(file_name);
    let mut file = std::fs::File::create(&path).unwrap();
    CsvWriter::new(&mut file).finish(df).unwrap();
    path
}

/// The synthetic world written as source files: one pollution CSV, one city
/// CSV and one `worldbank_<axis>.csv` per thematic axis.
pub fn write_synthetic_sources(n: usize) -> (TempDir, SourcePaths) {
    let temp_dir = TempDir::new().unwrap();
    let world = synthetic_world(n);

    let mut codes = Vec::new();
    let mut names = Vec::new();
    let mut years = Vec::new();
    let mut parameters = Vec::new();
    let mut averages = Vec::new();
    for c in &world {
        for (parameter, value) in c.pollutants() {
            for (year, factor) in [(EARLIER_YEAR, EARLIER_FACTOR), (LATEST_YEAR, 1.0)] {
                codes.push(c.iso2.clone());
                names.push(c.name.clone());
                years.push(year);
                parameters.push(parameter.to_string());
                averages.push(value * factor);
            }
        }
    }
    codes.push(ORPHAN_ISO2.to_string());
    names.push("Kosovo".to_string());
    years.push(LATEST_YEAR);
    parameters.push("PM2.5".to_string());
    averages.push(30.0);
    let mut pollution_df = df! {
        "country_code" => codes,
        "country_name" => names,
        "year" => years,
        "parameter" => parameters,
        "average" => averages,
    }
    .unwrap();
    let pollution = write_csv(temp_dir.path(), "openaq_pollution.csv", &mut pollution_df);

    let mut cities_df = df! {
        "country" => world.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
        "country_code_iso2" => world.iter().map(|c| c.iso2.clone()).collect::<Vec<_>>(),
        "country_code_iso3" => world.iter().map(|c| c.iso3.clone()).collect::<Vec<_>>(),
        "nb_villes" => world.iter().map(|c| c.city_count).collect::<Vec<_>>(),
        "population_urbaine_totale" => world.iter().map(|c| c.city_population).collect::<Vec<_>>(),
        "latitude_moyenne" => world.iter().map(|c| c.latitude).collect::<Vec<_>>(),
        "longitude_moyenne" => world.iter().map(|c| c.longitude).collect::<Vec<_>>(),
    }
    .unwrap();
    let cities = write_csv(temp_dir.path(), "cities.csv", &mut cities_df);

    let mut per_axis: BTreeMap<&str, (Vec<String>, Vec<i32>, Vec<String>, Vec<f64>)> =
        BTreeMap::new();
    for c in &world {
        for (axis, code, value) in c.indicators() {
            let entry = per_axis.entry(axis).or_default();
            for (year, v) in [(2019, 0.9 * value), (2021, value)] {
                entry.0.push(c.iso3.clone());
                entry.1.push(year);
                entry.2.push(code.to_string());
                entry.3.push(v);
            }
        }
    }
    if let Some(economy) = per_axis.get_mut("economy") {
        economy.0.push(ORPHAN_ISO3.to_string());
        economy.1.push(2021);
        economy.2.push("NY.GDP.PCAP.CD".to_string());
        economy.3.push(12_000.0);
    }
    let indicators = per_axis
        .into_iter()
        .map(|(axis, (economies, years, codes, values))| {
            let mut df = df! {
                "economy" => economies,
                "year" => years,
                "indicator_code" => codes,
                "value" => values,
            }
            .unwrap();
            write_csv(temp_dir.path(), &format!("worldbank_{}.csv", axis), &mut df)
        })
        .collect();

    (
        temp_dir,
        SourcePaths {
            pollution,
            cities,
            indicators,
        },
    )
}

/// A resolved fused table built directly from named columns. Columns
/// prefixed `pollution_` are pollutants, everything else is an indicator.
pub fn table_from_columns(columns: &[(&str, Vec<Option<f64>>)]) -> FusedTable {
    let n = columns.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
    let metas: Vec<ColumnMeta> = columns
        .iter()
        .map(|(name, _)| {
            let pollutant = name.strip_prefix("pollution_");
            ColumnMeta {
                name: name.to_string(),
                key: ColumnKey {
                    source: if pollutant.is_some() {
                        ColumnSource::Pollution
                    } else {
                        ColumnSource::Indicator
                    },
                    axis: None,
                    code: pollutant.unwrap_or(name).to_string(),
                },
                kind: ColumnKind::Numeric,
            }
        })
        .collect();

    let rows = (0..n)
        .map(|i| {
            let key = format!("C{:02}", i);
            let values: BTreeMap<String, FieldValue> = columns
                .iter()
                .filter_map(|(name, v)| {
                    v.get(i)
                        .copied()
                        .flatten()
                        .map(|x| (name.to_string(), FieldValue::Number(x)))
                })
                .collect();
            let n_available_pollutants = values
                .keys()
                .filter(|k| k.starts_with("pollution_"))
                .count();
            FusedRow {
                country: Country {
                    canonical_key: key.clone(),
                    iso2: Some(key),
                    iso3: None,
                    display_name: None,
                    unresolved: false,
                    sources: SourcePresence::default(),
                },
                values,
                n_available_pollutants,
                quality_score: 3,
            }
        })
        .collect();

    FusedTable {
        mode: FusionMode::LatestYear,
        columns: metas,
        rows,
    }
}

pub fn assert_close(actual: f64, expected: f64, tol: f64) {
    assert!(
        (actual - expected).abs() <= tol,
        "expected {} within {} of {}",
        actual,
        tol,
        expected
    );
}

/// Assert that a DataFrame contains specific columns
pub fn assert_has_columns(df: &DataFrame, expected_cols: &[&str]) {
    let actual_cols: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    for col in expected_cols {
        assert!(
            actual_cols.contains(&col.to_string()),
            "Missing expected column: '{}'. Actual columns: {:?}",
            col,
            actual_cols
        );
    }
}
