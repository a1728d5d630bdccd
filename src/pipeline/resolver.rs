//! Country key resolution across the three identifier schemes.
//!
//! The city source is the only one carrying both ISO2 and ISO3 codes, so it
//! provides the cross-reference used to join pollution (ISO2) records to
//! indicator (ISO3) records. Country names are display-only.

use std::collections::BTreeMap;

use serde::Serialize;

use super::error::AnalysisError;
use super::loader::{CityRecord, SourceTables};

/// Uppercase, trimmed form of a country code.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Which sources mention a country.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourcePresence {
    pub pollution: bool,
    pub cities: bool,
    pub indicators: bool,
}

/// A resolved physical country.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Country {
    pub canonical_key: String,
    pub iso2: Option<String>,
    pub iso3: Option<String>,
    pub display_name: Option<String>,
    /// True when the identifier could not be cross-referenced between schemes.
    pub unresolved: bool,
    pub sources: SourcePresence,
}

impl Country {
    fn new(key: &str) -> Self {
        Self {
            canonical_key: key.to_string(),
            iso2: None,
            iso3: None,
            display_name: None,
            unresolved: false,
            sources: SourcePresence::default(),
        }
    }
}

/// ISO2 <-> ISO3 mapping harvested from the city source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrossReference {
    iso2_to_iso3: BTreeMap<String, String>,
    iso3_to_iso2: BTreeMap<String, String>,
}

impl CrossReference {
    /// Build from city rows carrying both codes; the first mapping seen wins.
    pub fn from_cities(cities: &[CityRecord]) -> Self {
        let mut xref = Self::default();
        for city in cities {
            if let (Some(iso2), Some(iso3)) = (&city.iso2, &city.iso3) {
                xref.insert(&normalize_code(iso2), &normalize_code(iso3));
            }
        }
        xref
    }

    pub fn insert(&mut self, iso2: &str, iso3: &str) {
        if iso2.is_empty() || iso3.is_empty() {
            return;
        }
        if self.iso2_to_iso3.contains_key(iso2) || self.iso3_to_iso2.contains_key(iso3) {
            return;
        }
        self.iso2_to_iso3.insert(iso2.to_string(), iso3.to_string());
        self.iso3_to_iso2.insert(iso3.to_string(), iso2.to_string());
    }

    pub fn iso3_for(&self, iso2: &str) -> Option<&str> {
        self.iso2_to_iso3.get(&normalize_code(iso2)).map(String::as_str)
    }

    pub fn iso2_for(&self, iso3: &str) -> Option<&str> {
        self.iso3_to_iso2.get(&normalize_code(iso3)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.iso2_to_iso3.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iso2_to_iso3.is_empty()
    }
}

/// Canonical-key table: one entry per physical country across all sources.
#[derive(Debug, Clone, Default)]
pub struct CountryTable {
    countries: BTreeMap<String, Country>,
    xref: CrossReference,
}

impl CountryTable {
    /// Canonical key for an ISO2 code (the code itself).
    pub fn key_for_iso2(&self, iso2: &str) -> String {
        normalize_code(iso2)
    }

    /// Canonical key for an ISO3 code: its ISO2 partner when known, else the code.
    pub fn key_for_iso3(&self, iso3: &str) -> String {
        let code = normalize_code(iso3);
        self.xref
            .iso2_for(&code)
            .map(str::to_string)
            .unwrap_or(code)
    }

    /// Canonical key for a city row, preferring ISO2 then the ISO3 mapping.
    pub fn key_for_city(&self, city: &CityRecord) -> Option<String> {
        match (&city.iso2, &city.iso3) {
            (Some(iso2), _) => Some(self.key_for_iso2(iso2)),
            (None, Some(iso3)) => Some(self.key_for_iso3(iso3)),
            (None, None) => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Country> {
        self.countries.get(key)
    }

    pub fn is_resolved(&self, key: &str) -> bool {
        self.countries.get(key).is_some_and(|c| !c.unresolved)
    }

    /// Countries ordered by canonical key.
    pub fn iter(&self) -> impl Iterator<Item = &Country> {
        self.countries.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.countries.keys()
    }

    pub fn len(&self) -> usize {
        self.countries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }

    /// One `UnresolvedEntity` per orphan row, naming the source that introduced it.
    pub fn unresolved(&self) -> Vec<AnalysisError> {
        self.countries
            .values()
            .filter(|c| c.unresolved)
            .map(|c| {
                let source_name = if c.sources.pollution {
                    "pollution"
                } else if c.sources.indicators {
                    "indicator"
                } else {
                    "city"
                };
                AnalysisError::UnresolvedEntity {
                    identifier: c.canonical_key.clone(),
                    source_name: source_name.to_string(),
                }
            })
            .collect()
    }

    fn entry(&mut self, key: &str) -> &mut Country {
        self.countries
            .entry(key.to_string())
            .or_insert_with(|| Country::new(key))
    }
}

/// Resolve every identifier of the three sources into one canonical-key table.
///
/// Every country present in at least one source appears exactly once;
/// identifiers missing from the cross-reference are kept and flagged.
pub fn resolve(tables: &SourceTables) -> CountryTable {
    let xref = CrossReference::from_cities(&tables.cities);
    let mut table = CountryTable {
        countries: BTreeMap::new(),
        xref,
    };

    for city in &tables.cities {
        let Some(key) = table.key_for_city(city) else {
            continue;
        };
        let iso2 = city.iso2.as_deref().map(normalize_code);
        let iso3 = city.iso3.as_deref().map(normalize_code);
        let mapped = iso2.as_deref().is_some_and(|c| table.xref.iso3_for(c).is_some())
            || iso3.as_deref().is_some_and(|c| table.xref.iso2_for(c).is_some());
        let country = table.entry(&key);
        country.sources.cities = true;
        if country.iso2.is_none() {
            country.iso2 = iso2.clone();
        }
        if country.iso3.is_none() {
            country.iso3 = iso3.clone();
        }
        if country.display_name.is_none() {
            country.display_name = city.country.clone();
        }
        if !mapped {
            country.unresolved = true;
        }
    }

    for record in &tables.pollution {
        let key = table.key_for_iso2(&record.country_code);
        let iso3 = table.xref.iso3_for(&key).map(str::to_string);
        let country = table.entry(&key);
        country.sources.pollution = true;
        if country.iso2.is_none() {
            country.iso2 = Some(key.clone());
        }
        if country.iso3.is_none() {
            country.iso3 = iso3.clone();
        }
        if country.display_name.is_none() {
            country.display_name = record.country_name.clone();
        }
        if iso3.is_none() {
            country.unresolved = true;
        }
    }

    for record in &tables.indicators {
        let iso3 = normalize_code(&record.economy);
        let iso2 = table.xref.iso2_for(&iso3).map(str::to_string);
        let key = table.key_for_iso3(&iso3);
        let country = table.entry(&key);
        country.sources.indicators = true;
        if country.iso3.is_none() {
            country.iso3 = Some(iso3.clone());
        }
        if country.iso2.is_none() {
            country.iso2 = iso2.clone();
        }
        if iso2.is_none() {
            country.unresolved = true;
        }
    }

    table
}
