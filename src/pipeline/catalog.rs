//! Fixed domain constants: pollutants, WHO reference thresholds, income bins
//! and the World Bank indicator catalog grouped by thematic axis.

/// Pollutant parameters in priority order. The first two are the core
/// pollutants required for similarity-graph membership.
pub const POLLUTANTS: [&str; 6] = ["pm25", "no2", "pm10", "o3", "so2", "co"];

/// Prefix of fused pollutant columns (`pollution_pm25`, ...).
pub const POLLUTION_PREFIX: &str = "pollution_";

/// GDP per capita (current USD), input of the income category.
pub const GDP_PER_CAPITA: &str = "NY.GDP.PCAP.CD";

/// Urban population (World Bank).
pub const URBAN_POPULATION: &str = "SP.URB.TOTL";

/// Total population (World Bank).
pub const TOTAL_POPULATION: &str = "SP.POP.TOTL";

/// City-source column holding the number of cities per country.
pub const CITY_COUNT: &str = "nb_villes";

/// City-source column holding the total urban population of listed cities.
pub const CITY_POPULATION: &str = "population_urbaine_totale";

/// City-source mean coordinates.
pub const LATITUDE: &str = "latitude_moyenne";
pub const LONGITUDE: &str = "longitude_moyenne";

/// Population columns in preference order. The first one present feeds both
/// the population-size quartile and the quality score.
pub const POPULATION_SOURCES: [&str; 3] = [URBAN_POPULATION, CITY_POPULATION, TOTAL_POPULATION];

/// Derived column names.
pub const POLLUTION_INDEX: &str = "pollution_index";
pub const INCOME_CATEGORY: &str = "income_category";
pub const POPULATION_QUARTILE: &str = "urban_population_quartile";

/// Flat column name of a pollutant parameter.
pub fn pollutant_column(parameter: &str) -> String {
    format!("{}{}", POLLUTION_PREFIX, parameter.to_lowercase())
}

/// WHO reference threshold for one pollutant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WhoThreshold {
    pub parameter: &'static str,
    pub value: f64,
    pub averaging: &'static str,
    pub unit: &'static str,
}

/// WHO 2021 air-quality guideline levels.
pub const WHO_THRESHOLDS: [WhoThreshold; 6] = [
    WhoThreshold { parameter: "pm25", value: 5.0, averaging: "annual", unit: "µg/m³" },
    WhoThreshold { parameter: "pm10", value: 15.0, averaging: "annual", unit: "µg/m³" },
    WhoThreshold { parameter: "no2", value: 10.0, averaging: "annual", unit: "µg/m³" },
    WhoThreshold { parameter: "o3", value: 100.0, averaging: "8h", unit: "µg/m³" },
    WhoThreshold { parameter: "so2", value: 40.0, averaging: "daily", unit: "µg/m³" },
    WhoThreshold { parameter: "co", value: 4.0, averaging: "daily", unit: "mg/m³" },
];

pub fn who_threshold(parameter: &str) -> Option<&'static WhoThreshold> {
    WHO_THRESHOLDS
        .iter()
        .find(|t| t.parameter.eq_ignore_ascii_case(parameter))
}

/// Income bins on GDP per capita (USD), lower bound inclusive.
pub const INCOME_BINS: [(f64, &str); 4] = [
    (0.0, "low"),
    (1045.0, "lower-middle"),
    (4095.0, "upper-middle"),
    (12695.0, "high"),
];

/// PM2.5 concentration bands (µg/m³), upper bound inclusive, lowest first.
pub const PM25_LEVELS: [(f64, &str); 4] = [
    (10.0, "low"),
    (25.0, "moderate"),
    (50.0, "high"),
    (f64::INFINITY, "very-high"),
];

/// Population-size quartile labels, smallest first.
pub const QUARTILE_LABELS: [&str; 4] = ["small", "medium", "large", "very-large"];

/// A World Bank indicator expected on one thematic axis.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorSpec {
    pub code: &'static str,
    pub label: &'static str,
}

const fn ind(code: &'static str, label: &'static str) -> IndicatorSpec {
    IndicatorSpec { code, label }
}

pub const AXIS_TRANSPORT: &[IndicatorSpec] = &[
    ind("IS.VEH.NVEH.P3", "Motor vehicles per 1,000 people"),
    ind("IS.VEH.PCAR.P3", "Passenger cars per 1,000 people"),
    ind("IS.VEH.ROAD.K1", "Vehicles per km of road"),
    ind("IS.ROD.TOTL.KM", "Road network (km)"),
    ind("IS.ROD.PAVE.ZS", "Paved roads (%)"),
    ind("IS.AIR.DPRT", "Air transport departures"),
    ind("IS.AIR.PSGR", "Air passengers carried"),
    ind("IS.RRS.TOTL.KM", "Rail lines (km)"),
];

pub const AXIS_ENERGY: &[IndicatorSpec] = &[
    ind("EG.USE.PCAP.KG.OE", "Energy use (kg oil eq. per capita)"),
    ind("EG.USE.ELEC.KH.PC", "Electricity consumption (kWh per capita)"),
    ind("EG.ELC.FOSL.ZS", "Electricity from fossil fuels (%)"),
    ind("EG.ELC.COAL.ZS", "Electricity from coal (%)"),
    ind("EG.ELC.NGAS.ZS", "Electricity from natural gas (%)"),
    ind("EG.ELC.PETR.ZS", "Electricity from oil (%)"),
    ind("EG.ELC.NUCL.ZS", "Electricity from nuclear (%)"),
    ind("EG.ELC.RNWX.ZS", "Electricity from renewables (%)"),
    ind("EG.FEC.RNEW.ZS", "Renewable final energy consumption (%)"),
    ind("EN.ATM.CO2E.PC", "CO2 emissions (t per capita)"),
    ind("EN.ATM.CO2E.KT", "CO2 emissions (kt)"),
    ind("EN.ATM.METH.KT.CE", "Methane emissions (kt CO2 eq.)"),
    ind("EN.ATM.NOXE.KT.CE", "NOx emissions (kt CO2 eq.)"),
];

pub const AXIS_ECONOMY: &[IndicatorSpec] = &[
    ind("NY.GDP.PCAP.CD", "GDP per capita (USD)"),
    ind("NY.GDP.PCAP.PP.CD", "GDP per capita, PPP (USD)"),
    ind("NV.IND.TOTL.ZS", "Industry value added (% of GDP)"),
    ind("NV.IND.MANF.ZS", "Manufacturing value added (% of GDP)"),
    ind("NV.SRV.TOTL.ZS", "Services value added (% of GDP)"),
    ind("NV.AGR.TOTL.ZS", "Agriculture value added (% of GDP)"),
    ind("SL.IND.EMPL.ZS", "Employment in industry (%)"),
    ind("SL.AGR.EMPL.ZS", "Employment in agriculture (%)"),
    ind("SL.SRV.EMPL.ZS", "Employment in services (%)"),
    ind("IC.BUS.EASE.XQ", "Ease of doing business score"),
];

pub const AXIS_DEMOGRAPHY: &[IndicatorSpec] = &[
    ind(TOTAL_POPULATION, "Total population"),
    ind("SP.URB.TOTL", "Urban population"),
    ind("SP.URB.TOTL.IN.ZS", "Urban population (%)"),
    ind("SP.URB.GROW", "Urban population growth (%)"),
    ind("EN.URB.LCTY", "Population in largest city"),
    ind("EN.URB.LCTY.UR.ZS", "Population in largest city (% of urban)"),
    ind("EN.POP.DNST", "Population density (people per km²)"),
    ind("AG.LND.TOTL.K2", "Land area (km²)"),
    ind("AG.SRF.TOTL.K2", "Surface area (km²)"),
    ind("AG.LND.FRST.ZS", "Forest area (%)"),
];

pub const AXIS_HEALTH: &[IndicatorSpec] = &[
    ind("EN.ATM.PM25.MC.M3", "PM2.5 mean annual exposure (µg/m³)"),
    ind("EN.ATM.PM25.MC.ZS", "Population exposed to PM2.5 above WHO level (%)"),
    ind("SH.STA.AIRP.P5", "Air-pollution mortality (per 100k)"),
    ind("SP.DYN.LE00.IN", "Life expectancy at birth"),
    ind("SH.XPD.CHEX.PC.CD", "Health expenditure per capita (USD)"),
    ind("SH.XPD.CHEX.GD.ZS", "Health expenditure (% of GDP)"),
];

/// Every thematic axis with its expected indicators.
pub const AXES: [(&str, &[IndicatorSpec]); 5] = [
    ("transport", AXIS_TRANSPORT),
    ("energy", AXIS_ENERGY),
    ("economy", AXIS_ECONOMY),
    ("demography", AXIS_DEMOGRAPHY),
    ("health", AXIS_HEALTH),
];

/// Map an indicator file stem (`worldbank_energie`) to its axis name.
pub fn axis_from_stem(stem: &str) -> Option<&'static str> {
    let lower = stem.to_lowercase();
    let name = lower.strip_prefix("worldbank_").unwrap_or(&lower);
    match name {
        "transport" => Some("transport"),
        "energy" | "energie" => Some("energy"),
        "economy" | "economie" | "eco" => Some("economy"),
        "demography" | "demographie" | "demo" => Some("demography"),
        "health" | "sante" => Some("health"),
        _ => None,
    }
}

/// Human-readable label for a fused column name.
pub fn label(column: &str) -> String {
    if let Some(parameter) = column.strip_prefix(POLLUTION_PREFIX) {
        if let Some(threshold) = who_threshold(parameter) {
            return format!("{} ({})", parameter.to_uppercase(), threshold.unit);
        }
    }
    AXES.iter()
        .flat_map(|(_, specs)| specs.iter())
        .find(|indicator| indicator.code == column)
        .map(|indicator| indicator.label.to_string())
        .unwrap_or_else(|| column.to_string())
}

/// Socio-economic indicators used as explanatory features by PCA.
pub const PCA_SOCIOECONOMIC: [&str; 8] = [
    "NY.GDP.PCAP.CD",
    "SP.URB.TOTL.IN.ZS",
    "NV.IND.TOTL.ZS",
    "IS.VEH.NVEH.P3",
    "EN.ATM.CO2E.PC",
    "EG.USE.PCAP.KG.OE",
    "EN.POP.DNST",
    TOTAL_POPULATION,
];

/// Socio-economic indicators used for the similarity profile.
pub const SIMILARITY_SOCIOECONOMIC: [&str; 5] = [
    "NY.GDP.PCAP.CD",
    "SP.URB.TOTL.IN.ZS",
    "NV.IND.TOTL.ZS",
    "IS.VEH.NVEH.P3",
    "EN.ATM.CO2E.PC",
];

/// Candidate explanatory features for predictive modeling.
pub const MODEL_FEATURES: [&str; 11] = [
    "NY.GDP.PCAP.CD",
    "SP.URB.TOTL.IN.ZS",
    "NV.IND.TOTL.ZS",
    "IS.VEH.NVEH.P3",
    "EN.ATM.CO2E.PC",
    "EG.USE.PCAP.KG.OE",
    "EN.POP.DNST",
    "EG.ELC.FOSL.ZS",
    CITY_COUNT,
    TOTAL_POPULATION,
    CITY_POPULATION,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_from_stem_accepts_source_names() {
        assert_eq!(axis_from_stem("worldbank_energie"), Some("energy"));
        assert_eq!(axis_from_stem("worldbank_transport"), Some("transport"));
        assert_eq!(axis_from_stem("SANTE"), Some("health"));
        assert_eq!(axis_from_stem("indicators"), None);
    }

    #[test]
    fn test_who_threshold_lookup() {
        assert_eq!(who_threshold("PM25").map(|t| t.value), Some(5.0));
        assert_eq!(who_threshold("co").map(|t| t.unit), Some("mg/m³"));
        assert!(who_threshold("nh3").is_none());
    }

    #[test]
    fn test_label_falls_back_to_code() {
        assert_eq!(label("NY.GDP.PCAP.CD"), "GDP per capita (USD)");
        assert_eq!(label("pollution_no2"), "NO2 (µg/m³)");
        assert_eq!(label("nb_villes"), "nb_villes");
    }
}
