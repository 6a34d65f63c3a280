//! Canonical weather conditions and the per-provider tables that translate
//! raw provider codes into them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path};

use crate::provider::ProviderId;

/// Provider-independent condition category.
///
/// The numeric values are part of the wire and persisted format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", from = "u16")]
pub enum Condition {
    ClearSky,
    FewClouds,
    ScatteredClouds,
    BrokenClouds,
    ShowerRain,
    Rain,
    Thunderstorm,
    Snow,
    Mist,
    Unknown,
}

impl Condition {
    pub const fn code(self) -> u16 {
        match self {
            Condition::ClearSky => 0,
            Condition::FewClouds => 1,
            Condition::ScatteredClouds => 2,
            Condition::BrokenClouds => 3,
            Condition::ShowerRain => 4,
            Condition::Rain => 5,
            Condition::Thunderstorm => 6,
            Condition::Snow => 7,
            Condition::Mist => 8,
            Condition::Unknown => 1000,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Condition::ClearSky => "clear sky",
            Condition::FewClouds => "few clouds",
            Condition::ScatteredClouds => "scattered clouds",
            Condition::BrokenClouds => "broken clouds",
            Condition::ShowerRain => "shower rain",
            Condition::Rain => "rain",
            Condition::Thunderstorm => "thunderstorm",
            Condition::Snow => "snow",
            Condition::Mist => "mist",
            Condition::Unknown => "unknown",
        }
    }
}

impl From<Condition> for u16 {
    fn from(value: Condition) -> Self {
        value.code()
    }
}

impl From<u16> for Condition {
    fn from(value: u16) -> Self {
        match value {
            0 => Condition::ClearSky,
            1 => Condition::FewClouds,
            2 => Condition::ScatteredClouds,
            3 => Condition::BrokenClouds,
            4 => Condition::ShowerRain,
            5 => Condition::Rain,
            6 => Condition::Thunderstorm,
            7 => Condition::Snow,
            8 => Condition::Mist,
            _ => Condition::Unknown,
        }
    }
}

/// Translation table for one provider: raw code (as text) to condition.
pub type CodeTable = HashMap<String, Condition>;

/// Mapping tables for every provider.
///
/// JSON form:
/// `{ "owm": { "800": 0, "801": 1 }, "darksky": { "clear-day": 0 } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionCodes {
    tables: HashMap<ProviderId, CodeTable>,
}

impl ConditionCodes {
    pub fn empty() -> Self {
        Self { tables: HashMap::new() }
    }

    /// Resolve a raw provider code. Never fails: anything without an entry is `Unknown`.
    pub fn resolve(&self, provider: ProviderId, raw: &str) -> Condition {
        self.tables
            .get(&provider)
            .and_then(|table| table.get(raw.trim()))
            .copied()
            .unwrap_or(Condition::Unknown)
    }

    pub fn table(&self, provider: ProviderId) -> Option<&CodeTable> {
        self.tables.get(&provider)
    }

    pub fn insert_table(&mut self, provider: ProviderId, table: CodeTable) {
        self.tables.insert(provider, table);
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse condition code tables")
    }

    /// Load replacement tables from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read condition codes: {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("Invalid condition codes file: {}", path.display()))
    }
}

impl Default for ConditionCodes {
    fn default() -> Self {
        let mut codes = Self::empty();
        codes.insert_table(ProviderId::OpenWeatherMap, owm_table());
        codes.insert_table(ProviderId::DarkSky, darksky_table());
        codes.insert_table(ProviderId::Weatherbit, weatherbit_table());
        codes.insert_table(ProviderId::Yahoo, yahoo_table());
        codes
    }
}

fn extend<K: ToString>(table: &mut CodeTable, keys: &[K], condition: Condition) {
    table.extend(keys.iter().map(|k| (k.to_string(), condition)));
}

fn owm_table() -> CodeTable {
    use Condition::*;
    let mut t = CodeTable::new();
    extend(&mut t, &[200, 201, 202, 210, 211, 212, 221, 230, 231, 232], Thunderstorm);
    // drizzle is reported as snow, matching the long-standing device icons
    extend(&mut t, &[300, 301, 302, 310, 311, 312, 313, 314, 321], Snow);
    extend(&mut t, &[500, 501, 502, 503, 504, 511], Rain);
    extend(&mut t, &[520, 521, 522, 531], ShowerRain);
    extend(&mut t, &[600, 601, 602, 611, 612, 615, 616, 620, 621, 622], Snow);
    extend(&mut t, &[701, 711, 721, 731, 741], Mist);
    extend(&mut t, &[800], ClearSky);
    extend(&mut t, &[801], FewClouds);
    extend(&mut t, &[802], ScatteredClouds);
    extend(&mut t, &[803, 804], BrokenClouds);
    t
}

fn darksky_table() -> CodeTable {
    use Condition::*;
    let mut t = CodeTable::new();
    extend(&mut t, &["clear-day", "clear-night"], ClearSky);
    extend(&mut t, &["partly-cloudy-day", "partly-cloudy-night"], FewClouds);
    extend(&mut t, &["cloudy"], BrokenClouds);
    extend(&mut t, &["rain"], Rain);
    extend(&mut t, &["thunderstorm"], Thunderstorm);
    extend(&mut t, &["snow", "sleet"], Snow);
    extend(&mut t, &["fog"], Mist);
    t
}

fn weatherbit_table() -> CodeTable {
    use Condition::*;
    let mut t = CodeTable::new();
    extend(&mut t, &[200, 201, 202, 230, 231, 232, 233], Thunderstorm);
    extend(&mut t, &[300, 301, 302], Snow);
    extend(&mut t, &[500, 501, 502, 511], Rain);
    extend(&mut t, &[520, 521, 522], ShowerRain);
    extend(&mut t, &[600, 601, 602, 603, 610, 611, 612, 621, 622, 623], Snow);
    extend(&mut t, &[700, 711, 721, 731, 741, 751], Mist);
    extend(&mut t, &[800], ClearSky);
    extend(&mut t, &[801], FewClouds);
    extend(&mut t, &[802], ScatteredClouds);
    extend(&mut t, &[803, 804], BrokenClouds);
    extend(&mut t, &[900], Unknown);
    t
}

fn yahoo_table() -> CodeTable {
    use Condition::*;
    let mut t = CodeTable::new();
    extend(&mut t, &[31, 32, 33, 34], ClearSky);
    extend(&mut t, &[29, 30, 44], FewClouds);
    extend(&mut t, &[26, 27, 28], BrokenClouds);
    extend(&mut t, &[8, 9], ShowerRain);
    extend(&mut t, &[6, 10, 11, 12, 35, 40], Rain);
    extend(&mut t, &[1, 3, 4, 37, 38, 39, 47], Thunderstorm);
    extend(&mut t, &[5, 7, 13, 14, 15, 16, 41, 42, 43], Snow);
    extend(&mut t, &[20], Mist);
    t
}
