use serde::{Deserialize, Serialize};
use std::fmt;

use crate::condition::Condition;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

/// Provider-specific condition code, kept for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawCondition {
    Code(i64),
    Text(String),
}

impl RawCondition {
    /// Key used to look the code up in a provider's mapping table.
    pub fn lookup_key(&self) -> String {
        match self {
            RawCondition::Code(code) => code.to_string(),
            RawCondition::Text(text) => text.clone(),
        }
    }
}

impl fmt::Display for RawCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawCondition::Code(code) => write!(f, "{code}"),
            RawCondition::Text(text) => f.write_str(text),
        }
    }
}

/// What an adapter observed, before normalization into a [`WeatherRecord`].
#[derive(Debug, Clone)]
pub struct Observation {
    pub temperature_c: f64,
    pub location: String,
    pub description: String,
    pub is_day: bool,
    pub condition: Condition,
    pub raw_condition: RawCondition,
    /// Epoch millis.
    pub sunrise: i64,
    /// Epoch millis.
    pub sunset: i64,
}

/// Canonical, provider-independent weather snapshot.
///
/// Fields are read-only; the Fahrenheit value is derived when the record is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherRecord {
    temperature_c: f64,
    temperature_f: f64,
    location: String,
    description: String,
    is_day: bool,
    condition_code: Condition,
    real_condition_code: RawCondition,
    sunrise: i64,
    sunset: i64,
    #[serde(default)]
    timestamp: i64,
}

impl WeatherRecord {
    pub fn temperature_c(&self) -> f64 {
        self.temperature_c
    }

    pub fn temperature_f(&self) -> f64 {
        self.temperature_f
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_day(&self) -> bool {
        self.is_day
    }

    pub fn condition(&self) -> Condition {
        self.condition_code
    }

    pub fn raw_condition(&self) -> &RawCondition {
        &self.real_condition_code
    }

    pub fn sunrise(&self) -> i64 {
        self.sunrise
    }

    pub fn sunset(&self) -> i64 {
        self.sunset
    }

    /// Fetch time in epoch millis; zero until the receiving side stamps it.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Copy of this record carrying the given fetch time.
    pub fn stamped(self, timestamp: i64) -> Self {
        Self { timestamp, ..self }
    }
}

impl From<Observation> for WeatherRecord {
    fn from(obs: Observation) -> Self {
        Self {
            temperature_c: obs.temperature_c,
            temperature_f: celsius_to_fahrenheit(obs.temperature_c),
            location: obs.location,
            description: obs.description,
            is_day: obs.is_day,
            condition_code: obs.condition,
            real_condition_code: obs.raw_condition,
            sunrise: obs.sunrise,
            sunset: obs.sunset,
            timestamp: 0,
        }
    }
}

pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

pub fn kelvin_to_celsius(k: f64) -> f64 {
    k - 273.15
}

#[cfg(test)]
pub(crate) fn sample_record(temperature_c: f64) -> WeatherRecord {
    WeatherRecord::from(Observation {
        temperature_c,
        location: "Lyon".into(),
        description: "clear sky".into(),
        is_day: true,
        condition: Condition::ClearSky,
        raw_condition: RawCondition::Code(800),
        sunrise: 1_700_000_000_000,
        sunset: 1_700_040_000_000,
    })
}
