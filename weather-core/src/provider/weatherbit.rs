use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    condition::ConditionCodes,
    model::{Observation, RawCondition, WeatherRecord},
};

use super::{ProviderId, ProviderQuery, WeatherProvider, get_json, rejection};

/// Weatherbit current observations (Celsius).
#[derive(Debug, Clone)]
pub struct WeatherbitProvider {
    http: Client,
    base_url: String,
}

impl WeatherbitProvider {
    pub fn new(http: Client, base_url: String) -> Self {
        Self { http, base_url }
    }
}

#[derive(Debug, Deserialize)]
struct WbWeather {
    code: RawCondition,
    #[serde(default)]
    description: String,
    #[serde(default)]
    icon: String,
}

#[derive(Debug, Deserialize)]
struct WbObservation {
    temp: f64,
    app_temp: Option<f64>,
    #[serde(default)]
    city_name: String,
    /// "HH:MM", UTC.
    sunrise: Option<String>,
    sunset: Option<String>,
    weather: WbWeather,
}

#[derive(Debug, Deserialize)]
struct WbResponse {
    data: Vec<WbObservation>,
}

#[async_trait]
impl WeatherProvider for WeatherbitProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Weatherbit
    }

    async fn fetch(&self, query: &ProviderQuery, codes: &ConditionCodes) -> Result<WeatherRecord> {
        let url = format!("{}/v2.0/current", self.base_url);
        let payload = get_json(
            &self.http,
            &url,
            &[
                ("key", query.api_key.clone()),
                ("lat", query.coords.latitude.to_string()),
                ("lon", query.coords.longitude.to_string()),
            ],
            self.id(),
        )
        .await?;

        let single_observation = payload.get("count").and_then(|c| c.as_u64()) == Some(1);
        if payload.get("data").is_none() || !single_observation {
            return Err(rejection(&payload, "/error"));
        }

        let parsed: WbResponse =
            serde_json::from_value(payload).context("Failed to parse Weatherbit current JSON")?;
        let observation = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Weatherbit response contained no observations"))?;

        let temperature_c = match (query.feels_like, observation.app_temp) {
            (true, Some(apparent)) => apparent,
            _ => observation.temp,
        };

        let today = Utc::now().date_naive();
        let sunrise = observation.sunrise.as_deref().and_then(|t| utc_clock_on(today, t));
        let sunset = observation.sunset.as_deref().and_then(|t| utc_clock_on(today, t));

        let weather = observation.weather;
        let condition = codes.resolve(self.id(), &weather.code.lookup_key());

        Ok(WeatherRecord::from(Observation {
            temperature_c,
            location: observation.city_name,
            description: weather.description,
            is_day: weather.icon.ends_with('d'),
            condition,
            raw_condition: weather.code,
            sunrise: sunrise.unwrap_or_default(),
            sunset: sunset.unwrap_or_default(),
        }))
    }
}

/// Epoch millis of an "HH:MM" UTC time of day on `date`.
fn utc_clock_on(date: NaiveDate, hhmm: &str) -> Option<i64> {
    let time = NaiveTime::parse_from_str(hhmm.trim(), "%H:%M").ok()?;
    Some(Utc.from_utc_datetime(&date.and_time(time)).timestamp_millis())
}
