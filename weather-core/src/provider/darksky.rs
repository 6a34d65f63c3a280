use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::{
    condition::ConditionCodes,
    geocode::reverse_geocode,
    model::{Observation, RawCondition, WeatherRecord},
};

use super::{ProviderId, ProviderQuery, WeatherProvider, get_json, rejection};

/// Dark Sky forecast API (SI units). Has no location name, so one is looked
/// up through reverse geocoding; an empty name is used if that fails.
#[derive(Debug, Clone)]
pub struct DarkSkyProvider {
    http: Client,
    base_url: String,
    geocode_url: String,
}

impl DarkSkyProvider {
    pub fn new(http: Client, base_url: String, geocode_url: String) -> Self {
        Self { http, base_url, geocode_url }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DsCurrently {
    time: i64,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    icon: String,
    temperature: f64,
    apparent_temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DsDay {
    sunrise_time: i64,
    sunset_time: i64,
}

#[derive(Debug, Deserialize)]
struct DsDaily {
    data: Vec<DsDay>,
}

#[derive(Debug, Deserialize)]
struct DsResponse {
    currently: DsCurrently,
    daily: Option<DsDaily>,
}

#[async_trait]
impl WeatherProvider for DarkSkyProvider {
    fn id(&self) -> ProviderId {
        ProviderId::DarkSky
    }

    async fn fetch(&self, query: &ProviderQuery, codes: &ConditionCodes) -> Result<WeatherRecord> {
        let url = format!("{}/forecast/{}/{}", self.base_url, query.api_key, query.coords);
        let payload = get_json(
            &self.http,
            &url,
            &[("exclude", "minutely,hourly,alerts,flags".to_string()), ("units", "si".to_string())],
            self.id(),
        )
        .await?;

        if payload.get("currently").is_none() {
            return Err(rejection(&payload, "/error"));
        }

        let parsed: DsResponse =
            serde_json::from_value(payload).context("Failed to parse Dark Sky forecast JSON")?;
        let current = parsed.currently;

        let temperature_c = match (query.feels_like, current.apparent_temperature) {
            (true, Some(apparent)) => apparent,
            _ => current.temperature,
        };

        let today = parsed.daily.as_ref().and_then(|daily| daily.data.first());
        let (sunrise, sunset, is_day) = match today {
            Some(day) => (
                day.sunrise_time * 1000,
                day.sunset_time * 1000,
                current.time > day.sunrise_time && current.time < day.sunset_time,
            ),
            None => (0, 0, current.icon.ends_with("-day")),
        };

        let location = reverse_geocode(&self.http, &self.geocode_url, query.coords)
            .await
            .unwrap_or_default();

        let condition = codes.resolve(self.id(), &current.icon);

        Ok(WeatherRecord::from(Observation {
            temperature_c,
            location,
            description: current.summary,
            is_day,
            condition,
            raw_condition: RawCondition::Text(current.icon),
            sunrise,
            sunset,
        }))
    }
}
