use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::{
    condition::ConditionCodes,
    model::{Observation, RawCondition, WeatherRecord, kelvin_to_celsius},
};

use super::{ProviderId, ProviderQuery, WeatherProvider, get_json, rejection};

/// OpenWeatherMap current weather. Temperatures come back in Kelvin.
#[derive(Debug, Clone)]
pub struct OpenWeatherMapProvider {
    http: Client,
    base_url: String,
}

impl OpenWeatherMapProvider {
    pub fn new(http: Client, base_url: String) -> Self {
        Self { http, base_url }
    }
}

#[derive(Debug, Deserialize)]
struct OwmMain {
    temp: f64,
    feels_like: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwmWeather {
    id: i64,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwmSys {
    sunrise: i64,
    sunset: i64,
}

#[derive(Debug, Deserialize)]
struct OwmCurrentResponse {
    #[serde(default)]
    name: String,
    dt: i64,
    main: OwmMain,
    weather: Vec<OwmWeather>,
    sys: OwmSys,
}

#[async_trait]
impl WeatherProvider for OpenWeatherMapProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenWeatherMap
    }

    async fn fetch(&self, query: &ProviderQuery, codes: &ConditionCodes) -> Result<WeatherRecord> {
        let url = format!("{}/data/2.5/weather", self.base_url);
        let payload = get_json(
            &self.http,
            &url,
            &[
                ("appid", query.api_key.clone()),
                ("lat", query.coords.latitude.to_string()),
                ("lon", query.coords.longitude.to_string()),
            ],
            self.id(),
        )
        .await?;

        if payload.get("weather").is_none() {
            return Err(rejection(&payload, "/message"));
        }

        let parsed: OwmCurrentResponse =
            serde_json::from_value(payload).context("Failed to parse OpenWeatherMap current JSON")?;

        let weather = parsed
            .weather
            .first()
            .ok_or_else(|| anyhow!("OpenWeatherMap response contained no weather entries"))?;

        let kelvin = match (query.feels_like, parsed.main.feels_like) {
            (true, Some(feels_like)) => feels_like,
            _ => parsed.main.temp,
        };
        let raw = RawCondition::Code(weather.id);

        Ok(WeatherRecord::from(Observation {
            temperature_c: kelvin_to_celsius(kelvin),
            location: parsed.name,
            description: weather.description.clone(),
            is_day: parsed.dt > parsed.sys.sunrise && parsed.dt < parsed.sys.sunset,
            condition: codes.resolve(self.id(), &raw.lookup_key()),
            raw_condition: raw,
            sunrise: parsed.sys.sunrise * 1000,
            sunset: parsed.sys.sunset * 1000,
        }))
    }
}
