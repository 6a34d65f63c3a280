use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{convert::TryFrom, fmt::Debug, sync::Arc};

use crate::{
    condition::ConditionCodes,
    model::{Coordinates, WeatherRecord},
    provider::{
        darksky::DarkSkyProvider, openweathermap::OpenWeatherMapProvider,
        weatherbit::WeatherbitProvider, yahoo::YahooProvider,
    },
};

pub mod darksky;
pub mod openweathermap;
pub mod weatherbit;
pub mod yahoo;

const USER_AGENT: &str = concat!("weather-relay/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderId {
    #[serde(rename = "owm", alias = "openweathermap", alias = "openweather")]
    OpenWeatherMap,
    #[serde(rename = "darksky")]
    DarkSky,
    #[serde(rename = "weatherbit")]
    Weatherbit,
    #[serde(rename = "yahoo")]
    Yahoo,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeatherMap => "owm",
            ProviderId::DarkSky => "darksky",
            ProviderId::Weatherbit => "weatherbit",
            ProviderId::Yahoo => "yahoo",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::OpenWeatherMap => "OpenWeatherMap",
            ProviderId::DarkSky => "Dark Sky",
            ProviderId::Weatherbit => "Weatherbit",
            ProviderId::Yahoo => "Yahoo Weather",
        }
    }

    /// Whether the provider refuses requests without a key.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, ProviderId::Yahoo)
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenWeatherMap, ProviderId::DarkSky, ProviderId::Weatherbit, ProviderId::Yahoo]
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "owm" | "openweathermap" | "openweather" => Ok(ProviderId::OpenWeatherMap),
            "darksky" => Ok(ProviderId::DarkSky),
            "weatherbit" => Ok(ProviderId::Weatherbit),
            "yahoo" => Ok(ProviderId::Yahoo),
            _ => Err(anyhow!(
                "Unknown provider '{value}'. Supported providers: owm, darksky, weatherbit, yahoo."
            )),
        }
    }
}

/// Inputs shared by every adapter.
#[derive(Debug, Clone)]
pub struct ProviderQuery {
    pub api_key: String,
    /// Report apparent ("feels like") rather than ambient temperature.
    pub feels_like: bool,
    pub coords: Coordinates,
}

#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    fn id(&self) -> ProviderId;

    /// Fetch current conditions and normalize them into a [`WeatherRecord`].
    async fn fetch(&self, query: &ProviderQuery, codes: &ConditionCodes) -> Result<WeatherRecord>;
}

/// Base URLs of every external service, overridable for testing or proxies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub openweathermap: String,
    pub darksky: String,
    pub weatherbit: String,
    pub yahoo: String,
    pub nominatim: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            openweathermap: "https://api.openweathermap.org".into(),
            darksky: "https://api.darksky.net".into(),
            weatherbit: "https://api.weatherbit.io".into(),
            yahoo: "https://query.yahooapis.com".into(),
            nominatim: "https://nominatim.openstreetmap.org".into(),
        }
    }
}

impl Endpoints {
    /// Route every service to the same base URL.
    pub fn single(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            openweathermap: base.clone(),
            darksky: base.clone(),
            weatherbit: base.clone(),
            yahoo: base.clone(),
            nominatim: base,
        }
    }
}

/// HTTP client shared by all adapters.
pub fn http_client() -> Result<Client> {
    Client::builder().user_agent(USER_AGENT).build().context("Failed to build HTTP client")
}

/// Construct the adapter for `id`.
pub fn provider_for(id: ProviderId, http: &Client, endpoints: &Endpoints) -> Arc<dyn WeatherProvider> {
    match id {
        ProviderId::OpenWeatherMap => {
            Arc::new(OpenWeatherMapProvider::new(http.clone(), endpoints.openweathermap.clone()))
        }
        ProviderId::DarkSky => Arc::new(DarkSkyProvider::new(
            http.clone(),
            endpoints.darksky.clone(),
            endpoints.nominatim.clone(),
        )),
        ProviderId::Weatherbit => {
            Arc::new(WeatherbitProvider::new(http.clone(), endpoints.weatherbit.clone()))
        }
        ProviderId::Yahoo => Arc::new(YahooProvider::new(http.clone(), endpoints.yahoo.clone())),
    }
}

/// GET `url` and parse the body as JSON, whatever the status code.
///
/// Providers put their error details in the body, so the caller decides
/// success from the payload itself.
pub(crate) async fn get_json(
    http: &Client,
    url: &str,
    query: &[(&str, String)],
    provider: ProviderId,
) -> Result<Value> {
    let res = http
        .get(url)
        .query(query)
        .send()
        .await
        .with_context(|| format!("Failed to send request to {}", provider.display_name()))?;

    let status = res.status();
    let body = res
        .text()
        .await
        .with_context(|| format!("Failed to read {} response body", provider.display_name()))?;

    serde_json::from_str(&body).with_context(|| {
        format!(
            "{} returned an unreadable response (status {}): {}",
            provider.display_name(),
            status,
            truncate_body(&body)
        )
    })
}

/// Most diagnostic message available in a failed payload.
pub(crate) fn rejection(payload: &Value, message_pointer: &str) -> anyhow::Error {
    match payload.pointer(message_pointer) {
        Some(Value::String(message)) => anyhow!("{message}"),
        Some(other) if !other.is_null() => anyhow!("{other}"),
        _ => anyhow!("{}", truncate_body(&payload.to_string())),
    }
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() > MAX {
        format!("{}...", body.chars().take(MAX).collect::<String>())
    } else {
        body.to_string()
    }
}
