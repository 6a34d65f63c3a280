//! Provider adapters against a mock HTTP server.

use reqwest::Client;
use serde_json::json;
use weather_relay_core::{
    Condition, ConditionCodes, Endpoints, ProviderId, WeatherProvider,
    model::{Coordinates, RawCondition},
    provider::{ProviderQuery, provider_for},
};
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn query(api_key: &str, feels_like: bool) -> ProviderQuery {
    ProviderQuery {
        api_key: api_key.to_string(),
        feels_like,
        coords: Coordinates::new(45.76, 4.84),
    }
}

fn owm_body(id: i64) -> serde_json::Value {
    json!({
        "name": "Lyon",
        "dt": 1_700_000_000,
        "main": { "temp": 295.15, "feels_like": 293.15 },
        "weather": [{ "id": id, "description": "clear sky" }],
        "sys": { "sunrise": 1_699_990_000, "sunset": 1_700_020_000 }
    })
}

#[tokio::test]
async fn openweathermap_normalizes_kelvin_and_condition() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .and(query_param("appid", "KEY"))
        .and(query_param("lat", "45.76"))
        .respond_with(ResponseTemplate::new(200).set_body_json(owm_body(800)))
        .mount(&server)
        .await;

    let provider = provider_for(ProviderId::OpenWeatherMap, &Client::new(), &Endpoints::single(&server.uri()));
    let record = provider.fetch(&query("KEY", false), &ConditionCodes::default()).await.unwrap();

    assert!((record.temperature_c() - 22.0).abs() < 1e-9);
    assert!((record.temperature_f() - 71.6).abs() < 1e-9);
    assert_eq!(record.condition(), Condition::ClearSky);
    assert_eq!(record.raw_condition(), &RawCondition::Code(800));
    assert_eq!(record.location(), "Lyon");
    assert_eq!(record.description(), "clear sky");
    assert!(record.is_day());
    assert_eq!(record.sunrise(), 1_699_990_000_000);
    assert_eq!(record.sunset(), 1_700_020_000_000);
    assert_eq!(record.timestamp(), 0);
}

#[tokio::test]
async fn openweathermap_reports_feels_like_when_asked() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .respond_with(ResponseTemplate::new(200).set_body_json(owm_body(800)))
        .mount(&server)
        .await;

    let provider = provider_for(ProviderId::OpenWeatherMap, &Client::new(), &Endpoints::single(&server.uri()));
    let record = provider.fetch(&query("KEY", true), &ConditionCodes::default()).await.unwrap();

    assert!((record.temperature_c() - 20.0).abs() < 1e-9);
}

#[tokio::test]
async fn openweathermap_unmapped_code_is_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .respond_with(ResponseTemplate::new(200).set_body_json(owm_body(999)))
        .mount(&server)
        .await;

    let provider = provider_for(ProviderId::OpenWeatherMap, &Client::new(), &Endpoints::single(&server.uri()));
    let record = provider.fetch(&query("KEY", false), &ConditionCodes::default()).await.unwrap();

    assert_eq!(record.condition(), Condition::Unknown);
    assert_eq!(record.raw_condition(), &RawCondition::Code(999));
}

#[tokio::test]
async fn openweathermap_failure_carries_provider_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({ "cod": 401, "message": "Invalid API key" })),
        )
        .mount(&server)
        .await;

    let provider = provider_for(ProviderId::OpenWeatherMap, &Client::new(), &Endpoints::single(&server.uri()));
    let err = provider.fetch(&query("BAD", false), &ConditionCodes::default()).await.unwrap_err();

    assert_eq!(err.to_string(), "Invalid API key");
}

#[tokio::test]
async fn unreadable_body_is_an_error_not_a_panic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad gateway</html>"))
        .mount(&server)
        .await;

    let provider = provider_for(ProviderId::Weatherbit, &Client::new(), &Endpoints::single(&server.uri()));
    let err = provider.fetch(&query("KEY", false), &ConditionCodes::default()).await.unwrap_err();

    assert!(format!("{err:#}").contains("unreadable response"));
}

fn darksky_body() -> serde_json::Value {
    json!({
        "currently": {
            "time": 1_700_000_000,
            "summary": "Light Rain",
            "icon": "rain",
            "temperature": 12.5,
            "apparentTemperature": 10.0
        },
        "daily": { "data": [{ "sunriseTime": 1_699_990_000, "sunsetTime": 1_700_020_000 }] }
    })
}

#[tokio::test]
async fn darksky_names_location_through_reverse_geocoding() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/forecast/KEY/45\.76,4\.84$"))
        .and(query_param("units", "si"))
        .respond_with(ResponseTemplate::new(200).set_body_json(darksky_body()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "address": { "village": "Ecully", "city": "Lyon" }
        })))
        .mount(&server)
        .await;

    let provider = provider_for(ProviderId::DarkSky, &Client::new(), &Endpoints::single(&server.uri()));
    let record = provider.fetch(&query("KEY", true), &ConditionCodes::default()).await.unwrap();

    assert_eq!(record.location(), "Ecully");
    assert_eq!(record.condition(), Condition::Rain);
    assert_eq!(record.raw_condition(), &RawCondition::Text("rain".into()));
    assert!((record.temperature_c() - 10.0).abs() < 1e-9);
    assert!(record.is_day());
    assert_eq!(record.sunset(), 1_700_020_000_000);
}

#[tokio::test]
async fn darksky_falls_back_to_empty_location() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/forecast/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(darksky_body()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let provider = provider_for(ProviderId::DarkSky, &Client::new(), &Endpoints::single(&server.uri()));
    let record = provider.fetch(&query("KEY", false), &ConditionCodes::default()).await.unwrap();

    assert_eq!(record.location(), "");
    assert!((record.temperature_c() - 12.5).abs() < 1e-9);
}

#[tokio::test]
async fn darksky_failure_uses_error_field() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/forecast/"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_json(json!({ "code": 403, "error": "daily usage limit exceeded" })),
        )
        .mount(&server)
        .await;

    let provider = provider_for(ProviderId::DarkSky, &Client::new(), &Endpoints::single(&server.uri()));
    let err = provider.fetch(&query("KEY", false), &ConditionCodes::default()).await.unwrap_err();

    assert_eq!(err.to_string(), "daily usage limit exceeded");
}

#[tokio::test]
async fn weatherbit_uses_single_observation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2.0/current"))
        .and(query_param("key", "KEY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 1,
            "data": [{
                "temp": 18.5,
                "app_temp": 17.0,
                "city_name": "Lyon",
                "sunrise": "05:42",
                "sunset": "19:10",
                "weather": { "code": 803, "description": "Broken clouds", "icon": "c03d" }
            }]
        })))
        .mount(&server)
        .await;

    let provider = provider_for(ProviderId::Weatherbit, &Client::new(), &Endpoints::single(&server.uri()));

    let record = provider.fetch(&query("KEY", false), &ConditionCodes::default()).await.unwrap();
    assert!((record.temperature_c() - 18.5).abs() < 1e-9);
    assert_eq!(record.condition(), Condition::BrokenClouds);
    assert_eq!(record.location(), "Lyon");
    assert!(record.is_day());
    assert!(record.sunrise() < record.sunset());

    let apparent = provider.fetch(&query("KEY", true), &ConditionCodes::default()).await.unwrap();
    assert!((apparent.temperature_c() - 17.0).abs() < 1e-9);
}

#[tokio::test]
async fn weatherbit_failure_uses_error_field() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2.0/current"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "error": "API key not valid" })))
        .mount(&server)
        .await;

    let provider = provider_for(ProviderId::Weatherbit, &Client::new(), &Endpoints::single(&server.uri()));
    let err = provider.fetch(&query("BAD", false), &ConditionCodes::default()).await.unwrap_err();

    assert_eq!(err.to_string(), "API key not valid");
}

#[tokio::test]
async fn yahoo_reads_channel_results() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/public/yql"))
        .and(query_param("format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": { "results": { "channel": {
                "astronomy": { "sunrise": "6:45 am", "sunset": "8:30 pm" },
                "location": { "city": "Lyon" },
                "item": { "condition": { "code": "32", "temp": "24", "text": "Sunny" } }
            } } }
        })))
        .mount(&server)
        .await;

    let provider = provider_for(ProviderId::Yahoo, &Client::new(), &Endpoints::single(&server.uri()));
    let record = provider.fetch(&query("", false), &ConditionCodes::default()).await.unwrap();

    assert_eq!(record.condition(), Condition::ClearSky);
    assert_eq!(record.raw_condition(), &RawCondition::Code(32));
    assert_eq!(record.location(), "Lyon");
    assert_eq!(record.description(), "Sunny");
    assert!((record.temperature_c() - 24.0).abs() < 1e-9);
    assert!(record.sunrise() < record.sunset());
}

#[tokio::test]
async fn custom_codes_override_defaults() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .respond_with(ResponseTemplate::new(200).set_body_json(owm_body(800)))
        .mount(&server)
        .await;

    let codes = ConditionCodes::from_json(r#"{ "owm": { "800": 8 } }"#).unwrap();
    let provider = provider_for(ProviderId::OpenWeatherMap, &Client::new(), &Endpoints::single(&server.uri()));
    let record = provider.fetch(&query("KEY", false), &codes).await.unwrap();

    assert_eq!(record.condition(), Condition::Mist);
}
