//! Reverse geocoding for providers that do not name the location.
//! Uses Nominatim (OpenStreetMap), no API key required.

use reqwest::Client;
use serde::Deserialize;

use crate::model::Coordinates;

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    hamlet: Option<String>,
    village: Option<String>,
    town: Option<String>,
    city: Option<String>,
}

/// Best-effort place name for `coords`. Returns `None` on any failure.
pub async fn reverse_geocode(http: &Client, base_url: &str, coords: Coordinates) -> Option<String> {
    let url = format!("{base_url}/reverse");

    let response = match http
        .get(&url)
        .query(&[
            ("lat", coords.latitude.to_string()),
            ("lon", coords.longitude.to_string()),
            ("format", "json".to_string()),
            ("accept-language", "en-US".to_string()),
        ])
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!("Reverse geocode request failed: {}", e);
            return None;
        }
    };

    if !response.status().is_success() {
        tracing::debug!("Reverse geocode returned status {}", response.status());
        return None;
    }

    let body: NominatimResponse = match response.json().await {
        Ok(b) => b,
        Err(e) => {
            tracing::debug!("Reverse geocode parse error: {}", e);
            return None;
        }
    };

    let addr = body.address?;
    let place = addr.hamlet.or(addr.village).or(addr.town).or(addr.city)?;

    tracing::debug!("Reverse geocoded {} to {}", coords, place);
    Some(place)
}
