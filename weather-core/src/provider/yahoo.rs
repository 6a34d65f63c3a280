use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveTime, TimeZone};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    condition::ConditionCodes,
    model::{Observation, RawCondition, WeatherRecord},
};

use super::{ProviderId, ProviderQuery, WeatherProvider, get_json, rejection};

/// Legacy Yahoo YQL weather lookup. Needs no key; reports Celsius with `u='c'`.
#[derive(Debug, Clone)]
pub struct YahooProvider {
    http: Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new(http: Client, base_url: String) -> Self {
        Self { http, base_url }
    }
}

#[derive(Debug, Deserialize)]
struct YahooAstronomy {
    sunrise: String,
    sunset: String,
}

#[derive(Debug, Deserialize)]
struct YahooLocation {
    #[serde(default)]
    city: String,
}

#[derive(Debug, Deserialize)]
struct YahooCondition {
    code: String,
    temp: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct YahooItem {
    condition: YahooCondition,
}

#[derive(Debug, Deserialize)]
struct YahooChannel {
    astronomy: YahooAstronomy,
    location: YahooLocation,
    item: YahooItem,
}

#[async_trait]
impl WeatherProvider for YahooProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Yahoo
    }

    async fn fetch(&self, query: &ProviderQuery, codes: &ConditionCodes) -> Result<WeatherRecord> {
        let url = format!("{}/v1/public/yql", self.base_url);
        let yql = format!(
            "select astronomy, location.city, item.condition from weather.forecast where woeid in \
             (select woeid from geo.places(1) where text='({})') and u='c'",
            query.coords
        );
        let payload =
            get_json(&self.http, &url, &[("q", yql), ("format", "json".to_string())], self.id())
                .await?;

        let Some(channel) = payload.pointer("/query/results/channel").cloned() else {
            return Err(rejection(&payload, "/error/description"));
        };
        let channel: YahooChannel =
            serde_json::from_value(channel).context("Failed to parse Yahoo weather JSON")?;

        let condition = channel.item.condition;
        let temperature_c: f64 = condition
            .temp
            .trim()
            .parse()
            .with_context(|| format!("Yahoo reported a non-numeric temperature: {}", condition.temp))?;

        let today = Local::now().date_naive();
        let sunrise = local_clock_on(today, &channel.astronomy.sunrise)
            .ok_or_else(|| anyhow!("Unreadable sunrise time: {}", channel.astronomy.sunrise))?;
        let sunset = local_clock_on(today, &channel.astronomy.sunset)
            .ok_or_else(|| anyhow!("Unreadable sunset time: {}", channel.astronomy.sunset))?;
        let now = Local::now().timestamp_millis();

        let raw = match condition.code.trim().parse::<i64>() {
            Ok(code) => RawCondition::Code(code),
            Err(_) => RawCondition::Text(condition.code.clone()),
        };

        Ok(WeatherRecord::from(Observation {
            temperature_c,
            location: channel.location.city,
            description: condition.text,
            is_day: now > sunrise && now < sunset,
            condition: codes.resolve(self.id(), &raw.lookup_key()),
            raw_condition: raw,
            sunrise,
            sunset,
        }))
    }
}

/// Parse "7:05 am" / "6:45 pm" style times.
fn parse_clock_time(text: &str) -> Option<NaiveTime> {
    let mut parts = text.split_whitespace();
    let clock = parts.next()?;
    let meridiem = parts.next().map(str::to_lowercase);

    let (hour, minute) = clock.split_once(':')?;
    let mut hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;

    match meridiem.as_deref() {
        Some("pm") if hour != 12 => hour += 12,
        Some("am") if hour == 12 => hour = 0,
        _ => {}
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Epoch millis of a local time of day on `date`.
fn local_clock_on(date: NaiveDate, text: &str) -> Option<i64> {
    let time = parse_clock_time(text)?;
    Local
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_twelve_hour_times() {
        assert_eq!(parse_clock_time("6:45 am"), NaiveTime::from_hms_opt(6, 45, 0));
        assert_eq!(parse_clock_time("7:05 PM"), NaiveTime::from_hms_opt(19, 5, 0));
        assert_eq!(parse_clock_time("12:10 pm"), NaiveTime::from_hms_opt(12, 10, 0));
        assert_eq!(parse_clock_time("12:30 am"), NaiveTime::from_hms_opt(0, 30, 0));
        assert_eq!(parse_clock_time("18:20"), NaiveTime::from_hms_opt(18, 20, 0));
    }

    #[test]
    fn rejects_garbage_times() {
        assert!(parse_clock_time("").is_none());
        assert!(parse_clock_time("dawn").is_none());
        assert!(parse_clock_time("6:99 am").is_none());
    }

    #[test]
    fn local_times_land_on_the_given_day() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let ms = local_clock_on(date, "6:45 am").unwrap();
        let back = Local.timestamp_millis_opt(ms).unwrap();

        assert_eq!(back.date_naive(), date);
        assert_eq!(back.time(), NaiveTime::from_hms_opt(6, 45, 0).unwrap());
    }
}
