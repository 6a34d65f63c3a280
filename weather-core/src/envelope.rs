//! Messages exchanged between the device and the companion.
//!
//! Request: `{ "requestId": 42 }`
//! Success: `{ "requestId": 42, "data": { ...record... } }`
//! Failure: `{ "requestId": 42, "error": "reason" }`

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::model::WeatherRecord;

/// Binds one outbound request to its eventual response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out request ids based on the millisecond clock.
///
/// Ids are strictly increasing, so two requests issued in the same
/// millisecond still get distinct ids.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    last: u64,
}

impl RequestIdGenerator {
    pub fn next_id(&mut self, now_ms: i64) -> RequestId {
        let now = u64::try_from(now_ms).unwrap_or(0);
        self.last = now.max(self.last + 1);
        RequestId(self.last)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<WeatherRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Envelope {
    pub fn request(request_id: RequestId) -> Self {
        Self { request_id, data: None, error: None }
    }

    pub fn success(request_id: RequestId, record: WeatherRecord) -> Self {
        Self { request_id, data: Some(record), error: None }
    }

    pub fn failure(request_id: RequestId, error: impl Into<Value>) -> Self {
        Self { request_id, data: None, error: Some(error.into()) }
    }

    /// A request carries neither data nor an error.
    pub fn is_request(&self) -> bool {
        self.data.is_none() && self.error.is_none()
    }

    /// Split a response into its id and outcome. Returns `None` for requests.
    ///
    /// An error wins over data if a peer sends both.
    pub fn into_response(self) -> Option<(RequestId, Result<WeatherRecord, String>)> {
        match (self.data, self.error) {
            (_, Some(error)) => Some((self.request_id, Err(error_reason(error)))),
            (Some(record), None) => Some((self.request_id, Ok(record))),
            (None, None) => None,
        }
    }

    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

fn error_reason(error: Value) -> String {
    match error {
        Value::String(reason) => reason,
        other => other.to_string(),
    }
}

/// Something that happened on the channel, delivered to the owning side.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Open,
    Closed,
    Message(Envelope),
    Error(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is not open")]
    NotOpen,

    #[error("channel has shut down")]
    Shutdown,
}

/// Outbound half of a channel.
pub trait Transport: Send {
    fn send(&mut self, envelope: &Envelope) -> Result<(), ChannelError>;
}
