//! Core library for the `weather-relay` tool.
//!
//! This crate defines:
//! - The device side: request correlation, reconnect queueing and the persisted weather cache
//! - The companion side: request dispatch to a configured weather provider
//! - Provider adapters and the shared condition taxonomy
//! - Configuration & credentials handling
//!
//! It is used by `weather-cli`, but can also be reused by other binaries or services.

pub mod cache;
pub mod clock;
pub mod companion;
pub mod condition;
pub mod config;
pub mod correlator;
pub mod device;
pub mod envelope;
pub mod geocode;
pub mod link;
pub mod model;
pub mod provider;

pub use cache::{FileStore, MemoryStore, Store, WeatherCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use companion::{Companion, CompanionHandle, FixedPosition, Geolocator, NoPosition, ProviderSettings};
pub use condition::{Condition, ConditionCodes};
pub use config::{Config, ProviderConfig};
pub use correlator::{Correlator, CorrelatorSettings, FetchError, FetchResult, LinkState};
pub use device::{WeatherClient, spawn_device};
pub use envelope::{ChannelEvent, Envelope, RequestId, Transport};
pub use model::{Coordinates, WeatherRecord};
pub use provider::{Endpoints, ProviderId, WeatherProvider};
