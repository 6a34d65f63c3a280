//! Companion side: answers weather requests arriving over the channel.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::{StreamExt, future::BoxFuture, stream::FuturesUnordered};
use reqwest::Client;
use std::sync::Arc;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    condition::ConditionCodes,
    envelope::{ChannelError, ChannelEvent, Envelope, Transport},
    model::{Coordinates, WeatherRecord},
    provider::{Endpoints, ProviderId, ProviderQuery, WeatherProvider, provider_for},
};

/// Source of the companion's current position.
#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn current_position(&self) -> Result<Coordinates>;
}

/// Always reports the same position.
#[derive(Debug, Clone, Copy)]
pub struct FixedPosition(pub Coordinates);

#[async_trait]
impl Geolocator for FixedPosition {
    async fn current_position(&self) -> Result<Coordinates> {
        Ok(self.0)
    }
}

/// Position is never available; every request fails with a location error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPosition;

#[async_trait]
impl Geolocator for NoPosition {
    async fn current_position(&self) -> Result<Coordinates> {
        Err(anyhow!("Location unavailable"))
    }
}

/// Which provider answers requests, and how.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub provider: ProviderId,
    pub api_key: String,
    pub feels_like: bool,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self { provider: ProviderId::OpenWeatherMap, api_key: String::new(), feels_like: false }
    }
}

#[derive(Debug)]
enum Control {
    Setup(ProviderSettings),
    SetCustomCodes(ConditionCodes),
}

/// Reconfigures a running companion. Changes apply to the next request.
#[derive(Debug, Clone)]
pub struct CompanionHandle {
    control: UnboundedSender<Control>,
}

impl CompanionHandle {
    pub fn setup(&self, settings: ProviderSettings) -> Result<(), ChannelError> {
        self.control.send(Control::Setup(settings)).map_err(|_| ChannelError::Shutdown)
    }

    pub fn set_custom_codes(&self, codes: ConditionCodes) -> Result<(), ChannelError> {
        self.control.send(Control::SetCustomCodes(codes)).map_err(|_| ChannelError::Shutdown)
    }
}

pub struct Companion {
    settings: Option<ProviderSettings>,
    codes: Arc<ConditionCodes>,
    http: Client,
    endpoints: Endpoints,
    geolocator: Arc<dyn Geolocator>,
}

impl Companion {
    pub fn new(http: Client, endpoints: Endpoints, geolocator: Arc<dyn Geolocator>) -> Self {
        Self {
            settings: None,
            codes: Arc::new(ConditionCodes::default()),
            http,
            endpoints,
            geolocator,
        }
    }

    /// Select the provider. The first call starts answering requests;
    /// later calls only replace the settings.
    pub fn setup(&mut self, settings: ProviderSettings) {
        if self.settings.is_none() {
            info!(provider = %settings.provider, "listening for weather requests");
        } else {
            debug!(provider = %settings.provider, "provider settings updated");
        }
        self.settings = Some(settings);
    }

    pub fn is_listening(&self) -> bool {
        self.settings.is_some()
    }

    pub fn settings(&self) -> Option<&ProviderSettings> {
        self.settings.as_ref()
    }

    /// Replace every provider's condition table.
    pub fn set_custom_codes(&mut self, codes: ConditionCodes) {
        self.codes = Arc::new(codes);
    }

    /// Start answering `envelope` if it is a request.
    ///
    /// The returned future owns a snapshot of the current settings and
    /// resolves to the single reply for that request.
    pub fn dispatch(&self, envelope: &Envelope) -> Option<BoxFuture<'static, Envelope>> {
        if !envelope.is_request() {
            debug!(request_id = %envelope.request_id, "ignoring response received on the companion side");
            return None;
        }
        let Some(settings) = self.settings.clone() else {
            debug!(request_id = %envelope.request_id, "not set up yet, ignoring weather request");
            return None;
        };

        let id = envelope.request_id;
        let provider = provider_for(settings.provider, &self.http, &self.endpoints);
        let codes = Arc::clone(&self.codes);
        let geolocator = Arc::clone(&self.geolocator);

        Some(Box::pin(async move {
            match fetch_weather(provider.as_ref(), geolocator.as_ref(), &settings, &codes).await {
                Ok(record) => {
                    info!(request_id = %id, provider = %settings.provider, "weather fetched");
                    Envelope::success(id, record)
                }
                Err(err) => {
                    let reason = format!("{err:#}");
                    warn!(request_id = %id, provider = %settings.provider, %reason, "weather fetch failed");
                    Envelope::failure(id, reason)
                }
            }
        }))
    }

    /// Spawn the companion loop. Must be called from within a tokio runtime.
    pub fn spawn<T: Transport + 'static>(
        self,
        transport: T,
        events: UnboundedReceiver<ChannelEvent>,
    ) -> (CompanionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(transport, events, rx));
        (CompanionHandle { control: tx }, handle)
    }

    async fn run<T: Transport>(
        mut self,
        mut transport: T,
        mut events: UnboundedReceiver<ChannelEvent>,
        mut control: UnboundedReceiver<Control>,
    ) {
        let mut inflight = FuturesUnordered::new();
        let mut control_open = true;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(ChannelEvent::Message(envelope)) => {
                        if let Some(reply) = self.dispatch(&envelope) {
                            inflight.push(reply);
                        }
                    }
                    Some(ChannelEvent::Open) => info!("device connected"),
                    Some(ChannelEvent::Closed) => info!(inflight = inflight.len(), "device disconnected"),
                    Some(ChannelEvent::Error(reason)) => warn!(%reason, "channel error"),
                    None => {
                        debug!("channel event stream ended");
                        break;
                    }
                },
                Some(reply) = inflight.next(), if !inflight.is_empty() => {
                    if let Err(err) = transport.send(&reply) {
                        warn!(request_id = %reply.request_id, %err, "could not deliver weather reply");
                    }
                }
                command = control.recv(), if control_open => match command {
                    Some(Control::Setup(settings)) => self.setup(settings),
                    Some(Control::SetCustomCodes(codes)) => self.set_custom_codes(codes),
                    None => control_open = false,
                },
            }
        }
    }
}

async fn fetch_weather(
    provider: &dyn WeatherProvider,
    geolocator: &dyn Geolocator,
    settings: &ProviderSettings,
    codes: &ConditionCodes,
) -> Result<WeatherRecord> {
    let coords = geolocator.current_position().await?;
    let query = ProviderQuery {
        api_key: settings.api_key.clone(),
        feels_like: settings.feels_like,
        coords,
    };
    provider.fetch(&query, codes).await
}
