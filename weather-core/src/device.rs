//! Runs a [`Correlator`] on its own task and exposes it through [`WeatherClient`].

use std::time::Duration;
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    task::JoinHandle,
    time::Instant,
};
use tracing::debug;

use crate::{
    cache::Store,
    correlator::{Completion, Correlator, Deferred, FetchError, FetchResult},
    envelope::{ChannelEvent, Transport},
    model::WeatherRecord,
};

/// How often overdue requests are swept when a request timeout is configured.
const TIMEOUT_SWEEP: Duration = Duration::from_millis(500);

enum Command {
    Fetch { max_age: Duration, completion: Completion },
    Get { reply: oneshot::Sender<Option<WeatherRecord>> },
}

/// Device-facing handle. Cheap to clone; every clone talks to the same task.
#[derive(Debug, Clone)]
pub struct WeatherClient {
    commands: UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Fetch { max_age, .. } => write!(f, "Fetch({max_age:?})"),
            Command::Get { .. } => f.write_str("Get"),
        }
    }
}

impl WeatherClient {
    /// Current weather, no older than `max_age`.
    pub async fn fetch(&self, max_age: Duration) -> FetchResult {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Fetch { max_age, completion: tx })
            .map_err(|_| FetchError::Disconnected)?;
        Deferred::new(rx).await
    }

    /// Cached record only; never touches the channel.
    ///
    /// Async because the correlator lives on the device task and the read is a
    /// round trip to it. Code that owns a [`Correlator`] reads synchronously
    /// with [`Correlator::cached`].
    pub async fn get(&self) -> Option<WeatherRecord> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Get { reply: tx }).ok()?;
        rx.await.ok().flatten()
    }
}

/// Spawn the device loop. Must be called from within a tokio runtime.
pub fn spawn_device<T, S>(
    correlator: Correlator<T, S>,
    events: UnboundedReceiver<ChannelEvent>,
) -> (WeatherClient, JoinHandle<()>)
where
    T: Transport + 'static,
    S: Store + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_device(correlator, events, rx));
    (WeatherClient { commands: tx }, handle)
}

async fn run_device<T: Transport, S: Store>(
    mut correlator: Correlator<T, S>,
    mut events: UnboundedReceiver<ChannelEvent>,
    mut commands: UnboundedReceiver<Command>,
) {
    let settle_delay = correlator.settings().settle_delay;
    let mut flush_at: Option<Instant> = None;
    let mut sweep = tokio::time::interval(TIMEOUT_SWEEP);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ChannelEvent::Open) => {
                    correlator.on_open();
                    flush_at = Some(Instant::now() + settle_delay);
                }
                Some(ChannelEvent::Closed) => {
                    correlator.on_closed();
                    flush_at = None;
                }
                Some(ChannelEvent::Message(envelope)) => correlator.on_message(envelope),
                Some(ChannelEvent::Error(reason)) => correlator.on_error(&reason),
                None => {
                    debug!("channel event stream ended");
                    break;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Fetch { max_age, completion }) => correlator.submit(max_age, completion),
                Some(Command::Get { reply }) => {
                    let _ = reply.send(correlator.cached().cloned());
                }
                None => {
                    debug!("all weather clients dropped");
                    break;
                }
            },
            () = wait_until(flush_at) => {
                flush_at = None;
                correlator.flush_queue();
            }
            _ = sweep.tick(), if correlator.has_timeout() => {
                correlator.expire_overdue();
            }
        }
    }

    correlator.shutdown();
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
