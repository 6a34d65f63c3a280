//! Device-side request correlation.
//!
//! [`Correlator`] is a plain state machine: the owner feeds it channel events
//! and fetch calls from a single task, and it decides what goes on the wire.
//! Each request gets its own id and is settled exactly once, by the response
//! carrying that id, in whatever order responses arrive.

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{
    cache::{Store, WeatherCache},
    clock::Clock,
    envelope::{Envelope, RequestId, RequestIdGenerator, Transport},
    model::WeatherRecord,
};

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The companion answered with an error (provider or geolocation failure).
    #[error("{0}")]
    Companion(String),

    #[error("No connection with the companion")]
    Disconnected,

    #[error("No response from the companion within {0:?}")]
    TimedOut(Duration),

    #[error("Weather request was dropped before it settled")]
    Abandoned,
}

pub type FetchResult = Result<WeatherRecord, FetchError>;
pub type Completion = oneshot::Sender<FetchResult>;

/// Result of a fetch that may not have settled yet.
#[derive(Debug)]
pub struct Deferred {
    rx: oneshot::Receiver<FetchResult>,
}

impl Deferred {
    pub fn new(rx: oneshot::Receiver<FetchResult>) -> Self {
        Self { rx }
    }
}

impl Future for Deferred {
    type Output = FetchResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| res.unwrap_or(Err(FetchError::Abandoned)))
    }
}

#[derive(Debug, Clone)]
pub struct CorrelatorSettings {
    /// Wait after the channel opens before draining queued requests.
    pub settle_delay: Duration,
    /// Reject sent requests that get no answer in time. `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl Default for CorrelatorSettings {
    fn default() -> Self {
        Self { settle_delay: DEFAULT_SETTLE_DELAY, request_timeout: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Closed,
    /// Open, but queued requests are not drained yet.
    Settling,
    Open,
}

struct PendingRequest {
    completion: Completion,
    sent_at: i64,
}

struct QueuedRequest {
    id: RequestId,
    completion: Completion,
}

pub struct Correlator<T: Transport, S: Store> {
    transport: T,
    cache: WeatherCache<S>,
    clock: Arc<dyn Clock>,
    ids: RequestIdGenerator,
    pending: HashMap<RequestId, PendingRequest>,
    queue: VecDeque<QueuedRequest>,
    link: LinkState,
    settings: CorrelatorSettings,
}

impl<T: Transport, S: Store> Correlator<T, S> {
    pub fn new(transport: T, store: S, clock: Arc<dyn Clock>, settings: CorrelatorSettings) -> Self {
        Self {
            transport,
            cache: WeatherCache::new(store, clock.clone()),
            clock,
            ids: RequestIdGenerator::default(),
            pending: HashMap::new(),
            queue: VecDeque::new(),
            link: LinkState::Closed,
            settings,
        }
    }

    pub fn settings(&self) -> &CorrelatorSettings {
        &self.settings
    }

    pub fn link_state(&self) -> LinkState {
        self.link
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// Cached record, without any channel traffic.
    pub fn cached(&mut self) -> Option<&WeatherRecord> {
        self.cache.get()
    }

    pub fn fetch(&mut self, max_age: Duration) -> Deferred {
        let (tx, rx) = oneshot::channel();
        self.submit(max_age, tx);
        Deferred::new(rx)
    }

    /// Settle `completion` from the cache if fresh enough, otherwise issue a request.
    pub fn submit(&mut self, max_age: Duration, completion: Completion) {
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        if self.cache.is_fresh(max_age_ms) {
            if let Some(record) = self.cache.get() {
                debug!(timestamp = record.timestamp(), "serving weather from cache");
                let _ = completion.send(Ok(record.clone()));
                return;
            }
        }

        let now = self.clock.now_ms();
        let request = QueuedRequest { id: self.ids.next_id(now), completion };

        if self.link == LinkState::Open && self.queue.is_empty() {
            if let Err(request) = self.dispatch(request) {
                self.queue.push_back(request);
                self.link = LinkState::Closed;
            }
        } else {
            debug!(request_id = %request.id, state = ?self.link, "queueing weather request");
            self.queue.push_back(request);
        }
    }

    pub fn on_open(&mut self) {
        info!(queued = self.queue.len(), "channel open");
        self.link = LinkState::Settling;
    }

    pub fn on_closed(&mut self) {
        info!(pending = self.pending.len(), "channel closed");
        self.link = LinkState::Closed;
    }

    /// Channel-level errors have no defined recovery; outstanding requests are left alone.
    pub fn on_error(&mut self, reason: &str) {
        warn!(reason, pending = self.pending.len(), "channel error");
    }

    pub fn on_message(&mut self, envelope: Envelope) {
        let Some((id, outcome)) = envelope.into_response() else {
            debug!("ignoring request received on the device side");
            return;
        };
        let Some(pending) = self.pending.remove(&id) else {
            debug!(request_id = %id, "discarding response without a pending request");
            return;
        };

        match outcome {
            Ok(record) => {
                let record = record.stamped(self.clock.now_ms());
                self.cache.store(record.clone());
                debug!(request_id = %id, "weather request resolved");
                let _ = pending.completion.send(Ok(record));
            }
            Err(reason) => {
                warn!(request_id = %id, %reason, "weather request rejected by companion");
                let _ = pending.completion.send(Err(FetchError::Companion(reason)));
            }
        }
    }

    /// Send everything queued while the channel was down, oldest first.
    pub fn flush_queue(&mut self) {
        if self.link == LinkState::Closed {
            return;
        }
        self.link = LinkState::Open;

        let mut draining = std::mem::take(&mut self.queue).into_iter();
        if draining.len() > 0 {
            info!(count = draining.len(), "sending queued weather requests");
        }
        while let Some(request) = draining.next() {
            if let Err(request) = self.dispatch(request) {
                // keep submission order for the next open
                let mut requeued: VecDeque<_> = std::iter::once(request).chain(draining).collect();
                requeued.append(&mut self.queue);
                self.queue = requeued;
                self.link = LinkState::Closed;
                return;
            }
        }
    }

    pub fn has_timeout(&self) -> bool {
        self.settings.request_timeout.is_some()
    }

    /// Reject requests sent longer ago than the configured timeout. Time spent
    /// queued does not count. Returns how many expired.
    pub fn expire_overdue(&mut self) -> usize {
        let Some(timeout) = self.settings.request_timeout else {
            return 0;
        };
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let now = self.clock.now_ms();

        let overdue: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, pending)| now.saturating_sub(pending.sent_at) >= timeout_ms)
            .map(|(id, _)| *id)
            .collect();

        for id in &overdue {
            if let Some(pending) = self.pending.remove(id) {
                warn!(request_id = %id, "weather request timed out");
                let _ = pending.completion.send(Err(FetchError::TimedOut(timeout)));
            }
        }
        overdue.len()
    }

    /// The channel is gone for good: reject everything outstanding.
    pub fn shutdown(&mut self) {
        self.link = LinkState::Closed;
        let pending = self.pending.drain().map(|(_, p)| p.completion);
        let queued = self.queue.drain(..).map(|q| q.completion);
        for completion in pending.chain(queued) {
            let _ = completion.send(Err(FetchError::Disconnected));
        }
    }

    fn dispatch(&mut self, request: QueuedRequest) -> Result<(), QueuedRequest> {
        match self.transport.send(&Envelope::request(request.id)) {
            Ok(()) => {
                debug!(request_id = %request.id, "weather request sent");
                let sent_at = self.clock.now_ms();
                self.pending
                    .insert(request.id, PendingRequest { completion: request.completion, sent_at });
                Ok(())
            }
            Err(err) => {
                debug!(request_id = %request.id, %err, "send failed, keeping request queued");
                Err(request)
            }
        }
    }

    #[cfg(test)]
    fn transport(&self) -> &T {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::MemoryStore,
        clock::ManualClock,
        envelope::ChannelError,
        model::sample_record,
    };
    use futures::FutureExt;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Vec<Envelope>,
        refuse: bool,
    }

    impl RecordingTransport {
        fn ids(&self) -> Vec<RequestId> {
            self.sent.iter().map(|e| e.request_id).collect()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&mut self, envelope: &Envelope) -> Result<(), ChannelError> {
            if self.refuse {
                return Err(ChannelError::NotOpen);
            }
            self.sent.push(envelope.clone());
            Ok(())
        }
    }

    fn correlator(clock: &ManualClock) -> Correlator<RecordingTransport, MemoryStore> {
        Correlator::new(
            RecordingTransport::default(),
            MemoryStore::default(),
            Arc::new(clock.clone()),
            CorrelatorSettings::default(),
        )
    }

    fn open(c: &mut Correlator<RecordingTransport, MemoryStore>) {
        c.on_open();
        c.flush_queue();
    }

    #[test]
    fn fresh_cache_settles_without_traffic() {
        let clock = ManualClock::new(1_000_000);
        let mut c = correlator(&clock);
        open(&mut c);

        let first = c.fetch(Duration::ZERO);
        let id = c.transport().ids()[0];
        c.on_message(Envelope::success(id, sample_record(20.0)));
        let stored = first.now_or_never().unwrap().unwrap();
        assert_eq!(stored.timestamp(), 1_000_000);

        clock.advance(2_000);
        let cached = c.fetch(Duration::from_millis(5_000)).now_or_never().unwrap().unwrap();
        assert_eq!(cached, stored);
        assert_eq!(c.transport().sent.len(), 1);

        let refetch = c.fetch(Duration::from_millis(1_000));
        assert!(refetch.now_or_never().is_none());
        assert_eq!(c.transport().sent.len(), 2);
    }

    #[test]
    fn requests_wait_for_the_channel_and_the_settle_step() {
        let clock = ManualClock::new(5_000);
        let mut c = correlator(&clock);

        let _pending = c.fetch(Duration::ZERO);
        assert!(c.transport().sent.is_empty());
        assert_eq!(c.queued_count(), 1);
        assert_eq!(c.pending_count(), 0);

        c.on_open();
        assert!(c.transport().sent.is_empty());

        c.flush_queue();
        assert_eq!(c.transport().sent, vec![Envelope::request(RequestId(5_000))]);
        assert_eq!(c.queued_count(), 0);
        assert_eq!(c.pending_count(), 1);
    }

    #[test]
    fn queued_requests_go_out_in_order_and_settle_independently() {
        let clock = ManualClock::new(7_000);
        let mut c = correlator(&clock);

        let first = c.fetch(Duration::ZERO);
        let second = c.fetch(Duration::ZERO);
        open(&mut c);

        let ids = c.transport().ids();
        assert_eq!(ids.len(), 2);
        assert!(ids[0] < ids[1]);

        c.on_message(Envelope::success(ids[1], sample_record(2.0)));
        c.on_message(Envelope::success(ids[0], sample_record(1.0)));

        assert_eq!(first.now_or_never().unwrap().unwrap().temperature_c(), 1.0);
        assert_eq!(second.now_or_never().unwrap().unwrap().temperature_c(), 2.0);
    }

    #[test]
    fn each_id_settles_once() {
        let clock = ManualClock::new(1);
        let mut c = correlator(&clock);
        open(&mut c);

        let deferred = c.fetch(Duration::ZERO);
        let id = c.transport().ids()[0];

        c.on_message(Envelope::failure(id, "Invalid API key"));
        c.on_message(Envelope::success(id, sample_record(9.0)));

        assert_eq!(
            deferred.now_or_never().unwrap(),
            Err(FetchError::Companion("Invalid API key".into()))
        );
        assert!(c.cached().is_none());
        assert_eq!(c.pending_count(), 0);
    }

    #[test]
    fn unknown_responses_are_discarded() {
        let clock = ManualClock::new(1);
        let mut c = correlator(&clock);
        open(&mut c);

        let deferred = c.fetch(Duration::ZERO);
        c.on_message(Envelope::success(RequestId(999_999), sample_record(9.0)));
        c.on_message(Envelope::request(RequestId(1)));

        assert!(deferred.now_or_never().is_none());
        assert_eq!(c.pending_count(), 1);
        assert!(c.cached().is_none());
    }

    #[test]
    fn requests_during_settling_keep_their_place() {
        let clock = ManualClock::new(100);
        let mut c = correlator(&clock);

        let _a = c.fetch(Duration::ZERO);
        c.on_open();
        let _b = c.fetch(Duration::ZERO);
        assert!(c.transport().sent.is_empty());

        c.flush_queue();
        let ids = c.transport().ids();
        assert_eq!(ids, vec![RequestId(100), RequestId(101)]);

        let _c = c.fetch(Duration::ZERO);
        assert_eq!(c.transport().sent.len(), 3);
    }

    #[test]
    fn failed_drain_requeues_without_losing_order() {
        let clock = ManualClock::new(10);
        let mut c = correlator(&clock);
        let _a = c.fetch(Duration::ZERO);
        let _b = c.fetch(Duration::ZERO);

        c.transport.refuse = true;
        open(&mut c);
        assert_eq!(c.queued_count(), 2);
        assert_eq!(c.pending_count(), 0);
        assert_eq!(c.link_state(), LinkState::Closed);

        c.transport.refuse = false;
        open(&mut c);
        assert_eq!(c.transport().ids(), vec![RequestId(10), RequestId(11)]);
    }

    #[test]
    fn channel_errors_leave_requests_pending() {
        let clock = ManualClock::new(1);
        let mut c = correlator(&clock);
        open(&mut c);
        let deferred = c.fetch(Duration::ZERO);

        c.on_error("peer reset");
        c.on_closed();

        assert!(deferred.now_or_never().is_none());
        assert_eq!(c.pending_count(), 1);
    }

    #[test]
    fn timeout_rejects_only_overdue_requests() {
        let clock = ManualClock::new(0);
        let mut c = Correlator::new(
            RecordingTransport::default(),
            MemoryStore::default(),
            Arc::new(clock.clone()),
            CorrelatorSettings {
                request_timeout: Some(Duration::from_secs(30)),
                ..Default::default()
            },
        );
        open(&mut c);

        let old = c.fetch(Duration::ZERO);
        clock.advance(20_000);
        let young = c.fetch(Duration::ZERO);
        clock.advance(10_000);

        assert_eq!(c.expire_overdue(), 1);
        assert_eq!(
            old.now_or_never().unwrap(),
            Err(FetchError::TimedOut(Duration::from_secs(30)))
        );
        assert!(young.now_or_never().is_none());
    }

    #[test]
    fn timeout_counts_from_the_send_not_the_queueing() {
        let clock = ManualClock::new(0);
        let mut c = Correlator::new(
            RecordingTransport::default(),
            MemoryStore::default(),
            Arc::new(clock.clone()),
            CorrelatorSettings {
                request_timeout: Some(Duration::from_secs(30)),
                ..Default::default()
            },
        );

        let deferred = c.fetch(Duration::ZERO);
        clock.advance(60_000);
        open(&mut c);
        assert_eq!(c.pending_count(), 1);

        assert_eq!(c.expire_overdue(), 0);
        clock.advance(29_999);
        assert_eq!(c.expire_overdue(), 0);
        clock.advance(1);
        assert_eq!(c.expire_overdue(), 1);
        assert_eq!(
            deferred.now_or_never().unwrap(),
            Err(FetchError::TimedOut(Duration::from_secs(30)))
        );
    }

    #[test]
    fn failed_direct_send_closes_the_link() {
        let clock = ManualClock::new(20);
        let mut c = correlator(&clock);
        open(&mut c);

        c.transport.refuse = true;
        let _a = c.fetch(Duration::ZERO);
        assert_eq!(c.link_state(), LinkState::Closed);
        assert_eq!(c.queued_count(), 1);

        let _b = c.fetch(Duration::ZERO);
        assert_eq!(c.queued_count(), 2);

        c.transport.refuse = false;
        open(&mut c);
        assert_eq!(c.transport().ids(), vec![RequestId(20), RequestId(21)]);
        assert_eq!(c.link_state(), LinkState::Open);
    }

    #[test]
    fn shutdown_rejects_pending_and_queued() {
        let clock = ManualClock::new(1);
        let mut c = correlator(&clock);
        open(&mut c);
        let sent = c.fetch(Duration::ZERO);
        c.on_closed();
        let queued = c.fetch(Duration::ZERO);

        c.shutdown();

        assert_eq!(sent.now_or_never().unwrap(), Err(FetchError::Disconnected));
        assert_eq!(queued.now_or_never().unwrap(), Err(FetchError::Disconnected));
    }
}
