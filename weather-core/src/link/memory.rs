use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::envelope::{ChannelError, ChannelEvent, Envelope, Transport};

use super::Endpoint;

/// In-process duplex link that starts closed.
///
/// Both sides see the same `Open`/`Closed` events when the link is toggled.
#[derive(Debug, Clone)]
pub struct MemoryLink {
    open: Arc<AtomicBool>,
    device: UnboundedSender<ChannelEvent>,
    companion: UnboundedSender<ChannelEvent>,
}

impl MemoryLink {
    pub fn open(&self) {
        if !self.open.swap(true, Ordering::SeqCst) {
            self.broadcast(ChannelEvent::Open);
        }
    }

    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.broadcast(ChannelEvent::Closed);
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Report a channel-level error to both sides.
    pub fn fail(&self, reason: &str) {
        self.broadcast(ChannelEvent::Error(reason.to_string()));
    }

    fn broadcast(&self, event: ChannelEvent) {
        let _ = self.device.send(event.clone());
        let _ = self.companion.send(event);
    }
}

#[derive(Debug, Clone)]
pub struct MemoryTransport {
    open: Arc<AtomicBool>,
    peer: UnboundedSender<ChannelEvent>,
}

impl Transport for MemoryTransport {
    fn send(&mut self, envelope: &Envelope) -> Result<(), ChannelError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(ChannelError::NotOpen);
        }
        self.peer
            .send(ChannelEvent::Message(envelope.clone()))
            .map_err(|_| ChannelError::Shutdown)
    }
}

/// Build a closed link: `(control, device end, companion end)`.
pub fn memory_link() -> (MemoryLink, Endpoint<MemoryTransport>, Endpoint<MemoryTransport>) {
    let open = Arc::new(AtomicBool::new(false));
    let (device_tx, device_rx) = mpsc::unbounded_channel();
    let (companion_tx, companion_rx) = mpsc::unbounded_channel();

    let control = MemoryLink {
        open: open.clone(),
        device: device_tx.clone(),
        companion: companion_tx.clone(),
    };
    let device = Endpoint {
        transport: MemoryTransport { open: open.clone(), peer: companion_tx },
        events: device_rx,
    };
    let companion = Endpoint {
        transport: MemoryTransport { open, peer: device_tx },
        events: companion_rx,
    };

    (control, device, companion)
}
