//! Concrete channels between the device and the companion.
//!
//! Every link hands each side an [`Endpoint`]: a [`Transport`] for outbound
//! envelopes plus a stream of [`ChannelEvent`]s.

use tokio::sync::mpsc::UnboundedReceiver;

use crate::envelope::{ChannelEvent, Transport};

pub mod memory;
pub mod tcp;

pub use memory::{MemoryLink, MemoryTransport, memory_link};
pub use tcp::TcpTransport;

pub struct Endpoint<T: Transport> {
    pub transport: T,
    pub events: UnboundedReceiver<ChannelEvent>,
}
