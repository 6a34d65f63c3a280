//! Newline-delimited JSON envelopes over TCP.

use anyhow::{Context, Result};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
};
use tracing::{debug, info, warn};

use crate::envelope::{ChannelError, ChannelEvent, Envelope, Transport};

use super::Endpoint;

#[derive(Debug, Clone)]
pub struct TcpTransport {
    open: Arc<AtomicBool>,
    outbound: UnboundedSender<Envelope>,
}

impl Transport for TcpTransport {
    fn send(&mut self, envelope: &Envelope) -> Result<(), ChannelError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(ChannelError::NotOpen);
        }
        self.outbound.send(envelope.clone()).map_err(|_| ChannelError::Shutdown)
    }
}

/// Device side: keep (re)connecting to the companion at `addr`.
///
/// Must be called from within a tokio runtime.
pub fn connect(addr: String, retry: Duration) -> Endpoint<TcpTransport> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let open = Arc::new(AtomicBool::new(false));
    let flag = open.clone();

    tokio::spawn(async move {
        loop {
            match TcpStream::connect(&addr).await {
                Ok(stream) => {
                    info!(%addr, "connected to companion");
                    if !serve_connection(stream, &flag, &mut outbound_rx, &events_tx).await {
                        break;
                    }
                    info!(%addr, "companion connection closed");
                }
                Err(err) => debug!(%addr, %err, "companion not reachable"),
            }
            if events_tx.is_closed() {
                break;
            }
            tokio::time::sleep(retry).await;
        }
    });

    Endpoint { transport: TcpTransport { open, outbound: outbound_tx }, events: events_rx }
}

/// Companion side: accept one device connection at a time on `addr`.
pub async fn listen(addr: &str) -> Result<Endpoint<TcpTransport>> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to listen on {addr}"))?;
    info!(addr = %listener.local_addr()?, "waiting for device connections");

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let open = Arc::new(AtomicBool::new(false));
    let flag = open.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    info!(%peer, "device connected");
                    if !serve_connection(stream, &flag, &mut outbound_rx, &events_tx).await {
                        break;
                    }
                    info!(%peer, "device disconnected");
                }
                Err(err) => warn!(%err, "failed to accept connection"),
            }
        }
    });

    Ok(Endpoint { transport: TcpTransport { open, outbound: outbound_tx }, events: events_rx })
}

/// Pump one connection until it drops. Returns `false` once the owning side is gone.
async fn serve_connection(
    stream: TcpStream,
    open: &AtomicBool,
    outbound: &mut UnboundedReceiver<Envelope>,
    events: &UnboundedSender<ChannelEvent>,
) -> bool {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    open.store(true, Ordering::SeqCst);
    if events.send(ChannelEvent::Open).is_err() {
        return false;
    }

    let alive = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !line.trim().is_empty() && events.send(decode(&line)).is_err() {
                        break false;
                    }
                }
                Ok(None) => break true,
                Err(err) => {
                    warn!(%err, "failed to read from peer");
                    break true;
                }
            },
            envelope = outbound.recv() => match envelope {
                Some(envelope) => {
                    if let Err(err) = write_envelope(&mut writer, &envelope).await {
                        warn!(%err, request_id = %envelope.request_id, "failed to write to peer");
                        break true;
                    }
                }
                None => break false,
            },
        }
    };

    open.store(false, Ordering::SeqCst);
    alive && events.send(ChannelEvent::Closed).is_ok()
}

fn decode(line: &str) -> ChannelEvent {
    match Envelope::from_line(line) {
        Ok(envelope) => ChannelEvent::Message(envelope),
        Err(err) => {
            warn!(%err, "dropping undecodable message");
            ChannelEvent::Error(format!("undecodable message: {err}"))
        }
    }
}

async fn write_envelope(writer: &mut OwnedWriteHalf, envelope: &Envelope) -> Result<()> {
    let mut line = envelope.to_line().context("Failed to encode envelope")?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await.context("Failed to write envelope")?;
    Ok(())
}
