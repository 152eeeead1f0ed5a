//! # Channel Layer
//!
//! The client session only needs to write bytes and receive inbound events.
//! [`ModbusChannel`] is that seam; two implementations ship with the crate:
//!
//! ### `TcpChannel`
//! - One tokio `TcpStream` per channel, split into a write half owned by the
//!   channel and a read half owned by a background reader task
//! - Inbound data delivered as lowercase hex text ([`ChannelEncoding::Hex`],
//!   the default) or as raw bytes ([`ChannelEncoding::Raw`])
//! - Optional packet logging and transfer statistics
//!
//! ### `MemoryChannel`
//! - In-process pair backed by tokio mpsc queues
//! - The [`MemoryPeer`] half plays the server: it sees written frames and
//!   injects data, error and close events
//!
//! Inbound events are queued as the connection produces them, whether or not a
//! request is waiting. A transport error is always followed by
//! [`ChannelEvent::Closed`].
//!
//! One read event is treated as one complete response; there is no
//! reassembly of frames split across TCP segments.
//!
//! ```rust,no_run
//! use mbap_master::transport::{ChannelEncoding, ChannelEvent, ModbusChannel, TcpChannel};
//! use std::time::Duration;
//!
//! # async fn example() -> mbap_master::ModbusResult<()> {
//! let mut channel = TcpChannel::connect(
//!     "127.0.0.1:502".parse().unwrap(),
//!     Duration::from_secs(5),
//!     ChannelEncoding::Hex,
//! ).await?;
//! let mut events = channel.take_events().unwrap();
//!
//! channel.write(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0x00]).await?;
//! if let Some(ChannelEvent::Data(data)) = events.recv().await {
//!     println!("Received: {:?}", data);
//! }
//! channel.close().await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::{ModbusError, ModbusResult};
use crate::utils::format::bytes_to_hex;
use crate::MAX_TCP_FRAME_SIZE;

/// Log packet with direction
fn log_packet(direction: &str, data: &[u8]) {
    info!("[MODBUS-TCP] {} {}", direction, bytes_to_hex(data));
}

/// How a channel hands inbound bytes to its reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelEncoding {
    /// Two lowercase hex characters per received byte
    #[default]
    Hex,
    /// Received bytes untouched
    Raw,
}

/// Payload of one inbound data event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundData {
    Text(String),
    Binary(Bytes),
}

impl InboundData {
    fn byte_len(&self) -> usize {
        match self {
            InboundData::Text(text) => text.len() / 2,
            InboundData::Binary(bytes) => bytes.len(),
        }
    }
}

/// Everything a channel can report to its reader
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Data(InboundData),
    Error(ModbusError),
    Closed,
}

/// Queue of inbound events handed out by [`ModbusChannel::take_events`]
pub type EventReceiver = mpsc::UnboundedReceiver<ChannelEvent>;

/// Transfer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Byte channel underneath a client session
#[async_trait]
pub trait ModbusChannel: Send + Sync {
    /// Write one complete frame
    async fn write(&mut self, frame: &[u8]) -> ModbusResult<()>;

    /// Hand over the inbound event queue; `None` once it has been taken
    fn take_events(&mut self) -> Option<EventReceiver>;

    /// Close the channel, releasing the connection
    async fn close(&mut self) -> ModbusResult<()>;

    /// Check if the channel still holds an open connection
    fn is_connected(&self) -> bool;

    /// Get transfer statistics
    fn get_stats(&self) -> TransportStats;
}

/// State shared between a channel and whatever produces its inbound events
#[derive(Debug)]
struct ChannelShared {
    connected: AtomicBool,
    packet_logging: AtomicBool,
    stats: Mutex<TransportStats>,
}

impl ChannelShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            packet_logging: AtomicBool::new(false),
            stats: Mutex::new(TransportStats::default()),
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn stats(&self) -> MutexGuard<'_, TransportStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_sent(&self, frame: &[u8]) {
        let mut stats = self.stats();
        stats.requests_sent += 1;
        stats.bytes_sent += frame.len() as u64;
    }

    fn record_received(&self, data: &InboundData) {
        let mut stats = self.stats();
        stats.responses_received += 1;
        stats.bytes_received += data.byte_len() as u64;
    }

    fn record_error(&self) {
        self.stats().errors += 1;
    }
}

/// Channel over a tokio TCP connection
pub struct TcpChannel {
    writer: Option<OwnedWriteHalf>,
    events: Option<EventReceiver>,
    reader: JoinHandle<()>,
    pub address: SocketAddr,
    encoding: ChannelEncoding,
    shared: Arc<ChannelShared>,
}

impl TcpChannel {
    /// Connect to `address`, giving up after `connect_timeout`
    pub async fn connect(
        address: SocketAddr,
        connect_timeout: Duration,
        encoding: ChannelEncoding,
    ) -> ModbusResult<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ModbusError::timeout(format!("connect to {}", address), connect_timeout.as_millis() as u64))?
            .map_err(|e| ModbusError::connection(format!("Failed to connect to {}: {}", address, e)))?;

        debug!("Connected to {}", address);
        Ok(Self::from_stream(stream, address, encoding))
    }

    /// Wrap an already connected stream and start reading from it
    pub fn from_stream(stream: TcpStream, address: SocketAddr, encoding: ChannelEncoding) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (sender, events) = mpsc::unbounded_channel();
        let shared = ChannelShared::new();
        let reader = tokio::spawn(read_loop(read_half, address, encoding, shared.clone(), sender));

        Self {
            writer: Some(write_half),
            events: Some(events),
            reader,
            address,
            encoding,
            shared,
        }
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.shared.packet_logging.store(enabled, Ordering::Relaxed);
    }

    pub fn encoding(&self) -> ChannelEncoding {
        self.encoding
    }
}

/// Forward everything read from `stream` as channel events until EOF or error
async fn read_loop(
    mut stream: OwnedReadHalf,
    address: SocketAddr,
    encoding: ChannelEncoding,
    shared: Arc<ChannelShared>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let mut buf = vec![0u8; MAX_TCP_FRAME_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                debug!("Connection to {} closed by peer", address);
                break;
            }
            Ok(n) => {
                let received = &buf[..n];
                if shared.packet_logging.load(Ordering::Relaxed) {
                    log_packet("receive", received);
                }
                let data = match encoding {
                    ChannelEncoding::Hex => InboundData::Text(hex::encode(received)),
                    ChannelEncoding::Raw => InboundData::Binary(Bytes::copy_from_slice(received)),
                };
                shared.record_received(&data);
                if events.send(ChannelEvent::Data(data)).is_err() {
                    // nobody is listening any more
                    return;
                }
            }
            Err(e) => {
                debug!("Read from {} failed: {}", address, e);
                shared.record_error();
                shared.disconnect();
                let _ = events.send(ChannelEvent::Error(e.into()));
                break;
            }
        }
    }
    shared.disconnect();
    let _ = events.send(ChannelEvent::Closed);
}

#[async_trait]
impl ModbusChannel for TcpChannel {
    async fn write(&mut self, frame: &[u8]) -> ModbusResult<()> {
        let writer = match self.writer.as_mut() {
            Some(writer) if self.shared.is_connected() => writer,
            _ => return Err(ModbusError::connection(format!("Channel to {} is closed", self.address))),
        };

        if let Err(e) = writer.write_all(frame).await {
            self.shared.record_error();
            self.shared.disconnect();
            self.writer = None;
            return Err(e.into());
        }

        self.shared.record_sent(frame);
        if self.shared.packet_logging.load(Ordering::Relaxed) {
            log_packet("send", frame);
        }
        Ok(())
    }

    fn take_events(&mut self) -> Option<EventReceiver> {
        self.events.take()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.shared.disconnect();
        self.reader.abort();
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
            debug!("Closed connection to {}", self.address);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some() && self.shared.is_connected()
    }

    fn get_stats(&self) -> TransportStats {
        self.shared.stats().clone()
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// In-process channel half used by the client
pub struct MemoryChannel {
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
    events: Option<EventReceiver>,
    shared: Arc<ChannelShared>,
}

/// Server side of a [`MemoryChannel`]
pub struct MemoryPeer {
    written: mpsc::UnboundedReceiver<Bytes>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    shared: Arc<ChannelShared>,
}

impl MemoryChannel {
    /// Create a connected channel and its peer
    pub fn pair() -> (MemoryChannel, MemoryPeer) {
        let (outbound, written) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::unbounded_channel();
        let shared = ChannelShared::new();
        (
            MemoryChannel {
                outbound: Some(outbound),
                events: Some(inbound),
                shared: shared.clone(),
            },
            MemoryPeer { written, events, shared },
        )
    }
}

#[async_trait]
impl ModbusChannel for MemoryChannel {
    async fn write(&mut self, frame: &[u8]) -> ModbusResult<()> {
        let outbound = match self.outbound.as_ref() {
            Some(outbound) if self.shared.is_connected() => outbound,
            _ => return Err(ModbusError::connection("Memory channel is closed")),
        };
        outbound
            .send(Bytes::copy_from_slice(frame))
            .map_err(|_| ModbusError::connection("Memory peer dropped"))?;
        self.shared.record_sent(frame);
        Ok(())
    }

    fn take_events(&mut self) -> Option<EventReceiver> {
        self.events.take()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.shared.disconnect();
        self.outbound = None;
        self.events = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    fn get_stats(&self) -> TransportStats {
        self.shared.stats().clone()
    }
}

impl MemoryPeer {
    /// Next frame the client wrote, or `None` once the client has closed
    pub async fn next_frame(&mut self) -> Option<Bytes> {
        self.written.recv().await
    }

    /// Deliver hex text to the client; `false` once the connection is closed
    pub fn send_text<S: Into<String>>(&self, text: S) -> bool {
        self.deliver(InboundData::Text(text.into()))
    }

    /// Deliver raw bytes to the client; `false` once the connection is closed
    pub fn send_binary(&self, bytes: &[u8]) -> bool {
        self.deliver(InboundData::Binary(Bytes::copy_from_slice(bytes)))
    }

    /// Fail the connection with `error`, then close it
    pub fn send_error(&self, error: ModbusError) -> bool {
        if !self.shared.is_connected() {
            return false;
        }
        self.shared.record_error();
        self.shared.disconnect();
        self.push(ChannelEvent::Error(error)) && self.push(ChannelEvent::Closed)
    }

    /// Close the connection from the server side
    pub fn close(&self) -> bool {
        if !self.shared.is_connected() {
            return false;
        }
        self.shared.disconnect();
        self.push(ChannelEvent::Closed)
    }

    /// Whether the connection has been closed from either side
    pub fn is_closed(&self) -> bool {
        !self.shared.is_connected()
    }

    fn deliver(&self, data: InboundData) -> bool {
        if !self.shared.is_connected() {
            return false;
        }
        self.shared.record_received(&data);
        self.push(ChannelEvent::Data(data))
    }

    fn push(&self, event: ChannelEvent) -> bool {
        self.events.send(event).is_ok()
    }
}
