/// Modbus-TCP client session
///
/// The client owns one channel and runs one request/response exchange at a
/// time: encode the request, write it, wait for the next inbound event and
/// turn it into a [`ModbusResponse`] or an error.
///
/// A background task drains the channel's events as they arrive. Error and
/// close handlers therefore run as soon as the transport reports, even when
/// no request is pending; data events are queued for the session.
///
/// Responses are not matched to requests by transaction ID. Only one request
/// may be outstanding per channel; `send` takes `&mut self`, which enforces
/// that for a single client value. Any failure that could leave a response in
/// flight (timeout, abandoned send, protocol error) closes the channel.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::lookup_host;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::codec::FrameCodec;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{is_exception_response, ModbusException, ModbusFunction, ModbusRequest, ModbusResponse, SlaveId};
use crate::transport::{
    ChannelEncoding, ChannelEvent, EventReceiver, InboundData, ModbusChannel, TcpChannel, TransportStats,
};
use crate::utils::{OperationTimer, PerformanceMetrics};

/// Handler invoked with every channel error
pub type ErrorHandler = Box<dyn Fn(&ModbusError) + Send + Sync>;

/// Handler invoked when the channel closes
pub type CloseHandler = Box<dyn Fn() + Send + Sync>;

/// Lifecycle of the current request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No request sent yet
    Idle,
    /// A request was written and its response has not been consumed
    AwaitingResponse,
    /// The last request produced a response
    Resolved,
    /// The last request failed
    Failed,
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, `host:port`; the host may be a name or an IP literal
    pub address: String,
    pub connect_timeout_ms: u64,
    /// Response window; `None` waits indefinitely
    pub response_timeout_ms: Option<u64>,
    pub encoding: ChannelEncoding,
    /// Log every frame sent and received at info level
    pub packet_logging: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{}", crate::DEFAULT_TCP_PORT),
            connect_timeout_ms: crate::DEFAULT_TIMEOUT_MS,
            response_timeout_ms: Some(crate::DEFAULT_TIMEOUT_MS),
            encoding: ChannelEncoding::Hex,
            packet_logging: false,
        }
    }
}

impl ClientConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> ModbusResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ModbusResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ModbusError::configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Check the settings without touching the network
    pub fn validate(&self) -> ModbusResult<()> {
        let well_formed = self
            .address
            .rsplit_once(':')
            .map_or(false, |(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !well_formed {
            return Err(ModbusError::configuration(format!(
                "Invalid address {}: expected host:port",
                self.address
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ModbusError::configuration("connect_timeout_ms must be positive"));
        }
        if self.response_timeout_ms == Some(0) {
            return Err(ModbusError::configuration(
                "response_timeout_ms must be positive (omit it to wait indefinitely)",
            ));
        }
        Ok(())
    }

    /// Resolve the address to every socket address it names
    pub async fn resolve(&self) -> ModbusResult<Vec<SocketAddr>> {
        let addresses: Vec<SocketAddr> = lookup_host(self.address.as_str())
            .await
            .map_err(|e| ModbusError::configuration(format!("Cannot resolve {}: {}", self.address, e)))?
            .collect();
        if addresses.is_empty() {
            return Err(ModbusError::configuration(format!("No addresses found for {}", self.address)));
        }
        Ok(addresses)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms.map(Duration::from_millis)
    }
}

/// Operations every Modbus client offers
#[async_trait]
pub trait ModbusClient: Send + Sync {
    /// Send a request and wait for its response
    async fn send(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse>;

    /// Read holding registers (function code 0x03)
    async fn read_03(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>>;

    /// Check if client is connected
    fn is_connected(&self) -> bool;

    /// Close the client connection
    async fn close(&mut self) -> ModbusResult<()>;

    /// Get transport statistics
    fn get_stats(&self) -> TransportStats;

    async fn read_holding_registers(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_03(slave_id, address, quantity).await
    }
}

/// Handlers shared between a client and its event task
#[derive(Default)]
struct Handlers {
    error: RwLock<Vec<ErrorHandler>>,
    close: RwLock<Vec<CloseHandler>>,
    closed: AtomicBool,
}

impl Handlers {
    fn notify_error(&self, error: &ModbusError) {
        let handlers = self.error.read().unwrap_or_else(PoisonError::into_inner);
        for handler in handlers.iter() {
            handler(error);
        }
    }

    /// Close handlers run at most once per client
    fn notify_close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let handlers = self.close.read().unwrap_or_else(PoisonError::into_inner);
        for handler in handlers.iter() {
            handler();
        }
    }
}

/// Run handlers for every channel event and pass the events on to the session
async fn dispatch_events(
    events: Option<EventReceiver>,
    session: mpsc::UnboundedSender<ChannelEvent>,
    handlers: Arc<Handlers>,
) {
    let Some(mut events) = events else {
        warn!("Channel events were already taken; the client will see it as closed");
        return;
    };

    while let Some(event) = events.recv().await {
        match &event {
            ChannelEvent::Error(error) => {
                warn!("Channel error: {}", error);
                handlers.notify_error(error);
            }
            ChannelEvent::Closed => {
                debug!("Channel closed");
                handlers.notify_close();
            }
            ChannelEvent::Data(_) => {}
        }
        if session.send(event).is_err() {
            return;
        }
    }
    // event source gone without a Closed event
    handlers.notify_close();
}

/// Client session over any [`ModbusChannel`]
pub struct GenericModbusClient<C: ModbusChannel> {
    channel: C,
    codec: FrameCodec,
    response_timeout: Option<Duration>,
    state: SessionState,
    handlers: Arc<Handlers>,
    inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    dispatcher: JoinHandle<()>,
    metrics: PerformanceMetrics,
}

impl<C: ModbusChannel> fmt::Debug for GenericModbusClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericModbusClient")
            .field("state", &self.state)
            .field("response_timeout", &self.response_timeout)
            .field("connected", &self.channel.is_connected())
            .finish_non_exhaustive()
    }
}

impl<C: ModbusChannel> GenericModbusClient<C> {
    /// Create a session over `channel`, numbering frames from the process-wide counter
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(channel: C) -> Self {
        Self::with_codec(channel, FrameCodec::default())
    }

    /// Create a session with an explicit codec (and therefore counter)
    pub fn with_codec(mut channel: C, codec: FrameCodec) -> Self {
        let handlers = Arc::new(Handlers::default());
        let (session, inbound) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch_events(channel.take_events(), session, handlers.clone()));

        Self {
            channel,
            codec,
            response_timeout: None,
            state: SessionState::Idle,
            handlers,
            inbound,
            dispatcher,
            metrics: PerformanceMetrics::new(),
        }
    }

    /// Bound the wait for each response; `None` waits indefinitely
    pub fn set_response_timeout(&mut self, limit: Option<Duration>) -> &mut Self {
        self.response_timeout = limit;
        self
    }

    /// Register a handler for channel errors
    pub fn on_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&ModbusError) + Send + Sync + 'static,
    {
        self.handlers
            .error
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(handler));
        self
    }

    /// Register a handler for channel close
    pub fn on_close<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.handlers
            .close
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(handler));
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// Get a reference to the underlying channel
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Get a mutable reference to the underlying channel
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Send a request, calling `on_sent` once the frame is written
    ///
    /// Protocol errors (`non-string response`, `invalid request`) and an
    /// expired response window close the channel before they are returned. A
    /// channel error or close while waiting fails the request with
    /// [`ModbusError::Connection`]; the registered handlers see the event
    /// itself.
    pub async fn send_with<F>(&mut self, request: &ModbusRequest, on_sent: F) -> ModbusResult<ModbusResponse>
    where
        F: FnOnce() + Send,
    {
        if self.state == SessionState::AwaitingResponse {
            // an earlier send was dropped mid-flight; its response may still arrive
            let error = ModbusError::protocol("previous request abandoned while awaiting response");
            self.destroy(&error).await;
            self.state = SessionState::Failed;
            return Err(error);
        }

        if !self.channel.is_connected() {
            self.shutdown_channel().await;
            self.state = SessionState::Failed;
            return Err(ModbusError::connection("Channel is closed"));
        }

        let timer = OperationTimer::start("modbus request");
        let adu = self.codec.encode_adu(request);
        debug!(
            "Sending transaction {} to unit {} ({}, start {}, count {})",
            adu.transaction_id,
            adu.unit_id,
            ModbusFunction::from_u8(request.function_code)
                .map_or_else(|| format!("function 0x{:02X}", request.function_code), |f| f.to_string()),
            request.start_address,
            request.no_of_registers
        );

        self.state = SessionState::AwaitingResponse;
        let result = match self.channel.write(&adu.to_bytes()).await {
            Ok(()) => {
                on_sent();
                self.await_response().await
            }
            Err(error) => Err(error),
        };

        self.metrics.record(&result, timer.stop());
        match &result {
            Ok(_) => self.state = SessionState::Resolved,
            Err(error) => {
                debug!("Transaction {} failed: {}", adu.transaction_id, error);
                self.state = SessionState::Failed;
            }
        }
        result
    }

    async fn await_response(&mut self) -> ModbusResult<ModbusResponse> {
        let Some(limit) = self.response_timeout else {
            return self.next_response().await;
        };

        match timeout(limit, self.next_response()).await {
            Ok(result) => result,
            Err(_) => {
                let error = ModbusError::timeout("read response", limit.as_millis() as u64);
                // a late reply would otherwise answer the next request
                self.destroy(&error).await;
                Err(error)
            }
        }
    }

    async fn next_response(&mut self) -> ModbusResult<ModbusResponse> {
        match self.inbound.recv().await {
            Some(ChannelEvent::Data(InboundData::Text(text))) => self.handle_response(&text).await,
            Some(ChannelEvent::Data(InboundData::Binary(_))) => {
                let error = ModbusError::protocol("non-string response");
                self.destroy(&error).await;
                Err(error)
            }
            Some(ChannelEvent::Error(error)) => {
                self.shutdown_channel().await;
                Err(ModbusError::connection(format!(
                    "Channel error while awaiting response: {}",
                    error
                )))
            }
            Some(ChannelEvent::Closed) | None => {
                self.shutdown_channel().await;
                Err(ModbusError::connection("Channel closed while awaiting response"))
            }
        }
    }

    async fn handle_response(&mut self, text: &str) -> ModbusResult<ModbusResponse> {
        if is_exception_response(text) {
            match ModbusException::from_hex(text) {
                Some(exception) => warn!("Server answered with {}", exception),
                None => warn!("Server answered with an exception frame: {}", text),
            }
            let error = ModbusError::protocol("invalid request");
            self.destroy(&error).await;
            return Err(error);
        }

        let response = self.codec.decode(text);
        debug!(
            "Received transaction {} with {} register(s)",
            response.transaction_id,
            response.register_values.len()
        );
        Ok(response)
    }

    /// Tear the channel down after a failed exchange
    async fn destroy(&mut self, error: &ModbusError) {
        warn!("Closing channel: {}", error);
        self.handlers.notify_error(error);
        self.shutdown_channel().await;
    }

    async fn shutdown_channel(&mut self) {
        if let Err(e) = self.channel.close().await {
            debug!("Error while closing channel: {}", e);
        }
        self.handlers.notify_close();
    }
}

impl<C: ModbusChannel> Drop for GenericModbusClient<C> {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

#[async_trait]
impl<C: ModbusChannel> ModbusClient for GenericModbusClient<C> {
    async fn send(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        self.send_with(request, || {}).await
    }

    async fn read_03(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        let request = ModbusRequest::read_holding_registers(slave_id, address, quantity);
        request.validate()?;

        let response = self.send(&request).await?;
        response
            .register_values
            .iter()
            .map(|&value| {
                u16::try_from(value)
                    .map_err(|_| ModbusError::frame(format!("Unparseable register value in transaction {}", response.transaction_id)))
            })
            .collect()
    }

    fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.shutdown_channel().await;
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        let mut stats = self.channel.get_stats();
        stats.timeouts += self.metrics.timed_out_requests;
        stats
    }
}

/// Modbus TCP client
#[derive(Debug)]
pub struct ModbusTcpClient {
    inner: GenericModbusClient<TcpChannel>,
}

impl ModbusTcpClient {
    /// Connect using `config`, trying each resolved address in turn
    pub async fn from_config(config: &ClientConfig) -> ModbusResult<Self> {
        config.validate()?;

        let mut last_error = None;
        for address in config.resolve().await? {
            match TcpChannel::connect(address, config.connect_timeout(), config.encoding).await {
                Ok(mut channel) => {
                    channel.set_packet_logging(config.packet_logging);
                    let mut inner = GenericModbusClient::new(channel);
                    inner.set_response_timeout(config.response_timeout());
                    return Ok(Self { inner });
                }
                Err(error) => {
                    debug!("Connect to {} failed: {}", address, error);
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ModbusError::connection(format!("Cannot connect to {}", config.address))))
    }

    /// Connect to `addr` with default settings
    pub async fn from_address(addr: &str) -> ModbusResult<Self> {
        let config = ClientConfig {
            address: addr.to_string(),
            ..ClientConfig::default()
        };
        Self::from_config(&config).await
    }

    /// Connect using `config`, then run `on_connect`
    pub async fn connect_with<F>(config: &ClientConfig, on_connect: F) -> ModbusResult<Self>
    where
        F: FnOnce(),
    {
        let client = Self::from_config(config).await?;
        on_connect();
        Ok(client)
    }

    /// Get the server address
    pub fn server_address(&self) -> SocketAddr {
        self.inner.channel().address
    }

    /// Enable or disable packet logging on existing client
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.inner.channel_mut().set_packet_logging(enabled);
    }

    pub fn on_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&ModbusError) + Send + Sync + 'static,
    {
        self.inner.on_error(handler);
        self
    }

    pub fn on_close<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.on_close(handler);
        self
    }

    pub async fn send_with<F>(&mut self, request: &ModbusRequest, on_sent: F) -> ModbusResult<ModbusResponse>
    where
        F: FnOnce() + Send,
    {
        self.inner.send_with(request, on_sent).await
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn metrics(&self) -> &PerformanceMetrics {
        self.inner.metrics()
    }
}

#[async_trait]
impl ModbusClient for ModbusTcpClient {
    async fn send(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        self.inner.send(request).await
    }

    async fn read_03(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.inner.read_03(slave_id, address, quantity).await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.inner.close().await
    }

    fn get_stats(&self) -> TransportStats {
        self.inner.get_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TransactionCounter;
    use crate::transport::{MemoryChannel, MemoryPeer};
    use std::sync::atomic::AtomicUsize;

    fn memory_client() -> (GenericModbusClient<MemoryChannel>, MemoryPeer) {
        let (channel, peer) = MemoryChannel::pair();
        let client = GenericModbusClient::with_codec(channel, FrameCodec::new(TransactionCounter::new()));
        (client, peer)
    }

    fn counting_handlers(client: &mut GenericModbusClient<MemoryChannel>) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let errors = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let e = errors.clone();
        let c = closes.clone();
        client
            .on_error(move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            })
            .on_close(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        (errors, closes)
    }

    /// Let the event task catch up with whatever the peer queued
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_send_resolves_with_decoded_response() {
        let (mut client, mut peer) = memory_client();
        let request = ModbusRequest::read_holding_registers(1, 0, 2);

        peer.send_text("00010000000701030400aa00bb");
        let response = client.send(&request).await.unwrap();

        assert_eq!(response.transaction_id, 1);
        assert_eq!(response.function_code, 3);
        assert_eq!(response.no_of_registers, 2);
        assert_eq!(response.register_values, vec![0xAA, 0xBB]);
        assert_eq!(client.state(), SessionState::Resolved);

        let frame = peer.next_frame().await.unwrap();
        assert_eq!(&frame[..], &[0, 1, 0, 0, 0, 7, 1, 3, 0, 0, 0, 2, 0]);
    }

    #[tokio::test]
    async fn test_on_sent_runs_after_write() {
        let (mut client, peer) = memory_client();
        let sent = Arc::new(AtomicUsize::new(0));
        let flag = sent.clone();

        peer.send_text("00010000000501030200aa");
        client
            .send_with(&ModbusRequest::read_holding_registers(1, 0, 1), move || {
                flag.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exception_response_fails_and_closes() {
        let (mut client, peer) = memory_client();
        let (errors, closes) = counting_handlers(&mut client);

        peer.send_text("000100000003018302");
        let err = client
            .send(&ModbusRequest::read_holding_registers(1, 0, 1))
            .await
            .unwrap_err();

        assert_eq!(err, ModbusError::protocol("invalid request"));
        assert_eq!(client.state(), SessionState::Failed);
        assert!(!client.is_connected());
        assert!(peer.is_closed());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_binary_payload_fails_and_closes() {
        let (mut client, peer) = memory_client();
        peer.send_binary(&[0x00, 0x01]);

        let err = client
            .send(&ModbusRequest::read_holding_registers(1, 0, 1))
            .await
            .unwrap_err();
        assert_eq!(err, ModbusError::protocol("non-string response"));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_empty_text_resolves_with_sentinel() {
        let (mut client, peer) = memory_client();
        peer.send_text("");

        let response = client
            .send(&ModbusRequest::read_holding_registers(1, 0, 1))
            .await
            .unwrap();
        assert!(response.is_sentinel());
        assert_eq!(client.state(), SessionState::Resolved);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_one_response_consumed_per_send() {
        let (mut client, peer) = memory_client();
        peer.send_text("00010000000501030200aa");
        peer.send_text("00020000000501030200bb");

        let request = ModbusRequest::read_holding_registers(1, 0, 1);
        let first = client.send(&request).await.unwrap();
        let second = client.send(&request).await.unwrap();
        assert_eq!(first.register_values, vec![0xAA]);
        assert_eq!(second.register_values, vec![0xBB]);
        assert_eq!(client.metrics().successful_requests, 2);
    }

    #[tokio::test]
    async fn test_channel_close_while_waiting() {
        let (mut client, mut peer) = memory_client();
        let (errors, closes) = counting_handlers(&mut client);
        let request = ModbusRequest::read_holding_registers(1, 0, 1);

        let (result, _) = tokio::join!(client.send(&request), async {
            peer.next_frame().await;
            peer.close();
        });

        assert!(matches!(result, Err(ModbusError::Connection { .. })));
        assert_eq!(client.state(), SessionState::Failed);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_error_while_waiting() {
        let (mut client, mut peer) = memory_client();
        let (_, closes) = counting_handlers(&mut client);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        client.on_error(move |error| sink.lock().unwrap().push(error.clone()));
        let request = ModbusRequest::read_holding_registers(1, 0, 1);

        let (result, _) = tokio::join!(client.send(&request), async {
            peer.next_frame().await;
            peer.send_error(ModbusError::io("connection reset"));
        });

        assert!(matches!(result, Err(ModbusError::Connection { .. })));
        assert_eq!(*seen.lock().unwrap(), vec![ModbusError::io("connection reset")]);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(!client.is_connected());

        settle().await;
        // the trailing close event does not fire the handlers again
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_idle_close_reaches_handlers() {
        let (mut client, peer) = memory_client();
        let (errors, closes) = counting_handlers(&mut client);

        peer.close();
        settle().await;

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert!(!client.is_connected());

        let err = client
            .send(&ModbusRequest::read_holding_registers(1, 0, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_idle_error_reaches_handlers() {
        let (mut client, peer) = memory_client();
        let (errors, closes) = counting_handlers(&mut client);

        peer.send_error(ModbusError::io("connection reset"));
        settle().await;

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(!client.is_connected());
        assert_eq!(client.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_local_close_reports_once() {
        let (mut client, peer) = memory_client();
        let (_, closes) = counting_handlers(&mut client);

        client.close().await.unwrap();
        client.close().await.unwrap();
        assert!(peer.is_closed());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_timeout_closes_channel() {
        let (mut client, peer) = memory_client();
        let (errors, closes) = counting_handlers(&mut client);
        client.set_response_timeout(Some(Duration::from_millis(200)));

        let err = client
            .send(&ModbusRequest::read_holding_registers(1, 0, 1))
            .await
            .unwrap_err();
        assert_eq!(err, ModbusError::timeout("read response", 200));
        assert_eq!(client.state(), SessionState::Failed);
        assert_eq!(client.get_stats().timeouts, 1);
        assert_eq!(client.metrics().timed_out_requests, 1);
        assert!(!client.is_connected());
        assert!(peer.is_closed());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_never_answers_next_request() {
        let (mut client, peer) = memory_client();
        client.set_response_timeout(Some(Duration::from_millis(100)));
        let request = ModbusRequest::read_holding_registers(1, 0, 1);

        let err = client.send(&request).await.unwrap_err();
        assert!(matches!(err, ModbusError::Timeout { timeout_ms: 100, .. }));

        // replies for transactions 1 and 2 arrive after the window closed
        assert!(!peer.send_text("00010000000501030200aa"));
        assert!(!peer.send_text("00020000000501030200bb"));

        let err = client.send(&request).await.unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }));
        assert_eq!(client.codec().counter().current(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_send_poisons_channel() {
        let (mut client, _peer) = memory_client();
        let request = ModbusRequest::read_holding_registers(1, 0, 1);

        {
            let pending = client.send(&request);
            // poll once so the frame is written, then drop the future
            assert!(tokio_test::task::spawn(pending).poll().is_pending());
        }
        assert_eq!(client.state(), SessionState::AwaitingResponse);

        let err = client.send(&request).await.unwrap_err();
        assert!(matches!(err, ModbusError::Protocol { .. }));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_read_03_validates_and_converts() {
        let (mut client, peer) = memory_client();
        assert!(client.read_03(1, 0, 0).await.is_err());

        peer.send_text("000100000007010304123400ff");
        assert_eq!(client.read_holding_registers(1, 0, 2).await.unwrap(), vec![0x1234, 0x00FF]);
    }

    #[tokio::test]
    async fn test_config_defaults_and_json() {
        let config = ClientConfig::default();
        assert_eq!(config.address, "127.0.0.1:502");
        assert_eq!(config.response_timeout(), Some(Duration::from_secs(5)));
        assert!(config.validate().is_ok());

        let config = ClientConfig::from_json_str(
            r#"{"address": "10.0.0.5:1502", "response_timeout_ms": null, "encoding": "raw"}"#,
        )
        .unwrap();
        let expected: SocketAddr = "10.0.0.5:1502".parse().unwrap();
        assert_eq!(config.resolve().await.unwrap(), vec![expected]);
        assert_eq!(config.response_timeout(), None);
        assert_eq!(config.encoding, ChannelEncoding::Raw);
        assert_eq!(config.connect_timeout_ms, crate::DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_config_accepts_host_names() {
        let config = ClientConfig::from_json_str(r#"{"address": "plc.local:502"}"#).unwrap();
        assert_eq!(config.address, "plc.local:502");
        assert!(ClientConfig::from_json_str(r#"{"address": "[::1]:1502"}"#).is_ok());
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(ClientConfig::from_json_str(r#"{"address": "not an address"}"#).is_err());
        assert!(ClientConfig::from_json_str(r#"{"address": "host:port"}"#).is_err());
        assert!(ClientConfig::from_json_str(r#"{"address": ":502"}"#).is_err());
        assert!(ClientConfig::from_json_str(r#"{"connect_timeout_ms": 0}"#).is_err());
        assert!(ClientConfig::from_json_str(r#"{"response_timeout_ms": 0}"#).is_err());
        assert!(ClientConfig::from_json_str("[").is_err());
    }
}
