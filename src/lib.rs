//! # mbap_master - Minimal Modbus-TCP Master
//!
//! A small Modbus-TCP client built around an MBAP frame codec: requests are
//! assembled field by field into Application Data Units, written over TCP, and
//! the single response is decoded from the channel's hex text.
//!
//! ## Features
//!
//! - **Frame codec**: MBAP header construction with an atomic, shareable
//!   transaction counter
//! - **Buffer builder**: ordered big/little-endian field assembly
//! - **Async client**: Tokio-based session with exception detection,
//!   optional response timeout and error/close handlers
//! - **Pluggable channel**: TCP in production, in-memory for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mbap_master::{ModbusClient, ModbusRequest, ModbusResult, ModbusTcpClient};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let mut client = ModbusTcpClient::from_address("127.0.0.1:502").await?;
//!     client
//!         .on_error(|error| eprintln!("channel error: {}", error))
//!         .on_close(|| println!("channel closed"));
//!
//!     let response = client.send(&ModbusRequest::read_holding_registers(1, 0, 4)).await?;
//!     println!("Registers: {:?}", response.register_values);
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Application   │
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Client Session │  send / decode / exception check
//! └─────────────────┘
//!          │
//! ┌─────────────────┐    ┌─────────────────┐
//! │   Frame Codec   │───►│ Buffer Builder  │
//! └─────────────────┘    └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │    Channel      │  TCP (hex or raw reads) / memory
//! └─────────────────┘
//! ```
//!
//! Only one request may be in flight per client: responses are consumed in
//! arrival order and are not matched by transaction ID.

/// Core error types and result handling
pub mod error;

/// Ordered binary field assembly
pub mod buffer;

/// Request/response types and hex response parsing
pub mod protocol;

/// MBAP frame encoding and transaction numbering
pub mod codec;

/// Byte channels underneath the client
pub mod transport;

/// Modbus client implementations
pub mod client;

/// Performance tracking and formatting helpers
pub mod utils;

// Re-export main types for convenience
pub use error::{ModbusError, ModbusResult};
pub use buffer::{BufferBuilder, Endian};
pub use protocol::{ModbusRequest, ModbusResponse, ModbusFunction, ModbusException};
pub use codec::{FrameCodec, ModbusAdu, TransactionCounter};
pub use transport::{ModbusChannel, TcpChannel, MemoryChannel, MemoryPeer, ChannelEncoding, ChannelEvent, EventReceiver, InboundData, TransportStats};
pub use client::{ModbusClient, GenericModbusClient, ModbusTcpClient, ClientConfig, SessionState};
pub use utils::{PerformanceMetrics, OperationTimer};

/// Default timeout for operations (5 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Maximum number of registers that can be read in a single request
pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

/// Maximum Modbus TCP frame size (MBAP header + PDU)
pub const MAX_TCP_FRAME_SIZE: usize = 260;

/// MBAP header size, unit ID included
pub const MBAP_HEADER_SIZE: usize = 7;

/// Largest PDU that fits in one Modbus TCP frame
pub const MAX_PDU_SIZE: usize = MAX_TCP_FRAME_SIZE - MBAP_HEADER_SIZE;

/// Protocol identifier carried by every Modbus-TCP frame
pub const PROTOCOL_ID: u16 = 0;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("mbap_master v{} - minimal Modbus-TCP master", VERSION)
}
