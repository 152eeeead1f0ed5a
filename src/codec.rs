//! # Modbus-TCP Frame Codec
//!
//! Builds complete Modbus-TCP Application Data Units (ADUs) from requests and
//! owns the transaction counter that numbers them.
//!
//! ## Frame Layout
//!
//! ```text
//! ┌────────────────┬─────────────┬────────┬─────────┬──────────────────────────┐
//! │ Transaction ID │ Protocol ID │ Length │ Unit ID │ PDU                      │
//! │ 2 bytes (BE)   │ 2 bytes = 0 │ 2 (BE) │ 1 byte  │ Length - 1 bytes         │
//! └────────────────┴─────────────┴────────┴─────────┴──────────────────────────┘
//! ```
//!
//! The request PDU occupies six single-byte slots:
//! `[function_code, 0, start_address, 0, no_of_registers, 0]`. The start
//! address and register count are written into one byte each, so only their
//! low byte reaches the wire. Servers paired with this client expect exactly
//! that layout.
//!
//! ## Transaction IDs
//!
//! Every frame takes the next value from a [`TransactionCounter`]. Clones of a
//! counter share one sequence, and [`TransactionCounter::process_wide`] hands
//! out the sequence shared by the whole process.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::Lazy;

use crate::buffer::{BufferBuilder, Endian};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusRequest, ModbusResponse, SlaveId};
use crate::{MAX_PDU_SIZE, PROTOCOL_ID};

static PROCESS_COUNTER: Lazy<TransactionCounter> = Lazy::new(TransactionCounter::new);

/// Monotonic source of MBAP transaction IDs
///
/// Starts at 0; the first call to [`next`](Self::next) returns 1. On overflow
/// the sequence continues at 1, never handing out 0.
#[derive(Debug, Clone, Default)]
pub struct TransactionCounter {
    value: Arc<AtomicU16>,
}

impl TransactionCounter {
    /// Create an independent counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the counter shared by every codec in the process
    pub fn process_wide() -> Self {
        PROCESS_COUNTER.clone()
    }

    /// Increment and return the next transaction ID
    pub fn next(&self) -> u16 {
        let step = |id: u16| match id.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        // fetch_update returns the previous value; the closure never yields None
        let previous = self
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| Some(step(id)))
            .unwrap_or_else(|id| id);
        step(previous)
    }

    /// Last ID handed out (0 if none yet)
    pub fn current(&self) -> u16 {
        self.value.load(Ordering::SeqCst)
    }
}

/// Structured view of an encoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusAdu {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
    pub pdu: Bytes,
}

impl ModbusAdu {
    /// Serialize the ADU through the buffer builder
    pub fn to_bytes(&self) -> Bytes {
        BufferBuilder::new()
            .put_u16_be(self.transaction_id)
            .put_u16_be(self.protocol_id)
            .put_u16_be(self.length)
            .put_u8(self.unit_id)
            .put_raw(&self.pdu)
            .build()
    }
}

/// Encoder for Modbus-TCP request frames
#[derive(Debug, Clone)]
pub struct FrameCodec {
    counter: TransactionCounter,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(TransactionCounter::process_wide())
    }
}

impl FrameCodec {
    /// Create a codec numbering its frames from `counter`
    pub fn new(counter: TransactionCounter) -> Self {
        Self { counter }
    }

    /// The counter this codec draws transaction IDs from
    pub fn counter(&self) -> &TransactionCounter {
        &self.counter
    }

    /// Build the request PDU
    pub fn build_pdu(request: &ModbusRequest) -> Bytes {
        BufferBuilder::new()
            .put_u8(request.function_code)
            .put_u8(0)
            .put_word(1, u64::from(request.start_address), Endian::Big)
            .put_u8(0)
            .put_word(1, u64::from(request.no_of_registers), Endian::Big)
            .put_u8(0)
            .build()
    }

    /// Wrap an arbitrary PDU in an MBAP header with a fresh transaction ID
    ///
    /// PDUs longer than [`MAX_PDU_SIZE`] are rejected without consuming an ID.
    pub fn frame(&self, pdu: Bytes, unit_id: SlaveId) -> ModbusResult<ModbusAdu> {
        if pdu.len() > MAX_PDU_SIZE {
            return Err(ModbusError::frame(format!(
                "PDU of {} bytes exceeds the {}-byte limit",
                pdu.len(),
                MAX_PDU_SIZE
            )));
        }
        Ok(self.wrap(pdu, unit_id))
    }

    /// Encode a request, returning the structured frame
    pub fn encode_adu(&self, request: &ModbusRequest) -> ModbusAdu {
        self.wrap(Self::build_pdu(request), request.slave_id)
    }

    // pdu.len() <= MAX_PDU_SIZE, so the length field cannot overflow
    fn wrap(&self, pdu: Bytes, unit_id: SlaveId) -> ModbusAdu {
        ModbusAdu {
            transaction_id: self.counter.next(),
            protocol_id: PROTOCOL_ID,
            length: pdu.len() as u16 + 1,
            unit_id,
            pdu,
        }
    }

    /// Encode a request into wire bytes
    pub fn encode(&self, request: &ModbusRequest) -> Bytes {
        self.encode_adu(request).to_bytes()
    }

    /// Decode a response from the channel's hex text
    pub fn decode(&self, response: &str) -> ModbusResponse {
        ModbusResponse::from_hex(response)
    }
}
