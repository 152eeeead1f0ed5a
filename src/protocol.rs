/// Modbus protocol definitions and data structures
///
/// This module contains the request/response types exchanged with the client,
/// function and exception codes, and the hex-text response parsers.

use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{ModbusError, ModbusResult};

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus slave/unit identifier
pub type SlaveId = u8;

/// Hex offset of the function code in a response (byte 7 of the ADU)
pub const FUNCTION_CODE_OFFSET: usize = 14;

/// Hex offset of the byte-count field in a response
pub const BYTE_COUNT_OFFSET: usize = 16;

/// Hex offset of the first register value in a response
pub const REGISTER_DATA_OFFSET: usize = 18;

/// Hex characters per register value
const HEX_CHARS_PER_REGISTER: usize = 4;

/// Modbus function codes this client issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
}

impl ModbusFunction {
    /// Convert from u8 to ModbusFunction
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x03 => Some(ModbusFunction::ReadHoldingRegisters),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ModbusException {
    /// Convert from u8 to ModbusException
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusException::IllegalFunction),
            0x02 => Some(ModbusException::IllegalDataAddress),
            0x03 => Some(ModbusException::IllegalDataValue),
            0x04 => Some(ModbusException::ServerDeviceFailure),
            0x05 => Some(ModbusException::Acknowledge),
            0x06 => Some(ModbusException::ServerDeviceBusy),
            0x08 => Some(ModbusException::MemoryParityError),
            0x0A => Some(ModbusException::GatewayPathUnavailable),
            0x0B => Some(ModbusException::GatewayTargetDeviceFailedToRespond),
            _ => None,
        }
    }

    /// Get human-readable description
    pub fn description(self) -> &'static str {
        match self {
            ModbusException::IllegalFunction => "Illegal Function",
            ModbusException::IllegalDataAddress => "Illegal Data Address",
            ModbusException::IllegalDataValue => "Illegal Data Value",
            ModbusException::ServerDeviceFailure => "Server Device Failure",
            ModbusException::Acknowledge => "Acknowledge",
            ModbusException::ServerDeviceBusy => "Server Device Busy",
            ModbusException::MemoryParityError => "Memory Parity Error",
            ModbusException::GatewayPathUnavailable => "Gateway Path Unavailable",
            ModbusException::GatewayTargetDeviceFailedToRespond => {
                "Gateway Target Device Failed to Respond"
            }
        }
    }

    /// Extract the exception code from an exception response's hex text
    pub fn from_hex(response: &str) -> Option<Self> {
        let code = hex_field(response, BYTE_COUNT_OFFSET, REGISTER_DATA_OFFSET);
        u8::from_str_radix(code, 16).ok().and_then(Self::from_u8)
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus Exception 0x{:02X}: {}", *self as u8, self.description())
    }
}

/// Modbus request structure
///
/// A single register read. The request is transformed into a PDU at send time
/// and never stored by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModbusRequest {
    pub function_code: u8,
    pub slave_id: SlaveId,
    pub start_address: ModbusAddress,
    pub no_of_registers: u16,
}

impl ModbusRequest {
    /// Create a new request
    pub fn new(function_code: u8, slave_id: SlaveId, start_address: ModbusAddress, no_of_registers: u16) -> Self {
        Self {
            function_code,
            slave_id,
            start_address,
            no_of_registers,
        }
    }

    /// Create a read holding registers (0x03) request
    pub fn read_holding_registers(slave_id: SlaveId, start_address: ModbusAddress, no_of_registers: u16) -> Self {
        Self::new(
            ModbusFunction::ReadHoldingRegisters.to_u8(),
            slave_id,
            start_address,
            no_of_registers,
        )
    }

    /// Validate the request
    ///
    /// The frame layout carries the start address and register count in one
    /// byte each, so values above 0xFF would be truncated on the wire.
    pub fn validate(&self) -> ModbusResult<()> {
        if self.function_code & 0x80 != 0 {
            return Err(ModbusError::invalid_data(format!(
                "Function code 0x{:02X} has the exception bit set",
                self.function_code
            )));
        }

        if self.no_of_registers == 0 || self.no_of_registers > crate::MAX_REGISTERS_PER_REQUEST {
            return Err(ModbusError::invalid_data(format!(
                "Invalid register count: {} (must be 1-{})",
                self.no_of_registers,
                crate::MAX_REGISTERS_PER_REQUEST
            )));
        }

        if self.start_address > 0xFF {
            return Err(ModbusError::invalid_data(format!(
                "Start address {} does not fit the single-byte address slot",
                self.start_address
            )));
        }

        Ok(())
    }
}

/// Modbus response structure
///
/// Fields are signed so that a response decoded from empty text can carry the
/// sentinel `-1` in every numeric field. The sentinel is a valid value, not an
/// error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModbusResponse {
    pub transaction_id: i32,
    pub function_code: i32,
    pub no_of_registers: i32,
    pub register_values: Vec<i32>,
}

impl ModbusResponse {
    /// The "no data" response
    pub fn sentinel() -> Self {
        Self {
            transaction_id: -1,
            function_code: -1,
            no_of_registers: -1,
            register_values: Vec::new(),
        }
    }

    /// Check whether this is the "no data" response
    pub fn is_sentinel(&self) -> bool {
        *self == Self::sentinel()
    }

    /// Decode a response from its hex text, leniently
    ///
    /// Empty text yields [`ModbusResponse::sentinel`]. Any field that is not
    /// valid hex (or lies past the end of the text) decodes to `-1`; register
    /// chunks that fail to parse decode to `-1` in place. The last register
    /// chunk may be shorter than four characters.
    pub fn from_hex(response: &str) -> Self {
        if response.is_empty() {
            return Self::sentinel();
        }

        let byte_count = parse_hex_field(hex_field(response, BYTE_COUNT_OFFSET, REGISTER_DATA_OFFSET));

        Self {
            transaction_id: parse_hex_field(hex_field(response, 0, 4)),
            function_code: parse_hex_field(hex_field(response, FUNCTION_CODE_OFFSET, BYTE_COUNT_OFFSET)),
            no_of_registers: if byte_count < 0 { -1 } else { byte_count / 2 },
            register_values: response
                .as_bytes()
                .get(REGISTER_DATA_OFFSET..)
                .unwrap_or_default()
                .chunks(HEX_CHARS_PER_REGISTER)
                .map(|chunk| std::str::from_utf8(chunk).map_or(-1, parse_hex_field))
                .collect(),
        }
    }

    /// Decode a response from its hex text, rejecting anything malformed
    ///
    /// Unlike [`from_hex`](Self::from_hex), empty text, odd lengths, non-hex
    /// characters, truncated headers and a trailing half register are all
    /// reported as [`ModbusError::Frame`].
    pub fn parse_hex(response: &str) -> ModbusResult<Self> {
        let bytes = hex::decode(response)
            .map_err(|e| ModbusError::frame(format!("Invalid hex response: {}", e)))?;

        if bytes.len() < crate::MBAP_HEADER_SIZE + 2 {
            return Err(ModbusError::frame(format!(
                "Response too short: {} bytes",
                bytes.len()
            )));
        }

        let data = &bytes[crate::MBAP_HEADER_SIZE + 2..];
        if data.len() % 2 != 0 {
            return Err(ModbusError::frame("Invalid register data length"));
        }

        Ok(Self {
            transaction_id: i32::from(u16::from_be_bytes([bytes[0], bytes[1]])),
            function_code: i32::from(bytes[crate::MBAP_HEADER_SIZE]),
            no_of_registers: i32::from(bytes[crate::MBAP_HEADER_SIZE + 1]) / 2,
            register_values: data
                .chunks(2)
                .map(|chunk| i32::from(u16::from_be_bytes([chunk[0], chunk[1]])))
                .collect(),
        })
    }
}

/// Whether the hex text is a Modbus exception response
///
/// Checks the high nibble of the function-code byte for `8`.
pub fn is_exception_response(response: &str) -> bool {
    response.as_bytes().get(FUNCTION_CODE_OFFSET) == Some(&b'8')
}

/// Substring `[start, end)` of `text`, clamped to its length
fn hex_field(text: &str, start: usize, end: usize) -> &str {
    let end = end.min(text.len());
    text.get(start.min(end)..end).unwrap_or("")
}

fn parse_hex_field(field: &str) -> i32 {
    i32::from_str_radix(field, 16).unwrap_or(-1)
}
