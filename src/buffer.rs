//! Field-by-field binary buffer assembly
//!
//! `BufferBuilder` records typed fields in append order and only touches memory
//! once, in [`BufferBuilder::build`], where it allocates a buffer of exactly the
//! accumulated length and writes every field at its offset.
//!
//! ```rust
//! use mbap_master::buffer::BufferBuilder;
//!
//! let frame = BufferBuilder::new()
//!     .put_u16_be(0x1234)
//!     .put_u8(0x56)
//!     .build();
//! assert_eq!(&frame[..], &[0x12, 0x34, 0x56]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Byte order of a multi-byte field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Most significant byte first
    Big,
    /// Least significant byte first
    Little,
}

/// One recorded field, consumed at build time
#[derive(Debug, Clone, PartialEq)]
enum Field {
    Raw(Bytes),
    Word { width: usize, value: u64, endian: Endian },
    Float32 { value: f32, endian: Endian },
}

impl Field {
    fn width(&self) -> usize {
        match self {
            Field::Raw(bytes) => bytes.len(),
            Field::Word { width, .. } => *width,
            Field::Float32 { .. } => 4,
        }
    }

    fn write_to(&self, buf: &mut BytesMut) {
        match self {
            Field::Raw(bytes) => buf.put_slice(bytes),
            &Field::Word { width, value, endian } => {
                // bytes past bit 32 come from the upper half of the u64
                let byte_at = |i: usize| ((value >> (8 * i)) & 0xFF) as u8;
                match endian {
                    Endian::Big => (0..width).rev().for_each(|i| buf.put_u8(byte_at(i))),
                    Endian::Little => (0..width).for_each(|i| buf.put_u8(byte_at(i))),
                }
            }
            Field::Float32 { value, endian } => match endian {
                Endian::Big => buf.put_f32(*value),
                Endian::Little => buf.put_f32_le(*value),
            },
        }
    }
}

/// Builder for multi-field binary frames
///
/// Appends never fail: values wider than their slot are masked byte by byte.
/// The builder is consumed by [`build`](Self::build), so one builder produces
/// exactly one frame.
#[derive(Debug, Clone, Default)]
pub struct BufferBuilder {
    fields: Vec<Field>,
    length: usize,
}

impl BufferBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, field: Field) -> Self {
        self.length += field.width();
        self.fields.push(field);
        self
    }

    /// Append a block of bytes verbatim
    pub fn put_raw(self, bytes: &[u8]) -> Self {
        self.push(Field::Raw(Bytes::copy_from_slice(bytes)))
    }

    /// Append an 8-bit value
    pub fn put_u8(self, value: u8) -> Self {
        self.put_word(1, u64::from(value), Endian::Big)
    }

    /// Append a 16-bit value, high byte first
    pub fn put_u16_be(self, value: u16) -> Self {
        self.put_word(2, u64::from(value), Endian::Big)
    }

    /// Append the 4-byte little-endian IEEE-754 representation of `value`
    pub fn put_f32_le(self, value: f32) -> Self {
        self.push(Field::Float32 {
            value,
            endian: Endian::Little,
        })
    }

    /// Append an integer occupying `width` bytes (clamped to 1..=8)
    ///
    /// Byte `i` of the field is `(value >> 8*i) & 0xFF`; anything above the
    /// requested width is silently dropped.
    pub fn put_word(self, width: usize, value: u64, endian: Endian) -> Self {
        self.push(Field::Word {
            width: width.clamp(1, 8),
            value,
            endian,
        })
    }

    /// Total number of bytes the built buffer will hold
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Serialize all fields in append order
    pub fn build(self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.length);
        for field in &self.fields {
            field.write_to(&mut buf);
        }
        debug_assert_eq!(buf.len(), self.length);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_in_append_order() {
        let builder = BufferBuilder::new().put_u16_be(0x1234).put_u8(0x56);
        assert_eq!(builder.len(), 3);
        assert_eq!(&builder.build()[..], &[0x12, 0x34, 0x56]);
    }

    #[test]
    fn test_raw_block_copied_at_offset() {
        let frame = BufferBuilder::new()
            .put_u8(0xAA)
            .put_raw(&[1, 2, 3])
            .put_u16_be(0xBEEF)
            .build();
        assert_eq!(&frame[..], &[0xAA, 1, 2, 3, 0xBE, 0xEF]);
    }

    #[test]
    fn test_float_little_endian() {
        let frame = BufferBuilder::new().put_f32_le(1.0).build();
        // 1.0f32 == 0x3F800000
        assert_eq!(&frame[..], &[0x00, 0x00, 0x80, 0x3F]);
    }

    #[test]
    fn test_word_masks_overflow() {
        let frame = BufferBuilder::new()
            .put_word(1, 0x1FF, Endian::Big)
            .put_word(2, 0x12_3456, Endian::Big)
            .build();
        assert_eq!(&frame[..], &[0xFF, 0x34, 0x56]);
    }

    #[test]
    fn test_wide_words_past_32_bits() {
        let big = BufferBuilder::new()
            .put_word(5, 0x01_0203_0405, Endian::Big)
            .build();
        assert_eq!(&big[..], &[0x01, 0x02, 0x03, 0x04, 0x05]);

        let little = BufferBuilder::new()
            .put_word(8, 0x0102_0304_0506_0708, Endian::Little)
            .build();
        assert_eq!(&little[..], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_length_is_sum_of_widths() {
        let builder = BufferBuilder::new()
            .put_raw(&[0; 10])
            .put_u8(1)
            .put_u16_be(2)
            .put_f32_le(3.5)
            .put_word(0, 4, Endian::Little)
            .put_word(12, 5, Endian::Big);
        // zero width clamps to 1, twelve clamps to 8
        assert_eq!(builder.len(), 10 + 1 + 2 + 4 + 1 + 8);
        assert_eq!(builder.clone().build().len(), builder.len());
    }

    #[test]
    fn test_empty_builder() {
        let builder = BufferBuilder::new();
        assert!(builder.is_empty());
        assert!(builder.build().is_empty());
    }
}
