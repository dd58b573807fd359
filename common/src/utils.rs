//! Common Utilities
//!
//! Helpers for logging and bit-level packing of protocol fields

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// MSB-first bit writer used for control PDUs whose fields cross byte boundaries
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: BytesMut,
    current: u8,
    nof_bits: u8,
}

impl BitWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(capacity),
            current: 0,
            nof_bits: 0,
        }
    }

    /// Append the `nof_bits` least significant bits of `value`
    pub fn write(&mut self, value: u32, nof_bits: u8) {
        debug_assert!(nof_bits <= 32);
        for i in (0..nof_bits).rev() {
            let bit = ((value >> i) & 1) as u8;
            self.current |= bit << (7 - self.nof_bits);
            self.nof_bits += 1;
            if self.nof_bits == 8 {
                self.bytes.put_u8(self.current);
                self.current = 0;
                self.nof_bits = 0;
            }
        }
    }

    /// Number of bits written so far
    pub fn bit_len(&self) -> usize {
        self.bytes.len() * 8 + self.nof_bits as usize
    }

    /// Zero-pad to the next byte boundary and return the packed bytes
    pub fn finish(mut self) -> Bytes {
        if self.nof_bits > 0 {
            self.bytes.put_u8(self.current);
        }
        trace!("Packed {} bytes: {}", self.bytes.len(), bytes_to_hex(&self.bytes));
        self.bytes.freeze()
    }
}

/// MSB-first bit reader, the counterpart of [`BitWriter`]
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// Create a reader over `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read `nof_bits` bits, `None` if the input is exhausted
    pub fn read(&mut self, nof_bits: u8) -> Option<u32> {
        if self.pos + nof_bits as usize > self.data.len() * 8 {
            return None;
        }
        let mut value = 0u32;
        for _ in 0..nof_bits {
            let byte = self.data[self.pos / 8];
            let bit = (byte >> (7 - (self.pos % 8))) & 1;
            value = (value << 1) | bit as u32;
            self.pos += 1;
        }
        Some(value)
    }

    /// Number of bits still available
    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    /// Number of whole bytes touched so far
    pub fn bytes_consumed(&self) -> usize {
        (self.pos + 7) / 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_hex() {
        let data = vec![0x12, 0x34, 0xAB, 0xCD];
        assert_eq!(bytes_to_hex(&data), "12 34 ab cd");
    }

    #[test]
    fn test_bit_writer_crosses_bytes() {
        let mut writer = BitWriter::new();
        writer.write(0, 1);      // D/C
        writer.write(0, 3);      // CPT
        writer.write(0x3FF, 10); // 10-bit value
        writer.write(1, 1);
        assert_eq!(writer.bit_len(), 15);
        let packed = writer.finish();
        assert_eq!(&packed[..], &[0x0F, 0xFE]);
    }

    #[test]
    fn test_bit_reader() {
        let data = [0x0F, 0xFE];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read(4), Some(0));
        assert_eq!(reader.read(10), Some(0x3FF));
        assert_eq!(reader.read(1), Some(1));
        assert_eq!(reader.remaining_bits(), 1);
        assert_eq!(reader.read(2), None);
        assert_eq!(reader.bytes_consumed(), 2);
    }
}
