//! Straddle-checked bit packing for bitfield runs.
//!
//! A run of bitfields shares a single backing storage unit (the integer type
//! named by the field declaration). Little-endian runs fill from the low bit
//! upward; big-endian runs fill from the high bit downward. A field that
//! would need bits from beyond the current storage unit is rejected rather
//! than spanning into the next one.

use std::io::{Read, Write};

use crate::registry::Endian;
use crate::result::{Error, Result};

#[derive(Debug, Default)]
pub struct BitReader {
    storage_width: u32,
    buffer: u64,
    remaining: u32,
}

impl BitReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards any partial run without consuming more input.
    pub fn reset(&mut self) {
        self.storage_width = 0;
        self.buffer = 0;
        self.remaining = 0;
    }

    pub fn read<R: Read + ?Sized>(&mut self, reader: &mut R, endian: Endian, storage_width: u32, bits: u32) -> Result<u64> {
        if self.remaining == 0 || self.storage_width != storage_width {
            self.fill(reader, endian, storage_width)?;
        }
        if bits > self.remaining {
            return Err(Error::BitfieldStraddle { bits, storage: storage_width });
        }
        let value = match endian {
            Endian::Little => {
                let consumed = storage_width * 8 - self.remaining;
                let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
                (self.buffer >> consumed) & mask
            }
            Endian::Big => {
                let shift = self.remaining - bits;
                let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
                (self.buffer >> shift) & mask
            }
        };
        self.remaining -= bits;
        Ok(value)
    }

    fn fill<R: Read + ?Sized>(&mut self, reader: &mut R, endian: Endian, storage_width: u32) -> Result<()> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf[..storage_width as usize])?;
        let mut value = 0u64;
        match endian {
            Endian::Little => {
                for (i, b) in buf[..storage_width as usize].iter().enumerate() {
                    value |= (*b as u64) << (8 * i);
                }
            }
            Endian::Big => {
                for b in &buf[..storage_width as usize] {
                    value = (value << 8) | (*b as u64);
                }
            }
        }
        self.buffer = value;
        self.storage_width = storage_width;
        self.remaining = storage_width * 8;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct BitWriter {
    storage_width: u32,
    buffer: u64,
    remaining: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write<W: Write + ?Sized>(
        &mut self,
        writer: &mut W,
        endian: Endian,
        storage_width: u32,
        bits: u32,
        value: u64,
    ) -> Result<()> {
        if self.remaining == 0 {
            self.storage_width = storage_width;
            self.remaining = storage_width * 8;
        } else if self.storage_width != storage_width {
            self.flush(writer, endian)?;
            self.storage_width = storage_width;
            self.remaining = storage_width * 8;
        }
        if bits > self.remaining {
            return Err(Error::BitfieldStraddle { bits, storage: storage_width });
        }
        let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
        let value = value & mask;
        match endian {
            Endian::Little => {
                let consumed = self.storage_width * 8 - self.remaining;
                self.buffer |= value << consumed;
            }
            Endian::Big => {
                let shift = self.remaining - bits;
                self.buffer |= value << shift;
            }
        }
        self.remaining -= bits;
        if self.remaining == 0 {
            self.flush(writer, endian)?;
        }
        Ok(())
    }

    /// Emits the current storage unit, zero-padding any unused high bits.
    pub fn flush<W: Write + ?Sized>(&mut self, writer: &mut W, endian: Endian) -> Result<()> {
        if self.storage_width == 0 {
            return Ok(());
        }
        let width = self.storage_width as usize;
        let bytes = self.buffer.to_le_bytes();
        match endian {
            Endian::Little => writer.write_all(&bytes[..width])?,
            Endian::Big => {
                let mut be = bytes[..width].to_vec();
                be.reverse();
                writer.write_all(&be)?;
            }
        }
        self.buffer = 0;
        self.remaining = 0;
        self.storage_width = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_fills_low_to_high() -> Result<()> {
        let input = [0x12u8, 0x34];
        let mut reader = BitReader::new();
        let mut cursor = &input[..];
        let a = reader.read(&mut cursor, Endian::Little, 2, 4)?;
        let b = reader.read(&mut cursor, Endian::Little, 2, 4)?;
        let c = reader.read(&mut cursor, Endian::Little, 2, 4)?;
        let d = reader.read(&mut cursor, Endian::Little, 2, 4)?;
        assert_eq!((a, b, c, d), (2, 1, 4, 3));
        Ok(())
    }

    #[test]
    fn big_endian_fills_high_to_low() -> Result<()> {
        let input = [0x12u8, 0x34];
        let mut reader = BitReader::new();
        let mut cursor = &input[..];
        let a = reader.read(&mut cursor, Endian::Big, 2, 4)?;
        let b = reader.read(&mut cursor, Endian::Big, 2, 4)?;
        let c = reader.read(&mut cursor, Endian::Big, 2, 4)?;
        let d = reader.read(&mut cursor, Endian::Big, 2, 4)?;
        assert_eq!((a, b, c, d), (1, 2, 3, 4));
        Ok(())
    }

    #[test]
    fn straddle_is_rejected() {
        let input = [0x12u8, 0x34];
        let mut reader = BitReader::new();
        let mut cursor = &input[..];
        reader.read(&mut cursor, Endian::Little, 1, 6).unwrap();
        let err = reader.read(&mut cursor, Endian::Little, 1, 4).unwrap_err();
        assert!(matches!(err, Error::BitfieldStraddle { .. }));
    }

    #[test]
    fn round_trip_write_then_read() -> Result<()> {
        let mut out = Vec::new();
        let mut writer = BitWriter::new();
        writer.write(&mut out, Endian::Little, 2, 4, 2)?;
        writer.write(&mut out, Endian::Little, 2, 4, 1)?;
        writer.write(&mut out, Endian::Little, 2, 4, 4)?;
        writer.write(&mut out, Endian::Little, 2, 4, 3)?;
        assert_eq!(out, vec![0x12, 0x34]);
        Ok(())
    }
}
