//! Low-level readers for the two event buffer encodings.
//!
//! Modern buffers are little-endian and addressed in 32-bit words. Legacy
//! buffers are big-endian and read strictly sequentially.

use crate::codec::string_table::StringTable;
use crate::error::{Result, TraceError};

/// Random-access view over a modern, word-aligned event buffer.
pub struct PackedInput<'a> {
    data: &'a [u8],
    strings: &'a StringTable,
}

impl<'a> PackedInput<'a> {
    pub fn new(data: &'a [u8], strings: &'a StringTable) -> Self {
        Self { data, strings }
    }

    pub fn strings(&self) -> &'a StringTable {
        self.strings
    }

    /// Number of whole words in the buffer.
    pub fn word_len(&self) -> usize {
        self.data.len() / 4
    }

    /// Read the word at word index `index`.
    pub fn word(&self, index: usize) -> Result<u32> {
        let start = index * 4;
        let bytes = self
            .data
            .get(start..start + 4)
            .ok_or_else(|| truncated(start + 4, self.data.len()))?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Borrow `len` bytes starting at word index `index`.
    pub fn bytes_at_word(&self, index: usize, len: usize) -> Result<&'a [u8]> {
        let start = index * 4;
        self.data
            .get(start..start + len)
            .ok_or_else(|| truncated(start + len, self.data.len()))
    }
}

fn truncated(needed: usize, available: usize) -> TraceError {
    TraceError::fatal(format!(
        "event buffer truncated: needed {needed} bytes, have {available}"
    ))
}

/// Sequential big-endian reader over a legacy event buffer.
pub struct LegacyReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> LegacyReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| truncated(end, self.data.len()))?;
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// `u16` byte count (0 = null) followed by the bytes.
    pub fn read_ascii_string(&mut self) -> Result<Option<String>> {
        let count = self.read_u16()?;
        match count {
            0 => Ok(None),
            0xFFFF => Err(TraceError::fatal(
                "string table references are not supported in legacy buffers",
            )),
            n => {
                let bytes = self.read_bytes(n as usize)?;
                Ok(Some(bytes.iter().map(|b| *b as char).collect()))
            }
        }
    }

    /// `u16` char count (0 = null), `u16` byte count, then UTF-8 bytes.
    pub fn read_utf8_string(&mut self) -> Result<Option<String>> {
        let chars = self.read_u16()?;
        match chars {
            0 => Ok(None),
            0xFFFF => Err(TraceError::fatal(
                "string table references are not supported in legacy buffers",
            )),
            _ => {
                let len = self.read_u16()? as usize;
                let bytes = self.read_bytes(len)?;
                let value = std::str::from_utf8(bytes)
                    .map_err(|e| TraceError::fatal(format!("invalid UTF-8 string: {e}")))?;
                Ok(Some(value.to_string()))
            }
        }
    }
}
