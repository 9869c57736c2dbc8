//! Shared string table carried alongside binary event buffers.
//!
//! Strings are stored NUL-terminated and referenced by index. Index
//! `0xFFFFFFFF` stands for a null string.

use std::collections::HashMap;

use crate::error::{Result, TraceError};

/// Reference value meaning "no string".
pub const NULL_STRING: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringTable {
    values: Vec<String>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a string table part: NUL-separated UTF-8 strings.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut values = Vec::new();
        let body = match data.iter().rposition(|b| *b != 0) {
            Some(last) => &data[..=last],
            None => {
                return Ok(Self {
                    values: vec![String::new(); data.len()],
                })
            }
        };
        for raw in body.split(|b| *b == 0) {
            let value = std::str::from_utf8(raw)
                .map_err(|e| TraceError::fatal(format!("string table entry is not UTF-8: {e}")))?;
            values.push(value.to_string());
        }
        // A trailing empty string is significant if it was explicitly terminated twice.
        let terminators = data.len() - body.len();
        for _ in 1..terminators {
            values.push(String::new());
        }
        Ok(Self { values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up a reference. `Ok(None)` for the null reference.
    pub fn get(&self, index: u32) -> Result<Option<&str>> {
        if index == NULL_STRING {
            return Ok(None);
        }
        self.values
            .get(index as usize)
            .map(|s| Some(s.as_str()))
            .ok_or_else(|| {
                TraceError::fatal(format!(
                    "string reference {index} outside table of {} entries",
                    self.values.len()
                ))
            })
    }
}

/// Builds a string table while encoding, de-duplicating values.
#[derive(Debug, Default)]
pub struct StringTableBuilder {
    values: Vec<String>,
    index: HashMap<String, u32>,
}

impl StringTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its reference.
    pub fn add(&mut self, value: &str) -> u32 {
        if let Some(&idx) = self.index.get(value) {
            return idx;
        }
        let idx = self.values.len() as u32;
        self.values.push(value.to_string());
        self.index.insert(value.to_string(), idx);
        idx
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for value in &self.values {
            out.extend_from_slice(value.as_bytes());
            out.push(0);
        }
        out
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.index.clear();
    }
}
