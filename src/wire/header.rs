//! The 12-byte container header.

use crate::error::{Result, TraceError};
use crate::wire::{HEADER_LEN, LEGACY_FORMAT_VERSION, LEGACY_MAGIC, MAGIC};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Little-endian chunked container.
    Chunked,
    /// Big-endian monolithic container.
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub kind: ContainerKind,
    pub tool_version: u32,
    pub format_version: u32,
}

impl ContainerHeader {
    /// Parse and validate a header. Versions newer than the reader supports
    /// are rejected rather than parsed on a best-effort basis.
    pub fn parse(data: &[u8], max_tool_version: u32, max_format_version: u32) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(TraceError::fatal(format!(
                "container header needs {} bytes, got {}",
                HEADER_LEN,
                data.len()
            )));
        }
        let word = |i: usize| [data[i], data[i + 1], data[i + 2], data[i + 3]];
        let header = match u32::from_le_bytes(word(0)) {
            MAGIC => ContainerHeader {
                kind: ContainerKind::Chunked,
                tool_version: u32::from_le_bytes(word(4)),
                format_version: u32::from_le_bytes(word(8)),
            },
            LEGACY_MAGIC => ContainerHeader {
                kind: ContainerKind::Legacy,
                tool_version: u32::from_be_bytes(word(4)),
                format_version: u32::from_be_bytes(word(8)),
            },
            other => {
                return Err(TraceError::fatal(format!(
                    "bad container magic {other:#010x}"
                )))
            }
        };

        if header.tool_version > max_tool_version {
            return Err(TraceError::fatal(format!(
                "tool version {:#x} is newer than supported {:#x}",
                header.tool_version, max_tool_version
            )));
        }
        match header.kind {
            ContainerKind::Chunked if header.format_version > max_format_version => {
                Err(TraceError::fatal(format!(
                    "format version {} is newer than supported {}",
                    header.format_version, max_format_version
                )))
            }
            ContainerKind::Legacy if header.format_version != LEGACY_FORMAT_VERSION => {
                Err(TraceError::fatal(format!(
                    "legacy format version {} is not supported",
                    header.format_version
                )))
            }
            _ => Ok(header),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let words = [MAGIC, self.tool_version, self.format_version];
        for (i, word) in words.iter().enumerate() {
            let bytes = match self.kind {
                ContainerKind::Chunked => word.to_le_bytes(),
                ContainerKind::Legacy => word.to_be_bytes(),
            };
            out[i * 4..i * 4 + 4].copy_from_slice(&bytes);
        }
        out
    }
}
