//! Binary trace containers.
//!
//! A modern container is a 12-byte little-endian header followed by framed
//! chunks, each carrying typed parts. Legacy containers are big-endian and
//! hold a single sequential event buffer after an inline header.
//! [`WireStreamDecoder`] accepts either, fed in arbitrary byte ranges, and
//! hands complete chunks to a [`ChunkHandler`] in arrival order.

pub mod chunk;
pub mod header;
pub mod legacy;
pub mod resource;
pub mod stream;
pub mod writer;

pub use chunk::{Chunk, ChunkType, FileHeader, Part, PartType};
pub use header::{ContainerHeader, ContainerKind};
pub use resource::{InlineResolver, Resolution, ResourceResolver};
pub use stream::{ChunkHandler, WireStreamDecoder};
pub use writer::{ContainerWriter, LegacyContainerWriter};

pub const MAGIC: u32 = 0xDEAD_BEEF;
/// [`MAGIC`] written big-endian and read back little-endian.
pub const LEGACY_MAGIC: u32 = 0xEFBE_ADDE;

pub const TOOL_VERSION: u32 = 0xE821_4400;
pub const FORMAT_VERSION: u32 = 10;
pub const LEGACY_FORMAT_VERSION: u32 = 3;

pub const HEADER_LEN: usize = 12;
pub const CHUNK_HEADER_LEN: usize = 24;
pub const PART_HEADER_LEN: usize = 12;

/// Wire id reserved for `wtf.event#define` in every stream.
pub const DEFINE_WIRE_ID: u16 = 1;

/// Source file flag: event times carry sub-millisecond precision.
pub const FLAG_HAS_HIGH_RESOLUTION_TIMES: u32 = 1 << 0;
/// Source file flag: times are counts rather than microseconds.
pub const FLAG_TIMES_AS_COUNT: u32 = 1 << 1;

/// Names of the bits set in a legacy `u32` flags word.
pub fn flag_names(bits: u32) -> Vec<String> {
    let mut names = Vec::new();
    if bits & FLAG_HAS_HIGH_RESOLUTION_TIMES != 0 {
        names.push("has_high_resolution_times".to_string());
    }
    if bits & FLAG_TIMES_AS_COUNT != 0 {
        names.push("times_as_count".to_string());
    }
    names
}

/// Inverse of [`flag_names`]. Unknown names are dropped.
pub fn flag_bits(names: &[String]) -> u32 {
    names.iter().fold(0, |bits, name| {
        bits | match name.as_str() {
            "has_high_resolution_times" => FLAG_HAS_HIGH_RESOLUTION_TIMES,
            "times_as_count" => FLAG_TIMES_AS_COUNT,
            _ => 0,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_magic_is_swapped() {
        assert_eq!(u32::from_le_bytes(MAGIC.to_be_bytes()), LEGACY_MAGIC);
    }

    #[test]
    fn test_flag_names() {
        let names = flag_names(FLAG_HAS_HIGH_RESOLUTION_TIMES | 0x80);
        assert_eq!(names, vec!["has_high_resolution_times".to_string()]);
        assert_eq!(flag_bits(&names), FLAG_HAS_HIGH_RESOLUTION_TIMES);
    }
}
