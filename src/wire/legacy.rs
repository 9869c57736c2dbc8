//! The inline header of legacy containers.

use serde_json::{Map, Value};

use crate::codec::encoder::write_legacy_utf8;
use crate::codec::LegacyReader;
use crate::error::{Result, TraceError};
use crate::wire::chunk::FileHeader;
use crate::wire::{flag_bits, flag_names};

fn parse_json_object(text: Option<String>, what: &str) -> Result<Value> {
    let Some(text) = text else {
        return Ok(Value::Object(Map::new()));
    };
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| TraceError::fatal(format!("invalid legacy {what}: {e}")))?;
    Ok(if value.is_object() {
        value
    } else {
        Value::Object(Map::new())
    })
}

/// Parse the header that follows the 12-byte container header. Returns the
/// header and the offset of the first event record.
pub fn parse_legacy_header(data: &[u8]) -> Result<(FileHeader, usize)> {
    let mut reader = LegacyReader::new(data);
    let context_info = match reader.read_utf8_string()? {
        Some(text) => parse_json_object(Some(text), "context info")?,
        None => return Err(TraceError::fatal("legacy container has no context info")),
    };
    let flags = reader.read_u32()?;
    let low = reader.read_u32()? as u64;
    let high = reader.read_u32()? as u64;
    let metadata = parse_json_object(reader.read_utf8_string()?, "metadata")?;

    let header = FileHeader {
        flags: flag_names(flags),
        timebase: ((high << 32) | low) as f64,
        context_info,
        metadata,
    };
    Ok((header, reader.position()))
}

pub fn write_legacy_header(header: &FileHeader, out: &mut Vec<u8>) {
    write_legacy_utf8(out, &header.context_info.to_string());
    out.extend_from_slice(&flag_bits(&header.flags).to_be_bytes());
    let timebase = header.timebase.max(0.0) as u64;
    out.extend_from_slice(&(timebase as u32).to_be_bytes());
    out.extend_from_slice(&((timebase >> 32) as u32).to_be_bytes());
    write_legacy_utf8(out, &header.metadata.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_layout() {
        let mut header = FileHeader::new(5_000_000_000.0);
        header.flags = vec!["has_high_resolution_times".into()];
        header.context_info = json!({"contextType": "script", "uri": "file:///x"});
        header.metadata = json!({"units": "bytes"});

        let mut bytes = Vec::new();
        write_legacy_header(&header, &mut bytes);
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        let (parsed, offset) = parse_legacy_header(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(&bytes[offset..], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_missing_context_info() {
        assert!(parse_legacy_header(&[0, 0]).unwrap_err().is_fatal());
        assert!(parse_legacy_header(&[0, 4]).is_err());
    }
}
