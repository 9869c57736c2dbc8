//! Chunk framing and the typed parts a chunk carries.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::codec::StringTable;
use crate::db::source::{Resource, SourceHeader};
use crate::error::{Result, TraceError};
use crate::wire::{CHUNK_HEADER_LEN, PART_HEADER_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    FileHeader,
    EventData,
}

impl ChunkType {
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0x1 => Some(ChunkType::FileHeader),
            0x2 => Some(ChunkType::EventData),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            ChunkType::FileHeader => 0x1,
            ChunkType::EventData => 0x2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartType {
    FileHeader,
    JsonEvents,
    LegacyEvents,
    BinaryEvents,
    StringTable,
    BinaryResource,
    StringResource,
}

impl PartType {
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0x10000 => Some(PartType::FileHeader),
            0x20000 => Some(PartType::JsonEvents),
            0x20001 => Some(PartType::LegacyEvents),
            0x20002 => Some(PartType::BinaryEvents),
            0x30000 => Some(PartType::StringTable),
            0x40000 => Some(PartType::BinaryResource),
            0x40001 => Some(PartType::StringResource),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            PartType::FileHeader => 0x10000,
            PartType::JsonEvents => 0x20000,
            PartType::LegacyEvents => 0x20001,
            PartType::BinaryEvents => 0x20002,
            PartType::StringTable => 0x30000,
            PartType::BinaryResource => 0x40000,
            PartType::StringResource => 0x40001,
        }
    }

    pub fn is_resource(self) -> bool {
        matches!(self, PartType::BinaryResource | PartType::StringResource)
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Contents of a file header part.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileHeader {
    #[serde(default)]
    pub flags: Vec<String>,
    /// Wall-clock time of the trace's zero, in milliseconds.
    pub timebase: f64,
    #[serde(default = "empty_object", rename = "contextInfo")]
    pub context_info: Value,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

impl FileHeader {
    pub fn new(timebase: f64) -> Self {
        Self {
            flags: Vec::new(),
            timebase,
            context_info: empty_object(),
            metadata: empty_object(),
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut header: FileHeader = serde_json::from_slice(data)
            .map_err(|e| TraceError::fatal(format!("invalid file header: {e}")))?;
        if !header.context_info.is_object() {
            header.context_info = empty_object();
        }
        if !header.metadata.is_object() {
            header.metadata = empty_object();
        }
        Ok(header)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "type": "file_header",
            "flags": self.flags,
            "timebase": self.timebase,
            "contextInfo": self.context_info,
            "metadata": self.metadata,
        })
    }

    pub fn to_source_header(&self) -> SourceHeader {
        SourceHeader {
            timebase: self.timebase,
            flags: self.flags.clone(),
            context_info: self.context_info.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Part {
    FileHeader(FileHeader),
    StringTable(StringTable),
    BinaryEvents(Vec<u8>),
    LegacyEvents(Vec<u8>),
    JsonEvents(Value),
    Resource(Resource),
}

/// A decoded chunk with every part resolved.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: u32,
    pub chunk_type: ChunkType,
    pub time_start: u32,
    pub time_end: u32,
    pub parts: Vec<Part>,
}

impl Chunk {
    pub fn file_header(&self) -> Option<&FileHeader> {
        self.parts.iter().find_map(|p| match p {
            Part::FileHeader(header) => Some(header),
            _ => None,
        })
    }

    /// The string table binary event buffers in this chunk index into.
    pub fn string_table(&self) -> Option<&StringTable> {
        self.parts.iter().find_map(|p| match p {
            Part::StringTable(table) => Some(table),
            _ => None,
        })
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.parts.iter().filter_map(|p| match p {
            Part::Resource(resource) => Some(resource),
            _ => None,
        })
    }
}

#[derive(Debug)]
pub(crate) struct RawPart<'a> {
    pub part_type: u32,
    pub data: &'a [u8],
}

/// A framed chunk whose parts are still raw bytes.
#[derive(Debug)]
pub(crate) struct RawChunk<'a> {
    pub id: u32,
    pub chunk_type: u32,
    pub time_start: u32,
    pub time_end: u32,
    pub parts: Vec<RawPart<'a>>,
}

fn read_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Frame the chunk at the start of `data`. Returns `None` until the whole
/// chunk is available, otherwise the chunk and its total byte length.
pub(crate) fn frame_chunk(data: &[u8]) -> Result<Option<(RawChunk<'_>, usize)>> {
    if data.len() < CHUNK_HEADER_LEN {
        return Ok(None);
    }
    let id = read_le(data, 0);
    let chunk_type = read_le(data, 4);
    let length = read_le(data, 8) as usize;
    let time_start = read_le(data, 12);
    let time_end = read_le(data, 16);
    let part_count = read_le(data, 20) as usize;

    let header_len = part_count
        .checked_mul(PART_HEADER_LEN)
        .and_then(|n| n.checked_add(CHUNK_HEADER_LEN))
        .ok_or_else(|| TraceError::fatal(format!("chunk {id} declares {part_count} parts")))?;
    if length < header_len {
        return Err(TraceError::fatal(format!(
            "chunk {id} is {length} bytes but its header needs {header_len}"
        )));
    }
    if data.len() < length {
        return Ok(None);
    }

    let body = &data[header_len..length];
    let mut parts = Vec::with_capacity(part_count);
    for n in 0..part_count {
        let at = CHUNK_HEADER_LEN + n * PART_HEADER_LEN;
        let part_type = read_le(data, at);
        let offset = read_le(data, at + 4) as usize;
        let part_len = read_le(data, at + 8) as usize;
        let part = offset
            .checked_add(part_len)
            .and_then(|end| body.get(offset..end))
            .ok_or_else(|| {
                TraceError::fatal(format!(
                    "part {n} of chunk {id} ({offset}+{part_len}) overruns the {} byte body",
                    body.len()
                ))
            })?;
        parts.push(RawPart {
            part_type,
            data: part,
        });
    }

    Ok(Some((
        RawChunk {
            id,
            chunk_type,
            time_start,
            time_end,
            parts,
        },
        length,
    )))
}

/// Decode a part that needs no external resolution.
pub(crate) fn decode_part(part_type: PartType, data: &[u8]) -> Result<Part> {
    match part_type {
        PartType::FileHeader => FileHeader::parse(data).map(Part::FileHeader),
        PartType::StringTable => StringTable::parse(data).map(Part::StringTable),
        PartType::BinaryEvents => Ok(Part::BinaryEvents(data.to_vec())),
        PartType::LegacyEvents => Ok(Part::LegacyEvents(data.to_vec())),
        PartType::JsonEvents => serde_json::from_slice(data)
            .map(Part::JsonEvents)
            .map_err(|e| TraceError::fatal(format!("invalid JSON event part: {e}"))),
        PartType::BinaryResource | PartType::StringResource => Err(TraceError::fatal(
            "resource parts are resolved through a resource resolver",
        )),
    }
}
