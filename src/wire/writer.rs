//! Container encoders.
//!
//! Both writers assign wire ids on first use and emit the matching
//! `wtf.event#define` record ahead of the first event of each type. Builtin
//! names are defined with their default signatures automatically.

use std::collections::HashMap;

use crate::codec::encoder::{encode_legacy, encode_packed};
use crate::codec::StringTableBuilder;
use crate::data::args::{ArgValue, ArgumentData};
use crate::data::event_type::{Builtin, EventClass, EventFlags};
use crate::data::variable::{format_args_string, parse_signature, Variable};
use crate::error::{Result, TraceError};
use crate::wire::chunk::{ChunkType, FileHeader, PartType};
use crate::wire::header::{ContainerHeader, ContainerKind};
use crate::wire::legacy::write_legacy_header;
use crate::wire::{
    CHUNK_HEADER_LEN, DEFINE_WIRE_ID, FORMAT_VERSION, LEGACY_FORMAT_VERSION, PART_HEADER_LEN,
    TOOL_VERSION,
};

/// Default number of events per event-data chunk.
pub const DEFAULT_CHUNK_EVENTS: usize = 16 * 1024;

struct WireType {
    wire_id: u16,
    args: Vec<Variable>,
}

/// Wire ids handed out by one writer.
struct WireTypes {
    by_name: HashMap<String, WireType>,
    define_args: Vec<Variable>,
    next_wire_id: u16,
}

impl WireTypes {
    fn new() -> Result<Self> {
        let (signature, _, _) = Builtin::EventDefine.definition();
        Ok(Self {
            by_name: HashMap::new(),
            define_args: parse_signature(signature)?.args,
            next_wire_id: DEFINE_WIRE_ID + 1,
        })
    }

    /// Assign a wire id to `signature`. Returns the id and, for a new type,
    /// the arguments of its define record.
    fn assign(
        &mut self,
        signature: &str,
        class: EventClass,
        flags: EventFlags,
    ) -> Result<(u16, Option<ArgumentData>)> {
        let parsed = parse_signature(signature)?;
        if let Some(existing) = self.by_name.get(&parsed.name) {
            if existing.args != parsed.args {
                return Err(TraceError::Encode(format!(
                    "'{}' already written with arguments ({})",
                    parsed.name,
                    format_args_string(&existing.args)
                )));
            }
            return Ok((existing.wire_id, None));
        }
        let wire_id = self.next_wire_id;
        self.next_wire_id = self
            .next_wire_id
            .checked_add(1)
            .ok_or_else(|| TraceError::Encode("ran out of wire ids".to_string()))?;

        let define: ArgumentData = [
            ("wireId", ArgValue::Int(wire_id as i64)),
            ("eventClass", ArgValue::Int(class.to_wire() as i64)),
            ("flags", ArgValue::Int(flags.bits() as i64)),
            ("name", ArgValue::String(parsed.name.clone())),
            ("args", ArgValue::String(parsed.args_string())),
        ]
        .into_iter()
        .collect();
        self.by_name.insert(
            parsed.name,
            WireType {
                wire_id,
                args: parsed.args,
            },
        );
        Ok((wire_id, Some(define)))
    }

    /// Wire id and layout for an event name, defining builtins on demand.
    fn lookup(&mut self, name: &str) -> Result<(u16, Vec<Variable>, Option<ArgumentData>)> {
        if let Some(existing) = self.by_name.get(name) {
            return Ok((existing.wire_id, existing.args.clone(), None));
        }
        let builtin = Builtin::from_name(name)
            .ok_or_else(|| TraceError::Encode(format!("event '{name}' written before it was defined")))?;
        let (signature, class, flags) = builtin.definition();
        let (wire_id, define) = self.assign(signature, class, flags)?;
        let args = self
            .by_name
            .get(name)
            .map(|t| t.args.clone())
            .unwrap_or_default();
        Ok((wire_id, args, define))
    }
}

/// Writes a modern chunked container.
pub struct ContainerWriter {
    out: Vec<u8>,
    types: WireTypes,
    next_chunk_id: u32,
    strings: StringTableBuilder,
    events: Vec<u8>,
    event_count: usize,
    chunk_events: usize,
    time_start: u32,
    time_end: u32,
}

impl ContainerWriter {
    /// Start a container with its header and file header chunk.
    pub fn new(header: &FileHeader) -> Result<Self> {
        let container = ContainerHeader {
            kind: ContainerKind::Chunked,
            tool_version: TOOL_VERSION,
            format_version: FORMAT_VERSION,
        };
        let mut writer = Self {
            out: container.to_bytes().to_vec(),
            types: WireTypes::new()?,
            next_chunk_id: 0,
            strings: StringTableBuilder::new(),
            events: Vec::new(),
            event_count: 0,
            chunk_events: DEFAULT_CHUNK_EVENTS,
            time_start: u32::MAX,
            time_end: 0,
        };
        let json = serde_json::to_vec(&header.to_json())
            .map_err(|e| TraceError::Encode(format!("file header: {e}")))?;
        writer.write_chunk(
            ChunkType::FileHeader.to_wire(),
            0,
            0,
            &[(PartType::FileHeader.to_wire(), &json)],
        );
        Ok(writer)
    }

    /// Events per event-data chunk before a new chunk is started.
    pub fn set_chunk_events(&mut self, count: usize) {
        self.chunk_events = count.max(1);
    }

    /// Define a type and return its wire id. Defining the same signature
    /// again returns the existing id.
    pub fn define(&mut self, signature: &str, class: EventClass, flags: EventFlags) -> Result<u16> {
        let (wire_id, define) = self.types.assign(signature, class, flags)?;
        if let Some(define) = define {
            let define_args = self.types.define_args.clone();
            self.push_record(DEFINE_WIRE_ID, self.time_end, &define_args, Some(&define))?;
        }
        Ok(wire_id)
    }

    /// Append an event of a defined or builtin type. `time` is microseconds
    /// from the timebase.
    pub fn write_event(&mut self, name: &str, time: u32, args: Option<&ArgumentData>) -> Result<()> {
        let (wire_id, vars, define) = self.types.lookup(name)?;
        if let Some(define) = define {
            let define_args = self.types.define_args.clone();
            self.push_record(DEFINE_WIRE_ID, time, &define_args, Some(&define))?;
        }
        self.push_record(wire_id, time, &vars, args)
    }

    fn push_record(
        &mut self,
        wire_id: u16,
        time: u32,
        vars: &[Variable],
        args: Option<&ArgumentData>,
    ) -> Result<()> {
        if self.event_count >= self.chunk_events {
            self.flush();
        }
        let mark = self.events.len();
        self.events.extend_from_slice(&(wire_id as u32).to_le_bytes());
        self.events.extend_from_slice(&time.to_le_bytes());
        if let Err(err) = encode_packed(vars, args, &mut self.strings, &mut self.events) {
            self.events.truncate(mark);
            return Err(err);
        }
        self.event_count += 1;
        self.time_start = self.time_start.min(time);
        self.time_end = self.time_end.max(time);
        Ok(())
    }

    /// Close the current event-data chunk, if it holds any events.
    pub fn flush(&mut self) {
        if self.event_count == 0 {
            return;
        }
        let strings = self.strings.to_bytes();
        let events = std::mem::take(&mut self.events);
        self.write_chunk(
            ChunkType::EventData.to_wire(),
            self.time_start,
            self.time_end,
            &[
                (PartType::StringTable.to_wire(), &strings),
                (PartType::BinaryEvents.to_wire(), &events),
            ],
        );
        self.strings.clear();
        self.event_count = 0;
        self.time_start = u32::MAX;
    }

    /// Append a chunk built from raw parts, after any pending events.
    pub fn write_raw_chunk(&mut self, chunk_type: u32, parts: &[(u32, &[u8])]) {
        self.flush();
        self.write_chunk(chunk_type, 0, 0, parts);
    }

    fn write_chunk(&mut self, chunk_type: u32, time_start: u32, time_end: u32, parts: &[(u32, &[u8])]) {
        let header_len = CHUNK_HEADER_LEN + parts.len() * PART_HEADER_LEN;
        let body_len: usize = parts.iter().map(|(_, data)| data.len()).sum();
        let words = [
            self.next_chunk_id,
            chunk_type,
            (header_len + body_len) as u32,
            time_start,
            time_end,
            parts.len() as u32,
        ];
        for word in words {
            self.out.extend_from_slice(&word.to_le_bytes());
        }
        let mut offset = 0u32;
        for (part_type, data) in parts {
            for word in [*part_type, offset, data.len() as u32] {
                self.out.extend_from_slice(&word.to_le_bytes());
            }
            offset += data.len() as u32;
        }
        for (_, data) in parts {
            self.out.extend_from_slice(data);
        }
        self.next_chunk_id += 1;
    }

    pub fn finish(mut self) -> Result<Vec<u8>> {
        self.flush();
        Ok(self.out)
    }
}

/// Writes a legacy big-endian container.
pub struct LegacyContainerWriter {
    out: Vec<u8>,
    types: WireTypes,
}

impl LegacyContainerWriter {
    pub fn new(header: &FileHeader) -> Result<Self> {
        let container = ContainerHeader {
            kind: ContainerKind::Legacy,
            tool_version: TOOL_VERSION,
            format_version: LEGACY_FORMAT_VERSION,
        };
        let mut out = container.to_bytes().to_vec();
        write_legacy_header(header, &mut out);
        Ok(Self {
            out,
            types: WireTypes::new()?,
        })
    }

    pub fn define(&mut self, signature: &str, class: EventClass, flags: EventFlags) -> Result<u16> {
        let (wire_id, define) = self.types.assign(signature, class, flags)?;
        if let Some(define) = define {
            let define_args = self.types.define_args.clone();
            self.push_record(DEFINE_WIRE_ID, 0, &define_args, Some(&define))?;
        }
        Ok(wire_id)
    }

    pub fn write_event(&mut self, name: &str, time: u32, args: Option<&ArgumentData>) -> Result<()> {
        let (wire_id, vars, define) = self.types.lookup(name)?;
        if let Some(define) = define {
            let define_args = self.types.define_args.clone();
            self.push_record(DEFINE_WIRE_ID, time, &define_args, Some(&define))?;
        }
        self.push_record(wire_id, time, &vars, args)
    }

    fn push_record(
        &mut self,
        wire_id: u16,
        time: u32,
        vars: &[Variable],
        args: Option<&ArgumentData>,
    ) -> Result<()> {
        let mut record = Vec::new();
        record.extend_from_slice(&wire_id.to_be_bytes());
        record.extend_from_slice(&time.to_be_bytes());
        encode_legacy(vars, args, &mut record)?;
        self.out.extend_from_slice(&record);
        Ok(())
    }

    pub fn finish(self) -> Vec<u8> {
        self.out
    }
}
