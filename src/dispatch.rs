//! Routes decoded events into a [`Database`].
//!
//! One dispatcher serves one source. It owns the source's wire tables (event
//! types and zones by wire id, time range renames) and turns each record into
//! either a builtin side effect or an insertion into the current zone.

use std::collections::HashMap;
use std::sync::Arc;

use crate::codec::{LegacyReader, PackedInput, StringTable};
use crate::data::args::{ArgValue, ArgumentData};
use crate::data::event_type::{Builtin, EventClass, EventFlags, EventType};
use crate::data::variable::parse_signature_arguments;
use crate::db::source::SourceHeader;
use crate::db::Database;
use crate::db::type_table::EventTypeTable;
use crate::error::{Result, TraceError};
use crate::sources::json::JsonEventReader;
use crate::wire::{Chunk, ChunkHandler, ChunkType, Part, DEFINE_WIRE_ID};

pub struct EventDispatcher<'db> {
    db: &'db mut Database,
    source: usize,
    time_offset: i64,
    initialized: bool,
    wire_types: HashMap<u16, Arc<EventType>>,
    wire_zones: HashMap<u32, usize>,
    current_zone: Option<usize>,
    time_range_renames: HashMap<i64, i64>,
    dispatched: u64,
}

fn arg_str<'a>(args: Option<&'a ArgumentData>, name: &str) -> Option<&'a str> {
    args.and_then(|a| a.get(name)).and_then(ArgValue::as_str)
}

fn arg_int(args: Option<&ArgumentData>, name: &str) -> Option<i64> {
    args.and_then(|a| a.get(name)).and_then(ArgValue::as_i64)
}

impl<'db> EventDispatcher<'db> {
    /// Dispatcher for `source`, which must have been added to `db`.
    pub fn new(db: &'db mut Database, source: usize) -> Result<Self> {
        let define = db.types_mut().define_builtin(Builtin::EventDefine)?;
        let mut wire_types = HashMap::new();
        wire_types.insert(DEFINE_WIRE_ID, define);
        Ok(Self {
            db,
            source,
            time_offset: 0,
            initialized: false,
            wire_types,
            wire_zones: HashMap::new(),
            current_zone: None,
            time_range_renames: HashMap::new(),
            dispatched: 0,
        })
    }

    pub fn source(&self) -> usize {
        self.source
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Events handled so far, builtins included.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    pub fn database(&self) -> &Database {
        self.db
    }

    pub fn types_mut(&mut self) -> &mut EventTypeTable {
        self.db.types_mut()
    }

    /// Register the source header and fix this source's time offset.
    pub fn initialize(&mut self, header: SourceHeader) -> Result<()> {
        if self.initialized {
            tracing::warn!("Source {} sent a second file header, ignoring", self.source);
            return Ok(());
        }
        self.time_offset = self.db.initialize_source(self.source, header)?;
        self.initialized = true;
        Ok(())
    }

    /// Run `f` inside an insertion batch. When `f` fails the batch is
    /// aborted, leaving the database as it was after the last completed batch.
    pub fn in_batch<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if !self.initialized {
            return Err(TraceError::fatal("event data received before the file header"));
        }
        self.db.begin_batch();
        let result = f(self);
        if result.is_ok() {
            self.db.end_batch();
        } else {
            self.db.abort_batch();
            self.current_zone = self.current_zone.filter(|&zone| zone < self.db.zones().len());
        }
        result
    }

    fn zone(&mut self) -> usize {
        match self.current_zone {
            Some(zone) => zone,
            None => self.db.default_zone(),
        }
    }

    /// Source-relative microseconds to database microseconds, clamped at 0.
    fn adjust_time(&self, time: i64) -> u64 {
        time.saturating_add(self.time_offset).max(0) as u64
    }

    /// Event type registered for a wire id.
    pub fn wire_type(&self, wire_id: u16) -> Result<Arc<EventType>> {
        self.wire_types
            .get(&wire_id)
            .cloned()
            .ok_or(TraceError::UndefinedEventType { wire_id })
    }

    /// Handle one event. `time` is in source-relative microseconds.
    pub fn dispatch(
        &mut self,
        event_type: &Arc<EventType>,
        time: i64,
        args: Option<ArgumentData>,
    ) -> Result<()> {
        self.dispatched += 1;
        let time = self.adjust_time(time);
        let args_ref = args.as_ref();
        match event_type.builtin {
            Some(Builtin::EventDefine) => {
                self.define_from_args(args_ref)?;
            }
            Some(Builtin::ZoneCreate) => {
                let zone = self.db.create_or_get_zone(
                    arg_str(args_ref, "name").unwrap_or_default(),
                    arg_str(args_ref, "type").unwrap_or_default(),
                    arg_str(args_ref, "location").unwrap_or_default(),
                );
                let wire_zone = arg_int(args_ref, "zoneId").unwrap_or_default() as u32;
                self.wire_zones.insert(wire_zone, zone);
            }
            Some(Builtin::ZoneDelete) => {
                tracing::debug!(
                    "Zone {:?} deleted at {}",
                    arg_int(args_ref, "zoneId"),
                    time
                );
            }
            Some(Builtin::ZoneSet) => {
                let wire_zone = arg_int(args_ref, "zoneId").unwrap_or_default() as u32;
                match self.wire_zones.get(&wire_zone) {
                    Some(&zone) => self.current_zone = Some(zone),
                    None => {
                        tracing::warn!("Zone set to unknown zone {}, using the default", wire_zone);
                        self.current_zone = None;
                    }
                }
            }
            Some(Builtin::ScopeEnter) => {
                let name = arg_str(args_ref, "name").unwrap_or("unnamed.scope").to_string();
                let named = self.db.types_mut().get_or_define_named(&name, EventClass::Scope)?;
                let zone = self.zone();
                self.db.insert_event(zone, named, time, None);
            }
            Some(Builtin::TraceTimeStamp) => {
                let name = arg_str(args_ref, "name").unwrap_or("unnamed.instance").to_string();
                let named = self.db.types_mut().get_or_define_named(&name, EventClass::Instance)?;
                let zone = self.zone();
                self.db.insert_event(zone, named, time, None);
            }
            Some(Builtin::ScopeLeave) => {
                let zone = self.zone();
                self.db.leave_scope(zone, time);
            }
            Some(Builtin::ScopeAppendData) => {
                if let Some(name) = arg_str(args_ref, "name") {
                    let mut data = ArgumentData::new();
                    let value = args_ref
                        .and_then(|a| a.get("value"))
                        .cloned()
                        .unwrap_or(ArgValue::Null);
                    data.set(name, value);
                    let zone = self.zone();
                    self.db.append_scope_data(zone, &data);
                }
            }
            Some(Builtin::TimeRangeBegin | Builtin::TimeRangeEnd) => {
                let mut args = args.unwrap_or_default();
                let wire_range = args.get("id").and_then(ArgValue::as_i64).unwrap_or_default();
                let id = match self.time_range_renames.get(&wire_range) {
                    Some(&id) => id,
                    None => {
                        let id = self.db.allocate_time_range_id();
                        self.time_range_renames.insert(wire_range, id);
                        id
                    }
                };
                args.set("id", ArgValue::Int(id));
                let zone = self.zone();
                self.db.insert_event(zone, event_type.clone(), time, Some(args));
            }
            _ if event_type.flags.contains(EventFlags::APPEND_SCOPE_DATA) => {
                if let Some(data) = args_ref {
                    let zone = self.zone();
                    self.db.append_scope_data(zone, data);
                }
            }
            _ => {
                let zone = self.zone();
                self.db.insert_event(zone, event_type.clone(), time, args);
            }
        }
        Ok(())
    }

    /// Register the type carried by a `wtf.event#define` record.
    fn define_from_args(&mut self, args: Option<&ArgumentData>) -> Result<()> {
        let (Some(wire_id), Some(name)) = (arg_int(args, "wireId"), arg_str(args, "name")) else {
            return Err(TraceError::fatal("event define is missing its wire id or name"));
        };
        let wire_id = wire_id as u16;
        let class = EventClass::from_wire(arg_int(args, "eventClass").unwrap_or_default() as u32);
        let flags = EventFlags(arg_int(args, "flags").unwrap_or_default() as u32);
        let vars = parse_signature_arguments(arg_str(args, "args").unwrap_or_default())
            .map_err(|e| TraceError::fatal(format!("define of '{name}': {e}")))?;
        let event_type = self.db.types_mut().define(name, class, flags, vars)?;
        if let Some(previous) = self.wire_types.insert(wire_id, event_type) {
            if previous.name != name {
                tracing::debug!("Wire id {} rebound from '{}' to '{}'", wire_id, previous.name, name);
            }
        }
        Ok(())
    }

    /// Dispatch every record of a modern binary event buffer.
    pub fn dispatch_binary(&mut self, data: &[u8], strings: &StringTable) -> Result<()> {
        let input = PackedInput::new(data, strings);
        let words = input.word_len();
        let mut offset = 0;
        while offset + 2 <= words {
            let wire_id = (input.word(offset)? & 0xFFFF) as u16;
            let time = input.word(offset + 1)?;
            let event_type = self.wire_type(wire_id)?;
            let (args, next) = event_type.decoder().decode_packed(&input, offset + 2)?;
            offset = next;
            self.dispatch(&event_type, time as i64, args)?;
        }
        if offset != words {
            tracing::warn!("Ignoring {} trailing words in event buffer", words - offset);
        }
        Ok(())
    }

    /// Dispatch every record of a legacy sequential event buffer.
    pub fn dispatch_legacy(&mut self, data: &[u8]) -> Result<()> {
        let mut reader = LegacyReader::new(data);
        while !reader.is_empty() {
            let wire_id = reader.read_u16()?;
            let time = reader.read_u32()?;
            let event_type = self.wire_type(wire_id)?;
            let args = event_type.decoder().decode_legacy(&mut reader)?;
            self.dispatch(&event_type, time as i64, args)?;
        }
        Ok(())
    }

    fn dispatch_event_parts(&mut self, chunk: &Chunk) -> Result<()> {
        let empty = StringTable::new();
        let strings = chunk.string_table().unwrap_or(&empty);
        for part in &chunk.parts {
            match part {
                Part::BinaryEvents(data) => self.dispatch_binary(data, strings)?,
                Part::LegacyEvents(data) => self.dispatch_legacy(data)?,
                Part::JsonEvents(value) => JsonEventReader::new().read_events(value, self)?,
                _ => {}
            }
        }
        Ok(())
    }
}

impl ChunkHandler for EventDispatcher<'_> {
    fn handle_chunk(&mut self, chunk: Chunk) -> Result<()> {
        match chunk.chunk_type {
            ChunkType::FileHeader => match chunk.file_header() {
                Some(header) => self.initialize(header.to_source_header())?,
                None => tracing::warn!("File header chunk {} has no header part", chunk.id),
            },
            ChunkType::EventData => {
                let before = self.dispatched;
                self.in_batch(|this| this.dispatch_event_parts(&chunk))?;
                tracing::debug!(
                    "Chunk {} dispatched {} events",
                    chunk.id,
                    self.dispatched - before
                );
            }
        }
        for resource in chunk.resources() {
            self.db.add_resource(resource.clone());
        }
        Ok(())
    }

    fn handle_end(&mut self) -> Result<()> {
        self.db.source_loaded(self.source);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::wire::{ContainerWriter, FileHeader, WireStreamDecoder};

    fn load(bytes: &[u8]) -> Result<Database> {
        let mut db = Database::default();
        let source = db.add_source("test");
        let mut dispatcher = EventDispatcher::new(&mut db, source)?;
        let mut decoder = WireStreamDecoder::new(&Config::default());
        decoder.feed(bytes, &mut dispatcher)?;
        decoder.finish(&mut dispatcher)?;
        Ok(db)
    }

    fn args(pairs: &[(&str, ArgValue)]) -> ArgumentData {
        pairs.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    #[test]
    fn test_zones_and_generic_scopes() {
        let mut writer = ContainerWriter::new(&FileHeader::new(0.0)).unwrap();
        let create = |id: i64, name: &str| {
            args(&[
                ("zoneId", ArgValue::Int(id)),
                ("name", ArgValue::String(name.into())),
                ("type", ArgValue::String("script".into())),
                ("location", ArgValue::String(String::new())),
            ])
        };
        writer.write_event("wtf.zone#create", 0, Some(&create(1, "main"))).unwrap();
        writer.write_event("wtf.zone#create", 0, Some(&create(2, "worker"))).unwrap();
        writer
            .write_event("wtf.zone#set", 0, Some(&args(&[("zoneId", ArgValue::Int(2))])))
            .unwrap();
        let name = |n: &str| args(&[("name", ArgValue::String(n.into()))]);
        writer.write_event("wtf.scope#enter", 10, Some(&name("work"))).unwrap();
        writer.write_event("wtf.trace#timeStamp", 12, Some(&name("tick"))).unwrap();
        writer
            .write_event(
                "wtf.scope#appendData",
                13,
                Some(&args(&[
                    ("name", ArgValue::String("size".into())),
                    ("value", ArgValue::Int(4)),
                ])),
            )
            .unwrap();
        writer.write_event("wtf.scope#leave", 20, None).unwrap();
        let db = load(&writer.finish().unwrap()).unwrap();

        assert_eq!(db.zones().len(), 2);
        assert!(db.zones()[0].store().is_empty());
        let worker = db.find_zone("worker").unwrap();
        let events = worker.store().events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type.name, "work");
        assert_eq!(events[0].end_time, Some(20));
        assert_eq!(
            events[0].args.as_ref().and_then(|a| a.get("size")),
            Some(&ArgValue::Int(4))
        );
        assert_eq!(events[1].event_type.name, "tick");
        assert_eq!(events[1].depth, 1);
        assert!(db.sources()[0].status == crate::db::SourceStatus::Loaded);
    }

    #[test]
    fn test_undefined_wire_id() {
        let mut writer = ContainerWriter::new(&FileHeader::new(0.0)).unwrap();
        // wire id 9 was never defined
        let mut events = Vec::new();
        events.extend_from_slice(&9u32.to_le_bytes());
        events.extend_from_slice(&0u32.to_le_bytes());
        writer.write_raw_chunk(0x2, &[(0x20002, &events)]);
        let err = load(&writer.finish().unwrap()).unwrap_err();
        assert!(matches!(err, TraceError::UndefinedEventType { wire_id: 9 }));
    }

    #[test]
    fn test_conflicting_redefinition() {
        let mut db = Database::default();
        let source = db.add_source("a");
        let mut dispatcher = EventDispatcher::new(&mut db, source).unwrap();
        dispatcher.initialize(SourceHeader::default()).unwrap();
        let define = dispatcher.wire_type(DEFINE_WIRE_ID).unwrap();
        let def = |args_string: &str| {
            Some(args(&[
                ("wireId", ArgValue::Int(5)),
                ("eventClass", ArgValue::Int(0)),
                ("flags", ArgValue::Int(0)),
                ("name", ArgValue::String("thing".into())),
                ("args", ArgValue::String(args_string.into())),
            ]))
        };
        let result = dispatcher.in_batch(|d| {
            d.dispatch(&define, 0, def("uint8 a"))?;
            d.dispatch(&define, 0, def("uint8 a"))?;
            d.dispatch(&define, 0, def("uint32 a"))
        });
        assert!(result.unwrap_err().is_fatal());
        assert!(!db.is_batch_open());
    }
}
