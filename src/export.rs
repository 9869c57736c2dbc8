//! Re-encode a loaded database as a chunked binary container.
//!
//! Each zone is written as a `wtf.zone#create` followed by a `wtf.zone#set`
//! and the zone's events in time order. Scopes are closed with
//! `wtf.scope#leave` at their end times; arguments appended to a scope after
//! it opened are written back as `wtf.scope#appendData` records.

use std::collections::HashSet;

use serde_json::{json, Map, Value};

use crate::data::args::{ArgValue, ArgumentData};
use crate::data::event_type::{Builtin, EventType};
use crate::db::cursor::EventCursor;
use crate::db::Database;
use crate::error::{Result, TraceError};
use crate::wire::chunk::FileHeader;
use crate::wire::writer::ContainerWriter;

fn wire_time(time: u64) -> Result<u32> {
    u32::try_from(time)
        .map_err(|_| TraceError::Encode(format!("event time {time}us does not fit a 32-bit wire time")))
}

fn file_header(db: &Database) -> FileHeader {
    let mut header = FileHeader::new(db.timebase().unwrap_or(0.0));
    if let Some(first) = db.sources().first() {
        header.flags = first.flags.clone();
        if first.context_info.is_object() {
            header.context_info = first.context_info.clone();
        }
    }
    let mut metadata = Map::new();
    metadata.insert("units".to_string(), json!(db.units().as_str()));
    header.metadata = Value::Object(metadata);
    header
}

/// Encode every zone of `db`. The database must not have a batch open.
pub fn export_container(db: &Database) -> Result<Vec<u8>> {
    assert!(!db.is_batch_open(), "database exported while a batch is open");
    let mut writer = ContainerWriter::new(&file_header(db))?;

    for event_type in db.types().get_all() {
        if event_type.builtin.is_none() {
            writer.define(&event_type.signature(), event_type.class, event_type.flags)?;
        }
    }

    let create = Builtin::ZoneCreate.name();
    let set = Builtin::ZoneSet.name();
    for zone in db.zones() {
        let create_args: ArgumentData = [
            ("zoneId", ArgValue::Int(zone.id as i64)),
            ("name", ArgValue::String(zone.name.clone())),
            ("type", ArgValue::String(zone.zone_type.clone())),
            ("location", ArgValue::String(zone.location.clone())),
        ]
        .into_iter()
        .collect();
        writer.write_event(create, 0, Some(&create_args))?;
    }

    let mut written = 0;
    for zone in db.zones() {
        let store = zone.store();
        if store.is_empty() {
            continue;
        }
        let set_args: ArgumentData = [("zoneId", ArgValue::Int(zone.id as i64))].into_iter().collect();
        writer.write_event(set, wire_time(store.first_event_time())?, Some(&set_args))?;

        // (depth, end time) of every scope written but not yet left
        let mut open: Vec<(u32, u64)> = Vec::new();
        for index in 0..store.len() {
            let Some(event) = EventCursor::new(store, index) else {
                continue;
            };
            while let Some(&(depth, end)) = open.last() {
                if depth < event.depth() {
                    break;
                }
                writer.write_event(Builtin::ScopeLeave.name(), wire_time(end)?, None)?;
                open.pop();
            }
            write_event(&mut writer, &event)?;
            if let Some(end) = event.event().end_time {
                open.push((event.depth(), end));
            }
            written += 1;
        }
        while let Some((_, end)) = open.pop() {
            writer.write_event(Builtin::ScopeLeave.name(), wire_time(end)?, None)?;
        }
    }

    tracing::info!("Exported {} events from {} zones", written, db.zones().len());
    writer.finish()
}

fn write_event(writer: &mut ContainerWriter, event: &EventCursor<'_>) -> Result<()> {
    let event_type = event.event_type();
    let time = wire_time(event.time())?;
    writer.write_event(&event_type.name, time, event.args())?;

    let Some(args) = event.args() else {
        return Ok(());
    };
    for (name, value) in appended(event_type, args) {
        let data: ArgumentData = [
            ("name", ArgValue::String(name.to_string())),
            ("value", value.clone()),
        ]
        .into_iter()
        .collect();
        writer.write_event(Builtin::ScopeAppendData.name(), time, Some(&data))?;
    }
    Ok(())
}

/// Arguments that are not part of the type's signature.
fn appended<'a>(event_type: &EventType, args: &'a ArgumentData) -> Vec<(&'a str, &'a ArgValue)> {
    if !event_type.is_scope() {
        return Vec::new();
    }
    let declared: HashSet<&str> = event_type.args.iter().map(|v| v.name.as_str()).collect();
    args.iter().filter(|(name, _)| !declared.contains(name)).collect()
}
