//! JSON trace sources.
//!
//! A JSON trace is a list of records:
//!
//! ```json
//! [
//!   {"type": "wtf.json#header", "format_version": 2, "timebase": 0},
//!   {"type": "wtf.event#define", "event_id": 5, "class": "scope",
//!    "signature": "app#draw(uint32 frame)"},
//!   {"event": 5, "time": 1.5, "args": [3]},
//!   {"event": -1, "time": 2.25}
//! ]
//! ```
//!
//! Times are milliseconds. Events may be referenced by name or by the
//! `event_id` of their define; `-1` is always `wtf.scope#leave`. Builtin
//! events can be used without a define.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::data::args::{ArgValue, ArgumentData};
use crate::data::event_type::{Builtin, EventClass, EventFlags, EventType};
use crate::db::source::SourceHeader;
use crate::db::Database;
use crate::dispatch::EventDispatcher;
use crate::error::{Result, TraceError};
use crate::sources::finish_source;
use crate::wire::FLAG_HAS_HIGH_RESOLUTION_TIMES;

/// The only JSON format version understood.
pub const JSON_FORMAT_VERSION: u64 = 2;

const HEADER_TYPE: &str = "wtf.json#header";
const DEFINE_TYPE: &str = "wtf.event#define";

/// Parse JSON trace text, repairing a missing closing `]` or a trailing
/// comma left by a writer that was cut off.
pub fn parse_json_text(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    let repaired;
    let source = if trimmed.starts_with('{') {
        trimmed
    } else if let Some(body) = trimmed.strip_suffix(',') {
        repaired = format!("{body}]");
        &repaired
    } else if !trimmed.ends_with(']') {
        repaired = format!("{trimmed}]");
        &repaired
    } else {
        trimmed
    };
    serde_json::from_str(source)
        .map_err(|e| TraceError::source("Malformed JSON", format!("The trace could not be parsed: {e}")))
}

/// The record list: a top-level array, or the `events` array of an object.
pub fn records(value: &Value) -> Result<&[Value]> {
    match value {
        Value::Array(records) => Ok(records),
        Value::Object(map) => match map.get("events") {
            Some(Value::Array(records)) => Ok(records),
            _ => Err(TraceError::source(
                "Malformed JSON",
                "Trace object has no 'events' array.",
            )),
        },
        _ => Err(TraceError::source(
            "Malformed JSON",
            "Trace must be an array of records.",
        )),
    }
}

/// The header record preceding the first event, if any.
pub fn read_header(records: &[Value]) -> Result<Option<SourceHeader>> {
    for record in records {
        if record.get("event").is_some() {
            break;
        }
        if record.get("type").and_then(Value::as_str) != Some(HEADER_TYPE) {
            continue;
        }
        let version = record.get("format_version").and_then(Value::as_u64).unwrap_or(1);
        if version != JSON_FORMAT_VERSION {
            return Err(TraceError::source(
                "File version not supported or too old",
                format!("JSON format version {version} is not supported."),
            ));
        }
        let high_resolution = record
            .get("high_resolution_times")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let flags = if high_resolution {
            crate::wire::flag_names(FLAG_HAS_HIGH_RESOLUTION_TIMES)
        } else {
            Vec::new()
        };
        let metadata = match record.get("metadata") {
            Some(metadata @ Value::Object(_)) => metadata.clone(),
            _ => Value::Object(Map::new()),
        };
        return Ok(Some(SourceHeader {
            timebase: record.get("timebase").and_then(Value::as_f64).unwrap_or(0.0),
            flags,
            context_info: Value::Object(Map::new()),
            metadata,
        }));
    }
    Ok(None)
}

fn undefined(reference: &Value) -> TraceError {
    TraceError::source(
        "Undefined event type",
        format!("The file referenced event {reference} without defining it."),
    )
}

/// Map an `args` value onto a type's arguments. Arrays are positional and
/// must match the argument count; objects are matched by name.
fn convert_args(event_type: &EventType, value: &Value) -> Option<ArgumentData> {
    match value {
        Value::Array(items) if !items.is_empty() && items.len() == event_type.args.len() => Some(
            event_type
                .args
                .iter()
                .zip(items)
                .map(|(var, item)| (var.name.as_str(), ArgValue::from_json(item, var.arg_type)))
                .collect(),
        ),
        Value::Object(map) if !map.is_empty() => Some(
            event_type
                .args
                .iter()
                .filter_map(|var| {
                    map.get(&var.name)
                        .map(|item| (var.name.as_str(), ArgValue::from_json(item, var.arg_type)))
                })
                .collect(),
        ),
        _ => None,
    }
}

/// Dispatches JSON records. Holds the `event_id` aliases of one record list.
#[derive(Default)]
pub struct JsonEventReader {
    aliases: HashMap<i64, Arc<EventType>>,
}

impl JsonEventReader {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve(&mut self, reference: &Value, dispatcher: &mut EventDispatcher<'_>) -> Result<Arc<EventType>> {
        if let Some(id) = reference.as_i64() {
            return self.aliases.get(&id).cloned().ok_or_else(|| undefined(reference));
        }
        let name = reference.as_str().ok_or_else(|| undefined(reference))?;
        let types = dispatcher.types_mut();
        if let Some(event_type) = types.get_by_name(name) {
            return Ok(event_type.clone());
        }
        match Builtin::from_name(name) {
            Some(builtin) => types.define_builtin(builtin),
            None => Err(undefined(reference)),
        }
    }

    fn define(&mut self, record: &Value, dispatcher: &mut EventDispatcher<'_>) -> Result<()> {
        let signature = record
            .get("signature")
            .and_then(Value::as_str)
            .ok_or_else(|| TraceError::source("Malformed JSON", "Event define has no signature."))?;
        let class = match record.get("class").and_then(Value::as_str) {
            Some("instance") => EventClass::Instance,
            _ => EventClass::Scope,
        };
        let flags = EventFlags(record.get("flags").and_then(Value::as_u64).unwrap_or(0) as u32);
        let event_type = dispatcher.types_mut().define_type(signature, class, flags)?;
        if let Some(id) = record.get("event_id").and_then(Value::as_i64) {
            self.aliases.insert(id, event_type);
        }
        Ok(())
    }

    /// Dispatch every event record of `value`. Must run inside a batch.
    pub fn read_events(&mut self, value: &Value, dispatcher: &mut EventDispatcher<'_>) -> Result<()> {
        let records = records(value)?;
        if !self.aliases.contains_key(&-1) {
            let leave = dispatcher.types_mut().define_builtin(Builtin::ScopeLeave)?;
            self.aliases.insert(-1, leave);
        }

        for record in records {
            if let Some(reference) = record.get("event") {
                let event_type = self.resolve(reference, dispatcher)?;
                let time_ms = record.get("time").and_then(Value::as_f64).unwrap_or(0.0);
                let args = record.get("args").and_then(|a| convert_args(&event_type, a));
                dispatcher.dispatch(&event_type, (time_ms * 1000.0) as i64, args)?;
                continue;
            }
            match record.get("type").and_then(Value::as_str) {
                Some(DEFINE_TYPE) => self.define(record, dispatcher)?,
                Some(HEADER_TYPE) => {}
                other => tracing::debug!("Ignoring JSON record of type {:?}", other),
            }
        }
        Ok(())
    }
}

/// Load a JSON trace as a new source. Returns the source id.
pub fn load_json(db: &mut Database, name: &str, text: &str) -> Result<usize> {
    let source = db.add_source(name);
    let result = read_json(db, source, text);
    finish_source(db, source, result)
}

fn read_json(db: &mut Database, source: usize, text: &str) -> Result<()> {
    let value = parse_json_text(text)?;
    let header = read_header(records(&value)?)?.unwrap_or_else(|| SourceHeader {
        flags: crate::wire::flag_names(FLAG_HAS_HIGH_RESOLUTION_TIMES),
        context_info: Value::Object(Map::new()),
        metadata: Value::Object(Map::new()),
        ..SourceHeader::default()
    });
    let mut dispatcher = EventDispatcher::new(db, source)?;
    dispatcher.initialize(header)?;
    let mut reader = JsonEventReader::new();
    let count = dispatcher.in_batch(|d| {
        reader.read_events(&value, d)?;
        Ok(d.dispatched())
    })?;
    tracing::info!("Read {} JSON events", count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SourceStatus;

    #[test]
    fn test_repairs() {
        assert_eq!(parse_json_text("  ").unwrap(), Value::Array(vec![]));
        assert_eq!(parse_json_text("[1,2,\n").unwrap(), serde_json::json!([1, 2]));
        assert_eq!(parse_json_text("[1,2\n\n").unwrap(), serde_json::json!([1, 2]));
        assert_eq!(parse_json_text("[1]").unwrap(), serde_json::json!([1]));
        let err = parse_json_text("{oops").unwrap_err();
        assert!(matches!(err, TraceError::Source { .. }));
    }

    #[test]
    fn test_load_with_aliases() {
        let text = r#"[
            {"type": "wtf.json#header", "format_version": 2, "timebase": 100,
             "metadata": {"units": "microseconds"}},
            {"type": "wtf.event#define", "event_id": 7, "class": "scope",
             "signature": "app#draw(uint32 frame, ascii label)"},
            {"event": 7, "time": 1.5, "args": [3, "first"]},
            {"event": "wtf.trace#timeStamp", "time": 2, "args": ["ping", null]},
            {"event": -1, "time": 4.0},
            {"event": "app#draw", "time": 5, "args": {"frame": 4}},
            {"event": -1, "time": 6},
        "#;
        let mut db = Database::default();
        let source = load_json(&mut db, "inline", text).unwrap();
        assert_eq!(db.sources()[source].status, SourceStatus::Loaded);
        assert_eq!(db.sources()[source].timebase, 100.0);

        let store = db.zones()[0].store();
        let names: Vec<&str> = store.events().iter().map(|e| e.event_type.name.as_str()).collect();
        assert_eq!(names, vec!["app#draw", "ping", "app#draw"]);
        let first = &store.events()[0];
        assert_eq!((first.time, first.end_time), (1_500, Some(4_000)));
        assert_eq!(
            first.args.as_ref().and_then(|a| a.get("label")),
            Some(&ArgValue::String("first".into()))
        );
        assert_eq!(store.events()[2].args.as_ref().map(|a| a.len()), Some(1));
    }

    #[test]
    fn test_failures_mark_source() {
        let mut db = Database::default();
        let err = load_json(&mut db, "bad", r#"[{"event": "nope", "time": 1}]"#).unwrap_err();
        assert!(err.to_string().contains("Undefined event type"));
        assert!(db.sources()[0].is_failed());

        let header = r#"[{"type": "wtf.json#header", "format_version": 1}]"#;
        assert!(load_json(&mut db, "old", header).is_err());
        assert!(db.sources()[1].is_failed());
        assert!(!db.is_batch_open());
    }

    #[test]
    fn test_events_object() {
        let mut db = Database::default();
        let text = r#"{"events": [{"event": "wtf.trace#timeStamp", "time": 1, "args": ["x", 1]}]}"#;
        load_json(&mut db, "obj", text).unwrap();
        assert_eq!(db.zones()[0].store().len(), 1);
        assert!(db.get_event_type("x").is_some());
    }
}
