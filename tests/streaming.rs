//! Incremental decoding, deferred resources and multi-source loading.

mod common;

use std::sync::mpsc;

use tracedb::data::{ArgValue, EventClass, EventFlags};
use tracedb::db::{Resource, SourceStatus};
use tracedb::wire::{FileHeader, PartType, Resolution, FORMAT_VERSION};
use tracedb::{
    load_bytes, load_json, Config, ContainerWriter, Database, EventDispatcher, LegacyContainerWriter,
    TraceError, WireStreamDecoder,
};

use common::{args, container, define_scope, load, text};

#[test]
fn test_deferred_resource_keeps_chunk_order() {
    let bytes = container(|w| {
        w.write_raw_chunk(0x2, &[(0x30000, b"\0"), (0x40000, b"image bytes")]);
        define_scope(w, "late()");
        w.write_event("late", 7, None).unwrap();
        w.write_event("wtf.scope#leave", 9, None).unwrap();
    });

    let (tx, rx) = mpsc::channel();
    let mut rx = Some(rx);
    let resolver = move |part: PartType, _: &[u8]| -> tracedb::Result<Resolution> {
        assert_eq!(part, PartType::BinaryResource);
        rx.take()
            .map(Resolution::Deferred)
            .ok_or_else(|| TraceError::FatalDecode("second resource".to_string()))
    };

    let mut db = Database::default();
    let source = db.add_source("deferred");
    {
        let mut dispatcher = EventDispatcher::new(&mut db, source).unwrap();
        let mut decoder = WireStreamDecoder::with_resolver(&Config::default(), resolver);
        decoder.feed(&bytes, &mut dispatcher).unwrap();
        assert!(!decoder.end(&mut dispatcher).unwrap());

        // The event chunk is framed but waits behind the unresolved resource.
        assert_eq!(decoder.pending_chunks(), 2);
        assert_eq!(dispatcher.database().total_event_count(), 0);
        assert!(dispatcher.database().resources().is_empty());

        tx.send(Ok(Resource::Binary(b"decoded".to_vec()))).unwrap();
        assert!(decoder.poll(&mut dispatcher).unwrap());
        assert_eq!(decoder.pending_chunks(), 0);
    }
    assert_eq!(db.resources(), &[Resource::Binary(b"decoded".to_vec())]);
    assert_eq!(db.total_event_count(), 1);
    assert_eq!(db.sources()[source].status, SourceStatus::Loaded);
}

#[test]
fn test_newer_format_fails_before_dispatch() {
    let mut bytes = container(|w| {
        define_scope(w, "never()");
        w.write_event("never", 1, None).unwrap();
    });
    bytes[8..12].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());

    let mut db = Database::default();
    let err = load_bytes(&mut db, "future", &bytes, &Config::default()).unwrap_err();
    assert!(matches!(err, TraceError::FatalDecode(_)));
    assert_eq!(db.total_event_count(), 0);
    assert!(db.get_event_type("never").is_none());
    assert!(db.sources()[0].is_failed());
}

#[test]
fn test_undefined_wire_id_aborts_source() {
    let mut bytes = container(|w| {
        define_scope(w, "known()");
        w.write_event("known", 1, None).unwrap();
    });
    // Point the last record at a wire id nothing defined.
    let record = bytes.len() - 8;
    bytes[record..record + 4].copy_from_slice(&0x7777u32.to_le_bytes());

    let mut db = Database::default();
    let err = load_bytes(&mut db, "broken", &bytes, &Config::default()).unwrap_err();
    assert!(matches!(err, TraceError::UndefinedEventType { wire_id: 0x7777 }));
    assert!(err.is_fatal());
    assert!(!db.is_batch_open());
}

#[test]
fn test_legacy_and_chunked_containers_agree() {
    let header = FileHeader::new(0.0);
    let mut legacy = LegacyContainerWriter::new(&header).unwrap();
    let mut chunked = ContainerWriter::new(&header).unwrap();
    chunked.set_chunk_events(3);

    let signature = "io#read(uint32 fd, utf8 path, int16[] sizes)";
    legacy.define(signature, EventClass::Scope, EventFlags::NONE).unwrap();
    chunked.define(signature, EventClass::Scope, EventFlags::NONE).unwrap();
    for n in 0..10 {
        let data = args(&[
            ("fd", ArgValue::Int(n)),
            ("path", text("/tmp/\u{e9}t\u{e9}")),
            ("sizes", ArgValue::Array(vec![ArgValue::Int(-n), ArgValue::Int(n * 2)])),
        ]);
        let t = (n * 10) as u32;
        legacy.write_event("io#read", t, Some(&data)).unwrap();
        chunked.write_event("io#read", t, Some(&data)).unwrap();
        legacy.write_event("wtf.scope#leave", t + 5, None).unwrap();
        chunked.write_event("wtf.scope#leave", t + 5, None).unwrap();
    }

    let a = load(&legacy.finish());
    let b = load(&chunked.finish().unwrap());
    let shape = |db: &Database| -> Vec<(u64, Option<u64>, String)> {
        db.zones()[0]
            .store()
            .events()
            .iter()
            .map(|e| (e.time, e.end_time, e.args.as_ref().unwrap().to_json().to_string()))
            .collect()
    };
    assert_eq!(shape(&a), shape(&b));
    assert_eq!(shape(&a).len(), 10);
}

#[test]
fn test_sources_align_to_first_timebase() {
    let at_zero = |timebase: f64| {
        let mut writer = ContainerWriter::new(&FileHeader::new(timebase)).unwrap();
        writer
            .write_event("wtf.trace#timeStamp", 500, Some(&args(&[("name", text("t"))])))
            .unwrap();
        writer.finish().unwrap()
    };

    let mut db = Database::default();
    let config = Config::default();
    load_bytes(&mut db, "first", &at_zero(1_000.0), &config).unwrap();
    load_bytes(&mut db, "later", &at_zero(1_002.0), &config).unwrap();
    load_bytes(&mut db, "earlier", &at_zero(999.0), &config).unwrap();

    assert_eq!(db.timebase(), Some(1_000.0));
    let offsets: Vec<i64> = db.sources().iter().map(|s| s.time_offset).collect();
    assert_eq!(offsets, vec![0, 2_000, -1_000]);
    let times: Vec<u64> = db.zones()[0].store().events().iter().map(|e| e.time).collect();
    assert_eq!(times, vec![0, 500, 2_500]);
}

#[test]
fn test_mixed_units_fail_only_the_new_source() {
    let mut db = Database::default();
    load_json(
        &mut db,
        "time",
        r#"[{"event": "wtf.trace#timeStamp", "time": 1, "args": {"name": "a"}}]"#,
    )
    .unwrap();
    let sized = r#"[
        {"type": "wtf.json#header", "format_version": 2, "metadata": {"units": "bytes"}},
        {"event": "wtf.trace#timeStamp", "time": 1, "args": {"name": "b"}}
    ]"#;
    let err = load_json(&mut db, "size", sized).unwrap_err();
    assert!(matches!(err, TraceError::Source { .. }));
    assert!(err.to_string().contains("Mixing measurement units"));

    assert_eq!(db.sources()[0].status, SourceStatus::Loaded);
    assert!(db.sources()[1].is_failed());
    assert_eq!(db.total_event_count(), 1);
    assert_eq!(db.query("a").unwrap().len(), 1);
}

#[test]
fn test_failed_chunk_keeps_completed_chunks() {
    let mut bytes = container(|w| {
        w.define("good()", EventClass::Instance, EventFlags::NONE).unwrap();
        w.flush();
        w.set_chunk_events(2);
        for time in 10..16 {
            w.write_event("good", time, None).unwrap();
        }
    });
    // The final chunk holds 14 and 15; break the record at 15.
    let record = bytes.len() - 8;
    bytes[record..record + 4].copy_from_slice(&99u32.to_le_bytes());

    let mut db = Database::default();
    let err = load_bytes(&mut db, "partial", &bytes, &Config::default()).unwrap_err();
    assert!(matches!(err, TraceError::UndefinedEventType { wire_id: 99 }));
    assert!(!db.is_batch_open());
    assert!(db.sources()[0].is_failed());

    let times: Vec<u64> = db.zones()[0].store().events().iter().map(|e| e.time).collect();
    assert_eq!(times, vec![10, 11, 12, 13]);
    assert_eq!(db.total_event_count(), 4);
    assert_eq!(db.summary().len(), 4);
    assert_eq!(db.summary().last_event_time(), 13);
    assert_eq!(db.query("good").unwrap().len(), 4);
}

#[test]
fn test_timestamp_reuses_type_with_same_name() {
    let bytes = container(|w| {
        define_scope(w, "render(uint32 frame)");
        w.write_event("render", 1, Some(&args(&[("frame", ArgValue::Int(1))])))
            .unwrap();
        w.write_event("wtf.scope#leave", 5, None).unwrap();
        w.write_event("wtf.trace#timeStamp", 6, Some(&args(&[("name", text("render"))])))
            .unwrap();
    });

    let db = load(&bytes);
    let events = db.zones()[0].store().events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type.id, events[1].event_type.id);
    assert_eq!(db.get_event_type("render").map(|t| t.class), Some(EventClass::Scope));
    assert_eq!(db.sources()[0].status, SourceStatus::Loaded);
}

fn ancillary_trace(chunk_events: usize) -> Database {
    let frame = |n| args(&[("number", ArgValue::Int(n))]);
    let mark = |name| args(&[("name", text(name)), ("value", ArgValue::Int(0))]);
    let mut writer = ContainerWriter::new(&FileHeader::new(0.0)).unwrap();
    writer.set_chunk_events(chunk_events);
    let range = args(&[("id", ArgValue::Int(1)), ("name", text("load")), ("value", ArgValue::Int(0))]);
    let events = [
        ("wtf.trace#mark", 0, mark("boot")),
        ("wtf.timeRange#begin", 5, range),
        ("wtf.timing#frameStart", 10, frame(1)),
        ("wtf.timing#frameStart", 20, frame(2)),
        ("wtf.timing#frameEnd", 30, frame(2)),
        ("wtf.trace#mark", 35, mark("steady")),
        ("wtf.timing#frameEnd", 40, frame(1)),
        ("wtf.timeRange#end", 45, args(&[("id", ArgValue::Int(1))])),
        ("wtf.timing#frameStart", 50, frame(3)),
        ("wtf.timing#frameEnd", 60, frame(3)),
        ("wtf.trace#timeStamp", 70, args(&[("name", text("done"))])),
    ];
    for (name, time, data) in &events {
        writer.write_event(name, *time, Some(data)).unwrap();
    }
    load(&writer.finish().unwrap())
}

#[test]
fn test_small_chunks_build_same_lists() {
    let whole = ancillary_trace(1_000);
    let zone = &whole.zones()[0];
    let numbers: Vec<i64> = zone.frames().get_all_frames().iter().map(|f| f.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    let marks = zone.marks().get_all_marks();
    assert_eq!(marks.len(), 2);
    assert_eq!((marks[0].end_time, marks[1].end_time), (35, 70));
    assert_eq!(zone.time_ranges().get_all_time_ranges()[0].end_time, Some(45));

    for chunk_events in [1, 2, 3] {
        let chunked = ancillary_trace(chunk_events);
        let (a, b) = (&whole.zones()[0], &chunked.zones()[0]);
        assert_eq!(a.frames().get_all_frames(), b.frames().get_all_frames());
        assert_eq!(a.frames().get_frame(1), b.frames().get_frame(1));
        assert_eq!(a.marks().get_all_marks(), b.marks().get_all_marks());
        assert_eq!(
            a.time_ranges().get_all_time_ranges(),
            b.time_ranges().get_all_time_ranges()
        );
    }
}
