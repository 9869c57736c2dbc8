//! Binary container sources.

use std::io::{ErrorKind, Read};

use crate::config::Config;
use crate::db::Database;
use crate::dispatch::EventDispatcher;
use crate::error::Result;
use crate::sources::finish_source;
use crate::wire::WireStreamDecoder;

/// Bytes read from the input per feed.
const READ_SIZE: usize = 64 * 1024;

/// Stream a modern or legacy container into `db` as a new source. Returns
/// the source id.
pub fn load_binary(db: &mut Database, name: &str, reader: impl Read, config: &Config) -> Result<usize> {
    let source = db.add_source(name);
    let result = stream_source(db, source, reader, config);
    finish_source(db, source, result)
}

fn stream_source(db: &mut Database, source: usize, mut reader: impl Read, config: &Config) -> Result<()> {
    let mut dispatcher = EventDispatcher::new(db, source)?;
    let mut decoder = WireStreamDecoder::new(config);
    let mut buf = vec![0u8; READ_SIZE];
    let mut total = 0usize;
    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        total += read;
        decoder.feed(&buf[..read], &mut dispatcher)?;
    }
    decoder.finish(&mut dispatcher)?;
    tracing::debug!(
        "Source {} read {} bytes, {} events",
        source,
        total,
        dispatcher.dispatched()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::args::{ArgValue, ArgumentData};
    use crate::data::event_type::{EventClass, EventFlags};
    use crate::db::SourceStatus;
    use crate::wire::{ContainerWriter, FileHeader, LegacyContainerWriter};
    use serde_json::json;

    #[test]
    fn test_legacy_and_modern_agree() {
        let mut header = FileHeader::new(0.0);
        header.metadata = json!({});
        let args = |n: i64| -> ArgumentData {
            [("n", ArgValue::Int(n)), ("s", ArgValue::String(format!("v{n}")))]
                .into_iter()
                .collect()
        };

        let mut modern = ContainerWriter::new(&header).unwrap();
        let mut legacy = LegacyContainerWriter::new(&header).unwrap();
        modern
            .define("job(uint16 n, utf8 s)", EventClass::Scope, EventFlags::NONE)
            .unwrap();
        legacy
            .define("job(uint16 n, utf8 s)", EventClass::Scope, EventFlags::NONE)
            .unwrap();
        for (i, time) in [10u32, 30].iter().enumerate() {
            modern.write_event("job", *time, Some(&args(i as i64))).unwrap();
            modern.write_event("wtf.scope#leave", time + 5, None).unwrap();
            legacy.write_event("job", *time, Some(&args(i as i64))).unwrap();
            legacy.write_event("wtf.scope#leave", time + 5, None).unwrap();
        }

        let config = Config::default();
        let mut db = Database::default();
        load_binary(&mut db, "modern", modern.finish().unwrap().as_slice(), &config).unwrap();
        load_binary(&mut db, "legacy", legacy.finish().as_slice(), &config).unwrap();
        assert!(db.sources().iter().all(|s| s.status == SourceStatus::Loaded));

        let events = db.zones()[0].store().events();
        assert_eq!(events.len(), 4);
        let pairs: Vec<(u64, Option<u64>)> = events.iter().map(|e| (e.time, e.end_time)).collect();
        assert_eq!(
            pairs,
            vec![(10, Some(15)), (10, Some(15)), (30, Some(35)), (30, Some(35))]
        );
        assert_eq!(events[0].args, events[1].args);
    }

    #[test]
    fn test_failed_source_keeps_earlier_data() {
        let config = Config::default();
        let mut db = Database::default();
        let mut writer = ContainerWriter::new(&FileHeader::new(0.0)).unwrap();
        writer.write_event("wtf.trace#timeStamp", 3, None).unwrap();
        load_binary(&mut db, "good", writer.finish().unwrap().as_slice(), &config).unwrap();

        let err = load_binary(&mut db, "bad", &[0u8; 20][..], &config).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(db.sources()[1].status, SourceStatus::Failed(_)));
        assert_eq!(db.zones()[0].store().len(), 1);
    }
}
