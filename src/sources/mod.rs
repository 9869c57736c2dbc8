//! Loading trace sources into a [`Database`].
//!
//! Each load adds one source. A failed load marks that source failed and
//! returns the error; sources loaded earlier stay queryable.

pub mod binary;
pub mod json;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::Context;

use crate::config::Config;
use crate::db::Database;
use crate::error::{Result, TraceError};

pub use binary::load_binary;
pub use json::load_json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Binary,
    Json,
}

impl SourceFormat {
    /// JSON traces start with `[` or `{`; anything else is a container.
    pub fn detect(data: &[u8]) -> SourceFormat {
        match data.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'[') | Some(b'{') => SourceFormat::Json,
            _ => SourceFormat::Binary,
        }
    }
}

/// Record the outcome of a load on its source.
pub(crate) fn finish_source<T>(db: &mut Database, source: usize, result: Result<T>) -> Result<usize> {
    match result {
        Ok(_) => {
            db.source_loaded(source);
            Ok(source)
        }
        Err(err) => {
            if db.is_batch_open() {
                db.abort_batch();
            }
            db.source_failed(source, &err);
            Err(err)
        }
    }
}

/// Load an in-memory trace of either format.
pub fn load_bytes(db: &mut Database, name: &str, data: &[u8], config: &Config) -> Result<usize> {
    match SourceFormat::detect(data) {
        SourceFormat::Json => match std::str::from_utf8(data) {
            Ok(text) => load_json(db, name, text),
            Err(e) => {
                let source = db.add_source(name);
                let err = TraceError::source("Malformed JSON", format!("Trace is not UTF-8: {e}"));
                finish_source::<()>(db, source, Err(err))
            }
        },
        SourceFormat::Binary => load_binary(db, name, data, config),
    }
}

/// Load a trace file, streaming binary containers from disk.
pub fn load_file(db: &mut Database, path: impl AsRef<Path>, config: &Config) -> anyhow::Result<usize> {
    let path = path.as_ref();
    let name = path.display().to_string();
    let mut head = [0u8; 64];
    let mut file = File::open(path).with_context(|| format!("Failed to open {name}"))?;
    let read = file
        .read(&mut head)
        .with_context(|| format!("Failed to read {name}"))?;

    let source = match SourceFormat::detect(&head[..read]) {
        SourceFormat::Json => {
            let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {name}"))?;
            load_json(db, &name, &text)
        }
        SourceFormat::Binary => {
            let prefix = &head[..read];
            load_binary(db, &name, prefix.chain(BufReader::new(file)), config)
        }
    }
    .with_context(|| format!("Failed to load trace {name}"))?;
    tracing::info!("Loaded {}", name);
    Ok(source)
}
