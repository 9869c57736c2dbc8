//! Helpers shared by the integration tests.

#![allow(dead_code)]

use tracedb::data::{ArgValue, ArgumentData, EventClass, EventFlags};
use tracedb::wire::FileHeader;
use tracedb::{load_bytes, Config, ContainerWriter, Database};

pub fn args(pairs: &[(&str, ArgValue)]) -> ArgumentData {
    pairs.iter().map(|(k, v)| (*k, v.clone())).collect()
}

pub fn text(value: &str) -> ArgValue {
    ArgValue::String(value.to_string())
}

/// Build a modern container with `f`, starting from a zero timebase.
pub fn container(f: impl FnOnce(&mut ContainerWriter)) -> Vec<u8> {
    let mut writer = ContainerWriter::new(&FileHeader::new(0.0)).expect("Failed to start container");
    f(&mut writer);
    writer.finish().expect("Failed to finish container")
}

pub fn define_scope(writer: &mut ContainerWriter, signature: &str) {
    writer
        .define(signature, EventClass::Scope, EventFlags::NONE)
        .expect("Failed to define scope");
}

pub fn load(bytes: &[u8]) -> Database {
    let mut db = Database::default();
    load_bytes(&mut db, "test", bytes, &Config::default()).expect("Failed to load trace");
    db
}
