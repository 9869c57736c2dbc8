//! tracedb - storage and indexing engine for WTF-style trace events.
//!
//! Traces arrive as binary containers (chunked little-endian, or the older
//! big-endian legacy layout) or as JSON record lists. Events are decoded
//! against their self-described types, stored per zone as nested scope
//! trees, and indexed by time for range summaries, filter queries and
//! per-type statistics.
//!
//! # Modules
//!
//! - [`data`] - event types, argument signatures and values
//! - [`codec`] - argument decoders, encoders and string tables
//! - [`wire`] - container framing, the incremental stream decoder and writers
//! - [`dispatch`] - routes decoded events into the database
//! - [`sources`] - loading JSON and binary traces
//! - [`db`] - zones, event stores, the summary index and derived lists
//! - [`filter`] - the filter expression language
//! - [`export`] - re-encoding a database as a binary container
//! - [`synth`] - seeded random traces
//!
//! # Example
//!
//! ```no_run
//! use tracedb::{load_file, Config, Database};
//!
//! let config = Config::default();
//! let mut db = Database::new(&config);
//! load_file(&mut db, "app.wtf-trace", &config).expect("Failed to load trace");
//!
//! let result = db.query("/^app#/(frame > 10)").expect("Bad query");
//! println!("{} matches in {:?}", result.len(), result.duration());
//! ```

pub mod codec;
pub mod config;
pub mod data;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod filter;
pub mod sources;
pub mod synth;
pub mod wire;

// Re-export for convenience
pub use config::Config;
pub use db::{Database, EventCursor, QueryResult, SortMode, StatisticsTable, SummaryData};
pub use dispatch::EventDispatcher;
pub use error::{Result, TraceError};
pub use export::export_container;
pub use filter::{Filter, FilterOutcome};
pub use sources::{load_binary, load_bytes, load_file, load_json, SourceFormat};
pub use wire::{ContainerWriter, LegacyContainerWriter, WireStreamDecoder};
