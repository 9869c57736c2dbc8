//! Random, well-nested traces for load testing and property checks.

use rand::Rng;
use rand::RngCore;

use crate::data::args::{ArgValue, ArgumentData};
use crate::data::event_type::{Builtin, EventClass, EventFlags};
use crate::error::Result;
use crate::wire::chunk::FileHeader;
use crate::wire::writer::ContainerWriter;

#[derive(Debug, Clone)]
pub struct SynthOptions {
    /// Scope enters plus instance events to write.
    pub events: usize,
    pub max_depth: usize,
    pub zones: usize,
    /// Distinct scope types.
    pub scope_types: usize,
    pub timebase: f64,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            events: 10_000,
            max_depth: 8,
            zones: 1,
            scope_types: 16,
            timebase: 0.0,
        }
    }
}

/// What a generated trace contains, for checking a load against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynthSummary {
    pub scopes: usize,
    pub instances: usize,
    pub marks: usize,
    pub max_depth: usize,
    pub last_time: u64,
}

fn scope_name(index: usize) -> String {
    format!("synth#scope{index}")
}

/// Generate a chunked container. Zones switch only between top-level
/// scopes so every scope is entered and left in the same zone.
pub fn generate_trace(
    options: &SynthOptions,
    rng: &mut dyn RngCore,
) -> Result<(Vec<u8>, SynthSummary)> {
    let mut writer = ContainerWriter::new(&FileHeader::new(options.timebase))?;
    for i in 0..options.scope_types.max(1) {
        writer.define(
            &format!("{}(uint32 seq)", scope_name(i)),
            EventClass::Scope,
            EventFlags::NONE,
        )?;
    }
    writer.define("synth#tick(uint32 seq)", EventClass::Instance, EventFlags::NONE)?;

    let zones = options.zones.max(1);
    for zone in 0..zones {
        let args: ArgumentData = [
            ("zoneId", ArgValue::Int(zone as i64)),
            ("name", ArgValue::String(format!("zone{zone}"))),
            ("type", ArgValue::String("script".to_string())),
            ("location", ArgValue::String(String::new())),
        ]
        .into_iter()
        .collect();
        writer.write_event(Builtin::ZoneCreate.name(), 0, Some(&args))?;
    }

    let mut summary = SynthSummary::default();
    let mut time: u32 = 0;
    let mut depth = 0usize;
    let mut written = 0usize;
    while written < options.events {
        time = time.saturating_add(rng.random_range(1..100));
        if depth > 0 && (depth >= options.max_depth || rng.random_bool(0.4)) {
            writer.write_event(Builtin::ScopeLeave.name(), time, None)?;
            depth -= 1;
            continue;
        }
        if depth == 0 && zones > 1 && rng.random_bool(0.1) {
            let zone = rng.random_range(0..zones);
            let args: ArgumentData = [("zoneId", ArgValue::Int(zone as i64))].into_iter().collect();
            writer.write_event(Builtin::ZoneSet.name(), time, Some(&args))?;
        }
        if depth == 0 && rng.random_bool(0.01) {
            let args: ArgumentData = [
                ("name", ArgValue::String(format!("mark{}", summary.marks))),
                ("value", ArgValue::Null),
            ]
            .into_iter()
            .collect();
            writer.write_event(Builtin::TraceMark.name(), time, Some(&args))?;
            summary.marks += 1;
        }

        let seq: ArgumentData = [("seq", ArgValue::Int(written as i64))].into_iter().collect();
        if depth < options.max_depth && rng.random_bool(0.7) {
            let name = scope_name(rng.random_range(0..options.scope_types.max(1)));
            writer.write_event(&name, time, Some(&seq))?;
            depth += 1;
            summary.scopes += 1;
            summary.max_depth = summary.max_depth.max(depth);
        } else {
            writer.write_event("synth#tick", time, Some(&seq))?;
            summary.instances += 1;
        }
        written += 1;
    }
    while depth > 0 {
        time = time.saturating_add(rng.random_range(1..100));
        writer.write_event(Builtin::ScopeLeave.name(), time, None)?;
        depth -= 1;
    }
    summary.last_time = time as u64;

    tracing::debug!(
        "Generated {} scopes and {} instances up to {}us",
        summary.scopes,
        summary.instances,
        summary.last_time
    );
    Ok((writer.finish()?, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::Database;
    use crate::sources::load_bytes;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_generated_trace_loads() {
        let options = SynthOptions {
            events: 2_000,
            zones: 3,
            ..SynthOptions::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        let (bytes, summary) = generate_trace(&options, &mut rng).unwrap();

        let mut db = Database::default();
        load_bytes(&mut db, "synth", &bytes, &Config::default()).unwrap();
        assert_eq!(db.total_event_count(), summary.scopes + summary.instances);
        assert_eq!(db.last_event_time(), summary.last_time);
        let deepest = db
            .zones()
            .iter()
            .map(|z| z.store().maximum_scope_depth())
            .max()
            .unwrap_or(0);
        assert_eq!(deepest as usize, summary.max_depth);
        let marks: usize = db.zones().iter().map(|z| z.marks().len()).sum();
        assert_eq!(marks, summary.marks);
    }

    #[test]
    fn test_same_seed_same_bytes() {
        let options = SynthOptions {
            events: 500,
            ..SynthOptions::default()
        };
        let a = generate_trace(&options, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = generate_trace(&options, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
    }
}
