//! Filter queries over every zone of a database.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::db::cursor::{EventCursor, EventIter};
use crate::db::type_table::EventTypeTable;
use crate::db::zone::Zone;
use crate::error::{Result, TraceError};
use crate::filter::{Filter, FilterOutcome};

/// Matching event indices within one zone, in time order.
#[derive(Debug, Clone, Serialize)]
pub struct ZoneMatches {
    pub zone_id: usize,
    pub zone_name: String,
    pub indices: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    expression: String,
    duration: Duration,
    zones: Vec<ZoneMatches>,
}

impl QueryResult {
    /// Compile `expression` and collect the matching events of each zone.
    pub fn execute<'z>(
        types: &EventTypeTable,
        zones: impl IntoIterator<Item = &'z Zone>,
        expression: &str,
    ) -> Result<Self> {
        let started = Instant::now();
        let mut filter = Filter::new();
        if let FilterOutcome::Failed(detail) = filter.set_from_string(expression) {
            return Err(TraceError::FilterCompile(detail));
        }
        Ok(Self::collect(types, zones, &filter, started))
    }

    fn collect<'z>(
        types: &EventTypeTable,
        zones: impl IntoIterator<Item = &'z Zone>,
        filter: &Filter,
        started: Instant,
    ) -> Self {
        let mask = filter.type_mask(types);
        let mut matches = Vec::new();
        for zone in zones {
            let store = zone.store();
            let indices: Vec<usize> = EventIter::new(store, 0..store.len())
                .filter(|event| filter.matches_with(&mask, event))
                .map(|event| event.index())
                .collect();
            if !indices.is_empty() {
                matches.push(ZoneMatches {
                    zone_id: zone.id,
                    zone_name: zone.name.clone(),
                    indices,
                });
            }
        }

        let duration = started.elapsed();
        let result = Self {
            expression: filter.expression().to_string(),
            duration,
            zones: matches,
        };
        tracing::debug!(
            "Query '{}' matched {} events over {} types in {:?}",
            result.expression,
            result.len(),
            mask.matched_count(),
            duration
        );
        result
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Time spent compiling and evaluating the expression.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn zone_matches(&self) -> &[ZoneMatches] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.iter().map(|z| z.indices.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Cursors over the matches in `zone`, which must be the zone the
    /// matches were collected from.
    pub fn events<'a>(&'a self, zone: &'a Zone) -> impl Iterator<Item = EventCursor<'a>> + 'a {
        self.zones
            .iter()
            .filter(move |m| m.zone_id == zone.id)
            .flat_map(move |m| m.indices.iter())
            .filter_map(move |&index| EventCursor::new(zone.store(), index))
    }

    /// CSV with one row per match. Times are microseconds.
    pub fn dump_csv(&self, zones: &[Zone]) -> String {
        let mut lines = vec![r#"Time,Value,"Total Time","Own Time",Depth,Arguments"#.to_string()];
        for zone in zones {
            for event in self.events(zone) {
                let (total, own) = if event.is_scope() {
                    (event.total_duration().to_string(), event.own_duration().to_string())
                } else {
                    (String::new(), String::new())
                };
                let args = event
                    .args()
                    .map(|a| csv_quote(&a.to_json().to_string()))
                    .unwrap_or_default();
                lines.push(format!(
                    "{},{},{},{},{},{}",
                    event.time(),
                    csv_quote(event.name()),
                    total,
                    own,
                    event.depth(),
                    args
                ));
            }
        }
        lines.join("\r\n")
    }
}

fn csv_quote(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::data::args::{ArgValue, ArgumentData};
    use crate::data::event_type::{EventClass, EventFlags, EventType};
    use crate::filter::CompiledFilter;

    #[test]
    fn test_query_and_csv() {
        let mut table = EventTypeTable::new();
        let fetch = table
            .define_type("net#fetch(ascii url)", EventClass::Scope, EventFlags::NONE)
            .unwrap();
        let tick = table
            .define_type("tick", EventClass::Instance, EventFlags::NONE)
            .unwrap();
        let mut zone = Zone::new(0, "main", "script", "", 16);
        for (time, url) in [(0, "a,b"), (100, "c")] {
            let args: ArgumentData = [("url", ArgValue::String(url.into()))].into_iter().collect();
            zone.store_mut().insert(fetch.clone(), time, Some(args));
            zone.store_mut().leave(time + 40);
        }
        zone.store_mut().insert(tick, 150, None);
        zone.reconcile();
        let zones = vec![zone];

        let result = QueryResult::execute(&table, &zones, "fetch(url == 'c')").unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.expression(), "fetch(url == 'c')");
        let hit: Vec<u64> = result.events(&zones[0]).map(|e| e.time()).collect();
        assert_eq!(hit, vec![100]);

        let result = QueryResult::execute(&table, &zones, "fetch").unwrap();
        let csv = result.dump_csv(&zones);
        let rows: Vec<&str> = csv.split("\r\n").collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], r#"0,net#fetch,40,40,0,"{""url"":""a,b""}""#);

        assert!(QueryResult::execute(&table, &zones, "fetch(url ==").is_err());
        assert!(QueryResult::execute(&table, &zones, "nothing").unwrap().is_empty());
    }

    #[test]
    fn test_query_checks_type_once_per_type() {
        let mut table = EventTypeTable::new();
        let tick = table
            .define_type("tick", EventClass::Instance, EventFlags::NONE)
            .unwrap();
        let tock = table
            .define_type("tock", EventClass::Instance, EventFlags::NONE)
            .unwrap();
        let mut zone = Zone::new(0, "main", "script", "", 16);
        for time in 0..500 {
            let event_type = if time % 2 == 0 { &tick } else { &tock };
            zone.store_mut().insert(event_type.clone(), time, None);
        }
        zone.reconcile();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let compiled = CompiledFilter {
            type_predicate: Box::new(move |t: &EventType| {
                counter.fetch_add(1, Ordering::Relaxed);
                t.name == "tick"
            }),
            arg_predicate: None,
        };
        let filter = Filter::with_compiled("tick", compiled);
        let result = QueryResult::collect(&table, [&zone], &filter, Instant::now());
        assert_eq!(result.len(), 250);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }
}
