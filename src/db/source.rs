//! Bookkeeping for the sources loaded into a database.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// What the times in a trace measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[default]
    Time,
    Size,
    Count,
}

impl Unit {
    /// Parse `metadata.units`. Absent or empty means time.
    pub fn parse(value: Option<&str>) -> Option<Unit> {
        match value.unwrap_or_default() {
            "" | "microseconds" => Some(Unit::Time),
            "bytes" => Some(Unit::Size),
            "count" => Some(Unit::Count),
            _ => None,
        }
    }

    pub fn from_metadata(metadata: &Value) -> Option<Unit> {
        Unit::parse(metadata.get("units").and_then(Value::as_str))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Time => "microseconds",
            Unit::Size => "bytes",
            Unit::Count => "count",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum SourceStatus {
    Loading,
    Loaded,
    Failed(String),
}

/// Header information of one source. Times are microseconds.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub id: usize,
    pub name: String,
    pub status: SourceStatus,
    pub units: Unit,
    /// Wall-clock time of the source's zero, in milliseconds.
    pub timebase: f64,
    /// Added to every event time to align the source with the database.
    pub time_offset: i64,
    pub flags: Vec<String>,
    pub context_info: Value,
    pub metadata: Value,
}

impl SourceInfo {
    pub(crate) fn new(id: usize, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            status: SourceStatus::Loading,
            units: Unit::Time,
            timebase: 0.0,
            time_offset: 0,
            flags: Vec::new(),
            context_info: Value::Null,
            metadata: Value::Null,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, SourceStatus::Failed(_))
    }
}

/// Header fields a source reports before its events.
#[derive(Debug, Clone, Default)]
pub struct SourceHeader {
    pub timebase: f64,
    pub flags: Vec<String>,
    pub context_info: Value,
    pub metadata: Value,
}

/// Payload carried by a resource part.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Binary(Vec<u8>),
    Text(String),
}

impl Resource {
    pub fn len(&self) -> usize {
        match self {
            Resource::Binary(data) => data.len(),
            Resource::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unit_parse() {
        assert_eq!(Unit::parse(None), Some(Unit::Time));
        assert_eq!(Unit::parse(Some("bytes")), Some(Unit::Size));
        assert_eq!(Unit::parse(Some("furlongs")), None);
        assert_eq!(Unit::from_metadata(&json!({"units": "count"})), Some(Unit::Count));
        assert_eq!(Unit::from_metadata(&Value::Null), Some(Unit::Time));
    }

    #[test]
    fn test_status_serialization() {
        let value = serde_json::to_value(SourceStatus::Failed("bad".into())).unwrap();
        assert_eq!(value, json!({"status": "failed", "detail": "bad"}));
    }
}
