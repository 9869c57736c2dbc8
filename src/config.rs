//! Engine tunables, loadable from a JSON file.
//
// {
//   "chunk_capacity": 4096,
//   "summary_root_granularity": 1000000,
//   "summary_finest_granularity": 1000,
//   "max_tool_version": 3894494208,
//   "max_format_version": 10
// }
//
// Every key is optional; missing keys take the defaults below.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::wire::{FORMAT_VERSION, TOOL_VERSION};

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Events per pending storage chunk.
    pub chunk_capacity: usize,
    /// Width of the initial summary root, in microseconds.
    pub summary_root_granularity: u64,
    /// Summary nodes this wide or narrower are not subdivided.
    pub summary_finest_granularity: u64,
    pub max_tool_version: u32,
    pub max_format_version: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_capacity: 4096,
            summary_root_granularity: 1_000_000,
            summary_finest_granularity: 1_000,
            max_tool_version: TOOL_VERSION,
            max_format_version: FORMAT_VERSION,
        }
    }
}

impl Config {
    pub fn from_json(buf: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(buf)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_capacity == 0 {
            anyhow::bail!("chunk_capacity must be non-zero");
        }
        if self.summary_finest_granularity == 0 {
            anyhow::bail!("summary_finest_granularity must be non-zero");
        }
        if self.summary_root_granularity < self.summary_finest_granularity {
            anyhow::bail!(
                "summary_root_granularity ({}) is finer than summary_finest_granularity ({})",
                self.summary_root_granularity,
                self.summary_finest_granularity
            );
        }
        Ok(())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let buf = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json(&buf).with_context(|| format!("Invalid config {}", path.display()))
    }
}
