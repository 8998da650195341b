//! Run configuration. Everything has a default so an empty JSON object (or no
//! file at all) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use strum_macros::{Display, EnumString};

use crate::error::Result;

/// Upper bounds on the communication plan. These are not protocol limits and
/// may be raised for matrices with very dense rows or columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeLimits {
    /// Distinct externally owned columns referenced by one participant.
    pub max_external: usize,
    /// Request messages one participant may receive while building its plan.
    pub max_num_messages: usize,
    /// Participants one participant receives halo values from.
    pub max_num_neighbors: usize,
}

impl Default for ExchangeLimits {
    fn default() -> Self {
        Self {
            max_external: 100_000,
            max_num_messages: 500,
            max_num_neighbors: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(ascii_case_insensitive)]
pub enum KernelMode {
    Serial,
    Parallel,
}

impl Default for KernelMode {
    fn default() -> Self {
        KernelMode::Parallel
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub limits: ExchangeLimits,
    pub kernel: KernelMode,
    /// Number of multiplies timed by the driver.
    pub repeat: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            limits: ExchangeLimits::default(),
            kernel: KernelMode::default(),
            repeat: 1,
        }
    }
}

impl RunConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpmvError;
    use std::str::FromStr;

    #[test]
    fn empty_object_gives_defaults() {
        let cfg = RunConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, RunConfig::default());
        assert_eq!(cfg.limits.max_external, 100_000);
        assert_eq!(cfg.limits.max_num_messages, 500);
        assert_eq!(cfg.limits.max_num_neighbors, 500);
    }

    #[test]
    fn partial_limits_keep_other_defaults() {
        let cfg = RunConfig::from_json_str(
            r#"{ "limits": { "max_external": 8 }, "kernel": "Serial", "repeat": 4 }"#,
        )
        .unwrap();
        assert_eq!(cfg.limits.max_external, 8);
        assert_eq!(cfg.limits.max_num_neighbors, 500);
        assert_eq!(cfg.kernel, KernelMode::Serial);
        assert_eq!(cfg.repeat, 4);
    }

    #[test]
    fn bad_json_is_a_json_error() {
        let err = RunConfig::from_json_str("{ limits: ").unwrap_err();
        assert!(matches!(err, SpmvError::Json(_)));
    }

    #[test]
    fn kernel_mode_parses_case_insensitively() {
        assert_eq!(KernelMode::from_str("serial").unwrap(), KernelMode::Serial);
        assert_eq!(KernelMode::from_str("PARALLEL").unwrap(), KernelMode::Parallel);
        assert!(KernelMode::from_str("gpu").is_err());
    }
}
