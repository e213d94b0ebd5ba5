// src/config.rs - PV configuration with record-style keys and YAML loading

use crate::error::{PvError, Result};
use crate::value::PvType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// PV CONFIGURATION
// ============================================================================

/// Configuration of one process variable
///
/// Only `TYPE` is mandatory. Unset alarm and warning levels collapse to
/// the control bounds when the PV is initialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PvConfig {
    /// Element type name, e.g. `float64` or `string`
    #[serde(rename = "TYPE", default)]
    pub pv_type: Option<String>,

    /// Number of elements (1 = scalar)
    #[serde(rename = "NELM", default)]
    pub element_count: Option<u32>,

    /// Republish period in seconds (0 = disabled)
    #[serde(rename = "SCAN", default)]
    pub scan_period: Option<f64>,

    /// Stamp writes with the local clock instead of external timestamps
    #[serde(rename = "UseLocalTimeStamp", default)]
    pub use_local_timestamp: Option<bool>,

    /// Initial value; comma separated for arrays
    #[serde(rename = "VAL", default)]
    pub initial_value: Option<String>,

    /// Engineering units
    #[serde(rename = "EGU", default)]
    pub units: Option<String>,

    #[serde(rename = "HOPR", default)]
    pub control_high: Option<f64>,

    #[serde(rename = "LOPR", default)]
    pub control_low: Option<f64>,

    #[serde(rename = "HIHI", default)]
    pub alarm_high: Option<f64>,

    #[serde(rename = "LOLO", default)]
    pub alarm_low: Option<f64>,

    #[serde(rename = "HIGH", default)]
    pub warn_high: Option<f64>,

    #[serde(rename = "LOW", default)]
    pub warn_low: Option<f64>,

    #[serde(rename = "HHSV", default)]
    pub sev_hihi: Option<String>,

    #[serde(rename = "HSV", default)]
    pub sev_high: Option<String>,

    #[serde(rename = "LSV", default)]
    pub sev_low: Option<String>,

    #[serde(rename = "LLSV", default)]
    pub sev_lolo: Option<String>,

    #[serde(rename = "HYST", default)]
    pub hysteresis: Option<f64>,

    #[serde(rename = "ADEL", default)]
    pub archive_deadband: Option<f64>,

    #[serde(rename = "MDEL", default)]
    pub monitor_deadband: Option<f64>,

    /// Display precision
    #[serde(rename = "PREC", default)]
    pub precision: Option<u32>,

    /// Enumeration state strings
    #[serde(rename = "ENUM", default)]
    pub enum_strings: Vec<String>,
}

impl PvConfig {
    /// Minimal configuration with only the mandatory type set
    pub fn with_type(pv_type: &str) -> Self {
        Self {
            pv_type: Some(pv_type.to_string()),
            ..Self::default()
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Resolve the mandatory `TYPE` key
    pub fn resolve_type(&self) -> Result<PvType> {
        let name = self
            .pv_type
            .as_deref()
            .ok_or_else(|| PvError::Config("Missing mandatory key 'TYPE'".to_string()))?;
        name.parse()
    }

    pub fn element_count(&self) -> Result<usize> {
        match self.element_count.unwrap_or(1) {
            0 => Err(PvError::Config("NELM must be at least 1".to_string())),
            n => Ok(n as usize),
        }
    }

    /// Periodic scan interval; `None` when `SCAN` is absent or zero
    pub fn scan_period(&self) -> Result<Option<Duration>> {
        let period = self.scan_period.unwrap_or(0.0);
        let duration = Duration::try_from_secs_f64(period)
            .map_err(|e| PvError::Config(format!("Invalid SCAN period {}: {}", period, e)))?;
        Ok(Some(duration).filter(|d| !d.is_zero()))
    }

    pub fn use_local_timestamp(&self) -> bool {
        self.use_local_timestamp.unwrap_or(true)
    }
}

// ============================================================================
// TREE CONFIGURATION
// ============================================================================

/// A set of named PVs loaded together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    #[serde(default)]
    pub pvs: BTreeMap<String, PvConfig>,
}

impl TreeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }
}
