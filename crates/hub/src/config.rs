//! Devices config file loading.
//!
//! The file is JSON with an `irrigation_controllers` array and an optional
//! `pump_relay` object. Entries are kept as raw JSON here; field coercion and
//! validation happen in [`crate::registry`].

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

use crate::normalize::{as_object, to_int_or_none, to_string_or_none, NormalizeError};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct DevicesFile {
    #[serde(default)]
    pub irrigation_controllers: Vec<Value>,
    #[serde(default)]
    pub pump_relay: Option<Value>,
}

/// One device entry with every field coerced to its expected type. Any field
/// may be missing; the registry decides which ones are required.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDeviceConfig {
    pub name: Option<String>,
    pub ip: Option<String>,
    pub model: Option<String>,
    pub interval_seconds: Option<i64>,
    pub failsafe_seconds: Option<i64>,
}

impl RawDeviceConfig {
    pub fn from_value(value: &Value) -> Result<Self, NormalizeError> {
        let f = as_object(value)?;
        Ok(Self {
            name: to_string_or_none(f.get("name"))?,
            ip: to_string_or_none(f.get("ip"))?,
            model: to_string_or_none(f.get("model"))?,
            interval_seconds: to_int_or_none(f.get("interval_seconds"))?,
            failsafe_seconds: to_int_or_none(f.get("failsafe_seconds"))?,
        })
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse the devices file. A missing file or malformed JSON is an
/// error; entry-level problems are left to the registry.
pub fn load(path: &Path) -> Result<DevicesFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read devices config: {}", path.display()))?;
    parse(&contents).with_context(|| format!("failed to parse devices config: {}", path.display()))
}

pub fn parse(contents: &str) -> Result<DevicesFile> {
    Ok(serde_json::from_str(contents)?)
}

// ===========================================================================
// Tests
// ===========================================================================
