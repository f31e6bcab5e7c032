//! Device registry: validates raw device entries into handles.
//!
//! Each entry must have a dotted-quad IP, a plain name, and a model from the
//! known-model table whose role matches the slot it was listed in. Invalid
//! controllers are quarantined; an invalid pump or an empty controller list
//! aborts startup.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::config::{DevicesFile, RawDeviceConfig};
use crate::normalize::to_string_or_none;

/// Shape check only; octets are not range-checked.
static IP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[0-9]{1,3}\.){3}[0-9]{1,3}$").expect("valid regex"));

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_\- ]+$").expect("valid regex"));

// ---------------------------------------------------------------------------
// Model table
// ---------------------------------------------------------------------------

/// What a model is constructed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Shelly FK-06X: reports irrigation zones as boolean components.
    IrrigationController,
    /// Shelly Pro 1PM: switches the pump with a timed relay command.
    PumpRelay,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IrrigationController => write!(f, "irrigation controller"),
            Self::PumpRelay => write!(f, "pump relay"),
        }
    }
}

const KNOWN_MODELS: &[(&str, DeviceKind)] = &[
    ("fk-06x", DeviceKind::IrrigationController),
    ("shellypro1pm", DeviceKind::PumpRelay),
];

pub fn model_kind(model: &str) -> Option<DeviceKind> {
    KNOWN_MODELS
        .iter()
        .find(|(id, _)| *id == model)
        .map(|(_, kind)| *kind)
}

// ---------------------------------------------------------------------------
// Registry types
// ---------------------------------------------------------------------------

/// A validated device entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceHandle {
    pub name: String,
    pub ip: String,
    pub model: String,
    pub kind: DeviceKind,
    /// Minimum time between two calls to the same endpoint.
    #[serde(serialize_with = "serialize_secs")]
    pub interval: Duration,
    pub failsafe_seconds: Option<u32>,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

/// A quarantined entry and why it was rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidDevice {
    pub index: usize,
    pub name: Option<String>,
    pub reason: String,
}

#[derive(Debug)]
pub struct Registry {
    pub controllers: Vec<DeviceHandle>,
    pub pump: Option<DeviceHandle>,
    pub invalid: Vec<InvalidDevice>,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("no valid irrigation controllers configured")]
    NoValidControllers,

    #[error("invalid pump relay: {0}")]
    InvalidPump(String),
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

pub fn load(file: &DevicesFile) -> Result<Registry, ConfigError> {
    let mut controllers = Vec::new();
    let mut invalid = Vec::new();

    for (index, entry) in file.irrigation_controllers.iter().enumerate() {
        let raw = match RawDeviceConfig::from_value(entry) {
            Ok(raw) => raw,
            Err(e) => {
                let name = entry_name(entry);
                let reason = e.to_string();
                warn!(index, ?name, %reason, "ignoring invalid irrigation controller");
                invalid.push(InvalidDevice {
                    index,
                    name,
                    reason,
                });
                continue;
            }
        };

        match validate(&raw, DeviceKind::IrrigationController) {
            Ok(handle) => controllers.push(handle),
            Err(reason) => {
                warn!(index, name = ?raw.name, %reason, "ignoring invalid irrigation controller");
                invalid.push(InvalidDevice {
                    index,
                    name: raw.name,
                    reason,
                });
            }
        }
    }

    if controllers.is_empty() {
        return Err(ConfigError::NoValidControllers);
    }

    let pump = match &file.pump_relay {
        None | Some(serde_json::Value::Null) => None,
        Some(entry) => {
            let raw = RawDeviceConfig::from_value(entry)
                .map_err(|e| ConfigError::InvalidPump(e.to_string()))?;
            Some(validate(&raw, DeviceKind::PumpRelay).map_err(ConfigError::InvalidPump)?)
        }
    };

    Ok(Registry {
        controllers,
        pump,
        invalid,
    })
}

fn validate(raw: &RawDeviceConfig, role: DeviceKind) -> Result<DeviceHandle, String> {
    let name = raw.name.as_deref().ok_or("name is missing")?;
    if !NAME_RE.is_match(name) {
        return Err(format!("name {name:?} contains unsupported characters"));
    }

    let ip = raw.ip.as_deref().ok_or("ip is missing")?;
    if !IP_RE.is_match(ip) {
        return Err(format!("ip {ip:?} is not a dotted-quad address"));
    }

    let model = raw.model.as_deref().ok_or("model is missing")?;
    let kind = model_kind(model).ok_or_else(|| format!("unknown model {model:?}"))?;
    if kind != role {
        return Err(format!("{role} slot does not accept model {model:?} ({kind})"));
    }

    let interval = Duration::from_secs(raw.interval_seconds.unwrap_or(0).max(0) as u64);

    // Only the pump relay uses an auto-off timer.
    let failsafe_seconds = match (role, raw.failsafe_seconds) {
        (DeviceKind::PumpRelay, Some(s)) => match u32::try_from(s) {
            Ok(s) if s > 0 => Some(s),
            _ => return Err(format!("failsafe_seconds must be positive, got {s}")),
        },
        _ => None,
    };

    Ok(DeviceHandle {
        name: name.to_string(),
        ip: ip.to_string(),
        model: model.to_string(),
        kind,
        interval,
        failsafe_seconds,
    })
}

/// Best-effort name of an entry that failed coercion, for reporting.
fn entry_name(entry: &serde_json::Value) -> Option<String> {
    to_string_or_none(entry.get("name")).ok().flatten()
}

// ===========================================================================
// Tests
// ===========================================================================
