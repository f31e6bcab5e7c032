//! Typed views of Shelly Gen2 RPC responses.
//!
//! Every field is optional: devices omit fields depending on firmware and
//! configuration. Values are read through [`crate::normalize`], so a field of
//! the wrong shape rejects the whole payload.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::normalize::{
    as_object, object_or_none, to_bool_or_none, to_float_or_none, to_int_or_none,
    to_list_of_float, to_list_of_str, to_string_or_none, NormalizeError,
};

/// Decode a typed component from a raw JSON response body.
pub trait FromPayload: Sized {
    fn from_payload(data: &Value) -> Result<Self, NormalizeError>;
}

// ---------------------------------------------------------------------------
// Boolean.GetStatus
// ---------------------------------------------------------------------------

/// State of one virtual boolean component (an irrigation zone channel).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ZoneStatus {
    pub id: Option<i64>,
    pub value: Option<bool>,
    pub source: Option<String>,
    pub last_update_ts: Option<i64>,
}

impl FromPayload for ZoneStatus {
    fn from_payload(data: &Value) -> Result<Self, NormalizeError> {
        let f = as_object(data)?;
        Ok(Self {
            id: to_int_or_none(f.get("id"))?,
            value: to_bool_or_none(f.get("value"))?,
            source: to_string_or_none(f.get("source"))?,
            last_update_ts: to_int_or_none(f.get("last_update_ts"))?,
        })
    }
}

// ---------------------------------------------------------------------------
// /relay/0?turn=on&timer=N
// ---------------------------------------------------------------------------

/// Relay state returned by a timed on-command.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RelayState {
    pub is_on: Option<bool>,
    pub has_timer: Option<bool>,
    pub timer_started_at: Option<i64>,
    pub timer_duration: Option<f64>,
    pub timer_remaining: Option<f64>,
    pub overpower: Option<bool>,
    pub source: Option<String>,
}

impl FromPayload for RelayState {
    fn from_payload(data: &Value) -> Result<Self, NormalizeError> {
        let f = as_object(data)?;
        Ok(Self {
            is_on: to_bool_or_none(f.get("ison"))?,
            has_timer: to_bool_or_none(f.get("has_timer"))?,
            timer_started_at: to_int_or_none(f.get("timer_started_at"))?,
            timer_duration: to_float_or_none(f.get("timer_duration"))?,
            timer_remaining: to_float_or_none(f.get("timer_remaining"))?,
            overpower: to_bool_or_none(f.get("overpower"))?,
            source: to_string_or_none(f.get("source"))?,
        })
    }
}

// ---------------------------------------------------------------------------
// Sys.GetStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SysStatus {
    pub mac: Option<String>,
    pub restart_required: Option<bool>,
    pub time: Option<String>,
    pub unixtime: Option<i64>,
    pub last_sync_ts: Option<i64>,
    pub uptime: Option<i64>,
    pub ram_size: Option<i64>,
    pub ram_free: Option<i64>,
    pub fs_size: Option<i64>,
    pub fs_free: Option<i64>,
    pub cfg_rev: Option<i64>,
    pub kvs_rev: Option<i64>,
    pub schedule_rev: Option<i64>,
    pub webhook_rev: Option<i64>,
    pub btrelay_rev: Option<i64>,
    /// Version of the available stable firmware update, if one is offered.
    pub stable_update: Option<String>,
}

impl FromPayload for SysStatus {
    fn from_payload(data: &Value) -> Result<Self, NormalizeError> {
        let f = as_object(data)?;

        let stable_update = match object_or_none(f, "available_updates")? {
            Some(updates) => match object_or_none(updates, "stable")? {
                Some(stable) => to_string_or_none(stable.get("version"))?,
                None => None,
            },
            None => None,
        };

        Ok(Self {
            mac: to_string_or_none(f.get("mac"))?,
            restart_required: to_bool_or_none(f.get("restart_required"))?,
            time: to_string_or_none(f.get("time"))?,
            unixtime: to_int_or_none(f.get("unixtime"))?,
            last_sync_ts: to_int_or_none(f.get("last_sync_ts"))?,
            uptime: to_int_or_none(f.get("uptime"))?,
            ram_size: to_int_or_none(f.get("ram_size"))?,
            ram_free: to_int_or_none(f.get("ram_free"))?,
            fs_size: to_int_or_none(f.get("fs_size"))?,
            fs_free: to_int_or_none(f.get("fs_free"))?,
            cfg_rev: to_int_or_none(f.get("cfg_rev"))?,
            kvs_rev: to_int_or_none(f.get("kvs_rev"))?,
            schedule_rev: to_int_or_none(f.get("schedule_rev"))?,
            webhook_rev: to_int_or_none(f.get("webhook_rev"))?,
            btrelay_rev: to_int_or_none(f.get("btrelay_rev"))?,
            stable_update,
        })
    }
}

// ---------------------------------------------------------------------------
// Switch.GetStatus
// ---------------------------------------------------------------------------

/// Energy counter block (`aenergy` / `ret_aenergy`).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Energy {
    pub total: Option<f64>,
    pub by_minute: Vec<f64>,
    pub minute_ts: Option<i64>,
}

impl Energy {
    fn from_fields(f: Option<&Map<String, Value>>) -> Result<Self, NormalizeError> {
        let Some(f) = f else {
            return Ok(Self::default());
        };
        Ok(Self {
            total: to_float_or_none(f.get("total"))?,
            by_minute: to_list_of_float(f.get("by_minute"))?,
            minute_ts: to_int_or_none(f.get("minute_ts"))?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Temperature {
    #[serde(rename = "tC")]
    pub celsius: Option<f64>,
    #[serde(rename = "tF")]
    pub fahrenheit: Option<f64>,
}

impl Temperature {
    fn from_fields(f: Option<&Map<String, Value>>) -> Result<Self, NormalizeError> {
        let Some(f) = f else {
            return Ok(Self::default());
        };
        Ok(Self {
            celsius: to_float_or_none(f.get("tC"))?,
            fahrenheit: to_float_or_none(f.get("tF"))?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SwitchStatus {
    pub id: Option<i64>,
    pub source: Option<String>,
    pub output: Option<bool>,
    pub apower: Option<f64>,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub freq: Option<f64>,
    pub pf: Option<f64>,
    pub aenergy: Energy,
    pub ret_aenergy: Energy,
    pub temperature: Temperature,
    /// Active fault conditions, e.g. `overtemp` or `overpower`.
    pub errors: Vec<String>,
}

impl FromPayload for SwitchStatus {
    fn from_payload(data: &Value) -> Result<Self, NormalizeError> {
        let f = as_object(data)?;
        Ok(Self {
            id: to_int_or_none(f.get("id"))?,
            source: to_string_or_none(f.get("source"))?,
            output: to_bool_or_none(f.get("output"))?,
            apower: to_float_or_none(f.get("apower"))?,
            voltage: to_float_or_none(f.get("voltage"))?,
            current: to_float_or_none(f.get("current"))?,
            freq: to_float_or_none(f.get("freq"))?,
            pf: to_float_or_none(f.get("pf"))?,
            aenergy: Energy::from_fields(object_or_none(f, "aenergy")?)?,
            ret_aenergy: Energy::from_fields(object_or_none(f, "ret_aenergy")?)?,
            temperature: Temperature::from_fields(object_or_none(f, "temperature")?)?,
            errors: to_list_of_str(f.get("errors"))?,
        })
    }
}

// ---------------------------------------------------------------------------
// Switch.GetConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SwitchConfig {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub in_mode: Option<String>,
    pub in_locked: Option<bool>,
    pub initial_state: Option<String>,
    pub auto_on: Option<bool>,
    pub auto_on_delay: Option<f64>,
    pub auto_off: Option<bool>,
    pub auto_off_delay: Option<f64>,
    pub autorecover_voltage_errors: Option<bool>,
    pub power_limit: Option<i64>,
    pub voltage_limit: Option<i64>,
    pub undervoltage_limit: Option<i64>,
    pub current_limit: Option<f64>,
    pub reverse: Option<bool>,
    pub input_id: Option<i64>,
}

impl FromPayload for SwitchConfig {
    fn from_payload(data: &Value) -> Result<Self, NormalizeError> {
        let f = as_object(data)?;
        Ok(Self {
            id: to_int_or_none(f.get("id"))?,
            name: to_string_or_none(f.get("name"))?,
            in_mode: to_string_or_none(f.get("in_mode"))?,
            in_locked: to_bool_or_none(f.get("in_locked"))?,
            initial_state: to_string_or_none(f.get("initial_state"))?,
            auto_on: to_bool_or_none(f.get("auto_on"))?,
            auto_on_delay: to_float_or_none(f.get("auto_on_delay"))?,
            auto_off: to_bool_or_none(f.get("auto_off"))?,
            auto_off_delay: to_float_or_none(f.get("auto_off_delay"))?,
            autorecover_voltage_errors: to_bool_or_none(f.get("autorecover_voltage_errors"))?,
            power_limit: to_int_or_none(f.get("power_limit"))?,
            voltage_limit: to_int_or_none(f.get("voltage_limit"))?,
            undervoltage_limit: to_int_or_none(f.get("undervoltage_limit"))?,
            current_limit: to_float_or_none(f.get("current_limit"))?,
            reverse: to_bool_or_none(f.get("reverse"))?,
            input_id: to_int_or_none(f.get("input_id"))?,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
