//! HTTP access to Shelly Gen2 devices.

pub mod client;
pub mod components;

pub use client::{build_http, RpcEndpoint, ShellyClient};
pub use components::{
    FromPayload, RelayState, SwitchConfig, SwitchStatus, SysStatus, ZoneStatus,
};
