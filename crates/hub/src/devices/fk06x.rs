//! Shelly FK-06X irrigation controller.
//!
//! Zones are exposed as virtual boolean components `200..=205`; a zone is
//! running when its boolean is `true`.

use serde::Serialize;

use super::{fetch_error, CachedRpc, ControllerError, Device, FetchOptions};
use crate::registry::DeviceHandle;
use crate::shelly::{ShellyClient, SysStatus, ZoneStatus};

/// Boolean component ids that carry zone state.
pub const ZONE_CHANNELS: [u16; 6] = [200, 201, 202, 203, 204, 205];

struct Zone {
    id: u16,
    status: CachedRpc<ZoneStatus>,
}

pub struct IrrigationController {
    handle: DeviceHandle,
    sys: CachedRpc<SysStatus>,
    zones: Vec<Zone>,
    error: ControllerError,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneSnapshot {
    pub id: u16,
    pub status: Option<ZoneStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerSnapshot {
    pub device: DeviceHandle,
    pub error: ControllerError,
    pub zone_active: bool,
    pub zones: Vec<ZoneSnapshot>,
    pub sys: Option<SysStatus>,
}

impl IrrigationController {
    pub fn new(handle: DeviceHandle, client: &ShellyClient, opts: &FetchOptions) -> Self {
        let sys = opts.cached(client.rpc("Sys.GetStatus", None), handle.interval);
        let zones = ZONE_CHANNELS
            .iter()
            .map(|&id| Zone {
                id,
                status: opts.cached(client.rpc("Boolean.GetStatus", Some(id)), handle.interval),
            })
            .collect();

        Self {
            handle,
            sys,
            zones,
            error: ControllerError::default(),
        }
    }

    /// Refresh every endpoint that is due and return the per-zone states.
    pub async fn poll_status(&mut self) -> Vec<Option<bool>> {
        self.sys.get().await;
        for zone in &mut self.zones {
            zone.status.get().await;
        }

        self.error = ControllerError::first_of(
            std::iter::once(fetch_error(&self.sys))
                .chain(self.zones.iter().map(|z| fetch_error(&z.status))),
        );

        self.zone_states()
    }

    /// Cached zone states in channel order. `None` means never observed or
    /// reported without a value.
    pub fn zone_states(&self) -> Vec<Option<bool>> {
        self.zones
            .iter()
            .map(|z| z.status.peek().and_then(|s| s.value))
            .collect()
    }

    /// True iff any zone is known to be running. Performs no I/O.
    pub fn is_zone_active(&self) -> bool {
        self.zone_states().into_iter().any(|v| v == Some(true))
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            device: self.handle.clone(),
            error: self.error.clone(),
            zone_active: self.is_zone_active(),
            zones: self
                .zones
                .iter()
                .map(|z| ZoneSnapshot {
                    id: z.id,
                    status: z.status.peek().cloned(),
                })
                .collect(),
            sys: self.sys.peek().cloned(),
        }
    }
}

impl Device for IrrigationController {
    fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    fn error(&self) -> &ControllerError {
        &self.error
    }
}

// ===========================================================================
// Tests
// ===========================================================================
