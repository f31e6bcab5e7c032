use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::devices::fk06x::ControllerSnapshot;
use crate::devices::pro1pm::PumpSnapshot;
use crate::registry::InvalidDevice;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub pump: Option<PumpSnapshot>,
    pub controllers: Vec<ControllerSnapshot>,
    pub invalid_devices: Vec<InvalidDevice>,
    pub pump_active: bool,
    pub any_error: bool,
    pub last_cycle: Option<OffsetDateTime>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Pump,
    Error,
    System,
}

/// Everything one control cycle observed, published in a single write.
pub struct CycleReport {
    pub pump: Option<PumpSnapshot>,
    pub controllers: Vec<ControllerSnapshot>,
    pub pump_active: bool,
    pub any_error: bool,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_cycle: Option<OffsetDateTime>,
    pub pump: Option<PumpSnapshot>,
    pub controllers: Vec<ControllerSnapshot>,
    pub invalid_devices: Vec<InvalidDevice>,
    pub pump_active: bool,
    pub any_error: bool,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(invalid_devices: Vec<InvalidDevice>) -> Self {
        Self {
            started_at: Instant::now(),
            pump: None,
            controllers: Vec::new(),
            invalid_devices,
            pump_active: false,
            any_error: false,
            last_cycle: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn shared(invalid_devices: Vec<InvalidDevice>) -> SharedState {
        Arc::new(RwLock::new(Self::new(invalid_devices)))
    }

    /// Replace the device snapshot with the result of one cycle.
    pub fn publish(&mut self, report: CycleReport) {
        self.pump = report.pump;
        self.controllers = report.controllers;
        self.pump_active = report.pump_active;
        self.any_error = report.any_error;
        self.last_cycle = Some(OffsetDateTime::now_utc());
    }

    /// Record a pump on/off transition.
    pub fn record_pump(&mut self, detail: String) {
        self.push_event(EventKind::Pump, detail);
    }

    /// Record an error-state transition.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            last_cycle: self.last_cycle,
            pump: self.pump.clone(),
            controllers: self.controllers.clone(),
            invalid_devices: self.invalid_devices.clone(),
            pump_active: self.pump_active,
            any_error: self.any_error,
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
