//! Control loop: polls every device once per cycle and keeps the pump
//! running while any irrigation zone is active.
//!
//! The pump is never switched off explicitly. Each cycle with an active zone
//! re-sends the activation, renewing the relay's auto-off timer; once zones go
//! idle the relay drops by itself after `failsafe_seconds`.
//!
//! ```text
//! poll pump ──▶ poll controller 1..N ──▶ any zone active? ──▶ activate relay (≤ 1×)
//!                                                  │
//!                      publish snapshot ◀── log transitions ◀──┘
//! ```

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::devices::{Device, IrrigationController, PumpRelay};
use crate::state::{CycleReport, SharedState};

// ---------------------------------------------------------------------------
// Cycle outcome
// ---------------------------------------------------------------------------

/// What one cycle observed and did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    pub zone_active: bool,
    pub pump_commanded: bool,
    pub pump_active: bool,
    pub any_error: bool,
    /// Cancellation arrived mid-cycle; nothing was published.
    pub interrupted: bool,
}

// ---------------------------------------------------------------------------
// ControlLoop
// ---------------------------------------------------------------------------

pub struct ControlLoop {
    controllers: Vec<IrrigationController>,
    pump: Option<PumpRelay>,
    /// Used when the pump entry does not set its own failsafe.
    default_failsafe_seconds: u32,
    interval: Duration,
    shared: SharedState,
    cancel: CancellationToken,
    // Last logged values; `None` so the first observation always logs.
    pump_state: Option<bool>,
    error_state: Option<bool>,
    zone_state: Option<bool>,
}

impl ControlLoop {
    pub fn new(
        controllers: Vec<IrrigationController>,
        pump: Option<PumpRelay>,
        default_failsafe_seconds: u32,
        interval: Duration,
        shared: SharedState,
    ) -> Self {
        Self {
            controllers,
            pump,
            default_failsafe_seconds,
            interval,
            shared,
            cancel: CancellationToken::new(),
            pump_state: None,
            error_state: None,
            zone_state: None,
        }
    }

    /// Run until `cancel` fires. Intended to be the last thing `main` awaits.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.cancel = cancel.clone();
        info!(
            controllers = self.controllers.len(),
            pump = ?self.pump.as_ref().map(|p| p.name()),
            interval_ms = self.interval.as_millis() as u64,
            "control loop started"
        );
        self.shared.write().await.record_system(format!(
            "control loop started ({} controllers, pump {})",
            self.controllers.len(),
            if self.pump.is_some() { "configured" } else { "not configured" }
        ));

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.tick().await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("control loop stopped");
        self.shared
            .write()
            .await
            .record_system("control loop stopped".to_string());
    }

    /// One poll cycle. Device failures are contained in each device's error
    /// slot; this never fails. A cancellation abandons the in-flight poll
    /// and skips the rest of the cycle.
    pub async fn tick(&mut self) -> CycleOutcome {
        let mut outcome = CycleOutcome::default();
        let cancel = self.cancel.clone();

        if let Some(pump) = &mut self.pump {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return interrupted(),
                _ = pump.poll_status() => {}
            }
        }

        for controller in &mut self.controllers {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return interrupted(),
                _ = controller.poll_status() => {}
            }
            if !controller.is_zone_active() {
                continue;
            }
            outcome.zone_active = true;

            if outcome.pump_commanded {
                continue;
            }
            if let Some(pump) = &mut self.pump {
                let failsafe = pump.failsafe_seconds().unwrap_or(self.default_failsafe_seconds);
                debug!(controller = controller.name(), failsafe, "zone active, activating pump");
                pump.activate_relay(failsafe).await;
                outcome.pump_commanded = true;
            }
        }

        outcome.pump_active = self.pump.as_ref().is_some_and(PumpRelay::is_active);
        outcome.any_error = self.pump.as_ref().is_some_and(|p| p.has_error())
            || self.controllers.iter().any(|c| c.has_error());

        self.publish(outcome).await;
        outcome
    }

    /// Log transitions and write the cycle's snapshot under one lock.
    async fn publish(&mut self, outcome: CycleOutcome) {
        let pump_changed = self.pump_state != Some(outcome.pump_active);
        let error_changed = self.error_state != Some(outcome.any_error);
        let zone_changed = self.zone_state != Some(outcome.zone_active);
        self.pump_state = Some(outcome.pump_active);
        self.error_state = Some(outcome.any_error);
        self.zone_state = Some(outcome.zone_active);

        let report = CycleReport {
            pump: self.pump.as_ref().map(PumpRelay::snapshot),
            controllers: self.controllers.iter().map(|c| c.snapshot()).collect(),
            pump_active: outcome.pump_active,
            any_error: outcome.any_error,
        };

        let mut st = self.shared.write().await;

        if self.pump.is_some() && pump_changed {
            if outcome.pump_active {
                info!("pump is ON");
                st.record_pump("pump ON".to_string());
            } else {
                info!("pump is OFF");
                st.record_pump("pump OFF".to_string());
            }
        }

        if self.pump.is_none() && zone_changed && outcome.zone_active {
            warn!("irrigation zone active but no pump relay is configured");
            st.record_system("zone active with no pump relay configured".to_string());
        }

        if error_changed {
            if outcome.any_error {
                let failing = self.failing_devices();
                warn!(devices = %failing.join("; "), "device errors present");
                st.record_error(format!("device errors: {}", failing.join("; ")));
            } else {
                info!("all devices healthy");
                st.record_system("all devices healthy".to_string());
            }
        }

        st.publish(report);
    }

    fn failing_devices(&self) -> Vec<String> {
        let pump = self.pump.iter().map(|p| p as &dyn Device);
        let controllers = self.controllers.iter().map(|c| c as &dyn Device);
        pump.chain(controllers)
            .filter(|d| d.has_error())
            .map(|d| {
                format!(
                    "{}: {}",
                    d.name(),
                    d.error().message.as_deref().unwrap_or("unknown error")
                )
            })
            .collect()
    }
}

fn interrupted() -> CycleOutcome {
    debug!("cycle interrupted by shutdown");
    CycleOutcome {
        interrupted: true,
        ..CycleOutcome::default()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::testing::{
        controller_handle, mount_pump_status, mount_relay, mount_sys, mount_zones, options,
        pump_handle, shelly,
    };
    use crate::devices::FetchOptions;
    use crate::fetcher::testing::ManualClock;
    use crate::state::{EventKind, SystemState};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn opts() -> FetchOptions {
        options(ManualClock::new())
    }

    fn controller(server: &MockServer, name: &str) -> IrrigationController {
        IrrigationController::new(controller_handle(name, 0), &shelly(server), &opts())
    }

    fn pump(server: &MockServer, failsafe: Option<u32>) -> PumpRelay {
        PumpRelay::new(pump_handle(failsafe, 0), shelly(server), &opts())
    }

    fn control(
        controllers: Vec<IrrigationController>,
        pump: Option<PumpRelay>,
    ) -> (ControlLoop, SharedState) {
        let shared = SystemState::shared(Vec::new());
        let cl = ControlLoop::new(controllers, pump, 10, Duration::from_millis(10), shared.clone());
        (cl, shared)
    }

    async fn relay_calls(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/relay/0")
            .count()
    }

    async fn events_of(shared: &SharedState, kind: EventKind) -> Vec<String> {
        let st = shared.read().await;
        st.to_status()
            .events
            .into_iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.detail)
            .collect()
    }

    /// Zone 202 reports `true` for the first `n` polls, then falls back to
    /// the idle mocks.
    async fn mount_zone_active_for(server: &MockServer, n: u64) {
        Mock::given(method("GET"))
            .and(path("/rpc/Boolean.GetStatus"))
            .and(query_param("id", "202"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 202, "value": true})))
            .up_to_n_times(n)
            .with_priority(1)
            .mount(server)
            .await;
        mount_zones(server, &[false; 6]).await;
    }

    // -- Activation -------------------------------------------------------

    #[tokio::test]
    async fn active_zone_turns_pump_on() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        mount_pump_status(&server, false).await;
        mount_zones(&server, &[false, false, true, false, false, false]).await;
        mount_relay(&server, 30, 1).await;

        let (mut cl, shared) = control(vec![controller(&server, "Front")], Some(pump(&server, Some(30))));
        let out = cl.tick().await;

        assert!(out.zone_active);
        assert!(out.pump_commanded);
        assert!(out.pump_active);
        assert!(!out.any_error);

        let st = shared.read().await;
        assert!(st.pump_active);
        assert_eq!(st.controllers.len(), 1);
        assert!(st.pump.as_ref().unwrap().relay.is_some());
    }

    #[tokio::test]
    async fn relay_is_commanded_once_per_cycle() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        mount_pump_status(&server, false).await;
        mount_zones(&server, &[true; 6]).await;
        mount_relay(&server, 30, 3).await;

        let (mut cl, _shared) = control(
            vec![controller(&server, "a"), controller(&server, "b"), controller(&server, "c")],
            Some(pump(&server, Some(30))),
        );

        for cycle in 1..=3 {
            cl.tick().await;
            assert_eq!(relay_calls(&server).await, cycle);
        }
    }

    #[tokio::test]
    async fn every_controller_is_polled_after_activation() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        mount_pump_status(&server, false).await;
        mount_zones(&server, &[true; 6]).await;
        mount_relay(&server, 30, 1).await;

        let (mut cl, shared) = control(
            vec![controller(&server, "a"), controller(&server, "b")],
            Some(pump(&server, Some(30))),
        );
        cl.tick().await;

        let zone_calls = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/rpc/Boolean.GetStatus")
            .count();
        assert_eq!(zone_calls, 12);
        assert!(shared.read().await.controllers.iter().all(|c| c.zone_active));
    }

    #[tokio::test]
    async fn idle_zones_send_no_command() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        mount_pump_status(&server, false).await;
        mount_zones(&server, &[false; 6]).await;
        mount_relay(&server, 30, 0).await;

        let (mut cl, _shared) = control(vec![controller(&server, "a")], Some(pump(&server, Some(30))));
        let out = cl.tick().await;
        assert!(!out.pump_commanded);
        assert!(!out.pump_active);
    }

    #[tokio::test]
    async fn pump_without_failsafe_uses_default() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        mount_pump_status(&server, false).await;
        mount_zones(&server, &[true, false, false, false, false, false]).await;
        mount_relay(&server, 10, 1).await;

        let (mut cl, _shared) = control(vec![controller(&server, "a")], Some(pump(&server, None)));
        assert!(cl.tick().await.pump_commanded);
    }

    // -- Transitions ------------------------------------------------------

    #[tokio::test]
    async fn pump_transition_logged_once_each_way() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        mount_pump_status(&server, false).await;
        mount_zone_active_for(&server, 2).await;
        mount_relay(&server, 30, 2).await;

        let (mut cl, shared) = control(vec![controller(&server, "a")], Some(pump(&server, Some(30))));
        let active: Vec<bool> = {
            let mut v = Vec::new();
            for _ in 0..4 {
                v.push(cl.tick().await.pump_active);
            }
            v
        };

        assert_eq!(active, [true, true, false, false]);
        // Newest first.
        assert_eq!(events_of(&shared, EventKind::Pump).await, ["pump OFF", "pump ON"]);
    }

    #[tokio::test]
    async fn first_observation_is_logged() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        mount_pump_status(&server, false).await;
        mount_zones(&server, &[false; 6]).await;

        let (mut cl, shared) = control(vec![controller(&server, "a")], Some(pump(&server, Some(30))));
        cl.tick().await;
        cl.tick().await;

        assert_eq!(events_of(&shared, EventKind::Pump).await, ["pump OFF"]);
        assert_eq!(events_of(&shared, EventKind::System).await, ["all devices healthy"]);
    }

    #[tokio::test]
    async fn error_transition_logged_once_each_way() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rpc/Sys.GetStatus"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        mount_sys(&server).await;
        mount_zones(&server, &[false; 6]).await;

        let (mut cl, shared) = control(vec![controller(&server, "Back Beds")], None);
        let errors: Vec<bool> = {
            let mut v = Vec::new();
            for _ in 0..4 {
                v.push(cl.tick().await.any_error);
            }
            v
        };

        assert_eq!(errors, [true, true, false, false]);
        let logged = events_of(&shared, EventKind::Error).await;
        assert_eq!(logged.len(), 1);
        assert!(logged[0].contains("Back Beds") && logged[0].contains("HTTP 503"), "got: {logged:?}");
        assert_eq!(events_of(&shared, EventKind::System).await, ["all devices healthy"]);
    }

    #[tokio::test]
    async fn http_500_does_not_stop_the_loop() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        mount_pump_status(&server, false).await;
        Mock::given(method("GET"))
            .and(path("/rpc/Boolean.GetStatus"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(6)
            .with_priority(1)
            .mount(&server)
            .await;
        mount_zones(&server, &[false, false, true, false, false, false]).await;
        mount_relay(&server, 30, 1).await;

        let (mut cl, _shared) = control(vec![controller(&server, "a")], Some(pump(&server, Some(30))));

        let first = cl.tick().await;
        assert!(first.any_error);
        assert!(!first.zone_active);
        assert!(!first.pump_commanded);

        let second = cl.tick().await;
        assert!(!second.any_error);
        assert!(second.pump_active);
    }

    #[tokio::test]
    async fn malformed_zone_value_is_contained() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        Mock::given(method("GET"))
            .and(path("/rpc/Boolean.GetStatus"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": "banana"})))
            .mount(&server)
            .await;

        let (mut cl, shared) = control(vec![controller(&server, "a")], None);
        let out = cl.tick().await;
        assert!(out.any_error);
        assert!(!out.zone_active);

        let st = shared.read().await;
        let err = &st.controllers[0].error;
        assert!(err.message.as_deref().unwrap().contains("type mismatch"));
    }

    #[tokio::test]
    async fn slow_pump_refresh_does_not_flap() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        Mock::given(method("GET"))
            .and(path("/rpc/Switch.GetStatus"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 0, "output": false})))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        mount_pump_status(&server, true).await;
        // Zone 202: idle, then active for one poll, then idle again.
        Mock::given(method("GET"))
            .and(path("/rpc/Boolean.GetStatus"))
            .and(query_param("id", "202"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 202, "value": false})))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rpc/Boolean.GetStatus"))
            .and(query_param("id", "202"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 202, "value": true})))
            .up_to_n_times(1)
            .with_priority(2)
            .mount(&server)
            .await;
        mount_zones(&server, &[false; 6]).await;
        mount_relay(&server, 30, 1).await;

        // Pump refreshes every 10s, the loop ticks every 5s.
        let clock = ManualClock::new();
        let opts = options(clock.clone());
        let zones = IrrigationController::new(controller_handle("a", 0), &shelly(&server), &opts);
        let pump = PumpRelay::new(pump_handle(Some(30), 10), shelly(&server), &opts);
        let (mut cl, shared) = control(vec![zones], Some(pump));

        let mut cycles = Vec::new();
        for _ in 0..4 {
            let out = cl.tick().await;
            cycles.push((out.zone_active, out.pump_active));
            clock.advance(Duration::from_secs(5));
        }

        assert_eq!(cycles, [(false, false), (true, true), (false, true), (false, true)]);
        assert_eq!(events_of(&shared, EventKind::Pump).await, ["pump ON", "pump OFF"]);
    }

    // -- No pump ----------------------------------------------------------

    #[tokio::test]
    async fn active_zone_without_pump_warns_once() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        mount_zones(&server, &[true, false, false, false, false, false]).await;

        let (mut cl, shared) = control(vec![controller(&server, "a")], None);
        for _ in 0..3 {
            let out = cl.tick().await;
            assert!(out.zone_active);
            assert!(!out.pump_commanded);
            assert!(!out.pump_active);
        }

        let system = events_of(&shared, EventKind::System).await;
        let warnings = system.iter().filter(|d| d.contains("no pump relay")).count();
        assert_eq!(warnings, 1);
        assert!(events_of(&shared, EventKind::Pump).await.is_empty());
        assert_eq!(relay_calls(&server).await, 0);
    }

    // -- Run / cancel -----------------------------------------------------

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        mount_zones(&server, &[false; 6]).await;

        let (cl, shared) = control(vec![controller(&server, "a")], None);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(cl.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop exits after cancel")
            .unwrap();

        let st = shared.read().await;
        assert!(st.last_cycle.is_some());
        let system: Vec<_> = st.events.iter().map(|e| e.detail.as_str()).collect();
        assert_eq!(system.first(), Some(&"control loop started (1 controllers, pump not configured)"));
        assert_eq!(system.last(), Some(&"control loop stopped"));
    }

    #[tokio::test]
    async fn cancel_interrupts_a_slow_cycle() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        Mock::given(method("GET"))
            .and(path("/rpc/Boolean.GetStatus"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"value": false}))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let (mut cl, shared) = control(
            vec![controller(&server, "a"), controller(&server, "b"), controller(&server, "c")],
            None,
        );
        let cancel = CancellationToken::new();
        cl.cancel = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let out = tokio::time::timeout(Duration::from_secs(1), cl.tick())
            .await
            .expect("tick returns promptly after cancel");

        assert!(out.interrupted);
        assert!(shared.read().await.last_cycle.is_none());
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_no_cycle() {
        let server = MockServer::start().await;
        let (cl, shared) = control(vec![controller(&server, "a")], None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        cl.run(cancel).await;

        assert!(shared.read().await.last_cycle.is_none());
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
