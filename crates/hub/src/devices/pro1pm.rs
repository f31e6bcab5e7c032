//! Shelly Pro 1PM driving the irrigation pump.
//!
//! The pump is only ever switched *on*, always with a hardware auto-off
//! timer. Turning it off is left to the device: when the hub stops renewing
//! the timer, the relay drops once the failsafe period runs out.

use serde::Serialize;

use super::{fetch_error, CachedRpc, ControllerError, Device, FetchOptions};
use crate::registry::DeviceHandle;
use crate::shelly::{RelayState, ShellyClient, SwitchConfig, SwitchStatus, SysStatus};

const SWITCH_ID: u16 = 0;

pub struct PumpRelay {
    handle: DeviceHandle,
    client: ShellyClient,
    sys: CachedRpc<SysStatus>,
    switch_config: CachedRpc<SwitchConfig>,
    switch_status: CachedRpc<SwitchStatus>,
    /// Relay state returned by this cycle's activation, if one was sent.
    commanded: Option<RelayState>,
    relay_error: Option<String>,
    error: ControllerError,
}

#[derive(Debug, Clone, Serialize)]
pub struct PumpSnapshot {
    pub device: DeviceHandle,
    pub error: ControllerError,
    pub active: bool,
    pub relay: Option<RelayState>,
    pub switch_status: Option<SwitchStatus>,
    pub switch_config: Option<SwitchConfig>,
    pub sys: Option<SysStatus>,
}

impl PumpRelay {
    pub fn new(handle: DeviceHandle, client: ShellyClient, opts: &FetchOptions) -> Self {
        let interval = handle.interval;
        Self {
            sys: opts.cached(client.rpc("Sys.GetStatus", None), interval),
            switch_config: opts.cached(client.rpc("Switch.GetConfig", Some(SWITCH_ID)), interval),
            switch_status: opts.cached(client.rpc("Switch.GetStatus", Some(SWITCH_ID)), interval),
            handle,
            client,
            commanded: None,
            relay_error: None,
            error: ControllerError::default(),
        }
    }

    /// Auto-off duration configured for this pump, if any.
    pub fn failsafe_seconds(&self) -> Option<u32> {
        self.handle.failsafe_seconds
    }

    /// Start a new cycle: forget the previous activation and refresh the
    /// status endpoints that are due.
    pub async fn poll_status(&mut self) {
        self.commanded = None;
        self.relay_error = None;

        self.sys.get().await;
        self.switch_config.get().await;
        self.switch_status.get().await;

        self.refresh_error();
    }

    /// Switch the relay on with a `failsafe_seconds` hardware timer. Never
    /// cached: every call sends the command and renews the timer.
    pub async fn activate_relay(&mut self, failsafe_seconds: u32) -> Option<&RelayState> {
        // The cached switch output predates the command; re-read it next poll.
        self.switch_status.invalidate();
        match self.client.relay_on(failsafe_seconds).await {
            Ok(state) => {
                self.commanded = Some(state);
                self.relay_error = None;
            }
            Err(e) => {
                self.relay_error = Some(format!("relay activation: {e}"));
            }
        }
        self.refresh_error();
        self.commanded.as_ref()
    }

    /// Whether the pump is running: the state reported by this cycle's
    /// activation if one was sent, else the cached switch output.
    pub fn is_active(&self) -> bool {
        self.commanded
            .as_ref()
            .and_then(|r| r.is_on)
            .or_else(|| self.switch_status.peek().and_then(|s| s.output))
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> PumpSnapshot {
        PumpSnapshot {
            device: self.handle.clone(),
            error: self.error.clone(),
            active: self.is_active(),
            relay: self.commanded.clone(),
            switch_status: self.switch_status.peek().cloned(),
            switch_config: self.switch_config.peek().cloned(),
            sys: self.sys.peek().cloned(),
        }
    }

    fn refresh_error(&mut self) {
        self.error = ControllerError::first_of([
            self.relay_error.as_deref(),
            fetch_error(&self.sys),
            fetch_error(&self.switch_config),
            fetch_error(&self.switch_status),
        ]);
    }
}

impl Device for PumpRelay {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::testing::{mount_pump_status, mount_relay, mount_sys, options, pump_handle, shelly};
    use crate::fetcher::testing::ManualClock;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pump(server: &MockServer) -> PumpRelay {
        PumpRelay::new(pump_handle(Some(30), 0), shelly(server), &options(ManualClock::new()))
    }

    #[tokio::test]
    async fn idle_pump_reports_switch_output() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        mount_pump_status(&server, false).await;

        let mut p = pump(&server);
        p.poll_status().await;
        assert!(!p.is_active());
        assert!(!p.has_error());
        assert_eq!(p.failsafe_seconds(), Some(30));
    }

    #[tokio::test]
    async fn activation_sends_failsafe_timer() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        mount_pump_status(&server, false).await;
        mount_relay(&server, 30, 1).await;

        let mut p = pump(&server);
        p.poll_status().await;
        let relay = p.activate_relay(30).await.cloned().unwrap();

        assert_eq!(relay.is_on, Some(true));
        assert_eq!(relay.has_timer, Some(true));
        assert!(p.is_active(), "activation result overrides stale switch output");
    }

    #[tokio::test]
    async fn activation_is_forgotten_next_cycle() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        mount_pump_status(&server, false).await;
        mount_relay(&server, 30, 1).await;

        let mut p = pump(&server);
        p.poll_status().await;
        p.activate_relay(30).await;
        p.poll_status().await;
        assert!(!p.is_active());
        assert!(p.snapshot().relay.is_none());
    }

    #[tokio::test]
    async fn activation_refreshes_switch_status_next_cycle() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        Mock::given(method("GET"))
            .and(path("/rpc/Switch.GetStatus"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 0, "output": false})))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        mount_pump_status(&server, true).await;
        mount_relay(&server, 30, 1).await;

        // Long interval: only the activation may trigger the second read.
        let mut p = PumpRelay::new(pump_handle(Some(30), 60), shelly(&server), &options(ManualClock::new()));
        p.poll_status().await;
        assert!(!p.is_active());

        p.activate_relay(30).await;
        p.poll_status().await;
        assert!(p.is_active(), "switch output re-read after the command");
    }

    #[tokio::test]
    async fn failed_activation_sets_error() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        mount_pump_status(&server, false).await;
        Mock::given(method("GET"))
            .and(path("/relay/0"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut p = pump(&server);
        p.poll_status().await;
        assert!(p.activate_relay(30).await.is_none());
        assert!(p.has_error());
        assert!(p.error().message.as_deref().unwrap().starts_with("relay activation"));
        assert!(!p.is_active());

        // A new cycle without activation is healthy again.
        p.poll_status().await;
        assert!(!p.has_error());
    }

    #[tokio::test]
    async fn status_failure_sets_error() {
        let server = MockServer::start().await;
        mount_sys(&server).await;
        Mock::given(method("GET"))
            .and(path("/rpc/Switch.GetStatus"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rpc/Switch.GetConfig"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 0})))
            .mount(&server)
            .await;

        let mut p = pump(&server);
        p.poll_status().await;
        assert!(p.has_error());
        assert!(p.error().message.as_deref().unwrap().contains("Switch.GetStatus"));
    }
}
