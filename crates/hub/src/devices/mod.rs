//! Device models built from registry handles.
//!
//! Each model owns one [`CachedEndpoint`] per remote call it makes and folds
//! their outcomes into a single per-device [`ControllerError`].

pub mod fk06x;
pub mod pro1pm;

use std::time::Duration;

use serde::Serialize;

use crate::fetcher::{CachedEndpoint, RetryPolicy, SharedClock};
use crate::registry::DeviceHandle;
use crate::shelly::RpcEndpoint;

pub use fk06x::IrrigationController;
pub use pro1pm::PumpRelay;

pub type CachedRpc<T> = CachedEndpoint<RpcEndpoint<T>>;

/// How every fetcher of a device is configured.
#[derive(Clone)]
pub struct FetchOptions {
    pub policy: RetryPolicy,
    pub clock: SharedClock,
}

impl FetchOptions {
    pub fn cached<T>(&self, endpoint: RpcEndpoint<T>, interval: Duration) -> CachedRpc<T>
    where
        T: crate::shelly::FromPayload + Send + Sync,
    {
        CachedEndpoint::new(endpoint, interval, self.policy, self.clock.clone())
    }
}

// ---------------------------------------------------------------------------
// Per-device error slot
// ---------------------------------------------------------------------------

/// Error state of one device, rebuilt on every poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ControllerError {
    pub has_error: bool,
    pub message: Option<String>,
}

impl ControllerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            has_error: true,
            message: Some(message.into()),
        }
    }

    /// The first reported message wins; no messages means healthy.
    pub fn first_of<'a>(messages: impl IntoIterator<Item = Option<&'a str>>) -> Self {
        messages
            .into_iter()
            .flatten()
            .next()
            .map(Self::failed)
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Common device surface
// ---------------------------------------------------------------------------

pub trait Device {
    fn handle(&self) -> &DeviceHandle;

    fn error(&self) -> &ControllerError;

    fn name(&self) -> &str {
        &self.handle().name
    }

    fn has_error(&self) -> bool {
        self.error().has_error
    }
}

/// Error message of a fetcher, if its last attempt failed.
fn fetch_error<T>(cached: &CachedRpc<T>) -> Option<&str>
where
    T: crate::shelly::FromPayload + Send + Sync,
{
    if cached.has_error() {
        Some(cached.last_error().unwrap_or("fetch failed"))
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================
