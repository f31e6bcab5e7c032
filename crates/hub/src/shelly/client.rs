use std::marker::PhantomData;
use std::time::Duration;

use serde_json::Value;
use tracing::trace;

use super::components::{FromPayload, RelayState};
use crate::fetcher::{Endpoint, FetchError};

/// Build the shared HTTP client. Every request is bounded by `timeout`; a
/// timed-out request is an ordinary fetch failure.
pub fn build_http(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
}

// ---------------------------------------------------------------------------
// ShellyClient
// ---------------------------------------------------------------------------

/// Plain-HTTP client for one device. Cheap to clone; clones share the
/// underlying connection pool.
#[derive(Clone)]
pub struct ShellyClient {
    http: reqwest::Client,
    base_url: String,
}

impl ShellyClient {
    /// Client for a device reachable at `http://{ip}`.
    pub fn new(http: reqwest::Client, ip: &str) -> Self {
        Self::with_base_url(http, format!("http://{ip}"))
    }

    pub fn with_base_url(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Endpoint for an RPC method, e.g. `rpc("Boolean.GetStatus", Some(200))`.
    pub fn rpc<T>(&self, method: &str, id: Option<u16>) -> RpcEndpoint<T> {
        let path = match id {
            Some(id) => format!("/rpc/{method}?id={id}"),
            None => format!("/rpc/{method}"),
        };
        RpcEndpoint {
            client: self.clone(),
            path,
            _payload: PhantomData,
        }
    }

    /// Switch relay 0 on with a hardware auto-off timer of `timer_secs`.
    pub async fn relay_on(&self, timer_secs: u32) -> Result<RelayState, FetchError> {
        let body = self
            .get_json(&format!("/relay/0?turn=on&timer={timer_secs}"))
            .await?;
        Ok(RelayState::from_payload(&body)?)
    }

    async fn get_json(&self, path: &str) -> Result<Value, FetchError> {
        let url = format!("{}{path}", self.base_url);
        trace!(%url, "GET");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// RpcEndpoint
// ---------------------------------------------------------------------------

/// A GET endpoint whose JSON body decodes into `T`.
pub struct RpcEndpoint<T> {
    client: ShellyClient,
    path: String,
    _payload: PhantomData<fn() -> T>,
}

impl<T> RpcEndpoint<T> {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl<T> Endpoint for RpcEndpoint<T>
where
    T: FromPayload + Send + Sync,
{
    type Output = T;

    fn describe(&self) -> String {
        format!("{}{}", self.client.base_url(), self.path())
    }

    async fn fetch(&self) -> Result<T, FetchError> {
        let body = self.client.get_json(&self.path).await?;
        Ok(T::from_payload(&body)?)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
