//! Daemon reachability checks.
//!
//! The daemon offers no readiness file and no stdout contract, so readiness
//! is observed the only way available: by polling its HTTP endpoint.

use serde::Serialize;
use std::time::Duration;

use super::protocol::{PROBE_BODY, PROBE_EXPECTED};
use crate::utils::Result;

/// Upper bound for a single liveness request.
const PING_TIMEOUT: Duration = Duration::from_secs(1);

/// What currently answers on a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortState {
    /// Connection refused: nothing is bound.
    Free,
    /// The formatting daemon answers.
    Daemon,
    /// Something else holds the port.
    Occupied,
}

#[derive(Debug, Clone)]
pub struct HealthChecker {
    client: reqwest::Client,
}

impl HealthChecker {
    pub fn new() -> Result<Self> {
        // Never route loopback probes through a proxy from the environment.
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self { client })
    }

    /// Single liveness probe: any HTTP response counts, even an error status.
    pub async fn ping(&self, host: &str, port: u16) -> bool {
        match self.client.post(base_url(host, port)).timeout(PING_TIMEOUT).send().await {
            Ok(response) => {
                tracing::debug!("{host}:{port} answered with {}", response.status());
                true
            }
            Err(e) => {
                tracing::debug!("{host}:{port} not reachable: {e}");
                false
            }
        }
    }

    /// Poll until the daemon answers or `timeout` elapses.
    ///
    /// Failed attempts sleep `poll_interval` before retrying; the total time
    /// spent never exceeds `timeout`.
    pub async fn is_running(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
        poll_interval: Duration,
    ) -> bool {
        let poll = async {
            let mut attempts = 0u32;
            loop {
                attempts += 1;
                if self.ping(host, port).await {
                    tracing::debug!("{host}:{port} reachable after {attempts} attempt(s)");
                    return;
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        if tokio::time::timeout(timeout, poll).await.is_ok() {
            true
        } else {
            tracing::debug!("{host}:{port} still unreachable after {timeout:?}");
            false
        }
    }

    /// Classify what is listening on `port`.
    ///
    /// A refused connection means the port is free. Otherwise the daemon is
    /// recognised by how it formats a tiny known snippet; any other answer, or
    /// none within `timeout`, means an unrelated program owns the port.
    pub async fn probe_port(&self, host: &str, port: u16, timeout: Duration) -> PortState {
        let response = self
            .client
            .post(base_url(host, port))
            .body(PROBE_BODY)
            .timeout(timeout)
            .send()
            .await;

        let state = match response {
            Err(e) if e.is_connect() => PortState::Free,
            Err(e) => {
                tracing::debug!("Probe of {host}:{port} failed: {e}");
                PortState::Occupied
            }
            Ok(response) => match response.text().await {
                Ok(body) if body == PROBE_EXPECTED => PortState::Daemon,
                Ok(body) => {
                    tracing::debug!("Unexpected probe answer on {host}:{port}: {body:?}");
                    PortState::Occupied
                }
                Err(_) => PortState::Occupied,
            },
        };
        tracing::debug!("Port {port} on {host} is {state:?}");
        state
    }
}

pub(crate) fn base_url(host: &str, port: u16) -> String {
    format!("http://{host}:{port}/")
}
