//! HTTP client for formatting requests against a running daemon.

use std::time::Duration;

use super::health::base_url;
use super::protocol::{FormatOptions, FormatOutcome, CONTENT_TYPE};
use crate::utils::Result;

/// Formatting a large module can take a while; don't hang forever though.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the daemon's formatting endpoint.
///
/// # Example
/// ```no_run
/// use sublack::daemon::client::FormatClient;
/// use sublack::daemon::protocol::FormatOptions;
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = FormatClient::new("localhost", 45484)?;
/// let outcome = client.format("x=1", &FormatOptions::default()).await;
/// println!("{}", outcome.message());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FormatClient {
    client: reqwest::Client,
    host: String,
    port: u16,
}

impl FormatClient {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let client = reqwest::Client::builder().no_proxy().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, host: host.to_string(), port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Send `content` to the daemon.
    ///
    /// Transport problems are folded into [`FormatOutcome::Failed`] so the
    /// caller always gets something to show.
    pub async fn format(&self, content: &str, options: &FormatOptions) -> FormatOutcome {
        let mut request = self
            .client
            .post(base_url(&self.host, self.port))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(content.to_string());
        for (name, value) in options.headers() {
            request = request.header(name, value);
        }
        tracing::debug!("headers: {:?}", options.headers());

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_connect() => {
                let msg = format!(
                    "daemon not running on port {}, you can start it with `sublack daemon start`",
                    self.port
                );
                tracing::error!("{msg}");
                return FormatOutcome::Failed(msg);
            }
            Err(e) => {
                tracing::error!("Request to daemon failed: {e}");
                return FormatOutcome::Failed(e.to_string());
            }
        };

        let status = response.status().as_u16();
        tracing::debug!("Response status code: {status}");
        match response.text().await {
            Ok(body) => FormatOutcome::from_response(status, body),
            Err(e) => FormatOutcome::Failed(format!("unreadable daemon response: {e}")),
        }
    }
}
