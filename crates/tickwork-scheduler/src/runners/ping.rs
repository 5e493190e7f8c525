use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use super::RunReport;

/// Reachability probe seam; returns the HTTP status code of the response.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str, timeout: Duration) -> Result<u16, String>;
}

/// GET-based prober on a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tickwork/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str, timeout: Duration) -> Result<u16, String> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Ok(resp.status().as_u16())
    }
}

/// Probe `url` under a hard timeout and judge the status.
pub async fn run_ping(
    prober: &dyn Prober,
    url: &str,
    expected_status: Option<u16>,
    timeout: Duration,
) -> RunReport {
    let started = Instant::now();
    let result = tokio::time::timeout(timeout, prober.probe(url, timeout)).await;
    let elapsed_ms = started.elapsed().as_millis();

    match result {
        Err(_) => RunReport::failed(format!("Timed out after {}s", timeout.as_secs())),
        Ok(Err(e)) => RunReport::failed(format!("Request failed: {e}")),
        Ok(Ok(status)) => {
            let acceptable = match expected_status {
                Some(expected) => status == expected,
                None => (200..300).contains(&status),
            };
            debug!(url, status, acceptable, "ping completed");
            let message = format!("HTTP {status} in {elapsed_ms}ms");
            if acceptable {
                RunReport::ok(message)
            } else {
                RunReport::failed(message)
            }
        }
    }
}
