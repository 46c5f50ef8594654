//! Connectivity checks consulted before each sync pass.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

pub trait NetworkMonitor: Send + Sync {
    /// `true` when the remote API is worth trying.
    fn is_online(&self) -> impl Future<Output = bool> + Send;
}

/// Connectivity flag set by the platform layer (or by tests).
#[derive(Debug, Clone)]
pub struct ManualNetworkMonitor {
    online: Arc<AtomicBool>,
}

impl ManualNetworkMonitor {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }
}

impl Default for ManualNetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkMonitor for ManualNetworkMonitor {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }
}

/// Treats the network as up when a TCP connection to the API host succeeds.
#[derive(Debug, Clone)]
pub struct ReachabilityProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl ReachabilityProbe {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    /// Probe the host and port of an API base URL. `None` if the URL has no host.
    pub fn for_url(base_url: &str, timeout: Duration) -> Option<Self> {
        let url = reqwest::Url::parse(base_url).ok()?;
        let host = url.host_str()?.to_string();
        let port = url.port_or_known_default()?;
        Some(Self::new(host, port, timeout))
    }

    pub fn target(&self) -> (&str, u16) {
        (&self.host, self.port)
    }
}

impl NetworkMonitor for ReachabilityProbe {
    async fn is_online(&self) -> bool {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(host = %self.host, port = self.port, error = %e, "Reachability probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(host = %self.host, port = self.port, "Reachability probe timed out");
                false
            }
        }
    }
}
