//! Overlay network reachability checks

use crate::config::OutgoingSettings;
use crate::error::Result;
use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

/// Anonymizing networks some providers can only be reached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayNetwork {
    Tor,
    I2p,
}

impl fmt::Display for OverlayNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tor => write!(f, "tor"),
            Self::I2p => write!(f, "i2p"),
        }
    }
}

/// Decides whether an overlay network is currently usable
#[async_trait]
pub trait ReachabilityCheck: Send + Sync {
    async fn is_reachable(&self, network: OverlayNetwork) -> bool;
}

/// Check that connects to the network's local proxy
///
/// Results are cached for a short TTL so a tier with several overlay
/// providers only connects once.
pub struct ProxyReachability {
    tor_proxy: String,
    i2p_proxy: String,
    connect_timeout: Duration,
    cache: Cache<OverlayNetwork, bool>,
}

impl ProxyReachability {
    pub fn new(settings: &OutgoingSettings) -> Result<Self> {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(settings.reachability_cache_secs.max(1)))
            .max_capacity(8)
            .build();

        Ok(Self {
            tor_proxy: settings.tor_proxy.clone(),
            i2p_proxy: settings.i2p_proxy.clone(),
            connect_timeout: settings.connect_timeout()?,
            cache,
        })
    }

    fn proxy_for(&self, network: OverlayNetwork) -> &str {
        match network {
            OverlayNetwork::Tor => &self.tor_proxy,
            OverlayNetwork::I2p => &self.i2p_proxy,
        }
    }

    async fn connect(&self, network: OverlayNetwork) -> bool {
        let Some(addr) = proxy_socket_addr(self.proxy_for(network)) else {
            debug!("No usable proxy address configured for {}", network);
            return false;
        };

        match timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("{} proxy at {} refused connection: {}", network, addr, e);
                false
            }
            Err(_) => {
                debug!("{} proxy at {} timed out", network, addr);
                false
            }
        }
    }
}

#[async_trait]
impl ReachabilityCheck for ProxyReachability {
    async fn is_reachable(&self, network: OverlayNetwork) -> bool {
        if let Some(cached) = self.cache.get(&network).await {
            return cached;
        }
        let reachable = self.connect(network).await;
        self.cache.insert(network, reachable).await;
        reachable
    }
}

/// Reachability with a fixed answer per network
#[derive(Debug, Clone, Default)]
pub struct StaticReachability {
    pub tor: bool,
    pub i2p: bool,
}

impl StaticReachability {
    pub fn all_reachable() -> Self {
        Self { tor: true, i2p: true }
    }
}

#[async_trait]
impl ReachabilityCheck for StaticReachability {
    async fn is_reachable(&self, network: OverlayNetwork) -> bool {
        match network {
            OverlayNetwork::Tor => self.tor,
            OverlayNetwork::I2p => self.i2p,
        }
    }
}

/// `socks5h://127.0.0.1:9050` -> `127.0.0.1:9050`
fn proxy_socket_addr(proxy: &str) -> Option<String> {
    let url = Url::parse(proxy).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{}:{}", host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_address_parsing() {
        assert_eq!(
            proxy_socket_addr("socks5h://127.0.0.1:9050").as_deref(),
            Some("127.0.0.1:9050")
        );
        assert_eq!(
            proxy_socket_addr("http://localhost:4444").as_deref(),
            Some("localhost:4444")
        );
        assert_eq!(proxy_socket_addr("not a url"), None);
    }

    #[tokio::test]
    async fn listening_proxy_is_reachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let settings = OutgoingSettings {
            tor_proxy: format!("socks5h://127.0.0.1:{}", port),
            i2p_proxy: "http://127.0.0.1:1".to_string(),
            connect_timeout_secs: 1.0,
            ..Default::default()
        };
        let reachability = ProxyReachability::new(&settings).unwrap();

        assert!(reachability.is_reachable(OverlayNetwork::Tor).await);
        assert!(!reachability.is_reachable(OverlayNetwork::I2p).await);
    }

    #[tokio::test]
    async fn static_answers_are_fixed() {
        let reachability = StaticReachability { tor: true, i2p: false };
        assert!(reachability.is_reachable(OverlayNetwork::Tor).await);
        assert!(!reachability.is_reachable(OverlayNetwork::I2p).await);
    }
}
