//! Node configuration.
//!
//! Explicit and immutable after construction; only the gossip interval is
//! runtime-adjustable, and it lives behind its own lock on the node. All
//! intervals are in seconds, mirroring how deployments configure them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// CA endpoint for certificate requests. Unused by nodes constructed
    /// with an in-process [`crate::ca::LocalCa`].
    pub ca_addr: Option<String>,
    /// Seconds between gossip ticks.
    pub gossip_interval: u64,
    /// Seconds between monitor ticks.
    pub monitor_interval: u64,
    /// Seconds between timeout sweeps.
    pub view_update_interval: u64,
    /// Consecutive ping failures before the target is accused.
    pub ping_limit: u32,
    /// Probes issued per monitor tick.
    pub pings_per_interval: u32,
    /// Seconds an accused peer has to rebut before eviction.
    pub removal_timeout: u64,
    /// Cap on parallel gossip targets per tick.
    pub max_concurrent_messages: usize,
    /// Transport compression toggle. The QUIC channel currently sends
    /// uncompressed; the key is kept for configuration compatibility.
    pub use_compression: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ca_addr: None,
            gossip_interval: 10,
            monitor_interval: 10,
            view_update_interval: 10,
            ping_limit: 3,
            pings_per_interval: 3,
            removal_timeout: 60,
            max_concurrent_messages: 5,
            use_compression: true,
        }
    }
}

impl Config {
    pub fn gossip_interval(&self) -> Duration {
        Duration::from_secs(self.gossip_interval)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval)
    }

    pub fn view_update_interval(&self) -> Duration {
        Duration::from_secs(self.view_update_interval)
    }

    pub fn removal_timeout(&self) -> Duration {
        Duration::from_secs(self.removal_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_table() {
        let config = Config::default();
        assert_eq!(config.gossip_interval, 10);
        assert_eq!(config.monitor_interval, 10);
        assert_eq!(config.view_update_interval, 10);
        assert_eq!(config.ping_limit, 3);
        assert_eq!(config.pings_per_interval, 3);
        assert_eq!(config.removal_timeout, 60);
        assert_eq!(config.max_concurrent_messages, 5);
        assert!(config.use_compression);
        assert!(config.ca_addr.is_none());
    }
}
