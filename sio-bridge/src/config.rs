//! Tunables for the bridge.

use std::collections::BTreeSet;
use std::time::Duration;

/// Device id of the network adapter that is always served by the peer
pub const DEFAULT_RELAY_DEVICE: u8 = 0x70;

/// Credits handed out per ping or credit request
pub const DEFAULT_CREDIT_GRANT: u8 = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Well-known device that is relayed whenever a peer is connected
    pub relay_device: u8,
    /// Disk units (1..=15) whose traffic goes to the peer even if a local
    /// image is configured
    pub delegated_units: BTreeSet<u8>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            relay_device: DEFAULT_RELAY_DEVICE,
            delegated_units: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub credit_grant: u8,
    /// Budget for transactions that expect only an acknowledgement
    pub ack_timeout: Duration,
    /// Budget for transactions that expect response data
    pub data_timeout: Duration,
    /// Sleep between polls while waiting for the peer
    pub poll_interval: Duration,
    /// Drop the peer after this long without hearing from it
    pub peer_idle_timeout: Option<Duration>,
    /// Data frame length for relayed sector writes
    pub relay_sector_size: usize,
    pub router: RouterConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            credit_grant: DEFAULT_CREDIT_GRANT,
            ack_timeout: Duration::from_millis(1000),
            data_timeout: Duration::from_millis(2000),
            poll_interval: Duration::from_micros(500),
            peer_idle_timeout: Some(Duration::from_secs(30)),
            relay_sector_size: 128,
            router: RouterConfig::default(),
        }
    }
}
