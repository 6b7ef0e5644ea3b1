//! # SIO bridge
//!
//! Presents a remote peripheral emulator to the host's serial bus as if it
//! were attached locally. One [`Bus`] owns one [`Bridge`]; the bridge owns
//! the link to the peer, the handshake/credit [`Session`] and the [`Relay`]
//! engine that correlates each bus transaction with the peer's answer.
//! Devices the peer does not serve can fall back to [`LocalStorage`].

pub mod bridge;
pub mod bus;
mod clock;
pub mod command;
mod config;
mod error;
mod link;
pub mod relay;
pub mod router;
mod session;
pub mod storage;

pub use bridge::{Bridge, HostSignals, PumpReport, ResetKind};
pub use bus::{Bus, Phase, Tick};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{checksum, fold, CommandFrame, Direction};
pub use config::{BridgeConfig, RouterConfig, DEFAULT_CREDIT_GRANT, DEFAULT_RELAY_DEVICE};
pub use error::{BusError, NoCreditsError, RelayError, StorageError};
pub use link::Link;
pub use relay::{AckStatus, PendingTransaction, Relay, RelayOutcome, Transaction};
pub use router::{route, Route};
pub use session::{HandshakeState, Session};
pub use storage::{DiskSet, LocalStorage, NoStorage, RawImage};
