//! portguard: host-based port scan sensor
//!
//! Reads raw IPv4 TCP or UDP traffic addressed to the local host,
//! classifies scan-style probes (NULL, XMAS, SYN, UDP), verifies the probed
//! port is not a legitimately open service, tracks distinct probed ports
//! per source, and fires configured blocking reactions the first time a
//! source crosses the scan threshold.

pub mod classify;
pub mod config;
pub mod error;
pub mod guard;
pub mod packet;
pub mod react;
pub mod sink;
pub mod state;
pub mod verify;

pub use classify::{classify, ScanType};
pub use config::{Config, Protocol};
pub use error::{GuardError, Result};
pub use guard::{GuardLoop, PacketSource, RawPacket, RawSource};
pub use react::{Dispatcher, KillReactions};
pub use sink::{EventSink, LogSink};
pub use state::{ScanOutcome, ScanStateEngine};
pub use verify::{BindProber, PortProber, PortVerifier};
