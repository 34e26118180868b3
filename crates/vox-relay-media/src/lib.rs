//! Duplex audio relay between a group voice transport and an AI voice
//! endpoint.
//!
//! ```text
//! transport -> IngressAdapter -> Sequencer -> UplinkTask -> LiveSession
//! transport <- EgressAdapter  <- DownlinkTask <------------- LiveSession
//! ```

pub mod convert;
pub mod downlink;
pub mod egress;
pub mod ingress;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod sequencer;
pub mod stats;
pub mod supervisor;
pub mod uplink;

pub use egress::{EgressAdapter, VoiceSource};
pub use ingress::{IngressAdapter, VoiceSink};
pub use stats::{RelayStats, StatsSnapshot};
pub use supervisor::{RelayError, RelayHandle, RelayReport, RelayState, TaskExit, VoiceRelay};
