//! Message routing pipeline.
//!
//! Inbound events flow through the bleep censor, then every rule fed by the
//! source chat, then the trash-bin fallback. See [`router`] for the stages.

pub mod bleep;
pub mod format;
pub mod router;
pub mod rules;
pub mod types;

pub use router::{Router, RouterSnapshot};
pub use rules::{BleepRule, Rule};
pub use types::{ChatKind, IncomingEvent, OutgoingMessage, RouteReport};
