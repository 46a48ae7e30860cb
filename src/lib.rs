//! Post Relay: rule-driven chat message forwarding.

pub mod channels;
pub mod config;
pub mod control;
pub mod error;
pub mod filters;
pub mod pipeline;
pub mod relay;
pub mod store;
