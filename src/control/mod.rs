//! Operator control panel.
//!
//! The control chat is a command console, not a routed source: messages in
//! it are parsed as commands or, while an import is pending, as rule files.

pub mod panel;
pub mod session;

pub use panel::ControlPanel;
pub use session::{Command, OperatorSession, SessionState};
