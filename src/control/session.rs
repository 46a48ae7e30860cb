//! Operator session state and command parsing.

use serde::{Deserialize, Serialize};

/// What the control panel is waiting for.
///
/// Idle → AwaitingRulesCsv on `cmd:import rules`, back to Idle once a CSV
/// document has been processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingRulesCsv,
}

impl SessionState {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Idle, AwaitingRulesCsv) | (AwaitingRulesCsv, Idle)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingRulesCsv => "awaiting_rules_csv",
        };
        write!(f, "{s}")
    }
}

/// The operator's conversation with the relay.
#[derive(Debug, Clone, Default)]
pub struct OperatorSession {
    state: SessionState,
}

impl OperatorSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_awaiting_csv(&self) -> bool {
        self.state == SessionState::AwaitingRulesCsv
    }

    /// Move to `target`. Re-entering the current state is a no-op.
    pub fn transition(&mut self, target: SessionState) -> Result<(), String> {
        if self.state == target {
            return Ok(());
        }
        if !self.state.can_transition_to(target) {
            return Err(format!("Cannot transition from {} to {}", self.state, target));
        }
        self.state = target;
        Ok(())
    }
}

/// A recognised control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    MyDialogs,
    ExportRules,
    ImportRules,
    RestartReload,
    Enable(i64),
    Disable(i64),
}

impl Command {
    /// Parse operator text. Matching ignores case and all spaces, so
    /// `cmd:My Dialogs` and `CMD:mydialogs` are the same command.
    pub fn parse(text: &str) -> Option<Self> {
        let normalized: String = text
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "help" => Some(Self::Help),
            "cmd:mydialogs" => Some(Self::MyDialogs),
            "cmd:exportrules" => Some(Self::ExportRules),
            "cmd:importrules" => Some(Self::ImportRules),
            "cmd:restartreload" => Some(Self::RestartReload),
            other => {
                if let Some(uid) = other.strip_prefix("cmd:enable") {
                    uid.parse().ok().map(Self::Enable)
                } else if let Some(uid) = other.strip_prefix("cmd:disable") {
                    uid.parse().ok().map(Self::Disable)
                } else {
                    None
                }
            }
        }
    }
}
