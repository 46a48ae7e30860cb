//! Sender identity matching.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of whoever posted a message, as reported by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

impl SenderInfo {
    /// Whether the transport reported nothing usable about the sender.
    pub fn is_empty(&self) -> bool {
        self.id == 0
            && self.username.is_empty()
            && self.first_name.is_empty()
            && self.last_name.is_empty()
    }

    /// `@username`, or an empty string when there is none.
    pub fn handle(&self) -> String {
        let name = strip_at(&self.username);
        if name.is_empty() {
            String::new()
        } else {
            format!("@{name}")
        }
    }
}

impl fmt::Display for SenderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id:{} uname:'{}' fname:'{}' lname:'{}'",
            self.id, self.username, self.first_name, self.last_name
        )
    }
}

/// A rule's constraint on who may have posted the message.
/// Zero or empty fields mean "don't care".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderConstraint {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

/// Outcome of a sender check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderVerdict {
    /// The rule does not constrain the sender.
    Unconstrained,
    /// The message carries no sender, so it cannot be checked.
    Unknown,
    /// At least one constraint field matched.
    Matched,
    /// Nothing matched.
    Rejected,
}

impl SenderVerdict {
    pub fn is_match(self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

impl SenderConstraint {
    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        self.id == 0
            && self.username.is_empty()
            && self.first_name.is_empty()
            && self.last_name.is_empty()
    }

    /// Check an observed sender. The first true branch wins.
    pub fn check(&self, observed: Option<&SenderInfo>) -> SenderVerdict {
        if self.is_empty() {
            return SenderVerdict::Unconstrained;
        }
        let Some(observed) = observed.filter(|s| !s.is_empty()) else {
            return SenderVerdict::Unknown;
        };

        let id_matches = self.id != 0 && self.id == observed.id;
        let username_matches = !strip_at(&self.username).is_empty()
            && strip_at(&self.username) == strip_at(&observed.username);
        let first_matches = !self.first_name.is_empty() && self.first_name == observed.first_name;
        let last_matches = !self.last_name.is_empty() && self.last_name == observed.last_name;
        let full_name_matches = !self.first_name.is_empty()
            && !self.last_name.is_empty()
            && first_matches
            && last_matches;

        if id_matches || username_matches || full_name_matches || first_matches || last_matches {
            SenderVerdict::Matched
        } else {
            SenderVerdict::Rejected
        }
    }
}

fn strip_at(username: &str) -> &str {
    username.trim().trim_start_matches('@')
}
