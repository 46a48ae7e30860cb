//! Forwarding and bleep rule records.
//!
//! These mirror the persisted rows one-to-one. The router compiles them
//! into a snapshot; nothing here evaluates messages.

use serde::{Deserialize, Serialize};

use crate::filters::SenderConstraint;

/// Title that marks the trash-bin pseudo-rule.
pub const TRASH_BIN_TITLE: &str = "__trash_bin__";

/// Status value that enables a rule.
pub const STATUS_ACTIVE: &str = "active";

/// Default format when a rule leaves it empty.
pub const DEFAULT_FORMAT: &str = "m";

/// Default bleep symbol.
pub const DEFAULT_BLEEP_SYMBOL: char = '*';

/// A donor → recipient forwarding rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Storage key; 0 until persisted.
    pub uid: i64,
    pub recip_name: String,
    pub recip_id: i64,
    pub donor_name: String,
    pub donor_id: i64,
    pub sender_fname: String,
    pub sender_lname: String,
    pub sender_uname: String,
    pub sender_id: i64,
    /// Filter expression, see [`crate::filters::expression`].
    pub filter: String,
    /// `|`-separated forbidden words.
    pub black_list: String,
    /// `+`-separated required words.
    pub and_list: String,
    /// `|`-separated words, at least one required.
    pub or_list: String,
    /// Subset of `t`, `d`, `s`, `m`.
    pub format: String,
    pub title: String,
    /// `active` enables the rule; anything else disables it.
    pub status: String,
    /// Owner of the rule.
    pub user_id: i64,
}

impl Rule {
    pub fn is_active(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case(STATUS_ACTIVE)
    }

    /// Whether this row only describes the trash bin.
    pub fn is_trash_bin(&self) -> bool {
        self.title == TRASH_BIN_TITLE
    }

    /// The rule's sender constraint.
    pub fn sender_constraint(&self) -> SenderConstraint {
        SenderConstraint {
            id: self.sender_id,
            username: self.sender_uname.clone(),
            first_name: self.sender_fname.clone(),
            last_name: self.sender_lname.clone(),
        }
    }

    /// Label used in logs and operator reports.
    pub fn label(&self) -> &str {
        if self.title.is_empty() {
            &self.filter
        } else {
            &self.title
        }
    }

    /// One-line description for the operator channel.
    pub fn summary(&self) -> String {
        format!(
            "#{} {} ({}) → {} ({}) flt:'{}' bl:'{}' and:'{}' or:'{}' fmt:'{}' [{}]",
            self.uid,
            self.donor_name,
            self.donor_id,
            self.recip_name,
            self.recip_id,
            self.filter,
            self.black_list,
            self.and_list,
            self.or_list,
            self.format,
            self.status,
        )
    }
}

/// A per-donor censorship rule. It has no recipient; it rewrites messages in
/// the donor chat itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BleepRule {
    /// Storage key; 0 until persisted.
    pub uid: i64,
    pub donor_name: String,
    pub donor_id: i64,
    /// `|`-separated forbidden words.
    pub black_list: String,
    pub status: String,
    /// Replacement character, first char used.
    pub bleep_symbol: String,
    /// Stored verbatim for interchange.
    pub bleep_action: String,
    /// Stored verbatim for interchange.
    pub action_format: String,
}

impl BleepRule {
    pub fn is_active(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case(STATUS_ACTIVE)
    }

    /// The character words are replaced with.
    pub fn symbol(&self) -> char {
        self.bleep_symbol
            .chars()
            .find(|c| !c.is_whitespace())
            .unwrap_or(DEFAULT_BLEEP_SYMBOL)
    }
}
