//! Shared types for the routing pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::filters::SenderInfo;

/// Initial reason of a message nobody has looked at yet.
pub const UNFILTERED_REASON: &str = "unfiltered";

// ── Inbound message ─────────────────────────────────────────────────

/// What kind of conversation a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
    Channel,
}

impl ChatKind {
    /// Map a Bot API chat type.
    pub fn from_api(kind: &str) -> Self {
        match kind {
            "group" | "supergroup" => Self::Group,
            "channel" => Self::Channel,
            _ => Self::Private,
        }
    }
}

impl std::fmt::Display for ChatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Private => "user",
            Self::Group => "gr",
            Self::Channel => "ch",
        };
        write!(f, "{s}")
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    /// Transport handle used to download the file.
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

impl DocumentInfo {
    /// Whether the document announces itself as CSV.
    pub fn is_csv(&self) -> bool {
        matches!(
            self.mime_type.as_deref(),
            Some("text/csv") | Some("text/comma-separated-values")
        )
    }
}

/// A message event delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingEvent {
    pub chat_id: i64,
    pub message_id: i64,
    pub chat_kind: ChatKind,
    /// Chat title or user name, for logs and dialog listings.
    pub chat_title: String,
    /// Message text, or the caption of a media message.
    pub text: String,
    /// `None` when the platform reports no identifiable sender.
    pub sender: Option<SenderInfo>,
    pub document: Option<DocumentInfo>,
    /// Photo, video, document or other attachment present.
    pub has_media: bool,
    /// Content is protected from forwarding and saving.
    pub protected_content: bool,
    pub received_at: DateTime<Utc>,
}

impl IncomingEvent {
    /// A plain text event, mostly for tests and synthetic messages.
    pub fn text(chat_id: i64, message_id: i64, chat_kind: ChatKind, text: &str) -> Self {
        Self {
            chat_id,
            message_id,
            chat_kind,
            chat_title: String::new(),
            text: text.to_string(),
            sender: None,
            document: None,
            has_media: false,
            protected_content: false,
            received_at: Utc::now(),
        }
    }

    pub fn with_sender(mut self, sender: SenderInfo) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_document(mut self, document: DocumentInfo) -> Self {
        self.has_media = true;
        self.document = Some(document);
        self
    }

    pub fn with_protected_content(mut self, protected: bool) -> Self {
        self.protected_content = protected;
        self
    }

    pub fn is_group(&self) -> bool {
        self.chat_kind == ChatKind::Group
    }
}

// ── Outbound message ────────────────────────────────────────────────

/// A message the router asks the transport to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    /// Plain text.
    Text(String),
    /// Copy of an existing message with replaced text/caption, so media
    /// survives the trip.
    Copy {
        from_chat_id: i64,
        message_id: i64,
        text: String,
    },
}

impl OutgoingMessage {
    /// The text or caption that will be shown.
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Copy { text, .. } => text,
        }
    }
}

// ── Per-message state ───────────────────────────────────────────────

/// Claim tracking for one message on its way through the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventState {
    claimed: bool,
    reason: String,
}

impl Default for EventState {
    fn default() -> Self {
        Self::new()
    }
}

impl EventState {
    pub fn new() -> Self {
        Self {
            claimed: false,
            reason: UNFILTERED_REASON.to_string(),
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed
    }

    /// The last recorded rejection cause.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn claim(&mut self) {
        self.claimed = true;
    }

    pub fn reject(&mut self, reason: impl Into<String>) {
        self.reason = reason.into();
    }
}

/// Result of running one rule against one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// The rule dispatched the message.
    Claimed,
    /// A stage rejected the message.
    Rejected(String),
    /// The rule matched but dispatch failed.
    Failed(String),
}

impl RuleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Claimed => "claimed",
            Self::Rejected(_) => "rejected",
            Self::Failed(_) => "failed",
        }
    }
}

/// Where a message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Source is a recipient chat; nothing was evaluated.
    Skipped,
    /// At least one rule dispatched it.
    Claimed,
    /// Forwarded to the trash bin.
    Trashed,
    /// Unclaimed and no usable trash bin.
    Dropped,
    /// Unclaimed message from a recipient chat that is also a bleep donor.
    /// It stays where it is; recipients never feed the trash bin.
    Kept,
}

/// Summary of how the router handled one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReport {
    pub chat_id: i64,
    pub message_id: i64,
    pub disposition: Disposition,
    /// `(rule uid, outcome)` for every donor-matching rule, in order.
    pub outcomes: Vec<(i64, RuleOutcome)>,
    /// Final reason (last rejection, or `unfiltered`).
    pub reason: String,
    /// Text after censoring, when a bleep rule changed it.
    pub censored_text: Option<String>,
}

impl RouteReport {
    pub fn skipped(event: &IncomingEvent) -> Self {
        Self {
            chat_id: event.chat_id,
            message_id: event.message_id,
            disposition: Disposition::Skipped,
            outcomes: Vec::new(),
            reason: UNFILTERED_REASON.to_string(),
            censored_text: None,
        }
    }

    pub fn claimed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == RuleOutcome::Claimed)
            .count()
    }
}
