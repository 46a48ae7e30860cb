//! Outbound message rendering.
//!
//! A rule's format string toggles header parts by character:
//!
//! | flag | part                                          |
//! |------|-----------------------------------------------|
//! | `t`  | rule title, or `flt: <filter>` without one    |
//! | `d`  | donor name and id                             |
//! | `s`  | sender name, handle and id (group chats only) |
//! | `m`  | the original message                          |
//!
//! Headers use legacy Telegram Markdown (`*bold*`). When any header part is
//! present it is followed by a permalink to the source message and a
//! separator line.

use crate::config::RouterConfig;
use crate::pipeline::rules::{DEFAULT_FORMAT, Rule};
use crate::pipeline::types::{IncomingEvent, OutgoingMessage};

/// Line between the header and the message body.
pub const SEPARATOR: &str = "----------";

/// Prefix Telegram uses for supergroup and channel ids.
const CHANNEL_ID_PREFIX: &str = "-100";

/// Parsed format flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatFlags {
    pub title: bool,
    pub donor: bool,
    pub sender: bool,
    pub message: bool,
}

impl FormatFlags {
    /// Parse a format string; empty means `m`.
    pub fn parse(format: &str) -> Self {
        let format = match format.trim() {
            "" => DEFAULT_FORMAT.to_string(),
            f => f.to_lowercase(),
        };
        Self {
            title: format.contains('t'),
            donor: format.contains('d'),
            sender: format.contains('s'),
            message: format.contains('m'),
        }
    }
}

fn bold(text: &str) -> String {
    format!("*{text}*")
}

/// Peer part of a `t.me/c/` link: the id without the `-100` channel prefix.
pub fn permalink_peer(chat_id: i64) -> u64 {
    chat_id
        .to_string()
        .strip_prefix(CHANNEL_ID_PREFIX)
        .filter(|rest| !rest.is_empty())
        .and_then(|rest| rest.parse().ok())
        .unwrap_or_else(|| chat_id.unsigned_abs())
}

/// Link back to the source message.
pub fn permalink(chat_id: i64, message_id: i64) -> String {
    format!("@t.me/c/{}/{message_id}", permalink_peer(chat_id))
}

/// Notice sent instead of no-forward-protected content.
pub fn forbidden_notice(chat_id: i64) -> String {
    format!("Forwards restricted saving content from chat {chat_id} is forbidden.")
}

/// Header lines for a rule, including permalink and separator when any
/// part was produced. Empty when no header flag is set.
pub fn header(rule: &Rule, event: &IncomingEvent, flags: FormatFlags) -> String {
    let mut header = String::new();

    if flags.title {
        if rule.title.is_empty() {
            header.push_str(&bold(&format!("flt: {}", rule.filter)));
        } else {
            header.push_str(&bold(&rule.title));
        }
        header.push('\n');
    }

    if flags.donor {
        header.push_str(&format!("{} id:{}\n", bold(&rule.donor_name), rule.donor_id));
    }

    if flags.sender && event.is_group() {
        let sender = event.sender.clone().unwrap_or_default();
        let name = format!("{} {}", sender.first_name, sender.last_name);
        header.push_str(&format!(
            "{} {} id:{}\n",
            bold(&name),
            sender.handle(),
            sender.id
        ));
    }

    if !header.is_empty() {
        header.push_str(&permalink(event.chat_id, event.message_id));
        header.push('\n');
        header.push_str(SEPARATOR);
        header.push('\n');
    }

    header
}

/// Prefix followed by the message body, or by the forbidden-content notice
/// when the source is protected and the override is off.
fn with_body(
    prefix: String,
    event: &IncomingEvent,
    text: &str,
    config: RouterConfig,
) -> OutgoingMessage {
    if event.protected_content && !config.enable_forbidden_content {
        return OutgoingMessage::Text(prefix + &forbidden_notice(event.chat_id));
    }

    let body = prefix + text;
    if event.has_media {
        OutgoingMessage::Copy {
            from_chat_id: event.chat_id,
            message_id: event.message_id,
            text: body,
        }
    } else {
        OutgoingMessage::Text(body)
    }
}

/// Render the message a rule sends to its recipient. `text` is the
/// (possibly censored) message text.
pub fn render(
    rule: &Rule,
    event: &IncomingEvent,
    text: &str,
    config: RouterConfig,
) -> OutgoingMessage {
    let flags = FormatFlags::parse(&rule.format);
    let header = header(rule, event, flags);

    if !flags.message {
        return OutgoingMessage::Text(header);
    }
    with_body(header, event, text, config)
}

/// Render an unclaimed message for the trash bin, prefixed with the reason
/// the last rule rejected it.
pub fn render_trash(
    reason: &str,
    event: &IncomingEvent,
    text: &str,
    config: RouterConfig,
) -> OutgoingMessage {
    let prefix = format!(
        "{}\n{}\n{SEPARATOR}\n",
        bold(reason),
        permalink(event.chat_id, event.message_id)
    );
    with_body(prefix, event, text, config)
}
