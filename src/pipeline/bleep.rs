//! Bleep censor: redacts forbidden words in donor chats.

use regex::{NoExpand, Regex};
use tracing::{debug, info, warn};

use crate::channels::transport::Transport;
use crate::filters::{WordList, normalize};
use crate::pipeline::rules::BleepRule;
use crate::pipeline::types::{ChatKind, IncomingEvent, OutgoingMessage};

/// An active bleep rule with its word list parsed.
#[derive(Debug, Clone)]
pub struct BleepFilter {
    rule: BleepRule,
    words: WordList,
    symbol: char,
}

impl BleepFilter {
    pub fn new(rule: BleepRule) -> Self {
        let words = WordList::alternatives(&rule.black_list);
        let symbol = rule.symbol();
        Self {
            rule,
            words,
            symbol,
        }
    }

    pub fn donor_id(&self) -> i64 {
        self.rule.donor_id
    }

    pub fn rule(&self) -> &BleepRule {
        &self.rule
    }

    /// Censored text, or `None` when nothing was flagged.
    pub fn censor(&self, text: &str) -> Option<String> {
        censor(text, &self.words, self.symbol)
    }
}

/// Replace every flagged word with `symbol` repeated to its length.
///
/// Words are found on normalized tokens, then replaced in the original text in
/// their lower-case, capitalized and upper-case spellings. Returns `None` when
/// the text is unchanged.
pub fn censor(text: &str, words: &WordList, symbol: char) -> Option<String> {
    if words.is_empty() || text.is_empty() {
        return None;
    }

    let mut flagged: Vec<String> = normalize(text)
        .into_iter()
        .filter(|token| words.contains_token(token))
        .collect();
    flagged.sort();
    flagged.dedup();

    let mut censored = text.to_string();
    for word in &flagged {
        let mask: String = std::iter::repeat_n(symbol, word.chars().count()).collect();
        for variant in spellings(word) {
            let pattern = format!(r"\b{}\b", regex::escape(&variant));
            match Regex::new(&pattern) {
                Ok(re) => censored = re.replace_all(&censored, NoExpand(&mask)).into_owned(),
                Err(e) => warn!(word = %variant, error = %e, "Cannot build bleep pattern"),
            }
        }
    }

    (censored != text).then_some(censored)
}

fn spellings(word: &str) -> [String; 3] {
    let mut chars = word.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    [word.to_lowercase(), capitalized, word.to_uppercase()]
}

/// Run every donor-matching filter over the text, each on the previous
/// filter's output. `None` when no filter changed anything.
pub fn censor_all(filters: &[BleepFilter], chat_id: i64, text: &str) -> Option<String> {
    let mut current: Option<String> = None;
    for filter in filters.iter().filter(|f| f.donor_id() == chat_id) {
        let input = current.as_deref().unwrap_or(text);
        if let Some(out) = filter.censor(input) {
            current = Some(out);
        }
    }
    current
}

/// Censor a message in its own chat.
///
/// Groups get the original deleted and the censored text reposted; channels
/// get an in-place edit when the relay may edit there. A group message that
/// cannot be deleted is not reposted. Transport failures are logged and do
/// not stop routing. Returns the censored text so the router
/// continues with it.
pub async fn apply(
    transport: &dyn Transport,
    filters: &[BleepFilter],
    event: &IncomingEvent,
) -> Option<String> {
    let censored = censor_all(filters, event.chat_id, &event.text)?;

    match event.chat_kind {
        ChatKind::Group => {
            // Without the delete a repost would sit next to the original
            if let Err(e) = transport
                .delete_message(event.chat_id, event.message_id)
                .await
            {
                warn!(chat_id = event.chat_id, error = %e, "Bleep delete failed, not reposting");
                return Some(censored);
            }
            let repost = repost_text(event, &censored);
            match transport
                .send_message(event.chat_id, OutgoingMessage::Text(repost))
                .await
            {
                Ok(()) => info!(chat_id = event.chat_id, "Bleeped group message"),
                Err(e) => warn!(chat_id = event.chat_id, error = %e, "Bleep repost failed"),
            }
        }
        ChatKind::Channel => {
            if transport.can_edit_messages(event.chat_id).await {
                match transport
                    .edit_message(event.chat_id, event.message_id, &censored)
                    .await
                {
                    Ok(()) => info!(chat_id = event.chat_id, "Bleeped channel post"),
                    Err(e) => warn!(chat_id = event.chat_id, error = %e, "Bleep edit failed"),
                }
            } else {
                debug!(chat_id = event.chat_id, "No edit rights, channel post left as is");
            }
        }
        ChatKind::Private => {}
    }

    Some(censored)
}

/// Reposted group text, attributed to the original sender when known.
fn repost_text(event: &IncomingEvent, censored: &str) -> String {
    let Some(sender) = event.sender.as_ref().filter(|s| !s.is_empty()) else {
        return censored.to_string();
    };
    let name = format!("{} {}", sender.first_name, sender.last_name);
    let name = match name.trim() {
        "" => sender.handle(),
        n => n.to_string(),
    };
    if name.is_empty() {
        censored.to_string()
    } else {
        format!("{name}:\n{censored}")
    }
}
