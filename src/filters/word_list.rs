//! Black-list / or-list / and-list predicates.
//!
//! All three are case-insensitive and match whole tokens; list items may use
//! wildcards. An empty list (or one with only blank items) always passes.
//! An item that does not compile never matches, and a black list holding one
//! rejects every message.

use tracing::warn;

use crate::filters::pattern::WildcardPattern;
use crate::filters::tokenize::normalize;

/// Separator for black and or lists.
pub const ALTERNATIVE_SEPARATOR: char = '|';

/// Separator for and lists.
pub const CONJUNCTION_SEPARATOR: char = '+';

/// A parsed word list: lower-cased, trimmed, blank items dropped.
#[derive(Debug, Clone, Default)]
pub struct WordList {
    items: Vec<WildcardPattern>,
    malformed: usize,
}

impl WordList {
    /// Parse a list whose items are separated by `separator`.
    pub fn parse(list: &str, separator: char) -> Self {
        let mut items = Vec::new();
        let mut malformed = 0;
        for item in list
            .to_lowercase()
            .split(separator)
            .map(str::trim)
            .filter(|item| !item.is_empty())
        {
            match WildcardPattern::new(item) {
                Ok(p) => items.push(p),
                Err(e) => {
                    warn!(item, error = %e, "Word list item is malformed and never matches");
                    malformed += 1;
                }
            }
        }
        Self { items, malformed }
    }

    /// Parse a `|`-separated black or or list.
    pub fn alternatives(list: &str) -> Self {
        Self::parse(list, ALTERNATIVE_SEPARATOR)
    }

    /// No items at all, malformed ones included.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.malformed == 0
    }

    pub fn has_malformed(&self) -> bool {
        self.malformed > 0
    }

    /// Whether a single lower-cased token is listed.
    pub fn contains_token(&self, token: &str) -> bool {
        self.items.iter().any(|p| p.is_match(token))
    }

    /// Whether any item matches any of the tokens.
    pub fn any_present(&self, tokens: &[String]) -> bool {
        self.items.iter().any(|p| p.matches_any(tokens))
    }

    /// Whether every item matches at least one of the tokens.
    pub fn all_present(&self, tokens: &[String]) -> bool {
        !self.has_malformed() && self.items.iter().all(|p| p.matches_any(tokens))
    }
}

/// Returns `false` if any black-listed word appears in the text.
pub fn check_black_list(text: &str, black_list: &str) -> bool {
    let list = WordList::alternatives(black_list);
    if list.has_malformed() {
        return false;
    }
    list.is_empty() || !list.any_present(&normalize(text))
}

/// Returns `true` if at least one listed word appears in the text.
pub fn check_or_list(text: &str, or_list: &str) -> bool {
    let list = WordList::alternatives(or_list);
    list.is_empty() || list.any_present(&normalize(text))
}

/// Returns `true` only if every listed word appears in the text.
pub fn check_and_list(text: &str, and_list: &str) -> bool {
    let list = WordList::parse(and_list, CONJUNCTION_SEPARATOR);
    list.is_empty() || list.all_present(&normalize(text))
}
