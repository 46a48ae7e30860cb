//! Punctuation stripping and word splitting.

/// Whether a character survives punctuation stripping.
fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c.is_whitespace()
}

/// Strip punctuation and split into words, preserving case.
pub fn tokenize(text: &str) -> Vec<String> {
    let stripped: String = text.chars().filter(|c| is_word_char(*c)).collect();
    stripped.split_whitespace().map(str::to_string).collect()
}

/// Strip punctuation, lower-case, and split into words.
pub fn normalize(text: &str) -> Vec<String> {
    tokenize(&text.to_lowercase())
}
