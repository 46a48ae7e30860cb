//! Filter expression language.
//!
//! ```text
//! *                       everything, including empty text
//! word                    a token equal to `word`
//! *ord | w?rd | [wc]ord   wildcards, whole-token
//! !word                   exclusion (enforced inside AND groups only)
//! a & b & !c              AND group
//! a | b                   OR terms
//! a & b | c               AND group OR term
//! ```
//!
//! The expression is split on ` | `. Every part containing ` & ` contributes
//! its ` & `-separated conditions to one AND group; the remaining parts are
//! OR terms. `!`-prefixed OR terms are accepted but not enforced.
//!
//! If any AND condition starts with an uppercase letter, both the AND group
//! and the OR terms match case-sensitively. Otherwise tokens are lower-cased
//! before matching and the terms are used as written, so a capitalized OR
//! term can only ever match in case-sensitive mode.

use crate::error::FilterError;
use crate::filters::pattern::WildcardPattern;
use crate::filters::tokenize::tokenize;

const OR_SEPARATOR: &str = " | ";
const AND_SEPARATOR: &str = " & ";
const MATCH_ALL: &str = "*";

/// A parsed, ready-to-evaluate filter expression.
#[derive(Debug, Clone)]
pub struct FilterExpression {
    source: String,
    body: Body,
}

#[derive(Debug, Clone)]
enum Body {
    MatchAll,
    Groups {
        and_group: Option<TermSet>,
        or_group: Option<TermSet>,
        case_sensitive: bool,
    },
}

#[derive(Debug, Clone, Default)]
struct TermSet {
    should_be: Vec<WildcardPattern>,
    should_not_be: Vec<WildcardPattern>,
}

impl TermSet {
    fn build<'a>(conditions: impl IntoIterator<Item = &'a str>) -> Result<Self, FilterError> {
        let mut set = TermSet::default();
        for condition in conditions {
            match condition.strip_prefix('!') {
                Some(negative) => set.should_not_be.push(WildcardPattern::new(negative)?),
                None => set.should_be.push(WildcardPattern::new(condition)?),
            }
        }
        Ok(set)
    }

    /// Every positive condition matches and no negative one does.
    fn all_match(&self, tokens: &[String]) -> bool {
        let positives = self.should_be.iter().all(|p| p.matches_any(tokens));
        let negatives = self.should_not_be.iter().any(|p| p.matches_any(tokens));
        positives && !negatives
    }

    /// Any positive condition matches.
    fn any_match(&self, tokens: &[String]) -> bool {
        self.should_be.iter().any(|p| p.matches_any(tokens))
    }
}

/// Whether a condition turns on case-sensitive matching.
fn starts_uppercase(condition: &str) -> bool {
    condition.chars().next().is_some_and(char::is_uppercase)
}

impl FilterExpression {
    /// Parse an expression. Fails only if a term cannot be compiled.
    pub fn parse(source: &str) -> Result<Self, FilterError> {
        if source.trim() == MATCH_ALL {
            return Ok(Self {
                source: source.to_string(),
                body: Body::MatchAll,
            });
        }

        let mut and_conditions: Vec<&str> = Vec::new();
        let mut or_conditions: Vec<&str> = Vec::new();
        let mut has_and = false;
        let mut has_or = false;

        for part in source.split(OR_SEPARATOR) {
            if part.contains(AND_SEPARATOR) {
                has_and = true;
                and_conditions.extend(part.split(AND_SEPARATOR));
            } else {
                has_or = true;
                or_conditions.push(part);
            }
        }

        // The AND list decides case sensitivity for both groups.
        let case_sensitive = and_conditions.iter().any(|c| starts_uppercase(c));

        let and_group = if has_and {
            Some(TermSet::build(and_conditions.iter().copied())?)
        } else {
            None
        };
        let or_group = if has_or {
            Some(TermSet::build(or_conditions.iter().copied())?)
        } else {
            None
        };

        Ok(Self {
            source: source.to_string(),
            body: Body::Groups {
                and_group,
                or_group,
                case_sensitive,
            },
        })
    }

    /// The expression as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the expression accepts every message.
    pub fn is_match_all(&self) -> bool {
        matches!(self.body, Body::MatchAll)
    }

    /// Evaluate the expression against message text.
    pub fn matches(&self, text: &str) -> bool {
        let (and_group, or_group, case_sensitive) = match &self.body {
            Body::MatchAll => return true,
            Body::Groups {
                and_group,
                or_group,
                case_sensitive,
            } => (and_group, or_group, *case_sensitive),
        };

        let mut tokens = tokenize(text);
        if !case_sensitive {
            tokens.iter_mut().for_each(|t| *t = t.to_lowercase());
        }

        let and_found = and_group.as_ref().is_some_and(|g| g.all_match(&tokens));
        let or_found = or_group.as_ref().is_some_and(|g| g.any_match(&tokens));
        and_found || or_found
    }
}

/// Parse and evaluate in one step; malformed expressions never match.
pub fn check_filter(text: &str, expression: &str) -> bool {
    FilterExpression::parse(expression).is_ok_and(|e| e.matches(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "Returns a list of strings that match any pattern in include_patterns";

    #[test]
    fn exact_word_matches() {
        assert!(check_filter(TEXT, "strings"));
    }

    #[test]
    fn partial_word_does_not_match() {
        assert!(!check_filter(TEXT, "rings"));
    }

    #[test]
    fn leading_wildcard_matches() {
        assert!(check_filter(TEXT, "*rings"));
    }

    #[test]
    fn negated_lone_term_does_not_match() {
        assert!(!check_filter(TEXT, "!*rings"));
    }

    #[test]
    fn capitalized_term_does_not_match_lowercase_word() {
        assert!(!check_filter(TEXT, "Any"));
    }

    #[test]
    fn or_terms() {
        assert!(check_filter(TEXT, "list | *patt*"));
        assert!(check_filter(TEXT, "tree | list"));
        assert!(!check_filter(TEXT, "tree | forest"));
    }

    #[test]
    fn and_group_requires_all() {
        assert!(!check_filter(TEXT, "list & tree"));
        assert!(check_filter(TEXT, "list & strings"));
    }

    #[test]
    fn and_group_negation_excludes() {
        assert!(check_filter(TEXT, "list & !tree"));
        assert!(!check_filter(TEXT, "list & !strings"));
        assert!(!check_filter(TEXT, "list & !tree & !*patt*"));
    }

    #[test]
    fn capitalized_and_condition_makes_match_case_sensitive() {
        assert!(check_filter(TEXT, "Returns & list"));
        assert!(!check_filter(TEXT, "Returns & List"));
        assert!(!check_filter("returns a list", "Returns & list"));
    }

    #[test]
    fn and_case_flag_applies_to_or_terms() {
        // Case-sensitive because of the AND group: "Returns" matches as an OR term.
        assert!(check_filter(TEXT, "Nothing & here | Returns"));
        // Case-insensitive: a capitalized OR term never matches.
        assert!(!check_filter(TEXT, "nothing & here | Returns"));
    }

    #[test]
    fn or_exclusions_are_not_enforced() {
        assert!(check_filter(TEXT, "list | !strings"));
    }

    #[test]
    fn and_or_combination() {
        assert!(check_filter(TEXT, "tree & forest | list"));
        assert!(check_filter(TEXT, "list & match | tree"));
        assert!(!check_filter(TEXT, "tree & list | forest"));
    }

    #[test]
    fn multiple_and_groups_merge() {
        assert!(check_filter(TEXT, "list & match | strings & pattern"));
        assert!(!check_filter(TEXT, "list & match | strings & tree"));
    }

    #[test]
    fn match_all() {
        assert!(check_filter(TEXT, "*"));
        assert!(check_filter("", "*"));
        assert!(FilterExpression::parse("*").unwrap().is_match_all());
    }

    #[test]
    fn empty_expression_never_matches() {
        assert!(!check_filter(TEXT, ""));
        assert!(!check_filter("", ""));
    }

    #[test]
    fn punctuation_in_text_is_ignored() {
        assert!(check_filter("Breaking: markets, today!", "markets & today"));
    }

    #[test]
    fn parse_keeps_source() {
        let expr = FilterExpression::parse("a | b").unwrap();
        assert_eq!(expr.as_str(), "a | b");
        assert!(!expr.is_match_all());
    }

    #[test]
    fn evaluation_is_repeatable() {
        let expr = FilterExpression::parse("list | *patt*").unwrap();
        assert_eq!(expr.matches(TEXT), expr.matches(TEXT));
    }
}
