//! Text and sender predicates shared by the router and the bleep censor.
//!
//! Every stage works on the same word tokens produced by [`tokenize`], so a
//! word that a black list rejects is exactly the word the censor redacts.

pub mod expression;
pub mod pattern;
pub mod sender;
pub mod tokenize;
pub mod word_list;

pub use expression::FilterExpression;
pub use pattern::WildcardPattern;
pub use sender::{SenderConstraint, SenderInfo, SenderVerdict};
pub use tokenize::{normalize, tokenize};
pub use word_list::{WordList, check_and_list, check_black_list, check_or_list};
