use serde::{Deserialize, Serialize};

use crate::core::types::Keyword;

/// Recursive boolean query over keywords.
///
/// A well-formed node is exactly one of: a leaf keyword, a non-empty
/// intersection, or a non-empty union. Ill-formed nodes (empty `Must`
/// or `Should`) evaluate to no results rather than failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TermQuery {
    Keyword(Keyword),
    Must(Vec<TermQuery>),
    Should(Vec<TermQuery>),
}

impl TermQuery {
    pub fn keyword(field: &str, word: &str) -> Self {
        TermQuery::Keyword(Keyword::new(field, word))
    }

    /// The conjunction of `self` and `other`. Adjacent `Must` nodes are
    /// flattened so chained calls build one wide intersection.
    pub fn and(self, other: TermQuery) -> Self {
        match (self, other) {
            (TermQuery::Must(mut a), TermQuery::Must(b)) => {
                a.extend(b);
                TermQuery::Must(a)
            }
            (TermQuery::Must(mut a), b) => {
                a.push(b);
                TermQuery::Must(a)
            }
            (a, TermQuery::Must(mut b)) => {
                b.insert(0, a);
                TermQuery::Must(b)
            }
            (a, b) => TermQuery::Must(vec![a, b]),
        }
    }

    /// The disjunction of `self` and `other`, flattened like `and`.
    pub fn or(self, other: TermQuery) -> Self {
        match (self, other) {
            (TermQuery::Should(mut a), TermQuery::Should(b)) => {
                a.extend(b);
                TermQuery::Should(a)
            }
            (TermQuery::Should(mut a), b) => {
                a.push(b);
                TermQuery::Should(a)
            }
            (a, TermQuery::Should(mut b)) => {
                b.insert(0, a);
                TermQuery::Should(b)
            }
            (a, b) => TermQuery::Should(vec![a, b]),
        }
    }

    /// Conjunction over a word list against one field; the common shape
    /// built by the search facade. Empty input yields an empty `Must`.
    pub fn all_of(field: &str, words: &[&str]) -> Self {
        TermQuery::Must(words.iter().map(|w| Self::keyword(field, w)).collect())
    }

    /// Disjunction over a word list against one field.
    pub fn any_of(field: &str, words: &[&str]) -> Self {
        TermQuery::Should(words.iter().map(|w| Self::keyword(field, w)).collect())
    }
}
