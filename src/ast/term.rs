use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// One RQL function call or literal.
///
/// A term owns its children, so a term can never be its own descendant.
/// Function names are stored lowercased; literals keep their case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Term {
    pub token: String,
    /// Quote character for quoted literals. Backticks are stored as `"`.
    pub quote: Option<char>,
    pub terms: Vec<Term>,
}

impl Term {
    /// An unquoted literal.
    pub fn leaf(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            quote: None,
            terms: Vec::new(),
        }
    }

    /// A quoted literal. Backtick quotes are normalized to double quotes.
    pub fn quoted(token: impl Into<String>, quote: char) -> Self {
        let quote = if quote == '`' { '"' } else { quote };
        Self {
            token: token.into(),
            quote: Some(quote),
            terms: Vec::new(),
        }
    }

    /// A function call `token(terms...)`.
    pub fn term(token: impl Into<String>, terms: Vec<Term>) -> Self {
        Self {
            token: token.into().to_ascii_lowercase(),
            quote: None,
            terms,
        }
    }

    /// Shorthand for a function over literal arguments.
    pub fn call(token: impl Into<String>, args: &[&str]) -> Self {
        Self::term(token, args.iter().map(|a| Term::leaf(*a)).collect())
    }

    pub fn with_term(mut self, term: Term) -> Self {
        self.terms.push(term);
        self
    }

    pub fn push(&mut self, term: Term) {
        self.terms.push(term);
    }

    pub fn is_leaf(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn is_quoted(&self) -> bool {
        self.quote.is_some()
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn term_at(&self, index: usize) -> Option<&Term> {
        self.terms.get(index)
    }

    pub fn token_at(&self, index: usize) -> Option<&str> {
        self.terms.get(index).map(|t| t.token.as_str())
    }

    /// Tokens of the direct children, in order.
    pub fn args(&self) -> Vec<&str> {
        self.terms.iter().map(|t| t.token.as_str()).collect()
    }

    /// Case-insensitive check of this term's token against `tokens`.
    pub fn has_token(&self, tokens: &[&str]) -> bool {
        tokens.iter().any(|t| self.token.eq_ignore_ascii_case(t))
    }

    /// Depth-first search for the first term (self included) with `token`.
    pub fn find(&self, token: &str) -> Option<&Term> {
        if self.token.eq_ignore_ascii_case(token) {
            return Some(self);
        }
        self.terms.iter().find_map(|t| t.find(token))
    }

    /// True for a column leaf rewritten to point into a related collection.
    pub fn is_relationship_marked(&self) -> bool {
        self.is_leaf()
            && !self.is_quoted()
            && self.token.starts_with(crate::query::RELATIONSHIP_MARKER)
    }

    /// Visits this term and all descendants depth-first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Term)) {
        visit(self);
        for child in &self.terms {
            child.walk(visit);
        }
    }

    fn needs_quotes(token: &str) -> bool {
        token.is_empty()
            || token
                .chars()
                .any(|c| matches!(c, '(' | ')' | ',' | '&' | '=' | '\'' | '"' | '`'))
            || token.trim() != token
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Term {}

impl PartialOrd for Term {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Term {
    fn cmp(&self, other: &Self) -> Ordering {
        self.token
            .cmp(&other.token)
            .then_with(|| self.terms.cmp(&other.terms))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_leaf() {
            return match self.quote {
                Some(q) if !self.token.contains(q) => write!(f, "{q}{}{q}", self.token),
                Some(_) => write!(f, "'{}'", self.token),
                None if Self::needs_quotes(&self.token) => {
                    if self.token.contains('"') {
                        write!(f, "'{}'", self.token)
                    } else {
                        write!(f, "\"{}\"", self.token)
                    }
                }
                None => write!(f, "{}", self.token),
            };
        }

        write!(f, "{}(", self.token)?;
        for (i, child) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", child)?;
        }
        write!(f, ")")
    }
}
