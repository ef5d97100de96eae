use super::clause::Clause;
use crate::ast::Term;
use crate::error::Error;

const VOCABULARY: &[&str] = &[
    "includes", "excludes", "expand", "expands", "distinct", "count", "sum", "min", "max", "as",
];

const AGGREGATES: &[&str] = &["count", "sum", "min", "max"];

/// An aggregate projection such as `sum(freight)` or `as(total,sum(freight))`.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub function: String,
    pub column: Option<String>,
    pub alias: Option<String>,
}

/// The projection clause: included columns, response exclusions, expansion
/// paths and aggregates.
#[derive(Debug, Clone, Default)]
pub struct Select {
    terms: Vec<Term>,
}

impl Select {
    pub fn new() -> Self {
        Self::default()
    }

    fn args_of(&self, tokens: &[&str]) -> Vec<String> {
        self.terms
            .iter()
            .filter(|t| t.has_token(tokens))
            .flat_map(|t| t.terms.iter())
            .map(|arg| arg.token.clone())
            .collect()
    }

    /// Columns to project. Empty means every column.
    pub fn includes(&self) -> Vec<String> {
        self.args_of(&["includes"])
    }

    pub fn excludes(&self) -> Vec<String> {
        self.args_of(&["excludes"])
    }

    /// Dotted relationship paths to expand, lowercased for matching.
    pub fn expands(&self) -> Vec<String> {
        self.args_of(&["expand", "expands"])
            .into_iter()
            .map(|p| p.to_ascii_lowercase())
            .collect()
    }

    pub fn is_distinct(&self) -> bool {
        self.terms.iter().any(|t| t.token == "distinct")
    }

    pub fn aggregates(&self) -> Vec<Aggregate> {
        let mut out = Vec::new();
        for term in &self.terms {
            if term.token == "as" {
                if let (Some(alias), Some(inner)) = (term.token_at(0), term.term_at(1)) {
                    out.push(Aggregate {
                        function: inner.token.clone(),
                        column: inner.token_at(0).map(str::to_string),
                        alias: Some(alias.to_string()),
                    });
                }
            } else if term.has_token(AGGREGATES) {
                out.push(Aggregate {
                    function: term.token.clone(),
                    column: term.token_at(0).map(str::to_string),
                    alias: None,
                });
            }
        }
        out
    }
}

impl Clause for Select {
    fn name(&self) -> &'static str {
        "select"
    }

    fn vocabulary(&self) -> &'static [&'static str] {
        VOCABULARY
    }

    fn accept(&mut self, mut term: Term) -> Result<(), Error> {
        term.token = term.token.to_ascii_lowercase();
        if term.token == "as" {
            let valid = term.len() == 2
                && term.terms[0].is_leaf()
                && term.terms[1].has_token(AGGREGATES);
            if !valid {
                return Err(Error::bad_request(format!(
                    "'{}' must read as(alias,aggregate(column))",
                    term
                )));
            }
        } else if term.terms.iter().any(|t| !t.is_leaf()) {
            return Err(Error::bad_request(format!(
                "select term '{}' only accepts literal arguments",
                term
            )));
        }
        self.terms.push(term);
        Ok(())
    }

    fn terms(&self) -> &[Term] {
        &self.terms
    }
}
