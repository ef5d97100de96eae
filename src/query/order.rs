use super::clause::{leaf_args, Clause};
use crate::ast::{Sort, Term};
use crate::error::Error;

const VOCABULARY: &[&str] = &["sort", "order"];

/// The ordering clause: `sort(-a,+b,c)` or `order(...)`.
#[derive(Debug, Clone, Default)]
pub struct Order {
    terms: Vec<Term>,
}

impl Order {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sorts(&self) -> Vec<Sort> {
        self.terms
            .iter()
            .flat_map(|t| t.terms.iter())
            .filter(|arg| !arg.token.trim().is_empty())
            .map(|arg| Sort::parse(&arg.token))
            .collect()
    }
}

impl Clause for Order {
    fn name(&self) -> &'static str {
        "order"
    }

    fn vocabulary(&self) -> &'static [&'static str] {
        VOCABULARY
    }

    fn accept(&mut self, mut term: Term) -> Result<(), Error> {
        leaf_args(self.name(), &term)?;
        term.token = term.token.to_ascii_lowercase();
        self.terms.push(term);
        Ok(())
    }

    fn terms(&self) -> &[Term] {
        &self.terms
    }
}
