use super::clause::{leaf_args, Clause};
use crate::ast::Term;
use crate::error::Error;

const VOCABULARY: &[&str] = &["group"];

#[derive(Debug, Clone, Default)]
pub struct Group {
    terms: Vec<Term>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn properties(&self) -> Vec<String> {
        self.terms
            .iter()
            .flat_map(|t| t.terms.iter())
            .map(|arg| arg.token.clone())
            .collect()
    }
}

impl Clause for Group {
    fn name(&self) -> &'static str {
        "group"
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
