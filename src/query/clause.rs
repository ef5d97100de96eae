use crate::ast::Term;
use crate::error::Error;

/// One clause of a query (filter, paging, ordering, grouping, projection).
///
/// Each clause owns a vocabulary of lowercase function names. A `Query`
/// offers every term to its clauses in a fixed order and the first clause
/// whose vocabulary contains the term's token takes it.
pub trait Clause {
    fn name(&self) -> &'static str;

    fn vocabulary(&self) -> &'static [&'static str];

    /// Stores an already-claimed term, validating or rewriting it.
    fn accept(&mut self, term: Term) -> Result<(), Error>;

    fn terms(&self) -> &[Term];

    fn claims(&self, token: &str) -> bool {
        self.vocabulary()
            .iter()
            .any(|word| word.eq_ignore_ascii_case(token))
    }

    /// Accepts `term` when this clause claims its token.
    ///
    /// Quoted literals are never function names and are never claimed.
    fn try_claim(&mut self, term: &Term) -> Result<bool, Error> {
        if term.is_quoted() || !self.claims(&term.token) {
            return Ok(false);
        }
        self.accept(term.clone())?;
        Ok(true)
    }

    /// Accepted terms rendered as RQL and joined with `&`.
    fn render(&self) -> String {
        self.terms()
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Leaf tokens of a term's arguments, rejecting nested functions.
pub(crate) fn leaf_args<'a>(clause: &str, term: &'a Term) -> Result<Vec<&'a str>, Error> {
    term.terms
        .iter()
        .map(|t| {
            if t.is_leaf() {
                Ok(t.token.as_str())
            } else {
                Err(Error::bad_request(format!(
                    "{} term '{}' only accepts literal arguments",
                    clause, term
                )))
            }
        })
        .collect()
}
