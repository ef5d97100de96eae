use super::clause::Clause;
use crate::ast::Term;
use crate::error::{Error, ParseError};

const VOCABULARY: &[&str] = &["offset", "limit", "page", "pagenum", "pagesize", "after"];

pub const DEFAULT_LIMIT: u64 = 100;

/// The paging clause.
///
/// Offset and limit can be spelled several redundant ways; one effective
/// pair is resolved with a fixed precedence:
///
/// - offset: `offset(o)` > `limit(l,o)` > `(page - 1) * limit` > 0
/// - limit: `limit(l)` > `offset(o,l)` > `pageSize(l)` > `page(p,l)` > default
#[derive(Debug, Clone)]
pub struct Page {
    default_limit: u64,
    terms: Vec<Term>,
}

impl Default for Page {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}

impl Page {
    pub fn new(default_limit: u64) -> Self {
        Self {
            default_limit,
            terms: Vec::new(),
        }
    }

    fn find(&self, token: &str) -> Option<&Term> {
        self.terms.iter().find(|t| t.token == token)
    }

    fn arg(&self, token: &str, index: usize) -> Option<u64> {
        self.find(token)
            .and_then(|t| t.token_at(index))
            .and_then(|s| s.parse::<u64>().ok())
    }

    fn page_arg(&self, index: usize) -> Option<u64> {
        self.arg("page", index).or_else(|| self.arg("pagenum", index))
    }

    pub fn offset(&self) -> u64 {
        if let Some(offset) = self.arg("offset", 0).or_else(|| self.arg("limit", 1)) {
            return offset;
        }
        match self.page_arg(0) {
            Some(page) => page.saturating_sub(1).saturating_mul(self.limit()),
            None => 0,
        }
    }

    pub fn limit(&self) -> u64 {
        self.arg("limit", 0)
            .or_else(|| self.arg("offset", 1))
            .or_else(|| self.arg("pagesize", 0))
            .or_else(|| self.page_arg(1))
            .unwrap_or(self.default_limit)
    }

    /// 1-based page number derived from offset and limit.
    pub fn page(&self) -> u64 {
        let limit = self.limit();
        if limit == 0 {
            return 1;
        }
        (self.offset() / limit).saturating_add(1)
    }

    pub fn page_num(&self) -> u64 {
        self.page()
    }

    /// Opaque keyset cursor, passed through untouched.
    pub fn after(&self) -> Option<&Term> {
        self.find("after")
    }

    pub fn is_set(&self) -> bool {
        !self.terms.is_empty()
    }
}

impl Clause for Page {
    fn name(&self) -> &'static str {
        "page"
    }

    fn vocabulary(&self) -> &'static [&'static str] {
        VOCABULARY
    }

    fn accept(&mut self, mut term: Term) -> Result<(), Error> {
        term.token = term.token.to_ascii_lowercase();
        if term.token != "after" {
            if term.is_empty() {
                return Err(Error::bad_request(format!("'{}' requires a value", term.token)));
            }
            for arg in &term.terms {
                if !arg.is_leaf() || arg.token.parse::<u64>().is_err() {
                    return Err(ParseError::InvalidInteger(arg.to_string()).into());
                }
            }
        }
        self.terms.push(term);
        Ok(())
    }

    fn terms(&self) -> &[Term] {
        &self.terms
    }
}
