pub mod clause;
pub mod filter;
pub mod group;
pub mod order;
pub mod page;
pub mod select;

pub use clause::Clause;
pub use filter::{key_filter, relationship_column, Where, RELATIONSHIP_MARKER};
pub use group::Group;
pub use order::Order;
pub use page::Page;
pub use select::{Aggregate, Select};

use crate::ast::{Collection, Term};
use crate::config::Config;
use crate::error::Error;
use crate::parser::parse_terms;
use std::fmt;
use std::sync::Arc;

/// A query against one collection, built from RQL terms.
///
/// Terms are offered to the clauses in a fixed order (Where, Page, Order,
/// Group, Select) and the first clause that claims a term keeps it.
#[derive(Debug, Clone)]
pub struct Query {
    collection: Option<Arc<Collection>>,
    where_: Where,
    page: Page,
    order: Order,
    group: Group,
    select: Select,
}

impl Default for Query {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Query {
    pub fn new(collection: Option<Arc<Collection>>) -> Self {
        Self {
            where_: Where::new(collection.clone()),
            collection,
            page: Page::default(),
            order: Order::new(),
            group: Group::new(),
            select: Select::new(),
        }
    }

    pub fn for_collection(collection: Arc<Collection>) -> Self {
        Self::new(Some(collection))
    }

    pub fn with_config(mut self, config: &Config) -> Self {
        self.page = Page::new(config.default_limit);
        self
    }

    pub fn with_default_limit(mut self, limit: u64) -> Self {
        self.page = Page::new(limit);
        self
    }

    /// Clauses in routing order.
    pub fn clauses(&self) -> [&dyn Clause; 5] {
        [
            &self.where_,
            &self.page,
            &self.order,
            &self.group,
            &self.select,
        ]
    }

    fn clauses_mut(&mut self) -> [&mut dyn Clause; 5] {
        [
            &mut self.where_,
            &mut self.page,
            &mut self.order,
            &mut self.group,
            &mut self.select,
        ]
    }

    /// True when any clause has `token` in its vocabulary.
    pub fn claims(&self, token: &str) -> bool {
        self.clauses().iter().any(|c| c.claims(token))
    }

    fn route(&mut self, term: &Term) -> Result<bool, Error> {
        for clause in self.clauses_mut() {
            if clause.try_claim(term)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// `eq(limit,5)` reads as `limit(5)` when some clause knows `limit`.
    fn inverted(&self, term: &Term) -> Option<Term> {
        if term.token != "eq" || term.is_quoted() {
            return None;
        }
        let first = term.terms.first()?;
        if !first.is_leaf() || first.is_quoted() || !self.claims(&first.token) {
            return None;
        }
        Some(Term::term(first.token.as_str(), term.terms[1..].to_vec()))
    }

    /// Routes one term to the first clause that claims it.
    ///
    /// Returns `Ok(false)` when no clause knows the term's token.
    pub fn with_term(&mut self, term: Term) -> Result<bool, Error> {
        if let Some(rewritten) = self.inverted(&term) {
            if self.route(&rewritten)? {
                return Ok(true);
            }
        }
        if self.route(&term)? {
            return Ok(true);
        }
        tracing::debug!(term = %term, "no clause claimed term");
        Ok(false)
    }

    /// Parses `&`-joined RQL and routes every fragment.
    pub fn with_rql(&mut self, rql: &str) -> Result<&mut Self, Error> {
        if rql.trim().is_empty() {
            return Ok(self);
        }
        for term in parse_terms(rql)? {
            self.with_term(term)?;
        }
        Ok(self)
    }

    pub fn parse(collection: Option<Arc<Collection>>, rql: &str) -> Result<Self, Error> {
        let mut query = Self::new(collection);
        query.with_rql(rql)?;
        Ok(query)
    }

    pub fn collection(&self) -> Option<&Collection> {
        self.collection.as_deref()
    }

    pub fn collection_arc(&self) -> Option<&Arc<Collection>> {
        self.collection.as_ref()
    }

    pub fn filter(&self) -> &Where {
        &self.where_
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    pub fn select(&self) -> &Select {
        &self.select
    }

    /// `(column, value)` pairs of the literal equality filters that every
    /// matching row must satisfy, in accepted order.
    pub fn column_values(&self) -> Vec<(String, String)> {
        fn collect(term: &Term, out: &mut Vec<(String, String)>) {
            match term.token.as_str() {
                "and" => term.terms.iter().for_each(|t| collect(t, out)),
                "eq" if term.len() == 2 && term.terms.iter().all(Term::is_leaf) => {
                    let column = &term.terms[0];
                    if !column.is_relationship_marked() {
                        out.push((column.token.clone(), term.terms[1].token.clone()));
                    }
                }
                _ => {}
            }
        }

        let mut out = Vec::new();
        for term in self.where_.terms() {
            collect(term, &mut out);
        }
        out
    }

    /// Copy of this query with the offset moved one page forward.
    pub fn next_page(&self) -> Query {
        let mut next = self.clone();
        let offset = self.page.offset().saturating_add(self.page.limit());
        next.page = Page::new(self.page.limit());
        // both terms are integers, accept cannot fail
        let limit = self.page.limit().to_string();
        let _ = next.page.accept(Term::call("offset", &[offset.to_string().as_str()]));
        let _ = next.page.accept(Term::call("limit", &[limit.as_str()]));
        next
    }

    /// Copy of this query continued with backend-supplied terms, such as an
    /// `after(...)` cursor.
    pub fn next_with(&self, terms: Vec<Term>) -> Result<Query, Error> {
        let mut next = self.clone();
        next.page = Page::new(self.page.limit());
        let limit = self.page.limit().to_string();
        next.page.accept(Term::call("limit", &[limit.as_str()]))?;
        for term in terms {
            next.with_term(term)?;
        }
        Ok(next)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .clauses()
            .iter()
            .map(|c| c.render())
            .filter(|r| !r.is_empty())
            .collect::<Vec<_>>()
            .join("&");
        write!(f, "{}", rendered)
    }
}
