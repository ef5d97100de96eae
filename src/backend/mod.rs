//! Storage seam used by the actions.
//!
//! A backend executes built queries and bulk mutations for one collection
//! at a time. Nested documents never reach a backend; the actions split
//! them into per-collection batches first.

pub mod memory;

pub use memory::{MemoryDb, OpKind, Operation};

use crate::ast::{Collection, Row, Term};
use crate::error::Error;
use crate::query::Query;

/// Rows returned by a select.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Results {
    pub rows: Vec<Row>,
    /// Total number of matching rows ignoring paging, when known.
    pub found_rows: Option<u64>,
    /// Backend-native continuation terms (keyset cursors). Empty when the
    /// backend pages by offset.
    pub next: Vec<Term>,
}

impl Results {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            found_rows: None,
            next: Vec::new(),
        }
    }

    pub fn with_found_rows(mut self, found_rows: u64) -> Self {
        self.found_rows = Some(found_rows);
        self
    }

    pub fn with_next(mut self, next: Vec<Term>) -> Self {
        self.next = next;
        self
    }
}

pub trait Db: Send + Sync {
    fn select(&self, query: &Query) -> Result<Results, Error>;

    /// Inserts or merges `rows`, returning one resource key per row in
    /// input order. Missing generated keys are assigned by the backend.
    fn upsert(&self, collection: &Collection, rows: Vec<Row>) -> Result<Vec<String>, Error>;

    /// Merges partial rows into existing ones, returning the keys of the
    /// rows that were found.
    fn patch(&self, collection: &Collection, rows: Vec<Row>) -> Result<Vec<String>, Error>;

    fn delete(&self, collection: &Collection, rows: Vec<Row>) -> Result<usize, Error>;
}
