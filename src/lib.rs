//! # REST RQL
//!
//! Resource Query Language parsing plus the read and write orchestration of
//! a REST API serving nested JSON documents over SQL or NoSQL storage.
//!
//! ## Features
//!
//! - **RQL parsing**: `eq(a,b)&sort=-c` style query strings into a [`Term`] tree,
//!   with `name=value` sugar, quoting and explicit errors for malformed input
//! - **Clause routing**: terms are claimed by the Where, Page, Order, Group and
//!   Select clauses in that fixed order
//! - **Relationship filters**: `customer.country=Germany` becomes an existence
//!   check against the related collection
//! - **Resource keys**: `_key(index,k1,k2)` expands into column filters,
//!   composite keys included
//! - **SQL generation**: parameterized PostgreSQL with `EXISTS` sub-selects
//! - **Nested reads**: `expand(customer,details.product)` embeds related
//!   documents, fetching each related entity once per request
//! - **Nested writes**: POST/PUT/PATCH of whole document trees, one batch per
//!   relationship, with stale links unlinked afterwards
//!
//! ## Quick Start
//!
//! ```rust
//! use rest_rql::{parse, Query};
//!
//! let term = parse("eq(orderId,10257)").unwrap();
//! assert_eq!(term.token, "eq");
//! assert_eq!(term.args(), vec!["orderId", "10257"]);
//!
//! let query = Query::parse(None, "shipCity=Berlin&limit=10&sort(-freight)").unwrap();
//! assert_eq!(query.page().limit(), 10);
//! assert_eq!(query.to_string(), "eq(shipCity,Berlin)&limit(10)&sort(-freight)");
//! ```
//!
//! ## Filter Functions
//!
//! - `eq`, `ne`, `gt`, `ge`, `lt`, `le` - comparisons
//! - `in`, `out` - membership
//! - `like`, `sw`, `ew`, `w`, `wo` - patterns, `*` is the wildcard
//! - `n`, `nn`, `emp`, `nemp` - null and empty checks
//! - `and`, `or`, `not` - logic, arbitrarily nested
//!
//! ## SQL
//!
//! ```rust
//! use rest_rql::{rql_to_sql, Collection};
//! use std::sync::Arc;
//!
//! let orders = Arc::new(Collection::new("orders").with_primary_key(&["orderId"]));
//! let result = rql_to_sql(orders, "eq(shipCity,Berlin)&limit(10)").unwrap();
//! assert_eq!(
//!     result.query,
//!     "SELECT * FROM \"orders\" WHERE \"shipCity\" = $1 LIMIT $2 OFFSET $3"
//! );
//! ```
//!
//! ## Engine
//!
//! ```rust
//! use rest_rql::{Collection, Engine, MemoryDb, Request, RequestExecutor, SchemaCache};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let schema = SchemaCache::new()
//!     .with_collection(Collection::new("customers").with_primary_key(&["customerId"]));
//! let engine = Engine::new(schema.clone(), Arc::new(MemoryDb::new(schema)));
//!
//! let created = engine.execute(Request::post(
//!     "customers",
//!     json!({"customerId": "ALFKI", "city": "Berlin"}),
//! ));
//! assert_eq!(created.status, 201);
//!
//! let found = engine.execute(Request::get("customers").with_query("city=Berlin"));
//! assert_eq!(found.data().unwrap()[0]["href"], "/customers/ALFKI");
//! ```

pub mod actions;
pub mod ast;
pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod json;
pub mod parser;
pub mod query;
pub mod request;
pub mod schema_cache;
pub mod sql;

pub use ast::{Collection, Direction, Index, IndexKind, Relationship, RelationshipKind, Row, Sort, Term};
pub use backend::{Db, MemoryDb, Results};
pub use config::Config;
pub use engine::Engine;
pub use error::{ApiError, Error, ParseError, SqlError};
pub use parser::{parse, parse_terms};
pub use query::{Clause, Query};
pub use request::{Method, Request, RequestExecutor, Response};
pub use schema_cache::SchemaCache;
pub use sql::{QueryResult, SqlBuilder};

use std::sync::Arc;

/// Parses `&`-joined RQL into a query against `collection`.
///
/// # Examples
///
/// ```
/// use rest_rql::parse_query;
///
/// let query = parse_query(None, "page=3&pageSize=10").unwrap();
/// assert_eq!(query.page().offset(), 20);
/// assert_eq!(query.page().limit(), 10);
/// ```
pub fn parse_query(collection: Option<Arc<Collection>>, rql: &str) -> Result<Query, Error> {
    Query::parse(collection, rql)
}

/// Renders a query as a parameterized PostgreSQL SELECT.
pub fn to_sql(query: &Query) -> Result<QueryResult, Error> {
    Ok(SqlBuilder::new().build_select(query)?)
}

/// Parses RQL against `collection` and renders it as SQL in one step.
pub fn rql_to_sql(collection: Arc<Collection>, rql: &str) -> Result<QueryResult, Error> {
    to_sql(&Query::parse(Some(collection), rql)?)
}
