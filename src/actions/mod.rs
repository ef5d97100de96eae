//! Request handlers behind the engine.
//!
//! - [`get`]: select rows and expand nested relationships.
//! - [`post`]: upsert nested documents and reconcile relationship links.
//! - [`delete`]: page through matching keys and delete them.
//!
//! Handlers never recurse directly. Nested reads and writes go back out
//! through the [`RequestExecutor`] so that every fan-out call passes the
//! same pipeline as a client call.

pub mod delete;
pub mod get;
pub mod post;

use crate::ast::schema::split_keys;
use crate::ast::{Collection, Row, Term};
use crate::backend::Db;
use crate::config::Config;
use crate::error::Error;
use crate::query::Query;
use crate::request::{Request, RequestExecutor, Response};
use crate::schema_cache::SchemaCache;
use serde_json::Value;
use std::sync::Arc;

/// Everything a handler needs for one request.
pub struct Context<'a> {
    pub schema: &'a SchemaCache,
    pub db: &'a dyn Db,
    pub config: &'a Config,
    pub front: &'a dyn RequestExecutor,
}

impl<'a> Context<'a> {
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>, Error> {
        self.schema.collection(name)
    }

    pub fn href(&self, collection: &Collection, key: &str) -> String {
        collection.href(&self.config.base_path, key)
    }

    /// Builds the query for `request`: its RQL plus, when the URL names
    /// resource keys, a `_key` filter on the primary index.
    pub fn query(&self, collection: &Arc<Collection>, request: &Request) -> Result<Query, Error> {
        let mut query = Query::new(Some(collection.clone())).with_config(self.config);
        query.with_rql(&request.query)?;
        if let Some(key) = &request.key {
            query.with_term(key_term(collection, key)?)?;
        }
        Ok(query)
    }

    /// Sends a nested request through the front door.
    pub fn call(&self, request: Request) -> Response {
        tracing::debug!(%request, "nested request");
        self.front.execute(request)
    }
}

/// `_key(pk_index, k1, k2, ...)` for a comma separated key list.
pub fn key_term(collection: &Collection, keys: &str) -> Result<Term, Error> {
    let index = collection.primary_index().ok_or_else(|| {
        Error::bad_request(format!("collection '{}' has no primary key", collection.name))
    })?;
    let keys = split_keys(keys);
    if keys.is_empty() {
        return Err(Error::bad_request("empty resource key"));
    }
    let mut terms = vec![Term::leaf(index.name.as_str())];
    terms.extend(keys.into_iter().map(Term::leaf));
    Ok(Term::term("_key", terms))
}

/// Rows of a response body: the `data` array of an envelope, a bare array,
/// or a single object.
pub fn response_rows(body: Option<&Value>) -> Vec<Row> {
    let Some(body) = body else {
        return Vec::new();
    };
    let data = body.get("data").unwrap_or(body);
    match data {
        Value::Array(items) => items.iter().filter_map(|v| v.as_object().cloned()).collect(),
        Value::Object(map) => vec![map.clone()],
        _ => Vec::new(),
    }
}

/// Resource key at the end of an href such as `/api/orders/10248`.
pub fn key_from_href(href: &str) -> Option<String> {
    let path = href.split('?').next().unwrap_or(href);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

/// A `includes(...)` term over `columns`, skipping duplicates.
pub fn includes_term<'c>(columns: impl IntoIterator<Item = &'c String>) -> Term {
    let mut seen: Vec<&str> = Vec::new();
    for column in columns {
        if !seen.contains(&column.as_str()) {
            seen.push(column);
        }
    }
    Term::call("includes", &seen)
}
