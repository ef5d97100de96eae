//! Select rows and expand nested relationships.
//!
//! Expansion runs one generation at a time. Per requested relationship the
//! parent/child key pairs come from one query (or from the parent rows for
//! many-to-one), unseen child keys are fetched in batches through the
//! front door, and the next generation is expanded from there. Fetched
//! rows are cached by key for the whole request, so an entity referenced
//! by several parents is fetched once.

use super::{includes_term, response_rows, Context};
use crate::ast::schema::encode_values;
use crate::ast::{Collection, Relationship, RelationshipKind, Row, Term};
use crate::error::Error;
use crate::json::exclude;
use crate::query::{key_filter, Query};
use crate::request::{Request, Response};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// What a parent's relationship resolved to.
#[derive(Debug, Clone, PartialEq)]
enum Link {
    One(Option<String>),
    Many(Vec<String>),
    /// The caller may not see the related rows.
    Hidden,
}

type CacheKey = (String, String);
type LinkKey = (String, String, String);

pub fn get(ctx: &Context, request: Request) -> Result<Response, Error> {
    let collection = ctx.collection(&request.collection)?;
    let mut query = ctx.query(&collection, &request)?;

    if !query.select().includes().is_empty() {
        query.with_term(includes_term(required_columns(&collection).iter()))?;
    }

    let expands = query.select().expands();
    check_expands(ctx, &collection, &expands)?;

    let results = ctx.db.select(&query)?;
    if request.key.is_some() && results.rows.is_empty() {
        return Err(Error::not_found(format!(
            "no '{}' resource for key '{}'",
            collection.name,
            request.key.as_deref().unwrap_or_default()
        )));
    }

    let returned = results.rows.len() as u64;
    let found_rows = results.found_rows.unwrap_or(returned);
    let page = query.page();

    let mut expander = Expander::new(ctx, &expands);
    let mut data = Value::Array(expander.run(&collection, results.rows)?);
    exclude(&mut data, &query.select().excludes());

    let mut meta = Map::new();
    meta.insert("foundRows".into(), json!(found_rows));
    meta.insert("pageSize".into(), json!(page.limit()));
    meta.insert("pageNum".into(), json!(page.page_num()));

    let next = if !results.next.is_empty() {
        Some(query.next_with(results.next)?)
    } else if returned > 0 && returned == page.limit() && page.offset().saturating_add(returned) < found_rows {
        Some(query.next_page())
    } else {
        None
    };
    if let Some(next) = next {
        let href = format!(
            "{}/{}?{}",
            ctx.config.base_path.trim_end_matches('/'),
            collection.name,
            next
        );
        meta.insert("next".into(), Value::String(href));
    }

    Ok(Response::ok(json!({ "meta": meta, "data": data })))
}

/// Every segment of every expand path must name a relationship of the
/// collection reached so far.
fn check_expands(ctx: &Context, collection: &Arc<Collection>, expands: &[String]) -> Result<(), Error> {
    for path in expands {
        let mut current = collection.clone();
        for segment in path.split('.') {
            let rel = current.relationship(segment).ok_or_else(|| {
                Error::not_found(format!(
                    "collection '{}' has no relationship '{}' in expand '{}'",
                    current.name, segment, path
                ))
            })?;
            let related = ctx.collection(&rel.related)?;
            current = related;
        }
    }
    Ok(())
}

/// Primary key columns plus many-to-one foreign key columns: what a row
/// needs for its href and for expansion.
fn required_columns(collection: &Collection) -> Vec<String> {
    let mut columns: Vec<String> = collection
        .primary_index()
        .map(|i| i.columns.clone())
        .unwrap_or_default();
    for rel in collection.relationships.iter().filter(|r| r.is_many_to_one()) {
        columns.extend(rel.fk_index1.columns.iter().cloned());
    }
    columns
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_ascii_lowercase()
    } else {
        format!("{}.{}", prefix, name.to_ascii_lowercase())
    }
}

fn cache_key(collection: &str, key: &str) -> CacheKey {
    (collection.to_ascii_lowercase(), key.to_string())
}

fn link_key(collection: &str, key: &str, rel: &str) -> LinkKey {
    (
        collection.to_ascii_lowercase(),
        key.to_string(),
        rel.to_ascii_lowercase(),
    )
}

struct Expander<'c, 'a> {
    ctx: &'c Context<'a>,
    expands: &'c [String],
    cache: HashMap<CacheKey, Row>,
    links: HashMap<LinkKey, Link>,
}

impl<'c, 'a> Expander<'c, 'a> {
    fn new(ctx: &'c Context<'a>, expands: &'c [String]) -> Self {
        Self {
            ctx,
            expands,
            cache: HashMap::new(),
            links: HashMap::new(),
        }
    }

    /// True when `path` or something below it was asked for.
    fn wants(&self, path: &str) -> bool {
        self.expands
            .iter()
            .any(|e| e == path || e.starts_with(&format!("{}.", path)))
    }

    fn run(&mut self, collection: &Arc<Collection>, rows: Vec<Row>) -> Result<Vec<Value>, Error> {
        let keys: Vec<Option<String>> = rows.iter().map(|r| collection.encode_key(r)).collect();
        let parent_keys: Vec<String> = keys.iter().flatten().cloned().collect();

        if !self.expands.is_empty() {
            for (key, row) in keys.iter().zip(&rows) {
                if let Some(key) = key {
                    self.cache.insert(cache_key(&collection.name, key), row.clone());
                }
            }
            self.expand(collection, &parent_keys, "")?;
        }

        Ok(rows
            .into_iter()
            .zip(keys)
            .map(|(row, key)| self.render(collection, row, key.as_deref(), ""))
            .collect())
    }

    fn expand(
        &mut self,
        collection: &Arc<Collection>,
        parent_keys: &[String],
        prefix: &str,
    ) -> Result<(), Error> {
        for rel in &collection.relationships {
            let path = join_path(prefix, &rel.name);
            if !self.wants(&path) {
                continue;
            }
            let pending: Vec<String> = parent_keys
                .iter()
                .filter(|k| {
                    !self
                        .links
                        .contains_key(&link_key(&collection.name, k, &rel.name))
                })
                .cloned()
                .collect();
            let related = self.ctx.collection(&rel.related)?;

            let mut children = Vec::new();
            if !pending.is_empty() {
                match self.link_generation(collection, rel, &related, &pending)? {
                    Some(linked) => children = linked,
                    None => {
                        for key in &pending {
                            self.links
                                .insert(link_key(&collection.name, key, &rel.name), Link::Hidden);
                        }
                        continue;
                    }
                }
            }

            // children already linked by an earlier path still need their
            // own deeper relationships expanded
            for key in parent_keys {
                match self.links.get(&link_key(&collection.name, key, &rel.name)) {
                    Some(Link::One(Some(child))) => children.push(child.clone()),
                    Some(Link::Many(list)) => children.extend(list.iter().cloned()),
                    _ => {}
                }
            }
            let mut seen = HashSet::new();
            children.retain(|k| seen.insert(k.clone()));

            let deeper = self
                .expands
                .iter()
                .any(|e| e.starts_with(&format!("{}.", path)));
            if deeper && !children.is_empty() {
                self.expand(&related, &children, &path)?;
            }
        }
        Ok(())
    }

    /// Records links for `parents` and fetches unseen children. Returns the
    /// child keys, or `None` when the caller may not see the relationship.
    fn link_generation(
        &mut self,
        collection: &Collection,
        rel: &Relationship,
        related: &Arc<Collection>,
        parents: &[String],
    ) -> Result<Option<Vec<String>>, Error> {
        let pairs = match rel.kind {
            RelationshipKind::ManyToOne => {
                let mut pairs = Vec::new();
                for parent in parents {
                    let child = self
                        .cache
                        .get(&cache_key(&collection.name, parent))
                        .and_then(|row| rel.fk_index1.encode(row));
                    match child {
                        Some(child) => pairs.push((parent.clone(), child)),
                        None => {
                            self.links.insert(
                                link_key(&collection.name, parent, &rel.name),
                                Link::One(None),
                            );
                        }
                    }
                }
                pairs
            }
            RelationshipKind::OneToMany | RelationshipKind::ManyToMany => {
                for parent in parents {
                    self.links.insert(
                        link_key(&collection.name, parent, &rel.name),
                        Link::Many(Vec::new()),
                    );
                }
                match self.key_pairs(rel, related, parents)? {
                    Some(pairs) => pairs,
                    None => return Ok(None),
                }
            }
        };

        let mut children: Vec<String> = Vec::new();
        for (parent, child) in &pairs {
            let link = self
                .links
                .entry(link_key(&collection.name, parent, &rel.name))
                .or_insert_with(|| Link::Many(Vec::new()));
            if rel.is_many_to_one() {
                *link = Link::One(Some(child.clone()));
            } else if let Link::Many(list) = link {
                if !list.contains(child) {
                    list.push(child.clone());
                }
            }
            if !children.contains(child) {
                children.push(child.clone());
            }
        }

        let unseen: Vec<String> = children
            .iter()
            .filter(|k| !self.cache.contains_key(&cache_key(&related.name, k)))
            .cloned()
            .collect();
        if !self.fetch(related, &unseen)? {
            return Ok(None);
        }
        Ok(Some(children))
    }

    /// One query returning every (parent key, child key) pair of a
    /// to-many relationship for `parents`.
    fn key_pairs(
        &self,
        rel: &Relationship,
        related: &Arc<Collection>,
        parents: &[String],
    ) -> Result<Option<Vec<(String, String)>>, Error> {
        let fk1 = &rel.fk_index1;
        let (target, child_columns) = match rel.kind {
            RelationshipKind::ManyToMany => {
                let fk2 = rel.fk_index2.as_ref().ok_or_else(|| {
                    Error::internal(format!("many-to-many '{}' has no second key", rel.name))
                })?;
                (fk1.collection.clone(), fk2.columns.clone())
            }
            _ => (
                related.name.clone(),
                related
                    .primary_index()
                    .map(|i| i.columns.clone())
                    .unwrap_or_default(),
            ),
        };

        let mut columns = fk1.columns.clone();
        for column in &child_columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        let page_size = self.ctx.config.expand_page_size.max(1);
        let terms = [
            key_filter(fk1, parents)?,
            includes_term(columns.iter()),
            Term::call(
                "sort",
                &columns.iter().map(String::as_str).collect::<Vec<_>>(),
            ),
            Term::call("limit", &[page_size.to_string().as_str()]),
        ];
        let rql = terms
            .iter()
            .map(Term::to_string)
            .collect::<Vec<_>>()
            .join("&");

        let mut pairs = Vec::new();
        let mut offset: u64 = 0;
        for _ in 0..self.ctx.config.max_iterations {
            let request = Request::get(target.clone())
                .with_query(format!("{}&offset({})", rql, offset));
            let Some(rows) = self.child_rows(self.ctx.call(request))? else {
                return Ok(None);
            };

            for row in &rows {
                let parent = values_key(row, &fk1.columns);
                let child = values_key(row, &child_columns);
                if let (Some(parent), Some(child)) = (parent, child) {
                    pairs.push((parent, child));
                }
            }
            if (rows.len() as u64) < page_size {
                return Ok(Some(pairs));
            }
            offset = offset.saturating_add(page_size);
        }

        tracing::warn!(
            relationship = %rel.name,
            max_iterations = self.ctx.config.max_iterations,
            "expansion hit its iteration limit"
        );
        Err(Error::internal(format!(
            "expanding '{}' did not finish",
            rel.name
        )))
    }

    /// Fetches `keys` of `related` into the cache, batched. Returns false
    /// when the caller may not see them.
    fn fetch(&mut self, related: &Arc<Collection>, keys: &[String]) -> Result<bool, Error> {
        let batch_size = self.ctx.config.fetch_batch_size.max(1);
        for batch in keys.chunks(batch_size) {
            let request = Request::get(related.name.clone())
                .with_key(batch.join(","))
                .with_query(format!("limit({})", batch.len()));
            let Some(rows) = self.child_rows(self.ctx.call(request))? else {
                return Ok(false);
            };
            for row in rows {
                if let Some(key) = related.encode_key(&row) {
                    self.cache.insert(cache_key(&related.name, &key), row);
                }
            }
        }
        Ok(true)
    }

    /// 401/403 hide the relationship, 404 means no rows, any other failure
    /// is passed up unchanged.
    fn child_rows(&self, response: Response) -> Result<Option<Vec<Row>>, Error> {
        match response.status {
            401 | 403 => Ok(None),
            404 => Ok(Some(Vec::new())),
            _ => {
                let body = response.into_result()?;
                Ok(Some(response_rows(body.as_ref())))
            }
        }
    }

    fn render(&self, collection: &Collection, mut row: Row, key: Option<&str>, prefix: &str) -> Value {
        if let Some(key) = key {
            row.insert("href".into(), Value::String(self.ctx.href(collection, key)));
        }

        for rel in &collection.relationships {
            let path = join_path(prefix, &rel.name);
            let related = self.ctx.schema.get(&rel.related);

            if self.wants(&path) {
                let link = key.and_then(|k| self.links.get(&link_key(&collection.name, k, &rel.name)));
                let value = match (link, related) {
                    (Some(Link::One(Some(child))), Some(related)) => {
                        self.render_cached(related, child, &path).unwrap_or(Value::Null)
                    }
                    (Some(Link::Many(children)), Some(related)) => Value::Array(
                        children
                            .iter()
                            .filter_map(|c| self.render_cached(related, c, &path))
                            .collect(),
                    ),
                    (None, _) if !rel.is_many_to_one() => Value::Array(Vec::new()),
                    _ => Value::Null,
                };
                row.insert(rel.name.clone(), value);
            } else if rel.is_many_to_one() {
                let value = match (rel.fk_index1.encode(&row), related) {
                    (Some(fk), Some(related)) => json!({ "href": self.ctx.href(related, &fk) }),
                    _ => Value::Null,
                };
                row.insert(rel.name.clone(), value);
            }
        }
        Value::Object(row)
    }

    fn render_cached(&self, collection: &Collection, key: &str, path: &str) -> Option<Value> {
        let row = self.cache.get(&cache_key(&collection.name, key))?.clone();
        Some(self.render(collection, row, Some(key), path))
    }
}

/// Resource key built from `columns` of `row`, `None` when any is null.
fn values_key(row: &Row, columns: &[String]) -> Option<String> {
    let values: Option<Vec<&Value>> = columns
        .iter()
        .map(|c| row.get(c).filter(|v| !v.is_null()))
        .collect();
    values.and_then(|v| encode_values(&v))
}
