//! Nested document writes for POST, PUT and PATCH.
//!
//! A payload is folded into a node graph where every entity with a known
//! key appears exactly once, then written one generation at a time:
//!
//! 1. write the current generation and learn its keys, stamping parent keys
//!    onto one-to-many children
//! 2. post the children of each relationship as one batch through the front
//!    door
//! 3. patch many-to-one foreign keys that only became known in step 2
//! 4. compute the link sets each parent keeps
//! 5. upsert kept many-to-many links and unlink everything else, page by
//!    page
//!
//! Steps are not transactional. Whatever completed before a failure stays
//! written.

use super::{includes_term, key_from_href, response_rows, Context};
use crate::ast::schema::split_keys;
use crate::ast::{Collection, Index, Relationship, RelationshipKind, Row, Term};
use crate::error::Error;
use crate::json::{collapse, collapse_all, resolve_refs, unwrap_envelope, unwrap_single};
use crate::parser::parse_terms;
use crate::query::key_filter;
use crate::request::{Method, Request, Response};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
enum Link {
    One(Option<NodeId>),
    Many(Vec<NodeId>),
}

#[derive(Debug, Clone)]
struct Node {
    collection: Arc<Collection>,
    row: Row,
    /// Relationship properties present in the payload, by relationship name.
    rels: Vec<(String, Link)>,
    key: Option<String>,
    /// Only names an existing entity; nothing to write.
    reference_only: bool,
}

impl Node {
    fn link(&self, name: &str) -> Option<&Link> {
        self.rels.iter().find(|(n, _)| n == name).map(|(_, l)| l)
    }

    /// Primary key values, `None` when any is missing or null.
    fn key_values(&self) -> Option<Vec<Value>> {
        let index = self.collection.primary_index()?;
        index
            .values(&self.row)
            .map(|values| values.into_iter().cloned().collect())
    }
}

/// Payload nodes. Entities with the same collection and key share one node.
#[derive(Debug, Default)]
struct Graph {
    nodes: Vec<Node>,
    index: HashMap<(String, String), NodeId>,
}

impl Graph {
    fn add(&mut self, ctx: &Context, collection: &Arc<Collection>, value: &Value) -> Result<NodeId, Error> {
        let mut row = Row::new();
        let mut rels = Vec::new();
        let mut reference = None;

        match value {
            Value::Object(map) => {
                for (name, v) in map {
                    if name == "href" {
                        reference = v.as_str().and_then(key_from_href);
                        continue;
                    }
                    match collection.relationship(name) {
                        Some(rel) => {
                            let link = self.link(ctx, collection, rel, v)?;
                            rels.push((rel.name.clone(), link));
                        }
                        None => {
                            row.insert(name.clone(), v.clone());
                        }
                    }
                }
            }
            Value::String(s) if s.contains('/') => reference = key_from_href(s),
            Value::String(s) => reference = Some(s.clone()),
            Value::Number(n) => reference = Some(n.to_string()),
            other => {
                return Err(Error::bad_request(format!(
                    "'{}' expects an object or a reference, got {}",
                    collection.name, other
                )))
            }
        }

        if let Some(reference) = &reference {
            let index = collection.primary_index().ok_or_else(|| {
                Error::bad_request(format!("'{}' has no primary key to reference", collection.name))
            })?;
            for (column, v) in index.decode_row(reference)? {
                row.entry(column).or_insert(v);
            }
        }

        let key = collection.encode_key(&row);
        let reference_only = key.is_some()
            && rels.is_empty()
            && row.keys().all(|column| collection.is_key_column(column));

        if let Some(key) = &key {
            let slot = (collection.name.to_ascii_lowercase(), key.clone());
            if let Some(&id) = self.index.get(&slot) {
                let node = &mut self.nodes[id];
                node.row.extend(row);
                for (name, link) in rels {
                    if node.link(&name).is_none() {
                        node.rels.push((name, link));
                    }
                }
                node.reference_only &= reference_only;
                return Ok(id);
            }
            self.index.insert(slot, self.nodes.len());
        }

        self.nodes.push(Node {
            collection: collection.clone(),
            row,
            rels,
            key,
            reference_only,
        });
        Ok(self.nodes.len() - 1)
    }

    fn link(
        &mut self,
        ctx: &Context,
        collection: &Collection,
        rel: &Relationship,
        value: &Value,
    ) -> Result<Link, Error> {
        let related = ctx.collection(&rel.related)?;
        if rel.is_many_to_one() {
            return match value {
                Value::Null => Ok(Link::One(None)),
                Value::Array(_) => Err(Error::bad_request(format!(
                    "'{}.{}' refers to a single '{}', not a list",
                    collection.name, rel.name, related.name
                ))),
                v => Ok(Link::One(Some(self.add(ctx, &related, v)?))),
            };
        }
        match value {
            Value::Null => Ok(Link::Many(Vec::new())),
            Value::Array(items) => {
                let mut ids = Vec::with_capacity(items.len());
                for item in items {
                    let id = self.add(ctx, &related, item)?;
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                Ok(Link::Many(ids))
            }
            v => Ok(Link::Many(vec![self.add(ctx, &related, v)?])),
        }
    }

    fn children(&self, id: NodeId, name: &str) -> Vec<NodeId> {
        match self.nodes[id].link(name) {
            Some(Link::One(Some(child))) => vec![*child],
            Some(Link::Many(children)) => children.clone(),
            _ => Vec::new(),
        }
    }

    /// Renders a node and its subtree as a request body. A node already on
    /// `path` is rendered as its href to break cycles.
    fn serialize(&self, ctx: &Context, id: NodeId, path: &mut Vec<NodeId>) -> Option<Value> {
        let node = &self.nodes[id];
        if path.contains(&id) {
            return node
                .key
                .as_ref()
                .map(|key| Value::String(ctx.href(&node.collection, key)));
        }

        let mut doc = node.row.clone();
        path.push(id);
        for (name, link) in &node.rels {
            let rendered = match link {
                Link::One(None) => Some(Value::Null),
                Link::One(Some(child)) => self.serialize(ctx, *child, path),
                Link::Many(children) => Some(Value::Array(
                    children
                        .iter()
                        .filter_map(|c| self.serialize(ctx, *c, path))
                        .collect(),
                )),
            };
            if let Some(rendered) = rendered {
                doc.insert(name.clone(), rendered);
            }
        }
        path.pop();
        Some(Value::Object(doc))
    }

    /// Records a key assigned by the backend, filling in the key columns.
    fn set_key(&mut self, id: NodeId, key: String) -> Result<(), Error> {
        let node = &mut self.nodes[id];
        if let Some(index) = node.collection.primary_index() {
            for (column, v) in index.decode_row(&key)? {
                node.row.entry(column).or_insert(v);
            }
        }
        node.key = Some(key);
        Ok(())
    }
}

pub fn post(ctx: &Context, request: Request) -> Result<Response, Error> {
    let collection = ctx.collection(&request.collection)?;
    let items = prepare(&collection, &request)?;

    let mut writer = Writer {
        ctx,
        graph: Graph::default(),
    };
    let mut roots = Vec::with_capacity(items.len());
    for item in &items {
        let id = writer.graph.add(ctx, &collection, item)?;
        if !roots.contains(&id) {
            roots.push(id);
        }
    }

    writer.write(&collection, &roots, request.method, request.key.is_some())?;
    writer.post_children(&collection, &roots)?;
    writer.back_patch(&collection, &roots)?;
    writer.reconcile(&collection, &roots)?;

    let data = roots
        .iter()
        .map(|id| writer.summary(*id))
        .collect::<Result<Vec<_>, _>>()?;
    let body = json!({ "data": data });
    Ok(match request.method {
        Method::Patch => Response::ok(body),
        _ => Response::created(body),
    })
}

/// Resolves references and envelopes, applies `collapse` terms from the
/// query and stamps a URL key into a single-resource body.
fn prepare(collection: &Collection, request: &Request) -> Result<Vec<Value>, Error> {
    let mut body = request
        .body
        .clone()
        .ok_or_else(|| Error::bad_request(format!("{} requires a body", request)))?;
    resolve_refs(&mut body)?;
    let mut body = unwrap_envelope(body);

    if !request.query.trim().is_empty() {
        for term in parse_terms(&request.query)? {
            match term.token.as_str() {
                "collapse" => {
                    let paths: Vec<String> = term.args().iter().map(|p| p.to_string()).collect();
                    collapse(&mut body, &paths, "");
                }
                "collapseall" => collapse_all(&mut body),
                _ => {}
            }
        }
    }

    if let Some(key) = &request.key {
        body = unwrap_single(body);
        if body.is_array() || split_keys(key).len() != 1 {
            return Err(Error::bad_request(format!(
                "cannot write a batch to the single resource '{}'",
                request.path()
            )));
        }
        let index = collection.primary_index().ok_or_else(|| {
            Error::bad_request(format!("'{}' has no primary key", collection.name))
        })?;
        let key_row = index.decode_row(key)?;
        match body.as_object_mut() {
            Some(map) => map.extend(key_row),
            None => return Err(Error::bad_request("resource body must be an object")),
        }
    }

    match body {
        Value::Array(items) => Ok(items),
        Value::Object(_) => Ok(vec![body]),
        other => Err(Error::bad_request(format!(
            "expected an object or an array of objects, got {}",
            other
        ))),
    }
}

struct Writer<'c, 'a> {
    ctx: &'c Context<'a>,
    graph: Graph,
}

impl<'c, 'a> Writer<'c, 'a> {
    /// Step 1.
    fn write(
        &mut self,
        collection: &Arc<Collection>,
        roots: &[NodeId],
        method: Method,
        keyed: bool,
    ) -> Result<(), Error> {
        self.preset_foreign_keys(collection, roots);
        let rows: Vec<Row> = roots.iter().map(|id| self.graph.nodes[*id].row.clone()).collect();

        if method == Method::Patch || (method == Method::Put && keyed) {
            let expected = roots
                .iter()
                .map(|id| {
                    self.graph.nodes[*id].key.clone().ok_or_else(|| {
                        Error::bad_request(format!(
                            "{} to '{}' requires primary key values",
                            method, collection.name
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let found = self.ctx.db.patch(collection, rows)?;
            if let Some(missing) = expected.iter().find(|k| !found.contains(k)) {
                return Err(Error::not_found(format!(
                    "no '{}' resource for key '{}'",
                    collection.name, missing
                )));
            }
        } else {
            let keys = self.ctx.db.upsert(collection, rows)?;
            if keys.len() != roots.len() {
                return Err(Error::internal(format!(
                    "upsert into '{}' returned {} keys for {} rows",
                    collection.name,
                    keys.len(),
                    roots.len()
                )));
            }
            for (id, key) in roots.iter().zip(keys) {
                self.graph.set_key(*id, key)?;
            }
        }

        self.stamp_children(collection, roots)
    }

    /// Copies known many-to-one keys into the parents' foreign key columns.
    /// An explicit null clears the foreign key.
    fn preset_foreign_keys(&mut self, collection: &Collection, roots: &[NodeId]) {
        for rel in collection.relationships.iter().filter(|r| r.is_many_to_one()) {
            for &root in roots {
                let values = match self.graph.nodes[root].link(&rel.name) {
                    Some(Link::One(None)) => vec![Value::Null; rel.fk_index1.columns.len()],
                    Some(Link::One(Some(child))) => match self.graph.nodes[*child].key_values() {
                        Some(values) => values,
                        None => continue,
                    },
                    _ => continue,
                };
                let row = &mut self.graph.nodes[root].row;
                for (column, v) in rel.fk_index1.columns.iter().zip(values) {
                    row.insert(column.clone(), v);
                }
            }
        }
    }

    /// Stamps each parent's key onto its one-to-many children.
    fn stamp_children(&mut self, collection: &Collection, roots: &[NodeId]) -> Result<(), Error> {
        for rel in collection.relationships.iter().filter(|r| r.is_one_to_many()) {
            for &root in roots {
                let children = self.graph.children(root, &rel.name);
                if children.is_empty() {
                    continue;
                }
                let parent = self.graph.nodes[root].key_values().ok_or_else(|| {
                    Error::internal(format!("'{}' row has no key after it was written", collection.name))
                })?;
                for child in children {
                    let node = &mut self.graph.nodes[child];
                    for (column, v) in rel.fk_index1.columns.iter().zip(&parent) {
                        node.row.insert(column.clone(), v.clone());
                    }
                    node.key = node.collection.encode_key(&node.row);
                    if !rel.fk_index1.columns.iter().all(|c| node.collection.is_key_column(c)) {
                        node.reference_only = false;
                    }
                }
            }
        }
        Ok(())
    }

    /// Step 2: one nested POST per relationship.
    fn post_children(&mut self, collection: &Collection, roots: &[NodeId]) -> Result<(), Error> {
        for rel in &collection.relationships {
            let mut batch: Vec<NodeId> = Vec::new();
            for &root in roots {
                for child in self.graph.children(root, &rel.name) {
                    // roots are this generation; they were written in step 1
                    if !batch.contains(&child) && !roots.contains(&child) {
                        batch.push(child);
                    }
                }
            }

            let mut posted = Vec::new();
            let mut docs = Vec::new();
            for id in batch {
                if self.graph.nodes[id].reference_only {
                    continue;
                }
                let mut path = roots.to_vec();
                if let Some(doc) = self.graph.serialize(self.ctx, id, &mut path) {
                    docs.push(doc);
                    posted.push(id);
                }
            }
            if docs.is_empty() {
                continue;
            }

            let related = self.ctx.collection(&rel.related)?;
            tracing::debug!(
                collection = %collection.name,
                relationship = %rel.name,
                children = docs.len(),
                "posting related documents"
            );
            let response = self.ctx.call(Request::post(related.name.clone(), Value::Array(docs)));
            let body = response.into_result()?;
            let returned = response_rows(body.as_ref());
            if returned.len() != posted.len() {
                return Err(Error::internal(format!(
                    "can not determine if all children were updated: '{}.{}' sent {} got {}",
                    collection.name,
                    rel.name,
                    posted.len(),
                    returned.len()
                )));
            }

            for (id, mut row) in posted.into_iter().zip(returned) {
                let key = row
                    .remove("href")
                    .and_then(|h| h.as_str().and_then(key_from_href))
                    .or_else(|| related.encode_key(&row));
                let node = &mut self.graph.nodes[id];
                node.row.extend(row);
                if let Some(key) = key {
                    node.key = Some(key);
                }
            }
        }
        Ok(())
    }

    /// Step 3.
    fn back_patch(&mut self, collection: &Collection, roots: &[NodeId]) -> Result<(), Error> {
        let index = match collection.primary_index() {
            Some(index) => index,
            None => return Ok(()),
        };
        let mut patches = Vec::new();

        for &root in roots {
            let mut changed = false;
            for rel in collection.relationships.iter().filter(|r| r.is_many_to_one()) {
                let Some(Link::One(Some(child))) = self.graph.nodes[root].link(&rel.name).cloned() else {
                    continue;
                };
                let values = self.graph.nodes[child].key_values().ok_or_else(|| {
                    Error::internal(format!(
                        "'{}' referenced by '{}.{}' has no key",
                        rel.related, collection.name, rel.name
                    ))
                })?;
                let row = &mut self.graph.nodes[root].row;
                for (column, v) in rel.fk_index1.columns.iter().zip(values) {
                    if row.get(column) != Some(&v) {
                        row.insert(column.clone(), v);
                        changed = true;
                    }
                }
            }
            if !changed {
                continue;
            }

            let row = &self.graph.nodes[root].row;
            let mut patch = Row::new();
            for column in &index.columns {
                let v = row.get(column).filter(|v| !v.is_null()).ok_or_else(|| {
                    Error::internal(format!("'{}' row lost key column '{}'", collection.name, column))
                })?;
                patch.insert(column.clone(), v.clone());
            }
            for rel in collection.relationships.iter().filter(|r| r.is_many_to_one()) {
                for column in &rel.fk_index1.columns {
                    if let Some(v) = row.get(column) {
                        patch.insert(column.clone(), v.clone());
                    }
                }
            }
            patches.push(patch);
        }

        if !patches.is_empty() {
            self.ctx.db.patch(collection, patches)?;
        }
        Ok(())
    }

    /// Steps 4 and 5, for relationships present in the payload.
    fn reconcile(&mut self, collection: &Collection, roots: &[NodeId]) -> Result<(), Error> {
        for rel in collection.relationships.iter().filter(|r| !r.is_many_to_one()) {
            for &root in roots {
                let Some(Link::Many(children)) = self.graph.nodes[root].link(&rel.name).cloned() else {
                    continue;
                };
                let parent = self.graph.nodes[root].key.clone().ok_or_else(|| {
                    Error::internal(format!("'{}' row has no key after it was written", collection.name))
                })?;
                match rel.kind {
                    RelationshipKind::OneToMany => self.unlink_children(rel, &parent, &children)?,
                    RelationshipKind::ManyToMany => self.relink(rel, root, &parent, &children)?,
                    RelationshipKind::ManyToOne => {}
                }
            }
        }
        Ok(())
    }

    /// Orphans one-to-many children that are no longer listed. Children
    /// whose foreign key is part of their own key are deleted instead.
    fn unlink_children(&self, rel: &Relationship, parent: &str, children: &[NodeId]) -> Result<(), Error> {
        let related = self.ctx.collection(&rel.related)?;
        let pk = primary(&related)?;
        let kept = children
            .iter()
            .map(|id| {
                self.graph.nodes[*id].key.clone().ok_or_else(|| {
                    Error::internal(format!("'{}' child has no key after it was written", related.name))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let fk = &rel.fk_index1;
        let delete = fk.columns.iter().any(|c| related.is_key_column(c));
        let mut columns = pk.columns.clone();
        columns.extend(fk.columns.iter().cloned());

        let ctx = self.ctx;
        self.sweep(&related, fk, parent, &kept, &columns, |rows| {
            let keys: Vec<String> = rows.iter().filter_map(|r| related.encode_key(r)).collect();
            if keys.is_empty() {
                return Ok(());
            }
            let request = if delete {
                Request::delete(related.name.clone()).with_key(keys.join(","))
            } else {
                let body = rows
                    .iter()
                    .map(|r| {
                        let mut orphan: Row = pk
                            .columns
                            .iter()
                            .filter_map(|c| r.get(c).map(|v| (c.clone(), v.clone())))
                            .collect();
                        for column in &fk.columns {
                            orphan.insert(column.clone(), Value::Null);
                        }
                        Value::Object(orphan)
                    })
                    .collect();
                Request::patch(related.name.clone(), Value::Array(body))
            };
            ctx.call(request).into_result().map(|_| ())
        })
    }

    /// Upserts the kept many-to-many links and deletes the rest.
    fn relink(&self, rel: &Relationship, root: NodeId, parent: &str, children: &[NodeId]) -> Result<(), Error> {
        let join_name = rel.join_collection().unwrap_or(rel.fk_index1.collection.as_str());
        let join = self.ctx.collection(join_name)?;
        let fk1 = &rel.fk_index1;
        let fk2 = rel.fk_index2.as_ref().ok_or_else(|| {
            Error::internal(format!("many-to-many '{}' has no second key", rel.name))
        })?;
        let parent_values = self.graph.nodes[root].key_values().ok_or_else(|| {
            Error::internal(format!("'{}' row has no key values", rel.collection))
        })?;

        let mut links = Vec::with_capacity(children.len());
        for &child in children {
            let child_values = self.graph.nodes[child].key_values().ok_or_else(|| {
                Error::bad_request(format!(
                    "'{}' linked through '{}' is missing a key value",
                    rel.related, rel.name
                ))
            })?;
            let mut link = Row::new();
            for (column, v) in fk1.columns.iter().zip(&parent_values) {
                link.insert(column.clone(), v.clone());
            }
            for (column, v) in fk2.columns.iter().zip(child_values) {
                link.insert(column.clone(), v);
            }
            links.push(link);
        }

        let kept = links
            .iter()
            .map(|link| {
                join.encode_key(link).ok_or_else(|| {
                    Error::internal(format!(
                        "primary key of '{}' is not covered by its link columns",
                        join.name
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if !links.is_empty() {
            self.ctx.db.upsert(&join, links)?;
        }

        let pk = primary(&join)?;
        let ctx = self.ctx;
        self.sweep(&join, fk1, parent, &kept, &pk.columns, |rows| {
            let keys: Vec<String> = rows.iter().filter_map(|r| join.encode_key(r)).collect();
            if keys.is_empty() {
                return Ok(());
            }
            let request = Request::delete(join.name.clone()).with_key(keys.join(","));
            ctx.call(request).into_result().map(|_| ())
        })
    }

    /// Pages through rows of `collection` linked to `parent` by `link` that
    /// are not in `kept`, handing each page to `unlink`. Every page is
    /// fetched from offset zero since unlinked rows drop out of the filter.
    fn sweep(
        &self,
        collection: &Collection,
        link: &Index,
        parent: &str,
        kept: &[String],
        columns: &[String],
        mut unlink: impl FnMut(Vec<Row>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let pk = primary(collection)?;
        let page_size = self.ctx.config.reconcile_page_size.max(1);

        let mut terms = vec![key_filter(link, &[parent.to_string()])?];
        if !kept.is_empty() {
            terms.push(Term::term("not", vec![key_filter(pk, kept)?]));
        }
        terms.push(includes_term(columns.iter()));
        terms.push(Term::call("limit", &[page_size.to_string().as_str()]));
        let rql = terms
            .iter()
            .map(Term::to_string)
            .collect::<Vec<_>>()
            .join("&");

        for _ in 0..self.ctx.config.max_iterations {
            let response = self.ctx.call(Request::get(collection.name.clone()).with_query(rql.clone()));
            let body = response.into_result()?;
            let rows = response_rows(body.as_ref());
            let count = rows.len() as u64;
            if count > 0 {
                unlink(rows)?;
            }
            if count < page_size {
                return Ok(());
            }
        }

        tracing::warn!(
            collection = %collection.name,
            parent,
            max_iterations = self.ctx.config.max_iterations,
            "stale link sweep hit its iteration limit"
        );
        Err(Error::internal(format!(
            "unlinking stale '{}' rows did not finish",
            collection.name
        )))
    }

    /// `{href, key columns}` of a written root.
    fn summary(&self, id: NodeId) -> Result<Value, Error> {
        let node = &self.graph.nodes[id];
        let key = node.key.as_ref().ok_or_else(|| {
            Error::internal(format!("'{}' row has no key after it was written", node.collection.name))
        })?;
        let mut out = Map::new();
        out.insert("href".into(), Value::String(self.ctx.href(&node.collection, key)));
        if let Some(index) = node.collection.primary_index() {
            for column in &index.columns {
                if let Some(v) = node.row.get(column) {
                    out.insert(column.clone(), v.clone());
                }
            }
        }
        Ok(Value::Object(out))
    }
}

fn primary(collection: &Collection) -> Result<&Index, Error> {
    collection.primary_index().ok_or_else(|| {
        Error::bad_request(format!("'{}' has no primary key", collection.name))
    })
}
