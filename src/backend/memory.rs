use super::{Db, Results};
use crate::ast::schema::value_to_key_part;
use crate::ast::{Collection, Relationship, RelationshipKind, Row, Term};
use crate::error::{Error, SqlError};
use crate::query::{relationship_column, Clause, Query};
use crate::schema_cache::SchemaCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Select,
    Upsert,
    Patch,
    Delete,
}

/// One backend call, recorded for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OpKind,
    pub collection: String,
    /// Rendered query for selects, row count for mutations.
    pub detail: String,
}

/// Backend holding every table in memory.
///
/// Evaluates the full filter vocabulary, including relationship
/// existence checks, so the actions can be exercised without a database.
pub struct MemoryDb {
    schema: SchemaCache,
    tables: Mutex<HashMap<String, Vec<Row>>>,
    log: Mutex<Vec<Operation>>,
}

impl MemoryDb {
    pub fn new(schema: SchemaCache) -> Self {
        Self {
            schema,
            tables: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn schema(&self) -> &SchemaCache {
        &self.schema
    }

    /// Seeds rows as-is, bypassing key generation and the operation log.
    pub fn insert(&self, collection: &str, rows: Vec<Row>) {
        self.tables
            .lock()
            .entry(collection.to_ascii_lowercase())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, collection: &str) -> Vec<Row> {
        self.tables
            .lock()
            .get(&collection.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    pub fn log(&self) -> Vec<Operation> {
        self.log.lock().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    /// Number of logged operations of `kind` against `collection`.
    pub fn count(&self, kind: OpKind, collection: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|op| op.kind == kind && op.collection.eq_ignore_ascii_case(collection))
            .count()
    }

    fn record(&self, kind: OpKind, collection: &str, detail: String) {
        tracing::debug!(?kind, collection, %detail, "memory backend call");
        self.log.lock().push(Operation {
            kind,
            collection: collection.to_string(),
            detail,
        });
    }

    fn key_of(collection: &Collection, row: &Row) -> Result<String, Error> {
        collection.encode_key(row).ok_or_else(|| {
            Error::bad_request(format!(
                "row for '{}' is missing a primary key value",
                collection.name
            ))
        })
    }

    /// Assigns the next integer to a single-column key when it is absent.
    fn generate_key(collection: &Collection, table: &[Row], row: &mut Row) -> Result<(), Error> {
        let index = collection.primary_index().ok_or_else(|| {
            Error::internal(format!("collection '{}' has no primary key", collection.name))
        })?;
        if index.values(row).is_some() {
            return Ok(());
        }
        let [column] = index.columns.as_slice() else {
            return Err(Error::bad_request(format!(
                "composite key of '{}' must be supplied",
                collection.name
            )));
        };
        let next = table
            .iter()
            .filter_map(|r| r.get(column).and_then(Value::as_i64))
            .max()
            .unwrap_or(0)
            + 1;
        row.insert(column.clone(), Value::Number(next.into()));
        Ok(())
    }
}

impl Db for MemoryDb {
    fn select(&self, query: &Query) -> Result<Results, Error> {
        let collection = query.collection().ok_or(SqlError::NoCollection)?;
        self.record(OpKind::Select, &collection.name, query.to_string());

        let tables = self.tables.lock();
        let eval = Evaluator {
            schema: &self.schema,
            tables: &tables,
        };
        let empty = Vec::new();
        let table = tables
            .get(&collection.name.to_ascii_lowercase())
            .unwrap_or(&empty);

        let mut matched = Vec::new();
        for row in table {
            let mut keep = true;
            for term in query.filter().terms() {
                if !eval.matches(collection, row, term)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                matched.push(row.clone());
            }
        }

        let sorts = query.order().sorts();
        if !sorts.is_empty() {
            matched.sort_by(|a, b| {
                for sort in &sorts {
                    let ord = compare_values(a.get(&sort.property), b.get(&sort.property));
                    let ord = if sort.is_asc() { ord } else { ord.reverse() };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let found = matched.len() as u64;
        let offset = usize::try_from(query.page().offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(query.page().limit()).unwrap_or(usize::MAX);
        let includes = query.select().includes();

        let rows = matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| {
                if includes.is_empty() {
                    row
                } else {
                    row.into_iter()
                        .filter(|(k, _)| includes.iter().any(|i| i == k))
                        .collect()
                }
            })
            .collect();

        Ok(Results::new(rows).with_found_rows(found))
    }

    fn upsert(&self, collection: &Collection, rows: Vec<Row>) -> Result<Vec<String>, Error> {
        self.record(OpKind::Upsert, &collection.name, rows.len().to_string());
        let mut tables = self.tables.lock();
        let table = tables.entry(collection.name.to_ascii_lowercase()).or_default();

        let mut keys = Vec::with_capacity(rows.len());
        for mut row in rows {
            Self::generate_key(collection, table, &mut row)?;
            let key = Self::key_of(collection, &row)?;
            match table
                .iter_mut()
                .find(|r| collection.encode_key(r).as_deref() == Some(key.as_str()))
            {
                Some(existing) => existing.extend(row),
                None => table.push(row),
            }
            keys.push(key);
        }
        Ok(keys)
    }

    fn patch(&self, collection: &Collection, rows: Vec<Row>) -> Result<Vec<String>, Error> {
        self.record(OpKind::Patch, &collection.name, rows.len().to_string());
        let mut tables = self.tables.lock();
        let table = tables.entry(collection.name.to_ascii_lowercase()).or_default();

        let mut keys = Vec::new();
        for row in rows {
            let key = Self::key_of(collection, &row)?;
            if let Some(existing) = table
                .iter_mut()
                .find(|r| collection.encode_key(r).as_deref() == Some(key.as_str()))
            {
                existing.extend(row);
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn delete(&self, collection: &Collection, rows: Vec<Row>) -> Result<usize, Error> {
        self.record(OpKind::Delete, &collection.name, rows.len().to_string());
        let keys = rows
            .iter()
            .map(|r| Self::key_of(collection, r))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tables = self.tables.lock();
        let Some(table) = tables.get_mut(&collection.name.to_ascii_lowercase()) else {
            return Ok(0);
        };
        let before = table.len();
        table.retain(|r| match collection.encode_key(r) {
            Some(k) => !keys.contains(&k),
            None => true,
        });
        Ok(before - table.len())
    }
}

struct Evaluator<'a> {
    schema: &'a SchemaCache,
    tables: &'a HashMap<String, Vec<Row>>,
}

impl Evaluator<'_> {
    fn table(&self, collection: &str) -> &[Row] {
        self.tables
            .get(&collection.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn matches(&self, collection: &Collection, row: &Row, term: &Term) -> Result<bool, Error> {
        match term.token.as_str() {
            "and" => {
                for t in &term.terms {
                    if !self.matches(collection, row, t)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            "or" => {
                for t in &term.terms {
                    if self.matches(collection, row, t)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            "not" => {
                let inner = term
                    .term_at(0)
                    .ok_or_else(|| SqlError::InvalidArguments(term.to_string()))?;
                Ok(!self.matches(collection, row, inner)?)
            }
            "_exists" | "_notexists" => {
                let exists = self.exists(collection, row, term)?;
                Ok(if term.token == "_exists" { exists } else { !exists })
            }
            _ => predicate(row, term),
        }
    }

    fn exists(&self, collection: &Collection, row: &Row, term: &Term) -> Result<bool, Error> {
        let inner = term
            .term_at(0)
            .ok_or_else(|| SqlError::InvalidArguments(term.to_string()))?;
        let (rel_name, _) = inner
            .token_at(0)
            .and_then(relationship_column)
            .ok_or_else(|| SqlError::InvalidArguments(term.to_string()))?;
        let rel = collection
            .relationship(rel_name)
            .ok_or_else(|| SqlError::RelationshipNotFound(rel_name.to_string()))?;

        for related in self.linked(collection, rel, row)? {
            if predicate(related, inner)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Rows of `rel.related` linked to `row`.
    fn linked(
        &self,
        collection: &Collection,
        rel: &Relationship,
        row: &Row,
    ) -> Result<Vec<&Row>, Error> {
        let related = self.schema.collection(&rel.related)?;
        let related_pk = related
            .primary_index()
            .map(|i| i.columns.clone())
            .unwrap_or_default();
        let own_pk = collection
            .primary_index()
            .map(|i| i.columns.clone())
            .unwrap_or_default();
        let fk1 = &rel.fk_index1.columns;

        let rows = match rel.kind {
            RelationshipKind::ManyToOne => self
                .table(&rel.related)
                .iter()
                .filter(|r| columns_match(r, &related_pk, row, fk1))
                .collect(),
            RelationshipKind::OneToMany => self
                .table(&rel.related)
                .iter()
                .filter(|r| columns_match(r, fk1, row, &own_pk))
                .collect(),
            RelationshipKind::ManyToMany => {
                let fk2 = rel
                    .fk_index2
                    .as_ref()
                    .map(|i| i.columns.clone())
                    .unwrap_or_default();
                let links: Vec<&Row> = self
                    .table(&rel.fk_index1.collection)
                    .iter()
                    .filter(|j| columns_match(j, fk1, row, &own_pk))
                    .collect();
                self.table(&rel.related)
                    .iter()
                    .filter(|r| links.iter().any(|j| columns_match(r, &related_pk, j, &fk2)))
                    .collect()
            }
        };
        Ok(rows)
    }
}

fn columns_match(left: &Row, lcols: &[String], right: &Row, rcols: &[String]) -> bool {
    !lcols.is_empty()
        && lcols.len() == rcols.len()
        && lcols.iter().zip(rcols).all(|(l, r)| match (left.get(l), right.get(r)) {
            (Some(a), Some(b)) if !a.is_null() && !b.is_null() => {
                compare_values(Some(a), Some(b)) == Ordering::Equal
            }
            _ => false,
        })
}

fn column_value<'a>(row: &'a Row, token: &str) -> Option<&'a Value> {
    let column = relationship_column(token).map(|(_, c)| c).unwrap_or(token);
    row.get(column).filter(|v| !v.is_null())
}

fn predicate(row: &Row, term: &Term) -> Result<bool, Error> {
    let column = term
        .term_at(0)
        .filter(|t| t.is_leaf())
        .ok_or_else(|| SqlError::InvalidArguments(term.to_string()))?;
    let value = column_value(row, &column.token);
    let args: Vec<&str> = term.terms[1..].iter().map(|t| t.token.as_str()).collect();
    let single = match args.as_slice() {
        [a] => Some(*a),
        _ => None,
    };
    let arg = || single.ok_or_else(|| Error::from(SqlError::InvalidArguments(term.to_string())));

    let result = match term.token.as_str() {
        "eq" | "in" => args.iter().any(|a| equals(value, a)),
        "ne" => value.is_some() && !equals(value, arg()?),
        "out" => value.is_some() && !args.iter().any(|a| equals(value, a)),
        "gt" => compare_literal(value, arg()?) == Some(Ordering::Greater),
        "ge" => matches!(compare_literal(value, arg()?), Some(Ordering::Greater | Ordering::Equal)),
        "lt" => compare_literal(value, arg()?) == Some(Ordering::Less),
        "le" => matches!(compare_literal(value, arg()?), Some(Ordering::Less | Ordering::Equal)),
        "n" => value.is_none(),
        "nn" => value.is_some(),
        "emp" => value.map(is_empty_value).unwrap_or(true),
        "nemp" => !value.map(is_empty_value).unwrap_or(true),
        "like" | "sw" | "ew" | "w" | "wo" => {
            let literal = arg()?;
            let pattern = match term.token.as_str() {
                "sw" => format!("{}*", literal),
                "ew" => format!("*{}", literal),
                "w" | "wo" => format!("*{}*", literal),
                _ => literal.to_string(),
            };
            let found = text(value).map(|t| wildcard(&t, &pattern));
            if term.token == "wo" {
                found.map(|f| !f).unwrap_or(false)
            } else {
                found.unwrap_or(false)
            }
        }
        other => return Err(SqlError::UnsupportedFunction(other.to_string()).into()),
    };
    Ok(result)
}

fn text(value: Option<&Value>) -> Option<String> {
    value.and_then(value_to_key_part)
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn equals(value: Option<&Value>, literal: &str) -> bool {
    match value {
        None => literal.eq_ignore_ascii_case("null"),
        Some(v) => compare_literal(Some(v), literal) == Some(Ordering::Equal),
    }
}

/// Compares a stored value to a query literal, numerically when both sides
/// are numbers.
fn compare_literal(value: Option<&Value>, literal: &str) -> Option<Ordering> {
    let value = value?;
    if let (Some(a), Ok(b)) = (value.as_f64(), literal.parse::<f64>()) {
        return a.partial_cmp(&b);
    }
    let text = value_to_key_part(value)?;
    Some(text.as_str().cmp(literal))
}

/// Total order used for sorting and key matching. Nulls sort first.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => value_to_key_part(a).cmp(&value_to_key_part(b)),
        },
    }
}

/// Glob match where `*` stands for any run of characters.
fn wildcard(text: &str, pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return text == pattern;
    }
    let mut rest = text;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    fn db() -> MemoryDb {
        let schema = SchemaCache::new()
            .with_collection(
                Collection::new("customers")
                    .with_primary_key(&["customerId"])
                    .with_relationship(Relationship::one_to_many(
                        "orders",
                        "customers",
                        "orders",
                        &["customerId"],
                    )),
            )
            .with_collection(
                Collection::new("orders")
                    .with_primary_key(&["orderId"])
                    .with_relationship(Relationship::many_to_one(
                        "customer",
                        "orders",
                        "customers",
                        &["customerId"],
                    )),
            );
        let db = MemoryDb::new(schema);
        db.insert(
            "customers",
            vec![
                row(json!({"customerId": "ALFKI", "country": "Germany", "city": "Berlin"})),
                row(json!({"customerId": "BONAP", "country": "France", "city": "Marseille"})),
            ],
        );
        db.insert(
            "orders",
            vec![
                row(json!({"orderId": 1, "customerId": "ALFKI", "freight": 10.5})),
                row(json!({"orderId": 2, "customerId": "ALFKI", "freight": 40})),
                row(json!({"orderId": 3, "customerId": "BONAP", "freight": 5})),
                row(json!({"orderId": 4, "customerId": null, "freight": 1})),
            ],
        );
        db
    }

    fn select(db: &MemoryDb, collection: &str, rql: &str) -> Vec<Row> {
        let collection: Arc<Collection> = db.schema().collection(collection).unwrap();
        let query = Query::parse(Some(collection), rql).unwrap();
        db.select(&query).unwrap().rows
    }

    fn ids(rows: &[Row], column: &str) -> Vec<Value> {
        rows.iter().map(|r| r[column].clone()).collect()
    }

    #[test]
    fn test_filters() {
        let db = db();
        assert_eq!(ids(&select(&db, "orders", "gt(freight,10)"), "orderId"), vec![json!(1), json!(2)]);
        assert_eq!(ids(&select(&db, "orders", "n(customerId)"), "orderId"), vec![json!(4)]);
        assert_eq!(ids(&select(&db, "orders", "in(orderId,1,3)"), "orderId"), vec![json!(1), json!(3)]);
        assert_eq!(
            ids(&select(&db, "customers", "sw(city,Ber)"), "customerId"),
            vec![json!("ALFKI")]
        );
        assert_eq!(
            ids(&select(&db, "customers", "like(city,*sei*)"), "customerId"),
            vec![json!("BONAP")]
        );
    }

    #[test]
    fn test_many_to_one_exists() {
        let db = db();
        let rows = select(&db, "orders", "customer.country=Germany");
        assert_eq!(ids(&rows, "orderId"), vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_one_to_many_not_exists() {
        let db = db();
        let rows = select(&db, "customers", "ne(orders.freight,5)");
        assert_eq!(ids(&rows, "customerId"), vec![json!("ALFKI")]);
    }

    #[test]
    fn test_sort_page_and_found_rows() {
        let db = db();
        let collection = db.schema().collection("orders").unwrap();
        let query = Query::parse(Some(collection), "sort(-freight)&limit(2)&offset(1)").unwrap();
        let results = db.select(&query).unwrap();
        assert_eq!(ids(&results.rows, "orderId"), vec![json!(1), json!(3)]);
        assert_eq!(results.found_rows, Some(4));
    }

    #[test]
    fn test_includes_projection() {
        let db = db();
        let rows = select(&db, "orders", "eq(orderId,1)&includes(orderId)");
        assert_eq!(rows[0], row(json!({"orderId": 1})));
    }

    #[test]
    fn test_upsert_generates_and_merges() {
        let db = db();
        let orders = db.schema().collection("orders").unwrap();
        let keys = db
            .upsert(
                &orders,
                vec![row(json!({"freight": 3})), row(json!({"orderId": 1, "freight": 99}))],
            )
            .unwrap();
        assert_eq!(keys, vec!["5", "1"]);
        let rows = db.rows("orders");
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0]["freight"], json!(99));
        assert_eq!(rows[0]["customerId"], json!("ALFKI"));
    }

    #[test]
    fn test_patch_skips_missing() {
        let db = db();
        let orders = db.schema().collection("orders").unwrap();
        let keys = db
            .patch(
                &orders,
                vec![row(json!({"orderId": 2, "customerId": null})), row(json!({"orderId": 77}))],
            )
            .unwrap();
        assert_eq!(keys, vec!["2"]);
        assert_eq!(db.rows("orders")[1]["customerId"], Value::Null);
    }

    #[test]
    fn test_delete_and_log() {
        let db = db();
        let orders = db.schema().collection("orders").unwrap();
        let n = db
            .delete(&orders, vec![row(json!({"orderId": 1})), row(json!({"orderId": 9}))])
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(db.rows("orders").len(), 3);
        assert_eq!(db.count(OpKind::Delete, "orders"), 1);
    }

    #[test]
    fn test_wildcard() {
        assert!(wildcard("Berlin", "Ber*"));
        assert!(wildcard("Berlin", "*lin"));
        assert!(wildcard("Berlin", "*rl*"));
        assert!(wildcard("Berlin", "B*r*n"));
        assert!(!wildcard("Berlin", "*x*"));
        assert!(wildcard("Berlin", "Berlin"));
    }
}
