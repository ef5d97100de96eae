use crate::error::ParseError;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Row = Map<String, Value>;

const KEY_SEPARATORS: &[u8] = b"%~,/";

/// Characters escaped inside one resource key value.
const KEY_SET: &AsciiSet = &CONTROLS.add(b'%').add(b'~').add(b',').add(b'/');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Primary,
    Unique,
    Other,
}

/// An ordered column list on one collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub collection: String,
    pub kind: IndexKind,
    pub columns: Vec<String>,
}

impl Index {
    pub fn new(
        name: impl Into<String>,
        collection: impl Into<String>,
        kind: IndexKind,
        columns: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            kind,
            columns,
        }
    }

    pub fn is_unique(&self) -> bool {
        self.kind != IndexKind::Other
    }

    /// Values of this index's columns in `row`, or `None` when any is
    /// missing or null.
    pub fn values<'a>(&self, row: &'a Row) -> Option<Vec<&'a Value>> {
        self.columns
            .iter()
            .map(|c| row.get(c).filter(|v| !v.is_null()))
            .collect()
    }

    /// Canonical resource key of `row` under this index.
    pub fn encode(&self, row: &Row) -> Option<String> {
        self.values(row).and_then(|values| encode_values(&values))
    }

    /// Splits a resource key into `(column, value)` pairs for this index.
    pub fn decode_key(&self, key: &str) -> Result<Vec<(String, String)>, ParseError> {
        let parts = decode_parts(key);
        if parts.len() != self.columns.len() || parts.iter().any(|p| p.is_empty()) {
            return Err(ParseError::InvalidResourceKey(format!(
                "'{}' does not match index '{}' ({})",
                key,
                self.name,
                self.columns.join(", ")
            )));
        }
        Ok(self.columns.iter().cloned().zip(parts).collect())
    }

    /// Decodes `key` into a row holding only this index's columns.
    pub fn decode_row(&self, key: &str) -> Result<Row, ParseError> {
        Ok(self
            .decode_key(key)?
            .into_iter()
            .map(|(c, v)| (c, scalar(&v)))
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    ManyToOne,
    OneToMany,
    ManyToMany,
}

/// A named link from one collection to another.
///
/// - `ManyToOne`: `fk_index1` lives on the owning collection and points at
///   the related primary index.
/// - `OneToMany`: `fk_index1` lives on the related collection and points at
///   the owning primary index.
/// - `ManyToMany`: `fk_index1` (owner side) and `fk_index2` (related side)
///   both live on the join collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub name: String,
    pub kind: RelationshipKind,
    pub collection: String,
    pub related: String,
    pub fk_index1: Index,
    pub fk_index2: Option<Index>,
    pub inverse: Option<String>,
}

impl Relationship {
    pub fn many_to_one(
        name: impl Into<String>,
        collection: impl Into<String>,
        related: impl Into<String>,
        fk_columns: &[&str],
    ) -> Self {
        let name = name.into();
        let collection = collection.into();
        let fk = Index::new(
            format!("fk_{}_{}", collection, name),
            collection.clone(),
            IndexKind::Other,
            fk_columns.iter().map(|c| c.to_string()).collect(),
        );
        Self {
            name,
            kind: RelationshipKind::ManyToOne,
            collection,
            related: related.into(),
            fk_index1: fk,
            fk_index2: None,
            inverse: None,
        }
    }

    pub fn one_to_many(
        name: impl Into<String>,
        collection: impl Into<String>,
        related: impl Into<String>,
        fk_columns: &[&str],
    ) -> Self {
        let name = name.into();
        let collection = collection.into();
        let related = related.into();
        let fk = Index::new(
            format!("fk_{}_{}", related, collection),
            related.clone(),
            IndexKind::Other,
            fk_columns.iter().map(|c| c.to_string()).collect(),
        );
        Self {
            name,
            kind: RelationshipKind::OneToMany,
            collection,
            related,
            fk_index1: fk,
            fk_index2: None,
            inverse: None,
        }
    }

    pub fn many_to_many(
        name: impl Into<String>,
        collection: impl Into<String>,
        related: impl Into<String>,
        join: impl Into<String>,
        fk1_columns: &[&str],
        fk2_columns: &[&str],
    ) -> Self {
        let name = name.into();
        let collection = collection.into();
        let related = related.into();
        let join = join.into();
        let fk1 = Index::new(
            format!("fk_{}_{}", join, collection),
            join.clone(),
            IndexKind::Other,
            fk1_columns.iter().map(|c| c.to_string()).collect(),
        );
        let fk2 = Index::new(
            format!("fk_{}_{}", join, related),
            join,
            IndexKind::Other,
            fk2_columns.iter().map(|c| c.to_string()).collect(),
        );
        Self {
            name,
            kind: RelationshipKind::ManyToMany,
            collection,
            related,
            fk_index1: fk1,
            fk_index2: Some(fk2),
            inverse: None,
        }
    }

    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    pub fn is_many_to_one(&self) -> bool {
        self.kind == RelationshipKind::ManyToOne
    }

    pub fn is_one_to_many(&self) -> bool {
        self.kind == RelationshipKind::OneToMany
    }

    pub fn is_many_to_many(&self) -> bool {
        self.kind == RelationshipKind::ManyToMany
    }

    /// The collection holding the link rows of a many-to-many relationship.
    pub fn join_collection(&self) -> Option<&str> {
        match self.kind {
            RelationshipKind::ManyToMany => Some(self.fk_index1.collection.as_str()),
            _ => None,
        }
    }
}

/// Metadata for one collection exposed by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    pub table: String,
    pub indexes: Vec<Index>,
    pub relationships: Vec<Relationship>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: name.clone(),
            name,
            indexes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_primary_key(self, columns: &[&str]) -> Self {
        let name = format!("pk_{}", self.name);
        self.with_index(name, IndexKind::Primary, columns)
    }

    pub fn with_index(mut self, name: impl Into<String>, kind: IndexKind, columns: &[&str]) -> Self {
        let index = Index::new(
            name,
            self.name.clone(),
            kind,
            columns.iter().map(|c| c.to_string()).collect(),
        );
        self.indexes.push(index);
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn primary_index(&self) -> Option<&Index> {
        self.indexes
            .iter()
            .find(|i| i.kind == IndexKind::Primary)
            .or_else(|| self.indexes.iter().find(|i| i.kind == IndexKind::Unique))
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name.eq_ignore_ascii_case(name))
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
    }

    pub fn encode_key(&self, row: &Row) -> Option<String> {
        self.primary_index().and_then(|i| i.encode(row))
    }

    pub fn is_key_column(&self, column: &str) -> bool {
        self.primary_index()
            .map(|i| i.columns.iter().any(|c| c == column))
            .unwrap_or(false)
    }

    pub fn href(&self, base_path: &str, key: &str) -> String {
        format!("{}/{}/{}", base_path.trim_end_matches('/'), self.name, key)
    }
}

/// Renders a scalar JSON value as a key part. Null yields `None`.
pub fn value_to_key_part(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Joins key values with `~`, escaping the separator characters.
pub fn encode_values(values: &[&Value]) -> Option<String> {
    let parts: Option<Vec<String>> = values
        .iter()
        .map(|v| value_to_key_part(v).map(|s| escape(&s)))
        .collect();
    parts.map(|p| p.join("~"))
}

pub fn encode_strs(values: &[&str]) -> String {
    values.iter().map(|v| escape(v)).collect::<Vec<_>>().join("~")
}

/// Splits one resource key into its unescaped column values.
pub fn decode_parts(key: &str) -> Vec<String> {
    key.split('~').map(unescape).collect()
}

/// Splits a comma separated resource key list.
pub fn split_keys(keys: &str) -> Vec<String> {
    keys.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

fn escape(s: &str) -> String {
    utf8_percent_encode(s, KEY_SET).to_string()
}

fn unescape(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Percent-decodes a resource key taken from a request path, keeping the
/// escapes of the key separators so `a%2Cb` stays one key.
pub fn decode_path_key(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut start = 0;
    let mut i = 0;
    while i + 2 < bytes.len() {
        let reserved = bytes[i] == b'%'
            && s.get(i + 1..i + 3)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .is_some_and(|b| KEY_SEPARATORS.contains(&b));
        if reserved {
            out.push_str(&unescape(&s[start..i]));
            out.push_str(&s[i..i + 3].to_ascii_uppercase());
            i += 3;
            start = i;
        } else {
            i += 1;
        }
    }
    out.push_str(&unescape(&s[start..]));
    out
}

/// Converts a decoded key string back into a JSON scalar. Only canonical
/// integers become numbers so `"007"` stays a string.
pub fn scalar(s: &str) -> Value {
    match s.parse::<i64>() {
        Ok(i) if i.to_string() == s => Value::Number(i.into()),
        _ => Value::String(s.to_string()),
    }
}
