//! Registry of collection metadata.
//!
//! Collections are declared up front (in code or loaded from JSON) and
//! validated once, so relationship lookups during request handling can
//! assume every referenced collection and join collection exists.

use crate::ast::{Collection, Relationship};
use crate::error::{Error, SqlError};
use std::collections::HashMap;
use std::sync::Arc;

/// Cache of declared collections, keyed by lowercased name.
#[derive(Debug, Clone, Default)]
pub struct SchemaCache {
    collections: HashMap<String, Arc<Collection>>,
    /// Declaration order, for deterministic iteration.
    order: Vec<String>,
}

impl SchemaCache {
    /// Creates an empty schema cache
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, collection: Collection) -> Self {
        self.register(collection);
        self
    }

    /// Adds or replaces a collection.
    pub fn register(&mut self, collection: Collection) {
        let key = collection.name.to_ascii_lowercase();
        if !self.collections.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.collections.insert(key, Arc::new(collection));
    }

    /// Loads a JSON array of collection declarations and validates them.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let collections: Vec<Collection> = serde_json::from_str(json)
            .map_err(|e| Error::bad_request(format!("invalid collection metadata: {}", e)))?;
        let mut cache = Self::new();
        for collection in collections {
            cache.register(collection);
        }
        cache.validate()?;
        Ok(cache)
    }

    /// Checks that every relationship points at declared collections and
    /// that foreign keys line up with the primary keys they reference.
    pub fn validate(&self) -> Result<(), Error> {
        for collection in self.collections.values() {
            for rel in &collection.relationships {
                let related = self.get(&rel.related).ok_or_else(|| {
                    SqlError::RelationshipNotFound(format!(
                        "{}.{} references unknown collection '{}'",
                        collection.name, rel.name, rel.related
                    ))
                })?;
                if let Some(join) = rel.join_collection() {
                    if self.get(join).is_none() {
                        return Err(SqlError::RelationshipNotFound(format!(
                            "{}.{} uses unknown join collection '{}'",
                            collection.name, rel.name, join
                        ))
                        .into());
                    }
                }

                let referenced = if rel.is_many_to_one() {
                    related.primary_index()
                } else {
                    collection.primary_index()
                };
                let arity = referenced.map(|i| i.columns.len()).unwrap_or(0);
                if arity != rel.fk_index1.columns.len() {
                    return Err(SqlError::InvalidArguments(format!(
                        "{}.{} foreign key has {} columns, referenced key has {}",
                        collection.name,
                        rel.name,
                        rel.fk_index1.columns.len(),
                        arity
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Collection>> {
        self.collections.get(&name.to_ascii_lowercase())
    }

    /// Resolves a collection, 404 when it is not declared.
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>, Error> {
        self.get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("collection '{}' does not exist", name)))
    }

    pub fn collections(&self) -> impl Iterator<Item = &Arc<Collection>> {
        self.order.iter().filter_map(|k| self.collections.get(k))
    }

    /// Finds the named relationship on `collection`.
    pub fn find_relationship(&self, collection: &str, name: &str) -> Option<&Relationship> {
        self.get(collection).and_then(|c| c.relationship(name))
    }

    /// The relationship on the related side that walks back to `rel`'s owner.
    pub fn inverse(&self, rel: &Relationship) -> Option<&Relationship> {
        let inverse = rel.inverse.as_deref()?;
        self.find_relationship(&rel.related, inverse)
    }

    /// Relationships declared elsewhere that point at `collection`.
    pub fn get_referencing(&self, collection: &str) -> Vec<&Relationship> {
        self.collections()
            .flat_map(|c| c.relationships.iter())
            .filter(|r| r.related.eq_ignore_ascii_case(collection))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> SchemaCache {
        SchemaCache::new()
            .with_collection(
                Collection::new("orders")
                    .with_primary_key(&["orderId"])
                    .with_relationship(
                        Relationship::many_to_one("customer", "orders", "customers", &["customerId"])
                            .with_inverse("orders"),
                    ),
            )
            .with_collection(
                Collection::new("customers")
                    .with_primary_key(&["customerId"])
                    .with_relationship(
                        Relationship::one_to_many("orders", "customers", "orders", &["customerId"])
                            .with_inverse("customer"),
                    ),
            )
    }

    #[test]
    fn test_lookup_case_insensitive() {
        let cache = cache();
        assert!(cache.get("Orders").is_some());
        assert_eq!(cache.collection("ORDERS").unwrap().name, "orders");
    }

    #[test]
    fn test_unknown_collection_is_404() {
        let err = cache().collection("nope").unwrap_err();
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn test_validate_ok() {
        assert!(cache().validate().is_ok());
    }

    #[test]
    fn test_validate_missing_related() {
        let cache = SchemaCache::new().with_collection(
            Collection::new("orders")
                .with_primary_key(&["orderId"])
                .with_relationship(Relationship::many_to_one(
                    "shipper",
                    "orders",
                    "shippers",
                    &["shipVia"],
                )),
        );
        let err = cache.validate().unwrap_err();
        assert!(matches!(err, Error::Sql(SqlError::RelationshipNotFound(_))));
    }

    #[test]
    fn test_validate_fk_arity() {
        let cache = cache().with_collection(
            Collection::new("details")
                .with_primary_key(&["orderId", "productId"])
                .with_relationship(Relationship::many_to_one(
                    "order",
                    "details",
                    "orders",
                    &["orderId", "productId"],
                )),
        );
        assert!(cache.validate().is_err());
    }

    #[test]
    fn test_inverse_and_referencing() {
        let cache = cache();
        let rel = cache.find_relationship("orders", "customer").unwrap();
        assert_eq!(cache.inverse(rel).unwrap().name, "orders");
        let referencing = cache.get_referencing("customers");
        assert_eq!(referencing.len(), 1);
        assert_eq!(referencing[0].name, "customer");
    }

    #[test]
    fn test_from_json() {
        let json = serde_json::to_string(&vec![
            Collection::new("customers").with_primary_key(&["customerId"]),
        ])
        .unwrap();
        let cache = SchemaCache::from_json(&json).unwrap();
        assert_eq!(cache.collections().count(), 1);
    }
}
