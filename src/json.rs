//! JSON document helpers shared by the read and write actions.
//!
//! Paths are dotted property names (`orders.customer`) matched
//! case-insensitively; arrays are traversed transparently.

use crate::error::Error;
use serde_json::{Map, Value};

const MAX_REF_DEPTH: usize = 32;

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn contains(paths: &[String], path: &str) -> bool {
    paths.iter().any(|p| p.eq_ignore_ascii_case(path))
}

/// Every value reachable at `path`, flattening arrays along the way.
pub fn find<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![doc];
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let mut next = Vec::new();
        for value in current {
            collect_property(value, segment, &mut next);
        }
        current = next;
    }
    current
}

fn collect_property<'a>(value: &'a Value, segment: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => items
            .iter()
            .for_each(|item| collect_property(item, segment, out)),
        Value::Object(map) => {
            if let Some((_, v)) = map.iter().find(|(k, _)| k.eq_ignore_ascii_case(segment)) {
                out.push(v);
            }
        }
        _ => {}
    }
}

/// Replaces every `{"$ref": "#/json/pointer"}` object with a copy of the
/// node it points at. Pointers resolve against the document as submitted.
pub fn resolve_refs(doc: &mut Value) -> Result<(), Error> {
    let snapshot = doc.clone();
    resolve_in(doc, &snapshot, 0)
}

fn resolve_in(value: &mut Value, root: &Value, depth: usize) -> Result<(), Error> {
    if depth > MAX_REF_DEPTH {
        return Err(Error::bad_request("$ref chain is too deep or circular"));
    }
    if let Some(pointer) = ref_pointer(value) {
        let target = root
            .pointer(pointer.trim_start_matches('#'))
            .ok_or_else(|| Error::bad_request(format!("$ref '{}' does not resolve", pointer)))?;
        *value = target.clone();
        return resolve_in(value, root, depth + 1);
    }
    match value {
        Value::Array(items) => {
            for item in items {
                resolve_in(item, root, depth)?;
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                resolve_in(v, root, depth)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn ref_pointer(value: &Value) -> Option<String> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.get("$ref").and_then(Value::as_str).map(str::to_string)
}

/// `{"meta": ..., "data": x}` becomes `x`; anything else is returned as-is.
pub fn unwrap_envelope(doc: Value) -> Value {
    match doc {
        Value::Object(mut map)
            if map.contains_key("data") && map.keys().all(|k| k == "data" || k == "meta") =>
        {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// A one-element array becomes its element.
pub fn unwrap_single(doc: Value) -> Value {
    match doc {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    }
}

/// Reduces every sub-document at one of `paths` to its `href`.
///
/// Sub-documents without an `href` are removed, and a property left holding
/// an empty object or array is pruned. Everything outside `paths` is left
/// untouched.
pub fn collapse(doc: &mut Value, paths: &[String], prefix: &str) {
    match doc {
        Value::Array(items) => items
            .iter_mut()
            .for_each(|item| collapse(item, paths, prefix)),
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                let path = join(prefix, &key);
                let Some(value) = map.get_mut(&key) else {
                    continue;
                };
                if contains(paths, &path) {
                    if !reduce_to_href(value) {
                        map.remove(&key);
                    }
                } else if value.is_object() || value.is_array() {
                    collapse(value, paths, &path);
                }
            }
        }
        _ => {}
    }
}

/// Reduces every nested document, at any depth, to its `href`. Top level
/// rows keep their own properties.
pub fn collapse_all(doc: &mut Value) {
    match doc {
        Value::Array(items) => items.iter_mut().for_each(collapse_all),
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                let keep = match map.get_mut(&key) {
                    Some(value) if value.is_object() || is_document_array(value) => {
                        reduce_to_href(value)
                    }
                    _ => true,
                };
                if !keep {
                    map.remove(&key);
                }
            }
        }
        _ => {}
    }
}

fn is_document_array(value: &Value) -> bool {
    value
        .as_array()
        .map(|items| !items.is_empty() && items.iter().all(Value::is_object))
        .unwrap_or(false)
}

/// Returns false when nothing is left and the property should be pruned.
fn reduce_to_href(value: &mut Value) -> bool {
    match value {
        Value::Object(map) => match map.get("href").cloned() {
            Some(href) => {
                let mut reduced = Map::new();
                reduced.insert("href".to_string(), href);
                *map = reduced;
                true
            }
            None => false,
        },
        Value::Array(items) => {
            items.retain_mut(reduce_to_href);
            !items.is_empty()
        }
        Value::Null => false,
        _ => true,
    }
}

/// Removes the properties named by `paths`.
pub fn exclude(doc: &mut Value, paths: &[String]) {
    for path in paths {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        remove_path(doc, &segments);
    }
}

fn remove_path(doc: &mut Value, segments: &[&str]) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    match doc {
        Value::Array(items) => items.iter_mut().for_each(|item| remove_path(item, segments)),
        Value::Object(map) => {
            let Some(key) = map.keys().find(|k| k.eq_ignore_ascii_case(first)).cloned() else {
                return;
            };
            if rest.is_empty() {
                map.remove(&key);
            } else if let Some(child) = map.get_mut(&key) {
                remove_path(child, rest);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn paths(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    fn expanded() -> Value {
        json!({
            "href": "/orders/1",
            "orderId": 1,
            "customer": {"href": "/customers/ALFKI", "companyName": "Alfreds"},
            "details": [
                {
                    "href": "/orderDetails/1~11",
                    "quantity": 12,
                    "product": {"href": "/products/11", "productName": "Queso"}
                },
                {
                    "quantity": 3,
                    "product": {"productName": "Tofu"}
                }
            ]
        })
    }

    #[test]
    fn test_find_through_arrays() {
        let doc = expanded();
        let found = find(&doc, "details.product.productName");
        assert_eq!(found, vec![&json!("Queso"), &json!("Tofu")]);
    }

    #[test]
    fn test_collapse_only_touches_selected_path() {
        let mut doc = expanded();
        collapse(&mut doc, &paths(&["details.product"]), "");

        assert_eq!(doc["customer"], json!({"href": "/customers/ALFKI", "companyName": "Alfreds"}));
        assert_eq!(doc["details"][0]["product"], json!({"href": "/products/11"}));
        assert_eq!(doc["details"][0]["quantity"], json!(12));
        assert!(doc["details"][1].get("product").is_none());
        assert_eq!(doc["details"][1]["quantity"], json!(3));
    }

    #[test]
    fn test_collapse_prunes_empty_arrays() {
        let mut doc = json!({"orderId": 1, "notes": [{"text": "x"}]});
        collapse(&mut doc, &paths(&["notes"]), "");
        assert_eq!(doc, json!({"orderId": 1}));
    }

    #[test]
    fn test_collapse_all() {
        let mut doc = expanded();
        collapse_all(&mut doc);
        assert_eq!(doc["customer"], json!({"href": "/customers/ALFKI"}));
        assert_eq!(doc["details"], json!([{"href": "/orderDetails/1~11"}]));
        assert_eq!(doc["orderId"], json!(1));
    }

    #[test]
    fn test_resolve_refs() {
        let mut doc = json!({
            "data": [
                {"orderId": 1, "customer": {"customerId": "ALFKI", "city": "Berlin"}},
                {"orderId": 2, "customer": {"$ref": "#/data/0/customer"}}
            ]
        });
        resolve_refs(&mut doc).unwrap();
        assert_eq!(doc["data"][1]["customer"]["city"], json!("Berlin"));
    }

    #[test]
    fn test_resolve_refs_bad_pointer() {
        let mut doc = json!({"a": {"$ref": "#/nope"}});
        assert_eq!(resolve_refs(&mut doc).unwrap_err().status(), 400);
    }

    #[test]
    fn test_resolve_refs_cycle() {
        let mut doc = json!({"a": {"$ref": "#/b"}, "b": {"$ref": "#/a"}});
        assert!(resolve_refs(&mut doc).is_err());
    }

    #[test]
    fn test_unwrap_envelope_and_single() {
        let doc = json!({"meta": {"foundRows": 1}, "data": [{"orderId": 1}]});
        let doc = unwrap_single(unwrap_envelope(doc));
        assert_eq!(doc, json!({"orderId": 1}));

        let plain = json!({"data": 1, "other": 2});
        assert_eq!(unwrap_envelope(plain.clone()), plain);
    }

    #[test]
    fn test_exclude() {
        let mut doc = expanded();
        exclude(&mut doc, &paths(&["customer.companyName", "details.quantity"]));
        assert_eq!(doc["customer"], json!({"href": "/customers/ALFKI"}));
        assert!(doc["details"][0].get("quantity").is_none());
        assert!(doc["details"][1].get("quantity").is_none());
    }
}
