use crate::ast::schema::decode_path_key;
use crate::error::Error;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "PATCH" => Some(Method::Patch),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A REST call against one collection, optionally addressing resources by
/// key (`/orders/10248,10249`) and carrying an RQL query string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub collection: String,
    pub key: Option<String>,
    pub query: String,
    pub body: Option<Value>,
}

impl Request {
    pub fn new(method: Method, collection: impl Into<String>) -> Self {
        Self {
            method,
            collection: collection.into(),
            key: None,
            query: String::new(),
            body: None,
        }
    }

    pub fn get(collection: impl Into<String>) -> Self {
        Self::new(Method::Get, collection)
    }

    pub fn post(collection: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, collection).with_body(body)
    }

    pub fn put(collection: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, collection).with_body(body)
    }

    pub fn patch(collection: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, collection).with_body(body)
    }

    pub fn delete(collection: impl Into<String>) -> Self {
        Self::new(Method::Delete, collection)
    }

    /// Builds a request from a path such as `/orders/1,2?sort(-freight)`.
    /// `base_path` is stripped from the front when present. The key and the
    /// query are percent-decoded.
    pub fn from_path(method: Method, path: &str, base_path: &str) -> Result<Self, Error> {
        let (path, query) = path.split_once('?').unwrap_or((path, ""));
        let path = path
            .strip_prefix(base_path.trim_end_matches('/'))
            .unwrap_or(path);
        let mut segments = path.trim_matches('/').splitn(2, '/');
        let collection = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::bad_request(format!("no collection in path '{}'", path)))?;
        let query = percent_decode_str(query).decode_utf8_lossy();
        let mut request = Self::new(method, collection).with_query(query);
        if let Some(key) = segments.next().filter(|k| !k.is_empty()) {
            request = request.with_key(decode_path_key(key));
        }
        Ok(request)
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// `/collection[/key][?query]`
    pub fn path(&self) -> String {
        let mut path = format!("/{}", self.collection);
        if let Some(key) = &self.key {
            path.push('/');
            path.push_str(key);
        }
        if !self.query.is_empty() {
            path.push('?');
            path.push_str(&self.query);
        }
        path
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub body: Option<Value>,
}

impl Response {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, Some(body))
    }

    pub fn created(body: Value) -> Self {
        Self::new(201, Some(body))
    }

    pub fn no_content() -> Self {
        Self::new(204, None)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The `data` array of an enveloped body, or the body itself.
    pub fn data(&self) -> Option<&Value> {
        let body = self.body.as_ref()?;
        Some(body.get("data").unwrap_or(body))
    }

    pub fn message(&self) -> String {
        self.body
            .as_ref()
            .and_then(|b| b.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("request failed with status {}", self.status))
    }

    /// Success bodies pass through; failures become [`Error::upstream`]
    /// with the nested status and message unchanged.
    pub fn into_result(self) -> Result<Option<Value>, Error> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(Error::upstream(self.status, self.message()))
        }
    }
}

impl From<Error> for Response {
    fn from(err: Error) -> Self {
        let status = err.status();
        let message = match &err {
            Error::Api(api) => api.to_string(),
            other => other.to_string(),
        };
        Response::new(status, Some(json!({ "status": status, "message": message })))
    }
}

/// Executes a request through the full pipeline.
///
/// Actions re-enter the system through this seam for nested reads and
/// writes, so whatever wraps the engine also sees every fan-out call.
pub trait RequestExecutor {
    fn execute(&self, request: Request) -> Response;
}

impl<F> RequestExecutor for F
where
    F: Fn(Request) -> Response,
{
    fn execute(&self, request: Request) -> Response {
        self(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path() {
        let r = Request::from_path(Method::Get, "/api/orders/1,2?sort(-freight)", "/api").unwrap();
        assert_eq!(r.collection, "orders");
        assert_eq!(r.key.as_deref(), Some("1,2"));
        assert_eq!(r.query, "sort(-freight)");
        assert_eq!(r.path(), "/orders/1,2?sort(-freight)");
    }

    #[test]
    fn test_from_path_without_key() {
        let r = Request::from_path(Method::Delete, "/orders?eq(a,1)", "").unwrap();
        assert_eq!(r.key, None);
        assert_eq!(r.to_string(), "DELETE /orders?eq(a,1)");
    }

    #[test]
    fn test_from_path_decodes_query_and_key() {
        let r = Request::from_path(Method::Get, "/orders?shipCity=San%20Francisco&sort(-freight)", "")
            .unwrap();
        assert_eq!(r.query, "shipCity=San Francisco&sort(-freight)");

        let r = Request::from_path(Method::Get, "/customers/Z%C3%BCrich,a%2Cb", "").unwrap();
        assert_eq!(r.key.as_deref(), Some("Zürich,a%2Cb"));
    }

    #[test]
    fn test_from_path_empty() {
        assert!(Request::from_path(Method::Get, "/", "").is_err());
    }

    #[test]
    fn test_error_response() {
        let response = Response::from(Error::not_found("order 7"));
        assert_eq!(response.status, 404);
        assert_eq!(
            response.body,
            Some(json!({"status": 404, "message": "not found: order 7"}))
        );
    }

    #[test]
    fn test_upstream_round_trip() {
        let response = Response::from(Error::upstream(409, "conflict"));
        let err = response.into_result().unwrap_err();
        assert_eq!(err.status(), 409);
        assert_eq!(err.to_string(), "conflict");
    }

    #[test]
    fn test_method_parse() {
        assert_eq!(Method::parse("patch"), Some(Method::Patch));
        assert_eq!(Method::parse("HEAD"), None);
    }

    #[test]
    fn test_closure_executor() {
        let exec = |r: Request| Response::ok(json!({"collection": r.collection}));
        let response = exec.execute(Request::get("orders"));
        assert_eq!(response.data(), Some(&json!({"collection": "orders"})));
    }
}
