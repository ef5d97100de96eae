use crate::actions::{delete, get, post, Context};
use crate::backend::Db;
use crate::config::Config;
use crate::request::{Method, Request, RequestExecutor, Response};
use crate::schema_cache::SchemaCache;
use serde_json::Value;
use std::sync::Arc;

/// Routes requests to the actions over one schema and backend.
///
/// The engine is its own front door by default. Wrap it in another
/// [`RequestExecutor`] and call [`Engine::execute_with`] to have nested
/// reads and writes pass through the wrapper as well.
pub struct Engine {
    schema: SchemaCache,
    db: Arc<dyn Db>,
    config: Config,
}

impl Engine {
    pub fn new(schema: SchemaCache, db: Arc<dyn Db>) -> Self {
        Self {
            schema,
            db,
            config: Config::default(),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn schema(&self) -> &SchemaCache {
        &self.schema
    }

    pub fn db(&self) -> &Arc<dyn Db> {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handles `request`, sending nested requests to `front`.
    pub fn execute_with(&self, request: Request, front: &dyn RequestExecutor) -> Response {
        tracing::debug!(%request, "dispatching request");
        let ctx = Context {
            schema: &self.schema,
            db: self.db.as_ref(),
            config: &self.config,
            front,
        };
        let result = match request.method {
            Method::Get => get::get(&ctx, request),
            Method::Post | Method::Put | Method::Patch => post::post(&ctx, request),
            Method::Delete => delete::delete(&ctx, request),
        };
        result.unwrap_or_else(|err| {
            tracing::debug!(status = err.status(), error = %err, "request failed");
            Response::from(err)
        })
    }

    /// Handles a raw `path` such as `/orders/1?expand(customer)`.
    pub fn handle(&self, method: Method, path: &str, body: Option<Value>) -> Response {
        match Request::from_path(method, path, &self.config.base_path) {
            Ok(request) => {
                let request = match body {
                    Some(body) => request.with_body(body),
                    None => request,
                };
                self.execute(request)
            }
            Err(err) => Response::from(err),
        }
    }
}

impl RequestExecutor for Engine {
    fn execute(&self, request: Request) -> Response {
        self.execute_with(request, self)
    }
}
