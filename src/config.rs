use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Engine settings. Every field has a default, so a partial JSON document
/// only needs the values it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Page limit when a query does not supply one.
    pub default_limit: u64,
    /// Page size of the stale-link query during write reconciliation.
    pub reconcile_page_size: u64,
    /// Limit of the single key-pair query issued per expanded relationship.
    pub expand_page_size: u64,
    /// Max keys per batched child fetch during expansion.
    pub fetch_batch_size: usize,
    /// Upper bound on iterations of any paging loop.
    pub max_iterations: usize,
    /// Prefix of rendered `href` values.
    pub base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_limit: 100,
            reconcile_page_size: 100,
            expand_page_size: 1000,
            fetch_batch_size: 100,
            max_iterations: 1000,
            base_path: String::new(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json)
            .map_err(|e| Error::bad_request(format!("invalid configuration: {}", e)))
    }

    pub fn with_default_limit(mut self, limit: u64) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn with_reconcile_page_size(mut self, size: u64) -> Self {
        self.reconcile_page_size = size;
        self
    }

    pub fn with_expand_page_size(mut self, size: u64) -> Self {
        self.expand_page_size = size;
        self
    }

    pub fn with_fetch_batch_size(mut self, size: usize) -> Self {
        self.fetch_batch_size = size;
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }
}
