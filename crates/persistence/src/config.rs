//! Record store configuration.

use serde::{Deserialize, Serialize};

/// Default maximum size of a single binary payload (5 MiB).
pub const DEFAULT_MAX_BINARY_SIZE: usize = 5 * 1024 * 1024;

/// Default number of summaries returned by listing operations.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Configuration for the [`RecordStore`](crate::store::RecordStore).
///
/// Passed explicitly at construction; the store never reads process-wide
/// settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// This server's own endpoint, used to classify keys as foreign.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Largest binary payload (decoded bytes) accepted by a write.
    #[serde(default = "default_max_binary_size")]
    pub max_binary_size: usize,

    /// Limit applied to listings when the caller does not give one.
    #[serde(default = "default_list_limit")]
    pub default_list_limit: usize,
}

fn default_max_binary_size() -> usize {
    DEFAULT_MAX_BINARY_SIZE
}

fn default_list_limit() -> usize {
    DEFAULT_LIST_LIMIT
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            max_binary_size: default_max_binary_size(),
            default_list_limit: default_list_limit(),
        }
    }
}

impl StoreConfig {
    /// Sets the server's own base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the binary size limit.
    pub fn with_max_binary_size(mut self, max: usize) -> Self {
        self.max_binary_size = max;
        self
    }

    /// Returns the local endpoint derived from `base_url`.
    pub fn endpoint(&self) -> LocalEndpoint {
        LocalEndpoint::new(self.base_url.as_deref())
    }

    /// Validates the configuration, returning every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.max_binary_size == 0 {
            errors.push("max_binary_size must be greater than 0".to_string());
        }
        if self.default_list_limit == 0 {
            errors.push("default_list_limit must be greater than 0".to_string());
        }
        if let Some(url) = &self.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(format!("base_url must be an http(s) URL, got '{}'", url));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// The server's own endpoint, against which key bases are compared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalEndpoint {
    base: Option<String>,
}

impl LocalEndpoint {
    /// Creates an endpoint; trailing slashes are ignored.
    pub fn new(base: Option<&str>) -> Self {
        Self {
            base: base
                .map(|b| b.trim_end_matches('/').to_string())
                .filter(|b| !b.is_empty()),
        }
    }

    /// Returns the normalized base URL, if configured.
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// Returns `true` if `other` names this endpoint.
    pub fn matches(&self, other: &str) -> bool {
        match &self.base {
            Some(base) => base.eq_ignore_ascii_case(other.trim_end_matches('/')),
            None => false,
        }
    }
}
