use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CatalogError;

/// Errors surfaced by a hierarchical key-value store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("key already exists: {0}")]
    KeyExists(String),

    #[error("compare failed on {key}: {reason}")]
    CompareFailed { key: String, reason: String },

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("event index {requested} cleared, oldest retained is {oldest}")]
    EventIndexCleared { requested: u64, oldest: u64 },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type KvResult<T> = Result<T, KvError>;

impl From<KvError> for CatalogError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::KeyNotFound(key) => CatalogError::NotFound(format!("{} not found", key)),
            KvError::KeyExists(key) => CatalogError::Conflict(format!("{} already exists", key)),
            KvError::CompareFailed { key, reason } => CatalogError::Conflict(format!(
                "concurrent modification of {}: {}",
                key, reason
            )),
            KvError::EventIndexCleared { requested, oldest } => CatalogError::Validation(format!(
                "index {} is outdated, oldest available index is {}",
                requested, oldest
            )),
            KvError::InvalidKey(key) => CatalogError::Validation(format!("invalid key: {}", key)),
            other => CatalogError::Internal(other.to_string()),
        }
    }
}

/// One node of the hierarchical namespace. Directories carry children,
/// leaves carry a value. `version` is the store revision of the last
/// modification (for directories, of the most recently modified leaf).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvNode {
    pub key: String,
    pub value: Option<String>,
    pub dir: bool,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<KvNode>,
}

impl KvNode {
    /// Last path segment of the node's key.
    pub fn name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvAction {
    Create,
    Set,
    Update,
    Delete,
}

/// A single mutation reported by `watch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvEvent {
    pub action: KvAction,
    pub key: String,
    pub value: Option<String>,
    pub version: u64,
}

/// The contract the catalog needs from its external hierarchical store.
///
/// Keys are absolute slash-separated paths. Directories exist implicitly as
/// prefixes of leaf keys.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Create a leaf; fails with `KeyExists` if it is already present.
    async fn create(&self, key: &str, value: &str) -> KvResult<u64>;

    /// Read a leaf or a directory. A recursive read returns the full subtree.
    async fn get(&self, key: &str, recursive: bool) -> KvResult<KvNode>;

    /// Compare-and-swap on an existing leaf. Every supplied expectation must
    /// match the live value/version or the call fails with `CompareFailed`.
    async fn update(
        &self,
        key: &str,
        value: &str,
        expected_prev: Option<&str>,
        expected_version: Option<u64>,
    ) -> KvResult<u64>;

    /// Unconditional upsert of a leaf.
    async fn set(&self, key: &str, value: &str) -> KvResult<u64>;

    async fn delete(&self, key: &str, recursive: bool) -> KvResult<u64>;

    /// Block until a mutation at or under `key` with a version greater than
    /// `after_version` exists, and return the first such mutation. `None`
    /// waits for mutations made after the call begins.
    async fn watch(&self, key: &str, after_version: Option<u64>) -> KvResult<KvEvent>;

    /// Current store revision.
    async fn revision(&self) -> KvResult<u64>;
}
