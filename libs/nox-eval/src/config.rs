//! Tunables for a [`Graph`](crate::Graph).
use std::time::Duration;

/// Configuration shared by the rewriter, the passes and the interpreter.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Number of distinct rewrite rules whose caches are retained at once.
    pub rewrite_cache_capacity: usize,
    /// Fail with a contract violation when a pass changes a node's declared type.
    pub check_contracts: bool,
    /// Abort evaluation once this much wall-clock time has elapsed.
    pub evaluation_deadline: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rewrite_cache_capacity: 4,
            check_contracts: true,
            evaluation_deadline: None,
        }
    }
}
