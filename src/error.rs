//! Error types for dat-rs

use thiserror::Error;

/// Result type alias using [`TrieError`].
pub type Result<T> = std::result::Result<T, TrieError>;

/// Failures surfaced by trie mutation and cursor setup.
///
/// Running out of results is never an error: lookups return `None` and
/// cursors return an invalid [`Key`](crate::Key).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrieError {
    /// Malformed or contradictory arguments (flags, config, oversized keys).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The node table or key region cannot grow any further.
    ///
    /// The trie is left exactly as it was before the failing call.
    #[error("Resource exhausted: {what} needs {requested}, limit is {limit}")]
    ResourceExhausted {
        what: &'static str,
        requested: usize,
        limit: usize,
    },
}

impl TrieError {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        TrieError::InvalidArgument(msg.into())
    }

    pub(crate) fn exhausted(what: &'static str, requested: usize, limit: usize) -> Self {
        TrieError::ResourceExhausted {
            what,
            requested,
            limit,
        }
    }

    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, TrieError::ResourceExhausted { .. })
    }
}
