//! # dat-rs
//!
//! A double-array trie mapping byte strings to stable integer ids, with
//! resumable cursors for prefix and range enumeration.
//!
//! Transitions are two array lookups per byte; unshared key suffixes stay in a
//! separate key region instead of being expanded into cells.
//!
//! ## Example
//!
//! ```rust
//! use dat_rs::{Cursor, CursorFlags, PredictiveCursor, Trie};
//!
//! let mut trie = Trie::new();
//! assert_eq!(trie.insert(b"Hobbit").unwrap(), 1);
//! assert_eq!(trie.insert(b"Human").unwrap(), 2);
//! assert_eq!(trie.insert(b"Elf").unwrap(), 3);
//! assert_eq!(trie.lookup(b"Human"), Some(2));
//!
//! let mut cursor = PredictiveCursor::new();
//! cursor.open(&trie, b"H", 0, u32::MAX, CursorFlags::DESCENDING).unwrap();
//! assert_eq!(cursor.next().as_bytes(), b"Human");
//! assert_eq!(cursor.next().as_bytes(), b"Hobbit");
//! assert!(!cursor.next().is_valid());
//! ```

mod config;
mod cursor;
mod error;
mod id_cursor;
mod key;
mod key_cursor;
mod node;
mod predictive_cursor;
mod prefix_cursor;
mod storage;
mod trie;

pub use config::{TrieConfig, MAX_NUM_NODES};
pub use cursor::{Cursor, CursorFlags, CursorIter, CursorState};
pub use error::{Result, TrieError};
pub use id_cursor::IdCursor;
pub use key::Key;
pub use key_cursor::KeyCursor;
pub use predictive_cursor::PredictiveCursor;
pub use prefix_cursor::PrefixCursor;
pub use trie::Trie;

// =============================================================================
// Limits
// =============================================================================

/// Id carried by the invalid [`Key`].
pub const INVALID_KEY_ID: u32 = 0;
pub const MIN_KEY_ID: u32 = 1;
pub const MAX_KEY_ID: u32 = 0x0FFF_FFFF;
/// Longest key `insert` accepts, in bytes.
pub const MAX_KEY_LENGTH: usize = 0x0FFF;

#[cfg(test)]
mod proptests;
