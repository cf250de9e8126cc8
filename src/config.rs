use crate::error::{Result, TrieError};
use crate::storage::BLOCK_SIZE;

/// Largest node table the 32-bit cell encoding can address.
pub const MAX_NUM_NODES: usize = (u32::MAX / 2) as usize;

/// Configuration for a [`Trie`](crate::Trie).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieConfig {
    /// Cells allocated up front, root included. Rounded up to whole blocks
    /// of 512 cells.
    pub initial_nodes: usize,
    /// Hard cap on the node table length. The table grows in blocks of 512
    /// cells, so at least one block must fit.
    pub max_nodes: usize,
    /// Hard cap on the total bytes held in the key region
    pub max_key_bytes: usize,
    /// Blocks examined per base search before a new block is appended.
    pub max_trials: usize,
}

impl Default for TrieConfig {
    fn default() -> Self {
        Self {
            initial_nodes: 256,
            max_nodes: MAX_NUM_NODES,
            max_key_bytes: u32::MAX as usize,
            max_trials: 16,
        }
    }
}

impl TrieConfig {
    pub fn with_initial_nodes(mut self, n: usize) -> Self {
        self.initial_nodes = n;
        self
    }

    pub fn with_max_nodes(mut self, n: usize) -> Self {
        self.max_nodes = n;
        self
    }

    pub fn with_max_key_bytes(mut self, n: usize) -> Self {
        self.max_key_bytes = n;
        self
    }

    pub fn with_max_trials(mut self, n: usize) -> Self {
        self.max_trials = n;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.initial_nodes == 0 {
            return Err(TrieError::invalid_argument(
                "initial_nodes must leave room for the root",
            ));
        }
        if self.max_nodes > MAX_NUM_NODES {
            return Err(TrieError::invalid_argument(format!(
                "max_nodes {} exceeds {}",
                self.max_nodes, MAX_NUM_NODES
            )));
        }
        if self.max_nodes < BLOCK_SIZE {
            return Err(TrieError::invalid_argument(format!(
                "max_nodes {} is below one block of {} cells",
                self.max_nodes, BLOCK_SIZE
            )));
        }
        if self.initial_nodes > self.max_nodes {
            return Err(TrieError::invalid_argument(format!(
                "initial_nodes {} exceeds max_nodes {}",
                self.initial_nodes, self.max_nodes
            )));
        }
        if self.max_key_bytes > u32::MAX as usize {
            return Err(TrieError::invalid_argument(
                "max_key_bytes must fit in 32-bit offsets",
            ));
        }
        if self.max_trials == 0 {
            return Err(TrieError::invalid_argument("max_trials must be positive"));
        }
        Ok(())
    }
}
