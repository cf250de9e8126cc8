use crate::cursor::{next_match, Cursor, CursorCore, CursorFlags, CursorState, MatchSource};
use crate::error::Result;
use crate::key::Key;
use crate::node::{byte_label, ROOT_NODE_ID, TERMINAL_LABEL};
use crate::trie::Trie;

/// Enumerates stored keys that are prefixes of a query, shortest first.
///
/// A query has at most one matching key per length, so the matches are
/// collected while walking the query once at open time.
#[derive(Clone, Debug, Default)]
pub struct PrefixCursor<'a> {
    core: CursorCore,
    /// Matches in output order.
    matches: Vec<Key<'a>>,
    pos: usize,
}

impl<'a> PrefixCursor<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect stored keys `k` with `query.starts_with(k)` and
    /// `k.len() >= min_length`.
    ///
    /// `DESCENDING` yields the longest first. `EXCEPT_EXACT_MATCH` skips
    /// `query` itself.
    pub fn open(
        &mut self,
        trie: &'a Trie,
        query: &[u8],
        min_length: usize,
        offset: u32,
        limit: u32,
        flags: CursorFlags,
    ) -> Result<()> {
        flags.reject(
            CursorFlags::EXCEPT_LOWER_BOUND | CursorFlags::EXCEPT_UPPER_BOUND,
            "PrefixCursor",
        )?;
        self.core.open(offset, limit, flags);
        self.matches.clear();
        self.pos = 0;
        if !self.core.is_open() {
            return Ok(());
        }

        let except_exact = flags.contains(CursorFlags::EXCEPT_EXACT_MATCH);
        let mut keep = |key: Key<'a>| {
            if key.len() >= min_length && !(except_exact && key.len() == query.len()) {
                self.matches.push(key);
            }
        };

        let mut node = ROOT_NODE_ID;
        let mut depth = 0;
        loop {
            if trie.node(node).linked {
                let key = trie.leaf_key(node);
                if query.starts_with(key.as_bytes()) {
                    keep(key);
                }
                break;
            }
            if let Some(end) = trie.find_child(node, TERMINAL_LABEL) {
                keep(trie.leaf_key(end));
            }
            let Some(&b) = query.get(depth) else {
                break;
            };
            match trie.find_child(node, byte_label(b)) {
                Some(child) => {
                    node = child;
                    depth += 1;
                }
                None => break,
            }
        }

        if flags.is_descending() {
            self.matches.reverse();
        }
        if self.matches.is_empty() {
            self.core.exhaust();
        }
        Ok(())
    }
}

impl<'a> MatchSource<'a> for PrefixCursor<'a> {
    fn core(&mut self) -> &mut CursorCore {
        &mut self.core
    }

    fn advance(&mut self) -> Option<Key<'a>> {
        let key = *self.matches.get(self.pos)?;
        self.pos += 1;
        Some(key)
    }

    fn release(&mut self) {
        self.matches = Vec::new();
        self.pos = 0;
    }
}

impl<'a> Cursor<'a> for PrefixCursor<'a> {
    fn next(&mut self) -> Key<'a> {
        next_match(self)
    }

    fn close(&mut self) {
        *self = Self::default();
    }

    fn offset(&self) -> u32 {
        self.core.offset()
    }

    fn limit(&self) -> u32 {
        self.core.limit()
    }

    fn flags(&self) -> CursorFlags {
        self.core.flags()
    }

    fn state(&self) -> CursorState {
        self.core.state()
    }
}
