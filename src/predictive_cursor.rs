use crate::cursor::{next_leaf, next_match, Cursor, CursorCore, CursorFlags, CursorState, Frame, MatchSource};
use crate::error::Result;
use crate::key::Key;
use crate::node::{byte_label, ROOT_NODE_ID};
use crate::trie::Trie;

/// Enumerates stored keys that start with a prefix.
///
/// Opening walks the prefix once; every `next()` then resumes the depth-first
/// walk below the node it reached. When the walk runs into a tail before the
/// prefix is used up, the single candidate key is compared against the whole
/// prefix on visit.
#[derive(Clone, Debug, Default)]
pub struct PredictiveCursor<'a> {
    trie: Option<&'a Trie>,
    core: CursorCore,
    prefix: Vec<u8>,
    stack: Vec<Frame>,
    /// The walk stopped inside a tail, so candidates still need a prefix check.
    check_prefix: bool,
    descending: bool,
}

impl<'a> PredictiveCursor<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position the cursor below `prefix`, discarding any previous state.
    ///
    /// Only `DESCENDING` and `EXCEPT_EXACT_MATCH` apply; the bound flags are
    /// rejected.
    pub fn open(
        &mut self,
        trie: &'a Trie,
        prefix: &[u8],
        offset: u32,
        limit: u32,
        flags: CursorFlags,
    ) -> Result<()> {
        flags.reject(
            CursorFlags::EXCEPT_LOWER_BOUND | CursorFlags::EXCEPT_UPPER_BOUND,
            "PredictiveCursor",
        )?;
        self.trie = Some(trie);
        self.core.open(offset, limit, flags);
        self.prefix.clear();
        self.prefix.extend_from_slice(prefix);
        self.stack.clear();
        self.check_prefix = false;
        self.descending = flags.is_descending();

        if !self.core.is_open() {
            return Ok(());
        }
        match self.seed(trie) {
            Some(node) => self.stack.push(Frame::Visit(node)),
            None => self.core.exhaust(),
        }
        Ok(())
    }

    /// Node whose subtree holds every candidate, or `None` when no stored key
    /// can start with the prefix.
    fn seed(&mut self, trie: &Trie) -> Option<u32> {
        let mut node = ROOT_NODE_ID;
        for &b in &self.prefix {
            if trie.node(node).linked {
                self.check_prefix = true;
                return Some(node);
            }
            node = trie.find_child(node, byte_label(b))?;
        }
        Some(node)
    }
}

impl<'a> MatchSource<'a> for PredictiveCursor<'a> {
    fn core(&mut self) -> &mut CursorCore {
        &mut self.core
    }

    fn advance(&mut self) -> Option<Key<'a>> {
        let trie = self.trie?;
        let except_exact = self.core.flags().contains(CursorFlags::EXCEPT_EXACT_MATCH);
        while let Some(leaf) = next_leaf(trie, &mut self.stack, self.descending) {
            let key = trie.leaf_key(leaf);
            if self.check_prefix && !key.as_bytes().starts_with(&self.prefix) {
                continue;
            }
            if except_exact && key.as_bytes() == self.prefix.as_slice() {
                continue;
            }
            return Some(key);
        }
        None
    }

    fn release(&mut self) {
        self.stack = Vec::new();
    }
}

impl<'a> Cursor<'a> for PredictiveCursor<'a> {
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
