use crate::cursor::{next_match, Cursor, CursorCore, CursorFlags, CursorState, MatchSource};
use crate::error::Result;
use crate::key::Key;
use crate::trie::Trie;
use crate::{INVALID_KEY_ID, MIN_KEY_ID};

/// Enumerates live keys by id. Removed ids are skipped.
#[derive(Clone, Debug, Default)]
pub struct IdCursor<'a> {
    trie: Option<&'a Trie>,
    core: CursorCore,
    /// Next id to try, in traversal direction.
    cur: u32,
    /// Last id in traversal direction.
    end: u32,
}

impl<'a> IdCursor<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position the cursor on ids `[min_id, max_id]`. A zero bound is
    /// unbounded on that side, and the except flags only apply to bounds
    /// that were given.
    pub fn open(
        &mut self,
        trie: &'a Trie,
        min_id: u32,
        max_id: u32,
        offset: u32,
        limit: u32,
        flags: CursorFlags,
    ) -> Result<()> {
        flags.reject(CursorFlags::EXCEPT_EXACT_MATCH, "IdCursor")?;
        self.trie = Some(trie);
        self.core.open(offset, limit, flags);

        let mut lo = if min_id == INVALID_KEY_ID {
            MIN_KEY_ID
        } else {
            min_id
        };
        let mut hi = if max_id == INVALID_KEY_ID {
            trie.max_key_id()
        } else {
            max_id.min(trie.max_key_id())
        };
        if min_id != INVALID_KEY_ID && flags.contains(CursorFlags::EXCEPT_LOWER_BOUND) {
            lo = lo.saturating_add(1);
        }
        if max_id != INVALID_KEY_ID
            && max_id <= trie.max_key_id()
            && flags.contains(CursorFlags::EXCEPT_UPPER_BOUND)
        {
            hi = hi.saturating_sub(1);
        }

        if lo > hi {
            self.cur = INVALID_KEY_ID;
            self.end = INVALID_KEY_ID;
            self.core.exhaust();
        } else if flags.is_descending() {
            self.cur = hi;
            self.end = lo;
        } else {
            self.cur = lo;
            self.end = hi;
        }
        Ok(())
    }
}

impl<'a> MatchSource<'a> for IdCursor<'a> {
    fn core(&mut self) -> &mut CursorCore {
        &mut self.core
    }

    fn advance(&mut self) -> Option<Key<'a>> {
        let trie = self.trie?;
        let descending = self.core.flags().is_descending();
        while self.cur != INVALID_KEY_ID {
            let id = self.cur;
            self.cur = if id == self.end {
                INVALID_KEY_ID
            } else if descending {
                id - 1
            } else {
                id + 1
            };
            let key = trie.get_key(id);
            if key.is_valid() {
                return Some(key);
            }
        }
        None
    }

    fn release(&mut self) {
        self.cur = INVALID_KEY_ID;
    }
}

impl<'a> Cursor<'a> for IdCursor<'a> {
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
