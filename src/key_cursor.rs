use crate::cursor::{next_leaf, next_match, Cursor, CursorCore, CursorFlags, CursorState, Frame, MatchSource};
use crate::error::Result;
use crate::key::Key;
use crate::node::{label_at, INVALID_LABEL, ROOT_NODE_ID, TERMINAL_LABEL};
use crate::trie::Trie;

/// Enumerates stored keys `k` with `min <= k <= max` in byte-wise order.
///
/// An empty bound means unbounded on that side. The walk starts at the
/// boundary node for `min` (ascending) or `max` (descending) and stops at
/// the first key past the other bound.
///
/// ```rust
/// use dat_rs::{Cursor, CursorFlags, KeyCursor, Trie};
///
/// let mut trie = Trie::new();
/// for k in ["Dwarf", "Elf", "Gnome", "Hobbit", "Human"] {
///     trie.insert(k.as_bytes()).unwrap();
/// }
///
/// let mut cursor = KeyCursor::new();
/// cursor
///     .open(&trie, b"Elf", b"Hobbit", 0, u32::MAX, CursorFlags::EXCEPT_LOWER_BOUND)
///     .unwrap();
/// let keys: Vec<_> = cursor.keys().map(|k| k.as_bytes().to_vec()).collect();
/// assert_eq!(keys, vec![b"Gnome".to_vec(), b"Hobbit".to_vec()]);
/// ```
#[derive(Clone, Debug, Default)]
pub struct KeyCursor<'a> {
    trie: Option<&'a Trie>,
    core: CursorCore,
    min: Vec<u8>,
    max: Vec<u8>,
    stack: Vec<Frame>,
    /// A key has cleared the starting bound; everything after it does too.
    past_start: bool,
}

impl<'a> KeyCursor<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position the cursor on `[min, max]`, discarding any previous state.
    ///
    /// `EXCEPT_EXACT_MATCH` has no meaning for a range and is rejected.
    pub fn open(
        &mut self,
        trie: &'a Trie,
        min: &[u8],
        max: &[u8],
        offset: u32,
        limit: u32,
        flags: CursorFlags,
    ) -> Result<()> {
        flags.reject(CursorFlags::EXCEPT_EXACT_MATCH, "KeyCursor")?;
        self.reset(trie, min, max, offset, limit, flags);
        Ok(())
    }

    /// Unbounded ascending cursor over the whole trie.
    pub(crate) fn full_scan(trie: &'a Trie) -> Self {
        let mut cursor = Self::new();
        cursor.reset(trie, b"", b"", 0, u32::MAX, CursorFlags::ASCENDING);
        cursor
    }

    fn reset(
        &mut self,
        trie: &'a Trie,
        min: &[u8],
        max: &[u8],
        offset: u32,
        limit: u32,
        flags: CursorFlags,
    ) {
        self.trie = Some(trie);
        self.core.open(offset, limit, flags);
        self.min.clear();
        self.min.extend_from_slice(min);
        self.max.clear();
        self.max.extend_from_slice(max);
        self.stack.clear();
        self.past_start = false;

        if !self.core.is_open() || self.is_empty_range() {
            self.core.exhaust();
            return;
        }
        if flags.is_descending() {
            self.seed_descending(trie);
        } else {
            self.seed_ascending(trie);
        }
        if self.stack.is_empty() {
            self.core.exhaust();
        }
    }

    fn is_empty_range(&self) -> bool {
        if self.min.is_empty() || self.max.is_empty() {
            return false;
        }
        let flags = self.core.flags();
        self.min > self.max
            || (self.min == self.max
                && (flags.contains(CursorFlags::EXCEPT_LOWER_BOUND)
                    || flags.contains(CursorFlags::EXCEPT_UPPER_BOUND)))
    }

    /// Follow `min` down the trie, leaving behind every branch point whose
    /// later children are all `> min`.
    fn seed_ascending(&mut self, trie: &Trie) {
        if self.min.is_empty() {
            self.stack.push(Frame::Visit(ROOT_NODE_ID));
            return;
        }
        let mut node = ROOT_NODE_ID;
        let mut depth = 0;
        loop {
            let label = label_at(&self.min, depth);
            let start = trie.lower_child(node, label);
            if start == label && label != TERMINAL_LABEL {
                let child = trie.child_at(node, label);
                if !trie.node(child).linked {
                    let after = trie.next_child(node, label);
                    if after != INVALID_LABEL {
                        self.stack.push(Frame::Children { node, next: after });
                    }
                    node = child;
                    depth += 1;
                    continue;
                }
            }
            // Either `min` leaves the trie here or ends in a tail; the key
            // cell at `start` (if any) is compared against `min` on visit.
            if start != INVALID_LABEL {
                self.stack.push(Frame::Children { node, next: start });
            }
            return;
        }
    }

    /// Mirror of `seed_ascending` along `max`.
    fn seed_descending(&mut self, trie: &Trie) {
        if self.max.is_empty() {
            self.stack.push(Frame::Visit(ROOT_NODE_ID));
            return;
        }
        let mut node = ROOT_NODE_ID;
        let mut depth = 0;
        loop {
            let label = label_at(&self.max, depth);
            let start = trie.upper_child(node, label);
            if start == label && label != TERMINAL_LABEL {
                let child = trie.child_at(node, label);
                if !trie.node(child).linked {
                    let before = trie.prev_child(node, label);
                    if before != INVALID_LABEL {
                        self.stack.push(Frame::Children { node, next: before });
                    }
                    node = child;
                    depth += 1;
                    continue;
                }
            }
            if start != INVALID_LABEL {
                self.stack.push(Frame::Children { node, next: start });
            }
            return;
        }
    }
}

impl<'a> MatchSource<'a> for KeyCursor<'a> {
    fn core(&mut self) -> &mut CursorCore {
        &mut self.core
    }

    fn advance(&mut self) -> Option<Key<'a>> {
        let trie = self.trie?;
        let flags = self.core.flags();
        let descending = flags.is_descending();
        let (start, start_except, end, end_except) = if descending {
            (
                &self.max,
                flags.contains(CursorFlags::EXCEPT_UPPER_BOUND),
                &self.min,
                flags.contains(CursorFlags::EXCEPT_LOWER_BOUND),
            )
        } else {
            (
                &self.min,
                flags.contains(CursorFlags::EXCEPT_LOWER_BOUND),
                &self.max,
                flags.contains(CursorFlags::EXCEPT_UPPER_BOUND),
            )
        };

        while let Some(leaf) = next_leaf(trie, &mut self.stack, descending) {
            let key = trie.leaf_key(leaf);
            let bytes = key.as_bytes();

            if !self.past_start && !start.is_empty() {
                let before = if descending {
                    bytes > start.as_slice()
                } else {
                    bytes < start.as_slice()
                };
                if before || (start_except && bytes == start.as_slice()) {
                    continue;
                }
            }
            self.past_start = true;

            if !end.is_empty() {
                let beyond = if descending {
                    bytes < end.as_slice()
                } else {
                    bytes > end.as_slice()
                };
                if beyond || (end_except && bytes == end.as_slice()) {
                    self.stack.clear();
                    return None;
                }
            }
            return Some(key);
        }
        None
    }

    fn release(&mut self) {
        self.stack = Vec::new();
    }
}

impl<'a> Cursor<'a> for KeyCursor<'a> {
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
