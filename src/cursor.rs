//! Shared cursor machinery: flags, the open/next/close state machine, offset
//! and limit accounting, and the explicit depth-first frame stack.

use std::marker::PhantomData;
use std::ops::{BitOr, BitOrAssign};

use crate::error::{Result, TrieError};
use crate::key::Key;
use crate::node::INVALID_LABEL;
use crate::trie::Trie;

// =============================================================================
// Flags
// =============================================================================

/// Cursor options. Ascending order is the absence of [`DESCENDING`].
///
/// [`DESCENDING`]: CursorFlags::DESCENDING
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CursorFlags(u32);

impl CursorFlags {
    pub const ASCENDING: Self = Self(0);
    pub const DESCENDING: Self = Self(1 << 0);
    /// Skip a key equal to the lower bound.
    pub const EXCEPT_LOWER_BOUND: Self = Self(1 << 1);
    /// Skip a key equal to the upper bound.
    pub const EXCEPT_UPPER_BOUND: Self = Self(1 << 2);
    /// Skip a key equal to the prefix or query.
    pub const EXCEPT_EXACT_MATCH: Self = Self(1 << 3);

    const ALL: u32 = 0b1111;

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Flags from raw bits; unknown bits are an invalid argument.
    pub fn from_bits(bits: u32) -> Result<Self> {
        if bits & !Self::ALL != 0 {
            return Err(TrieError::invalid_argument(format!(
                "unknown cursor flag bits {:#x}",
                bits & !Self::ALL
            )));
        }
        Ok(Self(bits))
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn is_descending(self) -> bool {
        self.contains(Self::DESCENDING)
    }

    /// Reject any of `disallowed` for a cursor kind that has no use for them.
    pub(crate) fn reject(self, disallowed: Self, kind: &str) -> Result<()> {
        let bad = self.0 & disallowed.0;
        if bad != 0 {
            return Err(TrieError::invalid_argument(format!(
                "flags {bad:#x} are not supported by {kind}"
            )));
        }
        Ok(())
    }
}

impl BitOr for CursorFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CursorFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

// =============================================================================
// Cursor contract
// =============================================================================

/// Where a cursor is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorState {
    Closed,
    Open,
    Exhausted,
}

/// A resumable, forward-only enumeration over keys of one [`Trie`].
///
/// Each `next()` does only the work needed to reach one more result. Once it
/// returns the invalid key it keeps doing so until the cursor is reopened.
/// The cursor borrows the trie, so the trie cannot change underneath it.
pub trait Cursor<'a> {
    /// Next matching key, or the invalid key once exhausted.
    fn next(&mut self) -> Key<'a>;

    /// Drop all traversal state. The cursor may be reopened afterwards.
    fn close(&mut self);

    fn offset(&self) -> u32;

    fn limit(&self) -> u32;

    fn flags(&self) -> CursorFlags;

    fn state(&self) -> CursorState;

    /// Consume the cursor as an [`Iterator`].
    fn into_keys(self) -> CursorIter<'a, Self>
    where
        Self: Sized,
    {
        CursorIter::new(self)
    }

    /// Borrow the cursor as an [`Iterator`].
    fn keys(&mut self) -> CursorIter<'a, &mut Self>
    where
        Self: Sized,
    {
        CursorIter::new(self)
    }
}

impl<'a, C: Cursor<'a> + ?Sized> Cursor<'a> for &mut C {
    fn next(&mut self) -> Key<'a> {
        (**self).next()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn offset(&self) -> u32 {
        (**self).offset()
    }

    fn limit(&self) -> u32 {
        (**self).limit()
    }

    fn flags(&self) -> CursorFlags {
        (**self).flags()
    }

    fn state(&self) -> CursorState {
        (**self).state()
    }
}

/// Iterator adapter that stops at the first invalid key.
pub struct CursorIter<'a, C> {
    cursor: C,
    _marker: PhantomData<Key<'a>>,
}

impl<'a, C: Cursor<'a>> CursorIter<'a, C> {
    fn new(cursor: C) -> Self {
        Self {
            cursor,
            _marker: PhantomData,
        }
    }

    pub fn into_inner(self) -> C {
        self.cursor
    }
}

impl<'a, C: Cursor<'a>> Iterator for CursorIter<'a, C> {
    type Item = Key<'a>;

    fn next(&mut self) -> Option<Key<'a>> {
        let key = self.cursor.next();
        key.is_valid().then_some(key)
    }
}

// =============================================================================
// Offset / limit bookkeeping
// =============================================================================

/// State shared by every cursor kind.
#[derive(Clone, Debug)]
pub(crate) struct CursorCore {
    offset: u32,
    limit: u32,
    flags: CursorFlags,
    to_skip: u32,
    produced: u32,
    state: CursorState,
}

impl Default for CursorCore {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: u32::MAX,
            flags: CursorFlags::ASCENDING,
            to_skip: 0,
            produced: 0,
            state: CursorState::Closed,
        }
    }
}

impl CursorCore {
    pub(crate) fn open(&mut self, offset: u32, limit: u32, flags: CursorFlags) {
        *self = Self {
            offset,
            limit,
            flags,
            to_skip: offset,
            produced: 0,
            state: if limit == 0 {
                CursorState::Exhausted
            } else {
                CursorState::Open
            },
        };
    }

    pub(crate) fn close(&mut self) {
        *self = Self::default();
    }

    #[inline]
    pub(crate) fn offset(&self) -> u32 {
        self.offset
    }

    #[inline]
    pub(crate) fn limit(&self) -> u32 {
        self.limit
    }

    #[inline]
    pub(crate) fn flags(&self) -> CursorFlags {
        self.flags
    }

    #[inline]
    pub(crate) fn state(&self) -> CursorState {
        self.state
    }

    #[inline]
    pub(crate) fn is_open(&self) -> bool {
        self.state == CursorState::Open
    }

    pub(crate) fn exhaust(&mut self) {
        if self.state == CursorState::Open {
            self.state = CursorState::Exhausted;
        }
    }

    /// Count one in-range match; true when it falls past the offset.
    fn admit(&mut self) -> bool {
        if self.to_skip > 0 {
            self.to_skip -= 1;
            return false;
        }
        self.produced += 1;
        true
    }
}

/// A cursor kind's in-order source of in-range keys.
pub(crate) trait MatchSource<'a> {
    fn core(&mut self) -> &mut CursorCore;

    /// Next in-range key in traversal order, `None` when there are no more.
    fn advance(&mut self) -> Option<Key<'a>>;

    /// Free traversal buffers once exhausted.
    fn release(&mut self);
}

/// Drive a source through offset and limit. Shared `next()` body of every
/// cursor.
pub(crate) fn next_match<'a, S: MatchSource<'a>>(source: &mut S) -> Key<'a> {
    if !source.core().is_open() {
        return Key::invalid();
    }
    while source.core().produced < source.core().limit {
        let Some(key) = source.advance() else {
            break;
        };
        if source.core().admit() {
            return key;
        }
    }
    source.core().exhaust();
    source.release();
    Key::invalid()
}

// =============================================================================
// Depth-first frames
// =============================================================================

/// One pending step of a depth-first walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Frame {
    /// A node not entered yet.
    Visit(u32),
    /// A branch part way through its children; `next` is always a real child.
    Children { node: u32, next: u16 },
}

/// Advance the walk to the next linked cell. Children are taken in ascending
/// label order, or descending when `descending` is set. Since the terminal
/// label sorts first, this yields keys in byte-wise order (or its reverse).
pub(crate) fn next_leaf(trie: &Trie, stack: &mut Vec<Frame>, descending: bool) -> Option<u32> {
    loop {
        let node = match *stack.last()? {
            Frame::Visit(node) => {
                stack.pop();
                node
            }
            Frame::Children { node, next } => {
                let child = trie.child_at(node, next);
                let following = if descending {
                    trie.prev_child(node, next)
                } else {
                    trie.node(child).sibling
                };
                if following == INVALID_LABEL {
                    stack.pop();
                } else if let Some(top) = stack.last_mut() {
                    *top = Frame::Children {
                        node,
                        next: following,
                    };
                }
                child
            }
        };

        if trie.node(node).linked {
            return Some(node);
        }
        let first = if descending {
            trie.last_child(node)
        } else {
            trie.first_child(node)
        };
        if first != INVALID_LABEL {
            stack.push(Frame::Children { node, next: first });
        }
    }
}
