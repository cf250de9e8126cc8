// =============================================================================
// Labels
// =============================================================================

/// Label of the end-of-key transition. It sorts before every byte label, so a
/// key is visited before all of its extensions.
pub(crate) const TERMINAL_LABEL: u16 = 0;
/// One label per byte value plus the terminal.
pub(crate) const NUM_LABELS: usize = 257;
pub(crate) const INVALID_LABEL: u16 = u16::MAX;
pub(crate) const INVALID_OFFSET: u32 = u32::MAX;
pub(crate) const ROOT_NODE_ID: u32 = 0;

#[inline]
pub(crate) fn byte_label(b: u8) -> u16 {
    u16::from(b) + 1
}

/// Label consumed at `depth`: the byte there, or the terminal once the key
/// runs out.
#[inline]
pub(crate) fn label_at(key: &[u8], depth: usize) -> u16 {
    key.get(depth).map_or(TERMINAL_LABEL, |&b| byte_label(b))
}

// =============================================================================
// Cells
// =============================================================================

/// One double-array cell.
///
/// Used cells: `check` is the parent, `label` the transition that reaches
/// this cell, and `base` is either the offset of the child set (children
/// live at `base ^ label`) or, when `linked`, the id of the key whose
/// remaining suffix sits in the key region.
///
/// Free cells: `label == INVALID_LABEL`, and `base`/`check` are the next and
/// previous cells of the block's free ring.
///
/// `child` and `sibling` chain the children of a node in ascending label
/// order so traversal never probes all 257 slots. `prev` runs the other way
/// and wraps: the first child's `prev` is the last child, so both ends of a
/// chain and every backward step are O(1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Node {
    pub(crate) base: u32,
    pub(crate) check: u32,
    pub(crate) label: u16,
    pub(crate) child: u16,
    pub(crate) sibling: u16,
    pub(crate) prev: u16,
    pub(crate) linked: bool,
}

impl Node {
    pub(crate) fn root() -> Self {
        Self {
            base: INVALID_OFFSET,
            check: INVALID_OFFSET,
            label: TERMINAL_LABEL,
            child: INVALID_LABEL,
            sibling: INVALID_LABEL,
            prev: INVALID_LABEL,
            linked: false,
        }
    }

    pub(crate) fn free(prev: u32, next: u32) -> Self {
        Self {
            base: next,
            check: prev,
            label: INVALID_LABEL,
            child: INVALID_LABEL,
            sibling: INVALID_LABEL,
            prev: INVALID_LABEL,
            linked: false,
        }
    }

    /// Interior node with no children yet, alone in its parent's chain until
    /// spliced in.
    pub(crate) fn branch(parent: u32, label: u16) -> Self {
        Self {
            base: INVALID_OFFSET,
            check: parent,
            label,
            child: INVALID_LABEL,
            sibling: INVALID_LABEL,
            prev: label,
            linked: false,
        }
    }

    /// Node handing off to the key region.
    pub(crate) fn leaf(parent: u32, label: u16, key_id: u32) -> Self {
        Self {
            base: key_id,
            check: parent,
            label,
            child: INVALID_LABEL,
            sibling: INVALID_LABEL,
            prev: label,
            linked: true,
        }
    }

    #[inline]
    pub(crate) fn is_free(&self) -> bool {
        self.label == INVALID_LABEL
    }

    #[inline]
    pub(crate) fn key_id(&self) -> u32 {
        debug_assert!(self.linked);
        self.base
    }

    /// Whether the node owns a child block.
    #[inline]
    pub(crate) fn has_base(&self) -> bool {
        !self.linked && self.base != INVALID_OFFSET
    }

    /// Hand an empty branch off to key `key_id`.
    pub(crate) fn link(&mut self, key_id: u32) {
        debug_assert!(!self.has_base());
        self.linked = true;
        self.base = key_id;
    }

    /// Turn a leaf into a branch whose child block starts at `base`.
    pub(crate) fn unlink(&mut self, base: u32, first_child: u16) {
        self.linked = false;
        self.base = base;
        self.child = first_child;
    }
}
