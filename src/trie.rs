use std::fmt;

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::config::TrieConfig;
use crate::cursor::{Cursor, CursorIter};
use crate::error::{Result, TrieError};
use crate::key::Key;
use crate::key_cursor::KeyCursor;
use crate::node::{
    byte_label, label_at, Node, INVALID_LABEL, ROOT_NODE_ID, TERMINAL_LABEL,
};
use crate::storage::{KeyStore, NodeStore};
use crate::MAX_KEY_LENGTH;

type Labels = SmallVec<[u16; 8]>;

/// Double-array trie mapping byte strings to stable key ids.
///
/// - Transitions: child of `p` under label `l` lives at `base(p) ^ l` and
///   records `p` in its `check` field. Labels are below the block size, so a
///   child set never straddles blocks.
/// - Tail compression: a key's unshared suffix is never expanded into cells;
///   a linked cell points at the key region instead.
/// - Collisions relocate whichever of the two competing child sets is smaller.
///
/// Ids start at 1, are assigned in insertion order and are never reissued.
#[derive(Clone)]
pub struct Trie {
    nodes: NodeStore,
    keys: KeyStore,
    config: TrieConfig,
}

impl Trie {
    /// Empty trie with the default configuration.
    pub fn new() -> Self {
        Self::build(TrieConfig::default())
    }

    pub fn with_config(config: TrieConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: TrieConfig) -> Self {
        Self {
            nodes: NodeStore::new(config.initial_nodes, config.max_nodes),
            keys: KeyStore::new(config.max_key_bytes),
            config,
        }
    }

    pub fn config(&self) -> &TrieConfig {
        &self.config
    }

    #[inline]
    pub fn num_keys(&self) -> usize {
        self.keys.num_keys()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.num_keys() == 0
    }

    /// Highest id handed out so far, removed keys included.
    #[inline]
    pub fn max_key_id(&self) -> u32 {
        self.keys.max_key_id()
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn num_free_nodes(&self) -> usize {
        self.nodes.num_free()
    }

    /// Bytes appended to the key region, removed keys included.
    #[inline]
    pub fn total_key_length(&self) -> usize {
        self.keys.total_len()
    }

    pub fn memory_usage(&self) -> usize {
        self.nodes.capacity_bytes() + self.keys.capacity_bytes()
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Id of `key`, or `None` when it is not stored.
    pub fn lookup(&self, key: &[u8]) -> Option<u32> {
        self.find_leaf(key).map(|leaf| self.nodes.node(leaf).key_id())
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.find_leaf(key).is_some()
    }

    /// Key stored under `id`; the invalid key for unknown or removed ids.
    pub fn get_key(&self, id: u32) -> Key<'_> {
        match self.keys.get(id) {
            Some(bytes) => Key::new(id, bytes),
            None => Key::invalid(),
        }
    }

    /// Longest stored key that is a prefix of `query`.
    pub fn lcp_search(&self, query: &[u8]) -> Key<'_> {
        let mut best = Key::invalid();
        let mut node = ROOT_NODE_ID;
        let mut depth = 0;
        loop {
            if self.nodes.node(node).linked {
                let key = self.leaf_key(node);
                if query.starts_with(key.as_bytes()) {
                    best = key;
                }
                return best;
            }
            if let Some(end) = self.find_child(node, TERMINAL_LABEL) {
                best = self.leaf_key(end);
            }
            let Some(&b) = query.get(depth) else {
                return best;
            };
            match self.find_child(node, byte_label(b)) {
                Some(child) => {
                    node = child;
                    depth += 1;
                }
                None => return best,
            }
        }
    }

    /// Linked cell holding `key`.
    fn find_leaf(&self, key: &[u8]) -> Option<u32> {
        let mut node = ROOT_NODE_ID;
        let mut depth = 0;
        loop {
            let n = self.nodes.node(node);
            if n.linked {
                // Only the tail past `depth` is still unverified.
                let stored = self.keys.get(n.key_id())?;
                return (stored.get(depth..) == key.get(depth..)).then_some(node);
            }
            let label = label_at(key, depth);
            node = self.find_child(node, label)?;
            if label != TERMINAL_LABEL {
                depth += 1;
            }
        }
    }

    /// Ascending iterator over every stored key.
    pub fn iter(&self) -> CursorIter<'_, KeyCursor<'_>> {
        KeyCursor::full_scan(self).into_keys()
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Insert `key` and return its id. Inserting a stored key returns the
    /// existing id and changes nothing.
    ///
    /// On [`TrieError::ResourceExhausted`] the set of stored keys and their ids
    /// are exactly what they were before the call.
    pub fn insert(&mut self, key: &[u8]) -> Result<u32> {
        if key.len() > MAX_KEY_LENGTH {
            return Err(TrieError::invalid_argument(format!(
                "key length {} exceeds {}",
                key.len(),
                MAX_KEY_LENGTH
            )));
        }
        let result = self.insert_key(key);
        if let Err(err) = &result {
            debug!(error = %err, key_len = key.len(), "insert failed");
        }
        result
    }

    fn insert_key(&mut self, key: &[u8]) -> Result<u32> {
        let mut node = ROOT_NODE_ID;
        let mut depth = 0;
        loop {
            let n = *self.nodes.node(node);
            if n.linked {
                let stored = self.keys.get(n.key_id()).unwrap_or_default();
                if stored == key {
                    return Ok(n.key_id());
                }
                let common = depth
                    + stored[depth..]
                        .iter()
                        .zip(&key[depth..])
                        .take_while(|(a, b)| a == b)
                        .count();
                let old_label = label_at(stored, common);
                return self.split_leaf(node, depth, common, old_label, key);
            }
            let label = label_at(key, depth);
            match self.find_child(node, label) {
                Some(child) => {
                    node = child;
                    if label != TERMINAL_LABEL {
                        depth += 1;
                    }
                }
                None => return self.attach_leaf(node, label, key),
            }
        }
    }

    /// `parent` has no transition for `label`: hang a new leaf there.
    fn attach_leaf(&mut self, parent: u32, label: u16, key: &[u8]) -> Result<u32> {
        self.keys.reserve(key.len())?;
        let child = self.add_child(parent, label)?;
        let id = self.keys.push(key);
        self.nodes.node_mut(child).link(id);
        Ok(id)
    }

    /// `leaf` (reached after `depth` bytes) holds another key that agrees with
    /// `key` up to `common`. Push the old key down one cell per shared byte,
    /// then fork both keys off the last cell.
    ///
    /// On failure every pushed cell is released and `leaf` is restored, so
    /// the cell table is left exactly as it was.
    fn split_leaf(
        &mut self,
        leaf: u32,
        depth: usize,
        common: usize,
        old_label: u16,
        key: &[u8],
    ) -> Result<u32> {
        self.keys.reserve(key.len())?;
        let saved = *self.nodes.node(leaf);
        let mut pushed = Vec::new();
        match self.push_and_fork(leaf, depth, common, old_label, key, &mut pushed) {
            Ok(id) => Ok(id),
            Err(err) => {
                for &cell in pushed.iter().rev() {
                    self.nodes.release(cell);
                }
                *self.nodes.node_mut(leaf) = saved;
                debug!(released = pushed.len(), "rolled back tail split");
                Err(err)
            }
        }
    }

    fn push_and_fork(
        &mut self,
        leaf: u32,
        depth: usize,
        common: usize,
        old_label: u16,
        key: &[u8],
        pushed: &mut Vec<u32>,
    ) -> Result<u32> {
        let mut cur = leaf;
        for &b in &key[depth..common] {
            cur = self.push_down(cur, byte_label(b))?;
            pushed.push(cur);
        }

        let new_label = label_at(key, common);
        debug_assert_ne!(old_label, new_label);
        let (lo, hi) = if old_label < new_label {
            (old_label, new_label)
        } else {
            (new_label, old_label)
        };
        let base = self.nodes.find_base(&[lo, hi], self.config.max_trials)?;

        let old_id = self.nodes.node(cur).key_id();
        let new_id = self.keys.push(key);
        let (lo_id, hi_id) = (base ^ u32::from(lo), base ^ u32::from(hi));
        self.nodes.claim(lo_id);
        self.nodes.claim(hi_id);
        *self.nodes.node_mut(base ^ u32::from(old_label)) = Node::leaf(cur, old_label, old_id);
        *self.nodes.node_mut(base ^ u32::from(new_label)) = Node::leaf(cur, new_label, new_id);
        let lo_node = self.nodes.node_mut(lo_id);
        lo_node.sibling = hi;
        lo_node.prev = hi;
        self.nodes.node_mut(hi_id).prev = lo;
        self.nodes.node_mut(cur).unlink(base, lo);
        Ok(new_id)
    }

    /// Move the key linked at `leaf` one level down under `label`.
    fn push_down(&mut self, leaf: u32, label: u16) -> Result<u32> {
        let base = self.nodes.find_base(&[label], self.config.max_trials)?;
        let child = base ^ u32::from(label);
        let id = self.nodes.node(leaf).key_id();
        self.nodes.claim(child);
        *self.nodes.node_mut(child) = Node::leaf(leaf, label, id);
        self.nodes.node_mut(leaf).unlink(base, label);
        Ok(child)
    }

    /// Create an empty child of branch `parent` under `label`, relocating
    /// either `parent`'s children or the occupant's siblings on collision.
    fn add_child(&mut self, parent: u32, label: u16) -> Result<u32> {
        if !self.nodes.node(parent).has_base() {
            let base = self.nodes.find_base(&[label], self.config.max_trials)?;
            self.nodes.node_mut(parent).base = base;
            return Ok(self.attach_child(parent, label));
        }

        let mut parent = parent;
        let target = self.child_at(parent, label);
        if !self.nodes.is_free(target) {
            let mut mine = self.child_labels(parent);
            mine.insert(mine.partition_point(|&l| l < label), label);
            // The root has no parent and never moves.
            let theirs = (target != ROOT_NODE_ID).then(|| {
                let owner = self.nodes.node(target).check;
                (owner, self.child_labels(owner))
            });
            match theirs {
                Some((owner, theirs)) if theirs.len() < mine.len() => {
                    let base = self.nodes.find_base(&theirs, self.config.max_trials)?;
                    parent = self.relocate(owner, base, parent);
                }
                _ => {
                    let base = self.nodes.find_base(&mine, self.config.max_trials)?;
                    self.relocate(parent, base, parent);
                }
            }
        }
        Ok(self.attach_child(parent, label))
    }

    /// Claim `base(parent) ^ label` and splice it into the sorted child chain.
    fn attach_child(&mut self, parent: u32, label: u16) -> u32 {
        let base = self.nodes.node(parent).base;
        let id = base ^ u32::from(label);
        self.nodes.claim(id);
        *self.nodes.node_mut(id) = Node::branch(parent, label);

        let first = self.nodes.node(parent).child;
        if first == INVALID_LABEL {
            self.nodes.node_mut(parent).child = label;
            return id;
        }
        let first_id = base ^ u32::from(first);
        let last = self.nodes.node(first_id).prev;
        if label < first {
            let n = self.nodes.node_mut(id);
            n.sibling = first;
            n.prev = last;
            self.nodes.node_mut(first_id).prev = label;
            self.nodes.node_mut(parent).child = label;
        } else if label > last {
            self.nodes.node_mut(base ^ u32::from(last)).sibling = label;
            self.nodes.node_mut(id).prev = last;
            self.nodes.node_mut(first_id).prev = label;
        } else {
            let mut before = last;
            while before > label {
                before = self.nodes.node(base ^ u32::from(before)).prev;
            }
            let before_id = base ^ u32::from(before);
            let after = self.nodes.node(before_id).sibling;
            let n = self.nodes.node_mut(id);
            n.sibling = after;
            n.prev = before;
            self.nodes.node_mut(before_id).sibling = label;
            self.nodes.node_mut(base ^ u32::from(after)).prev = label;
        }
        id
    }

    /// Move every child of `owner` to `new_base`, repointing grandchildren.
    /// Returns where `tracked` lives afterwards.
    fn relocate(&mut self, owner: u32, new_base: u32, mut tracked: u32) -> u32 {
        let old_base = self.nodes.node(owner).base;
        let labels = self.child_labels(owner);
        for &label in &labels {
            let from = old_base ^ u32::from(label);
            let to = new_base ^ u32::from(label);
            self.nodes.claim(to);
            let moved = *self.nodes.node(from);
            *self.nodes.node_mut(to) = moved;
            if moved.has_base() {
                let mut grand = moved.child;
                while grand != INVALID_LABEL {
                    let g = moved.base ^ u32::from(grand);
                    self.nodes.node_mut(g).check = to;
                    grand = self.nodes.node(g).sibling;
                }
            }
            if tracked == from {
                tracked = to;
            }
            self.nodes.release(from);
        }
        self.nodes.node_mut(owner).base = new_base;
        trace!(owner, old_base, new_base, moved = labels.len(), "relocated children");
        tracked
    }

    fn child_labels(&self, node: u32) -> Labels {
        let mut out = Labels::new();
        let mut label = self.first_child(node);
        while label != INVALID_LABEL {
            out.push(label);
            label = self.next_child(node, label);
        }
        out
    }

    // =========================================================================
    // Remove
    // =========================================================================

    /// Remove `key`. Returns whether the key was present.
    ///
    /// The leaf is freed along with every branch left without children. The
    /// id is retired, not recycled, so the key's bytes stay in the key region
    /// and still count towards `total_key_length`.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        let Some(leaf) = self.find_leaf(key) else {
            return false;
        };
        let id = self.nodes.node(leaf).key_id();
        let mut parent = self.detach(leaf);
        while parent != ROOT_NODE_ID && self.nodes.node(parent).child == INVALID_LABEL {
            parent = self.detach(parent);
        }
        self.keys.retire(id);
        true
    }

    /// Unlink `cell` from its parent's chain and free it. Returns the parent.
    fn detach(&mut self, cell: u32) -> u32 {
        let Node {
            check: parent,
            label,
            sibling,
            prev,
            ..
        } = *self.nodes.node(cell);
        let base = self.nodes.node(parent).base;
        let first = self.nodes.node(parent).child;
        if first == label {
            self.nodes.node_mut(parent).child = sibling;
        } else {
            self.nodes.node_mut(base ^ u32::from(prev)).sibling = sibling;
        }
        if sibling != INVALID_LABEL {
            self.nodes.node_mut(base ^ u32::from(sibling)).prev = prev;
        } else if first != label {
            // Removed the last child: the first one now wraps to `prev`.
            self.nodes.node_mut(base ^ u32::from(first)).prev = prev;
        }
        self.nodes.release(cell);
        parent
    }

    // =========================================================================
    // Navigation used by cursors
    // =========================================================================

    #[inline]
    pub(crate) fn node(&self, id: u32) -> &Node {
        self.nodes.node(id)
    }

    /// Cell for `label` under `parent`, which must have a child set.
    #[inline]
    pub(crate) fn child_at(&self, parent: u32, label: u16) -> u32 {
        self.nodes.node(parent).base ^ u32::from(label)
    }

    pub(crate) fn find_child(&self, parent: u32, label: u16) -> Option<u32> {
        let n = self.nodes.node(parent);
        if !n.has_base() {
            return None;
        }
        let id = n.base ^ u32::from(label);
        let c = self.nodes.node(id);
        (c.check == parent && c.label == label).then_some(id)
    }

    #[inline]
    pub(crate) fn first_child(&self, node: u32) -> u16 {
        let n = self.nodes.node(node);
        if n.linked {
            INVALID_LABEL
        } else {
            n.child
        }
    }

    #[inline]
    pub(crate) fn next_child(&self, parent: u32, label: u16) -> u16 {
        self.nodes.node(self.child_at(parent, label)).sibling
    }

    pub(crate) fn last_child(&self, node: u32) -> u16 {
        let first = self.first_child(node);
        if first == INVALID_LABEL {
            return first;
        }
        self.nodes.node(self.child_at(node, first)).prev
    }

    /// Child label just before child `label`, or `INVALID_LABEL` when it is
    /// first.
    #[inline]
    pub(crate) fn prev_child(&self, parent: u32, label: u16) -> u16 {
        if self.first_child(parent) == label {
            INVALID_LABEL
        } else {
            self.nodes.node(self.child_at(parent, label)).prev
        }
    }

    /// Smallest child label `>= label`.
    pub(crate) fn lower_child(&self, node: u32, label: u16) -> u16 {
        let mut cur = self.first_child(node);
        while cur != INVALID_LABEL && cur < label {
            cur = self.next_child(node, cur);
        }
        cur
    }

    /// Largest child label `<= label`.
    pub(crate) fn upper_child(&self, node: u32, label: u16) -> u16 {
        let mut cur = self.last_child(node);
        while cur != INVALID_LABEL && cur > label {
            cur = self.prev_child(node, cur);
        }
        cur
    }

    /// Key linked at `leaf`.
    pub(crate) fn leaf_key(&self, leaf: u32) -> Key<'_> {
        self.get_key(self.nodes.node(leaf).key_id())
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Bytes consumed on the way from the root to `id`.
    #[cfg(test)]
    pub(crate) fn path_of(&self, mut id: u32) -> Vec<u8> {
        let mut out = Vec::new();
        while id != ROOT_NODE_ID {
            let n = self.nodes.node(id);
            if n.label != TERMINAL_LABEL {
                out.push((n.label - 1) as u8);
            }
            id = n.check;
        }
        out.reverse();
        out
    }

    /// Panic unless every structural invariant holds.
    #[cfg(test)]
    pub(crate) fn validate(&self) {
        let mut free = 0usize;
        let mut leaves = 0usize;
        for id in 0..self.nodes.len() as u32 {
            let n = *self.nodes.node(id);
            if n.is_free() {
                free += 1;
                continue;
            }
            if id == ROOT_NODE_ID {
                assert!(!n.linked, "root must not be linked");
                continue;
            }
            let parent = self.nodes.node(n.check);
            assert!(parent.has_base(), "parent of {id} has no child set");
            assert_eq!(parent.base ^ u32::from(n.label), id, "check/base mismatch at {id}");
            assert!(
                self.child_labels(n.check).contains(&n.label),
                "{id} missing from its parent's chain"
            );
            let labels = self.child_labels(id);
            assert!(labels.windows(2).all(|w| w[0] < w[1]), "unsorted chain at {id}");
            if !n.linked {
                assert!(!labels.is_empty(), "branch {id} has no children");
            }
            if n.linked {
                leaves += 1;
                let key = self.get_key(n.key_id());
                assert!(key.is_valid(), "{id} links a dead key");
                let path = self.path_of(id);
                assert!(key.as_bytes().starts_with(&path), "tail of {id} disagrees with path");
                if n.label == TERMINAL_LABEL {
                    assert_eq!(key.len(), path.len());
                }
            } else if n.label == TERMINAL_LABEL {
                panic!("terminal cell {id} is not linked");
            }
        }
        for id in 0..self.nodes.len() as u32 {
            if self.nodes.is_free(id) || self.nodes.node(id).linked {
                continue;
            }
            let labels = self.child_labels(id);
            let mut before = labels.last().copied().unwrap_or(INVALID_LABEL);
            assert_eq!(self.last_child(id), before, "last child of {id}");
            for &l in &labels {
                assert_eq!(self.nodes.node(self.child_at(id, l)).prev, before, "back link at {id}/{l}");
                before = l;
            }
        }
        assert_eq!(free, self.nodes.num_free());
        assert_eq!(leaves, self.num_keys());
        self.nodes.validate();
    }
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Trie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
