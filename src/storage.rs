//! Backing storage for the trie: a cell array grown in fixed blocks, each with
//! its own intrusive free ring, and an append-only key region addressed by key
//! id.

use smallvec::SmallVec;
use tracing::debug;

use crate::error::{Result, TrieError};
use crate::node::{Node, INVALID_OFFSET, ROOT_NODE_ID};
use crate::{INVALID_KEY_ID, MAX_KEY_ID};

// =============================================================================
// Node table
// =============================================================================

/// Cells per block. A child lives at `base ^ label`, and labels are below
/// `BLOCK_SIZE`, so every child set stays inside the block of its first cell.
pub(crate) const BLOCK_SIZE: usize = 512;
/// Failed searches before a block is demoted to the next level.
const MAX_FAILURE_COUNT: u8 = 4;
/// Level of blocks with no free cell. Levels below it are searched.
const MAX_BLOCK_LEVEL: usize = 5;

#[inline]
fn block_of(id: u32) -> u32 {
    id / BLOCK_SIZE as u32
}

/// Level a base search for `num_labels` labels starts from. Small child sets
/// may go into crowded blocks; large ones only into blocks that rarely fail.
fn start_level(num_labels: usize) -> usize {
    match num_labels {
        0..=1 => 4,
        2..=3 => 3,
        4..=15 => 2,
        16..=63 => 1,
        _ => 0,
    }
}

/// Allocation state of one block.
///
/// Blocks sit on a circular list per level. A block moves one level up each
/// time it fails `MAX_FAILURE_COUNT` searches, to the top level when it
/// fills up, and back to level 0 when a full block gets a cell back.
#[derive(Clone, Copy, Debug)]
struct Block {
    next: u32,
    prev: u32,
    level: u8,
    failures: u8,
    num_free: u16,
    /// Entry into the ring of free cells, `INVALID_OFFSET` when full.
    first_free: u32,
}

/// Cell array for the double-array automaton, grown one block at a time.
///
/// Free cells of a block form a circular list threaded through their `base`
/// (next) and `check` (prev) fields, so claiming a specific cell is O(1).
#[derive(Clone)]
pub(crate) struct NodeStore {
    nodes: Vec<Node>,
    blocks: Vec<Block>,
    leaders: [u32; MAX_BLOCK_LEVEL + 1],
    num_free: usize,
    max_nodes: usize,
}

impl NodeStore {
    /// Table of `initial_nodes` cells rounded up to whole blocks, with the
    /// root claimed.
    pub(crate) fn new(initial_nodes: usize, max_nodes: usize) -> Self {
        let max_blocks = (max_nodes / BLOCK_SIZE).max(1);
        let num_blocks = ((initial_nodes + BLOCK_SIZE - 1) / BLOCK_SIZE).clamp(1, max_blocks);
        let mut store = Self {
            nodes: Vec::with_capacity(num_blocks * BLOCK_SIZE),
            blocks: Vec::with_capacity(num_blocks),
            leaders: [INVALID_OFFSET; MAX_BLOCK_LEVEL + 1],
            num_free: 0,
            max_nodes,
        };
        for _ in 0..num_blocks {
            store.push_block();
        }
        store.claim(ROOT_NODE_ID);
        *store.node_mut(ROOT_NODE_ID) = Node::root();
        store
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub(crate) fn num_free(&self) -> usize {
        self.num_free
    }

    pub(crate) fn capacity_bytes(&self) -> usize {
        self.nodes.capacity() * std::mem::size_of::<Node>()
            + self.blocks.capacity() * std::mem::size_of::<Block>()
    }

    #[inline]
    pub(crate) fn node(&self, id: u32) -> &Node {
        &self.nodes[id as usize]
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, id: u32) -> &mut Node {
        &mut self.nodes[id as usize]
    }

    #[inline]
    pub(crate) fn is_free(&self, id: u32) -> bool {
        self.nodes[id as usize].is_free()
    }

    // -------------------------------------------------------------------------
    // Growth
    // -------------------------------------------------------------------------

    /// Append one block of free cells.
    ///
    /// Only free cells are appended, so a failure here never changes the
    /// visible structure.
    fn add_block(&mut self) -> Result<u32> {
        let required = self.nodes.len() + BLOCK_SIZE;
        if required > self.max_nodes {
            return Err(TrieError::exhausted("node table", required, self.max_nodes));
        }
        self.nodes
            .try_reserve(BLOCK_SIZE)
            .map_err(|_| TrieError::exhausted("node table", required, self.max_nodes))?;
        self.blocks
            .try_reserve(1)
            .map_err(|_| TrieError::exhausted("node table", required, self.max_nodes))?;
        let block = self.push_block();
        debug!(blocks = block + 1, nodes = required, "appended node block");
        Ok(block)
    }

    fn push_block(&mut self) -> u32 {
        let block = self.blocks.len() as u32;
        let start = self.nodes.len() as u32;
        let end = start + BLOCK_SIZE as u32;
        for id in start..end {
            let prev = if id == start { end - 1 } else { id - 1 };
            let next = if id + 1 == end { start } else { id + 1 };
            self.nodes.push(Node::free(prev, next));
        }
        self.blocks.push(Block {
            next: block,
            prev: block,
            level: 0,
            failures: 0,
            num_free: BLOCK_SIZE as u16,
            first_free: start,
        });
        self.link_block(block, 0);
        self.num_free += BLOCK_SIZE;
        block
    }

    // -------------------------------------------------------------------------
    // Block levels
    // -------------------------------------------------------------------------

    fn link_block(&mut self, block: u32, level: usize) {
        let leader = self.leaders[level];
        let (next, prev) = if leader == INVALID_OFFSET {
            self.leaders[level] = block;
            (block, block)
        } else {
            let tail = self.blocks[leader as usize].prev;
            self.blocks[tail as usize].next = block;
            self.blocks[leader as usize].prev = block;
            (leader, tail)
        };
        let b = &mut self.blocks[block as usize];
        b.next = next;
        b.prev = prev;
        b.level = level as u8;
        b.failures = 0;
    }

    fn unlink_block(&mut self, block: u32) {
        let Block {
            next, prev, level, ..
        } = self.blocks[block as usize];
        let level = usize::from(level);
        if next == block {
            self.leaders[level] = INVALID_OFFSET;
            return;
        }
        self.blocks[prev as usize].next = next;
        self.blocks[next as usize].prev = prev;
        if self.leaders[level] == block {
            self.leaders[level] = next;
        }
    }

    fn set_level(&mut self, block: u32, level: usize) {
        self.unlink_block(block);
        self.link_block(block, level);
    }

    fn record_failure(&mut self, block: u32) {
        let b = &mut self.blocks[block as usize];
        b.failures = b.failures.saturating_add(1);
        let level = usize::from(b.level);
        if b.failures >= MAX_FAILURE_COUNT && level + 1 < MAX_BLOCK_LEVEL {
            self.set_level(block, level + 1);
        }
    }

    // -------------------------------------------------------------------------
    // Cells
    // -------------------------------------------------------------------------

    /// Take a free cell out of its block. The caller writes the cell contents.
    pub(crate) fn claim(&mut self, id: u32) {
        debug_assert!(self.is_free(id), "claiming used cell {id}");
        let block = block_of(id);
        let Node {
            base: next,
            check: prev,
            ..
        } = *self.node(id);
        if next == id {
            self.blocks[block as usize].first_free = INVALID_OFFSET;
        } else {
            self.node_mut(prev).base = next;
            self.node_mut(next).check = prev;
            let b = &mut self.blocks[block as usize];
            if b.first_free == id {
                b.first_free = next;
            }
        }
        self.num_free -= 1;
        let b = &mut self.blocks[block as usize];
        b.num_free -= 1;
        if b.num_free == 0 {
            self.set_level(block, MAX_BLOCK_LEVEL);
        }
    }

    /// Return a used cell to its block.
    pub(crate) fn release(&mut self, id: u32) {
        debug_assert!(!self.is_free(id));
        debug_assert_ne!(id, ROOT_NODE_ID);
        let block = block_of(id);
        let head = self.blocks[block as usize].first_free;
        if head == INVALID_OFFSET {
            *self.node_mut(id) = Node::free(id, id);
            self.blocks[block as usize].first_free = id;
        } else {
            let tail = self.node(head).check;
            *self.node_mut(id) = Node::free(tail, head);
            self.node_mut(tail).base = id;
            self.node_mut(head).check = id;
        }
        self.num_free += 1;
        let b = &mut self.blocks[block as usize];
        b.num_free += 1;
        if usize::from(b.level) == MAX_BLOCK_LEVEL {
            self.set_level(block, 0);
        }
    }

    // -------------------------------------------------------------------------
    // Base search
    // -------------------------------------------------------------------------

    /// A base at which every label in `labels` (ascending) lands on a free
    /// cell.
    ///
    /// Examines at most `max_trials` blocks, from the crowded levels a set of
    /// this size may use down to level 0, and appends a fresh block when none
    /// of them fits.
    pub(crate) fn find_base(&mut self, labels: &[u16], max_trials: usize) -> Result<u32> {
        let mut trials = 0;
        for level in (0..=start_level(labels.len())).rev() {
            if trials >= max_trials {
                break;
            }
            // Snapshot the level first: failures move blocks between lists.
            let mut members: SmallVec<[u32; 16]> = SmallVec::new();
            let leader = self.leaders[level];
            let mut block = leader;
            while block != INVALID_OFFSET && members.len() < max_trials - trials {
                members.push(block);
                block = self.blocks[block as usize].next;
                if block == leader {
                    break;
                }
            }
            for block in members {
                trials += 1;
                let Block {
                    num_free,
                    first_free,
                    ..
                } = self.blocks[block as usize];
                if usize::from(num_free) >= labels.len() {
                    if let Some(base) = self.search_block(first_free, labels) {
                        return Ok(base);
                    }
                }
                self.record_failure(block);
            }
        }

        let block = self.add_block()?;
        Ok((block * BLOCK_SIZE as u32) ^ u32::from(labels[0]))
    }

    /// Try every free cell of a block as the home of the first label.
    fn search_block(&self, first_free: u32, labels: &[u16]) -> Option<u32> {
        let first = u32::from(labels[0]);
        let mut cell = first_free;
        loop {
            let base = cell ^ first;
            if labels[1..]
                .iter()
                .all(|&l| self.is_free(base ^ u32::from(l)))
            {
                return Some(base);
            }
            cell = self.node(cell).base;
            if cell == first_free {
                return None;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Test helpers
    // -------------------------------------------------------------------------

    #[cfg(test)]
    pub(crate) fn free_cells(&self, block: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let first = self.blocks[block as usize].first_free;
        if first == INVALID_OFFSET {
            return out;
        }
        let mut cur = first;
        loop {
            out.push(cur);
            cur = self.node(cur).base;
            if cur == first {
                return out;
            }
        }
    }

    #[cfg(test)]
    fn level_of(&self, block: u32) -> usize {
        usize::from(self.blocks[block as usize].level)
    }

    /// Panic unless every block's free ring, counters and level list agree
    /// with the cells.
    #[cfg(test)]
    pub(crate) fn validate(&self) {
        assert_eq!(self.nodes.len(), self.blocks.len() * BLOCK_SIZE);
        let mut total = 0;
        for block in 0..self.blocks.len() as u32 {
            let ring = self.free_cells(block);
            let start = block * BLOCK_SIZE as u32;
            let free = (start..start + BLOCK_SIZE as u32)
                .filter(|&id| self.is_free(id))
                .count();
            assert_eq!(ring.len(), free, "free ring of block {block}");
            assert!(ring.iter().all(|&id| block_of(id) == block && self.is_free(id)));
            for &id in &ring {
                let next = self.node(id).base;
                assert_eq!(self.node(next).check, id, "broken back link at {id}");
            }
            assert_eq!(usize::from(self.blocks[block as usize].num_free), free);
            assert_eq!(free == 0, self.level_of(block) == MAX_BLOCK_LEVEL);
            total += free;
        }
        assert_eq!(total, self.num_free);

        let mut listed = 0;
        for (level, &leader) in self.leaders.iter().enumerate() {
            if leader == INVALID_OFFSET {
                continue;
            }
            let mut cur = leader;
            loop {
                assert_eq!(self.level_of(cur), level);
                listed += 1;
                let next = self.blocks[cur as usize].next;
                assert_eq!(self.blocks[next as usize].prev, cur);
                cur = next;
                if cur == leader {
                    break;
                }
            }
        }
        assert_eq!(listed, self.blocks.len());
    }
}

// =============================================================================
// Key region
// =============================================================================

#[derive(Clone, Copy, Debug)]
struct KeyEntry {
    offset: u32,
    len: u32,
    live: bool,
}

/// Append-only byte region holding every inserted key, indexed by id.
///
/// A linked cell at depth `d` refers to a key here; the bytes past `d` are
/// that key's tail.
#[derive(Clone, Default)]
pub(crate) struct KeyStore {
    bytes: Vec<u8>,
    entries: Vec<KeyEntry>,
    num_live: usize,
    max_bytes: usize,
}

impl KeyStore {
    pub(crate) fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            ..Self::default()
        }
    }

    /// Make room for one more key of `len` bytes so the following `push`
    /// cannot fail.
    pub(crate) fn reserve(&mut self, len: usize) -> Result<()> {
        if self.entries.len() >= MAX_KEY_ID as usize {
            return Err(TrieError::exhausted(
                "key ids",
                self.entries.len() + 1,
                MAX_KEY_ID as usize,
            ));
        }
        let required = self.bytes.len() + len;
        if required > self.max_bytes {
            return Err(TrieError::exhausted("key region", required, self.max_bytes));
        }
        let grows = self.bytes.capacity() < required;
        self.bytes
            .try_reserve(len)
            .map_err(|_| TrieError::exhausted("key region", required, self.max_bytes))?;
        self.entries
            .try_reserve(1)
            .map_err(|_| TrieError::exhausted("key ids", self.entries.len() + 1, MAX_KEY_ID as usize))?;
        if grows {
            debug!(capacity = self.bytes.capacity(), "grew key region");
        }
        Ok(())
    }

    /// Append a key and return its id. Ids start at 1.
    pub(crate) fn push(&mut self, key: &[u8]) -> u32 {
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(key);
        self.entries.push(KeyEntry {
            offset,
            len: key.len() as u32,
            live: true,
        });
        self.num_live += 1;
        self.entries.len() as u32
    }

    /// Bytes of a live key.
    pub(crate) fn get(&self, id: u32) -> Option<&[u8]> {
        if id == INVALID_KEY_ID {
            return None;
        }
        let e = self.entries.get(id as usize - 1)?;
        if !e.live {
            return None;
        }
        let start = e.offset as usize;
        Some(&self.bytes[start..start + e.len as usize])
    }

    /// Mark an id as removed. The id is never handed out again.
    pub(crate) fn retire(&mut self, id: u32) {
        let Some(index) = (id as usize).checked_sub(1) else {
            return;
        };
        if let Some(e) = self.entries.get_mut(index) {
            if e.live {
                e.live = false;
                self.num_live -= 1;
            }
        }
    }

    #[inline]
    pub(crate) fn num_keys(&self) -> usize {
        self.num_live
    }

    #[inline]
    pub(crate) fn max_key_id(&self) -> u32 {
        self.entries.len() as u32
    }

    #[inline]
    pub(crate) fn total_len(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn capacity_bytes(&self) -> usize {
        self.bytes.capacity() + self.entries.capacity() * std::mem::size_of::<KeyEntry>()
    }
}
