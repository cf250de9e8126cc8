use std::fmt;

use crate::INVALID_KEY_ID;

/// A stored key as seen through the trie: its id and its bytes.
///
/// Keys borrow their bytes from the trie's key region, so they live no
/// longer than the trie they came from. The invalid key (id
/// [`INVALID_KEY_ID`]) is what lookups and cursors hand back when there is
/// nothing to return.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key<'a> {
    id: u32,
    bytes: &'a [u8],
}

impl<'a> Key<'a> {
    pub const fn invalid() -> Self {
        Self {
            id: INVALID_KEY_ID,
            bytes: &[],
        }
    }

    #[inline]
    pub(crate) fn new(id: u32, bytes: &'a [u8]) -> Self {
        debug_assert_ne!(id, INVALID_KEY_ID);
        Self { id, bytes }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.id != INVALID_KEY_ID
    }
}

impl Default for Key<'_> {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Debug for Key<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return f.write_str("Key(invalid)");
        }
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("bytes", &String::from_utf8_lossy(self.bytes))
            .finish()
    }
}
