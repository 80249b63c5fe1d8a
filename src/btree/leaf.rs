//! Leaf nodes of the B+ tree.
//!
//! A leaf body is a 16-byte header (`prev_page`, `next_page`, both
//! little-endian page ids) followed by a slotted region of key-value
//! pairs kept in key order. Leaves form a doubly linked list for
//! sequential range scans.

use crate::bsearch;
use crate::btree::pair::Pair;
use crate::slotted::{Slotted, POINTER_SIZE};
use crate::{PageId, INVALID_PAGE_ID};

/// Size of the leaf header (prev and next page ids).
pub const LEAF_HEADER_SIZE: usize = 16;

/// View of a leaf node body.
pub struct Leaf<B> {
    body: B,
}

impl<B: AsRef<[u8]>> Leaf<B> {
    pub fn new(body: B) -> Self {
        assert!(body.as_ref().len() >= LEAF_HEADER_SIZE, "leaf header must fit");
        Self { body }
    }

    fn slotted(&self) -> Slotted<&[u8]> {
        Slotted::new(&self.body.as_ref()[LEAF_HEADER_SIZE..])
    }

    pub fn prev_page_id(&self) -> PageId {
        PageId::from_le_bytes(self.body.as_ref()[0..8].try_into().unwrap())
    }

    pub fn next_page_id(&self) -> PageId {
        PageId::from_le_bytes(self.body.as_ref()[8..16].try_into().unwrap())
    }

    pub fn num_pairs(&self) -> usize {
        self.slotted().num_slots()
    }

    /// Binary search for `key`. `Err` carries the insertion point; an empty
    /// leaf yields insertion point 0.
    pub fn search_slot_id(&self, key: &[u8]) -> Result<usize, usize> {
        bsearch::binary_search_by(self.num_pairs(), |slot_id| {
            self.pair_at(slot_id).key.as_slice().cmp(key)
        })
    }

    pub fn pair_at(&self, slot_id: usize) -> Pair {
        Pair::from_bytes(self.slotted().data(slot_id))
    }

    /// Largest serialized pair this leaf accepts. Sized so any node holds
    /// at least two maximum pairs, which keeps splitting productive.
    pub fn max_pair_size(&self) -> usize {
        self.slotted().capacity() / 2 - POINTER_SIZE
    }

    /// A leaf is half full once its free space drops below half of the
    /// region capacity; splits stop transferring at this point.
    pub fn is_half_full(&self) -> bool {
        2 * self.slotted().free_space() < self.slotted().capacity()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Leaf<B> {
    fn slotted_mut(&mut self) -> Slotted<&mut [u8]> {
        Slotted::new(&mut self.body.as_mut()[LEAF_HEADER_SIZE..])
    }

    pub fn initialize(&mut self) {
        self.set_prev_page_id(INVALID_PAGE_ID);
        self.set_next_page_id(INVALID_PAGE_ID);
        self.slotted_mut().initialize();
    }

    pub fn set_prev_page_id(&mut self, page_id: PageId) {
        self.body.as_mut()[0..8].copy_from_slice(&page_id.to_le_bytes());
    }

    pub fn set_next_page_id(&mut self, page_id: PageId) {
        self.body.as_mut()[8..16].copy_from_slice(&page_id.to_le_bytes());
    }

    /// Inserts a pair at `slot_id`. Returns false when the pair exceeds the
    /// maximum pair size or the leaf is out of space.
    pub fn insert(&mut self, slot_id: usize, key: &[u8], value: &[u8]) -> bool {
        let pair_bytes = Pair::encode(key, value);
        if pair_bytes.len() > self.max_pair_size() {
            return false;
        }
        if !self.slotted_mut().insert(slot_id, pair_bytes.len()) {
            return false;
        }
        self.slotted_mut().data_mut(slot_id).copy_from_slice(&pair_bytes);
        true
    }

    /// Replaces the value of the pair at `slot_id` in place, resizing the
    /// slot. Returns false when the new pair would not fit.
    pub fn update_at(&mut self, slot_id: usize, new_value: &[u8]) -> bool {
        let old_pair = self.pair_at(slot_id);
        let pair_bytes = Pair::encode(&old_pair.key, new_value);
        if pair_bytes.len() > self.max_pair_size() {
            return false;
        }
        if !self.slotted_mut().resize(slot_id, pair_bytes.len()) {
            return false;
        }
        self.slotted_mut().data_mut(slot_id).copy_from_slice(&pair_bytes);
        true
    }

    pub fn remove_at(&mut self, slot_id: usize) {
        self.slotted_mut().remove(slot_id);
    }

    /// Splits this (full) leaf into `new_leaf`, which takes pairs from the
    /// front until half full, then inserts the new pair on whichever side
    /// it belongs by key order. Returns the minimum key remaining in this
    /// leaf, to be promoted into the parent.
    pub fn split_insert<C>(&mut self, new_leaf: &mut Leaf<C>, new_key: &[u8], new_value: &[u8]) -> Vec<u8>
    where
        C: AsRef<[u8]> + AsMut<[u8]>,
    {
        new_leaf.initialize();
        loop {
            if new_leaf.is_half_full() {
                let slot_id = match self.search_slot_id(new_key) {
                    Ok(slot_id) | Err(slot_id) => slot_id,
                };
                assert!(
                    self.insert(slot_id, new_key, new_value),
                    "old leaf must have space"
                );
                break;
            }
            if self.pair_at(0).key.as_slice() < new_key {
                self.transfer_to(new_leaf);
            } else {
                assert!(
                    new_leaf.insert(new_leaf.num_pairs(), new_key, new_value),
                    "new leaf must have space"
                );
                while !new_leaf.is_half_full() {
                    self.transfer_to(new_leaf);
                }
                break;
            }
        }
        self.pair_at(0).key
    }

    /// Moves this leaf's first pair to the end of `dest`.
    pub fn transfer_to<C>(&mut self, dest: &mut Leaf<C>)
    where
        C: AsRef<[u8]> + AsMut<[u8]>,
    {
        let next_index = dest.num_pairs();
        let data = self.slotted().data(0).to_vec();
        assert!(
            dest.slotted_mut().insert(next_index, data.len()),
            "no space in destination leaf"
        );
        dest.slotted_mut().data_mut(next_index).copy_from_slice(&data);
        self.slotted_mut().remove(0);
    }
}
