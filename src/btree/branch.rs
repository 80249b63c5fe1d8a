//! Branch (internal) nodes of the B+ tree.
//!
//! A branch body is an 8-byte header holding the rightmost child page id,
//! followed by a slotted region of pairs whose keys are the upper bounds
//! of their child subtrees. A key stored in slot `i` is greater than every
//! key under `child_at(i)`; `right_child` covers keys at or above the last
//! stored key.

use crate::bsearch;
use crate::btree::pair::Pair;
use crate::slotted::{Slotted, POINTER_SIZE};
use crate::PageId;

/// Size of the branch header (the rightmost child page id).
pub const BRANCH_HEADER_SIZE: usize = 8;

/// View of a branch node body.
pub struct Branch<B> {
    body: B,
}

impl<B: AsRef<[u8]>> Branch<B> {
    pub fn new(body: B) -> Self {
        assert!(body.as_ref().len() >= BRANCH_HEADER_SIZE, "branch header must fit");
        Self { body }
    }

    fn slotted(&self) -> Slotted<&[u8]> {
        Slotted::new(&self.body.as_ref()[BRANCH_HEADER_SIZE..])
    }

    pub fn right_child(&self) -> PageId {
        PageId::from_le_bytes(self.body.as_ref()[0..8].try_into().unwrap())
    }

    pub fn num_pairs(&self) -> usize {
        self.slotted().num_slots()
    }

    pub fn search_slot_id(&self, key: &[u8]) -> Result<usize, usize> {
        bsearch::binary_search_by(self.num_pairs(), |slot_id| {
            self.pair_at(slot_id).key.as_slice().cmp(key)
        })
    }

    /// Index of the child to descend into for `key`. An exact key match
    /// goes one child to the right, since stored keys are upper bounds of
    /// their left children.
    pub fn search_child_idx(&self, key: &[u8]) -> usize {
        match self.search_slot_id(key) {
            Ok(slot_id) => slot_id + 1,
            Err(slot_id) => slot_id,
        }
    }

    pub fn search_child(&self, key: &[u8]) -> PageId {
        self.child_at(self.search_child_idx(key))
    }

    pub fn child_at(&self, child_idx: usize) -> PageId {
        if child_idx == self.num_pairs() {
            self.right_child()
        } else {
            PageId::from_le_bytes(self.pair_at(child_idx).value.as_slice().try_into().unwrap())
        }
    }

    pub fn pair_at(&self, slot_id: usize) -> Pair {
        Pair::from_bytes(self.slotted().data(slot_id))
    }

    pub fn max_pair_size(&self) -> usize {
        self.slotted().capacity() / 2 - POINTER_SIZE
    }

    pub fn is_half_full(&self) -> bool {
        2 * self.slotted().free_space() < self.slotted().capacity()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Branch<B> {
    fn slotted_mut(&mut self) -> Slotted<&mut [u8]> {
        Slotted::new(&mut self.body.as_mut()[BRANCH_HEADER_SIZE..])
    }

    /// Sets up a fresh branch with a single key separating two children.
    pub fn initialize(&mut self, key: &[u8], left_child: PageId, right_child: PageId) {
        self.slotted_mut().initialize();
        assert!(self.insert(0, key, left_child), "initial pair must fit");
        self.set_right_child(right_child);
    }

    pub fn set_right_child(&mut self, page_id: PageId) {
        self.body.as_mut()[0..8].copy_from_slice(&page_id.to_le_bytes());
    }

    pub fn insert(&mut self, slot_id: usize, key: &[u8], page_id: PageId) -> bool {
        let pair_bytes = Pair::encode(key, &page_id.to_le_bytes());
        if pair_bytes.len() > self.max_pair_size() {
            return false;
        }
        if !self.slotted_mut().insert(slot_id, pair_bytes.len()) {
            return false;
        }
        self.slotted_mut().data_mut(slot_id).copy_from_slice(&pair_bytes);
        true
    }

    /// Splits this (full) branch into `new_branch` and inserts the pair.
    /// The new branch absorbs pairs from the front, then pops its last pair
    /// into its right-child pointer; that pair's key is returned for
    /// promotion into the parent.
    pub fn split_insert<C>(&mut self, new_branch: &mut Branch<C>, new_key: &[u8], new_page_id: PageId) -> Vec<u8>
    where
        C: AsRef<[u8]> + AsMut<[u8]>,
    {
        new_branch.slotted_mut().initialize();
        loop {
            if new_branch.is_half_full() {
                let slot_id = match self.search_slot_id(new_key) {
                    Ok(slot_id) | Err(slot_id) => slot_id,
                };
                assert!(
                    self.insert(slot_id, new_key, new_page_id),
                    "old branch must have space"
                );
                break;
            }
            if self.pair_at(0).key.as_slice() < new_key {
                self.transfer_to(new_branch);
            } else {
                assert!(
                    new_branch.insert(new_branch.num_pairs(), new_key, new_page_id),
                    "new branch must have space"
                );
                while !new_branch.is_half_full() {
                    self.transfer_to(new_branch);
                }
                break;
            }
        }
        new_branch.fill_right_child()
    }

    /// Moves this branch's first pair to the end of `dest`.
    pub fn transfer_to<C>(&mut self, dest: &mut Branch<C>)
    where
        C: AsRef<[u8]> + AsMut<[u8]>,
    {
        let next_index = dest.num_pairs();
        let data = self.slotted().data(0).to_vec();
        assert!(
            dest.slotted_mut().insert(next_index, data.len()),
            "no space in destination branch"
        );
        dest.slotted_mut().data_mut(next_index).copy_from_slice(&data);
        self.slotted_mut().remove(0);
    }

    /// Pops the last pair, making its child the right-child pointer, and
    /// returns its key.
    pub fn fill_right_child(&mut self) -> Vec<u8> {
        let last_id = self.num_pairs() - 1;
        let Pair { key, value } = self.pair_at(last_id);
        let right_child = PageId::from_le_bytes(value.as_slice().try_into().unwrap());
        self.slotted_mut().remove(last_id);
        self.set_right_child(right_child);
        key
    }
}
