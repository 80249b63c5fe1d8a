//! B+ tree index over slotted node pages.
//!
//! A tree is addressed by its meta page, which holds the current root page
//! id. Keys and values are arbitrary byte strings; callers who need
//! composite or typed keys encode them with [`crate::codec`] so byte order
//! matches logical order. Leaves are doubly linked for range iteration.

/// Branch (internal) node layout.
pub mod branch;
/// Leaf node layout.
pub mod leaf;
/// Meta page layout.
pub mod meta;
/// Node type tags and dispatch.
pub mod node;
/// Key-value slot records.
pub mod pair;

use crate::buffer_pool::{BufferPoolManager, PageGuard};
use crate::errors::{Error, Result};
use crate::{PageId, INVALID_PAGE_ID};

use branch::Branch;
use leaf::Leaf;
use meta::Meta;
use node::Node;
pub use pair::Pair;

/// How a search positions its iterator.
#[derive(Debug, Clone)]
pub enum SearchMode {
    /// Position at the first pair of the first leaf.
    Start,
    /// Position at the first pair whose key is >= the given key.
    Key(Vec<u8>),
}

/// Promotion record handed to the parent when a child splits.
struct Split {
    key: Vec<u8>,
    child_page_id: PageId,
}

/// Outcome of inspecting a node during a search descent.
enum Step {
    Leaf { slot_id: usize, is_rightmost: bool },
    Child(PageId),
}

/// A B+ tree handle: just the meta page id, cheap to copy and store.
#[derive(Debug, Clone, Copy)]
pub struct BTree {
    pub meta_page_id: PageId,
}

impl BTree {
    /// Allocates a meta page and an empty root leaf.
    pub fn create(bufmgr: &BufferPoolManager) -> Result<BTree> {
        let meta_guard = bufmgr.create_page()?;
        let root_guard = bufmgr.create_page()?;
        {
            let mut root_page = root_guard.write();
            let mut node = Node::new(&mut root_page[..]);
            node.initialize_as_leaf();
            let mut root_leaf = Leaf::new(node.body_mut());
            root_leaf.initialize();
        }
        {
            let mut meta_page = meta_guard.write();
            Meta::new(&mut meta_page[..]).set_root_page_id(root_guard.page_id());
        }
        Ok(BTree {
            meta_page_id: meta_guard.page_id(),
        })
    }

    /// Opens an existing tree by its meta page id.
    pub fn new(meta_page_id: PageId) -> BTree {
        BTree { meta_page_id }
    }

    fn root_page_id(&self, bufmgr: &BufferPoolManager) -> Result<PageId> {
        let meta_guard = bufmgr.acquire_page(self.meta_page_id)?;
        let meta_page = meta_guard.read();
        Ok(Meta::new(&meta_page[..]).root_page_id())
    }

    /// Returns an iterator positioned according to `search_mode`: at the
    /// very first pair, or at the first pair with key >= the search key.
    pub fn search(&self, bufmgr: &BufferPoolManager, search_mode: SearchMode) -> Result<Iter> {
        let root_page_id = self.root_page_id(bufmgr)?;
        let root_guard = bufmgr.acquire_page(root_page_id)?;
        Self::search_node(bufmgr, root_guard, &search_mode)
    }

    fn search_node(
        bufmgr: &BufferPoolManager,
        node_guard: PageGuard,
        search_mode: &SearchMode,
    ) -> Result<Iter> {
        let step = {
            let page = node_guard.read();
            let node = Node::new(&page[..]);
            if node.is_leaf() {
                let leaf = Leaf::new(node.body());
                let slot_id = match search_mode {
                    SearchMode::Start => 0,
                    SearchMode::Key(key) => match leaf.search_slot_id(key) {
                        Ok(slot_id) | Err(slot_id) => slot_id,
                    },
                };
                Step::Leaf {
                    slot_id,
                    is_rightmost: leaf.num_pairs() == slot_id,
                }
            } else if node.is_branch() {
                let branch = Branch::new(node.body());
                Step::Child(match search_mode {
                    SearchMode::Start => branch.child_at(0),
                    SearchMode::Key(key) => branch.search_child(key),
                })
            } else {
                panic!("unknown node type");
            }
        };

        match step {
            Step::Leaf { slot_id, is_rightmost } => {
                let mut iter = Iter {
                    guard: node_guard,
                    slot_id,
                };
                if is_rightmost {
                    iter.advance(bufmgr)?;
                }
                Ok(iter)
            }
            Step::Child(child_page_id) => {
                drop(node_guard);
                let child_guard = bufmgr.acquire_page(child_page_id)?;
                Self::search_node(bufmgr, child_guard, search_mode)
            }
        }
    }

    /// Inserts a new pair. Existing keys are not overwritten; inserting a
    /// present key fails with [`Error::DuplicateKey`].
    pub fn insert(&self, bufmgr: &BufferPoolManager, key: &[u8], value: &[u8]) -> Result<()> {
        let meta_guard = bufmgr.acquire_page(self.meta_page_id)?;
        let root_page_id = {
            let meta_page = meta_guard.read();
            Meta::new(&meta_page[..]).root_page_id()
        };
        let root_guard = bufmgr.acquire_page(root_page_id)?;
        let split = Self::insert_node(bufmgr, &root_guard, key, value)?;
        drop(root_guard);

        if let Some(split) = split {
            // The root itself split: a fresh root separates the new (left)
            // child from the old root by the promoted key.
            let new_root_guard = bufmgr.create_page()?;
            {
                let mut new_root_page = new_root_guard.write();
                let mut node = Node::new(&mut new_root_page[..]);
                node.initialize_as_branch();
                let mut new_root = Branch::new(node.body_mut());
                new_root.initialize(&split.key, split.child_page_id, root_page_id);
            }
            let mut meta_page = meta_guard.write();
            Meta::new(&mut meta_page[..]).set_root_page_id(new_root_guard.page_id());
        }
        Ok(())
    }

    fn insert_node(
        bufmgr: &BufferPoolManager,
        node_guard: &PageGuard,
        key: &[u8],
        value: &[u8],
    ) -> Result<Option<Split>> {
        match Self::descend_target(node_guard, key) {
            None => {
                let mut page = node_guard.write();
                let mut node = Node::new(&mut page[..]);
                let mut this_leaf = Leaf::new(node.body_mut());
                let slot_id = match this_leaf.search_slot_id(key) {
                    Ok(_) => return Err(Error::DuplicateKey),
                    Err(slot_id) => slot_id,
                };
                if this_leaf.insert(slot_id, key, value) {
                    return Ok(None);
                }

                // Overflow: splice a new leaf in to the left of this one,
                // so the promoted key stays the minimum of this leaf.
                let prev_leaf_page_id = this_leaf.prev_page_id();
                let new_leaf_guard = bufmgr.create_page()?;
                if prev_leaf_page_id != INVALID_PAGE_ID {
                    let prev_guard = bufmgr.acquire_page(prev_leaf_page_id)?;
                    let mut prev_page = prev_guard.write();
                    let mut prev_node = Node::new(&mut prev_page[..]);
                    let mut prev_leaf = Leaf::new(prev_node.body_mut());
                    prev_leaf.set_next_page_id(new_leaf_guard.page_id());
                }
                this_leaf.set_prev_page_id(new_leaf_guard.page_id());

                let mut new_page = new_leaf_guard.write();
                let mut new_node = Node::new(&mut new_page[..]);
                new_node.initialize_as_leaf();
                let mut new_leaf = Leaf::new(new_node.body_mut());
                let split_key = this_leaf.split_insert(&mut new_leaf, key, value);
                new_leaf.set_next_page_id(node_guard.page_id());
                if prev_leaf_page_id != INVALID_PAGE_ID {
                    new_leaf.set_prev_page_id(prev_leaf_page_id);
                }
                Ok(Some(Split {
                    key: split_key,
                    child_page_id: new_leaf_guard.page_id(),
                }))
            }
            Some((child_idx, child_page_id)) => {
                let child_guard = bufmgr.acquire_page(child_page_id)?;
                let split = Self::insert_node(bufmgr, &child_guard, key, value)?;
                drop(child_guard);
                let Some(split) = split else {
                    return Ok(None);
                };

                let mut page = node_guard.write();
                let mut node = Node::new(&mut page[..]);
                let mut this_branch = Branch::new(node.body_mut());
                if this_branch.insert(child_idx, &split.key, split.child_page_id) {
                    return Ok(None);
                }

                let new_branch_guard = bufmgr.create_page()?;
                let mut new_page = new_branch_guard.write();
                let mut new_node = Node::new(&mut new_page[..]);
                new_node.initialize_as_branch();
                let mut new_branch = Branch::new(new_node.body_mut());
                let split_key =
                    this_branch.split_insert(&mut new_branch, &split.key, split.child_page_id);
                Ok(Some(Split {
                    key: split_key,
                    child_page_id: new_branch_guard.page_id(),
                }))
            }
        }
    }

    /// Replaces the value for an existing key in place. Fails with
    /// [`Error::KeyNotFound`] when the key is absent or the leaf cannot
    /// accommodate the new value.
    pub fn update(&self, bufmgr: &BufferPoolManager, key: &[u8], new_value: &[u8]) -> Result<()> {
        let root_page_id = self.root_page_id(bufmgr)?;
        let root_guard = bufmgr.acquire_page(root_page_id)?;
        Self::update_node(bufmgr, &root_guard, key, new_value)
    }

    fn update_node(
        bufmgr: &BufferPoolManager,
        node_guard: &PageGuard,
        key: &[u8],
        new_value: &[u8],
    ) -> Result<()> {
        match Self::descend_target(node_guard, key) {
            None => {
                let mut page = node_guard.write();
                let mut node = Node::new(&mut page[..]);
                let mut this_leaf = Leaf::new(node.body_mut());
                let slot_id = this_leaf.search_slot_id(key).map_err(|_| Error::KeyNotFound)?;
                if this_leaf.update_at(slot_id, new_value) {
                    Ok(())
                } else {
                    Err(Error::KeyNotFound)
                }
            }
            Some((_, child_page_id)) => {
                let child_guard = bufmgr.acquire_page(child_page_id)?;
                Self::update_node(bufmgr, &child_guard, key, new_value)
            }
        }
    }

    /// Removes a pair by key. Underfull leaves are never merged; the tree
    /// may become sparse under delete-heavy workloads, but search and
    /// iteration stay correct.
    pub fn delete(&self, bufmgr: &BufferPoolManager, key: &[u8]) -> Result<()> {
        let root_page_id = self.root_page_id(bufmgr)?;
        let root_guard = bufmgr.acquire_page(root_page_id)?;
        Self::delete_node(bufmgr, &root_guard, key)
    }

    fn delete_node(bufmgr: &BufferPoolManager, node_guard: &PageGuard, key: &[u8]) -> Result<()> {
        match Self::descend_target(node_guard, key) {
            None => {
                let mut page = node_guard.write();
                let mut node = Node::new(&mut page[..]);
                let mut this_leaf = Leaf::new(node.body_mut());
                let slot_id = this_leaf.search_slot_id(key).map_err(|_| Error::KeyNotFound)?;
                this_leaf.remove_at(slot_id);
                Ok(())
            }
            Some((_, child_page_id)) => {
                let child_guard = bufmgr.acquire_page(child_page_id)?;
                Self::delete_node(bufmgr, &child_guard, key)
            }
        }
    }

    /// For a branch node, the index and page id of the child to descend
    /// into for `key`; `None` when the node is a leaf. Takes only a read
    /// guard, so pure descent never dirties interior pages.
    fn descend_target(node_guard: &PageGuard, key: &[u8]) -> Option<(usize, PageId)> {
        let page = node_guard.read();
        let node = Node::new(&page[..]);
        if node.is_leaf() {
            None
        } else if node.is_branch() {
            let branch = Branch::new(node.body());
            let child_idx = branch.search_child_idx(key);
            Some((child_idx, branch.child_at(child_idx)))
        } else {
            panic!("unknown node type");
        }
    }
}

/// Iterator over leaf pairs in ascending key order, following the leaf
/// chain across pages.
pub struct Iter {
    guard: PageGuard,
    slot_id: usize,
}

impl Iter {
    /// The pair at the current position, defensively copied, or `None`
    /// when the iterator is exhausted.
    pub fn get(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        let page = self.guard.read();
        let node = Node::new(&page[..]);
        if !node.is_leaf() {
            return None;
        }
        let this_leaf = Leaf::new(node.body());
        if self.slot_id < this_leaf.num_pairs() {
            let pair = this_leaf.pair_at(self.slot_id);
            Some((pair.key, pair.value))
        } else {
            None
        }
    }

    /// Moves to the next slot, hopping to the next leaf when the current
    /// one is exhausted. At the end of the last leaf the iterator parks
    /// past the end and `get` returns `None`.
    pub fn advance(&mut self, bufmgr: &BufferPoolManager) -> Result<()> {
        self.slot_id += 1;
        let next_page_id = {
            let page = self.guard.read();
            let node = Node::new(&page[..]);
            if !node.is_leaf() {
                return Ok(());
            }
            let this_leaf = Leaf::new(node.body());
            if self.slot_id < this_leaf.num_pairs() {
                return Ok(());
            }
            this_leaf.next_page_id()
        };
        if next_page_id != INVALID_PAGE_ID {
            self.guard = bufmgr.acquire_page(next_page_id)?;
            self.slot_id = 0;
        }
        Ok(())
    }

    /// Returns the current pair and advances.
    pub fn next(&mut self, bufmgr: &BufferPoolManager) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let pair = self.get();
        self.advance(bufmgr)?;
        Ok(pair)
    }
}
