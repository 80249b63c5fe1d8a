//! Tables over B+ trees.
//!
//! A table stores whole records in one B+ tree: the first `num_key_elems`
//! elements form the primary key, the rest the value, both tuple-encoded
//! so records iterate in primary-key order. A `Table` additionally
//! maintains unique secondary indexes, each its own B+ tree mapping a
//! secondary key to the encoded primary key.

use crate::btree::{BTree, SearchMode};
use crate::buffer_pool::BufferPoolManager;
use crate::codec::tuple;
use crate::errors::{Error, Result};
use crate::PageId;

/// A table without secondary indexes.
#[derive(Debug, Clone)]
pub struct SimpleTable {
    pub meta_page_id: PageId,
    pub num_key_elems: usize,
}

impl SimpleTable {
    pub fn create(&mut self, bufmgr: &BufferPoolManager) -> Result<()> {
        let btree = BTree::create(bufmgr)?;
        self.meta_page_id = btree.meta_page_id;
        Ok(())
    }

    pub fn insert<T: AsRef<[u8]>>(&self, bufmgr: &BufferPoolManager, record: &[T]) -> Result<()> {
        let btree = BTree::new(self.meta_page_id);
        let mut key_bytes = Vec::new();
        tuple::encode(&record[..self.num_key_elems], &mut key_bytes);
        let mut value_bytes = Vec::new();
        tuple::encode(&record[self.num_key_elems..], &mut value_bytes);
        btree.insert(bufmgr, &key_bytes, &value_bytes)
    }

    pub fn update<T: AsRef<[u8]>>(&self, bufmgr: &BufferPoolManager, record: &[T]) -> Result<()> {
        let btree = BTree::new(self.meta_page_id);
        let mut key_bytes = Vec::new();
        tuple::encode(&record[..self.num_key_elems], &mut key_bytes);
        let mut value_bytes = Vec::new();
        tuple::encode(&record[self.num_key_elems..], &mut value_bytes);
        btree.update(bufmgr, &key_bytes, &value_bytes)
    }

    pub fn delete<T: AsRef<[u8]>>(&self, bufmgr: &BufferPoolManager, key: &[T]) -> Result<()> {
        let btree = BTree::new(self.meta_page_id);
        let mut key_bytes = Vec::new();
        tuple::encode(&key[..self.num_key_elems], &mut key_bytes);
        btree.delete(bufmgr, &key_bytes)
    }
}

/// A unique secondary index: maps the chosen record elements to the
/// encoded primary key.
#[derive(Debug, Clone)]
pub struct UniqueIndex {
    pub meta_page_id: PageId,
    /// Indices of the record elements forming the secondary key.
    pub skey: Vec<usize>,
}

impl UniqueIndex {
    pub fn create(&mut self, bufmgr: &BufferPoolManager) -> Result<()> {
        let btree = BTree::create(bufmgr)?;
        self.meta_page_id = btree.meta_page_id;
        Ok(())
    }

    pub fn insert<T: AsRef<[u8]>>(
        &self,
        bufmgr: &BufferPoolManager,
        pkey: &[u8],
        record: &[T],
    ) -> Result<()> {
        let btree = BTree::new(self.meta_page_id);
        let skey_elems: Vec<&[u8]> = self.skey.iter().map(|&i| record[i].as_ref()).collect();
        let mut skey_bytes = Vec::new();
        tuple::encode(&skey_elems, &mut skey_bytes);
        btree.insert(bufmgr, &skey_bytes, pkey)
    }

    pub fn delete<T: AsRef<[u8]>>(&self, bufmgr: &BufferPoolManager, record: &[T]) -> Result<()> {
        let btree = BTree::new(self.meta_page_id);
        let skey_elems: Vec<&[u8]> = self.skey.iter().map(|&i| record[i].as_ref()).collect();
        let mut skey_bytes = Vec::new();
        tuple::encode(&skey_elems, &mut skey_bytes);
        btree.delete(bufmgr, &skey_bytes)
    }
}

/// A table with unique secondary indexes kept in lockstep with the
/// primary tree.
#[derive(Debug, Clone)]
pub struct Table {
    pub meta_page_id: PageId,
    pub num_key_elems: usize,
    pub unique_indexes: Vec<UniqueIndex>,
}

impl Table {
    pub fn create(&mut self, bufmgr: &BufferPoolManager) -> Result<()> {
        let btree = BTree::create(bufmgr)?;
        self.meta_page_id = btree.meta_page_id;
        for unique_index in &mut self.unique_indexes {
            unique_index.create(bufmgr)?;
        }
        Ok(())
    }

    pub fn insert<T: AsRef<[u8]>>(&self, bufmgr: &BufferPoolManager, record: &[T]) -> Result<()> {
        let btree = BTree::new(self.meta_page_id);
        let mut key_bytes = Vec::new();
        tuple::encode(&record[..self.num_key_elems], &mut key_bytes);
        let mut value_bytes = Vec::new();
        tuple::encode(&record[self.num_key_elems..], &mut value_bytes);
        btree.insert(bufmgr, &key_bytes, &value_bytes)?;
        for unique_index in &self.unique_indexes {
            unique_index.insert(bufmgr, &key_bytes, record)?;
        }
        Ok(())
    }

    pub fn update<T: AsRef<[u8]>>(&self, bufmgr: &BufferPoolManager, record: &[T]) -> Result<()> {
        let btree = BTree::new(self.meta_page_id);
        let mut key_bytes = Vec::new();
        tuple::encode(&record[..self.num_key_elems], &mut key_bytes);
        let mut value_bytes = Vec::new();
        tuple::encode(&record[self.num_key_elems..], &mut value_bytes);
        btree.update(bufmgr, &key_bytes, &value_bytes)
    }

    /// Deletes a record by primary key, removing its secondary index
    /// entries first. The stored record is fetched to reconstruct the
    /// secondary keys.
    pub fn delete<T: AsRef<[u8]>>(&self, bufmgr: &BufferPoolManager, key: &[T]) -> Result<()> {
        let btree = BTree::new(self.meta_page_id);
        let mut key_bytes = Vec::new();
        tuple::encode(&key[..self.num_key_elems], &mut key_bytes);

        let iter = btree.search(bufmgr, SearchMode::Key(key_bytes.clone()))?;
        let Some((found_key, value_bytes)) = iter.get() else {
            return Err(Error::KeyNotFound);
        };
        if found_key != key_bytes {
            return Err(Error::KeyNotFound);
        }

        let mut record = Vec::new();
        tuple::decode(&key_bytes, &mut record);
        tuple::decode(&value_bytes, &mut record);

        for unique_index in &self.unique_indexes {
            match unique_index.delete(bufmgr, &record) {
                // An entry already gone is not an error here.
                Err(Error::KeyNotFound) | Ok(()) => {}
                Err(e) => return Err(e),
            }
        }
        btree.delete(bufmgr, &key_bytes)
    }
}
