//! Query execution plans over tables and indexes.
//!
//! Plans form a tree of [`PlanNode`]s; `start` compiles a node into an
//! [`Executor`] that yields decoded records one at a time, pulled from the
//! B+ tree iterator underneath. Scans take a starting point plus a
//! `while_cond` over the key that bounds the range; `Filter` and `Project`
//! reshape the stream.

use crate::btree::{BTree, SearchMode};
use crate::buffer_pool::BufferPoolManager;
use crate::codec::tuple;
use crate::errors::Result;
use crate::PageId;

/// A decoded record: one byte string per element.
pub type TupleRecord = Vec<Vec<u8>>;

/// Predicate over a decoded key or record.
pub type TupleCond = dyn Fn(&[Vec<u8>]) -> bool;

/// Where a scan starts: the first record, or the first key >= a tuple key.
#[derive(Debug, Clone)]
pub enum TupleSearchMode {
    Start,
    Key(Vec<Vec<u8>>),
}

impl TupleSearchMode {
    fn encode(&self) -> SearchMode {
        match self {
            TupleSearchMode::Start => SearchMode::Start,
            TupleSearchMode::Key(key) => {
                let mut key_bytes = Vec::new();
                tuple::encode(key, &mut key_bytes);
                SearchMode::Key(key_bytes)
            }
        }
    }
}

/// Produces records one at a time. `None` marks the end of the stream.
pub trait Executor {
    fn next(&mut self, bufmgr: &BufferPoolManager) -> Result<Option<TupleRecord>>;
}

/// A node of a query plan, compiled into an executor by `start`.
pub trait PlanNode {
    fn start<'a>(&'a self, bufmgr: &BufferPoolManager) -> Result<Box<dyn Executor + 'a>>;
}

/// Sequential scan of a table in primary-key order, while `while_cond`
/// holds over the decoded primary key.
pub struct SeqScan {
    pub table_meta_page_id: PageId,
    pub search_mode: TupleSearchMode,
    pub while_cond: Box<TupleCond>,
}

impl PlanNode for SeqScan {
    fn start<'a>(&'a self, bufmgr: &BufferPoolManager) -> Result<Box<dyn Executor + 'a>> {
        let btree = BTree::new(self.table_meta_page_id);
        let table_iter = btree.search(bufmgr, self.search_mode.encode())?;
        Ok(Box::new(ExecSeqScan {
            table_iter,
            while_cond: &*self.while_cond,
        }))
    }
}

struct ExecSeqScan<'a> {
    table_iter: crate::btree::Iter,
    while_cond: &'a TupleCond,
}

impl Executor for ExecSeqScan<'_> {
    fn next(&mut self, bufmgr: &BufferPoolManager) -> Result<Option<TupleRecord>> {
        let Some((pkey_bytes, value_bytes)) = self.table_iter.next(bufmgr)? else {
            return Ok(None);
        };
        let mut pkey = Vec::new();
        tuple::decode(&pkey_bytes, &mut pkey);
        if !(self.while_cond)(&pkey) {
            return Ok(None);
        }
        let mut record = pkey;
        tuple::decode(&value_bytes, &mut record);
        Ok(Some(record))
    }
}

/// Keeps only records matching `cond`.
pub struct Filter {
    pub inner_plan: Box<dyn PlanNode>,
    pub cond: Box<TupleCond>,
}

impl PlanNode for Filter {
    fn start<'a>(&'a self, bufmgr: &BufferPoolManager) -> Result<Box<dyn Executor + 'a>> {
        let inner_iter = self.inner_plan.start(bufmgr)?;
        Ok(Box::new(ExecFilter {
            inner_iter,
            cond: &*self.cond,
        }))
    }
}

struct ExecFilter<'a> {
    inner_iter: Box<dyn Executor + 'a>,
    cond: &'a TupleCond,
}

impl Executor for ExecFilter<'_> {
    fn next(&mut self, bufmgr: &BufferPoolManager) -> Result<Option<TupleRecord>> {
        loop {
            let Some(record) = self.inner_iter.next(bufmgr)? else {
                return Ok(None);
            };
            if (self.cond)(&record) {
                return Ok(Some(record));
            }
        }
    }
}

/// Scan of a unique secondary index, chasing each hit back into the table
/// to produce the full record.
pub struct IndexScan {
    pub table_meta_page_id: PageId,
    pub index_meta_page_id: PageId,
    pub search_mode: TupleSearchMode,
    pub while_cond: Box<TupleCond>,
}

impl PlanNode for IndexScan {
    fn start<'a>(&'a self, bufmgr: &BufferPoolManager) -> Result<Box<dyn Executor + 'a>> {
        let index = BTree::new(self.index_meta_page_id);
        let index_iter = index.search(bufmgr, self.search_mode.encode())?;
        Ok(Box::new(ExecIndexScan {
            table_btree: BTree::new(self.table_meta_page_id),
            index_iter,
            while_cond: &*self.while_cond,
        }))
    }
}

struct ExecIndexScan<'a> {
    table_btree: BTree,
    index_iter: crate::btree::Iter,
    while_cond: &'a TupleCond,
}

impl Executor for ExecIndexScan<'_> {
    fn next(&mut self, bufmgr: &BufferPoolManager) -> Result<Option<TupleRecord>> {
        let Some((skey_bytes, pkey_bytes)) = self.index_iter.next(bufmgr)? else {
            return Ok(None);
        };
        let mut skey = Vec::new();
        tuple::decode(&skey_bytes, &mut skey);
        if !(self.while_cond)(&skey) {
            return Ok(None);
        }

        let mut table_iter = self
            .table_btree
            .search(bufmgr, SearchMode::Key(pkey_bytes.clone()))?;
        let Some((_, value_bytes)) = table_iter.next(bufmgr)? else {
            return Ok(None);
        };
        let mut record = Vec::new();
        tuple::decode(&pkey_bytes, &mut record);
        tuple::decode(&value_bytes, &mut record);
        Ok(Some(record))
    }
}

/// Scan answered from the index alone: yields secondary key elements
/// followed by primary key elements, no table access.
pub struct IndexOnlyScan {
    pub index_meta_page_id: PageId,
    pub search_mode: TupleSearchMode,
    pub while_cond: Box<TupleCond>,
}

impl PlanNode for IndexOnlyScan {
    fn start<'a>(&'a self, bufmgr: &BufferPoolManager) -> Result<Box<dyn Executor + 'a>> {
        let index = BTree::new(self.index_meta_page_id);
        let index_iter = index.search(bufmgr, self.search_mode.encode())?;
        Ok(Box::new(ExecIndexOnlyScan {
            index_iter,
            while_cond: &*self.while_cond,
        }))
    }
}

struct ExecIndexOnlyScan<'a> {
    index_iter: crate::btree::Iter,
    while_cond: &'a TupleCond,
}

impl Executor for ExecIndexOnlyScan<'_> {
    fn next(&mut self, bufmgr: &BufferPoolManager) -> Result<Option<TupleRecord>> {
        let Some((skey_bytes, pkey_bytes)) = self.index_iter.next(bufmgr)? else {
            return Ok(None);
        };
        let mut skey = Vec::new();
        tuple::decode(&skey_bytes, &mut skey);
        if !(self.while_cond)(&skey) {
            return Ok(None);
        }
        let mut record = skey;
        tuple::decode(&pkey_bytes, &mut record);
        Ok(Some(record))
    }
}

/// Projects each record onto the chosen element indices. Out-of-range
/// indices project to empty elements.
pub struct Project {
    pub inner_plan: Box<dyn PlanNode>,
    pub column_indices: Vec<usize>,
}

impl PlanNode for Project {
    fn start<'a>(&'a self, bufmgr: &BufferPoolManager) -> Result<Box<dyn Executor + 'a>> {
        let inner_iter = self.inner_plan.start(bufmgr)?;
        Ok(Box::new(ExecProject {
            inner_iter,
            column_indices: self.column_indices.as_slice(),
        }))
    }
}

struct ExecProject<'a> {
    inner_iter: Box<dyn Executor + 'a>,
    column_indices: &'a [usize],
}

impl Executor for ExecProject<'_> {
    fn next(&mut self, bufmgr: &BufferPoolManager) -> Result<Option<TupleRecord>> {
        let Some(record) = self.inner_iter.next(bufmgr)? else {
            return Ok(None);
        };
        let projected = self
            .column_indices
            .iter()
            .map(|&i| record.get(i).cloned().unwrap_or_default())
            .collect();
        Ok(Some(projected))
    }
}
