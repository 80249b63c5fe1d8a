//! Manages the buffer pool, a fixed array of in-memory frames that cache
//! disk pages, with Clock replacement over per-frame usage counts.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::errors::{Error, Result};
use crate::pager::Pager;
use crate::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Debug)]
struct FrameMeta {
    page_id: PageId,
    is_dirty: bool,
    /// Clock weight: bumped on every fetch, decayed by the victim sweep.
    usage_count: u64,
    /// Number of live guards. Pinned frames are never evicted.
    pin_count: u32,
}

struct Frame {
    page: RwLock<Page>,
    meta: Mutex<FrameMeta>,
}

/// The buffer pool manager.
///
/// All page reads and writes go through here. Frames are constructed once
/// at pool creation and reused via eviction; pages are persisted lazily
/// when their frame is evicted or on an explicit [`flush`](Self::flush).
pub struct BufferPoolManager {
    pager: Mutex<Pager>,
    frames: Vec<Arc<Frame>>,
    page_table: RwLock<HashMap<PageId, usize>>,
    next_victim: Mutex<usize>,
}

/// An RAII guard for a cached page. Holding the guard pins the frame;
/// `write()` marks the page dirty.
pub struct PageGuard {
    page_id: PageId,
    frame: Arc<Frame>,
}

impl PageGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.frame.page.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        // Page latch first, then the dirty flag: flush orders its locks
        // the same way, so a write racing a flush is either written back
        // or left dirty, never silently clean.
        let page = self.frame.page.write();
        self.frame.meta.lock().is_dirty = true;
        page
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let mut meta = self.frame.meta.lock();
        if meta.pin_count > 0 {
            meta.pin_count -= 1;
        }
    }
}

impl BufferPoolManager {
    pub fn new(pager: Pager, pool_size: usize) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            frames.push(Arc::new(Frame {
                page: RwLock::new([0; PAGE_SIZE]),
                meta: Mutex::new(FrameMeta {
                    page_id: INVALID_PAGE_ID,
                    is_dirty: false,
                    usage_count: 0,
                    pin_count: 0,
                }),
            }));
        }
        Self {
            pager: Mutex::new(pager),
            frames,
            page_table: RwLock::new(HashMap::new()),
            next_victim: Mutex::new(0),
        }
    }

    /// Fetches the page into the pool (or finds it there) and returns a
    /// pinned guard for it.
    pub fn acquire_page(&self, page_id: PageId) -> Result<PageGuard> {
        // 1. Serve hits from the page table; the pin happens under the
        //    table lock so the frame cannot be remapped in between.
        {
            let page_table = self.page_table.read();
            if let Some(guard) = self.pin_mapped(&page_table, page_id) {
                return Ok(guard);
            }
        }

        let mut page_table = self.page_table.write();
        // 2. Re-check: another thread may have loaded the page while we
        //    waited for the write lock.
        if let Some(guard) = self.pin_mapped(&page_table, page_id) {
            return Ok(guard);
        }

        // 3. Evict a victim and write its page back if dirty.
        let frame_index = self.find_victim()?;
        let frame = self.frames[frame_index].clone();
        self.write_back_and_unmap(&frame, &mut page_table)?;

        // 4. Read the requested page; past-EOF means the page was
        //    allocated but never written, so it reads as zeroes.
        {
            let mut page = frame.page.write();
            match self.pager.lock().read_page(page_id, &mut page) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    crate::stratum_debug_log!(
                        "[BufferPoolManager::acquire_page] Page {page_id} is fresh, zero-filling"
                    );
                    page.fill(0);
                }
                Err(e) => return Err(e.into()),
            }
        }

        // 5. Publish the new mapping.
        {
            let mut meta = frame.meta.lock();
            meta.page_id = page_id;
            meta.is_dirty = false;
            meta.usage_count = 1;
            meta.pin_count = 1;
        }
        page_table.insert(page_id, frame_index);
        Ok(PageGuard { page_id, frame })
    }

    /// Allocates a new page and returns a pinned guard over its zeroed
    /// contents. The dirty flag is left clear; the first `write()` sets it.
    pub fn create_page(&self) -> Result<PageGuard> {
        let mut page_table = self.page_table.write();

        let frame_index = self.find_victim()?;
        let frame = self.frames[frame_index].clone();
        self.write_back_and_unmap(&frame, &mut page_table)?;

        let page_id = self.pager.lock().allocate_page();
        frame.page.write().fill(0);
        {
            let mut meta = frame.meta.lock();
            meta.page_id = page_id;
            meta.is_dirty = false;
            meta.usage_count = 1;
            meta.pin_count = 1;
        }
        page_table.insert(page_id, frame_index);
        crate::stratum_debug_log!("[BufferPoolManager::create_page] Created page {page_id}");
        Ok(PageGuard { page_id, frame })
    }

    /// Writes every dirty mapped page back, clears the flags, and syncs
    /// the heap file.
    pub fn flush(&self) -> Result<()> {
        let page_table = self.page_table.read();
        for (&page_id, &frame_index) in page_table.iter() {
            let frame = &self.frames[frame_index];
            let page = frame.page.read();
            let mut meta = frame.meta.lock();
            if meta.is_dirty {
                self.pager.lock().write_page(page_id, &page)?;
                meta.is_dirty = false;
            }
        }
        self.pager.lock().sync()?;
        Ok(())
    }

    fn pin_mapped(&self, page_table: &HashMap<PageId, usize>, page_id: PageId) -> Option<PageGuard> {
        let &frame_index = page_table.get(&page_id)?;
        let frame = self.frames[frame_index].clone();
        {
            let mut meta = frame.meta.lock();
            meta.usage_count += 1;
            meta.pin_count += 1;
        }
        Some(PageGuard { page_id, frame })
    }

    /// Clock sweep. A frame with a zero usage count is the victim; live
    /// counts decay by one per visit. Fails only when a full pass finds
    /// every frame pinned.
    fn find_victim(&self) -> Result<usize> {
        let frame_count = self.frames.len();
        if frame_count == 0 {
            return Err(Error::NoFreeBuffer);
        }

        let mut next_victim = self.next_victim.lock();
        let mut consecutive_pinned = 0;
        loop {
            let frame_index = *next_victim;
            *next_victim = (frame_index + 1) % frame_count;

            let mut meta = self.frames[frame_index].meta.lock();
            if meta.pin_count > 0 {
                consecutive_pinned += 1;
                if consecutive_pinned >= frame_count {
                    return Err(Error::NoFreeBuffer);
                }
            } else if meta.usage_count == 0 {
                return Ok(frame_index);
            } else {
                meta.usage_count -= 1;
                consecutive_pinned = 0;
            }
        }
    }

    fn write_back_and_unmap(
        &self,
        frame: &Arc<Frame>,
        page_table: &mut HashMap<PageId, usize>,
    ) -> Result<()> {
        let (old_page_id, is_dirty) = {
            let meta = frame.meta.lock();
            (meta.page_id, meta.is_dirty)
        };
        if old_page_id == INVALID_PAGE_ID {
            return Ok(());
        }

        if is_dirty {
            crate::stratum_debug_log!(
                "[BufferPoolManager] Writing back dirty page {old_page_id} before eviction"
            );
            let page = frame.page.read();
            self.pager.lock().write_page(old_page_id, &page)?;
        }
        page_table.remove(&old_page_id);
        let mut meta = frame.meta.lock();
        meta.page_id = INVALID_PAGE_ID;
        meta.is_dirty = false;
        Ok(())
    }
}
