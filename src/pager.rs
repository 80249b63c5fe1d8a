use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::{Page, PageId, PAGE_SIZE};

/// Translates page ids to file offsets and performs whole-page I/O on the
/// heap file. The heap file is a pure sequence of 4096-byte pages with no
/// header or magic; `next_page_id` is recovered from the file size on open.
pub struct Pager {
    heap_file: File,
    next_page_id: PageId,
}

impl Pager {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path_ref = path.as_ref();
        crate::stratum_debug_log!("[Pager::open] Opening heap file at: {path_ref:?}");
        if let Some(parent) = path_ref.parent() {
            create_dir_all(parent)?;
        }
        let heap_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path_ref)?;

        let file_size = heap_file.metadata()?.len();
        let next_page_id = file_size / PAGE_SIZE as u64;
        crate::stratum_debug_log!(
            "[Pager::open] File size: {file_size}, next_page_id: {next_page_id}"
        );

        Ok(Self {
            heap_file,
            next_page_id,
        })
    }

    /// Reads the page into `data`. Reading past the end of the file fails
    /// with `UnexpectedEof`; the buffer pool treats exactly that failure as
    /// an allocated-but-never-written page.
    pub fn read_page(&mut self, page_id: PageId, data: &mut Page) -> io::Result<()> {
        crate::stratum_debug_log!("[Pager::read_page] Reading page_id: {page_id}");
        let offset = page_id * PAGE_SIZE as u64;
        self.heap_file.seek(SeekFrom::Start(offset))?;
        self.heap_file.read_exact(data)
    }

    /// Writes the page, extending the file when writing past its end.
    pub fn write_page(&mut self, page_id: PageId, data: &Page) -> io::Result<()> {
        crate::stratum_debug_log!("[Pager::write_page] Writing page_id: {page_id}");
        let offset = page_id * PAGE_SIZE as u64;
        self.heap_file.seek(SeekFrom::Start(offset))?;
        self.heap_file.write_all(data)
    }

    /// Returns a fresh page id. The counter is not persisted; it is
    /// recomputed from the file size on the next open.
    pub fn allocate_page(&mut self) -> PageId {
        let page_id = self.next_page_id;
        self.next_page_id += 1;
        crate::stratum_debug_log!("[Pager::allocate_page] Allocated page_id: {page_id}");
        page_id
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.heap_file.sync_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;
    use tempfile::tempdir;

    fn page_with_prefix(prefix: &[u8]) -> Page {
        let mut page = [0u8; PAGE_SIZE];
        page[..prefix.len()].copy_from_slice(prefix);
        page
    }

    #[test]
    fn test_two_page_round_trip() {
        let temp_dir = tempdir().unwrap();
        let temp_path = temp_dir.path().join("test.db");

        let mut pager = Pager::open(&temp_path).unwrap();

        let p1 = pager.allocate_page();
        assert_eq!(p1, 0);
        pager.write_page(p1, &page_with_prefix(b"hello")).unwrap();

        let p2 = pager.allocate_page();
        assert_eq!(p2, 1);
        pager.write_page(p2, &page_with_prefix(b"world")).unwrap();
        pager.sync().unwrap();

        drop(pager);
        let mut pager = Pager::open(&temp_path).unwrap();

        let mut data = [0u8; PAGE_SIZE];
        pager.read_page(0, &mut data).unwrap();
        assert_eq!(&data[..5], b"hello");
        pager.read_page(1, &mut data).unwrap();
        assert_eq!(&data[..5], b"world");
    }

    #[test]
    fn test_random_payload_round_trip() {
        let temp_dir = tempdir().unwrap();
        let temp_path = temp_dir.path().join("random.db");

        let mut payload = [0u8; PAGE_SIZE];
        rand::thread_rng().fill_bytes(&mut payload);

        let mut pager = Pager::open(&temp_path).unwrap();
        let page_id = pager.allocate_page();
        pager.write_page(page_id, &payload).unwrap();
        pager.sync().unwrap();

        drop(pager);
        let mut pager = Pager::open(&temp_path).unwrap();
        let mut data = [0u8; PAGE_SIZE];
        pager.read_page(page_id, &mut data).unwrap();
        assert_eq!(data[..], payload[..]);
    }

    #[test]
    fn test_allocator_monotonic_and_recovered_from_file_size() {
        let temp_dir = tempdir().unwrap();
        let temp_path = temp_dir.path().join("alloc.db");

        let mut pager = Pager::open(&temp_path).unwrap();
        let a = pager.allocate_page();
        let b = pager.allocate_page();
        let c = pager.allocate_page();
        assert!(a < b && b < c);

        // Only pages 0 and 1 are materialized; the counter restarts from
        // file_size / PAGE_SIZE.
        pager.write_page(0, &[0u8; PAGE_SIZE]).unwrap();
        pager.write_page(1, &[0u8; PAGE_SIZE]).unwrap();
        drop(pager);

        let mut pager = Pager::open(&temp_path).unwrap();
        assert_eq!(pager.allocate_page(), 2);
    }

    #[test]
    fn test_read_past_eof_fails() {
        let temp_dir = tempdir().unwrap();
        let temp_path = temp_dir.path().join("eof.db");

        let mut pager = Pager::open(&temp_path).unwrap();
        let mut data = [0u8; PAGE_SIZE];
        let err = pager.read_page(7, &mut data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
