//! # Pager
//!
//! Presents the database file as an array of fixed-size pages with a page
//! cache, a dirty set, a freelist of released pages, and transactional
//! semantics by rollback journal.
//!
//! ## Transaction Protocol
//!
//! ```text
//! begin_transaction
//!   └─ journal.begin()           (header written, no records yet)
//! page_mut(p)                    (first write to p this transaction)
//!   └─ journal.record(p, pre-image)
//! commit
//!   ├─ journal.sync()            (undo information durable first)
//!   ├─ write dirty pages, fsync data
//!   └─ journal.discard()         (transaction is now committed)
//! rollback
//!   ├─ replay pre-images into the data file
//!   ├─ truncate to the size at begin, fsync
//!   ├─ journal.discard()
//!   └─ drop dirty cache entries
//! ```
//!
//! Dirty pages are held in cache until commit (no-steal), so the data
//! file only ever contains committed bytes plus whatever a crashed commit
//! managed to write — which the journal can always undo.
//!
//! ## Freelist
//!
//! Released pages are chained in trunk pages: `[next_trunk u32, count
//! u32, page_no u32 ...]`. Allocation pops from the head trunk; when a
//! trunk empties, the trunk page itself is the next allocation. The head
//! pointer and counts live in the file header, which is journaled like
//! any other page, so freelist changes roll back with the transaction.
//!
//! ## Mutation Rules
//!
//! Every mutation — `page_mut`, `allocate_page`, `free_page` — demands an
//! open transaction and fails with a protocol error otherwise. Reads are
//! allowed at any time.

use eyre::{ensure, Result};
use hashbrown::HashSet;
use std::path::Path;
use tracing::{debug, warn};

use super::cache::PageCache;
use super::file::DbFile;
use super::header::FileHeader;
use super::journal::Journal;
use super::{HEADER_PAGE, TRUNK_HEADER_SIZE, TRUNK_MAX_ENTRIES};
use crate::config::{PAGE_CACHE_CAPACITY, PAGE_SIZE};
use crate::error::EngineError;

pub struct Pager {
    file: DbFile,
    journal: Journal,
    cache: PageCache,
    in_txn: bool,
    txn_start_page_count: u32,
    journaled: HashSet<u32>,
}

impl Pager {
    /// Opens or creates the database at `path`. A hot journal is rolled
    /// back before anything else; a fresh file gets its header written.
    pub fn open(path: &Path) -> Result<Pager> {
        let mut file = DbFile::open(path)?;
        let journal = Journal::for_database(path);

        if journal.is_hot() {
            warn!(path = %path.display(), "hot journal found, recovering");
            Self::recover(&mut file, &journal)?;
        }

        if file.is_empty()? {
            let mut page = Box::new([0u8; PAGE_SIZE]);
            FileHeader::fresh().write_to(page.as_mut_slice())?;
            file.write_page(HEADER_PAGE, page.as_slice())?;
            file.sync()?;
            debug!(path = %path.display(), "initialized fresh database file");
        }

        let mut pager = Pager {
            file,
            journal,
            cache: PageCache::new(PAGE_CACHE_CAPACITY),
            in_txn: false,
            txn_start_page_count: 0,
            journaled: HashSet::new(),
        };
        pager.header()?.validate()?;
        Ok(pager)
    }

    /// Replays a hot journal: restore every pre-image, trim pages the
    /// aborted transaction appended, and discard the journal.
    fn recover(file: &mut DbFile, journal: &Journal) -> Result<()> {
        let records = journal.read_records()?;
        for (page_no, image) in &records {
            file.write_page(*page_no, image.as_slice())?;
        }
        let mut header_page = Box::new([0u8; PAGE_SIZE]);
        file.read_page(HEADER_PAGE, header_page.as_mut_slice())?;
        let header = *FileHeader::from_bytes(header_page.as_slice())?;
        header.validate()?;
        file.truncate(header.page_count)?;
        file.sync()?;

        let mut journal = Journal::for_database(file.path());
        journal.discard()?;
        debug!(
            pages = records.len(),
            page_count = header.page_count,
            "journal recovery complete"
        );
        Ok(())
    }

    /// Flushes and releases the file. An open transaction is aborted.
    pub fn close(&mut self) -> Result<()> {
        if self.in_txn {
            warn!("closing pager with open transaction, rolling back");
            self.rollback()?;
        }
        self.file.sync()
    }

    pub fn in_transaction(&self) -> bool {
        self.in_txn
    }

    pub fn page_count(&mut self) -> Result<u32> {
        Ok(self.header()?.page_count)
    }

    /// Read access to page `page_no`. The returned slice is valid until
    /// the next pager call (the borrow is the pin).
    pub fn page(&mut self, page_no: u32) -> Result<&[u8]> {
        debug_assert_ne!(page_no, HEADER_PAGE, "header block is pager-internal");
        let count = self.header()?.page_count;
        ensure!(
            page_no < count,
            EngineError::corruption(format!(
                "page {page_no} out of bounds (page_count={count})"
            ))
        );
        let idx = self.load(page_no)?;
        Ok(self.cache.entry_data(idx))
    }

    /// Write access to page `page_no`: journals the pre-image on first
    /// touch in this transaction and marks the page dirty.
    pub fn page_mut(&mut self, page_no: u32) -> Result<&mut [u8]> {
        debug_assert_ne!(page_no, HEADER_PAGE, "header block is pager-internal");
        let count = self.header()?.page_count;
        ensure!(
            page_no < count,
            EngineError::corruption(format!(
                "page {page_no} out of bounds (page_count={count})"
            ))
        );
        self.page_mut_unchecked(page_no)
    }

    fn page_mut_unchecked(&mut self, page_no: u32) -> Result<&mut [u8]> {
        ensure!(
            self.in_txn,
            EngineError::Protocol("page write outside a transaction")
        );
        let idx = self.load(page_no)?;

        if !self.journaled.contains(&page_no) && page_no < self.txn_start_page_count {
            self.journal.record(page_no, self.cache.entry_data(idx))?;
            self.journaled.insert(page_no);
        }

        let entry = self.cache.entry_mut(idx);
        entry.dirty = true;
        Ok(entry.data.as_mut_slice())
    }

    /// Loads `page_no` into the cache if absent, returning its index.
    fn load(&mut self, page_no: u32) -> Result<usize> {
        if let Some(idx) = self.cache.lookup(page_no) {
            return Ok(idx);
        }
        let mut data = Box::new([0u8; PAGE_SIZE]);
        self.file.read_page(page_no, data.as_mut_slice())?;
        Ok(self.cache.insert(page_no, data, false))
    }

    fn header(&mut self) -> Result<FileHeader> {
        let idx = self.load(HEADER_PAGE)?;
        Ok(*FileHeader::from_bytes(self.cache.entry_data(idx))?)
    }

    fn set_header(&mut self, header: &FileHeader) -> Result<()> {
        let data = self.page_mut_unchecked(HEADER_PAGE)?;
        header.write_to(data)
    }

    /// Starts a transaction. Fails if one is already open.
    pub fn begin_transaction(&mut self) -> Result<()> {
        ensure!(
            !self.in_txn,
            EngineError::Protocol("transaction already open")
        );
        let header = self.header()?;
        self.journal.begin()?;
        self.journaled.clear();
        self.txn_start_page_count = header.page_count;
        self.in_txn = true;
        debug!(page_count = header.page_count, "transaction begun");
        Ok(())
    }

    /// Commits: sync the journal, write the dirty set, sync data, then
    /// discard the journal. A crash between the data sync and the
    /// discard leaves a hot journal whose replay reproduces this same
    /// committed state on the next open.
    pub fn commit(&mut self) -> Result<()> {
        ensure!(
            self.in_txn,
            EngineError::Protocol("commit without open transaction")
        );
        self.journal.sync()?;

        let dirty = self.cache.dirty_pages();
        for page_no in &dirty {
            let idx = self
                .cache
                .lookup(*page_no)
                .expect("dirty page must be cached");
            self.file.write_page(*page_no, self.cache.entry_data(idx))?;
        }
        self.file.sync()?;
        self.journal.discard()?;

        for page_no in &dirty {
            self.cache.clear_dirty(*page_no);
        }
        self.in_txn = false;
        self.journaled.clear();
        debug!(pages = dirty.len(), "transaction committed");
        Ok(())
    }

    /// Rolls back: restore every journaled pre-image, trim appended
    /// pages, discard the journal and drop dirty cache entries so the
    /// cache reflects committed state. An I/O failure here is fatal; the
    /// pager must be reopened, which re-runs recovery.
    pub fn rollback(&mut self) -> Result<()> {
        ensure!(
            self.in_txn,
            EngineError::Protocol("rollback without open transaction")
        );
        self.journal.sync()?;
        let records = self.journal.read_records()?;
        for (page_no, image) in &records {
            self.file.write_page(*page_no, image.as_slice())?;
        }
        self.file.truncate(self.txn_start_page_count)?;
        self.file.sync()?;
        self.journal.discard()?;

        self.cache.drop_dirty();
        self.in_txn = false;
        self.journaled.clear();
        debug!(pages = records.len(), "transaction rolled back");
        Ok(())
    }

    /// Allocates a page: pop from the freelist if non-empty, otherwise
    /// extend the file. The page comes back zeroed and dirty.
    pub fn allocate_page(&mut self) -> Result<u32> {
        ensure!(
            self.in_txn,
            EngineError::Protocol("page allocation outside a transaction")
        );
        let mut header = self.header()?;

        let page_no = if header.freelist_head != 0 {
            let trunk_no = header.freelist_head;
            let idx = self.load(trunk_no)?;
            let trunk = self.cache.entry_data(idx);
            let next_trunk = u32::from_le_bytes(trunk[0..4].try_into().unwrap());
            let count = u32::from_le_bytes(trunk[4..8].try_into().unwrap());

            if count > 0 {
                let off = TRUNK_HEADER_SIZE + (count as usize - 1) * 4;
                let entry_page = u32::from_le_bytes(trunk[off..off + 4].try_into().unwrap());
                let trunk_data = self.page_mut_unchecked(trunk_no)?;
                trunk_data[4..8].copy_from_slice(&(count - 1).to_le_bytes());
                header.freelist_count -= 1;
                self.set_header(&header)?;
                entry_page
            } else {
                // empty trunk: the trunk page itself is the allocation
                header.freelist_head = next_trunk;
                self.set_header(&header)?;
                trunk_no
            }
        } else {
            let page_no = header.page_count;
            header.page_count += 1;
            self.set_header(&header)?;
            let data = Box::new([0u8; PAGE_SIZE]);
            self.cache.insert(page_no, data, true);
            debug!(page_no, "allocated page by extending file");
            return Ok(page_no);
        };

        let data = self.page_mut_unchecked(page_no)?;
        data.fill(0);
        debug!(page_no, "allocated page from freelist");
        Ok(page_no)
    }

    /// Pushes `page_no` onto the freelist for reuse.
    pub fn free_page(&mut self, page_no: u32) -> Result<()> {
        ensure!(
            self.in_txn,
            EngineError::Protocol("page free outside a transaction")
        );
        ensure!(
            page_no > HEADER_PAGE,
            EngineError::Protocol("cannot free a reserved page")
        );
        let mut header = self.header()?;

        if header.freelist_head != 0 {
            let trunk_no = header.freelist_head;
            let idx = self.load(trunk_no)?;
            let count = u32::from_le_bytes(self.cache.entry_data(idx)[4..8].try_into().unwrap());
            if (count as usize) < TRUNK_MAX_ENTRIES {
                let trunk = self.page_mut_unchecked(trunk_no)?;
                let off = TRUNK_HEADER_SIZE + count as usize * 4;
                trunk[off..off + 4].copy_from_slice(&page_no.to_le_bytes());
                trunk[4..8].copy_from_slice(&(count + 1).to_le_bytes());
                header.freelist_count += 1;
                self.set_header(&header)?;
                debug!(page_no, "freed page into trunk");
                return Ok(());
            }
        }

        // start a new trunk at the freed page
        let old_head = header.freelist_head;
        let trunk = self.page_mut_unchecked(page_no)?;
        trunk.fill(0);
        trunk[0..4].copy_from_slice(&old_head.to_le_bytes());
        header.freelist_head = page_no;
        self.set_header(&header)?;
        debug!(page_no, "freed page as new trunk");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_pager(dir: &tempfile::TempDir) -> Pager {
        Pager::open(&dir.path().join("t.db")).unwrap()
    }

    #[test]
    fn fresh_database_has_header_only() {
        let dir = tempdir().unwrap();
        let mut pager = open_pager(&dir);
        assert_eq!(pager.page_count().unwrap(), 1);
        assert!(!pager.in_transaction());
    }

    #[test]
    fn mutation_outside_transaction_is_protocol_error() {
        let dir = tempdir().unwrap();
        let mut pager = open_pager(&dir);
        let err = pager.allocate_page().unwrap_err();
        let kind = err.downcast_ref::<EngineError>().unwrap();
        assert!(matches!(kind, EngineError::Protocol(_)));
    }

    #[test]
    fn double_begin_is_protocol_error() {
        let dir = tempdir().unwrap();
        let mut pager = open_pager(&dir);
        pager.begin_transaction().unwrap();
        assert!(pager.begin_transaction().is_err());
    }

    #[test]
    fn allocate_extends_then_reuses_freed_pages() {
        let dir = tempdir().unwrap();
        let mut pager = open_pager(&dir);
        pager.begin_transaction().unwrap();
        let a = pager.allocate_page().unwrap();
        let b = pager.allocate_page().unwrap();
        assert_eq!((a, b), (1, 2));
        pager.commit().unwrap();

        pager.begin_transaction().unwrap();
        pager.free_page(b).unwrap();
        pager.commit().unwrap();

        pager.begin_transaction().unwrap();
        // the freed page's trunk is empty, so the trunk page itself
        // (which is page b) comes back first
        let c = pager.allocate_page().unwrap();
        assert_eq!(c, b);
        pager.commit().unwrap();
    }

    #[test]
    fn committed_writes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        {
            let mut pager = Pager::open(&path).unwrap();
            pager.begin_transaction().unwrap();
            let p = pager.allocate_page().unwrap();
            pager.page_mut(p).unwrap()[0..4].copy_from_slice(b"data");
            pager.commit().unwrap();
            pager.close().unwrap();
        }
        let mut pager = Pager::open(&path).unwrap();
        assert_eq!(&pager.page(1).unwrap()[0..4], b"data");
    }

    #[test]
    fn rollback_restores_pages_and_page_count() {
        let dir = tempdir().unwrap();
        let mut pager = open_pager(&dir);

        pager.begin_transaction().unwrap();
        let p = pager.allocate_page().unwrap();
        pager.page_mut(p).unwrap()[0] = 42;
        pager.commit().unwrap();

        pager.begin_transaction().unwrap();
        pager.page_mut(p).unwrap()[0] = 99;
        let extra = pager.allocate_page().unwrap();
        assert_eq!(extra, 2);
        pager.rollback().unwrap();

        assert_eq!(pager.page(p).unwrap()[0], 42);
        assert_eq!(pager.page_count().unwrap(), 2);
        assert!(pager.page(extra).is_err());
    }

    #[test]
    fn rollback_leaves_file_byte_identical() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let mut pager = Pager::open(&path).unwrap();

        pager.begin_transaction().unwrap();
        let p = pager.allocate_page().unwrap();
        pager.page_mut(p).unwrap().fill(7);
        pager.commit().unwrap();
        pager.close().unwrap();

        let before = std::fs::read(&path).unwrap();

        let mut pager = Pager::open(&path).unwrap();
        pager.begin_transaction().unwrap();
        pager.page_mut(p).unwrap().fill(9);
        pager.allocate_page().unwrap();
        pager.rollback().unwrap();
        pager.close().unwrap();

        let after = std::fs::read(&path).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn hot_journal_is_replayed_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        {
            let mut pager = Pager::open(&path).unwrap();
            pager.begin_transaction().unwrap();
            let p = pager.allocate_page().unwrap();
            pager.page_mut(p).unwrap()[0] = 1;
            pager.commit().unwrap();
        }

        // simulate a crash mid-transaction: journal a pre-image, scribble
        // on the data file, and never commit or roll back
        {
            let mut journal = Journal::for_database(&path);
            let mut file = DbFile::open(&path).unwrap();
            let mut pre = [0u8; PAGE_SIZE];
            file.read_page(1, &mut pre).unwrap();
            journal.begin().unwrap();
            journal.record(1, &pre).unwrap();
            journal.sync().unwrap();
            file.write_page(1, &[0xEE; PAGE_SIZE]).unwrap();
            file.sync().unwrap();
        }

        let mut pager = Pager::open(&path).unwrap();
        assert_eq!(pager.page(1).unwrap()[0], 1);
        assert!(!Journal::for_database(&path).is_hot());
    }

    #[test]
    fn commit_discards_journal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let mut pager = Pager::open(&path).unwrap();
        pager.begin_transaction().unwrap();
        let p = pager.allocate_page().unwrap();
        pager.page_mut(p).unwrap()[0] = 5;
        pager.commit().unwrap();

        assert!(!Journal::for_database(&path).is_hot());
    }

    #[test]
    fn cache_eviction_rereads_from_disk() {
        let dir = tempdir().unwrap();
        let mut pager = open_pager(&dir);

        pager.begin_transaction().unwrap();
        let pages: Vec<u32> = (0..PAGE_CACHE_CAPACITY + 16)
            .map(|i| {
                let p = pager.allocate_page().unwrap();
                pager.page_mut(p).unwrap()[0] = (i % 251) as u8;
                p
            })
            .collect();
        pager.commit().unwrap();

        // touch everything again; early pages were evicted and must
        // come back from disk with their committed contents
        for (i, p) in pages.iter().enumerate() {
            assert_eq!(pager.page(*p).unwrap()[0], (i % 251) as u8);
        }
    }
}
