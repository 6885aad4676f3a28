//! The per-worker, per-file page cache: the single in-RAM interface to
//! the block store. Writes stage through copy-on-write shadows; commit
//! promotes them, rollback discards them, flush hands the promoted set
//! to the file writer.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use log::debug;

use crate::{
    disk::DiskHandle,
    error::{ErrorKind, ShoalError},
    io::{Decodeable, Encodeable},
    page::{Page, PageCategory, PageHead, PageRef},
    table::TableHandle,
    types::ShoalResult,
};

pub struct PageCache {
    disk: Arc<DiskHandle>,
    page_size: usize,

    /// Latest committed view of every page this cache has touched.
    committed: HashMap<u32, Arc<Page>>,
    /// Copy-on-write shadows of the current transaction.
    dirty: HashMap<u32, Page>,
    /// Pages allocated by the current transaction.
    created: Vec<u32>,
    /// Pages to deallocate at commit.
    deleted: HashSet<u32>,
    /// Committed pages not yet handed to the writer.
    changed: HashSet<u32>,

    /// Serve only the committed view and refuse writes; flipped on
    /// while a non-owning worker reads through a shared cache, so no
    /// reader ever sees another transaction's shadows.
    committed_only: bool,
}

impl PageCache {
    pub fn new(disk: Arc<DiskHandle>) -> Self {
        let page_size = disk.page_size();
        Self {
            disk,
            page_size,
            committed: HashMap::new(),
            dirty: HashMap::new(),
            created: Vec::new(),
            deleted: HashSet::new(),
            changed: HashSet::new(),
            committed_only: false,
        }
    }

    pub(crate) fn set_committed_only(&mut self, committed_only: bool) {
        self.committed_only = committed_only;
    }

    pub fn disk(&self) -> &Arc<DiskHandle> {
        &self.disk
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// True when the current transaction has staged anything.
    pub fn in_transaction(&self) -> bool {
        !self.dirty.is_empty() || !self.created.is_empty() || !self.deleted.is_empty()
    }

    /// Read view of a page: the transaction's own shadow if one
    /// exists, else the committed view, else the block store.
    pub fn find_page(&mut self, addr: u32) -> Result<&Page, ShoalError> {
        if !self.committed_only {
            if self.deleted.contains(&addr) {
                return Err(ShoalError::page_miss(addr));
            }
            if self.dirty.contains_key(&addr) {
                return Ok(&self.dirty[&addr]);
            }
        }
        if !self.committed.contains_key(&addr) {
            let page = self.disk.read_page(addr)?;
            self.committed.insert(addr, Arc::new(page));
        }
        Ok(self.committed.get(&addr).unwrap().as_ref())
    }

    /// Mutable shadow of a page; allocated on the first write of the
    /// transaction, idempotent afterwards.
    pub fn copy_on_write(&mut self, addr: u32) -> Result<&mut Page, ShoalError> {
        if self.committed_only {
            return Err(ShoalError::new(
                ErrorKind::InvalidContext,
                "write through a read-only cache view",
            ));
        }
        if self.deleted.contains(&addr) {
            return Err(ShoalError::page_miss(addr));
        }
        if !self.dirty.contains_key(&addr) {
            let page = match self.committed.get(&addr) {
                Some(page) => (**page).clone(),
                None => self.disk.read_page(addr)?,
            };
            self.dirty.insert(addr, page);
        }
        Ok(self.dirty.get_mut(&addr).unwrap())
    }

    /// Mark a page dirty after it was reached through an alias. With
    /// record-level access every mutation already goes through
    /// [`copy_on_write`], so this only backfills the shadow.
    pub fn add_dirty_page(&mut self, addr: u32) -> ShoalResult {
        self.copy_on_write(addr)?;
        Ok(())
    }

    /// Allocate a fresh page of the given category; it joins the
    /// transaction dirty set immediately.
    pub fn create_page(&mut self, category: PageCategory) -> Result<u32, ShoalError> {
        if self.committed_only {
            return Err(ShoalError::new(
                ErrorKind::InvalidContext,
                "page allocation through a read-only cache view",
            ));
        }
        let addr = self.disk.alloc_page();
        let page = Page::new(self.page_size, addr, category);
        self.dirty.insert(addr, page);
        self.created.push(addr);
        debug!("create page {} ({:?})", addr, category);
        Ok(addr)
    }

    /// Mark a page for deallocation at commit.
    pub fn del_page(&mut self, addr: u32) {
        self.dirty.remove(&addr);
        self.deleted.insert(addr);
    }

    /// Promote the transaction's shadows into the committed view.
    /// O(dirty set); persistence is not scheduled here.
    pub fn commit(&mut self) {
        for (addr, page) in self.dirty.drain() {
            self.committed.insert(addr, Arc::new(page));
            self.changed.insert(addr);
        }
        for addr in self.deleted.drain() {
            self.committed.remove(&addr);
            self.changed.remove(&addr);
            self.disk.free_page(addr);
        }
        self.created.clear();
    }

    /// Discard the transaction; the committed view is unchanged and
    /// every page created by the transaction returns to the allocator.
    pub fn rollback(&mut self) {
        self.dirty.clear();
        self.deleted.clear();
        for addr in self.created.drain(..) {
            self.disk.free_page(addr);
        }
    }

    /// Hand everything committed since the last flush to the file
    /// writer; a no-op when nothing changed.
    pub fn flush(&mut self) -> ShoalResult {
        if self.changed.is_empty() {
            return Ok(());
        }
        let mut batch = Vec::with_capacity(self.changed.len());
        for addr in self.changed.drain() {
            if let Some(page) = self.committed.get(&addr) {
                batch.push((addr, page.as_bytes().to_vec()));
            }
        }
        debug!("flush {} pages to {:?}", batch.len(), self.disk.path());
        self.disk.queue_flush(batch)
    }

    // ------------------------------------------------------------------
    // record-level access
    //
    // Page contents are only reached through these helpers, so no
    // caller ever holds a native reference into a page across another
    // cache call.
    // ------------------------------------------------------------------

    pub fn read_record<T: Decodeable>(&mut self, at: PageRef) -> Result<T, ShoalError> {
        let page = self.find_page(at.addr)?;
        Ok(page.read_record(at.offset))
    }

    pub fn write_record<T: Encodeable>(&mut self, at: PageRef, record: &T) -> ShoalResult {
        let page = self.copy_on_write(at.addr)?;
        page.write_record(at.offset, record);
        Ok(())
    }

    pub fn read_bytes(&mut self, at: PageRef, len: usize) -> Result<Vec<u8>, ShoalError> {
        let page = self.find_page(at.addr)?;
        Ok(page.read_bytes(at.offset, len))
    }

    pub fn write_bytes(&mut self, at: PageRef, bytes: &[u8]) -> ShoalResult {
        let page = self.copy_on_write(at.addr)?;
        page.write_bytes(at.offset, bytes);
        Ok(())
    }

    pub fn read_page_head(&mut self, addr: u32) -> Result<PageHead, ShoalError> {
        let page = self.find_page(addr)?;
        Ok(page.head())
    }

    // ------------------------------------------------------------------
    // table-aware wrappers
    // ------------------------------------------------------------------

    /// Locate a top-level table's `TableInFile` record and run a table
    /// operation against it. Transaction membership is the worker's
    /// call, not ours.
    pub fn with_table<R>(
        &mut self,
        name: &[u8],
        f: impl FnOnce(&mut TableHandle) -> Result<R, ShoalError>,
    ) -> Result<R, ShoalError> {
        let name_str = String::from_utf8_lossy(name).to_string();
        let loc = self.disk.table_loc(&name_str).ok_or_else(|| {
            ShoalError::new(
                ErrorKind::UnknownTable,
                &format!("table {} is not in this file", name_str),
            )
        })?;
        let mut handle = TableHandle::new(self, name.to_vec(), loc);
        f(&mut handle)
    }
}
