mod writer;

pub use writer::{DiskWriter, WriteJob};

use std::{
    collections::HashMap,
    io::Cursor,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex, RwLock,
    },
};

use log::{debug, error, info};

use crate::{
    error::{ErrorKind, ShoalError},
    io::{read_into, Decodeable, Encodeable, ShoalFile, ShoalWriter},
    page::{Page, PageCategory, PageHead, PageRef, TableInFile, TableType},
    types::ShoalResult,
    utils::HandyRwLock,
};

const MAGIC: u32 = 0x53484f4c;

/// Byte offset of the [`FileHead`] record on a file-head page.
const FILE_HEAD_OFFSET: u16 = PageHead::SIZE as u16;

/// First directory entry byte on a file-head page.
const DIR_BASE: u16 = (PageHead::SIZE + FileHead::SIZE) as u16;

/// Offset of the `page_count`/`free_head`/`free_count` trio inside a
/// page image; the writer patches exactly these twelve bytes when it
/// syncs the allocator.
const ALLOC_FIELDS_OFFSET: u16 = FILE_HEAD_OFFSET + 8;

/// File-level metadata on page 0 (and, minus the allocator fields, on
/// every directory overflow page).
#[derive(Debug, Clone, Copy)]
struct FileHead {
    magic: u32,
    page_size: u32,
    page_count: u32,
    free_head: u32,
    free_count: u32,
    entry_count: u16,
    free_off: u16,
}

impl FileHead {
    const SIZE: usize = 24;
}

impl Encodeable for FileHead {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ShoalWriter::new();
        writer.write(&self.magic);
        writer.write(&self.page_size);
        writer.write(&self.page_count);
        writer.write(&self.free_head);
        writer.write(&self.free_count);
        writer.write(&self.entry_count);
        writer.write(&self.free_off);
        writer.to_bytes()
    }
}

impl Decodeable for FileHead {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        Self {
            magic: read_into(reader),
            page_size: read_into(reader),
            page_count: read_into(reader),
            free_head: read_into(reader),
            free_count: read_into(reader),
            entry_count: read_into(reader),
            free_off: read_into(reader),
        }
    }
}

/// In-RAM page allocator. Page 0 is the file head; data pages start at
/// 1. Freed pages are recycled before the high-water mark grows.
pub struct PageAllocator {
    page_count: u32,
    free_list: Vec<u32>,
}

impl PageAllocator {
    fn new() -> Self {
        Self {
            page_count: 1,
            free_list: Vec::new(),
        }
    }

    pub fn alloc(&mut self) -> u32 {
        if let Some(addr) = self.free_list.pop() {
            return addr;
        }
        let addr = self.page_count;
        self.page_count += 1;
        addr
    }

    pub fn free(&mut self, addr: u32) {
        self.free_list.push(addr);
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// `(page_count, free_head, free_count)` plus the on-disk chain
    /// links for the current free list.
    fn snapshot(&self) -> (Vec<u8>, u32, Vec<(u32, u32)>) {
        let free_head = *self.free_list.first().unwrap_or(&0);
        let mut links = Vec::new();
        for (i, addr) in self.free_list.iter().enumerate() {
            let next = *self.free_list.get(i + 1).unwrap_or(&0);
            links.push((*addr, next));
        }

        let mut writer = ShoalWriter::new();
        writer.write(&self.page_count);
        writer.write(&free_head);
        writer.write(&(self.free_list.len() as u32));
        (writer.to_bytes(), free_head, links)
    }
}

/// One database file: a page-addressable block store plus the table
/// directory. All writes are serialised through a dedicated writer
/// thread; reads go straight to the file.
pub struct DiskHandle {
    path: PathBuf,
    page_size: usize,
    no_save: bool,

    file: Arc<Mutex<ShoalFile>>,
    alloc: Arc<Mutex<PageAllocator>>,

    /// table name -> location of its `TableInFile` record
    tables: RwLock<HashMap<String, PageRef>>,
    /// last page of the directory chain and its current head record
    dir_tail: Mutex<u32>,

    /// Sum of the weights of the tables packed into this file.
    table_weight: AtomicU32,

    writer: DiskWriter,
}

impl DiskHandle {
    pub fn open<P: AsRef<Path>>(
        path: P,
        page_size: usize,
        no_save: bool,
    ) -> Result<Arc<DiskHandle>, ShoalError> {
        let path = path.as_ref().to_path_buf();
        let mut file = ShoalFile::open(&path)?;

        if no_save {
            // no-save files never outlive the process
            file.set_len(0)?;
        }

        let mut alloc = PageAllocator::new();
        let mut tables = HashMap::new();
        let mut dir_tail = 0;

        if file.get_size()? == 0 {
            let head = FileHead {
                magic: MAGIC,
                page_size: page_size as u32,
                page_count: 1,
                free_head: 0,
                free_count: 0,
                entry_count: 0,
                free_off: DIR_BASE,
            };
            let mut page = Page::new(page_size, 0, PageCategory::FileHead);
            page.write_record(FILE_HEAD_OFFSET, &head);
            file.write_at(0, page.as_bytes())?;
            file.flush()?;
        } else {
            let bytes = file.read_at(0, page_size)?;
            let page = Page::from_bytes(bytes);
            let head: FileHead = page.read_record(FILE_HEAD_OFFSET);
            if head.magic != MAGIC {
                return Err(ShoalError::corrupt(&format!(
                    "bad magic in {:?}: {:08x}",
                    path, head.magic
                )));
            }
            if head.page_size as usize != page_size {
                return Err(ShoalError::corrupt(&format!(
                    "page size mismatch in {:?}: file {} vs configured {}",
                    path, head.page_size, page_size
                )));
            }

            alloc.page_count = head.page_count;

            // rebuild the free list from the on-disk chain
            let mut cur = head.free_head;
            let mut seen = 0;
            while cur != 0 && seen < head.free_count {
                alloc.free_list.push(cur);
                let head_bytes = file.read_at(cur as u64 * page_size as u64, PageHead::SIZE)?;
                let page_head = PageHead::decode_from(&mut Cursor::new(head_bytes));
                cur = page_head.next_page;
                seen += 1;
            }
            // restore pop order so reopen reuses the same addresses
            alloc.free_list.reverse();

            // walk the directory chain
            let mut dir_addr = 0;
            loop {
                let bytes = file.read_at(dir_addr as u64 * page_size as u64, page_size)?;
                let page = Page::from_bytes(bytes);
                let dir_head: FileHead = page.read_record(FILE_HEAD_OFFSET);
                let mut off = DIR_BASE;
                for _ in 0..dir_head.entry_count {
                    let name_len: u16 = page.read_record(off);
                    let name = page.read_bytes(off + 2, name_len as usize);
                    let record_off = off + 2 + name_len;
                    let name = String::from_utf8(name)
                        .or_else(|_| Err(ShoalError::corrupt("non utf-8 table name")))?;
                    tables.insert(name, PageRef::new(dir_addr, record_off));
                    off = record_off + TableInFile::SIZE as u16;
                }
                dir_tail = dir_addr;
                let next = page.head().next_page;
                if next == 0 {
                    break;
                }
                dir_addr = next;
            }

            info!(
                "opened {:?}: {} pages, {} tables",
                path,
                alloc.page_count,
                tables.len()
            );
        }

        let file = Arc::new(Mutex::new(file));
        let writer = DiskWriter::start(&path, file.clone(), page_size, no_save);

        Ok(Arc::new(DiskHandle {
            path,
            page_size,
            no_save,
            file,
            alloc: Arc::new(Mutex::new(alloc)),
            tables: RwLock::new(tables),
            dir_tail: Mutex::new(dir_tail),
            table_weight: AtomicU32::new(0),
            writer,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn is_no_save(&self) -> bool {
        self.no_save
    }

    pub fn add_table_weight(&self, weight: u32) {
        self.table_weight.fetch_add(weight, Ordering::Relaxed);
    }

    pub fn table_weight(&self) -> u32 {
        self.table_weight.load(Ordering::Relaxed)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.rl().contains_key(name)
    }

    pub fn table_loc(&self, name: &str) -> Option<PageRef> {
        self.tables.rl().get(name).copied()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.rl().keys().cloned().collect()
    }

    pub fn alloc_page(&self) -> u32 {
        self.alloc.lock().unwrap().alloc()
    }

    pub fn free_page(&self, addr: u32) {
        self.alloc.lock().unwrap().free(addr);
    }

    pub fn page_count(&self) -> u32 {
        self.alloc.lock().unwrap().page_count()
    }

    /// Read a page image from the file. Only the cache calls this, on
    /// a miss.
    pub fn read_page(&self, addr: u32) -> Result<Page, ShoalError> {
        if addr >= self.page_count() {
            return Err(ShoalError::page_miss(addr));
        }
        let mut file = self.file.lock().unwrap();
        let pos = addr as u64 * self.page_size as u64;
        if pos + self.page_size as u64 > file.get_size()? {
            return Err(ShoalError::page_miss(addr));
        }
        let bytes = file.read_at(pos, self.page_size)?;
        Ok(Page::from_bytes(bytes))
    }

    /// Register a table in the directory; idempotent. Runs
    /// synchronously, before any worker starts.
    pub fn create_table(&self, name: &str) -> Result<PageRef, ShoalError> {
        if let Some(loc) = self.table_loc(name) {
            return Ok(loc);
        }
        if name.len() > u16::max_value() as usize {
            return Err(ShoalError::new(ErrorKind::Corrupt, "table name too long"));
        }

        let entry_size = 2 + name.len() + TableInFile::SIZE;
        let mut dir_tail = self.dir_tail.lock().unwrap();
        let mut file = self.file.lock().unwrap();

        let tail_pos = *dir_tail as u64 * self.page_size as u64;
        let mut page = Page::from_bytes(file.read_at(tail_pos, self.page_size)?);
        let mut head: FileHead = page.read_record(FILE_HEAD_OFFSET);

        if head.free_off as usize + entry_size > self.page_size {
            // chain a fresh directory page
            let new_addr = self.alloc.lock().unwrap().alloc();
            let mut page_head = page.head();
            page_head.next_page = new_addr;
            page.write_record(0, &page_head);
            file.write_at(tail_pos, page.as_bytes())?;

            let mut new_page = Page::new(self.page_size, new_addr, PageCategory::FileHead);
            new_page.write_record(
                FILE_HEAD_OFFSET,
                &FileHead {
                    magic: MAGIC,
                    page_size: self.page_size as u32,
                    page_count: 0,
                    free_head: 0,
                    free_count: 0,
                    entry_count: 0,
                    free_off: DIR_BASE,
                },
            );
            *dir_tail = new_addr;
            page = new_page;
            head = page.read_record(FILE_HEAD_OFFSET);
        }

        let entry_off = head.free_off;
        let record_off = entry_off + 2 + name.len() as u16;
        page.write_record(entry_off, &(name.len() as u16));
        page.write_bytes(entry_off + 2, name.as_bytes());
        page.write_record(record_off, &TableInFile::empty(TableType::Byte, false));

        head.entry_count += 1;
        head.free_off = record_off + TableInFile::SIZE as u16;
        page.write_record(FILE_HEAD_OFFSET, &head);

        let tail_pos = *dir_tail as u64 * self.page_size as u64;
        file.write_at(tail_pos, page.as_bytes())?;
        file.flush()?;

        let loc = PageRef::new(*dir_tail, record_off);
        self.tables.wl().insert(name.to_string(), loc);
        debug!("table {} registered in {:?} at {:?}", name, self.path, loc);
        Ok(loc)
    }

    /// Queue a batch of page images for persistence, together with the
    /// current allocator state.
    pub fn queue_flush(&self, pages: Vec<(u32, Vec<u8>)>) -> ShoalResult {
        let (alloc_bytes, _, links) = self.alloc.lock().unwrap().snapshot();

        self.writer.send(WriteJob::Pages(pages))?;
        self.writer.send(WriteJob::FreeLinks(links))?;
        self.writer
            .send(WriteJob::PatchBytes(ALLOC_FIELDS_OFFSET, alloc_bytes))?;
        Ok(())
    }

    /// Stop the writer thread after draining its queue.
    pub fn shutdown(&self) {
        if let Err(e) = self.writer.stop() {
            error!("disk writer for {:?} failed to stop: {}", self.path, e);
        }
    }
}

impl Drop for DiskHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
