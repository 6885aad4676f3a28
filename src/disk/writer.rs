//! Per-file writer thread. One file has exactly one writer, so all
//! writes to a file are serialised; workers only ever enqueue.

use std::{
    path::Path,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
};

use crossbeam::channel::{unbounded, Sender};
use log::{debug, error};

use crate::{
    error::{ErrorKind, ShoalError},
    io::ShoalFile,
    types::ShoalResult,
};

pub enum WriteJob {
    /// Full page images, addressed by logical page number.
    Pages(Vec<(u32, Vec<u8>)>),
    /// `(addr, next)` chain links of freed pages; only the `next_page`
    /// field of each page head is touched.
    FreeLinks(Vec<(u32, u32)>),
    /// Raw bytes at a fixed offset of page 0 (allocator fields).
    PatchBytes(u16, Vec<u8>),
    Exit,
}

/// Byte offset of `next_page` inside a page head.
const NEXT_PAGE_OFFSET: u64 = 8;

pub struct DiskWriter {
    sender: Sender<WriteJob>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DiskWriter {
    pub fn start(
        path: &Path,
        file: Arc<Mutex<ShoalFile>>,
        page_size: usize,
        no_save: bool,
    ) -> DiskWriter {
        let (sender, receiver) = unbounded::<WriteJob>();
        let path = path.to_path_buf();

        let handle = thread::spawn(move || {
            while let Ok(job) = receiver.recv() {
                if no_save {
                    // no-save files are never persisted
                    if let WriteJob::Exit = job {
                        break;
                    }
                    continue;
                }

                let result = match job {
                    WriteJob::Pages(pages) => write_pages(&file, page_size, pages),
                    WriteJob::FreeLinks(links) => write_free_links(&file, page_size, links),
                    WriteJob::PatchBytes(offset, bytes) => {
                        let mut file = file.lock().unwrap();
                        file.write_at(offset as u64, &bytes).and_then(|_| file.flush())
                    }
                    WriteJob::Exit => break,
                };
                if let Err(e) = result {
                    error!("write to {:?} failed: {}", path, e);
                }
            }
            debug!("disk writer for {:?} exits", path);
        });

        DiskWriter {
            sender,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn send(&self, job: WriteJob) -> ShoalResult {
        self.sender
            .send(job)
            .or_else(|_| Err(ShoalError::new(ErrorKind::Io, "disk writer is gone")))
    }

    /// Drain the queue and join the thread; idempotent.
    pub fn stop(&self) -> ShoalResult {
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            self.send(WriteJob::Exit)?;
            handle
                .join()
                .or_else(|_| Err(ShoalError::new(ErrorKind::Io, "disk writer panicked")))?;
        }
        Ok(())
    }
}

fn write_pages(
    file: &Arc<Mutex<ShoalFile>>,
    page_size: usize,
    pages: Vec<(u32, Vec<u8>)>,
) -> ShoalResult {
    let mut file = file.lock().unwrap();
    for (addr, bytes) in pages {
        file.write_at(addr as u64 * page_size as u64, &bytes)?;
    }
    file.flush()
}

fn write_free_links(
    file: &Arc<Mutex<ShoalFile>>,
    page_size: usize,
    links: Vec<(u32, u32)>,
) -> ShoalResult {
    let mut file = file.lock().unwrap();
    let size = file.get_size()?;
    for (addr, next) in links {
        let pos = addr as u64 * page_size as u64 + NEXT_PAGE_OFFSET;
        // a freed page that was never flushed has nothing to chain
        if pos + 4 > size {
            continue;
        }
        file.write_at(pos, &next.to_le_bytes())?;
    }
    file.flush()
}
