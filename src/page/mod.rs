mod record;

pub use record::*;

use std::io::Cursor;

use crate::io::{Decodeable, Encodeable};

pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Levels of the on-page skiplist.
pub const SKIPLIST_MAX_LEVEL: usize = 8;

/// Location of a record inside the block store: logical page number
/// plus byte offset. Address 0 is the file head and offset 0 sits
/// inside a page head, so `(0, _)` and `(_, 0)` double as null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PageRef {
    pub addr: u32,
    pub offset: u16,
}

impl PageRef {
    pub fn new(addr: u32, offset: u16) -> Self {
        Self { addr, offset }
    }

    pub fn null() -> Self {
        Self { addr: 0, offset: 0 }
    }

    pub fn is_null(&self) -> bool {
        self.addr == 0
    }
}

/// A fixed-size page image. All record access goes through offsets so
/// callers never hold references into the buffer across cache calls.
#[derive(Debug, Clone)]
pub struct Page {
    bytes: Vec<u8>,
}

impl Page {
    /// A zeroed page carrying only its head.
    pub fn new(page_size: usize, addr: u32, category: PageCategory) -> Self {
        let mut page = Self {
            bytes: vec![0; page_size],
        };
        page.write_record(
            0,
            &PageHead {
                addr,
                prev_page: 0,
                next_page: 0,
                category,
            },
        );
        page
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn head(&self) -> PageHead {
        self.read_record(0)
    }

    pub fn read_record<T: Decodeable>(&self, offset: u16) -> T {
        let mut reader = Cursor::new(&self.bytes[offset as usize..]);
        T::decode_from(&mut reader)
    }

    pub fn write_record<T: Encodeable>(&mut self, offset: u16, record: &T) {
        let buf = record.encode();
        let start = offset as usize;
        self.bytes[start..start + buf.len()].copy_from_slice(&buf);
    }

    pub fn read_bytes(&self, offset: u16, len: usize) -> Vec<u8> {
        let start = offset as usize;
        self.bytes[start..start + len].to_vec()
    }

    pub fn write_bytes(&mut self, offset: u16, bytes: &[u8]) {
        let start = offset as usize;
        self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn zero_range(&mut self, offset: u16, len: usize) {
        let start = offset as usize;
        for b in &mut self.bytes[start..start + len] {
            *b = 0;
        }
    }

    /// Move `len` bytes from `src` to `dst` inside the page; the ranges
    /// may overlap.
    pub fn move_bytes(&mut self, src: u16, dst: u16, len: usize) {
        self.bytes
            .copy_within(src as usize..src as usize + len, dst as usize);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_head_roundtrip() {
        let mut page = Page::new(256, 7, PageCategory::Table);
        let head = page.head();
        assert_eq!(head.addr, 7);
        assert_eq!(head.category, PageCategory::Table);

        let mut head = head;
        head.next_page = 42;
        page.write_record(0, &head);
        assert_eq!(page.head().next_page, 42);
    }

    #[test]
    fn test_move_bytes() {
        let mut page = Page::new(64, 1, PageCategory::Value);
        page.write_bytes(20, b"abcdef");
        page.move_bytes(20, 24, 6);
        assert_eq!(page.read_bytes(24, 6), b"abcdef".to_vec());
    }
}
