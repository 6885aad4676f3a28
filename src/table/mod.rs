mod arrange;
mod big_value;
mod delete;
mod insert;
mod range;
mod set;
mod space;

pub use range::Direction;

use std::cmp::Ordering;

use crate::{
    cache::PageCache,
    error::{ErrorKind, ShoalError},
    page::{
        BigValueRef, PageRef, TableElement, TableInFile, TableKey, TableType, ValueType,
        SKIPLIST_MAX_LEVEL,
    },
    types::ShoalResult,
};

/// Sort order of the skiplist: shorter keys first, same-length keys
/// lexicographic.
pub fn key_cmp(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// One descent point per level, recorded by a find walk. `elem_ref`
/// addresses either a real element or a level head inside the
/// `TableInFile` record; the two are interchangeable for patching.
#[derive(Debug, Clone, Default)]
pub struct SkipListPoint {
    pub elem_ref: PageRef,
    pub elem: TableElement,
}

pub type SkipListPoints = [SkipListPoint; SKIPLIST_MAX_LEVEL];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FindMode {
    /// Stop before the first key `>= target`; used by insert/delete.
    Prev,
    /// Stop before the first key `> target`; used by range walks.
    Tail,
}

/// An entry located by exact key.
pub struct Located {
    pub points: SkipListPoints,
    /// The entry's level-0 element.
    pub elem_ref: PageRef,
    pub elem: TableElement,
    pub key: TableKey,
}

/// A table bound to its cache for the duration of one operation. The
/// `loc` is the `TableInFile` record: a directory entry for top-level
/// tables, an inline set-head value for nested sets. State lives
/// on-page; the handle itself holds nothing that can go stale.
pub struct TableHandle<'a> {
    cache: &'a mut PageCache,
    name: Vec<u8>,
    loc: PageRef,
    page_size: usize,
}

impl<'a> TableHandle<'a> {
    pub fn new(cache: &'a mut PageCache, name: Vec<u8>, loc: PageRef) -> TableHandle<'a> {
        let page_size = cache.page_size();
        TableHandle {
            cache,
            name,
            loc,
            page_size,
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub(crate) fn cache(&mut self) -> &mut PageCache {
        self.cache
    }

    pub(crate) fn tif(&mut self) -> Result<TableInFile, ShoalError> {
        self.cache.read_record(self.loc)
    }

    pub(crate) fn write_tif(&mut self, tif: &TableInFile) -> ShoalResult {
        self.cache.write_record(self.loc, tif)
    }

    /// Location of the level-`level` head element.
    pub(crate) fn head_ref(&self, level: usize) -> PageRef {
        PageRef::new(
            self.loc.addr,
            self.loc.offset + TableInFile::head_elem_offset(level),
        )
    }

    pub(crate) fn read_elem(&mut self, at: PageRef) -> Result<TableElement, ShoalError> {
        self.cache.read_record(at)
    }

    pub(crate) fn write_elem(&mut self, at: PageRef, elem: &TableElement) -> ShoalResult {
        self.cache.write_record(at, elem)
    }

    /// Key record head of the element at `elem_ref`.
    pub(crate) fn key_head_of(
        &mut self,
        elem_page: u32,
        key_offset: u16,
    ) -> Result<TableKey, ShoalError> {
        self.cache.read_record(PageRef::new(elem_page, key_offset))
    }

    pub(crate) fn key_bytes_of(
        &mut self,
        elem_page: u32,
        key_offset: u16,
        key: &TableKey,
    ) -> Result<Vec<u8>, ShoalError> {
        self.cache.read_bytes(
            PageRef::new(elem_page, key_offset + TableKey::SIZE as u16),
            key.key_size as usize,
        )
    }

    /// Raw in-page value bytes of a key record (a descriptor for big
    /// values, a `TableInFile` image for set heads).
    pub(crate) fn raw_value_bytes_of(
        &mut self,
        elem_page: u32,
        key_offset: u16,
        key: &TableKey,
    ) -> Result<Vec<u8>, ShoalError> {
        self.cache.read_bytes(
            PageRef::new(
                elem_page,
                key_offset + TableKey::SIZE as u16 + key.key_size,
            ),
            key.value_size as usize,
        )
    }

    /// Offset of a key record's value region within its page.
    pub(crate) fn value_offset_of(key_offset: u16, key: &TableKey) -> u16 {
        key_offset + TableKey::SIZE as u16 + key.key_size
    }

    /// Walk from the top level head down, recording the last element
    /// strictly before the target at every level. With `key == None`
    /// the walk runs to the very tail of the list.
    pub(crate) fn find_points(
        &mut self,
        key: Option<&[u8]>,
        mode: FindMode,
    ) -> Result<SkipListPoints, ShoalError> {
        let mut points = SkipListPoints::default();

        let mut cur_ref = self.head_ref(SKIPLIST_MAX_LEVEL - 1);
        let mut cur = self.read_elem(cur_ref)?;

        for level in (0..SKIPLIST_MAX_LEVEL).rev() {
            loop {
                let next_ref = PageRef::new(cur.next_page, cur.next_offset);
                if next_ref.is_null() {
                    break;
                }
                let next = self.read_elem(next_ref)?;
                let advance = match key {
                    None => true,
                    Some(target) => {
                        let next_key_head = self.key_head_of(next_ref.addr, next.key_offset)?;
                        let next_key =
                            self.key_bytes_of(next_ref.addr, next.key_offset, &next_key_head)?;
                        match mode {
                            FindMode::Prev => key_cmp(&next_key, target) == Ordering::Less,
                            FindMode::Tail => key_cmp(&next_key, target) != Ordering::Greater,
                        }
                    }
                };
                if !advance {
                    break;
                }
                cur_ref = next_ref;
                cur = next;
            }

            points[level] = SkipListPoint {
                elem_ref: cur_ref,
                elem: cur.clone(),
            };

            if level > 0 {
                if cur.key_offset == 0 {
                    // still on a level head, step to the next head down
                    cur_ref = self.head_ref(level - 1);
                } else {
                    cur_ref = PageRef::new(cur_ref.addr, cur.low_offset);
                }
                cur = self.read_elem(cur_ref)?;
            }
        }

        Ok(points)
    }

    /// Locate an entry by exact key.
    pub(crate) fn locate(&mut self, key: &[u8]) -> Result<Option<Located>, ShoalError> {
        let points = self.find_points(Some(key), FindMode::Prev)?;
        let elem_ref = PageRef::new(points[0].elem.next_page, points[0].elem.next_offset);
        if elem_ref.is_null() {
            return Ok(None);
        }
        let elem = self.read_elem(elem_ref)?;
        let key_head = self.key_head_of(elem_ref.addr, elem.key_offset)?;
        let found = self.key_bytes_of(elem_ref.addr, elem.key_offset, &key_head)?;
        if found != key {
            return Ok(None);
        }
        Ok(Some(Located {
            points,
            elem_ref,
            elem,
            key: key_head,
        }))
    }

    pub fn is_key_exist(&mut self, key: &[u8]) -> Result<bool, ShoalError> {
        Ok(self.locate(key)?.is_some())
    }

    /// Fetch a value; big values are reassembled and checksummed.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, ShoalError> {
        let located = match self.locate(key)? {
            Some(located) => located,
            None => return Ok(None),
        };
        let raw =
            self.raw_value_bytes_of(located.elem_ref.addr, located.elem.key_offset, &located.key)?;
        match located.key.value_type {
            ValueType::Normal => Ok(Some(raw)),
            ValueType::BigValue => {
                let big: BigValueRef = self.cache.read_record(PageRef::new(
                    located.elem_ref.addr,
                    Self::value_offset_of(located.elem.key_offset, &located.key),
                ))?;
                Ok(Some(self.big_value_get(&big)?))
            }
            ValueType::SetHead => Err(ShoalError::new(
                ErrorKind::NotFound,
                "key holds a set, not a value",
            )),
        }
    }

    /// Number of live keys: a level-0 walk.
    pub fn length(&mut self) -> Result<u32, ShoalError> {
        let mut count = 0;
        let mut cur = {
            let head = self.read_elem(self.head_ref(0))?;
            PageRef::new(head.next_page, head.next_offset)
        };
        while !cur.is_null() {
            count += 1;
            let elem = self.read_elem(cur)?;
            cur = PageRef::new(elem.next_page, elem.next_offset);
        }
        Ok(count)
    }

    pub fn table_type(&mut self) -> Result<TableType, ShoalError> {
        Ok(self.tif()?.table_type)
    }

    pub fn set_table_type(&mut self, table_type: TableType) -> ShoalResult {
        let mut tif = self.tif()?;
        tif.table_type = table_type;
        self.write_tif(&tif)
    }

    /// Set the type only while it still carries the `Byte` default.
    pub fn set_table_type_if_byte(&mut self, table_type: TableType) -> Result<bool, ShoalError> {
        let mut tif = self.tif()?;
        if tif.table_type != TableType::Byte {
            return Ok(false);
        }
        tif.table_type = table_type;
        self.write_tif(&tif)?;
        Ok(true)
    }
}
