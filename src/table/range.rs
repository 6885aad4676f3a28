//! Level-0 walks: ranges, ordered scans, pattern scans, random picks.
//! Forward steps follow element links, backward steps follow the
//! level-0 back-links stored in key records.

use rand::Rng;

use crate::{
    error::ShoalError,
    page::{BigValueRef, PageRef, TableElement, TableKey, ValueType},
    types::KvPair,
    utils::glob_match,
};

use super::{key_cmp, FindMode, TableHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A materialised entry position.
pub(crate) struct Entry {
    pub key: Vec<u8>,
    pub key_head: TableKey,
    pub elem_ref: PageRef,
    pub elem: TableElement,
}

/// Cursor over level 0; holds the element to yield next.
pub(crate) struct TableIter {
    cur: PageRef,
}

impl<'a> TableHandle<'a> {
    /// Cursor at the smallest key.
    pub(crate) fn iter_first(&mut self) -> Result<TableIter, ShoalError> {
        let head = self.read_elem(self.head_ref(0))?;
        Ok(TableIter {
            cur: PageRef::new(head.next_page, head.next_offset),
        })
    }

    /// Cursor at the first key `>= begin`.
    pub(crate) fn iter_from(&mut self, begin: &[u8]) -> Result<TableIter, ShoalError> {
        let points = self.find_points(Some(begin), FindMode::Prev)?;
        Ok(TableIter {
            cur: PageRef::new(points[0].elem.next_page, points[0].elem.next_offset),
        })
    }

    /// Cursor at the largest key, for backward walks.
    pub(crate) fn iter_last(&mut self) -> Result<TableIter, ShoalError> {
        let points = self.find_points(None, FindMode::Tail)?;
        if points[0].elem.key_offset == 0 {
            // the walk never left the level heads: empty table
            return Ok(TableIter {
                cur: PageRef::null(),
            });
        }
        Ok(TableIter {
            cur: points[0].elem_ref,
        })
    }

    pub(crate) fn iter_next_entry(
        &mut self,
        iter: &mut TableIter,
    ) -> Result<Option<Entry>, ShoalError> {
        if iter.cur.is_null() {
            return Ok(None);
        }
        let entry = self.entry_at(iter.cur)?;
        iter.cur = PageRef::new(entry.elem.next_page, entry.elem.next_offset);
        Ok(Some(entry))
    }

    pub(crate) fn iter_prev_entry(
        &mut self,
        iter: &mut TableIter,
    ) -> Result<Option<Entry>, ShoalError> {
        if iter.cur.is_null() {
            return Ok(None);
        }
        let entry = self.entry_at(iter.cur)?;
        iter.cur = PageRef::new(entry.key_head.prev_page, entry.key_head.prev_offset);
        Ok(Some(entry))
    }

    fn entry_at(&mut self, elem_ref: PageRef) -> Result<Entry, ShoalError> {
        let elem = self.read_elem(elem_ref)?;
        let key_head = self.key_head_of(elem_ref.addr, elem.key_offset)?;
        let key = self.key_bytes_of(elem_ref.addr, elem.key_offset, &key_head)?;
        Ok(Entry {
            key,
            key_head,
            elem_ref,
            elem,
        })
    }

    /// Resolve an entry's value; big values reassemble, set heads read
    /// as empty.
    pub(crate) fn entry_value(&mut self, entry: &Entry) -> Result<Vec<u8>, ShoalError> {
        match entry.key_head.value_type {
            ValueType::Normal => self.raw_value_bytes_of(
                entry.elem_ref.addr,
                entry.elem.key_offset,
                &entry.key_head,
            ),
            ValueType::BigValue => {
                let big: BigValueRef = self.cache().read_record(PageRef::new(
                    entry.elem_ref.addr,
                    Self::value_offset_of(entry.elem.key_offset, &entry.key_head),
                ))?;
                self.big_value_get(&big)
            }
            ValueType::SetHead => Ok(Vec::new()),
        }
    }

    /// All live entries in key order.
    pub fn members(&mut self) -> Result<Vec<KvPair>, ShoalError> {
        let mut iter = self.iter_first()?;
        let mut out = Vec::new();
        while let Some(entry) = self.iter_next_entry(&mut iter)? {
            let value = self.entry_value(&entry)?;
            out.push((entry.key, value));
        }
        Ok(out)
    }

    /// Up to `limit` entries from the smallest key up (`Forward`) or
    /// the largest key down (`Backward`).
    pub fn order(&mut self, direction: Direction, limit: u32) -> Result<Vec<KvPair>, ShoalError> {
        let mut out = Vec::new();
        match direction {
            Direction::Forward => {
                let mut iter = self.iter_first()?;
                while out.len() < limit as usize {
                    match self.iter_next_entry(&mut iter)? {
                        Some(entry) => {
                            let value = self.entry_value(&entry)?;
                            out.push((entry.key, value));
                        }
                        None => break,
                    }
                }
            }
            Direction::Backward => {
                let mut iter = self.iter_last()?;
                while out.len() < limit as usize {
                    match self.iter_prev_entry(&mut iter)? {
                        Some(entry) => {
                            let value = self.entry_value(&entry)?;
                            out.push((entry.key, value));
                        }
                        None => break,
                    }
                }
            }
        }
        Ok(out)
    }

    /// Entries with `begin <= key <= end`.
    pub fn rang(&mut self, begin: &[u8], end: &[u8]) -> Result<Vec<KvPair>, ShoalError> {
        let mut iter = self.iter_from(begin)?;
        let mut out = Vec::new();
        while let Some(entry) = self.iter_next_entry(&mut iter)? {
            if key_cmp(&entry.key, end) == std::cmp::Ordering::Greater {
                break;
            }
            let value = self.entry_value(&entry)?;
            out.push((entry.key, value));
        }
        Ok(out)
    }

    /// Entries with `begin <= key <= end` whose key matches `pattern`.
    pub fn pattern(
        &mut self,
        begin: &[u8],
        end: &[u8],
        pattern: &[u8],
    ) -> Result<Vec<KvPair>, ShoalError> {
        let mut iter = self.iter_from(begin)?;
        let mut out = Vec::new();
        while let Some(entry) = self.iter_next_entry(&mut iter)? {
            if key_cmp(&entry.key, end) == std::cmp::Ordering::Greater {
                break;
            }
            if glob_match(pattern, &entry.key) {
                let value = self.entry_value(&entry)?;
                out.push((entry.key, value));
            }
        }
        Ok(out)
    }

    /// A window around `key`: up to `left` entries before its position
    /// and up to `right` entries from its position on, in key order.
    pub fn limit(
        &mut self,
        key: &[u8],
        left: u32,
        right: u32,
    ) -> Result<Vec<KvPair>, ShoalError> {
        let points = self.find_points(Some(key), FindMode::Prev)?;

        // backward from the pivot's predecessor
        let mut before = Vec::new();
        let mut iter = TableIter {
            cur: if points[0].elem.key_offset == 0 {
                PageRef::null()
            } else {
                points[0].elem_ref
            },
        };
        while before.len() < left as usize {
            match self.iter_prev_entry(&mut iter)? {
                Some(entry) => {
                    let value = self.entry_value(&entry)?;
                    before.push((entry.key, value));
                }
                None => break,
            }
        }
        before.reverse();

        // forward from the pivot
        let mut iter = TableIter {
            cur: PageRef::new(points[0].elem.next_page, points[0].elem.next_offset),
        };
        let mut out = before;
        let split = out.len();
        while out.len() - split < right as usize {
            match self.iter_next_entry(&mut iter)? {
                Some(entry) => {
                    let value = self.entry_value(&entry)?;
                    out.push((entry.key, value));
                }
                None => break,
            }
        }
        Ok(out)
    }

    /// The entry `offset` steps from the first key `>= begin` in the
    /// given direction.
    pub fn point(
        &mut self,
        begin: &[u8],
        direction: Direction,
        offset: u32,
    ) -> Result<Option<KvPair>, ShoalError> {
        let mut iter = self.iter_from(begin)?;
        let mut steps = 0;
        loop {
            let entry = match direction {
                Direction::Forward => self.iter_next_entry(&mut iter)?,
                Direction::Backward => self.iter_prev_entry(&mut iter)?,
            };
            match entry {
                Some(entry) => {
                    if steps == offset {
                        let value = self.entry_value(&entry)?;
                        return Ok(Some((entry.key, value)));
                    }
                    steps += 1;
                }
                None => return Ok(None),
            }
        }
    }

    /// A uniformly random entry, `None` on an empty table.
    pub fn rand(&mut self) -> Result<Option<KvPair>, ShoalError> {
        let len = self.length()?;
        if len == 0 {
            return Ok(None);
        }
        let idx = rand::thread_rng().gen_range(0, len);
        let mut iter = self.iter_first()?;
        for _ in 0..idx {
            self.iter_next_entry(&mut iter)?;
        }
        match self.iter_next_entry(&mut iter)? {
            Some(entry) => {
                let value = self.entry_value(&entry)?;
                Ok(Some((entry.key, value)))
            }
            None => Ok(None),
        }
    }

    /// Fetch many keys at once; missing keys are skipped.
    pub fn multi_get(&mut self, keys: &[Vec<u8>]) -> Result<Vec<KvPair>, ShoalError> {
        let mut out = Vec::new();
        for key in keys {
            if let Some(value) = self.get(key)? {
                out.push((key.clone(), value));
            }
        }
        Ok(out)
    }
}
