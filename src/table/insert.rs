//! Insert-side operations: `set`, `set_if_no_exist`, `multi_set`,
//! `rename`, and the shared tower-stitching path.

use log::debug;
use rand::Rng;

use crate::{
    error::ShoalError,
    page::{PageRef, TableElement, TableKey, ValueType, SKIPLIST_MAX_LEVEL},
    types::ShoalResult,
    utils::readable_key,
};

use super::{space::PageKind, FindMode, TableHandle};

/// Geometric tower height: promote with probability one half, capped
/// at the level count.
fn random_level() -> usize {
    let mut rng = rand::thread_rng();
    let mut level = 1;
    while level < SKIPLIST_MAX_LEVEL && rng.gen::<bool>() {
        level += 1;
    }
    level
}

impl<'a> TableHandle<'a> {
    /// Room left on a fresh page once a worst-case tower and the key
    /// record head are accounted for.
    fn key_budget(&self) -> usize {
        self.page_size
            - crate::page::ELEMENT_BASE as usize
            - SKIPLIST_MAX_LEVEL * TableElement::SIZE
            - TableKey::SIZE
    }

    /// Bind `key` to `value`, replacing any previous binding.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> ShoalResult {
        if self.locate(key)?.is_some() {
            self.del(key)?;
        }
        self.insert_value(key, value)
    }

    /// Bind `key` to `value` only when the key is absent; reports
    /// whether an insert happened.
    pub fn set_if_no_exist(&mut self, key: &[u8], value: &[u8]) -> Result<bool, ShoalError> {
        if self.locate(key)?.is_some() {
            return Ok(false);
        }
        self.insert_value(key, value)?;
        Ok(true)
    }

    pub fn multi_set(&mut self, pairs: &[(Vec<u8>, Vec<u8>)]) -> ShoalResult {
        for (key, value) in pairs {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Move a binding to a new key in one call. Out-of-page payloads
    /// (big-value chains, nested sets) are transferred by descriptor,
    /// never re-allocated.
    pub fn rename(&mut self, old_key: &[u8], new_key: &[u8]) -> Result<bool, ShoalError> {
        if old_key == new_key {
            return Ok(self.locate(old_key)?.is_some());
        }
        let located = match self.locate(old_key)? {
            Some(located) => located,
            None => return Ok(false),
        };
        let value_type = located.key.value_type;
        let raw = self.raw_value_bytes_of(
            located.elem_ref.addr,
            located.elem.key_offset,
            &located.key,
        )?;

        if self.locate(new_key)?.is_some() {
            self.del(new_key)?;
        }
        // `located` may have gone stale, delete by key
        self.del_entry_by_key(old_key, false)?;
        self.insert_new(new_key, &raw, value_type)?;
        Ok(true)
    }

    fn insert_value(&mut self, key: &[u8], value: &[u8]) -> ShoalResult {
        if key.len() >= self.key_budget() {
            return Err(ShoalError::new(
                crate::error::ErrorKind::Corrupt,
                &format!("key of {} bytes cannot fit a page", key.len()),
            ));
        }
        if value.len() > self.key_budget() - key.len() {
            let big = self.big_value_new(value)?;
            let descriptor = crate::io::Encodeable::encode(&big);
            self.insert_new(key, &descriptor, ValueType::BigValue)
        } else {
            self.insert_new(key, value, ValueType::Normal)
        }
    }

    /// Insert a fresh entry; the key must not exist and the payload
    /// must fit a page next to a worst-case tower.
    pub(crate) fn insert_new(
        &mut self,
        key: &[u8],
        payload: &[u8],
        value_type: ValueType,
    ) -> ShoalResult {
        if key.len() + payload.len() > self.key_budget() {
            return Err(ShoalError::new(
                crate::error::ErrorKind::Corrupt,
                &format!(
                    "record of {} bytes cannot fit a page",
                    key.len() + payload.len()
                ),
            ));
        }
        let level = random_level();
        let points = self.find_points(Some(key), FindMode::Prev)?;

        let key_total = TableKey::SIZE + key.len() + payload.len();
        let required = level * TableElement::SIZE + key_total;

        let page_addr = match self.find_page_with_space(PageKind::Table, required)? {
            Some((addr, _)) => addr,
            None => self.create_data_page(PageKind::Table)?,
        };

        let slots = self.alloc_element_slots(page_addr, level)?;
        let key_off = self.alloc_payload_space(page_addr, key_total)?;

        // key record, with the level-0 back-link
        let prev_is_head = points[0].elem.key_offset == 0;
        let key_head = TableKey {
            prev_page: if prev_is_head {
                0
            } else {
                points[0].elem_ref.addr
            },
            prev_offset: if prev_is_head {
                0
            } else {
                points[0].elem_ref.offset
            },
            value_type,
            key_size: key.len() as u16,
            value_size: payload.len() as u32,
        };
        self.cache()
            .write_record(PageRef::new(page_addr, key_off), &key_head)?;
        self.cache()
            .write_bytes(PageRef::new(page_addr, key_off + TableKey::SIZE as u16), key)?;
        self.cache().write_bytes(
            PageRef::new(page_addr, key_off + (TableKey::SIZE + key.len()) as u16),
            payload,
        )?;

        // stitch the tower bottom-up, patching one predecessor per level
        for i in 0..level {
            let elem = TableElement {
                level: i as u8,
                high_offset: if i + 1 < level { slots[i + 1] } else { 0 },
                low_offset: if i > 0 { slots[i - 1] } else { 0 },
                next_page: points[i].elem.next_page,
                next_offset: points[i].elem.next_offset,
                key_offset: key_off,
            };
            self.write_elem(PageRef::new(page_addr, slots[i]), &elem)?;

            let mut pred = self.read_elem(points[i].elem_ref)?;
            pred.next_page = page_addr;
            pred.next_offset = slots[i];
            self.write_elem(points[i].elem_ref, &pred)?;
        }

        // level-0 successor back-link
        let succ = PageRef::new(points[0].elem.next_page, points[0].elem.next_offset);
        if !succ.is_null() {
            let succ_elem = self.read_elem(succ)?;
            let mut succ_key = self.key_head_of(succ.addr, succ_elem.key_offset)?;
            succ_key.prev_page = page_addr;
            succ_key.prev_offset = slots[0];
            self.cache()
                .write_record(PageRef::new(succ.addr, succ_elem.key_offset), &succ_key)?;
        }

        let mut page_head = self.page_head_of(page_addr)?;
        page_head.element_count += level as u16;
        self.write_page_head(page_addr, &page_head)?;
        self.update_using_slot(page_addr)?;

        debug!(
            "insert {} ({} bytes, tower {}) into page {}",
            readable_key(key),
            payload.len(),
            level,
            page_addr
        );
        Ok(())
    }
}
