//! Delete-side operations: tower unlink, byte and slot reclamation,
//! recursive clears.

use log::debug;

use crate::{
    error::{ErrorKind, ShoalError},
    page::{
        BigValueRef, PageRef, TableElement, TableInFile, ValueType, ELEMENT_BASE,
    },
    types::ShoalResult,
    utils::readable_key,
};

use super::{space::PageKind, Located, TableHandle};

/// Tombstone share of a page that triggers arrangement.
const ARRANGE_DIVISOR: usize = 4;

impl<'a> TableHandle<'a> {
    /// Remove a key; reports whether it existed. Big-value chains are
    /// freed, nested sets are cleared recursively.
    pub fn del(&mut self, key: &[u8]) -> Result<bool, ShoalError> {
        self.del_entry_by_key(key, true)
    }

    pub(crate) fn del_entry_by_key(
        &mut self,
        key: &[u8],
        free_payload: bool,
    ) -> Result<bool, ShoalError> {
        let located = match self.locate(key)? {
            Some(located) => located,
            None => return Ok(false),
        };
        debug!("del {}", readable_key(key));
        self.del_located(located, free_payload)?;
        Ok(true)
    }

    fn del_located(&mut self, located: Located, free_payload: bool) -> ShoalResult {
        let page_addr = located.elem_ref.addr;
        let key_off = located.elem.key_offset;
        let value_off = Self::value_offset_of(key_off, &located.key);

        if free_payload {
            match located.key.value_type {
                ValueType::Normal => {}
                ValueType::BigValue => {
                    let big: BigValueRef =
                        self.cache().read_record(PageRef::new(page_addr, value_off))?;
                    self.big_value_del(&big)?;
                }
                ValueType::SetHead => {
                    let name = self.key_bytes_of(page_addr, key_off, &located.key)?;
                    let loc = PageRef::new(page_addr, value_off);
                    let mut nested = TableHandle::new(&mut *self.cache, name, loc);
                    nested.table_clear()?;
                }
            }
        }

        // the tower lives on one page, stitched through high_offset
        let mut tower = Vec::new();
        let mut cur_off = located.elem_ref.offset;
        loop {
            let elem = self.read_elem(PageRef::new(page_addr, cur_off))?;
            tower.push(cur_off);
            if elem.high_offset == 0 {
                break;
            }
            cur_off = elem.high_offset;
        }

        // skip over the target at every level it occupies
        for (i, tower_off) in tower.iter().enumerate() {
            let target = self.read_elem(PageRef::new(page_addr, *tower_off))?;
            let mut pred = self.read_elem(located.points[i].elem_ref)?;
            if pred.next_page != page_addr || pred.next_offset != *tower_off {
                return Err(ShoalError::new(
                    ErrorKind::Corrupt,
                    &format!(
                        "level {} predecessor does not link the deleted tower on page {}",
                        i, page_addr
                    ),
                ));
            }
            pred.next_page = target.next_page;
            pred.next_offset = target.next_offset;
            self.write_elem(located.points[i].elem_ref, &pred)?;
        }

        // level-0 successor inherits the recorded back-link
        let elem0 = located.elem;
        let succ = PageRef::new(elem0.next_page, elem0.next_offset);
        if !succ.is_null() {
            let succ_elem = self.read_elem(succ)?;
            let mut succ_key = self.key_head_of(succ.addr, succ_elem.key_offset)?;
            succ_key.prev_page = located.key.prev_page;
            succ_key.prev_offset = located.key.prev_offset;
            self.cache()
                .write_record(PageRef::new(succ.addr, succ_elem.key_offset), &succ_key)?;
        }

        // reclaim the element slots
        let mut head = self.page_head_of(page_addr)?;
        for tower_off in &tower {
            self.write_elem(PageRef::new(page_addr, *tower_off), &TableElement::default())?;
        }
        head.element_count -= tower.len() as u16;
        loop {
            if head.slot_high == 0 {
                break;
            }
            let top_off = ELEMENT_BASE + (head.slot_high - 1) * TableElement::SIZE as u16;
            let elem = self.read_elem(PageRef::new(page_addr, top_off))?;
            if !elem.is_free() {
                break;
            }
            head.slot_high -= 1;
            head.space_addr -= TableElement::SIZE as u16;
            head.space_length += TableElement::SIZE as u16;
        }

        // reclaim the key record bytes
        let total = located.key.total_size() as u16;
        self.cache().write_bytes(
            PageRef::new(page_addr, key_off),
            &vec![0u8; total as usize],
        )?;
        if key_off == head.space_addr + head.space_length {
            head.space_length += total;
        } else {
            head.del_size += total;
        }
        self.write_page_head(page_addr, &head)?;

        if head.element_count == 0 {
            self.free_data_page(PageKind::Table, page_addr)?;
        } else {
            self.update_using_slot(page_addr)?;
            if head.del_size as usize * ARRANGE_DIVISOR >= self.page_size {
                self.arrange_table_page(page_addr)?;
            }
        }
        Ok(())
    }

    /// Drop every key and hand every page of this table back to the
    /// block store. Nested sets clear first so their pages are not
    /// orphaned.
    pub fn table_clear(&mut self) -> ShoalResult {
        let mut cur = {
            let head = self.read_elem(self.head_ref(0))?;
            PageRef::new(head.next_page, head.next_offset)
        };
        while !cur.is_null() {
            let elem = self.read_elem(cur)?;
            let key_head = self.key_head_of(cur.addr, elem.key_offset)?;
            if key_head.value_type == ValueType::SetHead {
                let name = self.key_bytes_of(cur.addr, elem.key_offset, &key_head)?;
                let loc = PageRef::new(cur.addr, Self::value_offset_of(elem.key_offset, &key_head));
                let mut nested = TableHandle::new(&mut *self.cache, name, loc);
                nested.table_clear()?;
            }
            cur = PageRef::new(elem.next_page, elem.next_offset);
        }

        let tif = self.tif()?;
        for root in &[
            tif.table_page,
            tif.table_using_page,
            tif.value_page,
            tif.value_using_page,
        ] {
            let mut addr = *root;
            while addr != 0 {
                let next = self.cache().read_page_head(addr)?.next_page;
                self.cache().del_page(addr);
                addr = next;
            }
        }

        let fresh = TableInFile::empty(tif.table_type, tif.is_set_head);
        self.write_tif(&fresh)?;
        debug!("table {} cleared", readable_key(&self.name));
        Ok(())
    }
}
