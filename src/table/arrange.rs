//! Page arrangement: close the tombstone gaps by sliding live payload
//! records toward the page end. Links between pages never change,
//! they reference elements and elements do not move.

use itertools::Itertools;
use log::debug;

use crate::{
    page::{PageRef, TableElement, TableKey, ValueElement, ELEMENT_BASE, SEGMENT_HEAD_SIZE},
    types::ShoalResult,
};

use super::TableHandle;

impl<'a> TableHandle<'a> {
    /// Compact a table page. Live key records are visited in
    /// descending `key_offset` order and slid upward; every element of
    /// the affected tower gets its `key_offset` rewritten.
    pub(crate) fn arrange_table_page(&mut self, addr: u32) -> ShoalResult {
        let head = self.page_head_of(addr)?;

        let mut bases = Vec::new();
        for i in 0..head.slot_high {
            let off = ELEMENT_BASE + i * TableElement::SIZE as u16;
            let elem = self.read_elem(PageRef::new(addr, off))?;
            if !elem.is_free() && elem.level == 0 {
                bases.push((off, elem.key_offset));
            }
        }
        let bases = bases
            .into_iter()
            .sorted_by_key(|(_, key_off)| std::cmp::Reverse(*key_off))
            .collect::<Vec<_>>();

        let mut write_ptr = self.page_size as u16;
        for (slot_off, key_off) in bases {
            let key: TableKey = self.cache().read_record(PageRef::new(addr, key_off))?;
            let total = key.total_size() as u16;
            let new_off = write_ptr - total;
            if new_off != key_off {
                let page = self.cache().copy_on_write(addr)?;
                page.move_bytes(key_off, new_off, total as usize);

                let mut cur = slot_off;
                loop {
                    let mut elem = self.read_elem(PageRef::new(addr, cur))?;
                    elem.key_offset = new_off;
                    self.write_elem(PageRef::new(addr, cur), &elem)?;
                    if elem.high_offset == 0 {
                        break;
                    }
                    cur = elem.high_offset;
                }
            }
            write_ptr = new_off;
        }

        let mut head = self.page_head_of(addr)?;
        head.space_length = write_ptr - head.space_addr;
        head.del_size = 0;
        self.write_page_head(addr, &head)?;

        let page = self.cache().copy_on_write(addr)?;
        page.zero_range(head.space_addr, head.space_length as usize);

        self.update_using_slot(addr)?;
        debug!("arranged table page {}", addr);
        Ok(())
    }

    /// Compact a value page: same sweep over segment records, with the
    /// owning slot's `value_offset` as the only pointer to rewrite.
    pub(crate) fn arrange_value_page(&mut self, addr: u32) -> ShoalResult {
        let head = self.page_head_of(addr)?;

        let mut slots = Vec::new();
        for i in 0..head.slot_high {
            let off = ELEMENT_BASE + i * ValueElement::SIZE as u16;
            let elem: ValueElement = self.cache().read_record(PageRef::new(addr, off))?;
            if !elem.is_free() {
                slots.push((off, elem.value_offset));
            }
        }
        let slots = slots
            .into_iter()
            .sorted_by_key(|(_, rec_off)| std::cmp::Reverse(*rec_off))
            .collect::<Vec<_>>();

        let mut write_ptr = self.page_size as u16;
        for (slot_off, rec_off) in slots {
            let size: u32 = self.cache().read_record(PageRef::new(addr, rec_off))?;
            let total = (SEGMENT_HEAD_SIZE + size as usize) as u16;
            let new_off = write_ptr - total;
            if new_off != rec_off {
                let page = self.cache().copy_on_write(addr)?;
                page.move_bytes(rec_off, new_off, total as usize);

                let slot_ref = PageRef::new(addr, slot_off);
                let mut elem: ValueElement = self.cache().read_record(slot_ref)?;
                elem.value_offset = new_off;
                self.cache().write_record(slot_ref, &elem)?;
            }
            write_ptr = new_off;
        }

        let mut head = self.page_head_of(addr)?;
        head.space_length = write_ptr - head.space_addr;
        head.del_size = 0;
        self.write_page_head(addr, &head)?;

        let page = self.cache().copy_on_write(addr)?;
        page.zero_range(head.space_addr, head.space_length as usize);

        self.update_using_slot(addr)?;
        debug!("arranged value page {}", addr);
        Ok(())
    }
}
