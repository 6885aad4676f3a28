//! Space management: data-page allocation through the using-page
//! free-space summaries, element-slot and payload-byte carving inside
//! a page, and the unlink/free path when a page empties.

use log::debug;

use crate::{
    error::{ErrorKind, ShoalError},
    page::{
        PageCategory, PageRef, TableElement, TableInFile, TablePageHead, UsingPageHead, UsingSlot,
        ValueElement, ELEMENT_BASE, USING_BASE,
    },
    types::ShoalResult,
};

use super::TableHandle;

/// Which of a table's two page families is being worked on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum PageKind {
    Table,
    Value,
}

impl PageKind {
    pub(crate) fn data_category(&self) -> PageCategory {
        match self {
            PageKind::Table => PageCategory::Table,
            PageKind::Value => PageCategory::Value,
        }
    }

    pub(crate) fn using_category(&self) -> PageCategory {
        match self {
            PageKind::Table => PageCategory::TableUsing,
            PageKind::Value => PageCategory::ValueUsing,
        }
    }

    pub(crate) fn list_root(&self, tif: &TableInFile) -> u32 {
        match self {
            PageKind::Table => tif.table_page,
            PageKind::Value => tif.value_page,
        }
    }

    pub(crate) fn set_list_root(&self, tif: &mut TableInFile, addr: u32) {
        match self {
            PageKind::Table => tif.table_page = addr,
            PageKind::Value => tif.value_page = addr,
        }
    }

    pub(crate) fn using_root(&self, tif: &TableInFile) -> u32 {
        match self {
            PageKind::Table => tif.table_using_page,
            PageKind::Value => tif.value_using_page,
        }
    }

    pub(crate) fn set_using_root(&self, tif: &mut TableInFile, addr: u32) {
        match self {
            PageKind::Table => tif.table_using_page = addr,
            PageKind::Value => tif.value_using_page = addr,
        }
    }
}

pub(crate) fn using_capacity(page_size: usize) -> u16 {
    ((page_size - USING_BASE as usize) / UsingSlot::SIZE) as u16
}

impl<'a> TableHandle<'a> {
    pub(crate) fn page_head_of(&mut self, addr: u32) -> Result<TablePageHead, ShoalError> {
        self.cache()
            .read_record(PageRef::new(addr, TablePageHead::OFFSET))
    }

    pub(crate) fn write_page_head(&mut self, addr: u32, head: &TablePageHead) -> ShoalResult {
        self.cache()
            .write_record(PageRef::new(addr, TablePageHead::OFFSET), head)
    }

    /// Consult the free-space summaries for a data page with at least
    /// `required` contiguous bytes.
    pub(crate) fn find_page_with_space(
        &mut self,
        kind: PageKind,
        required: usize,
    ) -> Result<Option<(u32, u16)>, ShoalError> {
        let tif = self.tif()?;
        let mut using_addr = kind.using_root(&tif);

        while using_addr != 0 {
            let head: UsingPageHead = self
                .cache()
                .read_record(PageRef::new(using_addr, UsingPageHead::OFFSET))?;
            for i in 0..head.using_size {
                let slot_ref = PageRef::new(using_addr, USING_BASE + i * UsingSlot::SIZE as u16);
                let slot: UsingSlot = self.cache().read_record(slot_ref)?;
                if slot.page_addr != 0 && slot.space_length as usize >= required {
                    return Ok(Some((slot.page_addr, slot.space_length)));
                }
            }
            using_addr = self.cache().read_page_head(using_addr)?.next_page;
        }
        Ok(None)
    }

    /// Reserve a slot on some using page, creating a fresh using page
    /// when every existing one is full. The slot content stays zeroed;
    /// the caller fills it.
    fn alloc_using_slot(&mut self, kind: PageKind) -> Result<PageRef, ShoalError> {
        let capacity = using_capacity(self.page_size);
        let tif = self.tif()?;
        let mut using_addr = kind.using_root(&tif);

        while using_addr != 0 {
            let head_ref = PageRef::new(using_addr, UsingPageHead::OFFSET);
            let mut head: UsingPageHead = self.cache().read_record(head_ref)?;

            for i in 0..head.using_size {
                let slot_ref = PageRef::new(using_addr, USING_BASE + i * UsingSlot::SIZE as u16);
                let slot: UsingSlot = self.cache().read_record(slot_ref)?;
                if slot.page_addr == 0 {
                    return Ok(slot_ref);
                }
            }
            if head.using_size < capacity {
                let slot_ref =
                    PageRef::new(using_addr, USING_BASE + head.using_size * UsingSlot::SIZE as u16);
                head.using_size += 1;
                self.cache().write_record(head_ref, &head)?;
                return Ok(slot_ref);
            }
            using_addr = self.cache().read_page_head(using_addr)?.next_page;
        }

        // every summary page is full, chain a new one in front
        let addr = self.cache().create_page(kind.using_category())?;
        self.cache().write_record(
            PageRef::new(addr, UsingPageHead::OFFSET),
            &UsingPageHead {
                using_length: 0,
                using_size: 1,
                all_space: 0,
            },
        )?;

        let mut tif = self.tif()?;
        let old_root = kind.using_root(&tif);
        if old_root != 0 {
            let mut old_head = self.cache().read_page_head(old_root)?;
            old_head.prev_page = addr;
            self.cache().write_record(PageRef::new(old_root, 0), &old_head)?;
        }
        let mut new_head = self.cache().read_page_head(addr)?;
        new_head.next_page = old_root;
        self.cache().write_record(PageRef::new(addr, 0), &new_head)?;
        kind.set_using_root(&mut tif, addr);
        self.write_tif(&tif)?;

        Ok(PageRef::new(addr, USING_BASE))
    }

    /// Allocate and wire up a fresh data page: zeroed space head, a
    /// using slot describing it, and a spot at the head of the page
    /// list.
    pub(crate) fn create_data_page(&mut self, kind: PageKind) -> Result<u32, ShoalError> {
        let slot_ref = self.alloc_using_slot(kind)?;
        let addr = self.cache().create_page(kind.data_category())?;

        let space_length = (self.page_size - ELEMENT_BASE as usize) as u16;
        self.write_page_head(
            addr,
            &TablePageHead {
                element_count: 0,
                slot_high: 0,
                space_addr: ELEMENT_BASE,
                space_length,
                del_size: 0,
                using_page: slot_ref.addr,
                using_offset: slot_ref.offset,
            },
        )?;

        // front of the page list
        let mut tif = self.tif()?;
        let old_root = kind.list_root(&tif);
        if old_root != 0 {
            let mut old_head = self.cache().read_page_head(old_root)?;
            old_head.prev_page = addr;
            self.cache().write_record(PageRef::new(old_root, 0), &old_head)?;
        }
        let mut page_head = self.cache().read_page_head(addr)?;
        page_head.next_page = old_root;
        self.cache().write_record(PageRef::new(addr, 0), &page_head)?;
        kind.set_list_root(&mut tif, addr);
        self.write_tif(&tif)?;

        // describe it in the summary
        self.cache().write_record(
            slot_ref,
            &UsingSlot {
                page_addr: addr,
                space_length,
            },
        )?;
        let head_ref = PageRef::new(slot_ref.addr, UsingPageHead::OFFSET);
        let mut using_head: UsingPageHead = self.cache().read_record(head_ref)?;
        using_head.using_length += 1;
        using_head.all_space += space_length as u32;
        self.cache().write_record(head_ref, &using_head)?;

        debug!("new {:?} page {}", kind, addr);
        Ok(addr)
    }

    /// Re-sync a data page's using slot after its free space changed.
    pub(crate) fn update_using_slot(&mut self, data_addr: u32) -> ShoalResult {
        let page_head = self.page_head_of(data_addr)?;
        let slot_ref = PageRef::new(page_head.using_page, page_head.using_offset);
        let old: UsingSlot = self.cache().read_record(slot_ref)?;
        self.cache().write_record(
            slot_ref,
            &UsingSlot {
                page_addr: data_addr,
                space_length: page_head.space_length,
            },
        )?;

        let head_ref = PageRef::new(slot_ref.addr, UsingPageHead::OFFSET);
        let mut using_head: UsingPageHead = self.cache().read_record(head_ref)?;
        using_head.all_space =
            using_head.all_space - old.space_length as u32 + page_head.space_length as u32;
        self.cache().write_record(head_ref, &using_head)?;
        Ok(())
    }

    /// Unlink an emptied data page from its page list and its summary
    /// slot, collapsing the using page too when it empties, then hand
    /// the page back to the block store.
    pub(crate) fn free_data_page(&mut self, kind: PageKind, addr: u32) -> ShoalResult {
        let page_head = self.cache().read_page_head(addr)?;
        let space_head = self.page_head_of(addr)?;

        // page list unlink
        if page_head.prev_page != 0 {
            let prev_ref = PageRef::new(page_head.prev_page, 0);
            let mut prev = self.cache().read_page_head(page_head.prev_page)?;
            prev.next_page = page_head.next_page;
            self.cache().write_record(prev_ref, &prev)?;
        } else {
            let mut tif = self.tif()?;
            kind.set_list_root(&mut tif, page_head.next_page);
            self.write_tif(&tif)?;
        }
        if page_head.next_page != 0 {
            let next_ref = PageRef::new(page_head.next_page, 0);
            let mut next = self.cache().read_page_head(page_head.next_page)?;
            next.prev_page = page_head.prev_page;
            self.cache().write_record(next_ref, &next)?;
        }

        // summary slot release
        let slot_ref = PageRef::new(space_head.using_page, space_head.using_offset);
        let slot: UsingSlot = self.cache().read_record(slot_ref)?;
        self.cache().write_record(slot_ref, &UsingSlot::default())?;

        let head_ref = PageRef::new(space_head.using_page, UsingPageHead::OFFSET);
        let mut using_head: UsingPageHead = self.cache().read_record(head_ref)?;
        using_head.using_length -= 1;
        using_head.all_space -= slot.space_length as u32;
        self.cache().write_record(head_ref, &using_head)?;

        if using_head.using_length == 0 {
            self.free_using_page(kind, space_head.using_page)?;
        }

        self.cache().del_page(addr);
        debug!("freed {:?} page {}", kind, addr);
        Ok(())
    }

    fn free_using_page(&mut self, kind: PageKind, addr: u32) -> ShoalResult {
        let page_head = self.cache().read_page_head(addr)?;

        if page_head.prev_page != 0 {
            let mut prev = self.cache().read_page_head(page_head.prev_page)?;
            prev.next_page = page_head.next_page;
            self.cache()
                .write_record(PageRef::new(page_head.prev_page, 0), &prev)?;
        } else {
            let mut tif = self.tif()?;
            kind.set_using_root(&mut tif, page_head.next_page);
            self.write_tif(&tif)?;
        }
        if page_head.next_page != 0 {
            let mut next = self.cache().read_page_head(page_head.next_page)?;
            next.prev_page = page_head.prev_page;
            self.cache()
                .write_record(PageRef::new(page_head.next_page, 0), &next)?;
        }

        self.cache().del_page(addr);
        Ok(())
    }

    /// Grab `count` element slots on a table page: zeroed holes below
    /// the high-water mark first, fresh slots carved from the free gap
    /// after.
    pub(crate) fn alloc_element_slots(
        &mut self,
        addr: u32,
        count: usize,
    ) -> Result<Vec<u16>, ShoalError> {
        let mut head = self.page_head_of(addr)?;
        let mut slots = Vec::with_capacity(count);

        for i in 0..head.slot_high {
            if slots.len() == count {
                break;
            }
            let off = ELEMENT_BASE + i * TableElement::SIZE as u16;
            let elem: TableElement = self.cache().read_record(PageRef::new(addr, off))?;
            if elem.is_free() {
                slots.push(off);
            }
        }
        while slots.len() < count {
            if (head.space_length as usize) < TableElement::SIZE {
                return Err(ShoalError::new(
                    ErrorKind::Corrupt,
                    "element slot allocation past the free gap",
                ));
            }
            let off = ELEMENT_BASE + head.slot_high * TableElement::SIZE as u16;
            head.slot_high += 1;
            head.space_addr += TableElement::SIZE as u16;
            head.space_length -= TableElement::SIZE as u16;
            slots.push(off);
        }

        self.write_page_head(addr, &head)?;
        Ok(slots)
    }

    /// Same as [`alloc_element_slots`] for the value-page slot format.
    pub(crate) fn alloc_value_slot(&mut self, addr: u32) -> Result<u16, ShoalError> {
        let mut head = self.page_head_of(addr)?;

        for i in 0..head.slot_high {
            let off = ELEMENT_BASE + i * ValueElement::SIZE as u16;
            let elem: ValueElement = self.cache().read_record(PageRef::new(addr, off))?;
            if elem.is_free() {
                return Ok(off);
            }
        }
        if (head.space_length as usize) < ValueElement::SIZE {
            return Err(ShoalError::new(
                ErrorKind::Corrupt,
                "value slot allocation past the free gap",
            ));
        }
        let off = ELEMENT_BASE + head.slot_high * ValueElement::SIZE as u16;
        head.slot_high += 1;
        head.space_addr += ValueElement::SIZE as u16;
        head.space_length -= ValueElement::SIZE as u16;
        self.write_page_head(addr, &head)?;
        Ok(off)
    }

    /// Carve `total` payload bytes off the top of the free gap.
    pub(crate) fn alloc_payload_space(
        &mut self,
        addr: u32,
        total: usize,
    ) -> Result<u16, ShoalError> {
        let mut head = self.page_head_of(addr)?;
        if (head.space_length as usize) < total {
            return Err(ShoalError::new(
                ErrorKind::Corrupt,
                &format!(
                    "payload allocation of {} bytes does not fit {} free",
                    total, head.space_length
                ),
            ));
        }
        let off = head.space_addr + head.space_length - total as u16;
        head.space_length -= total as u16;
        self.write_page_head(addr, &head)?;
        Ok(off)
    }
}
