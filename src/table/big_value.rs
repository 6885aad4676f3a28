//! Values too big for a table page: checksummed segment chains across
//! value pages.

use log::{debug, error};

use crate::{
    error::{ErrorKind, ShoalError},
    page::{BigValueRef, PageRef, ValueElement, ELEMENT_BASE, SEGMENT_HEAD_SIZE},
    types::ShoalResult,
};

use super::{space::PageKind, TableHandle};

/// Don't bother with pages offering less segment payload than this.
const MIN_SEGMENT: usize = 16;

/// Tombstone share of a value page that triggers arrangement.
const ARRANGE_DIVISOR: usize = 4;

fn crc_of(value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(value);
    hasher.finalize()
}

impl<'a> TableHandle<'a> {
    /// Biggest payload a segment on a fresh page can carry.
    fn max_segment(&self) -> usize {
        self.page_size - ELEMENT_BASE as usize - ValueElement::SIZE - SEGMENT_HEAD_SIZE
    }

    /// Split `value` into linked segments over value pages and return
    /// the descriptor to store inline.
    pub(crate) fn big_value_new(&mut self, value: &[u8]) -> Result<BigValueRef, ShoalError> {
        let crc = crc_of(value);
        let mut head_ref = PageRef::null();
        let mut prev_ref = PageRef::null();
        let mut remaining = value;

        while !remaining.is_empty() {
            let want = remaining.len().min(self.max_segment());
            let min_need = ValueElement::SIZE + SEGMENT_HEAD_SIZE + want.min(MIN_SEGMENT);

            let page_addr = match self.find_page_with_space(PageKind::Value, min_need)? {
                Some((addr, _)) => addr,
                None => self.create_data_page(PageKind::Value)?,
            };

            let avail = self.page_head_of(page_addr)?.space_length as usize;
            let seg_len = remaining
                .len()
                .min(avail - ValueElement::SIZE - SEGMENT_HEAD_SIZE);

            let slot_off = self.alloc_value_slot(page_addr)?;
            let rec_off = self.alloc_payload_space(page_addr, SEGMENT_HEAD_SIZE + seg_len)?;
            self.cache()
                .write_record(PageRef::new(page_addr, rec_off), &(seg_len as u32))?;
            self.cache().write_bytes(
                PageRef::new(page_addr, rec_off + SEGMENT_HEAD_SIZE as u16),
                &remaining[..seg_len],
            )?;

            let slot_ref = PageRef::new(page_addr, slot_off);
            self.cache().write_record(
                slot_ref,
                &ValueElement {
                    prev_page: prev_ref.addr,
                    prev_offset: prev_ref.offset,
                    next_page: 0,
                    next_offset: 0,
                    value_offset: rec_off,
                },
            )?;

            if prev_ref.is_null() {
                head_ref = slot_ref;
            } else {
                let mut prev: ValueElement = self.cache().read_record(prev_ref)?;
                prev.next_page = page_addr;
                prev.next_offset = slot_off;
                self.cache().write_record(prev_ref, &prev)?;
            }

            let mut head = self.page_head_of(page_addr)?;
            head.element_count += 1;
            self.write_page_head(page_addr, &head)?;
            self.update_using_slot(page_addr)?;

            prev_ref = slot_ref;
            remaining = &remaining[seg_len..];
        }

        debug!(
            "big value of {} bytes written from {:?}",
            value.len(),
            head_ref
        );
        Ok(BigValueRef {
            value_page: head_ref.addr,
            value_offset: head_ref.offset,
            all_size: value.len() as u32,
            crc,
        })
    }

    /// Reassemble a chain and verify it against the descriptor.
    pub(crate) fn big_value_get(&mut self, big: &BigValueRef) -> Result<Vec<u8>, ShoalError> {
        let mut out = Vec::with_capacity(big.all_size as usize);
        let mut cur = PageRef::new(big.value_page, big.value_offset);

        while !cur.is_null() {
            let elem: ValueElement = self.cache().read_record(cur)?;
            let size: u32 = self
                .cache()
                .read_record(PageRef::new(cur.addr, elem.value_offset))?;
            let bytes = self.cache().read_bytes(
                PageRef::new(cur.addr, elem.value_offset + SEGMENT_HEAD_SIZE as u16),
                size as usize,
            )?;
            out.extend_from_slice(&bytes);
            cur = PageRef::new(elem.next_page, elem.next_offset);
        }

        if out.len() != big.all_size as usize || crc_of(&out) != big.crc {
            error!(
                "big value checksum failed: {} bytes read, {} expected",
                out.len(),
                big.all_size
            );
            return Err(ShoalError::new(
                ErrorKind::CrcMismatch,
                "big value failed its checksum",
            ));
        }
        Ok(out)
    }

    /// Walk a chain and reclaim every segment.
    pub(crate) fn big_value_del(&mut self, big: &BigValueRef) -> ShoalResult {
        let mut cur = PageRef::new(big.value_page, big.value_offset);

        while !cur.is_null() {
            let elem: ValueElement = self.cache().read_record(cur)?;
            let next = PageRef::new(elem.next_page, elem.next_offset);
            let size: u32 = self
                .cache()
                .read_record(PageRef::new(cur.addr, elem.value_offset))?;
            let total = (SEGMENT_HEAD_SIZE + size as usize) as u16;

            self.cache()
                .write_record(cur, &ValueElement::default())?;

            let mut head = self.page_head_of(cur.addr)?;
            head.element_count -= 1;
            loop {
                if head.slot_high == 0 {
                    break;
                }
                let top_off = ELEMENT_BASE + (head.slot_high - 1) * ValueElement::SIZE as u16;
                let top: ValueElement = self.cache().read_record(PageRef::new(cur.addr, top_off))?;
                if !top.is_free() {
                    break;
                }
                head.slot_high -= 1;
                head.space_addr -= ValueElement::SIZE as u16;
                head.space_length += ValueElement::SIZE as u16;
            }

            self.cache().write_bytes(
                PageRef::new(cur.addr, elem.value_offset),
                &vec![0u8; total as usize],
            )?;
            if elem.value_offset == head.space_addr + head.space_length {
                head.space_length += total;
            } else {
                head.del_size += total;
            }
            self.write_page_head(cur.addr, &head)?;

            if head.element_count == 0 {
                self.free_data_page(PageKind::Value, cur.addr)?;
            } else {
                self.update_using_slot(cur.addr)?;
                if head.del_size as usize * ARRANGE_DIVISOR >= self.page_size {
                    self.arrange_value_page(cur.addr)?;
                }
            }

            cur = next;
        }
        Ok(())
    }
}
