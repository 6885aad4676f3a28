//! On-page record formats. Every struct here maps to a little-endian
//! byte layout with a `SIZE` constant; the page math in the table and
//! disk modules depends on these sizes staying exact.

use std::io::Read;

use crate::io::{read_into, Decodeable, Encodeable, ShoalWriter};

use super::SKIPLIST_MAX_LEVEL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCategory {
    FileHead,
    Table,
    TableUsing,
    Value,
    ValueUsing,
}

impl PageCategory {
    pub fn to_u8(&self) -> u8 {
        match self {
            PageCategory::FileHead => 0,
            PageCategory::Table => 1,
            PageCategory::TableUsing => 2,
            PageCategory::Value => 3,
            PageCategory::ValueUsing => 4,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(PageCategory::FileHead),
            1 => Some(PageCategory::Table),
            2 => Some(PageCategory::TableUsing),
            3 => Some(PageCategory::Value),
            4 => Some(PageCategory::ValueUsing),
            _ => None,
        }
    }
}

impl Encodeable for PageCategory {
    fn encode(&self) -> Vec<u8> {
        vec![self.to_u8()]
    }
}

impl Decodeable for PageCategory {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        let v: u8 = read_into(reader);
        PageCategory::from_u8(v).expect("invalid page category byte")
    }
}

/// Head of every page.
#[derive(Debug, Clone, Copy)]
pub struct PageHead {
    pub addr: u32,
    pub prev_page: u32,
    pub next_page: u32,
    pub category: PageCategory,
}

impl PageHead {
    pub const SIZE: usize = 13;
}

impl Encodeable for PageHead {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ShoalWriter::new();
        writer.write(&self.addr);
        writer.write(&self.prev_page);
        writer.write(&self.next_page);
        writer.write(&self.category);
        writer.to_bytes()
    }
}

impl Decodeable for PageHead {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        Self {
            addr: read_into(reader),
            prev_page: read_into(reader),
            next_page: read_into(reader),
            category: read_into(reader),
        }
    }
}

/// Space bookkeeping shared by table and value pages. Element slots
/// grow upward from [`ELEMENT_BASE`], payload records grow downward
/// from the page end, and `[space_addr, space_addr + space_length)` is
/// the zeroed gap between them.
#[derive(Debug, Clone, Copy)]
pub struct TablePageHead {
    /// Live element slots on this page.
    pub element_count: u16,
    /// High-water slot count; slots below it may be free (zeroed).
    pub slot_high: u16,
    pub space_addr: u16,
    pub space_length: u16,
    /// Tombstoned payload bytes, reclaimed by arrangement.
    pub del_size: u16,
    pub using_page: u32,
    pub using_offset: u16,
}

impl TablePageHead {
    pub const SIZE: usize = 16;
    /// Offset of this head on a data page.
    pub const OFFSET: u16 = PageHead::SIZE as u16;
}

/// First usable byte on a table or value page.
pub const ELEMENT_BASE: u16 = (PageHead::SIZE + TablePageHead::SIZE) as u16;

impl Encodeable for TablePageHead {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ShoalWriter::new();
        writer.write(&self.element_count);
        writer.write(&self.slot_high);
        writer.write(&self.space_addr);
        writer.write(&self.space_length);
        writer.write(&self.del_size);
        writer.write(&self.using_page);
        writer.write(&self.using_offset);
        writer.to_bytes()
    }
}

impl Decodeable for TablePageHead {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        Self {
            element_count: read_into(reader),
            slot_high: read_into(reader),
            space_addr: read_into(reader),
            space_length: read_into(reader),
            del_size: read_into(reader),
            using_page: read_into(reader),
            using_offset: read_into(reader),
        }
    }
}

/// One level of a skiplist tower. A key of tower height `h` owns `h`
/// consecutive-by-link elements with `level` 0..h, all on the same page
/// as its key record, stitched through `high_offset`/`low_offset`.
/// `key_offset == 0` marks a free slot; it also identifies the level
/// heads embedded in a [`TableInFile`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TableElement {
    pub level: u8,
    pub high_offset: u16,
    pub low_offset: u16,
    pub next_page: u32,
    pub next_offset: u16,
    pub key_offset: u16,
}

impl TableElement {
    pub const SIZE: usize = 13;

    pub fn is_free(&self) -> bool {
        self.key_offset == 0
    }
}

impl Encodeable for TableElement {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ShoalWriter::new();
        writer.write(&self.level);
        writer.write(&self.high_offset);
        writer.write(&self.low_offset);
        writer.write(&self.next_page);
        writer.write(&self.next_offset);
        writer.write(&self.key_offset);
        writer.to_bytes()
    }
}

impl Decodeable for TableElement {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        Self {
            level: read_into(reader),
            high_offset: read_into(reader),
            low_offset: read_into(reader),
            next_page: read_into(reader),
            next_offset: read_into(reader),
            key_offset: read_into(reader),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Normal,
    BigValue,
    SetHead,
}

impl Encodeable for ValueType {
    fn encode(&self) -> Vec<u8> {
        let v = match self {
            ValueType::Normal => 0u8,
            ValueType::BigValue => 1,
            ValueType::SetHead => 2,
        };
        vec![v]
    }
}

impl Decodeable for ValueType {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        match read_into::<u8, R>(reader) {
            0 => ValueType::Normal,
            1 => ValueType::BigValue,
            2 => ValueType::SetHead,
            v => panic!("invalid value type byte {}", v),
        }
    }
}

/// Header of a key record; key then value bytes follow it directly.
/// `prev_page`/`prev_offset` is the level-0 back-link to the
/// predecessor element, null for the first key of the table.
#[derive(Debug, Clone, Copy)]
pub struct TableKey {
    pub prev_page: u32,
    pub prev_offset: u16,
    pub value_type: ValueType,
    pub key_size: u16,
    pub value_size: u32,
}

impl TableKey {
    pub const SIZE: usize = 13;

    pub fn total_size(&self) -> usize {
        Self::SIZE + self.key_size as usize + self.value_size as usize
    }
}

impl Encodeable for TableKey {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ShoalWriter::new();
        writer.write(&self.prev_page);
        writer.write(&self.prev_offset);
        writer.write(&self.value_type);
        writer.write(&self.key_size);
        writer.write(&self.value_size);
        writer.to_bytes()
    }
}

impl Decodeable for TableKey {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        Self {
            prev_page: read_into(reader),
            prev_offset: read_into(reader),
            value_type: read_into(reader),
            key_size: read_into(reader),
            value_size: read_into(reader),
        }
    }
}

/// Stored as the value payload of a `ValueType::BigValue` key: where
/// the segment chain starts, how long the whole payload is, and its
/// checksum.
#[derive(Debug, Clone, Copy)]
pub struct BigValueRef {
    pub value_page: u32,
    pub value_offset: u16,
    pub all_size: u32,
    pub crc: u32,
}

impl BigValueRef {
    pub const SIZE: usize = 14;
}

impl Encodeable for BigValueRef {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ShoalWriter::new();
        writer.write(&self.value_page);
        writer.write(&self.value_offset);
        writer.write(&self.all_size);
        writer.write(&self.crc);
        writer.to_bytes()
    }
}

impl Decodeable for BigValueRef {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        Self {
            value_page: read_into(reader),
            value_offset: read_into(reader),
            all_size: read_into(reader),
            crc: read_into(reader),
        }
    }
}

/// Slot on a value page. The payload record at `value_offset` is a
/// `u32` length followed by the segment bytes. `value_offset == 0`
/// marks a free slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueElement {
    pub prev_page: u32,
    pub prev_offset: u16,
    pub next_page: u32,
    pub next_offset: u16,
    pub value_offset: u16,
}

impl ValueElement {
    pub const SIZE: usize = 15;

    pub fn is_free(&self) -> bool {
        self.value_offset == 0
    }
}

impl Encodeable for ValueElement {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ShoalWriter::new();
        writer.write(&self.prev_page);
        writer.write(&self.prev_offset);
        writer.write(&self.next_page);
        writer.write(&self.next_offset);
        writer.write(&self.value_offset);
        writer.to_bytes()
    }
}

impl Decodeable for ValueElement {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        Self {
            prev_page: read_into(reader),
            prev_offset: read_into(reader),
            next_page: read_into(reader),
            next_offset: read_into(reader),
            value_offset: read_into(reader),
        }
    }
}

/// Byte length prefix of a big-value segment record.
pub const SEGMENT_HEAD_SIZE: usize = 4;

/// Head of a using page: a free-space summary over the data pages of
/// one category.
#[derive(Debug, Clone, Copy)]
pub struct UsingPageHead {
    pub using_length: u16,
    pub using_size: u16,
    pub all_space: u32,
}

impl UsingPageHead {
    pub const SIZE: usize = 8;
    pub const OFFSET: u16 = PageHead::SIZE as u16;
}

/// First slot byte on a using page.
pub const USING_BASE: u16 = (PageHead::SIZE + UsingPageHead::SIZE) as u16;

impl Encodeable for UsingPageHead {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ShoalWriter::new();
        writer.write(&self.using_length);
        writer.write(&self.using_size);
        writer.write(&self.all_space);
        writer.to_bytes()
    }
}

impl Decodeable for UsingPageHead {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        Self {
            using_length: read_into(reader),
            using_size: read_into(reader),
            all_space: read_into(reader),
        }
    }
}

/// One free-space summary entry. `page_addr == 0` marks a free slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsingSlot {
    pub page_addr: u32,
    pub space_length: u16,
}

impl UsingSlot {
    pub const SIZE: usize = 6;
}

impl Encodeable for UsingSlot {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ShoalWriter::new();
        writer.write(&self.page_addr);
        writer.write(&self.space_length);
        writer.to_bytes()
    }
}

impl Decodeable for UsingSlot {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        Self {
            page_addr: read_into(reader),
            space_length: read_into(reader),
        }
    }
}

/// Rendering hint used by the JSON dumps; `Byte` and the rest are
/// interchangeable at the binary layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableType {
    Byte,
    Double,
    String,
    Set,
}

impl TableType {
    pub fn to_u8(&self) -> u8 {
        match self {
            TableType::Byte => 0,
            TableType::Double => 1,
            TableType::String => 2,
            TableType::Set => 3,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(TableType::Byte),
            1 => Some(TableType::Double),
            2 => Some(TableType::String),
            3 => Some(TableType::Set),
            _ => None,
        }
    }
}

impl Encodeable for TableType {
    fn encode(&self) -> Vec<u8> {
        vec![self.to_u8()]
    }
}

impl Decodeable for TableType {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        let v: u8 = read_into(reader);
        TableType::from_u8(v).expect("invalid table type byte")
    }
}

/// The persistent face of a table: the skiplist level heads plus the
/// four page-list roots. Lives either in a file-head directory entry
/// (top-level table) or inline as the value of a `SetHead` key (nested
/// set).
#[derive(Debug, Clone, Copy)]
pub struct TableInFile {
    pub table_type: TableType,
    pub is_set_head: bool,
    pub head: [TableElement; SKIPLIST_MAX_LEVEL],
    pub table_page: u32,
    pub table_using_page: u32,
    pub value_page: u32,
    pub value_using_page: u32,
}

impl TableInFile {
    pub const SIZE: usize = 2 + SKIPLIST_MAX_LEVEL * TableElement::SIZE + 16;

    /// Byte offset of the level heads inside the record.
    pub const HEAD_OFFSET: u16 = 2;

    pub fn empty(table_type: TableType, is_set_head: bool) -> Self {
        let mut head = [TableElement::default(); SKIPLIST_MAX_LEVEL];
        for (i, elem) in head.iter_mut().enumerate() {
            elem.level = i as u8;
        }
        Self {
            table_type,
            is_set_head,
            head,
            table_page: 0,
            table_using_page: 0,
            value_page: 0,
            value_using_page: 0,
        }
    }

    /// Offset of the level-`level` head element, relative to the start
    /// of the record.
    pub fn head_elem_offset(level: usize) -> u16 {
        Self::HEAD_OFFSET + (level * TableElement::SIZE) as u16
    }

    pub fn is_empty(&self) -> bool {
        self.table_page == 0
    }
}

impl Encodeable for TableInFile {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ShoalWriter::new();
        writer.write(&self.table_type);
        writer.write(&self.is_set_head);
        for elem in self.head.iter() {
            writer.write(elem);
        }
        writer.write(&self.table_page);
        writer.write(&self.table_using_page);
        writer.write(&self.value_page);
        writer.write(&self.value_using_page);
        writer.to_bytes()
    }
}

impl Decodeable for TableInFile {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        let table_type = read_into(reader);
        let is_set_head = read_into(reader);
        let mut head = [TableElement::default(); SKIPLIST_MAX_LEVEL];
        for elem in head.iter_mut() {
            *elem = read_into(reader);
        }
        Self {
            table_type,
            is_set_head,
            head,
            table_page: read_into(reader),
            table_using_page: read_into(reader),
            value_page: read_into(reader),
            value_using_page: read_into(reader),
        }
    }
}
