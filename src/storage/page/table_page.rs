use crate::buffer::{PageId, PAGE_SIZE};
use crate::catalog::SchemaRef;
use crate::error::{ChalkError, ChalkResult};
use crate::storage::codec::TupleCodec;
use crate::storage::tuple::Tuple;
use std::fmt::{Display, Formatter};

pub const INVALID_RID: RecordId = RecordId {
    page_id: crate::buffer::INVALID_PAGE_ID,
    slot_num: 0,
};

/// Identifies a tuple slot in the table heap; opaque to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl RecordId {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.page_id, self.slot_num)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TupleMeta {
    pub is_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleInfo {
    pub offset: u16,
    pub size: u16,
    pub meta: TupleMeta,
}

/**
 * Slotted page format:
 * ```text
 *  ---------------------------------------------------------
 * | HEADER | ... FREE SPACE ... | ... INSERTED TUPLES ... |
 *  ---------------------------------------------------------
 *                               ^ free space pointer
 * ```
 *
 * Header format:
 * ```text
 *  ----------------------------------------------------------------------
 * | NextPageId (4) | NumTuples (2) | Slot_1 {offset (2), size (2),
 * | deleted (1)} | Slot_2 {..} | ... |
 *  ----------------------------------------------------------------------
 * ```
 */
#[derive(Debug, Clone, PartialEq)]
pub struct TablePage {
    pub schema: SchemaRef,
    pub header: TablePageHeader,
    pub data: [u8; PAGE_SIZE],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePageHeader {
    pub next_page_id: PageId,
    pub num_tuples: u16,
    pub tuple_infos: Vec<TupleInfo>,
}

pub const TABLE_PAGE_HEADER_BASE_SIZE: usize = 4 + 2;
pub const TABLE_PAGE_SLOT_SIZE: usize = 2 + 2 + 1;

impl TablePage {
    pub fn new(schema: SchemaRef, next_page_id: PageId) -> Self {
        Self {
            schema,
            header: TablePageHeader {
                next_page_id,
                num_tuples: 0,
                tuple_infos: Vec::new(),
            },
            data: [0; PAGE_SIZE],
        }
    }

    /// Offset the next tuple would be written at, or an error when the page
    /// is full.
    pub fn next_tuple_offset(&self, tuple: &Tuple) -> ChalkResult<usize> {
        let tuple_size = TupleCodec::encoded_size(&tuple.schema);
        let slot_end = match self.header.tuple_infos.last() {
            Some(info) => info.offset as usize,
            None => PAGE_SIZE,
        };
        let offset = slot_end.checked_sub(tuple_size).ok_or_else(|| {
            ChalkError::Storage("Tuple does not fit in an empty page".to_string())
        })?;
        let header_end = TABLE_PAGE_HEADER_BASE_SIZE
            + (self.header.num_tuples as usize + 1) * TABLE_PAGE_SLOT_SIZE;
        if offset < header_end {
            return Err(ChalkError::Storage("Table page is full".to_string()));
        }
        Ok(offset)
    }

    pub fn insert_tuple(&mut self, meta: TupleMeta, tuple: &Tuple) -> ChalkResult<u16> {
        let offset = self.next_tuple_offset(tuple)?;
        let encoded = TupleCodec::encode(tuple);
        self.data[offset..offset + encoded.len()].copy_from_slice(&encoded);
        self.header.tuple_infos.push(TupleInfo {
            offset: offset as u16,
            size: encoded.len() as u16,
            meta,
        });
        self.header.num_tuples += 1;
        Ok(self.header.num_tuples - 1)
    }

    pub fn get_tuple(&self, slot_num: u16) -> ChalkResult<(TupleMeta, Tuple)> {
        let info = self.tuple_info(slot_num)?;
        let start = info.offset as usize;
        let end = start + info.size as usize;
        let (tuple, _) = TupleCodec::decode(&self.data[start..end], self.schema.clone())?;
        Ok((info.meta, tuple))
    }

    /// Overwrite a tuple in place. All tuples of a schema are the same fixed
    /// width, so the slot always fits.
    pub fn update_tuple(&mut self, slot_num: u16, tuple: &Tuple) -> ChalkResult<()> {
        let info = self.tuple_info(slot_num)?.clone();
        let encoded = TupleCodec::encode(tuple);
        debug_assert_eq!(encoded.len(), info.size as usize);
        let start = info.offset as usize;
        self.data[start..start + encoded.len()].copy_from_slice(&encoded);
        Ok(())
    }

    pub fn update_tuple_meta(&mut self, slot_num: u16, meta: TupleMeta) -> ChalkResult<()> {
        let num_tuples = self.header.num_tuples;
        let info = self
            .header
            .tuple_infos
            .get_mut(slot_num as usize)
            .ok_or_else(|| {
                ChalkError::Storage(format!("Slot {slot_num} out of range {num_tuples}"))
            })?;
        info.meta = meta;
        Ok(())
    }

    fn tuple_info(&self, slot_num: u16) -> ChalkResult<&TupleInfo> {
        self.header
            .tuple_infos
            .get(slot_num as usize)
            .ok_or_else(|| {
                ChalkError::Storage(format!(
                    "Slot {slot_num} out of range {}",
                    self.header.num_tuples
                ))
            })
    }
}
