use crate::buffer::PAGE_SIZE;
use crate::catalog::SchemaRef;
use crate::error::{ChalkError, ChalkResult};
use crate::storage::codec::{CommonCodec, DecodedData, RidCodec, TupleCodec};
use crate::storage::page::{
    BPlusTreeInternalPage, BPlusTreeInternalPageHeader, BPlusTreeLeafPage,
    BPlusTreeLeafPageHeader, BPlusTreePage, BPlusTreePageType,
};

pub struct BPlusTreePageTypeCodec;

impl BPlusTreePageTypeCodec {
    pub fn encode(page_type: BPlusTreePageType) -> Vec<u8> {
        match page_type {
            BPlusTreePageType::LeafPage => CommonCodec::encode_u32(1),
            BPlusTreePageType::InternalPage => CommonCodec::encode_u32(2),
        }
    }

    pub fn decode(bytes: &[u8]) -> ChalkResult<DecodedData<BPlusTreePageType>> {
        let (flag, offset) = CommonCodec::decode_u32(bytes)?;
        match flag {
            1 => Ok((BPlusTreePageType::LeafPage, offset)),
            2 => Ok((BPlusTreePageType::InternalPage, offset)),
            other => Err(ChalkError::Storage(format!(
                "Unknown b+ tree page type {other}"
            ))),
        }
    }
}

pub struct BPlusTreePageCodec;

impl BPlusTreePageCodec {
    pub fn encode(page: &BPlusTreePage) -> Vec<u8> {
        match page {
            BPlusTreePage::Leaf(page) => BPlusTreeLeafPageCodec::encode(page),
            BPlusTreePage::Internal(page) => BPlusTreeInternalPageCodec::encode(page),
        }
    }

    pub fn decode(bytes: &[u8], schema: SchemaRef) -> ChalkResult<DecodedData<BPlusTreePage>> {
        check_page_size(bytes)?;
        let (page_type, _) = BPlusTreePageTypeCodec::decode(bytes)?;
        match page_type {
            BPlusTreePageType::LeafPage => {
                let (page, offset) = BPlusTreeLeafPageCodec::decode(bytes, schema)?;
                Ok((BPlusTreePage::Leaf(page), offset))
            }
            BPlusTreePageType::InternalPage => {
                let (page, offset) = BPlusTreeInternalPageCodec::decode(bytes, schema)?;
                Ok((BPlusTreePage::Internal(page), offset))
            }
        }
    }
}

pub struct BPlusTreeLeafPageCodec;

impl BPlusTreeLeafPageCodec {
    pub fn encode(page: &BPlusTreeLeafPage) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PAGE_SIZE);
        bytes.extend(BPlusTreePageTypeCodec::encode(page.header.page_type));
        bytes.extend(CommonCodec::encode_u32(page.header.current_size));
        bytes.extend(CommonCodec::encode_u32(page.header.max_size));
        bytes.extend(CommonCodec::encode_u32(page.header.parent_page_id));
        bytes.extend(CommonCodec::encode_u32(page.header.page_id));
        bytes.extend(CommonCodec::encode_u32(0));
        bytes.extend(CommonCodec::encode_u32(page.header.next_page_id));
        for (tuple, rid) in page.array.iter() {
            bytes.extend(TupleCodec::encode(tuple));
            bytes.extend(RidCodec::encode(rid));
        }
        assert!(bytes.len() <= PAGE_SIZE);
        bytes.resize(PAGE_SIZE, 0);
        bytes
    }

    pub fn decode(bytes: &[u8], schema: SchemaRef) -> ChalkResult<DecodedData<BPlusTreeLeafPage>> {
        check_page_size(bytes)?;
        let mut left_bytes = bytes;

        let (page_type, offset) = BPlusTreePageTypeCodec::decode(left_bytes)?;
        if !matches!(page_type, BPlusTreePageType::LeafPage) {
            return Err(ChalkError::Storage(
                "Page type must be leaf page".to_string(),
            ));
        }
        left_bytes = &left_bytes[offset..];

        let (current_size, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (max_size, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (parent_page_id, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (page_id, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (_pad, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (next_page_id, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];

        let mut array = Vec::with_capacity(current_size as usize);
        for _ in 0..current_size {
            let (tuple, offset) = TupleCodec::decode(left_bytes, schema.clone())?;
            left_bytes = &left_bytes[offset..];
            let (rid, offset) = RidCodec::decode(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            array.push((tuple, rid));
        }

        Ok((
            BPlusTreeLeafPage {
                schema,
                header: BPlusTreeLeafPageHeader {
                    page_type,
                    current_size,
                    max_size,
                    parent_page_id,
                    page_id,
                    next_page_id,
                },
                array,
            },
            PAGE_SIZE,
        ))
    }
}

pub struct BPlusTreeInternalPageCodec;

impl BPlusTreeInternalPageCodec {
    pub fn encode(page: &BPlusTreeInternalPage) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PAGE_SIZE);
        bytes.extend(BPlusTreePageTypeCodec::encode(page.header.page_type));
        bytes.extend(CommonCodec::encode_u32(page.header.current_size));
        bytes.extend(CommonCodec::encode_u32(page.header.max_size));
        bytes.extend(CommonCodec::encode_u32(page.header.parent_page_id));
        bytes.extend(CommonCodec::encode_u32(page.header.page_id));
        bytes.extend(CommonCodec::encode_u32(0));
        for (tuple, child) in page.array.iter() {
            bytes.extend(TupleCodec::encode(tuple));
            bytes.extend(CommonCodec::encode_u32(*child));
        }
        assert!(bytes.len() <= PAGE_SIZE);
        bytes.resize(PAGE_SIZE, 0);
        bytes
    }

    pub fn decode(
        bytes: &[u8],
        schema: SchemaRef,
    ) -> ChalkResult<DecodedData<BPlusTreeInternalPage>> {
        check_page_size(bytes)?;
        let mut left_bytes = bytes;

        let (page_type, offset) = BPlusTreePageTypeCodec::decode(left_bytes)?;
        if !matches!(page_type, BPlusTreePageType::InternalPage) {
            return Err(ChalkError::Storage(
                "Page type must be internal page".to_string(),
            ));
        }
        left_bytes = &left_bytes[offset..];

        let (current_size, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (max_size, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (parent_page_id, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (page_id, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (_pad, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];

        let mut array = Vec::with_capacity(current_size as usize);
        for _ in 0..current_size {
            let (tuple, offset) = TupleCodec::decode(left_bytes, schema.clone())?;
            left_bytes = &left_bytes[offset..];
            let (child, offset) = CommonCodec::decode_u32(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            array.push((tuple, child));
        }

        Ok((
            BPlusTreeInternalPage {
                schema,
                header: BPlusTreeInternalPageHeader {
                    page_type,
                    current_size,
                    max_size,
                    parent_page_id,
                    page_id,
                },
                array,
            },
            PAGE_SIZE,
        ))
    }
}

fn check_page_size(bytes: &[u8]) -> ChalkResult<()> {
    if bytes.len() != PAGE_SIZE {
        return Err(ChalkError::Storage(format!(
            "Index page size is {} instead of {PAGE_SIZE}",
            bytes.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{BPlusTreeInternalPageCodec, BPlusTreeLeafPageCodec};
    use crate::buffer::INVALID_PAGE_ID;
    use crate::catalog::{Column, DataType, Schema};
    use crate::storage::page::{BPlusTreeInternalPage, BPlusTreeLeafPage, RecordId};
    use crate::storage::tuple::Tuple;
    use std::sync::Arc;

    #[test]
    fn leaf_page_round_trip() {
        let schema = Arc::new(Schema::new(vec![Column::new("k", DataType::Int64, false)]));
        let mut page = BPlusTreeLeafPage::new(schema.clone(), 10, 42, 7);
        page.header.next_page_id = 43;
        for v in [3i64, 1, 2] {
            page.insert(
                Tuple::new(schema.clone(), vec![v.into()]),
                RecordId::new(v as u32, 0),
            );
        }

        let bytes = BPlusTreeLeafPageCodec::encode(&page);
        let (decoded, _) = BPlusTreeLeafPageCodec::decode(&bytes, schema).unwrap();
        assert_eq!(decoded, page);
    }

    #[test]
    fn internal_page_round_trip() {
        let schema = Arc::new(Schema::new(vec![Column::new("k", DataType::Int64, false)]));
        let mut page = BPlusTreeInternalPage::new(schema.clone(), 10, 42, INVALID_PAGE_ID);
        page.insert(Tuple::empty(schema.clone()), 1);
        page.insert(Tuple::new(schema.clone(), vec![10i64.into()]), 2);
        page.insert(Tuple::new(schema.clone(), vec![20i64.into()]), 3);

        let bytes = BPlusTreeInternalPageCodec::encode(&page);
        let (decoded, _) = BPlusTreeInternalPageCodec::decode(&bytes, schema).unwrap();
        assert_eq!(decoded, page);
        // The sentinel key must survive the trip as nulls.
        assert!(decoded.array[0].0.is_null());
    }
}
