use crate::buffer::PAGE_SIZE;
use crate::catalog::SchemaRef;
use crate::error::{ChalkError, ChalkResult};
use crate::storage::codec::{CommonCodec, DecodedData};
use crate::storage::page::{
    TablePage, TablePageHeader, TupleInfo, TupleMeta, TABLE_PAGE_HEADER_BASE_SIZE,
    TABLE_PAGE_SLOT_SIZE,
};

pub struct TablePageCodec;

impl TablePageCodec {
    /// The tuple bytes already sit at their recorded offsets inside
    /// `page.data`; encoding only overlays the header at the front.
    pub fn encode(page: &TablePage) -> Vec<u8> {
        let mut bytes = page.data.to_vec();
        let mut header = Vec::with_capacity(
            TABLE_PAGE_HEADER_BASE_SIZE
                + page.header.tuple_infos.len() * TABLE_PAGE_SLOT_SIZE,
        );
        header.extend(CommonCodec::encode_u32(page.header.next_page_id));
        header.extend(CommonCodec::encode_u16(page.header.num_tuples));
        for info in page.header.tuple_infos.iter() {
            header.extend(CommonCodec::encode_u16(info.offset));
            header.extend(CommonCodec::encode_u16(info.size));
            header.extend(CommonCodec::encode_bool(info.meta.is_deleted));
        }
        bytes[0..header.len()].copy_from_slice(&header);
        bytes
    }

    pub fn decode(bytes: &[u8], schema: SchemaRef) -> ChalkResult<DecodedData<TablePage>> {
        if bytes.len() != PAGE_SIZE {
            return Err(ChalkError::Storage(format!(
                "Table page size is {} instead of {PAGE_SIZE}",
                bytes.len()
            )));
        }
        let mut left_bytes = bytes;

        let (next_page_id, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (num_tuples, offset) = CommonCodec::decode_u16(left_bytes)?;
        left_bytes = &left_bytes[offset..];

        let mut tuple_infos = Vec::with_capacity(num_tuples as usize);
        for _ in 0..num_tuples {
            let (tuple_offset, offset) = CommonCodec::decode_u16(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            let (size, offset) = CommonCodec::decode_u16(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            let (is_deleted, offset) = CommonCodec::decode_bool(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            tuple_infos.push(TupleInfo {
                offset: tuple_offset,
                size,
                meta: TupleMeta { is_deleted },
            });
        }

        let mut data = [0u8; PAGE_SIZE];
        data.copy_from_slice(bytes);

        Ok((
            TablePage {
                schema,
                header: TablePageHeader {
                    next_page_id,
                    num_tuples,
                    tuple_infos,
                },
                data,
            },
            PAGE_SIZE,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::TablePageCodec;
    use crate::catalog::{Column, DataType, Schema};
    use crate::storage::page::{TablePage, TupleMeta};
    use crate::storage::tuple::Tuple;
    use std::sync::Arc;

    #[test]
    fn table_page_round_trip() {
        let schema = Arc::new(Schema::new(vec![
            Column::new("a", DataType::Int32, false),
            Column::new("b", DataType::Boolean, false),
        ]));
        let mut page = TablePage::new(schema.clone(), 9);
        page.insert_tuple(
            TupleMeta::default(),
            &Tuple::new(schema.clone(), vec![1i32.into(), true.into()]),
        )
        .unwrap();
        page.insert_tuple(
            TupleMeta { is_deleted: true },
            &Tuple::new(schema.clone(), vec![2i32.into(), false.into()]),
        )
        .unwrap();

        let bytes = TablePageCodec::encode(&page);
        let (decoded, _) = TablePageCodec::decode(&bytes, schema).unwrap();
        assert_eq!(decoded.header, page.header);
        assert_eq!(decoded.get_tuple(0).unwrap(), page.get_tuple(0).unwrap());
        assert!(decoded.get_tuple(1).unwrap().0.is_deleted);
    }
}
