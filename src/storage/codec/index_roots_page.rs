use crate::buffer::PAGE_SIZE;
use crate::error::{ChalkError, ChalkResult};
use crate::storage::codec::{CommonCodec, DecodedData};
use crate::storage::page::IndexRootsPage;

pub struct IndexRootsPageCodec;

impl IndexRootsPageCodec {
    pub fn encode(page: &IndexRootsPage) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PAGE_SIZE);
        bytes.extend(CommonCodec::encode_u16(page.records.len() as u16));
        for (name, root_page_id) in page.records.iter() {
            bytes.extend(CommonCodec::encode_bytes(name.as_bytes()));
            bytes.extend(CommonCodec::encode_u32(*root_page_id));
        }
        assert!(bytes.len() <= PAGE_SIZE);
        bytes.resize(PAGE_SIZE, 0);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> ChalkResult<DecodedData<IndexRootsPage>> {
        if bytes.len() != PAGE_SIZE {
            return Err(ChalkError::Storage(format!(
                "Index roots page size is {} instead of {PAGE_SIZE}",
                bytes.len()
            )));
        }
        let mut left_bytes = bytes;
        let (num_records, offset) = CommonCodec::decode_u16(left_bytes)?;
        left_bytes = &left_bytes[offset..];

        let mut records = Vec::with_capacity(num_records as usize);
        for _ in 0..num_records {
            let (name_bytes, offset) = CommonCodec::decode_bytes(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            let (root_page_id, offset) = CommonCodec::decode_u32(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            let name = String::from_utf8(name_bytes)
                .map_err(|e| ChalkError::Storage(format!("Invalid index name: {e}")))?;
            records.push((name, root_page_id));
        }

        Ok((IndexRootsPage { records }, PAGE_SIZE))
    }
}
