use crate::error::{ChalkError, ChalkResult};
use crate::storage::codec::DecodedData;

/// Big-endian primitive codecs shared by every page layout.
pub struct CommonCodec;

impl CommonCodec {
    pub fn encode_bool(data: bool) -> Vec<u8> {
        vec![data as u8]
    }

    pub fn decode_bool(bytes: &[u8]) -> ChalkResult<DecodedData<bool>> {
        if bytes.is_empty() {
            return Err(ChalkError::Internal(
                "bytes length 0 is less than 1".to_string(),
            ));
        }
        Ok((bytes[0] != 0, 1))
    }

    pub fn encode_u8(data: u8) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u8(bytes: &[u8]) -> ChalkResult<DecodedData<u8>> {
        Self::check_len(bytes, 1)?;
        Ok((u8::from_be_bytes([bytes[0]]), 1))
    }

    pub fn encode_u16(data: u16) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u16(bytes: &[u8]) -> ChalkResult<DecodedData<u16>> {
        Self::check_len(bytes, 2)?;
        Ok((u16::from_be_bytes([bytes[0], bytes[1]]), 2))
    }

    pub fn encode_u32(data: u32) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u32(bytes: &[u8]) -> ChalkResult<DecodedData<u32>> {
        Self::check_len(bytes, 4)?;
        Ok((
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            4,
        ))
    }

    pub fn encode_u64(data: u64) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u64(bytes: &[u8]) -> ChalkResult<DecodedData<u64>> {
        Self::check_len(bytes, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[0..8]);
        Ok((u64::from_be_bytes(buf), 8))
    }

    pub fn encode_i8(data: i8) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_i8(bytes: &[u8]) -> ChalkResult<DecodedData<i8>> {
        Self::check_len(bytes, 1)?;
        Ok((i8::from_be_bytes([bytes[0]]), 1))
    }

    pub fn encode_i16(data: i16) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_i16(bytes: &[u8]) -> ChalkResult<DecodedData<i16>> {
        Self::check_len(bytes, 2)?;
        Ok((i16::from_be_bytes([bytes[0], bytes[1]]), 2))
    }

    pub fn encode_i32(data: i32) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_i32(bytes: &[u8]) -> ChalkResult<DecodedData<i32>> {
        Self::check_len(bytes, 4)?;
        Ok((
            i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            4,
        ))
    }

    pub fn encode_i64(data: i64) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_i64(bytes: &[u8]) -> ChalkResult<DecodedData<i64>> {
        Self::check_len(bytes, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[0..8]);
        Ok((i64::from_be_bytes(buf), 8))
    }

    pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + data.len());
        bytes.extend(Self::encode_u32(data.len() as u32));
        bytes.extend_from_slice(data);
        bytes
    }

    pub fn decode_bytes(bytes: &[u8]) -> ChalkResult<DecodedData<Vec<u8>>> {
        let (length, offset) = Self::decode_u32(bytes)?;
        let length = length as usize;
        Self::check_len(bytes, offset + length)?;
        Ok((bytes[offset..offset + length].to_vec(), offset + length))
    }

    fn check_len(bytes: &[u8], expected: usize) -> ChalkResult<()> {
        if bytes.len() < expected {
            return Err(ChalkError::Internal(format!(
                "bytes length {} is less than {expected}",
                bytes.len()
            )));
        }
        Ok(())
    }
}
