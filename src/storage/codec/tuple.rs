use crate::catalog::{DataType, Schema, SchemaRef};
use crate::error::ChalkResult;
use crate::storage::codec::{CommonCodec, DecodedData};
use crate::storage::page::RecordId;
use crate::storage::tuple::Tuple;
use crate::utils::scalar::ScalarValue;

/// Fixed-width scalar layout: 1 null flag byte followed by the big-endian
/// payload of the column's type. A null still occupies its full width so
/// every tuple of a schema has the same size.
pub struct ScalarValueCodec;

impl ScalarValueCodec {
    pub fn encode(value: &ScalarValue) -> Vec<u8> {
        let mut bytes = CommonCodec::encode_bool(!value.is_null());
        match value {
            ScalarValue::Boolean(v) => bytes.extend(CommonCodec::encode_bool(v.unwrap_or(false))),
            ScalarValue::Int8(v) => bytes.extend(CommonCodec::encode_i8(v.unwrap_or(0))),
            ScalarValue::Int16(v) => bytes.extend(CommonCodec::encode_i16(v.unwrap_or(0))),
            ScalarValue::Int32(v) => bytes.extend(CommonCodec::encode_i32(v.unwrap_or(0))),
            ScalarValue::Int64(v) => bytes.extend(CommonCodec::encode_i64(v.unwrap_or(0))),
            ScalarValue::UInt8(v) => bytes.extend(CommonCodec::encode_u8(v.unwrap_or(0))),
            ScalarValue::UInt16(v) => bytes.extend(CommonCodec::encode_u16(v.unwrap_or(0))),
            ScalarValue::UInt32(v) => bytes.extend(CommonCodec::encode_u32(v.unwrap_or(0))),
            ScalarValue::UInt64(v) => bytes.extend(CommonCodec::encode_u64(v.unwrap_or(0))),
        }
        bytes
    }

    pub fn decode(bytes: &[u8], data_type: DataType) -> ChalkResult<DecodedData<ScalarValue>> {
        let (present, mut offset) = CommonCodec::decode_bool(bytes)?;
        macro_rules! decode_as {
            ($decoder:ident, $variant:ident) => {{
                let (raw, consumed) = CommonCodec::$decoder(&bytes[offset..])?;
                offset += consumed;
                ScalarValue::$variant(present.then_some(raw))
            }};
        }
        let value = match data_type {
            DataType::Boolean => decode_as!(decode_bool, Boolean),
            DataType::Int8 => decode_as!(decode_i8, Int8),
            DataType::Int16 => decode_as!(decode_i16, Int16),
            DataType::Int32 => decode_as!(decode_i32, Int32),
            DataType::Int64 => decode_as!(decode_i64, Int64),
            DataType::UInt8 => decode_as!(decode_u8, UInt8),
            DataType::UInt16 => decode_as!(decode_u16, UInt16),
            DataType::UInt32 => decode_as!(decode_u32, UInt32),
            DataType::UInt64 => decode_as!(decode_u64, UInt64),
        };
        Ok((value, offset))
    }
}

pub struct TupleCodec;

impl TupleCodec {
    pub fn encoded_size(schema: &Schema) -> usize {
        schema.tuple_width()
    }

    pub fn encode(tuple: &Tuple) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::encoded_size(&tuple.schema));
        for value in tuple.data.iter() {
            bytes.extend(ScalarValueCodec::encode(value));
        }
        bytes
    }

    pub fn decode(bytes: &[u8], schema: SchemaRef) -> ChalkResult<DecodedData<Tuple>> {
        let mut offset = 0;
        let mut data = Vec::with_capacity(schema.columns.len());
        for column in schema.columns.iter() {
            let (value, consumed) = ScalarValueCodec::decode(&bytes[offset..], column.data_type)?;
            offset += consumed;
            data.push(value);
        }
        Ok((Tuple::new(schema, data), offset))
    }
}

/// 8-byte record id: page id then slot number.
pub struct RidCodec;

impl RidCodec {
    pub const SIZE: usize = 8;

    pub fn encode(rid: &RecordId) -> Vec<u8> {
        let mut bytes = CommonCodec::encode_u32(rid.page_id);
        bytes.extend(CommonCodec::encode_u32(rid.slot_num));
        bytes
    }

    pub fn decode(bytes: &[u8]) -> ChalkResult<DecodedData<RecordId>> {
        let (page_id, offset) = CommonCodec::decode_u32(bytes)?;
        let (slot_num, consumed) = CommonCodec::decode_u32(&bytes[offset..])?;
        Ok((RecordId::new(page_id, slot_num), offset + consumed))
    }
}
