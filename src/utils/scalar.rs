use crate::catalog::DataType;
use crate::error::{ChalkError, ChalkResult};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// A single fixed-width column value. Every variant wraps an `Option` so a
/// null of any type can be represented (the index uses all-null tuples as
/// internal sentinel keys).
#[derive(Debug, Clone)]
pub enum ScalarValue {
    Boolean(Option<bool>),
    Int8(Option<i8>),
    Int16(Option<i16>),
    Int32(Option<i32>),
    Int64(Option<i64>),
    UInt8(Option<u8>),
    UInt16(Option<u16>),
    UInt32(Option<u32>),
    UInt64(Option<u64>),
}

impl ScalarValue {
    pub fn new_empty(data_type: DataType) -> Self {
        match data_type {
            DataType::Boolean => Self::Boolean(None),
            DataType::Int8 => Self::Int8(None),
            DataType::Int16 => Self::Int16(None),
            DataType::Int32 => Self::Int32(None),
            DataType::Int64 => Self::Int64(None),
            DataType::UInt8 => Self::UInt8(None),
            DataType::UInt16 => Self::UInt16(None),
            DataType::UInt32 => Self::UInt32(None),
            DataType::UInt64 => Self::UInt64(None),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Boolean(_) => DataType::Boolean,
            ScalarValue::Int8(_) => DataType::Int8,
            ScalarValue::Int16(_) => DataType::Int16,
            ScalarValue::Int32(_) => DataType::Int32,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::UInt8(_) => DataType::UInt8,
            ScalarValue::UInt16(_) => DataType::UInt16,
            ScalarValue::UInt32(_) => DataType::UInt32,
            ScalarValue::UInt64(_) => DataType::UInt64,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            ScalarValue::Boolean(v) => v.is_none(),
            ScalarValue::Int8(v) => v.is_none(),
            ScalarValue::Int16(v) => v.is_none(),
            ScalarValue::Int32(v) => v.is_none(),
            ScalarValue::Int64(v) => v.is_none(),
            ScalarValue::UInt8(v) => v.is_none(),
            ScalarValue::UInt16(v) => v.is_none(),
            ScalarValue::UInt32(v) => v.is_none(),
            ScalarValue::UInt64(v) => v.is_none(),
        }
    }

    pub fn as_boolean(&self) -> ChalkResult<Option<bool>> {
        match self {
            ScalarValue::Boolean(v) => Ok(*v),
            other => Err(ChalkError::Internal(format!(
                "Cannot read {other:?} as boolean"
            ))),
        }
    }

    /// Widen any non-null numeric (or boolean) value to i128 for
    /// type-insensitive comparison and arithmetic.
    pub fn widened(&self) -> Option<i128> {
        match self {
            ScalarValue::Boolean(v) => v.map(|b| b as i128),
            ScalarValue::Int8(v) => v.map(|x| x as i128),
            ScalarValue::Int16(v) => v.map(|x| x as i128),
            ScalarValue::Int32(v) => v.map(|x| x as i128),
            ScalarValue::Int64(v) => v.map(|x| x as i128),
            ScalarValue::UInt8(v) => v.map(|x| x as i128),
            ScalarValue::UInt16(v) => v.map(|x| x as i128),
            ScalarValue::UInt32(v) => v.map(|x| x as i128),
            ScalarValue::UInt64(v) => v.map(|x| x as i128),
        }
    }

    /// Narrow an i128 back into the given type, saturating at the bounds.
    pub fn from_widened(value: i128, data_type: DataType) -> Self {
        match data_type {
            DataType::Boolean => ScalarValue::Boolean(Some(value != 0)),
            DataType::Int8 => ScalarValue::Int8(Some(value.clamp(i8::MIN as i128, i8::MAX as i128) as i8)),
            DataType::Int16 => {
                ScalarValue::Int16(Some(value.clamp(i16::MIN as i128, i16::MAX as i128) as i16))
            }
            DataType::Int32 => {
                ScalarValue::Int32(Some(value.clamp(i32::MIN as i128, i32::MAX as i128) as i32))
            }
            DataType::Int64 => {
                ScalarValue::Int64(Some(value.clamp(i64::MIN as i128, i64::MAX as i128) as i64))
            }
            DataType::UInt8 => ScalarValue::UInt8(Some(value.clamp(0, u8::MAX as i128) as u8)),
            DataType::UInt16 => ScalarValue::UInt16(Some(value.clamp(0, u16::MAX as i128) as u16)),
            DataType::UInt32 => ScalarValue::UInt32(Some(value.clamp(0, u32::MAX as i128) as u32)),
            DataType::UInt64 => ScalarValue::UInt64(Some(value.clamp(0, u64::MAX as i128) as u64)),
        }
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl Eq for ScalarValue {}

impl PartialOrd for ScalarValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScalarValue {
    // Nulls order before every value so sentinel keys sort first.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.widened(), other.widened()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
        }
    }
}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.widened().hash(state);
    }
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        macro_rules! write_opt {
            ($v:expr) => {
                match $v {
                    Some(x) => write!(f, "{x}"),
                    None => write!(f, "NULL"),
                }
            };
        }
        match self {
            ScalarValue::Boolean(v) => write_opt!(v),
            ScalarValue::Int8(v) => write_opt!(v),
            ScalarValue::Int16(v) => write_opt!(v),
            ScalarValue::Int32(v) => write_opt!(v),
            ScalarValue::Int64(v) => write_opt!(v),
            ScalarValue::UInt8(v) => write_opt!(v),
            ScalarValue::UInt16(v) => write_opt!(v),
            ScalarValue::UInt32(v) => write_opt!(v),
            ScalarValue::UInt64(v) => write_opt!(v),
        }
    }
}

macro_rules! impl_from {
    ($native:ty, $variant:ident) => {
        impl From<$native> for ScalarValue {
            fn from(value: $native) -> Self {
                ScalarValue::$variant(Some(value))
            }
        }
        impl From<Option<$native>> for ScalarValue {
            fn from(value: Option<$native>) -> Self {
                ScalarValue::$variant(value)
            }
        }
    };
}

impl_from!(bool, Boolean);
impl_from!(i8, Int8);
impl_from!(i16, Int16);
impl_from!(i32, Int32);
impl_from!(i64, Int64);
impl_from!(u8, UInt8);
impl_from!(u16, UInt16);
impl_from!(u32, UInt32);
impl_from!(u64, UInt64);

#[cfg(test)]
mod tests {
    use super::ScalarValue;
    use std::cmp::Ordering;

    #[test]
    fn cross_type_comparison() {
        let a: ScalarValue = 3i8.into();
        let b: ScalarValue = 3i64.into();
        let c: ScalarValue = 100u32.into();
        assert_eq!(a.partial_cmp(&b), Some(Ordering::Equal));
        assert!(a < c);
        assert!(c > b);
    }

    #[test]
    fn nulls_order_first() {
        let null = ScalarValue::Int32(None);
        let zero: ScalarValue = 0i32.into();
        assert!(null < zero);
        assert_eq!(null, ScalarValue::Int64(None));
    }
}
