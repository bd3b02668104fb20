use crate::schema::NativeType;
use crate::temporal::{Date, DateTime, Time, Timestamp};

/// A single cell's runtime value. `Null` is valid for any nullable column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    /// Unscaled magnitude (may be negative) against the column's declared
    /// scale; e.g. scale 2 and unscaled 12345 represents 123.45.
    Decimal(i128),
    Number(i128),
    String(String),
    Bytes(Vec<u8>),
    Uuid(u128),
    Bitmask(Vec<u8>),
    Date(Date),
    Time(Time),
    Datetime(DateTime),
    Timestamp(Timestamp),
}

impl Value {
    /// Whether this value's runtime shape agrees with `kind`. `Null` always
    /// matches (nullability is checked separately by the caller against
    /// `Column::nullable`).
    pub fn matches_type(&self, kind: &NativeType) -> bool {
        if matches!(self, Value::Null) {
            return true;
        }
        matches!(
            (self, kind),
            (Value::Int8(_), NativeType::Int8)
                | (Value::Int16(_), NativeType::Int16)
                | (Value::Int32(_), NativeType::Int32)
                | (Value::Int64(_), NativeType::Int64)
                | (Value::Float32(_), NativeType::Float32)
                | (Value::Float64(_), NativeType::Float64)
                | (Value::Decimal(_), NativeType::Decimal { .. })
                | (Value::Number(_), NativeType::Number { .. })
                | (Value::String(_), NativeType::String)
                | (Value::Bytes(_), NativeType::Bytes)
                | (Value::Uuid(_), NativeType::Uuid)
                | (Value::Bitmask(_), NativeType::Bitmask { .. })
                | (Value::Date(_), NativeType::Date)
                | (Value::Time(_), NativeType::Time { .. })
                | (Value::Datetime(_), NativeType::Datetime { .. })
                | (Value::Timestamp(_), NativeType::Timestamp { .. })
        )
    }
}

/// Number of base-10 digits needed to represent `abs(value)` (0 needs 1
/// digit), used for the `PrecisionExceeded` check.
pub fn digit_count(value: i128) -> u32 {
    let magnitude = value.unsigned_abs();
    if magnitude == 0 {
        1
    } else {
        magnitude.ilog10() + 1
    }
}

/// The width in bytes of a fixed-layout column's encoded cell. Variable
/// columns (`String`, `Bytes`) are not included here; see `chunk.rs`.
pub fn fixed_width(kind: &NativeType) -> usize {
    match kind {
        NativeType::Int8 => 1,
        NativeType::Int16 => 2,
        NativeType::Int32 => 4,
        NativeType::Int64 => 8,
        NativeType::Float32 => 4,
        NativeType::Float64 => 8,
        // Stored as a sign-flipped i128 so that unsigned byte comparison
        // matches signed numeric comparison regardless of scale/precision.
        NativeType::Decimal { .. } => 16,
        NativeType::Number { .. } => 16,
        NativeType::Uuid => 16,
        NativeType::Bitmask { bits } => common::ceil_div(*bits as usize, 8),
        NativeType::Date => crate::temporal::date_width(),
        NativeType::Time { precision } => crate::temporal::time_width(*precision),
        NativeType::Datetime { precision } => crate::temporal::datetime_width(*precision),
        NativeType::Timestamp { precision } => crate::temporal::timestamp_width(*precision),
        NativeType::String | NativeType::Bytes => 0,
    }
}
