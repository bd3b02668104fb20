//! Encodes/decodes one chunk (either the key columns or the value columns)
//! of a row: `[length:u32][flags:u8][null_map][offset_table][fixed_data][var_data]`.
//!
//! Only `String` and `Bytes` columns are variable-width; everything else
//! (including decimals/numbers, stored as a sign-flipped 128-bit integer)
//! has a width fully determined by the column definition, so only the
//! variable columns need an offset-table entry.

use crate::errors::RowCodecError;
use crate::schema::{Column, NativeType};
use crate::temporal;
use crate::value::{digit_count, fixed_width, Value};
use common::errors::*;

fn null_map_len(ncols: usize) -> usize {
    common::ceil_div(ncols, 8)
}

fn offset_width_for(max_offset: usize) -> (u8, usize) {
    if max_offset <= u8::MAX as usize {
        (0, 1)
    } else if max_offset <= u16::MAX as usize {
        (1, 2)
    } else {
        (2, 4)
    }
}

fn write_offset(out: &mut Vec<u8>, width: usize, value: usize) {
    match width {
        1 => out.push(value as u8),
        2 => out.extend_from_slice(&(value as u16).to_be_bytes()),
        _ => out.extend_from_slice(&(value as u32).to_be_bytes()),
    }
}

fn read_offset(input: &[u8], width: usize) -> usize {
    match width {
        1 => input[0] as usize,
        2 => u16::from_be_bytes([input[0], input[1]]) as usize,
        _ => u32::from_be_bytes([input[0], input[1], input[2], input[3]]) as usize,
    }
}

fn sign_flip_i128(value: i128) -> u128 {
    (value as u128) ^ (1u128 << 127)
}

fn sign_unflip_i128(value: u128) -> i128 {
    (value ^ (1u128 << 127)) as i128
}

pub fn encode_chunk(columns: &[Column], values: &[Value]) -> Result<Vec<u8>> {
    let ncols = columns.len();
    let mut null_map = vec![0u8; null_map_len(ncols)];
    let mut fixed_data = Vec::new();
    let mut var_data = Vec::new();
    let mut var_offsets = Vec::new();

    for (i, (column, value)) in columns.iter().zip(values.iter()).enumerate() {
        let is_null = matches!(value, Value::Null);
        if is_null {
            if !column.nullable {
                return Err(RowCodecError::SchemaMismatch(format!(
                    "column '{}' is not nullable",
                    column.name
                ))
                .into());
            }
            null_map[i / 8] |= 1 << (i % 8);
        } else if !value.matches_type(&column.kind) {
            return Err(RowCodecError::SchemaMismatch(format!(
                "column '{}' expected {:?}, got {:?}",
                column.name, column.kind, value
            ))
            .into());
        }

        if column.kind.is_variable_width() {
            if !is_null {
                encode_variable(value, &mut var_data)?;
            }
            var_offsets.push(var_data.len());
        } else {
            let width = fixed_width(&column.kind);
            if is_null {
                fixed_data.extend(std::iter::repeat(0u8).take(width));
            } else {
                encode_fixed(value, &column.kind, &mut fixed_data)?;
            }
        }
    }

    let (width_code, offset_width) = offset_width_for(var_data.len());
    let mut offset_table = Vec::with_capacity(var_offsets.len() * offset_width);
    for off in &var_offsets {
        write_offset(&mut offset_table, offset_width, *off);
    }

    let flags = width_code;
    let mut body = Vec::with_capacity(
        1 + null_map.len() + offset_table.len() + fixed_data.len() + var_data.len(),
    );
    body.push(flags);
    body.extend_from_slice(&null_map);
    body.extend_from_slice(&offset_table);
    body.extend_from_slice(&fixed_data);
    body.extend_from_slice(&var_data);

    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

pub fn decode_column(chunk_bytes: &[u8], columns: &[Column], index: usize) -> Result<Value> {
    if chunk_bytes.len() < 5 {
        return Err(RowCodecError::Assembly("chunk truncated".into()).into());
    }
    let flags = chunk_bytes[4];
    let offset_width = match flags & 0x3 {
        0 => 1,
        1 => 2,
        _ => 4,
    };

    let ncols = columns.len();
    let null_map_start = 5;
    let null_map = &chunk_bytes[null_map_start..null_map_start + null_map_len(ncols)];

    let is_null = (null_map[index / 8] >> (index % 8)) & 1 == 1;
    if is_null {
        return Ok(Value::Null);
    }

    let var_count = columns.iter().filter(|c| c.kind.is_variable_width()).count();
    let offset_table_start = null_map_start + null_map_len(ncols);
    let offset_table = &chunk_bytes[offset_table_start..offset_table_start + var_count * offset_width];
    let fixed_data_start = offset_table_start + offset_table.len();

    let column = &columns[index];
    if column.kind.is_variable_width() {
        let var_position = columns[..index]
            .iter()
            .filter(|c| c.kind.is_variable_width())
            .count();
        let start = if var_position == 0 {
            0
        } else {
            read_offset(&offset_table[(var_position - 1) * offset_width..], offset_width)
        };
        let end = read_offset(&offset_table[var_position * offset_width..], offset_width);

        let var_data_start = fixed_data_start
            + columns
                .iter()
                .filter(|c| !c.kind.is_variable_width())
                .map(|c| fixed_width(&c.kind))
                .sum::<usize>();
        let var_data = &chunk_bytes[var_data_start..];
        let slice = &var_data[start..end];
        decode_variable(slice, &column.kind)
    } else {
        let fixed_offset: usize = columns[..index]
            .iter()
            .filter(|c| !c.kind.is_variable_width())
            .map(|c| fixed_width(&c.kind))
            .sum();
        let width = fixed_width(&column.kind);
        let slice = &chunk_bytes[fixed_data_start + fixed_offset..fixed_data_start + fixed_offset + width];
        decode_fixed(slice, &column.kind)
    }
}

fn encode_fixed(value: &Value, kind: &NativeType, out: &mut Vec<u8>) -> Result<()> {
    match (value, kind) {
        (Value::Int8(v), NativeType::Int8) => out.push(*v as u8 ^ 0x80),
        (Value::Int16(v), NativeType::Int16) => {
            out.extend_from_slice(&((*v as u16) ^ 0x8000).to_be_bytes())
        }
        (Value::Int32(v), NativeType::Int32) => {
            out.extend_from_slice(&((*v as u32) ^ 0x8000_0000).to_be_bytes())
        }
        (Value::Int64(v), NativeType::Int64) => {
            out.extend_from_slice(&temporal::sign_flip_i64(*v).to_be_bytes())
        }
        (Value::Float32(v), NativeType::Float32) => out.extend_from_slice(&v.to_be_bytes()),
        (Value::Float64(v), NativeType::Float64) => out.extend_from_slice(&v.to_be_bytes()),
        (Value::Decimal(unscaled), NativeType::Decimal { precision, .. }) => {
            if digit_count(*unscaled) > *precision as u32 {
                return Err(RowCodecError::PrecisionExceeded(format!(
                    "decimal value exceeds precision {}",
                    precision
                ))
                .into());
            }
            out.extend_from_slice(&sign_flip_i128(*unscaled).to_be_bytes())
        }
        (Value::Number(v), NativeType::Number { precision }) => {
            if digit_count(*v) > *precision as u32 {
                return Err(RowCodecError::PrecisionExceeded(format!(
                    "number value exceeds precision {}",
                    precision
                ))
                .into());
            }
            out.extend_from_slice(&sign_flip_i128(*v).to_be_bytes())
        }
        (Value::Uuid(v), NativeType::Uuid) => out.extend_from_slice(&v.to_be_bytes()),
        (Value::Bitmask(bits), NativeType::Bitmask { bits: nbits }) => {
            let width = common::ceil_div(*nbits as usize, 8);
            let mut buf = vec![0u8; width];
            buf[..bits.len().min(width)].copy_from_slice(&bits[..bits.len().min(width)]);
            out.extend_from_slice(&buf);
        }
        (Value::Date(d), NativeType::Date) => temporal::encode_date(d, out),
        (Value::Time(t), NativeType::Time { precision }) => {
            temporal::encode_time(t, *precision, out)
        }
        (Value::Datetime(dt), NativeType::Datetime { precision }) => {
            temporal::encode_datetime(dt, *precision, out)
        }
        (Value::Timestamp(ts), NativeType::Timestamp { precision }) => {
            temporal::encode_timestamp(ts, *precision, out)
        }
        _ => {
            return Err(RowCodecError::SchemaMismatch(
                "value/type mismatch during fixed encode".into(),
            )
            .into())
        }
    }
    Ok(())
}

fn decode_fixed(input: &[u8], kind: &NativeType) -> Result<Value> {
    Ok(match kind {
        NativeType::Int8 => Value::Int8((input[0] ^ 0x80) as i8),
        NativeType::Int16 => {
            Value::Int16((u16::from_be_bytes([input[0], input[1]]) ^ 0x8000) as i16)
        }
        NativeType::Int32 => Value::Int32(
            (u32::from_be_bytes(input[0..4].try_into().unwrap()) ^ 0x8000_0000) as i32,
        ),
        NativeType::Int64 => Value::Int64(temporal::sign_unflip_i64(u64::from_be_bytes(
            input[0..8].try_into().unwrap(),
        ))),
        NativeType::Float32 => Value::Float32(f32::from_be_bytes(input[0..4].try_into().unwrap())),
        NativeType::Float64 => Value::Float64(f64::from_be_bytes(input[0..8].try_into().unwrap())),
        NativeType::Decimal { .. } => Value::Decimal(sign_unflip_i128(u128::from_be_bytes(
            input[0..16].try_into().unwrap(),
        ))),
        NativeType::Number { .. } => Value::Number(sign_unflip_i128(u128::from_be_bytes(
            input[0..16].try_into().unwrap(),
        ))),
        NativeType::Uuid => Value::Uuid(u128::from_be_bytes(input[0..16].try_into().unwrap())),
        NativeType::Bitmask { .. } => Value::Bitmask(input.to_vec()),
        NativeType::Date => Value::Date(temporal::decode_date(input)?),
        NativeType::Time { precision } => Value::Time(temporal::decode_time(input, *precision)?),
        NativeType::Datetime { precision } => {
            Value::Datetime(temporal::decode_datetime(input, *precision)?)
        }
        NativeType::Timestamp { precision } => {
            Value::Timestamp(temporal::decode_timestamp(input, *precision)?)
        }
        NativeType::String | NativeType::Bytes => {
            return Err(RowCodecError::Assembly("variable column decoded as fixed".into()).into())
        }
    })
}

fn encode_variable(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::String(s) => out.extend_from_slice(s.as_bytes()),
        Value::Bytes(b) => out.extend_from_slice(b),
        _ => {
            return Err(RowCodecError::SchemaMismatch(
                "value/type mismatch during variable encode".into(),
            )
            .into())
        }
    }
    Ok(())
}

fn decode_variable(input: &[u8], kind: &NativeType) -> Result<Value> {
    match kind {
        NativeType::String => String::from_utf8(input.to_vec())
            .map(Value::String)
            .map_err(|e| RowCodecError::Assembly(format!("invalid utf-8 string column: {}", e)).into()),
        NativeType::Bytes => Ok(Value::Bytes(input.to_vec())),
        _ => Err(RowCodecError::Assembly("fixed column decoded as variable".into()).into()),
    }
}
