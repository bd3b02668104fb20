//! Binary Row & Tuple Codec.
//!
//! A fixed schema-versioned row layout (header, key chunk, value chunk)
//! plus the sort-order-preserving temporal encodings the storage layer's
//! key comparator relies on.

pub mod chunk;
pub mod errors;
pub mod schema;
pub mod temporal;
pub mod value;

pub use errors::RowCodecError;
pub use schema::{Column, NativeType, Schema};
pub use value::Value;

use common::errors::Result;
use common::hash;

/// Bit 0 of the row header flags: set when the row carries no value chunk
/// at all (a pure key probe, as opposed to a value-less but present value
/// chunk).
const FLAG_KEY_ONLY: u8 = 0x1;

/// A fully assembled, self-describing row: header plus the encoded key and
/// value chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Zero iff the row has no value columns ("key only"), per the schema
    /// invariant. Otherwise the schema version the row was assembled
    /// against.
    pub schema_version: u32,
    pub flags: u8,
    pub key_hash: u32,
    pub key_chunk: Vec<u8>,
    pub value_chunk: Vec<u8>,
}

impl Row {
    pub fn is_key_only(&self) -> bool {
        self.schema_version == 0
    }

    /// Serializes the header + both chunks into one contiguous buffer, the
    /// format used for on-disk/on-wire storage of a row version.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9 + self.key_chunk.len() + self.value_chunk.len());
        out.extend_from_slice(&self.schema_version.to_be_bytes());
        out.push(self.flags);
        out.extend_from_slice(&self.key_hash.to_be_bytes());
        out.extend_from_slice(&(self.key_chunk.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.key_chunk);
        out.extend_from_slice(&self.value_chunk);
        out
    }

    pub fn from_bytes(mut input: &[u8]) -> Result<Self> {
        if input.len() < 13 {
            return Err(RowCodecError::Assembly("row header truncated".into()).into());
        }
        let schema_version = u32::from_be_bytes(input[0..4].try_into().unwrap());
        let flags = input[4];
        let key_hash = u32::from_be_bytes(input[5..9].try_into().unwrap());
        let key_len = u32::from_be_bytes(input[9..13].try_into().unwrap()) as usize;
        input = &input[13..];
        if input.len() < key_len {
            return Err(RowCodecError::Assembly("row key chunk truncated".into()).into());
        }
        let key_chunk = input[..key_len].to_vec();
        let value_chunk = input[key_len..].to_vec();

        Ok(Row {
            schema_version,
            flags,
            key_hash,
            key_chunk,
            value_chunk,
        })
    }
}

/// Assembles a row from values supplied in schema order. `key_values` and
/// `value_values` must each be in the exact order their respective column
/// lists appear in `schema` -- reordering is a precondition violation and
/// will produce a `SchemaMismatch` as soon as a type disagrees.
pub fn assemble(schema: &Schema, key_values: &[Value], value_values: &[Value]) -> Result<Row> {
    if key_values.len() != schema.key_columns.len() {
        return Err(RowCodecError::SchemaMismatch(format!(
            "expected {} key columns, got {}",
            schema.key_columns.len(),
            key_values.len()
        ))
        .into());
    }
    if value_values.len() != schema.value_columns.len() {
        return Err(RowCodecError::SchemaMismatch(format!(
            "expected {} value columns, got {}",
            schema.value_columns.len(),
            value_values.len()
        ))
        .into());
    }

    let key_chunk = chunk::encode_chunk(&schema.key_columns, key_values)?;
    let value_chunk = if schema.value_columns.is_empty() {
        Vec::new()
    } else {
        chunk::encode_chunk(&schema.value_columns, value_values)?
    };

    let key_hash = hash::stable_hash32(&key_chunk);
    let schema_version = if schema.value_columns.is_empty() {
        0
    } else {
        schema.version
    };
    let flags = if schema.value_columns.is_empty() {
        FLAG_KEY_ONLY
    } else {
        0
    };

    Ok(Row {
        schema_version,
        flags,
        key_hash,
        key_chunk,
        value_chunk,
    })
}

/// Reads the value at `index` in the combined (key columns, then value
/// columns) column order.
pub fn read_column(row: &Row, schema: &Schema, index: usize) -> Result<Value> {
    if index < schema.key_columns.len() {
        chunk::decode_column(&row.key_chunk, &schema.key_columns, index)
    } else {
        let value_index = index - schema.key_columns.len();
        if value_index >= schema.value_columns.len() {
            return Err(RowCodecError::SchemaMismatch(format!(
                "column index {} out of range",
                index
            ))
            .into());
        }
        if row.value_chunk.is_empty() {
            return Ok(Value::Null);
        }
        chunk::decode_column(&row.value_chunk, &schema.value_columns, value_index)
    }
}

/// Hashes the key chunk's encoded payload bytes with the stable 32-bit hash
/// and maps it into a partition id. This is the single source of truth that
/// both the server (storage placement) and the client (`router` crate)
/// must agree on bit-for-bit.
pub fn compute_colocation_hash(row: &Row) -> i32 {
    hash::stable_hash32(&row.key_chunk) as i32
}

pub fn colocation_partition(row: &Row, partitions: u32) -> u32 {
    hash::hash_to_partition(compute_colocation_hash(row) as u32, partitions)
}
