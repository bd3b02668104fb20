use std::fmt;

/// Closed set of failure modes for the row/tuple codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowCodecError {
    /// A value's runtime type does not match the column's declared type.
    SchemaMismatch(String),
    /// A decimal/number value exceeds its column's declared precision.
    PrecisionExceeded(String),
    /// Encoding or decoding produced an unrepresentable byte/character
    /// sequence (e.g. a string column's bytes are not valid UTF-8).
    Assembly(String),
}

impl fmt::Display for RowCodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowCodecError::SchemaMismatch(msg) => write!(f, "schema mismatch: {}", msg),
            RowCodecError::PrecisionExceeded(msg) => write!(f, "precision exceeded: {}", msg),
            RowCodecError::Assembly(msg) => write!(f, "assembly error: {}", msg),
        }
    }
}

impl std::error::Error for RowCodecError {}
