use thiserror::Error;

use crate::types::ColumnDataType;

/// Errors raised while building, decoding or converting row data.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot convert value {value} to {target}")]
    TypeConversion { value: String, target: ColumnDataType },

    #[error("Failed to decode data block: {0}")]
    Decode(String),

    #[error("Failed to encode data block: {0}")]
    Encode(String),

    #[error("Column index {index} out of range for {len} columns")]
    ColumnOutOfRange { index: usize, len: usize },

    #[error("Row index {index} out of range for {len} rows")]
    RowOutOfRange { index: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
