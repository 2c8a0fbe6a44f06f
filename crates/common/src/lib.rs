//! Common crate
//!
//! Shared data model for Floe: column types and values, data schemas, the
//! binary row-encoded [`DataBlock`] exchanged between stages, and the error
//! type used while encoding, decoding and converting values.
//!
//! # Example
//! ```rust
//! use floe_common::{ColumnDataType, DataBlockBuilder, DataSchema, Value};
//!
//! let schema = DataSchema::new([("id", ColumnDataType::Int)]);
//! let mut builder = DataBlockBuilder::new(schema);
//! builder.append_row(vec![Value::Int(7)]).unwrap();
//! let block = builder.build();
//! assert_eq!(block.extract_row(0).unwrap(), vec![Value::Int(7)]);
//! ```

pub mod block;
pub mod error;
pub mod instance;
pub mod schema;
pub mod types;

pub use block::{DataBlock, DataBlockBuilder};
pub use error::{Error, Result};
pub use instance::ServerInstance;
pub use schema::DataSchema;
pub use types::{ColumnDataType, Value};
