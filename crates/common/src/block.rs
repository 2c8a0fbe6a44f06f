//! Row-major binary data block.
//!
//! Every row occupies a fixed-size slot holding one fixed-width cell per
//! column. Numeric cells are stored inline in little-endian order; string
//! and bytes cells store a `(u32 offset, u32 length)` pair pointing into a
//! shared variable-length section. Null cells are zero-filled and recorded
//! in a per-column roaring bitmap of row ids.

use roaring::RoaringBitmap;

use crate::error::{Error, Result};
use crate::schema::DataSchema;
use crate::types::{ColumnDataType, Value};

fn fixed_width(data_type: ColumnDataType) -> usize {
    match data_type {
        ColumnDataType::Int | ColumnDataType::Float | ColumnDataType::Boolean => 4,
        ColumnDataType::Long | ColumnDataType::Double | ColumnDataType::Timestamp => 8,
        ColumnDataType::String | ColumnDataType::Bytes => 8,
    }
}

fn column_layout(schema: &DataSchema) -> (Vec<usize>, usize) {
    let mut offsets = Vec::with_capacity(schema.len());
    let mut row_size = 0;
    for data_type in schema.column_data_types() {
        offsets.push(row_size);
        row_size += fixed_width(*data_type);
    }
    (offsets, row_size)
}

/// A self-describing batch of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
    schema: DataSchema,
    num_rows: usize,
    row_size: usize,
    column_offsets: Vec<usize>,
    fixed_data: Vec<u8>,
    variable_data: Vec<u8>,
    null_row_ids: Vec<Option<RoaringBitmap>>,
}

impl DataBlock {
    /// Encodes `rows` against `schema` in one go.
    pub fn from_rows(schema: DataSchema, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut builder = DataBlockBuilder::new(schema);
        for row in rows {
            builder.append_row(row)?;
        }
        Ok(builder.build())
    }

    pub fn schema(&self) -> &DataSchema {
        &self.schema
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Row ids that are null in column `col_id`, or `None` when the column has
    /// no nulls or does not exist in this block.
    pub fn null_row_ids(&self, col_id: usize) -> Option<&RoaringBitmap> {
        self.null_row_ids.get(col_id).and_then(Option::as_ref)
    }

    /// Decodes every column of `row_id` in schema order, using the stored
    /// representation of each column type. Null cells decode to their
    /// zero value; consult [`DataBlock::null_row_ids`] for nullness.
    pub fn extract_row(&self, row_id: usize) -> Result<Vec<Value>> {
        (0..self.schema.len())
            .map(|col_id| self.value(row_id, col_id))
            .collect()
    }

    pub fn value(&self, row_id: usize, col_id: usize) -> Result<Value> {
        if row_id >= self.num_rows {
            return Err(Error::RowOutOfRange {
                index: row_id,
                len: self.num_rows,
            });
        }
        let data_type = self
            .schema
            .column_data_type(col_id)
            .ok_or(Error::ColumnOutOfRange {
                index: col_id,
                len: self.schema.len(),
            })?;
        let pos = row_id * self.row_size + self.column_offsets[col_id];

        let value = match data_type {
            ColumnDataType::Int | ColumnDataType::Boolean => {
                Value::Int(i32::from_le_bytes(self.read_fixed(pos)?))
            }
            ColumnDataType::Long | ColumnDataType::Timestamp => {
                Value::Long(i64::from_le_bytes(self.read_fixed(pos)?))
            }
            ColumnDataType::Float => Value::Float(f32::from_le_bytes(self.read_fixed(pos)?)),
            ColumnDataType::Double => Value::Double(f64::from_le_bytes(self.read_fixed(pos)?)),
            ColumnDataType::String => {
                let bytes = self.read_variable(pos)?;
                let s = std::str::from_utf8(bytes).map_err(|e| {
                    Error::Decode(format!("invalid utf-8 at row {row_id} column {col_id}: {e}"))
                })?;
                Value::String(s.to_string())
            }
            ColumnDataType::Bytes => Value::Bytes(self.read_variable(pos)?.to_vec()),
        };
        Ok(value)
    }

    fn read_fixed<const N: usize>(&self, pos: usize) -> Result<[u8; N]> {
        self.fixed_data
            .get(pos..pos + N)
            .and_then(|slice| slice.try_into().ok())
            .ok_or_else(|| Error::Decode(format!("fixed section truncated at offset {pos}")))
    }

    fn read_variable(&self, pos: usize) -> Result<&[u8]> {
        let offset = u32::from_le_bytes(self.read_fixed(pos)?) as usize;
        let len = u32::from_le_bytes(self.read_fixed(pos + 4)?) as usize;
        self.variable_data
            .get(offset..offset + len)
            .ok_or_else(|| {
                Error::Decode(format!(
                    "variable section slice {offset}..{} out of bounds",
                    offset + len
                ))
            })
    }
}

/// Incrementally encodes rows into a [`DataBlock`].
#[derive(Debug)]
pub struct DataBlockBuilder {
    schema: DataSchema,
    num_rows: usize,
    row_size: usize,
    column_offsets: Vec<usize>,
    fixed_data: Vec<u8>,
    variable_data: Vec<u8>,
    null_row_ids: Vec<Option<RoaringBitmap>>,
}

impl DataBlockBuilder {
    pub fn new(schema: DataSchema) -> Self {
        let (column_offsets, row_size) = column_layout(&schema);
        let null_row_ids = vec![None; schema.len()];
        Self {
            schema,
            num_rows: 0,
            row_size,
            column_offsets,
            fixed_data: Vec::new(),
            variable_data: Vec::new(),
            null_row_ids,
        }
    }

    /// Appends one row. On error the builder is left unchanged.
    pub fn append_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.schema.len() {
            return Err(Error::Encode(format!(
                "row has {} values but schema {} has {} columns",
                row.len(),
                self.schema,
                self.schema.len()
            )));
        }
        let row_id = u32::try_from(self.num_rows)
            .map_err(|_| Error::Encode("row count exceeds u32::MAX".to_string()))?;

        let mut fixed = Vec::with_capacity(self.row_size);
        let mut variable = Vec::new();
        let mut null_columns = Vec::new();

        for (col_id, (value, data_type)) in row
            .into_iter()
            .zip(self.schema.column_data_types())
            .enumerate()
        {
            match (*data_type, value) {
                (data_type, Value::Null) => {
                    null_columns.push(col_id);
                    fixed.resize(fixed.len() + fixed_width(data_type), 0);
                }
                (ColumnDataType::Int, Value::Int(v)) => fixed.extend_from_slice(&v.to_le_bytes()),
                (ColumnDataType::Boolean, Value::Boolean(v)) => {
                    fixed.extend_from_slice(&i32::from(v).to_le_bytes())
                }
                (ColumnDataType::Boolean, Value::Int(v @ (0 | 1))) => {
                    fixed.extend_from_slice(&v.to_le_bytes())
                }
                (ColumnDataType::Long | ColumnDataType::Timestamp, Value::Long(v)) => {
                    fixed.extend_from_slice(&v.to_le_bytes())
                }
                (ColumnDataType::Float, Value::Float(v)) => {
                    fixed.extend_from_slice(&v.to_le_bytes())
                }
                (ColumnDataType::Double, Value::Double(v)) => {
                    fixed.extend_from_slice(&v.to_le_bytes())
                }
                (ColumnDataType::String, Value::String(s)) => {
                    let base = self.variable_data.len() + variable.len();
                    write_variable(&mut fixed, base, s.as_bytes())?;
                    variable.extend_from_slice(s.as_bytes());
                }
                (ColumnDataType::Bytes, Value::Bytes(b)) => {
                    let base = self.variable_data.len() + variable.len();
                    write_variable(&mut fixed, base, &b)?;
                    variable.extend_from_slice(&b);
                }
                (data_type, value) => {
                    return Err(Error::Encode(format!(
                        "value {value} does not match column {col_id} of type {data_type}"
                    )))
                }
            }
        }

        self.fixed_data.extend_from_slice(&fixed);
        self.variable_data.extend_from_slice(&variable);
        for col_id in null_columns {
            self.null_row_ids[col_id]
                .get_or_insert_with(RoaringBitmap::new)
                .insert(row_id);
        }
        self.num_rows += 1;
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn build(self) -> DataBlock {
        DataBlock {
            schema: self.schema,
            num_rows: self.num_rows,
            row_size: self.row_size,
            column_offsets: self.column_offsets,
            fixed_data: self.fixed_data,
            variable_data: self.variable_data,
            null_row_ids: self.null_row_ids,
        }
    }
}

fn write_variable(fixed: &mut Vec<u8>, offset: usize, bytes: &[u8]) -> Result<()> {
    let offset = u32::try_from(offset)
        .map_err(|_| Error::Encode("variable section exceeds u32::MAX bytes".to_string()))?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::Encode("variable value exceeds u32::MAX bytes".to_string()))?;
    fixed.extend_from_slice(&offset.to_le_bytes());
    fixed.extend_from_slice(&len.to_le_bytes());
    Ok(())
}
