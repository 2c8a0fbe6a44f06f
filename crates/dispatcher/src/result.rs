//! Materialization of drained reduce-stage blocks into the final result.

use floe_common::{DataBlock, DataSchema, Error, Value};

use crate::error::Result;

/// Final output of a query: a schema and its rows in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    data_schema: DataSchema,
    rows: Vec<Vec<Value>>,
}

impl ResultTable {
    pub fn new(data_schema: DataSchema, rows: Vec<Vec<Value>>) -> Self {
        Self { data_schema, rows }
    }

    pub fn data_schema(&self) -> &DataSchema {
        &self.data_schema
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn to_result_schema(input_schema: &DataSchema, fields: &[(usize, String)]) -> Result<DataSchema> {
    let columns = fields
        .iter()
        .map(|(col_ref, name)| {
            input_schema
                .column_data_type(*col_ref)
                .map(|data_type| (name.clone(), data_type))
                .ok_or(Error::ColumnOutOfRange {
                    index: *col_ref,
                    len: input_schema.len(),
                })
        })
        .collect::<std::result::Result<Vec<_>, Error>>()?;
    Ok(DataSchema::new(columns))
}

/// Projects `blocks` through `fields` into a [`ResultTable`].
///
/// Output column `i` is named `fields[i].1` and typed after column
/// `fields[i].0` of `source_schema`. Values are read from the source column
/// and converted to the output type.
///
/// Known limitation: a cell's nullness is read from the block's null bitmap
/// at the *output position* `i`, not at the source column. Projections that
/// reorder or skip leading columns can therefore report nulls for the wrong
/// cells.
pub fn to_result_table(
    blocks: &[DataBlock],
    fields: &[(usize, String)],
    source_schema: &DataSchema,
) -> Result<ResultTable> {
    let result_schema = to_result_schema(source_schema, fields)?;
    let result_types = result_schema.column_data_types();
    let mut result_rows = Vec::new();

    for block in blocks {
        let num_rows = block.num_rows();
        if num_rows == 0 {
            continue;
        }
        let null_bitmaps: Vec<_> = (0..fields.len())
            .map(|col_id| block.null_row_ids(col_id))
            .collect();
        result_rows.reserve(num_rows);

        for row_id in 0..num_rows {
            let bitmap_row_id = u32::try_from(row_id).ok();
            let raw_row = block.extract_row(row_id)?;
            let mut row = Vec::with_capacity(fields.len());
            for (col_id, (col_ref, _)) in fields.iter().enumerate() {
                let is_null = null_bitmaps[col_id]
                    .zip(bitmap_row_id)
                    .is_some_and(|(nulls, id)| nulls.contains(id));
                if is_null {
                    row.push(Value::Null);
                    continue;
                }
                let raw = raw_row.get(*col_ref).cloned().ok_or(Error::ColumnOutOfRange {
                    index: *col_ref,
                    len: raw_row.len(),
                })?;
                row.push(result_types[col_id].convert_and_format(raw)?);
            }
            result_rows.push(row);
        }
    }

    Ok(ResultTable::new(result_schema, result_rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use floe_common::ColumnDataType;

    fn ab_block(rows: Vec<Vec<Value>>) -> DataBlock {
        let schema = DataSchema::new([("A", ColumnDataType::Int), ("B", ColumnDataType::String)]);
        DataBlock::from_rows(schema, rows).unwrap()
    }

    fn ab_schema() -> DataSchema {
        DataSchema::new([("A", ColumnDataType::Int), ("B", ColumnDataType::String)])
    }

    fn fields(pairs: &[(usize, &str)]) -> Vec<(usize, String)> {
        pairs.iter().map(|(i, n)| (*i, n.to_string())).collect()
    }

    #[test]
    fn test_identity_projection_with_nulls() {
        let block = ab_block(vec![
            vec![Value::Int(1), Value::String("x".to_string())],
            vec![Value::Int(2), Value::Null],
        ]);
        let table = to_result_table(&[block], &fields(&[(0, "a"), (1, "b")]), &ab_schema()).unwrap();

        assert_eq!(
            table.data_schema(),
            &DataSchema::new([("a", ColumnDataType::Int), ("b", ColumnDataType::String)])
        );
        assert_eq!(
            table.rows(),
            &[
                vec![Value::Int(1), Value::String("x".to_string())],
                vec![Value::Int(2), Value::Null],
            ]
        );
    }

    #[test]
    fn test_zero_blocks_yield_empty_table() {
        let table = to_result_table(&[], &fields(&[(0, "a")]), &ab_schema()).unwrap();
        assert!(table.is_empty());
        assert_eq!(
            table.data_schema(),
            &DataSchema::new([("a", ColumnDataType::Int)])
        );
    }

    #[test]
    fn test_rows_concatenate_in_block_order() {
        let first = ab_block(vec![vec![Value::Int(1), Value::String("x".to_string())]]);
        let empty = ab_block(vec![]);
        let second = ab_block(vec![
            vec![Value::Int(2), Value::String("y".to_string())],
            vec![Value::Int(3), Value::String("z".to_string())],
        ]);
        let table = to_result_table(
            &[first, empty, second],
            &fields(&[(1, "b")]),
            &ab_schema(),
        )
        .unwrap();
        assert_eq!(
            table.into_rows(),
            vec![
                vec![Value::String("x".to_string())],
                vec![Value::String("y".to_string())],
                vec![Value::String("z".to_string())],
            ]
        );
    }

    #[test]
    fn test_null_lookup_uses_output_position() {
        // B is null in row 0, but the projection puts B first: position 0 reads
        // A's bitmap (no nulls) and position 1 reads B's bitmap.
        let block = ab_block(vec![vec![Value::Int(7), Value::Null]]);
        let table =
            to_result_table(&[block], &fields(&[(1, "b"), (0, "a")]), &ab_schema()).unwrap();
        assert_eq!(
            table.rows(),
            &[vec![Value::String(String::new()), Value::Null]]
        );
    }

    #[test]
    fn test_repeated_source_column() {
        let block = ab_block(vec![vec![Value::Int(4), Value::String("x".to_string())]]);
        let table =
            to_result_table(&[block], &fields(&[(0, "a"), (0, "a2")]), &ab_schema()).unwrap();
        assert_eq!(table.rows(), &[vec![Value::Int(4), Value::Int(4)]]);
    }

    #[test]
    fn test_conversion_failure_aborts() {
        // Block stores LONGs where the source schema declares INT.
        let schema = DataSchema::new([("A", ColumnDataType::Long)]);
        let block = DataBlock::from_rows(schema, vec![vec![Value::Long(1)]]).unwrap();
        let err = to_result_table(&[block], &fields(&[(0, "a")]), &ab_schema()).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Materialization(Error::TypeConversion { .. })
        ));
    }

    #[test]
    fn test_out_of_range_field() {
        let err = to_result_table(&[], &fields(&[(5, "x")]), &ab_schema()).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Materialization(Error::ColumnOutOfRange { index: 5, len: 2 })
        ));
    }
}
