use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::ColumnDataType;

/// Ordered list of column names and their declared types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSchema {
    column_names: Vec<String>,
    column_data_types: Vec<ColumnDataType>,
}

impl DataSchema {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = (S, ColumnDataType)>,
        S: Into<String>,
    {
        let (column_names, column_data_types) = columns
            .into_iter()
            .map(|(name, data_type)| (name.into(), data_type))
            .unzip();
        Self {
            column_names,
            column_data_types,
        }
    }

    pub fn len(&self) -> usize {
        self.column_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.column_names.is_empty()
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn column_data_types(&self) -> &[ColumnDataType] {
        &self.column_data_types
    }

    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.column_names.get(index).map(String::as_str)
    }

    pub fn column_data_type(&self, index: usize) -> Option<ColumnDataType> {
        self.column_data_types.get(index).copied()
    }
}

impl fmt::Display for DataSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (name, data_type)) in self
            .column_names
            .iter()
            .zip(&self.column_data_types)
            .enumerate()
        {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}({data_type})")?;
        }
        f.write_str("]")
    }
}
