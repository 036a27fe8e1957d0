//! Dataset schema and row model.
//!
//! A schema is an ordered list of named, typed columns; rows are flat JSON
//! objects keyed by the exact column names. Rows live in memory for the
//! lifetime of an upload session; order is insertion order from the source
//! file.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Column value type inferred at upload time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Number,
    String,
    Date,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Number => "number",
            ColumnType::String => "string",
            ColumnType::Date => "date",
        }
    }
}

/// A named, typed column. Names are case-sensitive and used verbatim as
/// row keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

/// Ordered column list shared by every row of a dataset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Column>,
}

/// One record: column name -> scalar value. Missing and null cells are
/// equivalent to the executor.
pub type Row = serde_json::Map<String, Value>;

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Column names in schema order.
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Names of columns typed as numbers. Callers that profiled the data at
    /// upload time usually pass their own list instead.
    pub fn numeric_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.ty == ColumnType::Number)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
