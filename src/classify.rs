//! Column classification heuristics.
//!
//! Partitions a schema into numeric and non-numeric columns and ranks the
//! non-numeric ones by how likely they are to act as a categorical filter
//! or grouping key. Best-effort: the priority lists can misjudge unusual
//! schemas, but the result is deterministic for a given input.

use lazy_static::lazy_static;
use regex::Regex;

use crate::schema::Schema;
use crate::text::normalize;

lazy_static! {
    /// Ordered priority groups for the filterable-column heuristic.
    /// Earlier groups win; the first column matching a group is returned.
    static ref FILTER_PRIORITY: Vec<Regex> = vec![
        Regex::new(r"dept|department|major|role|position|team|category|type|class|subject|course|branch|group|title|title_name").unwrap(),
        Regex::new(r"name|full_name|student|employee|person").unwrap(),
        Regex::new(r"city|state|country|region").unwrap(),
    ];
}

/// Schema columns split by numeric-ness, preserving schema order.
#[derive(Debug, Clone, Default)]
pub struct ColumnPartition {
    pub numeric: Vec<String>,
    pub non_numeric: Vec<String>,
}

/// Split schema columns into numeric and non-numeric, honoring an
/// externally supplied numeric list (upload profiling knows better than
/// declared types). Falls back to schema types when the list is empty.
pub fn partition_columns(schema: &Schema, numeric_columns: &[String]) -> ColumnPartition {
    let numeric: Vec<String> = if numeric_columns.is_empty() {
        schema.numeric_columns()
    } else {
        numeric_columns.to_vec()
    };

    let non_numeric = schema
        .names()
        .into_iter()
        .filter(|n| !numeric.contains(n))
        .collect();

    ColumnPartition { numeric, non_numeric }
}

/// Pick the non-numeric column most likely to be a useful filter or
/// grouping key. Returns `None` only when the candidate list is empty.
pub fn pick_filter_column(non_numeric_cols: &[String]) -> Option<String> {
    if non_numeric_cols.is_empty() {
        return None;
    }
    for pattern in FILTER_PRIORITY.iter() {
        if let Some(found) = non_numeric_cols.iter().find(|c| pattern.is_match(&normalize(c))) {
            return Some(found.clone());
        }
    }
    Some(non_numeric_cols[0].clone())
}
