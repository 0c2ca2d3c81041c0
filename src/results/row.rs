use std::collections::HashMap;
use std::sync::Arc;

use crate::types::RowValues;

/// A single row pulled from a cursor.
///
/// Column names are shared by every row of one execution, so cloning a row only
/// copies its values.
#[derive(Debug, Clone)]
pub struct CustomDbRow {
    /// The column names for this row (shared across all rows of an execution)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub rows: Vec<RowValues>,
    column_index_cache: Arc<HashMap<String, usize>>,
}

impl CustomDbRow {
    /// Create a new row, building its own column index.
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, rows: Vec<RowValues>) -> Self {
        let cache = Arc::new(column_index(&column_names));
        Self {
            column_names,
            rows,
            column_index_cache: cache,
        }
    }

    /// Create a row that reuses the column layout of an existing one.
    ///
    /// Cursors call this for every row after the first so the index is built once.
    #[must_use]
    pub fn with_layout(layout: &RowLayout, rows: Vec<RowValues>) -> Self {
        Self {
            column_names: Arc::clone(&layout.column_names),
            rows,
            column_index_cache: Arc::clone(&layout.index),
        }
    }

    /// Get the index of a column by name
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.column_index_cache.get(column_name) {
            return Some(idx);
        }
        self.column_names.iter().position(|col| col == column_name)
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.rows.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.rows.get(index)
    }
}

/// Column names plus their lookup index, shared by all rows of one cursor.
#[derive(Debug, Clone)]
pub struct RowLayout {
    column_names: Arc<Vec<String>>,
    index: Arc<HashMap<String, usize>>,
}

impl RowLayout {
    #[must_use]
    pub fn new(column_names: Vec<String>) -> Self {
        let index = Arc::new(column_index(&column_names));
        Self {
            column_names: Arc::new(column_names),
            index,
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }
}

fn column_index(column_names: &[String]) -> HashMap<String, usize> {
    column_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_share_layout_lookup() {
        let layout = RowLayout::new(vec!["id".into(), "name".into()]);
        let row = CustomDbRow::with_layout(
            &layout,
            vec![RowValues::Int(7), RowValues::Text("seven".into())],
        );
        assert_eq!(row.get("name"), Some(&RowValues::Text("seven".into())));
        assert_eq!(row.get_by_index(0), Some(&RowValues::Int(7)));
        assert!(row.get("missing").is_none());
    }
}
