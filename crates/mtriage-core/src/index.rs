//! Element indexes: the tabular output of a selector's index phase

use crate::error::StorageError;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

pub const ID_COLUMN: &str = "id";

/// A header row plus data rows; exactly one column is named `id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementIndex {
    headers: Arc<[String]>,
    id_column: usize,
    rows: Vec<Vec<String>>,
}

impl ElementIndex {
    pub fn new<I, S>(headers: I) -> Result<Self, StorageError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let headers: Vec<String> = headers.into_iter().map(Into::into).collect();
        let id_column = id_position(&headers)?;
        Ok(Self {
            headers: headers.into(),
            id_column,
            rows: Vec::new(),
        })
    }

    /// Build an index from a table whose first row is the header
    pub fn from_table(table: Vec<Vec<String>>) -> Result<Self, StorageError> {
        let mut rows = table.into_iter();
        let headers = rows.next().ok_or(StorageError::MissingIdColumn)?;
        let mut index = Self::new(headers)?;
        for row in rows {
            index.push(row)?;
        }
        Ok(index)
    }

    pub fn push<I, S>(&mut self, row: I) -> Result<(), StorageError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let row: Vec<String> = row.into_iter().map(Into::into).collect();
        if row.len() != self.headers.len() {
            return Err(StorageError::RowLength {
                row: self.rows.len() + 1,
                found: row.len(),
                expected: self.headers.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = IndexRow> + '_ {
        self.rows.iter().map(|values| IndexRow {
            headers: Arc::clone(&self.headers),
            id_column: self.id_column,
            values: values.clone(),
        })
    }

    pub(crate) fn write_csv(&self, path: &Path) -> Result<(), StorageError> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(self.headers.iter())?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn id_position(headers: &[String]) -> Result<usize, StorageError> {
    headers
        .iter()
        .position(|h| h == ID_COLUMN)
        .ok_or(StorageError::MissingIdColumn)
}

/// One row of an element index, addressable by column name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    headers: Arc<[String]>,
    id_column: usize,
    values: Vec<String>,
}

impl IndexRow {
    pub fn id(&self) -> &str {
        self.values
            .get(self.id_column)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        let pos = self.headers.iter().position(|h| h == column)?;
        self.values.get(pos).map(String::as_str)
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// Rows streamed lazily from an element index file
pub struct IndexRows {
    headers: Arc<[String]>,
    id_column: usize,
    records: csv::StringRecordsIntoIter<File>,
    row: usize,
}

impl IndexRows {
    pub(crate) fn open(path: &Path) -> Result<Self, StorageError> {
        if !path.is_file() {
            return Err(StorageError::IndexNotFound(path.to_path_buf()));
        }
        let mut reader = csv::Reader::from_path(path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let id_column = id_position(&headers)?;
        Ok(Self {
            headers: headers.into(),
            id_column,
            records: reader.into_records(),
            row: 0,
        })
    }
}

impl Iterator for IndexRows {
    type Item = Result<IndexRow, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        self.row += 1;
        Some(
            record
                .map_err(StorageError::from)
                .and_then(|record| {
                    if record.len() != self.headers.len() {
                        return Err(StorageError::RowLength {
                            row: self.row,
                            found: record.len(),
                            expected: self.headers.len(),
                        });
                    }
                    Ok(IndexRow {
                        headers: Arc::clone(&self.headers),
                        id_column: self.id_column,
                        values: record.iter().map(str::to_string).collect(),
                    })
                }),
        )
    }
}
