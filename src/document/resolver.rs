//! Content-accessor normalization shim.
//!
//! Wraps the platform content-access API (the [`ContentSource`]
//! collaborator) and converts its failure modes into the shared error
//! taxonomy: an absent resource becomes `NotFound`, a security rejection
//! becomes `AccessDenied`, and anything else becomes `Generic` with the
//! original message kept as diagnostic context.

use std::io::{Read, Write};

use thiserror::Error;

use crate::error::{FsError, Result};

pub const COLUMN_DISPLAY_NAME: &str = "display_name";
pub const COLUMN_SIZE: &str = "size";
pub const COLUMN_MIME_TYPE: &str = "mime_type";
pub const COLUMN_LAST_MODIFIED: &str = "last_modified";

/// The placeholder MIME type content providers hand out when they have no
/// real answer; normalized to "unknown" rather than a false concrete type.
pub const MIME_TYPE_GENERIC: &str = "application/octet-stream";
/// The MIME type marking a document-tree directory.
pub const MIME_TYPE_DIRECTORY: &str = "vnd.polyfs.document/directory";

/// Failure modes of the underlying content-access API, as the collaborator
/// reports them.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("resource is absent")]
    Absent,
    #[error("security rejection: {0}")]
    Security(String),
    #[error("{0}")]
    Other(String),
}

/// A cursor-like, fully materialized result set from a content query.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Text(String),
}

impl RowSet {
    pub fn new(columns: Vec<String>) -> Self {
        RowSet { columns, rows: Vec::new() }
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// The first row, required to exist (the `moveToFirst` contract).
    pub fn first_row(&self, uri: &str) -> Result<&[Value]> {
        self.rows.first().map(Vec::as_slice).ok_or_else(|| {
            FsError::not_found(uri).with_source(SourceError::Other(format!(
                "row count {} is less than 1",
                self.rows.len()
            )))
        })
    }

    /// A named column's value in the first row. An absent column is a
    /// typed error, never a default value.
    pub fn first_value(&self, uri: &str, column: &str) -> Result<&Value> {
        let row = self.first_row(uri)?;
        let index = self
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| {
                FsError::generic(uri, format!("column {column} is absent from the result set"))
            })?;
        Ok(&row[index])
    }
}

/// The platform content-access collaborator. Only the contract is part of
/// the core; a real binding lives outside it.
pub trait ContentSource: Send + Sync {
    fn query(&self, uri: &str, columns: &[&str]) -> std::result::Result<RowSet, SourceError>;
    fn open_read(&self, uri: &str)
        -> std::result::Result<Box<dyn Read + Send>, SourceError>;
    fn open_write(&self, uri: &str)
        -> std::result::Result<Box<dyn Write + Send>, SourceError>;
    fn delete(&self, uri: &str) -> std::result::Result<(), SourceError>;
    fn mime_type(&self, uri: &str) -> std::result::Result<Option<String>, SourceError>;
    /// Child document URIs of a tree directory.
    fn list_children(&self, uri: &str) -> std::result::Result<Vec<String>, SourceError>;
    fn create_directory(&self, uri: &str) -> std::result::Result<(), SourceError>;
    fn rename(&self, uri: &str, new_name: &str) -> std::result::Result<String, SourceError>;
}

/// Convert a collaborator failure into the shared taxonomy.
pub fn convert(err: SourceError, uri: &str) -> FsError {
    match err {
        SourceError::Absent => FsError::not_found(uri).with_source(err),
        SourceError::Security(ref detail) => {
            let detail = detail.clone();
            FsError::AccessDenied { path: uri.to_string(), detail: Some(detail), source: Some(err.into()) }
        }
        SourceError::Other(ref message) => {
            let message = message.clone();
            FsError::Generic { path: uri.to_string(), message, source: Some(err.into()) }
        }
    }
}

pub fn query(source: &dyn ContentSource, uri: &str, columns: &[&str]) -> Result<RowSet> {
    source.query(uri, columns).map_err(|e| convert(e, uri))
}

/// Require the resource to exist: a zero-row result is `NotFound`.
pub fn check_existence(source: &dyn ContentSource, uri: &str) -> Result<()> {
    let rows = query(source, uri, &[])?;
    if rows.row_count() < 1 {
        return Err(FsError::not_found(uri).with_source(SourceError::Other(format!(
            "row count {} is less than 1",
            rows.row_count()
        ))));
    }
    Ok(())
}

pub fn exists(source: &dyn ContentSource, uri: &str) -> bool {
    check_existence(source, uri).is_ok()
}

pub fn display_name(source: &dyn ContentSource, uri: &str) -> Result<Option<String>> {
    let rows = query(source, uri, &[COLUMN_DISPLAY_NAME])?;
    match rows.first_value(uri, COLUMN_DISPLAY_NAME)? {
        Value::Text(name) if !name.is_empty() => Ok(Some(name.clone())),
        _ => Ok(None),
    }
}

pub fn size(source: &dyn ContentSource, uri: &str) -> Result<Option<u64>> {
    let rows = query(source, uri, &[COLUMN_SIZE])?;
    match rows.first_value(uri, COLUMN_SIZE)? {
        Value::Integer(size) => Ok(u64::try_from(*size).ok()),
        _ => Ok(None),
    }
}

/// The resource's MIME type; empty and generic-placeholder answers
/// normalize to `None` rather than a false-positive concrete type.
pub fn mime_type(source: &dyn ContentSource, uri: &str) -> Result<Option<String>> {
    let mime = source.mime_type(uri).map_err(|e| convert(e, uri))?;
    Ok(mime.filter(|m| !m.is_empty() && m != MIME_TYPE_GENERIC))
}

pub fn open_read(
    source: &dyn ContentSource,
    uri: &str,
) -> Result<Box<dyn Read + Send>> {
    source.open_read(uri).map_err(|e| convert(e, uri))
}

pub fn open_write(
    source: &dyn ContentSource,
    uri: &str,
) -> Result<Box<dyn Write + Send>> {
    source.open_write(uri).map_err(|e| convert(e, uri))
}

pub fn delete(source: &dyn ContentSource, uri: &str) -> Result<()> {
    source.delete(uri).map_err(|e| convert(e, uri))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory stand-in for a platform content provider.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub docs: HashMap<String, FakeDoc>,
        pub deny: bool,
    }

    #[derive(Clone, Default)]
    pub(crate) struct FakeDoc {
        pub name: String,
        pub size: i64,
        pub mime: Option<String>,
        pub omit_size_column: bool,
    }

    impl ContentSource for FakeSource {
        fn query(
            &self,
            uri: &str,
            columns: &[&str],
        ) -> std::result::Result<RowSet, SourceError> {
            if self.deny {
                return Err(SourceError::Security("caller lacks grant".into()));
            }
            let mut rows = RowSet::new(columns.iter().map(|c| c.to_string()).collect());
            let Some(doc) = self.docs.get(uri) else {
                return Ok(rows);
            };
            if doc.omit_size_column {
                rows = RowSet::new(
                    columns
                        .iter()
                        .filter(|c| **c != COLUMN_SIZE)
                        .map(|c| c.to_string())
                        .collect(),
                );
            }
            let row = rows
                .columns
                .iter()
                .map(|column| match column.as_str() {
                    COLUMN_DISPLAY_NAME => Value::Text(doc.name.clone()),
                    COLUMN_SIZE => Value::Integer(doc.size),
                    COLUMN_MIME_TYPE => doc
                        .mime
                        .clone()
                        .map(Value::Text)
                        .unwrap_or(Value::Null),
                    _ => Value::Null,
                })
                .collect();
            rows.push_row(row);
            Ok(rows)
        }

        fn open_read(
            &self,
            _uri: &str,
        ) -> std::result::Result<Box<dyn Read + Send>, SourceError> {
            Err(SourceError::Other("not wired in this fake".into()))
        }

        fn open_write(
            &self,
            _uri: &str,
        ) -> std::result::Result<Box<dyn Write + Send>, SourceError> {
            Err(SourceError::Other("not wired in this fake".into()))
        }

        fn delete(&self, uri: &str) -> std::result::Result<(), SourceError> {
            if self.docs.contains_key(uri) {
                Ok(())
            } else {
                Err(SourceError::Absent)
            }
        }

        fn mime_type(
            &self,
            uri: &str,
        ) -> std::result::Result<Option<String>, SourceError> {
            self.docs
                .get(uri)
                .map(|doc| doc.mime.clone())
                .ok_or(SourceError::Absent)
        }

        fn list_children(
            &self,
            _uri: &str,
        ) -> std::result::Result<Vec<String>, SourceError> {
            Ok(Vec::new())
        }

        fn create_directory(&self, _uri: &str) -> std::result::Result<(), SourceError> {
            Ok(())
        }

        fn rename(
            &self,
            _uri: &str,
            new_name: &str,
        ) -> std::result::Result<String, SourceError> {
            Ok(new_name.to_string())
        }
    }

    fn source_with(uri: &str, doc: FakeDoc) -> FakeSource {
        let mut source = FakeSource::default();
        source.docs.insert(uri.to_string(), doc);
        source
    }

    #[test]
    fn zero_rows_is_not_found() {
        let source = FakeSource::default();
        let err = check_existence(&source, "content://docs/1").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn absent_column_is_a_distinct_error() {
        let source = source_with(
            "content://docs/1",
            FakeDoc { name: "report.pdf".into(), omit_size_column: true, ..Default::default() },
        );
        let err = size(&source, "content://docs/1").unwrap_err();
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("column size"));
    }

    #[test]
    fn security_rejection_maps_to_access_denied() {
        let source = FakeSource { deny: true, ..Default::default() };
        let err = display_name(&source, "content://docs/1").unwrap_err();
        assert!(err.is_access_denied());
    }

    #[test]
    fn generic_mime_normalizes_to_unknown() {
        let source = source_with(
            "content://docs/1",
            FakeDoc { mime: Some(MIME_TYPE_GENERIC.into()), ..Default::default() },
        );
        assert_eq!(mime_type(&source, "content://docs/1").unwrap(), None);

        let source = source_with(
            "content://docs/1",
            FakeDoc { mime: Some(String::new()), ..Default::default() },
        );
        assert_eq!(mime_type(&source, "content://docs/1").unwrap(), None);

        let source = source_with(
            "content://docs/1",
            FakeDoc { mime: Some("text/plain".into()), ..Default::default() },
        );
        assert_eq!(
            mime_type(&source, "content://docs/1").unwrap().as_deref(),
            Some("text/plain")
        );
    }

    #[test]
    fn empty_display_name_is_none() {
        let source = source_with("content://docs/1", FakeDoc::default());
        assert_eq!(display_name(&source, "content://docs/1").unwrap(), None);
    }
}
