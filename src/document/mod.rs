//! Document-provider backend.
//!
//! Delegates to a [`ContentSource`] collaborator through the resolver
//! shim. Document backends cannot express POSIX semantics, so attributes
//! never carry the POSIX group, and symlink operations are unsupported.

pub mod resolver;

use std::io;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use crate::attr::{FileAttributes, FileType, SymbolicLinkTarget};
use crate::error::{FsError, Result};
use crate::path::VfsPath;
use crate::vfs::{FileSystemProvider, OpenMode, ReadOnlyFile, VfsFile, WriteOnlyFile};

pub use resolver::{ContentSource, RowSet, SourceError, Value};

pub struct DocumentFs {
    source: Arc<dyn ContentSource>,
}

impl DocumentFs {
    pub fn new(source: Arc<dyn ContentSource>) -> Self {
        DocumentFs { source }
    }

    fn uri(path: &VfsPath) -> Result<String> {
        match path {
            VfsPath::Document(_) => Ok(path.to_string()),
            _ => Err(FsError::unsupported(path.to_string(), "not a document path")),
        }
    }
}

impl FileSystemProvider for DocumentFs {
    fn stat(&self, path: &VfsPath, _follow_links: bool) -> Result<FileAttributes> {
        let uri = Self::uri(path)?;
        let rows = resolver::query(
            self.source.as_ref(),
            &uri,
            &[
                resolver::COLUMN_MIME_TYPE,
                resolver::COLUMN_SIZE,
                resolver::COLUMN_LAST_MODIFIED,
            ],
        )?;
        if rows.row_count() < 1 {
            return Err(FsError::not_found(&uri));
        }
        let mime = match rows.first_value(&uri, resolver::COLUMN_MIME_TYPE)? {
            Value::Text(mime) => Some(mime.clone()),
            _ => None,
        };
        let size = match rows.first_value(&uri, resolver::COLUMN_SIZE)? {
            Value::Integer(size) => u64::try_from(*size).unwrap_or(0),
            _ => 0,
        };
        let modified = match rows.first_value(&uri, resolver::COLUMN_LAST_MODIFIED)? {
            Value::Integer(millis) if *millis > 0 => {
                Some(UNIX_EPOCH + Duration::from_millis(*millis as u64))
            }
            _ => None,
        };
        let file_type = if mime.as_deref() == Some(resolver::MIME_TYPE_DIRECTORY) {
            FileType::Directory
        } else {
            FileType::Regular
        };
        Ok(FileAttributes::basic(file_type, size, modified))
    }

    fn list(&self, path: &VfsPath) -> Result<Vec<VfsPath>> {
        let uri = Self::uri(path)?;
        let children = self
            .source
            .list_children(&uri)
            .map_err(|e| resolver::convert(e, &uri))?;
        Ok(children
            .into_iter()
            .map(|child| {
                let rest = child.strip_prefix("content://").unwrap_or(&child).to_string();
                VfsPath::Document(rest)
            })
            .collect())
    }

    fn open(&self, path: &VfsPath, mode: OpenMode) -> Result<Box<dyn VfsFile>> {
        let uri = Self::uri(path)?;
        match mode {
            OpenMode::Read => {
                let stream = resolver::open_read(self.source.as_ref(), &uri)?;
                Ok(Box::new(ReadOnlyFile(stream)))
            }
            OpenMode::Write => {
                let stream = resolver::open_write(self.source.as_ref(), &uri)?;
                Ok(Box::new(WriteOnlyFile(stream)))
            }
            OpenMode::Append => Err(FsError::unsupported(
                path.to_string(),
                "append on a document stream",
            )),
        }
    }

    fn create_directory(&self, path: &VfsPath) -> Result<()> {
        let uri = Self::uri(path)?;
        self.source
            .create_directory(&uri)
            .map_err(|e| resolver::convert(e, &uri))
    }

    fn delete(&self, path: &VfsPath) -> Result<()> {
        let uri = Self::uri(path)?;
        resolver::delete(self.source.as_ref(), &uri)
    }

    fn rename(&self, from: &VfsPath, to: &VfsPath) -> Result<()> {
        let uri = Self::uri(from)?;
        let new_name = to
            .file_name()
            .ok_or_else(|| FsError::generic(to.to_string(), "target has no name"))?;
        self.source
            .rename(&uri, &new_name)
            .map(|_| ())
            .map_err(|e| resolver::convert(e, &uri))
    }

    fn copy(&self, from: &VfsPath, to: &VfsPath) -> Result<()> {
        // Providers rarely offer a native copy; stream within the backend.
        let mut src = self.open(from, OpenMode::Read)?;
        let mut dst = self.open(to, OpenMode::Write)?;
        io::copy(&mut src, &mut dst).map_err(|e| FsError::from_io(e, from.to_string()))?;
        Ok(())
    }

    fn read_symbolic_link(&self, path: &VfsPath) -> Result<SymbolicLinkTarget> {
        Err(FsError::unsupported(path.to_string(), "symbolic links"))
    }

    fn create_symbolic_link(&self, link: &VfsPath, _target: &SymbolicLinkTarget) -> Result<()> {
        Err(FsError::unsupported(link.to_string(), "symbolic links"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Read;

    struct TreeSource {
        docs: HashMap<String, (Option<String>, Vec<u8>)>,
        children: HashMap<String, Vec<String>>,
    }

    impl ContentSource for TreeSource {
        fn query(
            &self,
            uri: &str,
            columns: &[&str],
        ) -> std::result::Result<RowSet, SourceError> {
            let mut rows = RowSet::new(columns.iter().map(|c| c.to_string()).collect());
            if let Some((mime, data)) = self.docs.get(uri) {
                let row = columns
                    .iter()
                    .map(|column| match *column {
                        resolver::COLUMN_MIME_TYPE => {
                            mime.clone().map(Value::Text).unwrap_or(Value::Null)
                        }
                        resolver::COLUMN_SIZE => Value::Integer(data.len() as i64),
                        _ => Value::Null,
                    })
                    .collect();
                rows.push_row(row);
            }
            Ok(rows)
        }

        fn open_read(
            &self,
            uri: &str,
        ) -> std::result::Result<Box<dyn Read + Send>, SourceError> {
            let (_, data) = self.docs.get(uri).ok_or(SourceError::Absent)?;
            Ok(Box::new(std::io::Cursor::new(data.clone())))
        }

        fn open_write(
            &self,
            _uri: &str,
        ) -> std::result::Result<Box<dyn io::Write + Send>, SourceError> {
            Ok(Box::new(std::io::sink()))
        }

        fn delete(&self, _uri: &str) -> std::result::Result<(), SourceError> {
            Ok(())
        }

        fn mime_type(
            &self,
            uri: &str,
        ) -> std::result::Result<Option<String>, SourceError> {
            self.docs
                .get(uri)
                .map(|(mime, _)| mime.clone())
                .ok_or(SourceError::Absent)
        }

        fn list_children(
            &self,
            uri: &str,
        ) -> std::result::Result<Vec<String>, SourceError> {
            self.children.get(uri).cloned().ok_or(SourceError::Absent)
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

    fn fixture() -> DocumentFs {
        let mut docs = HashMap::new();
        docs.insert(
            "content://docs/tree/a".to_string(),
            (Some(resolver::MIME_TYPE_DIRECTORY.to_string()), Vec::new()),
        );
        docs.insert(
            "content://docs/tree/a/b.txt".to_string(),
            (Some("text/plain".to_string()), b"hello".to_vec()),
        );
        let mut children = HashMap::new();
        children.insert(
            "content://docs/tree/a".to_string(),
            vec!["content://docs/tree/a/b.txt".to_string()],
        );
        DocumentFs::new(Arc::new(TreeSource { docs, children }))
    }

    #[test]
    fn directory_mime_marks_directories() {
        let fs = fixture();
        let dir = fs
            .stat(&VfsPath::Document("docs/tree/a".into()), true)
            .unwrap();
        assert!(dir.is_dir());
        assert!(dir.posix.is_none());

        let file = fs
            .stat(&VfsPath::Document("docs/tree/a/b.txt".into()), true)
            .unwrap();
        assert_eq!(file.file_type, FileType::Regular);
        assert_eq!(file.size, 5);
    }

    #[test]
    fn missing_document_is_not_found() {
        let fs = fixture();
        let err = fs
            .stat(&VfsPath::Document("docs/tree/nope".into()), true)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn list_yields_document_paths() {
        let fs = fixture();
        let children = fs.list(&VfsPath::Document("docs/tree/a".into())).unwrap();
        assert_eq!(
            children,
            vec![VfsPath::Document("docs/tree/a/b.txt".into())]
        );
    }

    #[test]
    fn read_streams_document_bytes() {
        let fs = fixture();
        let mut stream = fs
            .open(&VfsPath::Document("docs/tree/a/b.txt".into()), OpenMode::Read)
            .unwrap();
        let mut data = Vec::new();
        stream.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn symlinks_are_unsupported() {
        let fs = fixture();
        let err = fs
            .read_symbolic_link(&VfsPath::Document("docs/tree/a".into()))
            .unwrap_err();
        assert!(matches!(err, FsError::Unsupported { .. }));
    }
}
