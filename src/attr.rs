//! Normalized file metadata shared by every backend.

use std::ffi::OsString;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// The kind of object a path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    /// Sockets, fifos, device nodes and anything else a backend may expose.
    Other,
}

impl FileType {
    pub fn is_dir(self) -> bool {
        self == FileType::Directory
    }

    pub fn is_symlink(self) -> bool {
        self == FileType::Symlink
    }
}

/// POSIX ownership and permission metadata.
///
/// Present as a group or absent as a group: a backend that cannot express
/// POSIX semantics (e.g. the document provider) leaves the whole group off
/// via `FileAttributes::posix == None`, never a partial record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosixAttributes {
    /// Raw mode bits, permission part only (e.g. `0o755`).
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Symbolic owner name when the backend can resolve one.
    pub owner: Option<String>,
    /// Symbolic group name when the backend can resolve one.
    pub group: Option<String>,
}

/// Normalized metadata for one filesystem object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttributes {
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub posix: Option<PosixAttributes>,
}

impl FileAttributes {
    /// Minimal attributes for backends without POSIX semantics.
    pub fn basic(file_type: FileType, size: u64, modified: Option<SystemTime>) -> Self {
        FileAttributes { file_type, size, modified, posix: None }
    }

    pub fn is_dir(&self) -> bool {
        self.file_type.is_dir()
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type.is_symlink()
    }
}

/// The raw target of a symbolic link.
///
/// Kept as bytes because a link target need not be valid UTF-8; it is
/// resolved lazily and never followed unless a caller explicitly asks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicLinkTarget(Vec<u8>);

impl SymbolicLinkTarget {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        SymbolicLinkTarget(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lossy textual form for display and for formats that store link
    /// targets as text.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    #[cfg(unix)]
    pub fn to_os_string(&self) -> OsString {
        use std::os::unix::ffi::OsStringExt;
        OsString::from_vec(self.0.clone())
    }

    #[cfg(not(unix))]
    pub fn to_os_string(&self) -> OsString {
        OsString::from(self.to_text())
    }
}

impl From<&str> for SymbolicLinkTarget {
    fn from(s: &str) -> Self {
        SymbolicLinkTarget(s.as_bytes().to_vec())
    }
}
