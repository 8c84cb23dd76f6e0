//! Backend-tagged path locators.
//!
//! A [`VfsPath`] is an immutable, comparable, hashable identifier for a
//! filesystem object on one of the supported backends. Equality is over the
//! full normalized locator and does not imply the target exists. The textual
//! form round-trips losslessly: `VfsPath::parse(p.to_string()) == p` for
//! every scheme.
//!
//! Locator syntax:
//!
//! - local: a plain absolute path, e.g. `/home/user/file.txt`
//! - archive: `archive://<container-locator>!<entry-name>`; the entry name
//!   percent-escapes `%` and `!`, so containers nest unambiguously
//!   (`archive://archive:///a.zip!inner.tar!dir/file`)
//! - document: `content://<provider-specific rest>`
//! - remote shares: `smb://<rest>`, `sftp://<rest>`

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::FsError;

/// The closed set of storage backends a path can point into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Local,
    Archive,
    Document,
    Smb,
    Sftp,
}

/// An immutable, backend-tagged locator. Freely cloned, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VfsPath {
    /// Absolute path on the local filesystem.
    Local(PathBuf),
    /// An entry inside an archive container; the container is itself a
    /// `VfsPath` (local, remote, or another archive). An empty entry names
    /// the archive root.
    Archive { container: Box<VfsPath>, entry: String },
    /// Document-provider URI, stored as the part after `content://`.
    Document(String),
    /// SMB share locator, stored as the part after `smb://`.
    Smb(String),
    /// SFTP locator, stored as the part after `sftp://`.
    Sftp(String),
}

impl VfsPath {
    /// Construct a local path, lexically normalized (redundant separators
    /// and `.` components removed; `..` is kept verbatim since resolving it
    /// lexically would be wrong in the presence of symlinks).
    pub fn local(path: impl AsRef<Path>) -> Self {
        VfsPath::Local(normalize_lexically(path.as_ref()))
    }

    /// The root of an archive container.
    pub fn archive_root(container: VfsPath) -> Self {
        VfsPath::Archive { container: Box::new(container), entry: String::new() }
    }

    /// An entry inside an archive container. Entry names use `/` separators
    /// and are stored without leading or trailing slashes.
    pub fn archive_entry(container: VfsPath, entry: &str) -> Self {
        VfsPath::Archive {
            container: Box::new(container),
            entry: entry.trim_matches('/').to_string(),
        }
    }

    /// Parse a locator string. Fails with `Generic` on malformed input.
    pub fn parse(s: &str) -> Result<Self, FsError> {
        if let Some(rest) = s.strip_prefix("archive://") {
            let bang = rest.rfind('!').ok_or_else(|| {
                FsError::generic(s, "malformed archive locator: missing '!' separator")
            })?;
            let container = VfsPath::parse(&rest[..bang])?;
            let entry = unescape_entry(&rest[bang + 1..]);
            return Ok(VfsPath::Archive { container: Box::new(container), entry });
        }
        if let Some(rest) = s.strip_prefix("content://") {
            return Ok(VfsPath::Document(rest.to_string()));
        }
        if let Some(rest) = s.strip_prefix("smb://") {
            return Ok(VfsPath::Smb(rest.to_string()));
        }
        if let Some(rest) = s.strip_prefix("sftp://") {
            return Ok(VfsPath::Sftp(rest.to_string()));
        }
        if s.starts_with('/') {
            return Ok(VfsPath::local(s));
        }
        Err(FsError::generic(s, "unrecognized path scheme"))
    }

    pub fn scheme(&self) -> Scheme {
        match self {
            VfsPath::Local(_) => Scheme::Local,
            VfsPath::Archive { .. } => Scheme::Archive,
            VfsPath::Document(_) => Scheme::Document,
            VfsPath::Smb(_) => Scheme::Smb,
            VfsPath::Sftp(_) => Scheme::Sftp,
        }
    }

    pub fn is_archive(&self) -> bool {
        matches!(self, VfsPath::Archive { .. })
    }

    /// The container path of an archive entry, if this is an archive path.
    pub fn archive_container(&self) -> Option<&VfsPath> {
        match self {
            VfsPath::Archive { container, .. } => Some(container),
            _ => None,
        }
    }

    /// The in-container entry name of an archive path.
    pub fn archive_entry_name(&self) -> Option<&str> {
        match self {
            VfsPath::Archive { entry, .. } => Some(entry),
            _ => None,
        }
    }

    /// The underlying `std::path::Path` of a local path.
    pub fn as_local(&self) -> Option<&Path> {
        match self {
            VfsPath::Local(path) => Some(path),
            _ => None,
        }
    }

    /// Last path segment, if one exists.
    pub fn file_name(&self) -> Option<String> {
        match self {
            VfsPath::Local(path) => {
                path.file_name().map(|name| name.to_string_lossy().into_owned())
            }
            VfsPath::Archive { container, entry } => {
                if entry.is_empty() {
                    container.file_name()
                } else {
                    entry.rsplit('/').next().map(str::to_string)
                }
            }
            VfsPath::Document(rest) | VfsPath::Smb(rest) | VfsPath::Sftp(rest) => rest
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }

    /// The parent locator, or `None` at a backend root.
    pub fn parent(&self) -> Option<VfsPath> {
        match self {
            VfsPath::Local(path) => path.parent().map(|p| VfsPath::Local(p.to_path_buf())),
            VfsPath::Archive { container, entry } => {
                if entry.is_empty() {
                    return None;
                }
                let parent_entry = match entry.rfind('/') {
                    Some(idx) => &entry[..idx],
                    None => "",
                };
                Some(VfsPath::Archive {
                    container: container.clone(),
                    entry: parent_entry.to_string(),
                })
            }
            VfsPath::Document(_) => None,
            VfsPath::Smb(rest) => parent_of_rest(rest).map(VfsPath::Smb),
            VfsPath::Sftp(rest) => parent_of_rest(rest).map(VfsPath::Sftp),
        }
    }

    /// Append one path segment.
    pub fn join(&self, name: &str) -> VfsPath {
        match self {
            VfsPath::Local(path) => VfsPath::Local(path.join(name)),
            VfsPath::Archive { container, entry } => {
                let entry = if entry.is_empty() {
                    name.to_string()
                } else {
                    format!("{entry}/{name}")
                };
                VfsPath::Archive { container: container.clone(), entry }
            }
            VfsPath::Document(rest) => {
                VfsPath::Document(join_rest(rest, name))
            }
            VfsPath::Smb(rest) => VfsPath::Smb(join_rest(rest, name)),
            VfsPath::Sftp(rest) => VfsPath::Sftp(join_rest(rest, name)),
        }
    }
}

fn join_rest(rest: &str, name: &str) -> String {
    if rest.is_empty() || rest.ends_with('/') {
        format!("{rest}{name}")
    } else {
        format!("{rest}/{name}")
    }
}

fn parent_of_rest(rest: &str) -> Option<String> {
    let trimmed = rest.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    Some(trimmed[..idx].to_string()).filter(|s| !s.is_empty())
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn escape_entry(entry: &str) -> String {
    entry.replace('%', "%25").replace('!', "%21")
}

fn unescape_entry(entry: &str) -> String {
    entry.replace("%21", "!").replace("%25", "%")
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VfsPath::Local(path) => write!(f, "{}", path.display()),
            VfsPath::Archive { container, entry } => {
                write!(f, "archive://{}!{}", container, escape_entry(entry))
            }
            VfsPath::Document(rest) => write!(f, "content://{rest}"),
            VfsPath::Smb(rest) => write!(f, "smb://{rest}"),
            VfsPath::Sftp(rest) => write!(f, "sftp://{rest}"),
        }
    }
}

impl Serialize for VfsPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VfsPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        VfsPath::parse(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(p: &VfsPath) {
        let formatted = p.to_string();
        let parsed = VfsPath::parse(&formatted).unwrap();
        assert_eq!(&parsed, p, "round-trip failed for {formatted}");
    }

    #[test]
    fn all_schemes_roundtrip() {
        roundtrip(&VfsPath::local("/home/user/file.txt"));
        roundtrip(&VfsPath::archive_entry(
            VfsPath::local("/data/backup.tar.gz"),
            "dir/file.txt",
        ));
        roundtrip(&VfsPath::archive_root(VfsPath::local("/data/a.zip")));
        roundtrip(&VfsPath::Document(
            "com.android.externalstorage.documents/tree/primary%3ADocuments".into(),
        ));
        roundtrip(&VfsPath::Smb("server/share/dir/file".into()));
        roundtrip(&VfsPath::Sftp("user@host:22/home/user".into()));
    }

    #[test]
    fn nested_archive_roundtrips() {
        let outer = VfsPath::archive_entry(VfsPath::local("/a.zip"), "inner.tar");
        let nested = VfsPath::archive_entry(outer, "dir/file");
        roundtrip(&nested);
    }

    #[test]
    fn entry_with_bang_roundtrips() {
        let p = VfsPath::archive_entry(VfsPath::local("/a.zip"), "weird!name%1");
        roundtrip(&p);
        assert_eq!(p.archive_entry_name(), Some("weird!name%1"));
    }

    #[test]
    fn local_paths_are_normalized() {
        assert_eq!(
            VfsPath::local("/a/./b//c"),
            VfsPath::Local(PathBuf::from("/a/b/c"))
        );
    }

    #[test]
    fn archive_parent_walks_entry_then_stops() {
        let p = VfsPath::archive_entry(VfsPath::local("/a.zip"), "x/y");
        let parent = p.parent().unwrap();
        assert_eq!(parent.archive_entry_name(), Some("x"));
        let root = parent.parent().unwrap();
        assert_eq!(root.archive_entry_name(), Some(""));
        assert!(root.parent().is_none());
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(VfsPath::parse("ftp://host/file").is_err());
        assert!(VfsPath::parse("relative/path").is_err());
    }

    #[test]
    fn archive_without_separator_is_rejected() {
        assert!(VfsPath::parse("archive:///a.zip").is_err());
    }
}