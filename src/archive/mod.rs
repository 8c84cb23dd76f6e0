//! Archive backend and codec.
//!
//! The codec translates between a sequence of paths and a single container
//! byte stream in both directions ([`writer`], [`reader`]). [`ArchiveFs`]
//! exposes the read side as a provider: an archive path's container is
//! resolved through the shared [`Vfs`], so a container may live on any
//! backend, including inside another archive.

pub mod reader;
pub mod writer;

use std::collections::HashMap;
use std::io::{self, Cursor};
use std::sync::{Arc, Mutex, Weak};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::attr::{FileAttributes, FileType, SymbolicLinkTarget};
use crate::error::{FsError, Result};
use crate::path::VfsPath;
use crate::vfs::{FileSystemProvider, OpenMode, ReadOnlyFile, Vfs, VfsFile};

pub use reader::{ArchiveEntry, ArchiveReader};
pub use writer::ArchiveWriter;

/// Container formats the codec can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    Zip,
}

/// Outer compressors for tar containers. Explicit on write; detected from
/// the container's own magic on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compressor {
    Gzip,
    Xz,
    Zstd,
}

/// Read-only provider over archive containers.
pub struct ArchiveFs {
    vfs: Weak<Vfs>,
    cache: Mutex<HashMap<VfsPath, Arc<ContainerIndex>>>,
}

struct ContainerIndex {
    spool: NamedTempFile,
    /// Normalized entry name (no trailing slash) to its metadata. The
    /// archive root is the implicit "" directory.
    entries: HashMap<String, ArchiveEntry>,
    children: HashMap<String, Vec<String>>,
}

impl ArchiveFs {
    pub(crate) fn new(vfs: Weak<Vfs>) -> Self {
        ArchiveFs { vfs, cache: Mutex::new(HashMap::new()) }
    }

    /// Drop the cached entry tree for a container, forcing a re-read.
    pub fn refresh(&self, container: &VfsPath) {
        self.cache.lock().unwrap().remove(container);
    }

    /// The cached entry tree for a container, reading it on first use.
    /// The lock covers only the map; spooling and parsing happen outside
    /// it, so operations on distinct containers proceed concurrently.
    fn index_for(&self, container: &VfsPath) -> Result<Arc<ContainerIndex>> {
        if let Some(index) = self.cache.lock().unwrap().get(container) {
            return Ok(Arc::clone(index));
        }
        let loaded = Arc::new(self.load_container(container)?);
        let mut cache = self.cache.lock().unwrap();
        // Two loaders may race here; the first insert wins.
        let entry = cache.entry(container.clone()).or_insert(loaded);
        Ok(Arc::clone(entry))
    }

    fn load_container(&self, container: &VfsPath) -> Result<ContainerIndex> {
        debug!(%container, "reading archive container");
        let vfs = self
            .vfs
            .upgrade()
            .ok_or_else(|| FsError::generic(container.to_string(), "vfs has shut down"))?;
        // Spool the container so the codec gets a seekable source even when
        // the container lives on a non-seekable backend.
        let mut source = vfs.open(container, OpenMode::Read)?;
        let mut spool = NamedTempFile::new()
            .map_err(|e| FsError::from_io(e, container.to_string()))?;
        io::copy(&mut source, spool.as_file_mut())
            .map_err(|e| FsError::from_io(e, container.to_string()))?;

        let file = spool
            .reopen()
            .map_err(|e| FsError::from_io(e, container.to_string()))?;
        let mut reader = ArchiveReader::new(file, &container.to_string())?;

        let mut entries: HashMap<String, ArchiveEntry> = HashMap::new();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        children.insert(String::new(), Vec::new());
        reader.for_each(&mut |entry| {
            let name = entry.name.trim_matches('/').to_string();
            if name.is_empty() {
                return Ok(());
            }
            link_parents(&mut children, &name);
            entries.insert(name, entry);
            Ok(())
        })?;

        Ok(ContainerIndex { spool, entries, children })
    }

    fn entry_attrs(index: &ContainerIndex, entry_name: &str, path: &VfsPath) -> Result<FileAttributes> {
        if entry_name.is_empty() {
            return Ok(FileAttributes::basic(FileType::Directory, 0, None));
        }
        match index.entries.get(entry_name) {
            Some(entry) => Ok(entry.attributes()),
            // Parents materialized only through children are directories.
            None if index.children.contains_key(entry_name) => {
                Ok(FileAttributes::basic(FileType::Directory, 0, None))
            }
            None => Err(FsError::not_found(path.to_string())),
        }
    }

    /// Resolve a symlink entry within its own container, lexically, for at
    /// most a few hops. Targets escaping the archive root fail as missing.
    fn resolve_entry(
        index: &ContainerIndex,
        entry_name: &str,
        path: &VfsPath,
    ) -> Result<String> {
        let mut current = entry_name.to_string();
        for _ in 0..8 {
            let entry = match index.entries.get(&current) {
                Some(entry) => entry,
                None if current.is_empty() || index.children.contains_key(&current) => {
                    return Ok(current)
                }
                None => return Err(FsError::not_found(path.to_string())),
            };
            let attrs = entry.attributes();
            let target = match (attrs.file_type, &entry.link_target) {
                (FileType::Symlink, Some(target)) => target.to_text(),
                _ => return Ok(current),
            };
            let base = match current.rfind('/') {
                Some(idx) => &current[..idx],
                None => "",
            };
            current = resolve_relative(base, &target)
                .ok_or_else(|| FsError::not_found(path.to_string()))?;
        }
        Err(FsError::generic(path.to_string(), "too many levels of symbolic links"))
    }

    fn split(path: &VfsPath) -> Result<(&VfsPath, &str)> {
        match path {
            VfsPath::Archive { container, entry } => Ok((container, entry.as_str())),
            _ => Err(FsError::unsupported(path.to_string(), "not an archive path")),
        }
    }
}

fn link_parents(children: &mut HashMap<String, Vec<String>>, name: &str) {
    let mut child = name.to_string();
    loop {
        let parent = match child.rfind('/') {
            Some(idx) => child[..idx].to_string(),
            None => String::new(),
        };
        let siblings = children.entry(parent.clone()).or_default();
        if siblings.contains(&child) {
            break;
        }
        siblings.push(child);
        if parent.is_empty() {
            break;
        }
        child = parent;
    }
}

/// Lexically resolve `target` against directory `base` within the archive.
fn resolve_relative(base: &str, target: &str) -> Option<String> {
    let mut segments: Vec<&str> = if target.starts_with('/') {
        Vec::new()
    } else if base.is_empty() {
        Vec::new()
    } else {
        base.split('/').collect()
    };
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    Some(segments.join("/"))
}

impl FileSystemProvider for ArchiveFs {
    fn stat(&self, path: &VfsPath, follow_links: bool) -> Result<FileAttributes> {
        let (container, entry_name) = Self::split(path)?;
        let index = self.index_for(container)?;
        let name = if follow_links {
            Self::resolve_entry(&index, entry_name, path)?
        } else {
            entry_name.to_string()
        };
        Self::entry_attrs(&index, &name, path)
    }

    fn list(&self, path: &VfsPath) -> Result<Vec<VfsPath>> {
        let (container, entry_name) = Self::split(path)?;
        let index = self.index_for(container)?;
        let names = index
            .children
            .get(entry_name)
            .ok_or_else(|| FsError::not_found(path.to_string()))?;
        Ok(names
            .iter()
            .map(|name| VfsPath::archive_entry(container.clone(), name))
            .collect())
    }

    fn open(&self, path: &VfsPath, mode: OpenMode) -> Result<Box<dyn VfsFile>> {
        if mode != OpenMode::Read {
            return Err(FsError::unsupported(
                path.to_string(),
                "archives are read-only; write containers through the codec",
            ));
        }
        let (container, entry_name) = Self::split(path)?;
        let index = self.index_for(container)?;
        let name = Self::resolve_entry(&index, entry_name, path)?;
        let file = index
            .spool
            .reopen()
            .map_err(|e| FsError::from_io(e, path.to_string()))?;
        let mut reader = ArchiveReader::new(file, &container.to_string())?;
        let data = reader.read_entry(&name).map_err(|err| {
            if err.is_not_found() {
                FsError::not_found(path.to_string())
            } else {
                err
            }
        })?;
        Ok(Box::new(ReadOnlyFile(Cursor::new(data))))
    }

    fn create_directory(&self, path: &VfsPath) -> Result<()> {
        Err(read_only(path))
    }

    fn delete(&self, path: &VfsPath) -> Result<()> {
        Err(read_only(path))
    }

    fn rename(&self, from: &VfsPath, _to: &VfsPath) -> Result<()> {
        Err(read_only(from))
    }

    fn copy(&self, from: &VfsPath, _to: &VfsPath) -> Result<()> {
        Err(read_only(from))
    }

    fn read_symbolic_link(&self, path: &VfsPath) -> Result<SymbolicLinkTarget> {
        let (container, entry_name) = Self::split(path)?;
        let index = self.index_for(container)?;
        let entry = index
            .entries
            .get(entry_name)
            .ok_or_else(|| FsError::not_found(path.to_string()))?;
        entry
            .link_target
            .clone()
            .ok_or_else(|| FsError::generic(path.to_string(), "not a symbolic link"))
    }

    fn create_symbolic_link(&self, link: &VfsPath, _target: &SymbolicLinkTarget) -> Result<()> {
        Err(read_only(link))
    }
}

fn read_only(path: &VfsPath) -> FsError {
    FsError::unsupported(path.to_string(), "archives are read-only")
}
