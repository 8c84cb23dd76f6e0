//! SMB share provider.
//!
//! SMB symlink semantics (reparse points) do not map onto the POSIX
//! symlink contract, so both symlink operations are unsupported here.

use std::io;
use std::sync::Arc;

use tracing::debug;

use crate::attr::{FileAttributes, SymbolicLinkTarget};
use crate::error::{FsError, Result};
use crate::path::VfsPath;
use crate::vfs::{FileSystemProvider, OpenMode, VfsFile};

use super::{open_stream, translate, RemoteClient};

pub struct SmbFs {
    client: Arc<dyn RemoteClient>,
}

impl SmbFs {
    pub fn new(client: Arc<dyn RemoteClient>) -> Self {
        SmbFs { client }
    }

    fn rest<'a>(path: &'a VfsPath) -> Result<&'a str> {
        match path {
            VfsPath::Smb(rest) => Ok(rest),
            _ => Err(FsError::unsupported(path.to_string(), "not an smb path")),
        }
    }
}

impl FileSystemProvider for SmbFs {
    fn stat(&self, path: &VfsPath, follow_links: bool) -> Result<FileAttributes> {
        let rest = Self::rest(path)?;
        self.client
            .stat(rest, follow_links)
            .map_err(|e| translate(e, path))
    }

    fn list(&self, path: &VfsPath) -> Result<Vec<VfsPath>> {
        let rest = Self::rest(path)?;
        let names = self.client.list(rest).map_err(|e| translate(e, path))?;
        Ok(names.into_iter().map(|name| path.join(&name)).collect())
    }

    fn open(&self, path: &VfsPath, mode: OpenMode) -> Result<Box<dyn VfsFile>> {
        let rest = Self::rest(path)?;
        open_stream(self.client.as_ref(), path, rest, mode)
    }

    fn create_directory(&self, path: &VfsPath) -> Result<()> {
        let rest = Self::rest(path)?;
        self.client
            .create_directory(rest)
            .map_err(|e| translate(e, path))
    }

    fn delete(&self, path: &VfsPath) -> Result<()> {
        let rest = Self::rest(path)?;
        self.client.delete(rest).map_err(|e| translate(e, path))
    }

    fn rename(&self, from: &VfsPath, to: &VfsPath) -> Result<()> {
        let from_rest = Self::rest(from)?;
        let to_rest = Self::rest(to)?;
        self.client
            .rename(from_rest, to_rest)
            .map_err(|e| translate(e, from))
    }

    fn copy(&self, from: &VfsPath, to: &VfsPath) -> Result<()> {
        debug!(%from, %to, "smb in-share copy");
        let mut src = self.open(from, OpenMode::Read)?;
        let mut dst = self.open(to, OpenMode::Write)?;
        io::copy(&mut src, &mut dst).map_err(|e| FsError::from_io(e, from.to_string()))?;
        dst.flush().map_err(|e| FsError::from_io(e, to.to_string()))?;
        Ok(())
    }

    fn read_symbolic_link(&self, path: &VfsPath) -> Result<SymbolicLinkTarget> {
        Err(FsError::unsupported(path.to_string(), "symbolic links on smb"))
    }

    fn create_symbolic_link(&self, link: &VfsPath, _target: &SymbolicLinkTarget) -> Result<()> {
        Err(FsError::unsupported(link.to_string(), "symbolic links on smb"))
    }
}
