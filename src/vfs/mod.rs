//! The Path/FileSystem capability contract and the scheme registry.
//!
//! Every backend implements [`FileSystemProvider`]; callers go through
//! [`Vfs`], which selects the provider from the path's scheme. Callers never
//! branch on backend type except through the path-construction helpers on
//! [`VfsPath`].

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Weak};

use tracing::trace;

use crate::archive::ArchiveFs;
use crate::attr::{FileAttributes, SymbolicLinkTarget};
use crate::error::{FsError, Result};
use crate::path::{Scheme, VfsPath};

/// How a byte stream is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create or truncate, then write.
    Write,
    Append,
}

/// An open byte stream on some backend.
///
/// Streams opened for reading reject writes with `Unsupported` and vice
/// versa; not every backend can seek (remote and archive-entry streams
/// may not), in which case `seek` fails with `Unsupported`.
pub trait VfsFile: Read + Write + Send {
    fn seek_stream(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let _ = pos;
        Err(io::Error::new(io::ErrorKind::Unsupported, "stream is not seekable"))
    }
}

impl VfsFile for std::fs::File {
    fn seek_stream(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.seek(pos)
    }
}

/// Adapts a read-only source into the [`VfsFile`] contract.
pub struct ReadOnlyFile<R>(pub R);

impl<R: Read + Send> Read for ReadOnlyFile<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read + Send> Write for ReadOnlyFile<R> {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "stream opened read-only"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<R: Read + Send> VfsFile for ReadOnlyFile<R> {}

/// Adapts a write-only sink into the [`VfsFile`] contract.
pub struct WriteOnlyFile<W>(pub W);

impl<W: Write + Send> Read for WriteOnlyFile<W> {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "stream opened write-only"))
    }
}

impl<W: Write + Send> Write for WriteOnlyFile<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write + Send> VfsFile for WriteOnlyFile<W> {}

/// The capability contract every backend implements.
///
/// All operations are blocking from the caller's perspective; callers
/// dispatch onto their own background workers. Implementations are
/// `Send + Sync` and, apart from the shared privileged session, stateless
/// per operation, so they may be invoked concurrently without locking.
pub trait FileSystemProvider: Send + Sync {
    /// Read metadata. With `follow_links == false` a symlink reports its
    /// own type even if its target is missing; a broken target only fails
    /// an explicit follow or open.
    fn stat(&self, path: &VfsPath, follow_links: bool) -> Result<FileAttributes>;

    fn list(&self, path: &VfsPath) -> Result<Vec<VfsPath>>;

    fn open(&self, path: &VfsPath, mode: OpenMode) -> Result<Box<dyn VfsFile>>;

    fn create_directory(&self, path: &VfsPath) -> Result<()>;

    /// Delete a file, symlink, or empty directory.
    fn delete(&self, path: &VfsPath) -> Result<()>;

    /// Move within the same backend.
    fn rename(&self, from: &VfsPath, to: &VfsPath) -> Result<()>;

    /// Copy within the same backend.
    fn copy(&self, from: &VfsPath, to: &VfsPath) -> Result<()>;

    fn read_symbolic_link(&self, path: &VfsPath) -> Result<SymbolicLinkTarget>;

    fn create_symbolic_link(&self, link: &VfsPath, target: &SymbolicLinkTarget) -> Result<()>;
}

/// Scheme registry dispatching operations to the registered backends.
///
/// Built through [`VfsBuilder`]; the archive backend resolves container
/// paths back through the same registry (held as a `Weak` to avoid a
/// cycle), which is what makes nested access work: a zip on an SMB share,
/// a tar inside a zip.
pub struct Vfs {
    local: Option<Arc<dyn FileSystemProvider>>,
    archive: Option<Arc<ArchiveFs>>,
    document: Option<Arc<dyn FileSystemProvider>>,
    smb: Option<Arc<dyn FileSystemProvider>>,
    sftp: Option<Arc<dyn FileSystemProvider>>,
}

#[derive(Default)]
pub struct VfsBuilder {
    local: Option<Arc<dyn FileSystemProvider>>,
    document: Option<Arc<dyn FileSystemProvider>>,
    smb: Option<Arc<dyn FileSystemProvider>>,
    sftp: Option<Arc<dyn FileSystemProvider>>,
    archive: bool,
}

impl VfsBuilder {
    pub fn local(mut self, provider: Arc<dyn FileSystemProvider>) -> Self {
        self.local = Some(provider);
        self
    }

    pub fn document(mut self, provider: Arc<dyn FileSystemProvider>) -> Self {
        self.document = Some(provider);
        self
    }

    pub fn smb(mut self, provider: Arc<dyn FileSystemProvider>) -> Self {
        self.smb = Some(provider);
        self
    }

    pub fn sftp(mut self, provider: Arc<dyn FileSystemProvider>) -> Self {
        self.sftp = Some(provider);
        self
    }

    /// Enable the archive backend on top of the other registered backends.
    pub fn archive(mut self) -> Self {
        self.archive = true;
        self
    }

    pub fn build(self) -> Arc<Vfs> {
        Arc::new_cyclic(|weak: &Weak<Vfs>| Vfs {
            local: self.local,
            archive: if self.archive {
                Some(Arc::new(ArchiveFs::new(weak.clone())))
            } else {
                None
            },
            document: self.document,
            smb: self.smb,
            sftp: self.sftp,
        })
    }
}

impl Vfs {
    pub fn builder() -> VfsBuilder {
        VfsBuilder::default()
    }

    fn provider(&self, path: &VfsPath) -> Result<&dyn FileSystemProvider> {
        let provider: Option<&dyn FileSystemProvider> = match path.scheme() {
            Scheme::Local => self.local.as_deref(),
            Scheme::Archive => self.archive.as_deref().map(|p| p as &dyn FileSystemProvider),
            Scheme::Document => self.document.as_deref(),
            Scheme::Smb => self.smb.as_deref(),
            Scheme::Sftp => self.sftp.as_deref(),
        };
        provider.ok_or_else(|| {
            FsError::unsupported(path.to_string(), "no backend registered for scheme")
        })
    }

    pub fn stat(&self, path: &VfsPath, follow_links: bool) -> Result<FileAttributes> {
        self.provider(path)?.stat(path, follow_links)
    }

    pub fn exists(&self, path: &VfsPath) -> bool {
        self.stat(path, false).is_ok()
    }

    pub fn list(&self, path: &VfsPath) -> Result<Vec<VfsPath>> {
        self.provider(path)?.list(path)
    }

    pub fn open(&self, path: &VfsPath, mode: OpenMode) -> Result<Box<dyn VfsFile>> {
        self.provider(path)?.open(path, mode)
    }

    pub fn create_directory(&self, path: &VfsPath) -> Result<()> {
        self.provider(path)?.create_directory(path)
    }

    pub fn delete(&self, path: &VfsPath) -> Result<()> {
        self.provider(path)?.delete(path)
    }

    pub fn rename(&self, from: &VfsPath, to: &VfsPath) -> Result<()> {
        if from.scheme() == to.scheme() {
            return self.provider(from)?.rename(from, to);
        }
        // A cross-backend move is a copy followed by a delete.
        self.copy(from, to)?;
        self.provider(from)?.delete(from)
    }

    pub fn copy(&self, from: &VfsPath, to: &VfsPath) -> Result<()> {
        if from.scheme() == to.scheme() {
            return self.provider(from)?.copy(from, to);
        }
        trace!(%from, %to, "cross-backend stream copy");
        let attrs = self.stat(from, false)?;
        if attrs.is_dir() {
            return self.create_directory(to);
        }
        if attrs.is_symlink() {
            let target = self.read_symbolic_link(from)?;
            return self.create_symbolic_link(to, &target);
        }
        let mut src = self.open(from, OpenMode::Read)?;
        let mut dst = self.open(to, OpenMode::Write)?;
        io::copy(&mut src, &mut dst)
            .map_err(|e| FsError::from_io(e, from.to_string()))?;
        dst.flush().map_err(|e| FsError::from_io(e, to.to_string()))?;
        Ok(())
    }

    pub fn read_symbolic_link(&self, path: &VfsPath) -> Result<SymbolicLinkTarget> {
        self.provider(path)?.read_symbolic_link(path)
    }

    pub fn create_symbolic_link(
        &self,
        link: &VfsPath,
        target: &SymbolicLinkTarget,
    ) -> Result<()> {
        self.provider(link)?.create_symbolic_link(link, target)
    }
}
