//! Archive write path.
//!
//! Given an ordered sequence of source paths rooted under a common root,
//! produce a container stream. Entries are written in input order; the
//! codec never reorders or deduplicates. Types are determined without
//! following links:
//!
//! - regular files stream their bytes into the entry;
//! - directories become zero-length entries;
//! - symlinks are format-dependent: tar sets the link-type marker and
//!   link-name field with no entry data, zip stores the link text as entry
//!   data under a unix symlink mode;
//! - anything else fails with `Unsupported`.
//!
//! POSIX mode/owner/group copy verbatim when the source has them and the
//! format can carry them.

use std::io::{self, Read, Seek, Write};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::trace;
use xz2::write::XzEncoder;

use crate::attr::FileType;
use crate::error::{FsError, Result};
use crate::path::VfsPath;
use crate::vfs::{OpenMode, Vfs};

use super::{ArchiveFormat, Compressor};

/// Writer that streams entries into a tar or zip container.
pub struct ArchiveWriter<W: Write + Seek + Send> {
    sink: Sink<W>,
}

enum Sink<W: Write + Seek + Send> {
    Tar(tar::Builder<CompressorWriter<W>>),
    Zip(zip::ZipWriter<W>),
}

enum CompressorWriter<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Xz(XzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> Write for CompressorWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CompressorWriter::Plain(w) => w.write(buf),
            CompressorWriter::Gzip(w) => w.write(buf),
            CompressorWriter::Xz(w) => w.write(buf),
            CompressorWriter::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CompressorWriter::Plain(w) => w.flush(),
            CompressorWriter::Gzip(w) => w.flush(),
            CompressorWriter::Xz(w) => w.flush(),
            CompressorWriter::Zstd(w) => w.flush(),
        }
    }
}

impl<W: Write> CompressorWriter<W> {
    fn new(compressor: Option<Compressor>, out: W) -> io::Result<Self> {
        Ok(match compressor {
            None => CompressorWriter::Plain(out),
            Some(Compressor::Gzip) => {
                CompressorWriter::Gzip(GzEncoder::new(out, Compression::default()))
            }
            Some(Compressor::Xz) => CompressorWriter::Xz(XzEncoder::new(out, 6)),
            Some(Compressor::Zstd) => {
                CompressorWriter::Zstd(zstd::stream::write::Encoder::new(out, 0)?)
            }
        })
    }

    fn finish(self) -> io::Result<()> {
        match self {
            CompressorWriter::Plain(mut w) => w.flush(),
            CompressorWriter::Gzip(w) => w.finish().map(|_| ()),
            CompressorWriter::Xz(w) => w.finish().map(|_| ()),
            CompressorWriter::Zstd(w) => w.finish().map(|_| ()),
        }
    }
}

impl<W: Write + Seek + Send> ArchiveWriter<W> {
    /// Start a container of the given format. The format and compressor
    /// are explicit inputs, never auto-detected on write; a compressor is
    /// only valid for tar (zip compresses per entry on its own).
    pub fn new(
        format: ArchiveFormat,
        compressor: Option<Compressor>,
        out: W,
    ) -> Result<Self> {
        let sink = match format {
            ArchiveFormat::Tar => {
                let compressed = CompressorWriter::new(compressor, out)
                    .map_err(|e| FsError::generic("archive", "failed to start compressor").with_source(e))?;
                Sink::Tar(tar::Builder::new(compressed))
            }
            ArchiveFormat::Zip => {
                if compressor.is_some() {
                    return Err(FsError::unsupported(
                        "archive",
                        "outer compression over a zip container",
                    ));
                }
                Sink::Zip(zip::ZipWriter::new(out))
            }
        };
        Ok(ArchiveWriter { sink })
    }

    /// Write one source path as `entry_name` (root-relative, `/`-separated).
    pub fn write(&mut self, vfs: &Vfs, source: &VfsPath, entry_name: &str) -> Result<()> {
        trace!(%source, entry_name, "writing archive entry");
        let attrs = vfs.stat(source, false)?;
        let mtime = attrs
            .modified
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        match &mut self.sink {
            Sink::Tar(builder) => {
                let mut header = tar::Header::new_gnu();
                header.set_mtime(mtime);
                if let Some(posix) = &attrs.posix {
                    header.set_mode(posix.mode);
                    header.set_uid(posix.uid as u64);
                    header.set_gid(posix.gid as u64);
                    if let Some(owner) = &posix.owner {
                        header
                            .set_username(owner)
                            .map_err(|e| FsError::from_io(e, source.to_string()))?;
                    }
                    if let Some(group) = &posix.group {
                        header
                            .set_groupname(group)
                            .map_err(|e| FsError::from_io(e, source.to_string()))?;
                    }
                } else {
                    header.set_mode(default_mode(attrs.file_type));
                }
                match attrs.file_type {
                    FileType::Regular => {
                        header.set_entry_type(tar::EntryType::Regular);
                        header.set_size(attrs.size);
                        let data = vfs.open(source, OpenMode::Read)?;
                        builder
                            .append_data(&mut header, entry_name, SizedRead(data, attrs.size))
                            .map_err(|e| FsError::from_io(e, source.to_string()))?;
                    }
                    FileType::Directory => {
                        header.set_entry_type(tar::EntryType::Directory);
                        header.set_size(0);
                        builder
                            .append_data(&mut header, format!("{entry_name}/"), io::empty())
                            .map_err(|e| FsError::from_io(e, source.to_string()))?;
                    }
                    FileType::Symlink => {
                        let target = vfs.read_symbolic_link(source)?;
                        header.set_entry_type(tar::EntryType::Symlink);
                        header.set_size(0);
                        builder
                            .append_link(&mut header, entry_name, target.to_os_string())
                            .map_err(|e| FsError::from_io(e, source.to_string()))?;
                    }
                    FileType::Other => {
                        return Err(FsError::unsupported(
                            source.to_string(),
                            "archiving a special file",
                        ));
                    }
                }
            }
            Sink::Zip(writer) => {
                let mut options = zip::write::FileOptions::default().large_file(true);
                if let Some(posix) = &attrs.posix {
                    options = options.unix_permissions(posix.mode);
                }
                match attrs.file_type {
                    FileType::Regular => {
                        writer
                            .start_file(entry_name, options)
                            .map_err(|e| zip_error(e, source))?;
                        let mut data = vfs.open(source, OpenMode::Read)?;
                        io::copy(&mut data, writer)
                            .map_err(|e| FsError::from_io(e, source.to_string()))?;
                    }
                    FileType::Directory => {
                        writer
                            .add_directory(entry_name, options)
                            .map_err(|e| zip_error(e, source))?;
                    }
                    FileType::Symlink => {
                        // The link text is the entry's data, under a unix
                        // symlink mode.
                        let target = vfs.read_symbolic_link(source)?;
                        writer
                            .add_symlink(entry_name, target.to_text(), options)
                            .map_err(|e| zip_error(e, source))?;
                    }
                    FileType::Other => {
                        return Err(FsError::unsupported(
                            source.to_string(),
                            "archiving a special file",
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Finish the container, flushing trailers and any outer compressor.
    pub fn finish(self) -> Result<()> {
        match self.sink {
            Sink::Tar(builder) => {
                let compressed = builder
                    .into_inner()
                    .map_err(|e| FsError::generic("archive", "failed to finish tar").with_source(e))?;
                compressed
                    .finish()
                    .map_err(|e| FsError::generic("archive", "failed to finish compressor").with_source(e))
            }
            Sink::Zip(mut writer) => {
                writer
                    .finish()
                    .map(|_| ())
                    .map_err(|e| FsError::generic("archive", "failed to finish zip").with_source(e))
            }
        }
    }
}

fn default_mode(file_type: FileType) -> u32 {
    match file_type {
        FileType::Directory => 0o755,
        FileType::Symlink => 0o777,
        _ => 0o644,
    }
}

fn zip_error(err: zip::result::ZipError, source: &VfsPath) -> FsError {
    FsError::generic(source.to_string(), "zip write failed").with_source(err)
}

/// Caps a stream at the size recorded in the entry header, so a file that
/// grows mid-archive cannot corrupt the container.
struct SizedRead(Box<dyn crate::vfs::VfsFile>, u64);

impl Read for SizedRead {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.1 == 0 {
            return Ok(0);
        }
        let cap = buf.len().min(self.1 as usize);
        let n = self.0.read(&mut buf[..cap])?;
        self.1 -= n as u64;
        Ok(n)
    }
}

/// Compute an entry name for `source` relative to the declared `root`,
/// using forward-slash separators.
pub fn entry_name(root: &VfsPath, source: &VfsPath) -> Result<String> {
    if root == source {
        return Ok(source.file_name().unwrap_or_default());
    }
    let root_str = root.to_string();
    let source_str = source.to_string();
    // The prefix must end at a path-segment boundary, or a sibling like
    // `/data/src-old` would pass a `/data/src` root check.
    let rest = source_str
        .strip_prefix(&root_str)
        .filter(|rest| root_str.ends_with('/') || rest.starts_with('/'))
        .ok_or_else(|| {
            FsError::generic(
                source_str.clone(),
                format!("path is not under the archive root {root_str}"),
            )
        })?;
    Ok(rest.trim_start_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_names_are_root_relative() {
        let root = VfsPath::local("/data/src");
        let file = VfsPath::local("/data/src/dir/a.txt");
        assert_eq!(entry_name(&root, &file).unwrap(), "dir/a.txt");
    }

    #[test]
    fn root_itself_names_its_basename() {
        let root = VfsPath::local("/data/src");
        assert_eq!(entry_name(&root, &root).unwrap(), "src");
    }

    #[test]
    fn outside_the_root_is_rejected() {
        let root = VfsPath::local("/data/src");
        let outsider = VfsPath::local("/etc/passwd");
        assert!(entry_name(&root, &outsider).is_err());
    }

    #[test]
    fn sibling_sharing_a_textual_prefix_is_rejected() {
        let root = VfsPath::local("/data/src");
        let sibling = VfsPath::local("/data/src-old/secret.txt");
        assert!(entry_name(&root, &sibling).is_err());
    }
}
