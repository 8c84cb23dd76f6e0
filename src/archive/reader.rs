//! Archive read path.
//!
//! Container format and outer compression are detected from the stream's
//! own magic, independently of each other: a zip is recognized directly,
//! while gzip/xz/zstd magic selects a decompressor in front of a tar
//! layer. Entries expose name, type, size and, when the format carries
//! them, POSIX metadata and the symlink target.

use std::io::{Read, Seek, SeekFrom};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::attr::{FileAttributes, FileType, PosixAttributes, SymbolicLinkTarget};
use crate::error::{FsError, Result};

use super::Compressor;

/// One entry parsed out of a container: normalized attributes plus the
/// format-specific extras (tar link metadata, zip unix mode).
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Path within the archive, `/`-separated.
    pub name: String,
    pub file_type: FileType,
    pub size: u64,
    pub modified: Option<SystemTime>,
    /// Full POSIX group when the format carries ownership (tar).
    pub posix: Option<PosixAttributes>,
    /// Raw unix mode bits for formats that store mode without ownership
    /// (zip's external attributes).
    pub unix_mode: Option<u32>,
    pub link_target: Option<SymbolicLinkTarget>,
}

impl ArchiveEntry {
    pub fn attributes(&self) -> FileAttributes {
        FileAttributes {
            file_type: self.file_type,
            size: self.size,
            modified: self.modified,
            posix: self.posix.clone(),
        }
    }
}

pub struct ArchiveReader<R: Read + Seek> {
    label: String,
    kind: Kind<R>,
}

enum Kind<R: Read + Seek> {
    Zip(zip::ZipArchive<R>),
    Tar { source: R, compression: Option<Compressor> },
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Detect the container type from its magic and prepare a reader.
    /// `label` tags errors with the container's locator.
    pub fn new(mut source: R, label: &str) -> Result<Self> {
        let mut magic = [0u8; 6];
        let mut filled = 0;
        source
            .seek(SeekFrom::Start(0))
            .map_err(|e| FsError::from_io(e, label))?;
        while filled < magic.len() {
            let n = source
                .read(&mut magic[filled..])
                .map_err(|e| FsError::from_io(e, label))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        source
            .seek(SeekFrom::Start(0))
            .map_err(|e| FsError::from_io(e, label))?;

        if magic.starts_with(b"PK\x03\x04") || magic.starts_with(b"PK\x05\x06") {
            let archive = zip::ZipArchive::new(source)
                .map_err(|e| FsError::generic(label, "malformed zip container").with_source(e))?;
            return Ok(ArchiveReader { label: label.to_string(), kind: Kind::Zip(archive) });
        }

        let compression = if magic.starts_with(&[0x1f, 0x8b]) {
            Some(Compressor::Gzip)
        } else if magic.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Some(Compressor::Xz)
        } else if magic.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Some(Compressor::Zstd)
        } else {
            None
        };

        if compression.is_none() && !is_plain_tar(&mut source).map_err(|e| FsError::from_io(e, label))? {
            return Err(FsError::generic(label, "unrecognized archive container"));
        }

        Ok(ArchiveReader {
            label: label.to_string(),
            kind: Kind::Tar { source, compression },
        })
    }

    /// Stream every entry's metadata through `f`, in container order.
    pub fn for_each(&mut self, f: &mut dyn FnMut(ArchiveEntry) -> Result<()>) -> Result<()> {
        let label = self.label.clone();
        match &mut self.kind {
            Kind::Zip(archive) => {
                for index in 0..archive.len() {
                    let mut file = archive
                        .by_index(index)
                        .map_err(|e| FsError::generic(&label, "malformed zip entry").with_source(e))?;
                    let entry = zip_entry(&mut file, &label)?;
                    f(entry)?;
                }
                Ok(())
            }
            Kind::Tar { source, compression } => {
                source
                    .seek(SeekFrom::Start(0))
                    .map_err(|e| FsError::from_io(e, &label))?;
                let reader = decompress(source, *compression)
                    .map_err(|e| FsError::from_io(e, &label))?;
                let mut archive = tar::Archive::new(reader);
                let entries = archive
                    .entries()
                    .map_err(|e| FsError::generic(&label, "malformed tar container").with_source(e))?;
                for entry in entries {
                    let mut entry = entry
                        .map_err(|e| FsError::generic(&label, "malformed tar entry").with_source(e))?;
                    if let Some(parsed) = tar_entry(&mut entry, &label)? {
                        f(parsed)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Collect all entry metadata.
    pub fn entries(&mut self) -> Result<Vec<ArchiveEntry>> {
        let mut out = Vec::new();
        self.for_each(&mut |entry| {
            out.push(entry);
            Ok(())
        })?;
        Ok(out)
    }

    /// Read one entry's bytes by its normalized name.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        let label = self.label.clone();
        match &mut self.kind {
            Kind::Zip(archive) => {
                let mut file = archive.by_name(name).map_err(|e| match e {
                    zip::result::ZipError::FileNotFound => {
                        FsError::not_found(format!("{label}!{name}"))
                    }
                    other => FsError::generic(&label, "malformed zip entry").with_source(other),
                })?;
                let mut data = Vec::new();
                file.read_to_end(&mut data)
                    .map_err(|e| FsError::from_io(e, &label))?;
                Ok(data)
            }
            Kind::Tar { source, compression } => {
                source
                    .seek(SeekFrom::Start(0))
                    .map_err(|e| FsError::from_io(e, &label))?;
                let reader = decompress(source, *compression)
                    .map_err(|e| FsError::from_io(e, &label))?;
                let mut archive = tar::Archive::new(reader);
                let entries = archive
                    .entries()
                    .map_err(|e| FsError::generic(&label, "malformed tar container").with_source(e))?;
                for entry in entries {
                    let mut entry = entry
                        .map_err(|e| FsError::generic(&label, "malformed tar entry").with_source(e))?;
                    let entry_name = String::from_utf8_lossy(&entry.path_bytes())
                        .trim_matches('/')
                        .to_string();
                    if entry_name == name {
                        let mut data = Vec::new();
                        entry
                            .read_to_end(&mut data)
                            .map_err(|e| FsError::from_io(e, &label))?;
                        return Ok(data);
                    }
                }
                Err(FsError::not_found(format!("{label}!{name}")))
            }
        }
    }
}

fn is_plain_tar<R: Read + Seek>(source: &mut R) -> std::io::Result<bool> {
    // The ustar magic sits at offset 257 of the first header block.
    if source.seek(SeekFrom::End(0))? < 262 {
        source.seek(SeekFrom::Start(0))?;
        return Ok(false);
    }
    source.seek(SeekFrom::Start(257))?;
    let mut magic = [0u8; 5];
    source.read_exact(&mut magic)?;
    source.seek(SeekFrom::Start(0))?;
    Ok(&magic == b"ustar")
}

fn decompress<'a, R: Read>(
    source: &'a mut R,
    compression: Option<Compressor>,
) -> std::io::Result<Box<dyn Read + 'a>> {
    Ok(match compression {
        None => Box::new(source),
        Some(Compressor::Gzip) => Box::new(flate2::read::GzDecoder::new(source)),
        Some(Compressor::Xz) => Box::new(xz2::read::XzDecoder::new(source)),
        Some(Compressor::Zstd) => Box::new(zstd::stream::read::Decoder::new(source)?),
    })
}

fn zip_entry(file: &mut zip::read::ZipFile<'_>, label: &str) -> Result<ArchiveEntry> {
    let name = file.name().trim_matches('/').to_string();
    let unix_mode = file.unix_mode();
    let is_symlink = unix_mode
        .map(|mode| mode & 0o170000 == 0o120000)
        .unwrap_or(false);

    let (file_type, link_target) = if is_symlink {
        let mut target = Vec::new();
        file.read_to_end(&mut target)
            .map_err(|e| FsError::from_io(e, label))?;
        (FileType::Symlink, Some(SymbolicLinkTarget::new(target)))
    } else if file.is_dir() {
        (FileType::Directory, None)
    } else {
        (FileType::Regular, None)
    };

    Ok(ArchiveEntry {
        name,
        file_type,
        size: file.size(),
        modified: zip_mtime(file),
        posix: None,
        unix_mode,
        link_target,
    })
}

fn zip_mtime(file: &zip::read::ZipFile<'_>) -> Option<SystemTime> {
    let dt = file.last_modified();
    let date = chrono::NaiveDate::from_ymd_opt(
        i32::from(dt.year()),
        u32::from(dt.month()),
        u32::from(dt.day()),
    )?;
    let time = date.and_hms_opt(
        u32::from(dt.hour()),
        u32::from(dt.minute()),
        u32::from(dt.second()),
    )?;
    let secs = time.and_utc().timestamp();
    u64::try_from(secs)
        .ok()
        .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
}

fn tar_entry<R: Read>(
    entry: &mut tar::Entry<'_, R>,
    label: &str,
) -> Result<Option<ArchiveEntry>> {
    let header = entry.header();
    let file_type = match header.entry_type() {
        tar::EntryType::Regular | tar::EntryType::Continuous | tar::EntryType::GNUSparse => {
            FileType::Regular
        }
        tar::EntryType::Directory => FileType::Directory,
        tar::EntryType::Symlink => FileType::Symlink,
        // Extended metadata blocks are consumed by the tar layer; anything
        // else (devices, fifos, hard links) surfaces as Other.
        tar::EntryType::XGlobalHeader | tar::EntryType::XHeader => return Ok(None),
        _ => FileType::Other,
    };

    let mode = header
        .mode()
        .map_err(|e| FsError::generic(label, "malformed tar mode field").with_source(e))?;
    let uid = header
        .uid()
        .map_err(|e| FsError::generic(label, "malformed tar uid field").with_source(e))? as u32;
    let gid = header
        .gid()
        .map_err(|e| FsError::generic(label, "malformed tar gid field").with_source(e))? as u32;
    let owner = header.username().ok().flatten().map(str::to_string);
    let group = header.groupname().ok().flatten().map(str::to_string);
    let mtime = header.mtime().ok();

    let link_target = entry
        .link_name_bytes()
        .map(|bytes| SymbolicLinkTarget::new(bytes.into_owned()));

    let name = String::from_utf8_lossy(&entry.path_bytes())
        .trim_matches('/')
        .to_string();

    Ok(Some(ArchiveEntry {
        name,
        file_type,
        size: header.size().unwrap_or(0),
        modified: mtime.map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
        posix: Some(PosixAttributes {
            mode: mode & 0o7777,
            uid,
            gid,
            owner: owner.filter(|s| !s.is_empty()),
            group: group.filter(|s| !s.is_empty()),
        }),
        unix_mode: None,
        link_target,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn unrecognized_container_is_rejected() {
        let garbage = Cursor::new(vec![0x00, 0x01, 0x02, 0x03, 0x04, 0x05]);
        let err = ArchiveReader::new(garbage, "/tmp/garbage.bin")
            .err()
            .expect("garbage must be rejected");
        assert!(matches!(err, FsError::Generic { .. }));
    }
}
