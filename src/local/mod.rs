//! Local POSIX filesystem backend.

pub mod rootable;

use std::fs;
use std::path::Path;

use crate::attr::{FileAttributes, FileType, PosixAttributes, SymbolicLinkTarget};
use crate::error::{FsError, Result};
use crate::path::VfsPath;
use crate::vfs::{FileSystemProvider, OpenMode, VfsFile};

pub use rootable::RootableFs;

/// Direct `std::fs` implementation of the provider contract.
pub struct LocalFs;

fn local_path(path: &VfsPath) -> Result<&Path> {
    path.as_local()
        .ok_or_else(|| FsError::unsupported(path.to_string(), "not a local path"))
}

impl FileSystemProvider for LocalFs {
    fn stat(&self, path: &VfsPath, follow_links: bool) -> Result<FileAttributes> {
        let fs_path = local_path(path)?;
        let metadata = if follow_links {
            fs::metadata(fs_path)
        } else {
            fs::symlink_metadata(fs_path)
        }
        .map_err(|e| FsError::from_io(e, path.to_string()))?;
        Ok(attributes_from_metadata(&metadata))
    }

    fn list(&self, path: &VfsPath) -> Result<Vec<VfsPath>> {
        let fs_path = local_path(path)?;
        let entries = fs::read_dir(fs_path).map_err(|e| FsError::from_io(e, path.to_string()))?;
        let mut children = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FsError::from_io(e, path.to_string()))?;
            children.push(VfsPath::Local(entry.path()));
        }
        Ok(children)
    }

    fn open(&self, path: &VfsPath, mode: OpenMode) -> Result<Box<dyn VfsFile>> {
        let fs_path = local_path(path)?;
        let mut options = fs::OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::Write => options.write(true).create(true).truncate(true),
            OpenMode::Append => options.append(true).create(true),
        };
        let file = options
            .open(fs_path)
            .map_err(|e| FsError::from_io(e, path.to_string()))?;
        Ok(Box::new(file))
    }

    fn create_directory(&self, path: &VfsPath) -> Result<()> {
        fs::create_dir(local_path(path)?).map_err(|e| FsError::from_io(e, path.to_string()))
    }

    fn delete(&self, path: &VfsPath) -> Result<()> {
        let fs_path = local_path(path)?;
        let metadata = fs::symlink_metadata(fs_path)
            .map_err(|e| FsError::from_io(e, path.to_string()))?;
        if metadata.is_dir() {
            fs::remove_dir(fs_path)
        } else {
            fs::remove_file(fs_path)
        }
        .map_err(|e| FsError::from_io(e, path.to_string()))
    }

    fn rename(&self, from: &VfsPath, to: &VfsPath) -> Result<()> {
        fs::rename(local_path(from)?, local_path(to)?)
            .map_err(|e| FsError::from_io(e, from.to_string()))
    }

    fn copy(&self, from: &VfsPath, to: &VfsPath) -> Result<()> {
        let attrs = self.stat(from, false)?;
        match attrs.file_type {
            FileType::Directory => self.create_directory(to),
            FileType::Symlink => {
                let target = self.read_symbolic_link(from)?;
                self.create_symbolic_link(to, &target)
            }
            _ => {
                fs::copy(local_path(from)?, local_path(to)?)
                    .map_err(|e| FsError::from_io(e, from.to_string()))?;
                Ok(())
            }
        }
    }

    fn read_symbolic_link(&self, path: &VfsPath) -> Result<SymbolicLinkTarget> {
        let target = fs::read_link(local_path(path)?)
            .map_err(|e| FsError::from_io(e, path.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::ffi::OsStrExt;
            Ok(SymbolicLinkTarget::new(target.as_os_str().as_bytes().to_vec()))
        }
        #[cfg(not(unix))]
        {
            Ok(SymbolicLinkTarget::new(
                target.to_string_lossy().as_bytes().to_vec(),
            ))
        }
    }

    fn create_symbolic_link(&self, link: &VfsPath, target: &SymbolicLinkTarget) -> Result<()> {
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(target.to_os_string(), local_path(link)?)
                .map_err(|e| FsError::from_io(e, link.to_string()))
        }
        #[cfg(not(unix))]
        {
            let _ = target;
            Err(FsError::unsupported(link.to_string(), "create symbolic link"))
        }
    }
}

#[cfg(unix)]
fn attributes_from_metadata(metadata: &fs::Metadata) -> FileAttributes {
    use std::os::unix::fs::MetadataExt;

    let file_type = file_type_of(metadata);
    let posix = PosixAttributes {
        mode: metadata.mode() & 0o7777,
        uid: metadata.uid(),
        gid: metadata.gid(),
        owner: user_name(metadata.uid()),
        group: group_name(metadata.gid()),
    };
    FileAttributes {
        file_type,
        size: metadata.len(),
        modified: metadata.modified().ok(),
        posix: Some(posix),
    }
}

#[cfg(not(unix))]
fn attributes_from_metadata(metadata: &fs::Metadata) -> FileAttributes {
    FileAttributes::basic(file_type_of(metadata), metadata.len(), metadata.modified().ok())
}

fn file_type_of(metadata: &fs::Metadata) -> FileType {
    let ft = metadata.file_type();
    if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_dir() {
        FileType::Directory
    } else if ft.is_file() {
        FileType::Regular
    } else {
        FileType::Other
    }
}

#[cfg(unix)]
fn user_name(uid: u32) -> Option<String> {
    use std::ffi::CStr;

    let mut buf = vec![0u8; 1024];
    let mut passwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    loop {
        let rc = unsafe {
            libc::getpwuid_r(
                uid,
                &mut passwd,
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE {
            let new_len = buf.len() * 2;
            buf.resize(new_len, 0);
            continue;
        }
        if rc != 0 || result.is_null() {
            return None;
        }
        let name = unsafe { CStr::from_ptr(passwd.pw_name) };
        return name.to_str().ok().map(str::to_string);
    }
}

#[cfg(unix)]
fn group_name(gid: u32) -> Option<String> {
    use std::ffi::CStr;

    let mut buf = vec![0u8; 1024];
    let mut group: libc::group = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::group = std::ptr::null_mut();
    loop {
        let rc = unsafe {
            libc::getgrgid_r(
                gid,
                &mut group,
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE {
            let new_len = buf.len() * 2;
            buf.resize(new_len, 0);
            continue;
        }
        if rc != 0 || result.is_null() {
            return None;
        }
        let name = unsafe { CStr::from_ptr(group.gr_name) };
        return name.to_str().ok().map(str::to_string);
    }
}
