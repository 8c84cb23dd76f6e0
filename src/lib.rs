//! # polyfs Core Library
//!
//! A unifying virtual filesystem layer over heterogeneous storage:
//! the local POSIX tree (optionally through an elevated shell), entries
//! inside archive containers, document-provider content, and SMB/SFTP
//! remote shares.
//!
//! It is designed to be used by the `polyfs` command-line application,
//! but the public API can also be embedded: register backends on a
//! [`vfs::Vfs`] and address everything through scheme-tagged
//! [`path::VfsPath`] locators.
//!
//! ## Key Modules
//!
//! - [`path`]: Backend-tagged path locators with lossless parse/format.
//! - [`vfs`]: The provider contract and the scheme registry.
//! - [`local`]: The local backend, with optional privilege escalation.
//! - [`bridge`]: The refcounted elevated-shell session.
//! - [`archive`]: The tar/zip codec and the read-only archive backend.
//! - [`document`]: The document-provider backend and its resolver shim.
//! - [`remote`]: SMB and SFTP adapters over client-library collaborators.

pub mod archive;
pub mod attr;
pub mod bridge;
pub mod cli;
pub mod document;
pub mod error;
pub mod local;
pub mod path;
pub mod remote;
pub mod vfs;

pub use error::{FsError, Result};
pub use path::VfsPath;
pub use vfs::{OpenMode, Vfs};
