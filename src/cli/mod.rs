use std::fs::File;
use std::io::{self, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::info;
use walkdir::WalkDir;

use crate::archive::reader::ArchiveReader;
use crate::archive::writer::{entry_name, ArchiveWriter};
use crate::archive::{ArchiveFormat, Compressor};
use crate::attr::FileType;
use crate::bridge::{BridgeConfig, PrivilegedBridge};
use crate::error::FsError;
use crate::local::{LocalFs, RootableFs};
use crate::path::VfsPath;
use crate::vfs::{OpenMode, Vfs};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Route local operations through an elevated shell when direct access
    /// is denied.
    #[arg(long, global = true)]
    pub root: bool,

    /// Command line used to start the elevated shell (first word is the
    /// program). Implies nothing unless --root is set.
    #[arg(long, global = true, default_value = "su")]
    pub su_command: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Show metadata for a path on any backend.
    #[command(alias = "st")]
    Stat {
        path: String,

        /// Follow a symlink to its target instead of reporting the link.
        #[arg(long)]
        follow: bool,

        /// Emit machine-readable JSON instead of the human summary.
        #[arg(long)]
        json: bool,
    },

    /// List the children of a directory.
    #[command(alias = "ls")]
    List {
        path: String,
    },

    /// Stream a file's bytes to stdout.
    Cat {
        path: String,
    },

    /// Create a directory.
    Mkdir {
        path: String,
    },

    /// Delete a file, symlink, or empty directory.
    Rm {
        path: String,
    },

    /// Copy a file, possibly across backends.
    Cp {
        from: String,
        to: String,
    },

    /// Move a file, possibly across backends.
    Mv {
        from: String,
        to: String,
    },

    /// Archive operations.
    #[command(subcommand)]
    Archive(ArchiveCommands),
}

#[derive(Subcommand, Clone, Debug)]
pub enum ArchiveCommands {
    /// Create a new archive from the given files and directories.
    #[command(alias = "c")]
    Create {
        /// One or more input files or directories to add to the archive.
        #[arg(required = true)]
        inputs: Vec<String>,

        /// The path for the output archive file.
        #[arg(short, long)]
        output: String,

        /// Container format.
        #[arg(long, value_enum, default_value_t = FormatArg::Tar)]
        format: FormatArg,

        /// Outer compression (tar only; zip compresses per entry).
        #[arg(long, value_enum)]
        compress: Option<CompressArg>,
    },

    /// List the entries of an archive without extracting it.
    #[command(alias = "l")]
    List {
        /// The archive file to list.
        archive: String,

        /// Emit machine-readable JSON instead of the human summary.
        #[arg(long)]
        json: bool,
    },
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum FormatArg {
    Tar,
    Zip,
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompressArg {
    Gz,
    Xz,
    Zstd,
}

impl From<FormatArg> for ArchiveFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Tar => ArchiveFormat::Tar,
            FormatArg::Zip => ArchiveFormat::Zip,
        }
    }
}

impl From<CompressArg> for Compressor {
    fn from(arg: CompressArg) -> Self {
        match arg {
            CompressArg::Gz => Compressor::Gzip,
            CompressArg::Xz => Compressor::Xz,
            CompressArg::Zstd => Compressor::Zstd,
        }
    }
}

pub fn run() -> Result<Args, clap::Error> {
    // Help and usage errors print here; the caller only maps the exit code.
    Args::try_parse().map_err(|e| {
        let _ = e.print();
        e
    })
}

/// Build the backend registry for the flags given on the command line.
/// Only local and archive backends have standalone bindings; document and
/// remote backends need a platform collaborator wired in by an embedder.
pub fn build_vfs(root: bool, su_command: &str) -> Arc<Vfs> {
    let builder = Vfs::builder().archive();
    if root {
        let config = BridgeConfig::from_command_line(su_command);
        let bridge = PrivilegedBridge::new(config);
        info!("routing local operations through the elevated shell");
        builder.local(Arc::new(RootableFs::new(bridge))).build()
    } else {
        builder.local(Arc::new(LocalFs)).build()
    }
}

/// Accept scheme-tagged locators and, for convenience, relative local
/// paths anchored at the current directory.
pub fn parse_path(s: &str) -> Result<VfsPath, Box<dyn std::error::Error>> {
    match VfsPath::parse(s) {
        Ok(path) => Ok(path),
        Err(_) if !s.contains("://") => {
            let cwd = std::env::current_dir()?;
            Ok(VfsPath::local(cwd.join(s)))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn cmd_stat(
    vfs: &Vfs,
    path: &str,
    follow: bool,
    as_json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = parse_path(path)?;
    let attrs = vfs.stat(&path, follow)?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&attrs)?);
        return Ok(());
    }
    let kind = match attrs.file_type {
        FileType::Regular => "file",
        FileType::Directory => "directory",
        FileType::Symlink => "symlink",
        FileType::Other => "special",
    };
    println!("{path}: {kind}, {} bytes", attrs.size);
    if let Some(posix) = &attrs.posix {
        let owner = posix.owner.as_deref().unwrap_or("-");
        let group = posix.group.as_deref().unwrap_or("-");
        println!(
            "mode {:o}, uid {} ({owner}), gid {} ({group})",
            posix.mode, posix.uid, posix.gid
        );
    }
    if attrs.file_type == FileType::Symlink {
        if let Ok(target) = vfs.read_symbolic_link(&path) {
            println!("-> {}", target.to_text());
        }
    }
    Ok(())
}

pub fn cmd_list(vfs: &Vfs, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = parse_path(path)?;
    let mut children = vfs.list(&path)?;
    children.sort_by_key(|c| c.file_name());
    for child in children {
        match child.file_name() {
            Some(name) => println!("{name}"),
            None => println!("{child}"),
        }
    }
    Ok(())
}

pub fn cmd_cat(vfs: &Vfs, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = parse_path(path)?;
    let mut stream = vfs.open(&path, OpenMode::Read)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    io::copy(&mut stream, &mut out)?;
    out.flush()?;
    Ok(())
}

pub fn cmd_archive_create(
    vfs: &Vfs,
    inputs: &[String],
    output: &str,
    format: ArchiveFormat,
    compressor: Option<Compressor>,
) -> Result<(), Box<dyn std::error::Error>> {
    let out = File::create(output)?;
    let mut writer = ArchiveWriter::new(format, compressor, out)?;
    for input in inputs {
        let input = parse_path(input)?;
        let local = input
            .as_local()
            .ok_or_else(|| FsError::unsupported(input.to_string(), "archiving a non-local source"))?
            .to_path_buf();
        let root = input.parent().unwrap_or_else(|| input.clone());
        for entry in WalkDir::new(&local).sort_by_file_name() {
            let entry = entry?;
            let source = VfsPath::local(entry.path());
            let name = entry_name(&root, &source)?;
            writer.write(vfs, &source, &name)?;
        }
    }
    writer.finish()?;
    info!(output, "archive written");
    Ok(())
}

pub fn cmd_archive_list(
    archive: &str,
    as_json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let file = File::open(archive)?;
    let mut reader = ArchiveReader::new(file, archive)?;
    let entries = reader.entries()?;
    if as_json {
        let rows: Vec<_> = entries
            .iter()
            .map(|e| {
                json!({
                    "name": e.name,
                    "type": e.file_type,
                    "size": e.size,
                    "mode": e.posix.as_ref().map(|p| p.mode).or(e.unix_mode),
                    "link_target": e.link_target.as_ref().map(|t| t.to_text()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for e in &entries {
        let marker = match e.file_type {
            FileType::Directory => "d",
            FileType::Symlink => "l",
            FileType::Other => "?",
            FileType::Regular => "-",
        };
        println!("{marker} {:>10} {}", e.size, e.name);
    }
    Ok(())
}
