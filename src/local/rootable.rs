//! Escalating wrapper around the local backend.
//!
//! Operations are first tried directly; an `AccessDenied` result is retried
//! once through the privileged bridge using shell equivalents. Failures are
//! reported per operation, so a bulk caller can skip one denied file and
//! continue with the rest.

use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use tracing::debug;

use crate::attr::{FileAttributes, FileType, PosixAttributes, SymbolicLinkTarget};
use crate::bridge::{CommandOutput, PrivilegedBridge, PrivilegedSession};
use crate::error::{FsError, Result};
use crate::path::VfsPath;
use crate::vfs::{FileSystemProvider, OpenMode, ReadOnlyFile, VfsFile};

use super::LocalFs;

/// Local backend with root escalation through the privileged bridge.
pub struct RootableFs {
    inner: LocalFs,
    bridge: Arc<PrivilegedBridge>,
}

impl RootableFs {
    pub fn new(bridge: Arc<PrivilegedBridge>) -> Self {
        RootableFs { inner: LocalFs, bridge }
    }

    fn escalate<T>(
        &self,
        direct: Result<T>,
        op: &str,
        f: impl FnOnce(&PrivilegedSession) -> Result<T>,
    ) -> Result<T> {
        match direct {
            Err(err) if err.is_access_denied() => {
                debug!(op, "escalating through privileged bridge");
                let session = self.bridge.acquire()?;
                f(&session)
            }
            other => other,
        }
    }
}

impl FileSystemProvider for RootableFs {
    fn stat(&self, path: &VfsPath, follow_links: bool) -> Result<FileAttributes> {
        self.escalate(self.inner.stat(path, follow_links), "stat", |session| {
            privileged_stat(session, path, follow_links)
        })
    }

    fn list(&self, path: &VfsPath) -> Result<Vec<VfsPath>> {
        self.escalate(self.inner.list(path), "list", |session| {
            privileged_list(session, path)
        })
    }

    fn open(&self, path: &VfsPath, mode: OpenMode) -> Result<Box<dyn VfsFile>> {
        self.escalate(self.inner.open(path, mode), "open", |session| {
            privileged_open(session, path, mode)
        })
    }

    fn create_directory(&self, path: &VfsPath) -> Result<()> {
        self.escalate(self.inner.create_directory(path), "mkdir", |session| {
            run(session, path, &format!("mkdir -- {}", quoted(path)?))
        })
    }

    fn delete(&self, path: &VfsPath) -> Result<()> {
        self.escalate(self.inner.delete(path), "delete", |session| {
            let attrs = privileged_stat(session, path, false)?;
            let command = if attrs.is_dir() {
                format!("rmdir -- {}", quoted(path)?)
            } else {
                format!("rm -f -- {}", quoted(path)?)
            };
            run(session, path, &command)
        })
    }

    fn rename(&self, from: &VfsPath, to: &VfsPath) -> Result<()> {
        self.escalate(self.inner.rename(from, to), "rename", |session| {
            run(
                session,
                from,
                &format!("mv -- {} {}", quoted(from)?, quoted(to)?),
            )
        })
    }

    fn copy(&self, from: &VfsPath, to: &VfsPath) -> Result<()> {
        self.escalate(self.inner.copy(from, to), "copy", |session| {
            let attrs = privileged_stat(session, from, false)?;
            if attrs.is_dir() {
                return run(session, to, &format!("mkdir -- {}", quoted(to)?));
            }
            run(
                session,
                from,
                &format!("cp -p -- {} {}", quoted(from)?, quoted(to)?),
            )
        })
    }

    fn read_symbolic_link(&self, path: &VfsPath) -> Result<SymbolicLinkTarget> {
        self.escalate(self.inner.read_symbolic_link(path), "readlink", |session| {
            let out = execute(session, path, &format!("readlink -- {}", quoted(path)?))?;
            let target = out
                .stdout
                .first()
                .ok_or_else(|| FsError::generic(path.to_string(), "readlink gave no output"))?;
            Ok(SymbolicLinkTarget::new(target.as_bytes().to_vec()))
        })
    }

    fn create_symbolic_link(&self, link: &VfsPath, target: &SymbolicLinkTarget) -> Result<()> {
        self.escalate(
            self.inner.create_symbolic_link(link, target),
            "symlink",
            |session| {
                run(
                    session,
                    link,
                    &format!(
                        "ln -s -- {} {}",
                        quote(&target.to_text()),
                        quoted(link)?
                    ),
                )
            },
        )
    }
}

/// Single-quote a string for the elevated shell.
fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn quoted(path: &VfsPath) -> Result<String> {
    let local = path
        .as_local()
        .ok_or_else(|| FsError::unsupported(path.to_string(), "not a local path"))?;
    Ok(quote(&local.to_string_lossy()))
}

/// Run a command and classify a nonzero exit by its stderr text.
fn execute(session: &PrivilegedSession, path: &VfsPath, command: &str) -> Result<CommandOutput> {
    let out = session.execute(command)?;
    if out.exit_code == 0 {
        return Ok(out);
    }
    let stderr = out.stderr.join("; ");
    let lower = stderr.to_lowercase();
    if lower.contains("no such file") {
        return Err(FsError::not_found(path.to_string()));
    }
    if lower.contains("permission denied") || lower.contains("operation not permitted") {
        return Err(FsError::access_denied_with(path.to_string(), stderr));
    }
    Err(out.checked(&path.to_string()).unwrap_err())
}

fn run(session: &PrivilegedSession, path: &VfsPath, command: &str) -> Result<()> {
    execute(session, path, command).map(|_| ())
}

pub(crate) fn privileged_stat(
    session: &PrivilegedSession,
    path: &VfsPath,
    follow_links: bool,
) -> Result<FileAttributes> {
    let follow = if follow_links { "-L " } else { "" };
    let out = execute(
        session,
        path,
        &format!("stat {follow}-c '%f|%s|%Y|%u|%g|%U|%G' -- {}", quoted(path)?),
    )?;
    let line = out
        .stdout
        .first()
        .ok_or_else(|| FsError::generic(path.to_string(), "stat gave no output"))?;
    parse_stat_line(line).ok_or_else(|| {
        FsError::generic(path.to_string(), format!("unparseable stat output: {line}"))
    })
}

fn parse_stat_line(line: &str) -> Option<FileAttributes> {
    let mut fields = line.split('|');
    let raw_mode = u32::from_str_radix(fields.next()?, 16).ok()?;
    let size = fields.next()?.parse().ok()?;
    let mtime: u64 = fields.next()?.parse().ok()?;
    let uid = fields.next()?.parse().ok()?;
    let gid = fields.next()?.parse().ok()?;
    let owner = fields.next()?.to_string();
    let group = fields.next()?.to_string();

    // High bits of st_mode carry the file type.
    let file_type = match raw_mode & 0o170000 {
        0o100000 => FileType::Regular,
        0o040000 => FileType::Directory,
        0o120000 => FileType::Symlink,
        _ => FileType::Other,
    };
    Some(FileAttributes {
        file_type,
        size,
        modified: Some(UNIX_EPOCH + Duration::from_secs(mtime)),
        posix: Some(PosixAttributes {
            mode: raw_mode & 0o7777,
            uid,
            gid,
            owner: Some(owner).filter(|s| !s.is_empty() && s != "UNKNOWN"),
            group: Some(group).filter(|s| !s.is_empty() && s != "UNKNOWN"),
        }),
    })
}

fn privileged_list(session: &PrivilegedSession, path: &VfsPath) -> Result<Vec<VfsPath>> {
    let out = execute(
        session,
        path,
        &format!("find {} -mindepth 1 -maxdepth 1", quoted(path)?),
    )?;
    Ok(out.stdout.iter().map(VfsPath::local).collect())
}

fn privileged_open(
    session: &PrivilegedSession,
    path: &VfsPath,
    mode: OpenMode,
) -> Result<Box<dyn VfsFile>> {
    if mode != OpenMode::Read {
        // Writing through the line-oriented shell protocol cannot be
        // binary-faithful; that is the root-service flavor's job.
        return Err(FsError::unsupported(
            path.to_string(),
            "write through privileged bridge",
        ));
    }
    let out = execute(session, path, &format!("cat -- {}", quoted(path)?))?;
    let mut data = out.stdout.join("\n").into_bytes();
    if !data.is_empty() {
        data.push(b'\n');
    }
    Ok(Box::new(ReadOnlyFile(Cursor::new(data))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeConfig;
    use tempfile::tempdir;

    fn session() -> (Arc<PrivilegedBridge>, PrivilegedSession) {
        let bridge = PrivilegedBridge::new(BridgeConfig::from_command_line("sh"));
        let session = bridge.acquire().unwrap();
        (bridge, session)
    }

    #[test]
    fn shell_quoting_survives_awkward_names() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), "'it'\\''s'");
    }

    #[test]
    #[cfg(unix)]
    fn privileged_stat_parses_real_output() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("probe.txt");
        std::fs::write(&file, b"12345").unwrap();
        let (_bridge, session) = session();

        let attrs = privileged_stat(&session, &VfsPath::local(&file), false).unwrap();
        assert_eq!(attrs.file_type, FileType::Regular);
        assert_eq!(attrs.size, 5);
        assert!(attrs.posix.is_some());
    }

    #[test]
    #[cfg(unix)]
    fn privileged_stat_missing_file_is_not_found() {
        let (_bridge, session) = session();
        let err =
            privileged_stat(&session, &VfsPath::local("/no/such/polyfs/file"), false).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    #[cfg(unix)]
    fn privileged_list_and_mkdir_round_trip() {
        let dir = tempdir().unwrap();
        let (_bridge, session) = session();
        let base = VfsPath::local(dir.path());

        run(&session, &base, &format!("mkdir -- {}", quoted(&base.join("sub")).unwrap()))
            .unwrap();
        let children = privileged_list(&session, &base).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].file_name().as_deref(), Some("sub"));
    }

    #[test]
    fn privileged_open_rejects_writes() {
        let (_bridge, session) = session();
        let err = privileged_open(&session, &VfsPath::local("/tmp/x"), OpenMode::Write)
            .err()
            .expect("write through the bridge must be refused");
        assert!(matches!(err, FsError::Unsupported { .. }));
    }
}
