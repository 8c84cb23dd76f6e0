//! Remote-share backends (SMB and SFTP).
//!
//! The network client libraries sit behind the [`RemoteClient`] and
//! [`RemoteFile`] collaborator traits; the providers here are thin
//! adapters that translate paths and errors. Async reads hand back an
//! [`AsyncReadTask`] so the caller decides when (or whether) to block.

pub mod sftp;
pub mod smb;

use std::io::{self, Read, SeekFrom, Write};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use thiserror::Error;
use tracing::trace;

use crate::attr::{FileAttributes, SymbolicLinkTarget};
use crate::error::{FsError, Result};
use crate::path::VfsPath;
use crate::vfs::{OpenMode, VfsFile};

pub use sftp::SftpFs;
pub use smb::SmbFs;

/// Failure kinds a network-filesystem client library reports.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote object not found")]
    NotFound,
    #[error("remote permission denied: {0}")]
    PermissionDenied(String),
    #[error("protocol failure: {0}")]
    Protocol(String),
}

/// Translate a client-library failure into the shared taxonomy, keeping
/// the library error as the cause.
pub fn translate(err: RemoteError, path: &VfsPath) -> FsError {
    match err {
        RemoteError::NotFound => FsError::not_found(path.to_string()).with_source(err),
        RemoteError::PermissionDenied(ref detail) => {
            let detail = detail.clone();
            FsError::AccessDenied {
                path: path.to_string(),
                detail: Some(detail),
                source: Some(err.into()),
            }
        }
        RemoteError::Protocol(ref message) => {
            let message = message.clone();
            FsError::Generic { path: path.to_string(), message, source: Some(err.into()) }
        }
    }
}

/// An open handle on a remote file.
pub trait RemoteFile: Read + Write + Send {
    /// Positioned read; does not move the stream cursor.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::result::Result<usize, RemoteError>;

    /// Start a positioned read without blocking; completion is observed
    /// through the returned task.
    fn read_async(&mut self, offset: u64, len: usize) -> AsyncReadTask;
}

/// The network-filesystem client collaborator. One instance per mounted
/// share; implementations wrap the protocol library's session.
pub trait RemoteClient: Send + Sync {
    fn stat(&self, path: &str, follow_links: bool)
        -> std::result::Result<FileAttributes, RemoteError>;
    /// Child names (one path segment each), unordered.
    fn list(&self, path: &str) -> std::result::Result<Vec<String>, RemoteError>;
    fn open(&self, path: &str, mode: OpenMode)
        -> std::result::Result<Box<dyn RemoteFile>, RemoteError>;
    fn create_directory(&self, path: &str) -> std::result::Result<(), RemoteError>;
    fn delete(&self, path: &str) -> std::result::Result<(), RemoteError>;
    fn rename(&self, from: &str, to: &str) -> std::result::Result<(), RemoteError>;
    fn read_link(&self, path: &str) -> std::result::Result<SymbolicLinkTarget, RemoteError>;
    fn create_link(&self, link: &str, target: &SymbolicLinkTarget)
        -> std::result::Result<(), RemoteError>;
}

/// A pending positioned read.
///
/// The producer side pushes exactly one completion; the consumer either
/// blocks in [`wait`](AsyncReadTask::wait), samples with
/// [`poll`](AsyncReadTask::poll), or drops interest with
/// [`cancel`](AsyncReadTask::cancel). Cancelling never interrupts the
/// transfer already in flight; it only discards the result.
pub struct AsyncReadTask {
    completion: Receiver<std::result::Result<Vec<u8>, RemoteError>>,
}

/// Producer half handed to the client implementation.
pub struct AsyncReadCompletion {
    slot: Sender<std::result::Result<Vec<u8>, RemoteError>>,
}

impl AsyncReadTask {
    pub fn channel() -> (AsyncReadCompletion, AsyncReadTask) {
        let (slot, completion) = bounded(1);
        (AsyncReadCompletion { slot }, AsyncReadTask { completion })
    }

    /// A task that completed before it was returned.
    pub fn ready(result: std::result::Result<Vec<u8>, RemoteError>) -> AsyncReadTask {
        let (completion, task) = AsyncReadTask::channel();
        completion.complete(result);
        task
    }

    /// Block until the read completes.
    pub fn wait(self) -> std::result::Result<Vec<u8>, RemoteError> {
        match self.completion.recv() {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Protocol(
                "read task abandoned by the client".to_string(),
            )),
        }
    }

    /// Take the result if the read already completed.
    pub fn poll(&mut self) -> Option<std::result::Result<Vec<u8>, RemoteError>> {
        match self.completion.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(RemoteError::Protocol(
                "read task abandoned by the client".to_string(),
            ))),
        }
    }

    /// Drop interest in the result.
    pub fn cancel(self) {
        trace!("async read cancelled");
        drop(self.completion);
    }
}

impl AsyncReadCompletion {
    /// Deliver the read's outcome. A cancelled consumer is not an error.
    pub fn complete(self, result: std::result::Result<Vec<u8>, RemoteError>) {
        let _ = self.slot.send(result);
    }
}

/// Wraps a remote handle into the [`VfsFile`] contract.
struct RemoteStream(Box<dyn RemoteFile>);

impl Read for RemoteStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for RemoteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl VfsFile for RemoteStream {
    fn seek_stream(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "remote stream is not seekable"))
    }
}

pub(crate) fn open_stream(
    client: &dyn RemoteClient,
    path: &VfsPath,
    rest: &str,
    mode: OpenMode,
) -> Result<Box<dyn VfsFile>> {
    let file = client.open(rest, mode).map_err(|e| translate(e, path))?;
    Ok(Box::new(RemoteStream(file)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn ready_task_polls_immediately() {
        let mut task = AsyncReadTask::ready(Ok(b"abc".to_vec()));
        match task.poll() {
            Some(Ok(data)) => assert_eq!(data, b"abc"),
            other => panic!("unexpected poll outcome: {other:?}"),
        }
    }

    #[test]
    fn wait_blocks_until_completion() {
        let (completion, task) = AsyncReadTask::channel();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completion.complete(Ok(b"late".to_vec()));
        });
        assert_eq!(task.wait().unwrap(), b"late");
        producer.join().unwrap();
    }

    #[test]
    fn poll_before_completion_is_none() {
        let (completion, mut task) = AsyncReadTask::channel();
        assert!(task.poll().is_none());
        completion.complete(Err(RemoteError::NotFound));
        assert!(matches!(task.poll(), Some(Err(RemoteError::NotFound))));
    }

    #[test]
    fn completing_a_cancelled_task_is_harmless() {
        let (completion, task) = AsyncReadTask::channel();
        task.cancel();
        completion.complete(Ok(Vec::new()));
    }

    #[test]
    fn abandoned_task_reports_a_protocol_error() {
        let (completion, task) = AsyncReadTask::channel();
        drop(completion);
        assert!(matches!(task.wait(), Err(RemoteError::Protocol(_))));
    }
}
