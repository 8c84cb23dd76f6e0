//! Privileged execution bridge.
//!
//! Filesystem operations the process cannot perform directly are forwarded
//! to an elevated shell (`su`, or anything else that accepts commands on
//! stdin) and the results are marshalled back across the process boundary.
//!
//! The bridge owns at most one live session. [`PrivilegedBridge::acquire`]
//! reference-counts the session: the 0→1 transition spawns the shell and a
//! dedicated worker thread, the last release closes both. The session moves
//! through `Closed → Opening → Open → Closing → Closed`; an acquire that
//! observes `Opening` or `Closing` waits for the transition instead of
//! race-spawning a second shell.
//!
//! The command protocol is line-oriented: the command is written to the
//! shell's stdin followed by sentinel lines carrying `$?`, and the worker
//! reads stdout up to its sentinel and drains stderr up to its sentinel.
//! Because every command for a session funnels through the one worker,
//! a queued command never observes another command's partially-written
//! output, and commands complete in submission order.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, trace, warn};

use crate::error::{FsError, Result};

/// How the elevated shell is started, e.g. `su` or `sudo sh`.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig { program: "su".into(), args: Vec::new() }
    }
}

impl BridgeConfig {
    /// Parse a space-separated command line, e.g. `"sudo sh"`.
    pub fn from_command_line(line: &str) -> Self {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_else(|| "su".into());
        BridgeConfig { program, args: parts.collect() }
    }
}

/// The result of one elevated command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CommandOutput {
    /// Surface a nonzero exit status as a `Generic` failure carrying the
    /// captured stderr, tagged with the locator the command was run for.
    pub fn checked(self, path: &str) -> Result<CommandOutput> {
        if self.exit_code == 0 {
            return Ok(self);
        }
        let detail = if self.stderr.is_empty() {
            format!("elevated command failed with status {}", self.exit_code)
        } else {
            format!(
                "elevated command failed with status {}: {}",
                self.exit_code,
                self.stderr.join("; ")
            )
        };
        Err(FsError::generic(path, detail))
    }
}

struct Job {
    command: String,
    reply: Sender<Result<CommandOutput>>,
}

struct SessionHandle {
    jobs: Sender<Job>,
    worker: Option<JoinHandle<()>>,
}

enum Phase {
    Closed,
    Opening,
    Open(SessionHandle),
    Closing,
}

struct BridgeState {
    phase: Phase,
    refs: usize,
}

/// Reference-counted owner of the elevated session.
///
/// Explicitly constructed and explicitly owned; pass an `Arc` of it to
/// whichever components need escalation. There is no ambient global state.
pub struct PrivilegedBridge {
    config: BridgeConfig,
    state: Mutex<BridgeState>,
    cond: Condvar,
}

impl PrivilegedBridge {
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        Arc::new(PrivilegedBridge {
            config,
            state: Mutex::new(BridgeState { phase: Phase::Closed, refs: 0 }),
            cond: Condvar::new(),
        })
    }

    /// Acquire a handle on the session, opening it on the 0→1 transition.
    ///
    /// A failed open reports `AccessDenied` and leaves the reference count
    /// untouched, so a later acquire can try again.
    pub fn acquire(self: &Arc<Self>) -> Result<PrivilegedSession> {
        let mut state = self.state.lock().unwrap();
        loop {
            match state.phase {
                Phase::Opening | Phase::Closing => {
                    state = self.cond.wait(state).unwrap();
                }
                Phase::Open(_) => {
                    state.refs += 1;
                    return Ok(PrivilegedSession { bridge: Arc::clone(self) });
                }
                Phase::Closed => {
                    state.phase = Phase::Opening;
                    drop(state);
                    let opened = open_session(&self.config);
                    let mut state = self.state.lock().unwrap();
                    match opened {
                        Ok(handle) => {
                            debug!(program = %self.config.program, "privileged session opened");
                            state.phase = Phase::Open(handle);
                            state.refs = 1;
                            self.cond.notify_all();
                            return Ok(PrivilegedSession { bridge: Arc::clone(self) });
                        }
                        Err(err) => {
                            state.phase = Phase::Closed;
                            self.cond.notify_all();
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(state.refs > 0);
        state.refs -= 1;
        if state.refs > 0 {
            return;
        }
        let handle = match std::mem::replace(&mut state.phase, Phase::Closing) {
            Phase::Open(handle) => handle,
            other => {
                state.phase = other;
                return;
            }
        };
        drop(state);
        // Dropping the job sender lets the worker drain its queue, tell the
        // shell to exit, and reap the child.
        drop(handle.jobs);
        if let Some(worker) = handle.worker {
            let _ = worker.join();
        }
        let mut state = self.state.lock().unwrap();
        state.phase = Phase::Closed;
        self.cond.notify_all();
        debug!("privileged session closed");
    }

    fn job_sender(&self) -> Result<Sender<Job>> {
        let state = self.state.lock().unwrap();
        match &state.phase {
            Phase::Open(handle) => Ok(handle.jobs.clone()),
            _ => Err(FsError::generic("privileged session", "session is not open")),
        }
    }
}

/// A live handle on the elevated session; releases its reference on drop.
pub struct PrivilegedSession {
    bridge: Arc<PrivilegedBridge>,
}

impl PrivilegedSession {
    /// Run one command in the elevated shell, blocking until the shell has
    /// finished it and gone idle again.
    pub fn execute(&self, command: &str) -> Result<CommandOutput> {
        trace!(command, "dispatching elevated command");
        let jobs = self.bridge.job_sender()?;
        let (reply_tx, reply_rx) = bounded(1);
        jobs
            .send(Job { command: command.to_string(), reply: reply_tx })
            .map_err(|_| {
                FsError::generic("privileged session", "session worker has terminated")
            })?;
        reply_rx.recv().map_err(|_| {
            FsError::generic("privileged session", "session worker has terminated")
        })?
    }
}

impl Drop for PrivilegedSession {
    fn drop(&mut self) {
        self.bridge.release();
    }
}

struct SessionIo {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr_rx: Receiver<String>,
    token: String,
}

fn open_session(config: &BridgeConfig) -> Result<SessionHandle> {
    let mut child = Command::new(&config.program)
        .args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            FsError::access_denied_with(
                &config.program,
                "failed to start elevated shell",
            )
            .with_source(e)
        })?;

    let stdin = child.stdin.take().expect("stdin was piped");
    let stdout = BufReader::new(child.stdout.take().expect("stdout was piped"));
    let stderr = child.stderr.take().expect("stderr was piped");

    let (stderr_tx, stderr_rx) = unbounded();
    thread::Builder::new()
        .name("polyfs-bridge-stderr".into())
        .spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if stderr_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        })
        .map_err(|e| {
            FsError::generic(&config.program, "failed to spawn stderr reader").with_source(e)
        })?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
        .unwrap_or(0);
    let token = format!("__polyfs_{:x}_{:x}__", std::process::id(), nanos);

    let mut io = SessionIo { child, stdin, stdout, stderr_rx, token };

    // Probe the shell once; an immediately-denied `su` shows up here as a
    // dead pipe rather than later as a confusing command failure.
    if io.run("true").is_err() {
        io.close();
        return Err(FsError::access_denied_with(
            &config.program,
            "elevated shell terminated during handshake",
        ));
    }

    let (jobs_tx, jobs_rx) = unbounded::<Job>();
    let worker = thread::Builder::new()
        .name("polyfs-bridge-worker".into())
        .spawn(move || worker_loop(io, jobs_rx))
        .map_err(|e| {
            FsError::generic(&config.program, "failed to spawn session worker").with_source(e)
        })?;

    Ok(SessionHandle { jobs: jobs_tx, worker: Some(worker) })
}

fn worker_loop(mut io: SessionIo, jobs: Receiver<Job>) {
    for job in jobs {
        let result = io.run(&job.command);
        // A caller that lost interest just drops its receiver.
        let _ = job.reply.send(result);
    }
    io.close();
}

impl SessionIo {
    fn run(&mut self, command: &str) -> Result<CommandOutput> {
        let token = self.token.clone();
        // The command runs in a subshell so an `exit` (or any nonzero
        // status) leaves the subshell, not the session; `$?` still carries
        // the subshell's status.
        write!(
            self.stdin,
            "( {command}\n)\necho \"{token} $?\"\necho \"{token}\" 1>&2\n"
        )
        .and_then(|_| self.stdin.flush())
        .map_err(|e| {
            FsError::generic("privileged session", "elevated shell is gone").with_source(e)
        })?;

        let mut stdout = Vec::new();
        let exit_code;
        loop {
            let mut line = String::new();
            let n = self.stdout.read_line(&mut line).map_err(|e| {
                FsError::generic("privileged session", "failed reading shell output")
                    .with_source(e)
            })?;
            if n == 0 {
                return Err(FsError::generic(
                    "privileged session",
                    "elevated shell exited unexpectedly",
                ));
            }
            let line = line.trim_end_matches('\n').to_string();
            if let Some(rest) = line.strip_prefix(token.as_str()) {
                exit_code = rest.trim().parse::<i32>().unwrap_or(-1);
                break;
            }
            stdout.push(line);
        }

        let mut stderr = Vec::new();
        loop {
            match self.stderr_rx.recv() {
                Ok(line) if line.starts_with(token.as_str()) => break,
                Ok(line) => stderr.push(line),
                Err(_) => {
                    return Err(FsError::generic(
                        "privileged session",
                        "elevated shell closed its error stream",
                    ));
                }
            }
        }

        Ok(CommandOutput { exit_code, stdout, stderr })
    }

    fn close(mut self) {
        let _ = self.stdin.write_all(b"exit\n");
        let _ = self.stdin.flush();
        drop(self.stdin);
        match self.child.wait() {
            Ok(status) => trace!(?status, "elevated shell reaped"),
            Err(e) => warn!(error = %e, "failed to reap elevated shell"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh_bridge() -> Arc<PrivilegedBridge> {
        // Plain `sh` stands in for the elevated shell; the protocol is
        // identical, only the privilege level differs.
        PrivilegedBridge::new(BridgeConfig::from_command_line("sh"))
    }

    #[test]
    fn execute_returns_exit_code_and_streams() {
        let bridge = sh_bridge();
        let session = bridge.acquire().unwrap();
        let out = session
            .execute("echo hello; echo oops 1>&2; exit 3")
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout, vec!["hello".to_string()]);
        assert_eq!(out.stderr, vec!["oops".to_string()]);
    }

    #[test]
    fn exit_in_a_command_leaves_the_session_alive() {
        let bridge = sh_bridge();
        let session = bridge.acquire().unwrap();
        let out = session.execute("exit 7").unwrap();
        assert_eq!(out.exit_code, 7);
        // The session shell must survive the command's exit.
        let out = session.execute("echo still-here").unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout, vec!["still-here".to_string()]);
    }

    #[test]
    fn checked_carries_stderr() {
        let bridge = sh_bridge();
        let session = bridge.acquire().unwrap();
        let err = session
            .execute("echo broken 1>&2; false")
            .unwrap()
            .checked("/some/path")
            .unwrap_err();
        assert!(err.to_string().contains("broken"));
        assert_eq!(err.path(), "/some/path");
    }

    #[test]
    fn overlapping_acquires_share_one_shell() {
        let bridge = sh_bridge();
        let a = bridge.acquire().unwrap();
        let b = bridge.acquire().unwrap();
        let pid_a = a.execute("echo $$").unwrap().stdout;
        let pid_b = b.execute("echo $$").unwrap().stdout;
        assert_eq!(pid_a, pid_b, "both handles must talk to the same shell");
        drop(a);
        // Still open while `b` holds its reference.
        assert!(b.execute("true").is_ok());
    }

    #[test]
    fn open_failure_is_access_denied_and_recoverable() {
        let bridge = PrivilegedBridge::new(BridgeConfig {
            program: "/nonexistent/polyfs-no-such-shell".into(),
            args: vec![],
        });
        let err = bridge.acquire().err().expect("open must fail");
        assert!(err.is_access_denied());
        // The failed open must not leave a dangling count or a stuck phase.
        let err = bridge.acquire().err().expect("reopen must fail the same way");
        assert!(err.is_access_denied());
    }
}
