//! Supervision of the external programs the relay depends on.
//!
//! Due to limitations with reading `stdout` and `stderr` simultaneously while
//! piping large amounts of data between processes (see
//! [`std::process::Stdio::piped`]), a child's `stderr` handle is redirected to
//! a temporary file rather than piped directly into the service. The captured
//! output is read back, bounded, only when a diagnostic is needed.
//!
//! Programs are spawned directly, never through a shell, so user-controlled
//! query text can never be interpreted as shell syntax.
//!
//! Helpers for constructing `yt-dlp` and `ffmpeg` invocations are included.

use std::ffi::OsString;
use std::future::Future;
use std::io::{self, Read};
use std::path::Path;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
pub use ffmpeg::*;
use futures::Stream;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tokio::process::{Child, ChildStdout};
use tokio::time::Sleep;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
pub use yt_dlp::*;

use crate::Error;

mod ffmpeg;
mod yt_dlp;

/// Upper bound on how much captured stderr is attached to diagnostics.
const STDERR_EXCERPT_BYTES: u64 = 4096;

const STDOUT_CHUNK_BYTES: usize = 16 * 1024;

/// A simplified representation of an OS command.
#[derive(Debug, Clone)]
pub struct Command {
    program: OsString,
    args: Vec<OsString>,
}

impl Command {
    /// Creates a new [`Command`].
    pub fn new<S>(program: S) -> Self
    where
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Adds a single argument to the [`Command`].
    #[must_use]
    pub fn arg<S>(mut self, arg: S) -> Self
    where
        S: Into<OsString>,
    {
        self.args.push(arg.into());
        self
    }

    /// Adds multiple arguments to the [`Command`].
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Display name of the program, for diagnostics.
    pub fn program_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }
}

/// Lifecycle of one supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Spawned, no stdout byte seen yet.
    Starting,
    /// Produced at least one stdout byte.
    Running,
    /// Exited on its own and was reaped.
    Exited,
    /// Terminated by the supervisor.
    Killed,
}

/// One spawned external program under supervision.
///
/// Exactly one instance exists per external invocation; a process is never
/// reused across requests.
#[derive(Debug)]
pub struct ManagedProcess {
    handle: ProcessHandle,
}

impl ManagedProcess {
    /// Spawns `command` with stdout piped, stderr captured, and `stdin`
    /// attached as given (commonly another process's stdout, forming an
    /// OS-level pipe between the two).
    pub fn spawn(command: Command, stdin: Stdio) -> io::Result<Self> {
        let (stderr, stderr_file) = stderr_capture()?;
        let program = command.program_name();
        let child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .wrap_err("error spawning process")?;
        debug!(%program, pid = child.id(), "spawned process");
        Ok(Self {
            handle: ProcessHandle::new(program, child, stderr_file),
        })
    }

    /// Returns a cloneable handle for terminating or reaping the process.
    pub fn handle(&self) -> ProcessHandle {
        self.handle.clone()
    }

    /// Moves the child's stdout out, e.g. to feed another process's stdin.
    pub fn take_stdout(&mut self) -> io::Result<ChildStdout> {
        self.handle
            .inner
            .child
            .lock()
            .as_mut()
            .and_then(|child| child.stdout.take())
            .ok_or_else(|| io::Error::other("process stdout already taken"))
    }

    /// Consumes the wrapper and returns the stdout byte stream.
    ///
    /// The stream fails its first poll with [`io::ErrorKind::TimedOut`] when
    /// no byte arrives within `start_timeout`. Once the first byte has been
    /// seen the timeout no longer applies: a long-running stream must not be
    /// killed just because the consumer is slow to request more data.
    pub fn into_output(mut self, start_timeout: Duration) -> io::Result<ProcessOutput> {
        let stdout = self.take_stdout()?;
        Ok(ProcessOutput {
            stream: ReaderStream::with_capacity(stdout, STDOUT_CHUNK_BYTES),
            handle: self.handle,
            start_deadline: Some(Box::pin(tokio::time::sleep(start_timeout))),
            start_timeout,
        })
    }

    /// Runs the process to completion and returns its captured stdout.
    ///
    /// Used for metadata-only invocations where the output is a single JSON
    /// document rather than an audio stream. The process is abandoned (and
    /// killed) when `deadline` elapses first.
    pub async fn collect(self, deadline: Duration) -> crate::Result<Vec<u8>> {
        let program = self.handle.program().to_owned();
        let Some(child) = ({ self.handle.inner.child.lock().take() }) else {
            return Err(Error::Provider(io::Error::other(
                "process already consumed",
            )));
        };
        let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Error::Provider(e)),
            Err(_) => {
                // Timing out drops the wait future and with it the child;
                // kill_on_drop reaps it.
                self.handle.set_state(ProcessState::Killed);
                return Err(Error::ProcessStartTimeout {
                    program,
                    timeout: deadline,
                });
            }
        };
        self.handle.set_state(ProcessState::Exited);
        if !output.status.success() {
            return Err(Error::ProcessExited {
                program,
                status: output.status,
                stderr: self.handle.stderr_excerpt(),
            });
        }
        Ok(output.stdout)
    }
}

/// Cloneable handle to a [`ManagedProcess`], used by teardown paths.
///
/// All mutating operations take the child out of the shared slot, so
/// terminating or reaping an already-finished process is a no-op.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    program: String,
    child: Mutex<Option<Child>>,
    state: Mutex<ProcessState>,
    stderr_file: Mutex<Option<NamedTempFile>>,
}

impl ProcessHandle {
    fn new(program: String, child: Child, stderr_file: NamedTempFile) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                program,
                child: Mutex::new(Some(child)),
                state: Mutex::new(ProcessState::Starting),
                stderr_file: Mutex::new(Some(stderr_file)),
            }),
        }
    }

    /// Display name of the supervised program.
    pub fn program(&self) -> &str {
        &self.inner.program
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessState {
        *self.inner.state.lock()
    }

    fn set_state(&self, state: ProcessState) {
        *self.inner.state.lock() = state;
    }

    pub(crate) fn mark_running(&self) {
        let mut state = self.inner.state.lock();
        if *state == ProcessState::Starting {
            *state = ProcessState::Running;
        }
    }

    /// Requests termination: a graceful signal now, a forced kill once the
    /// grace window elapses. No-op when the process has already exited or
    /// been terminated.
    pub fn terminate(&self, grace: Duration) {
        let Some(mut child) = ({ self.inner.child.lock().take() }) else {
            return;
        };
        self.set_state(ProcessState::Killed);
        let program = self.inner.program.clone();
        debug!(%program, pid = child.id(), "terminating process");
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: signalling a pid we still own; the child has not been
            // reaped, so the pid cannot have been recycled.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        let _ = child.start_kill();

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                match tokio::time::timeout(grace, child.wait()).await {
                    Ok(Ok(status)) => {
                        debug!(%program, %status, "process exited after termination request");
                    }
                    Ok(Err(e)) => warn!(%program, error = %e, "error reaping terminated process"),
                    Err(_) => {
                        warn!(%program, "process ignored termination request, killing");
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                    }
                }
            });
        } else {
            // No runtime to escalate from; kill immediately.
            let _ = child.start_kill();
        }
    }

    /// Reaps a process whose output stream ended on its own.
    ///
    /// A non-zero exit here is logged, not returned: the bytes already
    /// delivered downstream cannot be un-sent, so streaming is best-effort
    /// once started.
    pub async fn reap(&self) {
        let Some(mut child) = ({ self.inner.child.lock().take() }) else {
            return;
        };
        match child.wait().await {
            Ok(status) => {
                self.set_state(ProcessState::Exited);
                if !status.success() {
                    warn!(
                        program = %self.inner.program,
                        %status,
                        stderr = %self.stderr_excerpt(),
                        "process exited with error after stream end"
                    );
                }
            }
            Err(e) => warn!(program = %self.inner.program, error = %e, "error reaping process"),
        }
    }

    /// Waits for the process to exit and returns its status together with a
    /// bounded stderr excerpt. Used when a stream ends before producing any
    /// output, where the exit status decides which typed error to surface.
    pub(crate) async fn wait_exit(&self) -> io::Result<(ExitStatus, String)> {
        let Some(mut child) = ({ self.inner.child.lock().take() }) else {
            return Err(io::Error::other("process already reaped"));
        };
        let status = child.wait().await?;
        self.set_state(ProcessState::Exited);
        Ok((status, self.stderr_excerpt()))
    }

    /// Bounded excerpt of the process's captured stderr.
    pub fn stderr_excerpt(&self) -> String {
        let guard = self.inner.stderr_file.lock();
        let Some(file) = guard.as_ref() else {
            return String::new();
        };
        let mut buf = Vec::new();
        match file.reopen() {
            // Reopen is required to observe content written by the child.
            Ok(handle) => {
                let _ = handle
                    .take(STDERR_EXCERPT_BYTES)
                    .read_to_end(&mut buf)
                    .inspect_err(|e| warn!(error = %e, "error reading stderr capture"));
            }
            Err(e) => warn!(error = %e, "error reopening stderr capture"),
        }
        String::from_utf8_lossy(&buf).trim().to_owned()
    }
}

/// The stdout byte stream of a [`ManagedProcess`].
#[derive(Debug)]
pub struct ProcessOutput {
    stream: ReaderStream<ChildStdout>,
    handle: ProcessHandle,
    start_deadline: Option<Pin<Box<Sleep>>>,
    start_timeout: Duration,
}

impl ProcessOutput {
    /// Handle to the process backing this stream.
    pub fn handle(&self) -> ProcessHandle {
        self.handle.clone()
    }
}

impl Stream for ProcessOutput {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.stream).poll_next(cx) {
            Poll::Ready(item) => {
                if this.start_deadline.take().is_some() && matches!(item, Some(Ok(_))) {
                    this.handle.mark_running();
                }
                Poll::Ready(item)
            }
            Poll::Pending => {
                if let Some(deadline) = this.start_deadline.as_mut() {
                    if deadline.as_mut().poll(cx).is_ready() {
                        this.start_deadline = None;
                        return Poll::Ready(Some(Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!(
                                "{} produced no output within {:?}",
                                this.handle.program(),
                                this.start_timeout
                            ),
                        ))));
                    }
                }
                Poll::Pending
            }
        }
    }
}

/// Spawns `program flag` and returns the first line it prints, or `None`
/// when the program is missing, fails, or stays silent past `deadline`.
pub async fn probe_version(program: &Path, flag: &str, deadline: Duration) -> Option<String> {
    let child = tokio::process::Command::new(program)
        .arg(flag)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .ok()?;
    let output = tokio::time::timeout(deadline, child.wait_with_output())
        .await
        .ok()?
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let line = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()?
        .trim()
        .to_owned();
    (!line.is_empty()).then_some(line)
}

fn stderr_capture() -> io::Result<(Stdio, NamedTempFile)> {
    let stderr_file = NamedTempFile::new().wrap_err("error creating stderr capture")?;
    let stdio = Stdio::from(
        stderr_file
            .as_file()
            .try_clone()
            .wrap_err("error cloning stderr capture")?,
    );
    Ok((stdio, stderr_file))
}

pub(crate) trait WrapIoResult {
    fn wrap_err(self, msg: &str) -> Self;
}

impl<T> WrapIoResult for io::Result<T> {
    fn wrap_err(self, msg: &str) -> Self {
        if let Err(e) = self {
            Err(io::Error::new(e.kind(), format!("{msg}: {e}")))
        } else {
            self
        }
    }
}
