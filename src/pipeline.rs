//! The audio pipeline: query in, supervised byte stream out.
//!
//! Every request becomes one [`PipelineSession`] owning the extractor
//! process, the optional transcoder process, and a cancellation token. The
//! session is torn down as a unit exactly once, no matter which side ends the
//! request first: the consumer dropping the stream, an upstream failure, or
//! the session deadline.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::MetadataCache;
use crate::config::Config;
use crate::filter::FilterSpec;
use crate::metadata::{MetadataResolver, TrackDescriptor};
use crate::process::{FfmpegCommand, ManagedProcess, OutputFormat, ProcessHandle, YtDlpCommand};
use crate::{Error, Result};

/// Characters stripped from queries before they reach a spawn call.
///
/// Spawning never goes through a shell, so this is defense in depth, not the
/// primary barrier; request validation in [`crate::server`] rejects these
/// outright at the boundary.
pub const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '$', '>', '<', '`'];

/// Parameters for one streaming request.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Free-text search query.
    pub query: String,
    /// Seek this far into the track before delivering audio.
    pub start_offset: Duration,
    /// Audio filter to apply.
    pub filter: FilterSpec,
    /// Output container/codec.
    pub format: OutputFormat,
}

impl StreamRequest {
    /// Creates a request with no offset, no filter, and the native format.
    pub fn new<S>(query: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            query: query.into(),
            start_offset: Duration::ZERO,
            filter: FilterSpec::None,
            format: OutputFormat::default(),
        }
    }

    /// Seek this far into the track.
    #[must_use]
    pub fn start_offset(mut self, offset: Duration) -> Self {
        self.start_offset = offset;
        self
    }

    /// Apply the given filter.
    #[must_use]
    pub fn filter(mut self, filter: FilterSpec) -> Self {
        self.filter = filter;
        self
    }

    /// Deliver audio in the given format.
    #[must_use]
    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Whether this request needs the transcoder at all.
    ///
    /// Seeking, filtering, or a non-native output format each force a
    /// transcode; otherwise the extractor's bytes pass straight through,
    /// saving the CPU cost and the extra process.
    pub fn needs_transcode(&self) -> bool {
        !self.start_offset.is_zero() || !self.filter.is_none() || !self.format.is_native()
    }
}

/// Orchestrates metadata resolution and audio streaming.
#[derive(Debug, Clone)]
pub struct AudioPipeline {
    config: Arc<Config>,
    resolver: MetadataResolver,
    cache: Arc<MetadataCache>,
    transcode_slots: Arc<Semaphore>,
}

impl AudioPipeline {
    /// Creates a pipeline from the given configuration.
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let cache = Arc::new(MetadataCache::new(
            config.cache_ttl(),
            config.cache_capacity,
        ));
        Self {
            resolver: MetadataResolver::new(config.clone(), cache.clone()),
            transcode_slots: Arc::new(Semaphore::new(config.max_transcodes)),
            cache,
            config,
        }
    }

    /// The shared metadata cache, for the sweep task and diagnostics.
    pub fn cache(&self) -> Arc<MetadataCache> {
        self.cache.clone()
    }

    /// Resolves track metadata without starting playback.
    pub async fn metadata(&self, query: &str) -> Result<TrackDescriptor> {
        let query = sanitize_query(query)?;
        self.resolver.resolve(&query).await
    }

    /// Starts a streaming session.
    ///
    /// Any failure before the first byte is available surfaces here as a
    /// typed error; after that, failures terminate the returned stream and
    /// are logged, since delivered audio cannot be un-sent.
    pub async fn stream(&self, request: StreamRequest) -> Result<AudioStream> {
        let query = sanitize_query(&request.query)?;
        let needs_transcode = request.needs_transcode();

        let permit = if needs_transcode {
            match self.transcode_slots.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => return Err(Error::Busy),
            }
        } else {
            None
        };

        let session = Arc::new(PipelineSession::new(
            self.config.termination_grace(),
            permit,
        ));

        let extractor_cmd = YtDlpCommand::new(query.as_str())
            .yt_dlp_path(self.config.extractor_path.as_os_str())
            .format(self.config.format_selector.clone())
            .socket_timeout(Duration::from_secs(self.config.socket_timeout_secs))
            .retries(self.config.extractor_retries)
            .into_stream_command();
        let mut extractor = ManagedProcess::spawn(extractor_cmd, Stdio::null())?;
        session.register(extractor.handle());

        let tail_process = if needs_transcode {
            // The extractor's stdout becomes the transcoder's stdin directly,
            // an OS-level pipe with no bytes copied through this process.
            let upstream = match extractor.take_stdout().and_then(TryInto::try_into) {
                Ok(stdio) => stdio,
                Err(e) => {
                    session.teardown();
                    return Err(e.into());
                }
            };
            let transcoder_cmd = FfmpegCommand::new(request.format)
                .ffmpeg_path(self.config.transcoder_path.as_os_str())
                .start_offset(request.start_offset)
                .filter(request.filter)
                .into_command();
            match ManagedProcess::spawn(transcoder_cmd, upstream) {
                Ok(transcoder) => {
                    session.register(transcoder.handle());
                    transcoder
                }
                Err(e) => {
                    session.teardown();
                    return Err(e.into());
                }
            }
        } else {
            extractor
        };

        let tail = tail_process.handle();
        let mut output = match tail_process.into_output(self.config.start_timeout()) {
            Ok(output) => output,
            Err(e) => {
                session.teardown();
                return Err(e.into());
            }
        };

        // Await the first byte here so failures before delivery surface as
        // typed errors rather than a truncated response body.
        let first = match output.next().await {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) if e.kind() == io::ErrorKind::TimedOut => {
                session.teardown();
                return Err(Error::ProcessStartTimeout {
                    program: tail.program().to_owned(),
                    timeout: self.config.start_timeout(),
                });
            }
            Some(Err(e)) => {
                session.teardown();
                return Err(e.into());
            }
            None => {
                let err = match tail.wait_exit().await {
                    Ok((status, _)) if status.success() => Error::NoResults(query),
                    Ok((status, stderr)) => Error::ProcessExited {
                        program: tail.program().to_owned(),
                        status,
                        stderr,
                    },
                    Err(e) => Error::Provider(e),
                };
                session.teardown();
                return Err(err);
            }
        };

        // Watchdog: a hung session may not outlive its deadline.
        let watchdog = session.clone();
        let deadline = self.config.session_timeout();
        tokio::spawn(async move {
            tokio::select! {
                () = watchdog.cancelled() => {}
                () = tokio::time::sleep(deadline) => {
                    warn!("session deadline elapsed, tearing down");
                    watchdog.teardown();
                }
            }
        });

        debug!(query = %query, transcode = needs_transcode, "streaming session started");
        Ok(AudioStream {
            inner: Box::pin(futures::stream::iter(std::iter::once(Ok(first))).chain(output)),
            session,
            content_type: request.format.content_type(),
            finished: false,
        })
    }
}

/// Strips shell metacharacters from a query and rejects it when nothing
/// meaningful remains.
pub fn sanitize_query(raw: &str) -> Result<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !SHELL_METACHARACTERS.contains(c))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Err(Error::Validation("query must not be empty".to_owned()));
    }
    Ok(cleaned.to_owned())
}

/// The per-request aggregate: every process spawned for one request plus the
/// cancellation token its watchers hang off.
///
/// Teardown is guarded by a flag, so whichever trigger fires first performs
/// it and every later trigger is a no-op. Termination is attempted for every
/// registered process; member processes are never shared across sessions.
#[derive(Debug)]
pub struct PipelineSession {
    processes: Mutex<Vec<ProcessHandle>>,
    cancel: CancellationToken,
    torn_down: AtomicBool,
    grace: Duration,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl PipelineSession {
    fn new(grace: Duration, permit: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            processes: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            torn_down: AtomicBool::new(false),
            grace,
            permit: Mutex::new(permit),
        }
    }

    fn register(&self, handle: ProcessHandle) {
        self.processes.lock().push(handle);
    }

    /// Number of processes spawned for this session.
    pub fn process_count(&self) -> usize {
        self.processes.lock().len()
    }

    /// Handles of the session's processes, for diagnostics.
    pub fn handles(&self) -> Vec<ProcessHandle> {
        self.processes.lock().clone()
    }

    /// Completes once the session has been torn down.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Whether teardown has already run.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Destroys every process the session created and releases its transcoder
    /// slot. Returns whether this call performed the teardown (`false` when a
    /// previous trigger already did).
    pub fn teardown(&self) -> bool {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();
        self.permit.lock().take();
        for handle in self.processes.lock().iter() {
            handle.terminate(self.grace);
        }
        true
    }
}

/// The delivered audio: a byte stream tied to its [`PipelineSession`].
///
/// Dropping the stream (which is what happens when an HTTP client
/// disconnects) tears the session down, and with it every process spawned
/// for the request.
pub struct AudioStream {
    inner: Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>,
    session: Arc<PipelineSession>,
    content_type: &'static str,
    finished: bool,
}

impl AudioStream {
    /// The session backing this stream.
    pub fn session(&self) -> Arc<PipelineSession> {
        self.session.clone()
    }

    /// MIME type of the delivered audio.
    pub fn content_type(&self) -> &'static str {
        self.content_type
    }
}

impl Stream for AudioStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Err(e))) => {
                warn!(error = %e, "stream failed mid-flight, tearing session down");
                this.finished = true;
                this.session.teardown();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                if !this.finished {
                    this.finished = true;
                    // Natural end: reap the children and log non-zero exits.
                    for handle in this.session.handles() {
                        tokio::spawn(async move { handle.reap().await });
                    }
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        // After a natural end the children are already reaped and this is a
        // no-op; after a mid-stream failure the guard flag swallows the
        // second trigger.
        self.session.teardown();
    }
}

impl fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioStream")
            .field("content_type", &self.content_type)
            .field("finished", &self.finished)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
