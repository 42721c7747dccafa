use std::io;
use std::process::ExitStatus;
use std::time::Duration;

/// Errors produced by the audio pipeline and the external programs it
/// supervises.
///
/// Failures that occur before any byte has been delivered surface as one of
/// these variants; failures after delivery has started can only be logged and
/// terminate the session (the response headers are already on the wire).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request was rejected before any process was spawned.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A spawned program produced no output within its start window.
    #[error("{program} produced no output within {timeout:?}")]
    ProcessStartTimeout {
        /// Program that stayed silent.
        program: String,
        /// The start window that elapsed.
        timeout: Duration,
    },

    /// A spawned program exited with a non-zero status before producing the
    /// expected output.
    #[error("{program} failed ({status}): {stderr}")]
    ProcessExited {
        /// Program that failed.
        program: String,
        /// Its exit status.
        status: ExitStatus,
        /// Bounded excerpt of its stderr output.
        stderr: String,
    },

    /// The extractor returned no entries for the query.
    #[error("no results found for {0:?}")]
    NoResults(String),

    /// The extractor's output was not valid metadata.
    #[error("unreadable metadata: {0}")]
    MetadataParse(String),

    /// Spawn or stream I/O failure from an external tool.
    #[error("external tool failure: {0}")]
    Provider(#[from] io::Error),

    /// The overall request deadline elapsed.
    #[error("request deadline elapsed")]
    Timeout,

    /// Every transcoder slot is currently in use.
    #[error("transcoder is at capacity, try again later")]
    Busy,
}

impl Error {
    /// Whether this failure is the caller's fault rather than the service's.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NoResults(_))
    }
}
