use std::ffi::OsString;
use std::time::Duration;

use super::Command;
use crate::filter::FilterSpec;

/// Constant bitrate target for every transcode, for predictable bandwidth.
const BITRATE: &str = "128k";

/// Container/codec pair produced by the transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Opus in a WebM container. This is the extractor's native output, so
    /// selecting it never forces a transcode on its own.
    #[default]
    Webm,
    /// MP3 via libmp3lame.
    Mp3,
}

impl OutputFormat {
    /// Parses a format name. Returns `None` for anything unrecognized.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "webm" | "opus" => Some(Self::Webm),
            "mp3" => Some(Self::Mp3),
            _ => None,
        }
    }

    /// Whether this is the extractor's native output format.
    pub fn is_native(&self) -> bool {
        *self == Self::Webm
    }

    /// MIME type for HTTP responses.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Webm => "audio/webm",
            Self::Mp3 => "audio/mpeg",
        }
    }

    fn codec(&self) -> &'static str {
        match self {
            Self::Webm => "libopus",
            Self::Mp3 => "libmp3lame",
        }
    }

    fn container(&self) -> &'static str {
        match self {
            Self::Webm => "webm",
            Self::Mp3 => "mp3",
        }
    }
}

/// Helper to construct a valid `ffmpeg` command that reads audio from
/// `stdin`, applies an optional seek offset and filter graph, and writes the
/// re-encoded result to `stdout`.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    cmd_name: OsString,
    start_offset: Duration,
    filter: FilterSpec,
    format: OutputFormat,
}

impl FfmpegCommand {
    /// Constructs a new [`FfmpegCommand`] targeting the given format.
    pub fn new(format: OutputFormat) -> Self {
        Self {
            cmd_name: "ffmpeg".into(),
            start_offset: Duration::ZERO,
            filter: FilterSpec::None,
            format,
        }
    }

    /// Sets the path to the `ffmpeg` binary.
    #[must_use]
    pub fn ffmpeg_path<S>(mut self, path: S) -> Self
    where
        S: Into<OsString>,
    {
        self.cmd_name = path.into();
        self
    }

    /// Seek this far into the input before decoding.
    #[must_use]
    pub fn start_offset(mut self, offset: Duration) -> Self {
        self.start_offset = offset;
        self
    }

    /// Apply the given filter selection.
    #[must_use]
    pub fn filter(mut self, filter: FilterSpec) -> Self {
        self.filter = filter;
        self
    }

    /// Creates a [`Command`] from the given parameters.
    #[must_use]
    pub fn into_command(self) -> Command {
        let mut cmd = Command::new(&self.cmd_name).args(["-hide_banner", "-loglevel", "error"]);
        // The seek flag goes before the input for fast (demuxer-level) seek.
        if !self.start_offset.is_zero() {
            cmd = cmd.arg("-ss").arg(self.start_offset.as_secs().to_string());
        }
        cmd = cmd.args(["-i", "pipe:0", "-vn"]);
        if let Some(graph) = self.filter.filter_graph() {
            cmd = cmd.arg("-af").arg(graph);
        }
        cmd.args(["-c:a", self.format.codec()])
            .args(["-f", self.format.container()])
            .args(["-b:a", BITRATE, "pipe:1"])
    }
}

impl From<FfmpegCommand> for Command {
    fn from(value: FfmpegCommand) -> Self {
        value.into_command()
    }
}
