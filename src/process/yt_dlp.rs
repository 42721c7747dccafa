use std::ffi::OsString;
use std::time::Duration;

use super::Command;

/// Helper to construct a valid `yt-dlp` command.
///
/// The query is always wrapped in single-result search syntax, so free text
/// resolves to the first matching track and a playlist URL is never expanded.
#[derive(Debug, Clone)]
pub struct YtDlpCommand {
    query: String,
    cmd_name: OsString,
    format: Option<String>,
    socket_timeout: Option<Duration>,
    retries: Option<u32>,
}

impl YtDlpCommand {
    /// Creates a new [`YtDlpCommand`] for the given search query.
    pub fn new<S>(query: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            query: query.into(),
            cmd_name: "yt-dlp".into(),
            format: None,
            socket_timeout: None,
            retries: None,
        }
    }

    /// Sets the path to the `yt-dlp` binary.
    #[must_use]
    pub fn yt_dlp_path<S>(mut self, path: S) -> Self
    where
        S: Into<OsString>,
    {
        self.cmd_name = path.into();
        self
    }

    /// Extract content using the provided format selector.
    /// An error will be thrown when running the command if the format is not
    /// available.
    #[must_use]
    pub fn format<S>(mut self, format: S) -> Self
    where
        S: Into<String>,
    {
        self.format = Some(format.into());
        self
    }

    /// Sets the network socket timeout.
    #[must_use]
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    /// Sets the download retry count.
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Creates a [`Command`] that streams the resolved audio to `stdout`.
    #[must_use]
    pub fn into_stream_command(self) -> Command {
        let mut cmd = self
            .base_command()
            .args(["--quiet", "--no-warnings", "-o", "-"]);
        if let Some(format) = &self.format {
            cmd = cmd.arg("-f").arg(format);
        }
        if let Some(timeout) = self.socket_timeout {
            cmd = cmd.arg("--socket-timeout").arg(timeout.as_secs().to_string());
        }
        if let Some(retries) = self.retries {
            cmd = cmd.arg("--retries").arg(retries.to_string());
        }
        cmd
    }

    /// Creates a [`Command`] that prints the resolved track's metadata as a
    /// single JSON document without downloading anything.
    #[must_use]
    pub fn into_metadata_command(self) -> Command {
        self.base_command().args([
            "--dump-single-json",
            "--skip-download",
            "--no-warnings",
            "--quiet",
        ])
    }

    fn base_command(&self) -> Command {
        Command::new(&self.cmd_name)
            .arg(format!("ytsearch1:{}", self.query))
            .arg("--no-playlist")
    }
}
