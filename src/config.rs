//! Runtime configuration.
//!
//! Every option can be supplied as a CLI flag or through the environment.
//! None of these change the pipeline's contracts, only its tuning.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Configuration for the relay service.
#[derive(Debug, Clone, Parser)]
#[command(name = "audio-relay", version, about)]
pub struct Config {
    /// Address the HTTP listener binds to.
    #[arg(long, env = "RELAY_BIND", default_value = "127.0.0.1:4001")]
    pub bind: SocketAddr,

    /// Path to the extractor executable.
    #[arg(long, env = "RELAY_YTDLP_PATH", default_value = "yt-dlp")]
    pub extractor_path: PathBuf,

    /// Path to the transcoder executable.
    #[arg(long, env = "RELAY_FFMPEG_PATH", default_value = "ffmpeg")]
    pub transcoder_path: PathBuf,

    /// Format selector passed to the extractor when streaming.
    #[arg(
        long,
        env = "RELAY_FORMAT_SELECTOR",
        default_value = "bestaudio[ext=webm]/bestaudio/best"
    )]
    pub format_selector: String,

    /// Socket timeout, in seconds, forwarded to the extractor.
    #[arg(long, env = "RELAY_SOCKET_TIMEOUT_SECS", default_value_t = 10)]
    pub socket_timeout_secs: u64,

    /// Download retry count forwarded to the extractor.
    #[arg(long, env = "RELAY_EXTRACTOR_RETRIES", default_value_t = 3)]
    pub extractor_retries: u32,

    /// Seconds a metadata call may take before it is abandoned.
    #[arg(long, env = "RELAY_EXTRACTOR_TIMEOUT_SECS", default_value_t = 30)]
    pub extractor_timeout_secs: u64,

    /// Seconds to wait for the first byte from a streaming process.
    #[arg(long, env = "RELAY_START_TIMEOUT_SECS", default_value_t = 15)]
    pub start_timeout_secs: u64,

    /// Seconds a streaming session may stay open.
    #[arg(long, env = "RELAY_SESSION_TIMEOUT_SECS", default_value_t = 3600)]
    pub session_timeout_secs: u64,

    /// Seconds between asking a process to exit and forcing it to.
    #[arg(long, env = "RELAY_TERMINATION_GRACE_SECS", default_value_t = 5)]
    pub termination_grace_secs: u64,

    /// Seconds a cached track descriptor stays valid.
    #[arg(long, env = "RELAY_CACHE_TTL_SECS", default_value_t = 600)]
    pub cache_ttl_secs: u64,

    /// Maximum number of cached track descriptors.
    #[arg(long, env = "RELAY_CACHE_CAPACITY", default_value_t = 1000)]
    pub cache_capacity: usize,

    /// Seconds between periodic sweeps of expired cache entries.
    #[arg(long, env = "RELAY_CACHE_SWEEP_SECS", default_value_t = 60)]
    pub cache_sweep_secs: u64,

    /// Maximum number of transcoder processes running at once.
    #[arg(long, env = "RELAY_MAX_TRANSCODES", default_value_t = 8)]
    pub max_transcodes: usize,
}

impl Config {
    /// Deadline for a metadata extractor call.
    pub fn extractor_timeout(&self) -> Duration {
        Duration::from_secs(self.extractor_timeout_secs)
    }

    /// Window in which a streaming process must produce its first byte.
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    /// Maximum lifetime of one streaming session.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Grace window between graceful and forced process termination.
    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_secs)
    }

    /// Time-to-live for cached descriptors.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Interval between cache sweeps.
    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_from(["audio-relay"])
    }
}
