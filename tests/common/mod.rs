//! Shared helpers: fake extractor/transcoder executables standing in for
//! `yt-dlp` and `ffmpeg`, and a config wired up to them.
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use audio_relay::config::Config;
use clap::Parser;
use tempfile::TempDir;

/// Canned metadata document the fake extractor prints.
pub const RICK_JSON: &str = r#"{"title": "Rick Astley - Never Gonna Give You Up (Official Video)", "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ", "duration": 212.0, "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg", "uploader": "Rick Astley", "extractor": "youtube"}"#;

/// Writes an executable shell script named `name` into `dir`.
pub fn fake_tool(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake tool");
    let mut perms = fs::metadata(&path).expect("stat fake tool").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod fake tool");
    path
}

/// Config pointing at the given fake executables, with test-friendly
/// timeouts. Tests tighten individual fields further as needed.
pub fn test_config(extractor: &Path, transcoder: &Path) -> Config {
    let mut config = Config::parse_from(["audio-relay"]);
    config.extractor_path = extractor.to_path_buf();
    config.transcoder_path = transcoder.to_path_buf();
    config.extractor_timeout_secs = 5;
    config.start_timeout_secs = 5;
    config.termination_grace_secs = 1;
    config
}
