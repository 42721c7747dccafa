//! Track metadata resolution.
//!
//! Drives the extractor in metadata-only mode and normalizes its JSON output
//! into a [`TrackDescriptor`]. Results are cached (see [`crate::cache`]) so
//! repeated queries don't pay for another extractor invocation.

use std::process::Stdio;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::cache::MetadataCache;
use crate::config::Config;
use crate::process::{ManagedProcess, YtDlpCommand};
use crate::{Error, Result};

/// Canonical metadata for one resolved audio track.
///
/// Immutable value object: a new request produces a new descriptor, and cache
/// entries hold keyed copies rather than shared mutable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackDescriptor {
    /// Track title.
    pub title: String,
    /// Canonical page URL for the track.
    pub url: String,
    /// Duration in whole seconds. Zero for live or unknown-length content.
    pub duration_seconds: u64,
    /// Thumbnail image URL, when one exists.
    pub thumbnail_url: Option<String>,
    /// Uploader, channel, or artist name.
    pub author: String,
    /// Provider the track was resolved from.
    pub source: TrackSource,
}

/// Provider a track was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    /// YouTube and YouTube Music.
    Youtube,
    /// SoundCloud.
    Soundcloud,
    /// Any other extractor backend.
    Other,
}

impl TrackSource {
    fn from_extractor(name: &str) -> Self {
        let name = name.to_lowercase();
        if name.contains("youtube") {
            Self::Youtube
        } else if name.contains("soundcloud") {
            Self::Soundcloud
        } else {
            Self::Other
        }
    }
}

/// Resolves free-text queries into [`TrackDescriptor`]s.
#[derive(Debug, Clone)]
pub struct MetadataResolver {
    config: Arc<Config>,
    cache: Arc<MetadataCache>,
}

impl MetadataResolver {
    /// Creates a resolver backed by the given cache.
    pub fn new(config: Arc<Config>, cache: Arc<MetadataCache>) -> Self {
        Self { config, cache }
    }

    /// Cache key for a query: trimmed and lower-cased, so whitespace and case
    /// variants share one entry.
    pub fn cache_key(query: &str) -> String {
        query.trim().to_lowercase()
    }

    /// Resolves `query` to a track descriptor.
    ///
    /// Fails with [`Error::NoResults`] when the extractor finds nothing,
    /// [`Error::MetadataParse`] when its output is unusable, and bubbles
    /// process-level failures from the supervisor.
    pub async fn resolve(&self, query: &str) -> Result<TrackDescriptor> {
        let key = Self::cache_key(query);
        if let Some(hit) = self.cache.get(&key) {
            debug!(query = %key, "metadata cache hit");
            return Ok(hit);
        }

        let command = YtDlpCommand::new(query.trim())
            .yt_dlp_path(self.config.extractor_path.as_os_str())
            .socket_timeout(std::time::Duration::from_secs(self.config.socket_timeout_secs))
            .retries(self.config.extractor_retries)
            .into_metadata_command();
        let process = ManagedProcess::spawn(command, Stdio::null())?;
        let stdout = process.collect(self.config.extractor_timeout()).await?;

        let descriptor = parse_descriptor(&stdout, &key)?;
        self.cache.put(key, descriptor.clone());
        Ok(descriptor)
    }
}

fn parse_descriptor(raw: &[u8], query: &str) -> Result<TrackDescriptor> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::NoResults(query.to_owned()));
    }
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| Error::MetadataParse(e.to_string()))?;
    if !value.is_object() {
        return Err(Error::MetadataParse(
            "extractor output is not a JSON object".to_owned(),
        ));
    }

    // Search output nests results under `entries`; a direct URL resolve puts
    // the track at the top level.
    let entry = match value.get("entries").and_then(Value::as_array) {
        Some(entries) => entries
            .first()
            .ok_or_else(|| Error::NoResults(query.to_owned()))?,
        None => &value,
    };
    if !entry.is_object() {
        return Err(Error::MetadataParse("entry is not a JSON object".to_owned()));
    }

    let title = text_field(entry, "title")
        .ok_or_else(|| Error::MetadataParse("entry has no usable title".to_owned()))?;
    let url = ["webpage_url", "original_url", "url"]
        .into_iter()
        .find_map(|field| text_field(entry, field))
        .unwrap_or_default();
    let duration_seconds = entry
        .get("duration")
        .and_then(Value::as_f64)
        .map_or(0, |secs| secs.max(0.0).round() as u64);
    let thumbnail_url = text_field(entry, "thumbnail").or_else(|| last_thumbnail(entry));
    let author = ["uploader", "channel", "artist"]
        .into_iter()
        .find_map(|field| text_field(entry, field))
        .unwrap_or_else(|| "Unknown".to_owned());
    let source = ["extractor", "extractor_key"]
        .into_iter()
        .find_map(|field| text_field(entry, field))
        .map_or(TrackSource::Other, |name| {
            TrackSource::from_extractor(&name)
        });

    Ok(TrackDescriptor {
        title,
        url,
        duration_seconds,
        thumbnail_url,
        author,
        source,
    })
}

/// Non-empty string field. The literal strings `"undefined"` and `"null"`
/// are leftovers from a serializer bug upstream and are treated as absent.
fn text_field(entry: &Value, name: &str) -> Option<String> {
    let text = entry.get(name)?.as_str()?.trim();
    if text.is_empty() || text == "undefined" || text == "null" {
        return None;
    }
    Some(text.to_owned())
}

fn last_thumbnail(entry: &Value) -> Option<String> {
    entry
        .get("thumbnails")?
        .as_array()?
        .last()
        .and_then(|thumb| text_field(thumb, "url"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<TrackDescriptor> {
        parse_descriptor(json.as_bytes(), "test query")
    }

    #[test]
    fn top_level_object_is_used_when_there_are_no_entries() {
        let descriptor = parse(
            r#"{"title": "A Song", "webpage_url": "https://example.com/watch", "duration": 63.4,
                "uploader": "Somebody", "extractor": "youtube"}"#,
        )
        .expect("descriptor");
        assert_eq!(descriptor.title, "A Song");
        assert_eq!(descriptor.url, "https://example.com/watch");
        assert_eq!(descriptor.duration_seconds, 63);
        assert_eq!(descriptor.author, "Somebody");
        assert_eq!(descriptor.source, TrackSource::Youtube);
    }

    #[test]
    fn first_entry_wins() {
        let descriptor = parse(
            r#"{"entries": [{"title": "First"}, {"title": "Second"}], "title": "Outer"}"#,
        )
        .expect("descriptor");
        assert_eq!(descriptor.title, "First");
    }

    #[test]
    fn empty_entries_is_no_results() {
        assert!(matches!(
            parse(r#"{"entries": []}"#),
            Err(Error::NoResults(_))
        ));
    }

    #[test]
    fn blank_output_is_no_results() {
        assert!(matches!(parse("  \n"), Err(Error::NoResults(_))));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            parse("not json at all"),
            Err(Error::MetadataParse(_))
        ));
    }

    #[test]
    fn missing_title_is_a_parse_error() {
        assert!(matches!(
            parse(r#"{"duration": 10}"#),
            Err(Error::MetadataParse(_))
        ));
    }

    #[test]
    fn stringified_null_title_is_corruption() {
        assert!(matches!(
            parse(r#"{"title": "undefined"}"#),
            Err(Error::MetadataParse(_))
        ));
    }

    #[test]
    fn thumbnail_falls_back_to_last_list_entry() {
        let descriptor = parse(
            r#"{"title": "T", "thumbnails": [{"url": "small.jpg"}, {"url": "large.jpg"}]}"#,
        )
        .expect("descriptor");
        assert_eq!(descriptor.thumbnail_url.as_deref(), Some("large.jpg"));
    }

    #[test]
    fn author_defaults_to_unknown() {
        let descriptor = parse(r#"{"title": "T"}"#).expect("descriptor");
        assert_eq!(descriptor.author, "Unknown");
        assert_eq!(descriptor.source, TrackSource::Other);
    }
}
