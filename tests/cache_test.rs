use std::thread::sleep;
use std::time::Duration;

use audio_relay::cache::MetadataCache;
use audio_relay::metadata::{TrackDescriptor, TrackSource};

fn descriptor(title: &str) -> TrackDescriptor {
    TrackDescriptor {
        title: title.to_owned(),
        url: format!("https://example.com/{title}"),
        duration_seconds: 180,
        thumbnail_url: None,
        author: "Unknown".to_owned(),
        source: TrackSource::Other,
    }
}

#[test]
fn put_then_get_returns_the_value_unchanged() {
    let cache = MetadataCache::new(Duration::from_secs(60), 10);
    let track = descriptor("a song");
    cache.put("a song".to_owned(), track.clone());
    assert_eq!(cache.get("a song"), Some(track));
    assert_eq!(cache.len(), 1);
}

#[test]
fn unknown_keys_miss() {
    let cache = MetadataCache::new(Duration::from_secs(60), 10);
    assert_eq!(cache.get("nothing here"), None);
}

#[test]
fn expired_entries_are_removed_on_read() {
    let cache = MetadataCache::new(Duration::from_millis(20), 10);
    cache.put("k".to_owned(), descriptor("k"));
    sleep(Duration::from_millis(40));
    assert_eq!(cache.get("k"), None);
    assert_eq!(cache.len(), 0);
}

#[test]
fn sweep_reports_how_many_entries_it_dropped() {
    let cache = MetadataCache::new(Duration::from_millis(20), 10);
    for i in 0..3 {
        cache.put(format!("k{i}"), descriptor("x"));
    }
    assert_eq!(cache.evict_expired(), 0);
    sleep(Duration::from_millis(40));
    assert_eq!(cache.evict_expired(), 3);
    assert!(cache.is_empty());
}

#[test]
fn inserting_past_capacity_evicts_the_least_recently_used_key() {
    let cache = MetadataCache::new(Duration::from_secs(60), 3);
    for key in ["a", "b", "c"] {
        cache.put(key.to_owned(), descriptor(key));
        sleep(Duration::from_millis(5));
    }
    // Touch "a" so "b" becomes the least recently used entry.
    assert!(cache.get("a").is_some());
    sleep(Duration::from_millis(5));

    cache.put("d".to_owned(), descriptor("d"));
    assert_eq!(cache.len(), 3);
    assert_eq!(cache.get("b"), None);
    assert!(cache.get("a").is_some());
    assert!(cache.get("c").is_some());
    assert!(cache.get("d").is_some());
}

#[test]
fn rewriting_an_existing_key_does_not_evict() {
    let cache = MetadataCache::new(Duration::from_secs(60), 2);
    cache.put("a".to_owned(), descriptor("a"));
    cache.put("b".to_owned(), descriptor("b"));
    cache.put("a".to_owned(), descriptor("a2"));
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get("a").map(|t| t.title), Some("a2".to_owned()));
    assert!(cache.get("b").is_some());
}

#[test]
fn hits_are_counted() {
    let cache = MetadataCache::new(Duration::from_secs(60), 10);
    cache.put("k".to_owned(), descriptor("k"));
    assert_eq!(cache.hit_count("k"), Some(0));
    cache.get("k");
    cache.get("k");
    assert_eq!(cache.hit_count("k"), Some(2));
}
