mod common;

use std::time::Duration;

use audio_relay::filter::FilterSpec;
use audio_relay::pipeline::{AudioPipeline, StreamRequest};
use audio_relay::process::{OutputFormat, ProcessState};
use audio_relay::Error;
use futures::StreamExt;

async fn collect(mut audio: audio_relay::pipeline::AudioStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = audio.next().await {
        out.extend_from_slice(&chunk.expect("chunk"));
    }
    out
}

#[tokio::test]
async fn passthrough_spawns_only_the_extractor() {
    let dir = tempfile::tempdir().expect("tempdir");
    let marker = dir.path().join("transcoder-ran");
    let extractor = common::fake_tool(&dir, "yt-dlp", "printf 'raw-audio-bytes'");
    let transcoder = common::fake_tool(&dir, "ffmpeg", &format!("touch {}\ncat", marker.display()));
    let pipeline = AudioPipeline::new(common::test_config(&extractor, &transcoder));

    let audio = pipeline
        .stream(StreamRequest::new("some track"))
        .await
        .expect("stream");
    assert_eq!(audio.session().process_count(), 1);
    assert_eq!(audio.content_type(), "audio/webm");

    let body = collect(audio).await;
    assert_eq!(body, b"raw-audio-bytes");
    assert!(!marker.exists(), "transcoder was spawned on the fast path");
}

#[tokio::test]
async fn filtered_request_routes_through_the_transcoder() {
    let dir = tempfile::tempdir().expect("tempdir");
    let extractor = common::fake_tool(&dir, "yt-dlp", "printf 'abc'");
    let transcoder = common::fake_tool(&dir, "ffmpeg", "tr a-z A-Z");
    let pipeline = AudioPipeline::new(common::test_config(&extractor, &transcoder));

    let audio = pipeline
        .stream(StreamRequest::new("some track").filter(FilterSpec::parse("nightcore")))
        .await
        .expect("stream");
    assert_eq!(audio.session().process_count(), 2);

    let body = collect(audio).await;
    assert_eq!(body, b"ABC");
}

#[tokio::test]
async fn mp3_output_forces_a_transcode() {
    let dir = tempfile::tempdir().expect("tempdir");
    let extractor = common::fake_tool(&dir, "yt-dlp", "printf 'abc'");
    let transcoder = common::fake_tool(&dir, "ffmpeg", "cat");
    let pipeline = AudioPipeline::new(common::test_config(&extractor, &transcoder));

    let audio = pipeline
        .stream(StreamRequest::new("some track").format(OutputFormat::Mp3))
        .await
        .expect("stream");
    assert_eq!(audio.session().process_count(), 2);
    assert_eq!(audio.content_type(), "audio/mpeg");
}

#[tokio::test]
async fn teardown_runs_exactly_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let extractor = common::fake_tool(&dir, "yt-dlp", "while true; do echo audio; done");
    let transcoder = common::fake_tool(&dir, "ffmpeg", "cat");
    let pipeline = AudioPipeline::new(common::test_config(&extractor, &transcoder));

    let mut audio = pipeline
        .stream(StreamRequest::new("endless"))
        .await
        .expect("stream");
    let session = audio.session();
    audio.next().await.expect("first chunk").expect("bytes");

    // Sink close followed by an upstream trigger: only the first performs
    // the teardown, and each process is killed once.
    assert!(session.teardown());
    assert!(!session.teardown());
    for handle in session.handles() {
        assert_eq!(handle.state(), ProcessState::Killed);
    }

    // Dropping the stream afterwards is the third trigger; still a no-op.
    drop(audio);
    assert!(session.is_torn_down());
}

#[tokio::test]
async fn dropping_the_sink_tears_the_session_down() {
    let dir = tempfile::tempdir().expect("tempdir");
    let extractor = common::fake_tool(&dir, "yt-dlp", "while true; do echo audio; done");
    let transcoder = common::fake_tool(&dir, "ffmpeg", "cat");
    let pipeline = AudioPipeline::new(common::test_config(&extractor, &transcoder));

    let mut audio = pipeline
        .stream(StreamRequest::new("endless"))
        .await
        .expect("stream");
    let session = audio.session();
    audio.next().await.expect("first chunk").expect("bytes");

    drop(audio);
    assert!(session.is_torn_down());
    for handle in session.handles() {
        assert_eq!(handle.state(), ProcessState::Killed);
    }
}

#[tokio::test]
async fn silent_extractor_hits_the_start_timeout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let extractor = common::fake_tool(&dir, "yt-dlp", "exec sleep 30");
    let transcoder = common::fake_tool(&dir, "ffmpeg", "cat");
    let mut config = common::test_config(&extractor, &transcoder);
    config.start_timeout_secs = 1;
    let pipeline = AudioPipeline::new(config);

    match pipeline.stream(StreamRequest::new("quiet")).await {
        Err(Error::ProcessStartTimeout { .. }) => {}
        other => panic!("expected ProcessStartTimeout, got {other:?}"),
    }
}

#[tokio::test]
async fn extractor_that_dies_before_output_surfaces_its_exit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let extractor = common::fake_tool(&dir, "yt-dlp", "echo kaput >&2\nexit 2");
    let transcoder = common::fake_tool(&dir, "ffmpeg", "cat");
    let pipeline = AudioPipeline::new(common::test_config(&extractor, &transcoder));

    match pipeline.stream(StreamRequest::new("dead")).await {
        Err(Error::ProcessExited { status, stderr, .. }) => {
            assert_eq!(status.code(), Some(2));
            assert!(stderr.contains("kaput"));
        }
        other => panic!("expected ProcessExited, got {other:?}"),
    }
}

#[tokio::test]
async fn fully_stripped_query_never_spawns() {
    let dir = tempfile::tempdir().expect("tempdir");
    let marker = dir.path().join("extractor-ran");
    let extractor = common::fake_tool(
        &dir,
        "yt-dlp",
        &format!("touch {}\nprintf x", marker.display()),
    );
    let transcoder = common::fake_tool(&dir, "ffmpeg", "cat");
    let pipeline = AudioPipeline::new(common::test_config(&extractor, &transcoder));

    assert!(matches!(
        pipeline.stream(StreamRequest::new("; | & `")).await,
        Err(Error::Validation(_))
    ));
    assert!(!marker.exists(), "process was spawned for an invalid query");
}

#[tokio::test]
async fn transcode_slots_are_bounded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let extractor = common::fake_tool(&dir, "yt-dlp", "while true; do echo audio; done");
    let transcoder = common::fake_tool(&dir, "ffmpeg", "cat");
    let mut config = common::test_config(&extractor, &transcoder);
    config.max_transcodes = 1;
    let pipeline = AudioPipeline::new(config);

    let held = pipeline
        .stream(StreamRequest::new("first").filter(FilterSpec::parse("bassboost")))
        .await
        .expect("first stream");

    match pipeline
        .stream(StreamRequest::new("second").filter(FilterSpec::parse("bassboost")))
        .await
    {
        Err(Error::Busy) => {}
        other => panic!("expected Busy, got {other:?}"),
    }

    // Tearing the first session down frees its slot.
    held.session().teardown();
    drop(held);
    let again = pipeline
        .stream(StreamRequest::new("third").filter(FilterSpec::parse("bassboost")))
        .await;
    assert!(again.is_ok(), "slot was not released: {again:?}");
}

#[tokio::test]
async fn start_offset_is_passed_to_the_transcoder() {
    let dir = tempfile::tempdir().expect("tempdir");
    let args_file = dir.path().join("ffmpeg-args");
    let extractor = common::fake_tool(&dir, "yt-dlp", "printf 'abc'");
    let transcoder = common::fake_tool(
        &dir,
        "ffmpeg",
        &format!("echo \"$@\" > {}\ncat", args_file.display()),
    );
    let pipeline = AudioPipeline::new(common::test_config(&extractor, &transcoder));

    let audio = pipeline
        .stream(StreamRequest::new("track").start_offset(Duration::from_secs(42)))
        .await
        .expect("stream");
    collect(audio).await;

    let args = std::fs::read_to_string(&args_file).expect("args file");
    assert!(args.contains("-ss 42"), "seek flag missing: {args}");
    assert!(
        !args.contains("-af"),
        "no filter was requested but -af was passed: {args}"
    );
}
