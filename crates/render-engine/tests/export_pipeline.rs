use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use montage_common::error::{MontageError, MontageResult};
use montage_project_model::clip::{BlurRegion, BlurShape, Clip, MediaSource};
use montage_project_model::settings::{ExportFormat, ExportSettings};
use montage_render_engine::backend::BackendKind;
use montage_render_engine::decoder::{ClipDecoder, DecoderOpener, SeekPolicy};
use montage_render_engine::engine::FfmpegEngine;
use montage_render_engine::frames::{preload_decoders, render_frames, FrameSink};
use montage_render_engine::progress::{ExportProgress, ProgressBand, ProgressTracker};
use montage_render_engine::workspace::Workspace;
use montage_render_engine::{ExportJob, Exporter};

/// Synthetic decoder whose frame color encodes the seeked source time.
struct FakeDecoder {
    width: u32,
    height: u32,
    short_landings: u32,
    seeks: u32,
    frame: Option<RgbaImage>,
    position: Option<f64>,
}

#[async_trait]
impl ClipDecoder for FakeDecoder {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    async fn seek(&mut self, time_secs: f64) -> MontageResult<()> {
        self.seeks += 1;
        let landed = if self.seeks <= self.short_landings {
            (time_secs - 0.5).max(0.0)
        } else {
            time_secs
        };
        let shade = ((landed * 40.0) as u32 % 256) as u8;
        self.frame = Some(RgbaImage::from_fn(self.width, self.height, |x, _| {
            Rgba([shade, (x % 256) as u8, 255 - shade, 255])
        }));
        self.position = Some(landed);
        Ok(())
    }

    fn position_secs(&self) -> Option<f64> {
        self.position
    }

    fn current_frame(&self) -> Option<&RgbaImage> {
        self.frame.as_ref()
    }
}

#[derive(Default)]
struct FakeOpener {
    width: u32,
    height: u32,
    failing_clip: Option<String>,
    short_landings: u32,
    opened: Mutex<Vec<PathBuf>>,
}

impl FakeOpener {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }
}

#[async_trait]
impl DecoderOpener for FakeOpener {
    async fn open(&self, clip: &Clip, source: &Path) -> MontageResult<Box<dyn ClipDecoder>> {
        if self.failing_clip.as_deref() == Some(clip.id.as_str()) {
            return Err(MontageError::decode(format!("{} is corrupt", clip.id)));
        }
        self.opened.lock().unwrap().push(source.to_path_buf());
        Ok(Box::new(FakeDecoder {
            width: self.width,
            height: self.height,
            short_landings: self.short_landings,
            seeks: 0,
            frame: None,
            position: None,
        }))
    }
}

/// Forwards to a shared opener so tests can inspect it after the export.
struct SharedOpener(Arc<FakeOpener>);

#[async_trait]
impl DecoderOpener for SharedOpener {
    async fn open(&self, clip: &Clip, source: &Path) -> MontageResult<Box<dyn ClipDecoder>> {
        self.0.open(clip, source).await
    }
}

#[derive(Default)]
struct CollectingSink {
    frames: Vec<(u64, RgbaImage)>,
}

impl FrameSink for CollectingSink {
    fn accept(&mut self, index: u64, frame: RgbaImage) -> MontageResult<()> {
        self.frames.push((index, frame));
        Ok(())
    }
}

fn source_file(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"synthetic").expect("source fixture should be writable");
    path
}

fn settings(format: ExportFormat) -> ExportSettings {
    ExportSettings {
        width: 320,
        height: 240,
        fps: 10,
        format,
        quality: 20,
    }
}

fn fast_seeks() -> SeekPolicy {
    SeekPolicy {
        max_attempts: 3,
        backoff: Duration::ZERO,
        tolerance_secs: 0.001,
    }
}

fn recorder() -> (
    montage_render_engine::ProgressCallback,
    Arc<Mutex<Vec<ExportProgress>>>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (
        Box::new(move |p| sink.lock().unwrap().push(p)),
        seen,
    )
}

fn gif_frame_count(bytes: &[u8]) -> usize {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::RGBA);
    let mut decoder = options.read_info(bytes).expect("artifact should be a gif");
    let mut count = 0;
    while decoder
        .read_next_frame()
        .expect("gif frame should decode")
        .is_some()
    {
        count += 1;
    }
    count
}

fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}

#[tokio::test]
async fn single_clip_gif_has_one_frame_per_tick() {
    let media = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let clip = Clip::from_file("intro", source_file(media.path(), "intro.mp4"), 4.0);

    let exporter = Exporter::new()
        .with_decoder_opener(FakeOpener::new(160, 90))
        .with_seek_policy(fast_seeks())
        .with_work_root(work.path());
    let (callback, seen) = recorder();
    let artifact = exporter
        .export(vec![clip], settings(ExportFormat::Gif), Some(callback))
        .await
        .expect("gif export should succeed");

    assert_eq!(artifact.mime_type(), "image/gif");
    assert_eq!(gif_frame_count(&artifact.bytes), 40);

    let seen = seen.lock().unwrap();
    assert!(seen.windows(2).all(|w| w[0].percent <= w[1].percent));
    assert_eq!(seen.iter().filter(|p| p.percent == 100).count(), 1);
    let last = seen.last().unwrap();
    assert_eq!(last.percent, 100);
    assert_eq!(last.frames_rendered, 40);
    assert_eq!(last.total_frames, 40);

    assert!(dir_is_empty(work.path()), "job workspace should be removed");
}

#[test]
fn two_clip_sequence_switches_clip_at_boundary() {
    let media = tempfile::tempdir().unwrap();
    let mut second = Clip::from_file("b", source_file(media.path(), "b.mp4"), 3.0);
    second.sequence_start_secs = 2.0;
    let first = Clip::from_file("a", source_file(media.path(), "a.mp4"), 2.0);

    // Given out of order; the job orders by sequence position.
    let job = ExportJob::new(vec![second, first], settings(ExportFormat::Gif)).unwrap();
    assert_eq!(job.total_frames(), 50);

    let frame_19 = job.timeline().resolve(19).unwrap();
    assert_eq!(job.clips()[frame_19.clip_index].id, "a");
    assert!((frame_19.local_time_secs - 1.9).abs() < 1e-9);

    let frame_20 = job.timeline().resolve(20).unwrap();
    assert_eq!(job.clips()[frame_20.clip_index].id, "b");
    assert_eq!(frame_20.local_time_secs, 0.0);
}

#[tokio::test]
async fn regional_blur_video_selects_fallback_and_needs_engine() {
    let media = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let mut clip = Clip::from_file("a", source_file(media.path(), "a.mp4"), 2.0);
    clip.effects
        .regional_blurs
        .push(BlurRegion::full_frame(BlurShape::Circle, 20.0));

    let job = ExportJob::new(vec![clip.clone()], settings(ExportFormat::Mp4)).unwrap();
    assert_eq!(job.backend_kind(), BackendKind::FrameSequence);

    let exporter = Exporter::new()
        .with_engine(FfmpegEngine::new("/nonexistent/montage/ffmpeg"))
        .with_decoder_opener(FakeOpener::new(64, 64))
        .with_work_root(work.path());
    let (callback, seen) = recorder();
    let err = exporter
        .export(vec![clip], settings(ExportFormat::Mp4), Some(callback))
        .await
        .unwrap_err();

    assert!(matches!(err, MontageError::Unsupported { .. }));
    assert!(seen.lock().unwrap().iter().all(|p| p.percent < 100));
    assert!(dir_is_empty(work.path()), "no workspace before the engine check");
}

#[tokio::test]
async fn identical_jobs_render_identical_frames() {
    let media = tempfile::tempdir().unwrap();
    let mut clip = Clip::from_file("a", source_file(media.path(), "a.mp4"), 1.5);
    clip.effects.speed = 1.5;
    clip.effects.regional_blurs.push(BlurRegion {
        x: 10.0,
        y: 20.0,
        width: 40.0,
        height: 30.0,
        shape: BlurShape::Circle,
        intensity: 3.0,
    });
    let job = ExportJob::new(vec![clip], settings(ExportFormat::Gif)).unwrap();

    let mut runs = Vec::new();
    for _ in 0..2 {
        let workspace = Workspace::create(None).unwrap();
        let opener = FakeOpener::new(120, 80);
        let tracker = ProgressTracker::new(None);
        let mut decoders = preload_decoders(
            &job,
            &workspace,
            &opener,
            &tracker,
            ProgressBand::new(0.0, 5.0),
        )
        .await
        .unwrap();
        let mut sink = CollectingSink::default();
        let stats = render_frames(
            &job,
            &mut decoders,
            &fast_seeks(),
            &mut sink,
            &tracker,
            ProgressBand::new(5.0, 80.0),
        )
        .await
        .unwrap();
        assert_eq!(stats.frames_rendered, job.total_frames());
        runs.push(sink.frames);
    }

    assert_eq!(runs[0].len(), 10);
    let indices: Vec<u64> = runs[0].iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, (0..10).collect::<Vec<_>>());
    assert!(runs[0] == runs[1], "frame sequences should be pixel-identical");
}

#[tokio::test]
async fn decode_failure_is_fatal_and_cleans_up() {
    let media = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let clips = vec![
        Clip::from_file("good", source_file(media.path(), "good.mp4"), 1.0),
        Clip::from_file("bad", source_file(media.path(), "bad.mp4"), 1.0),
    ];

    let opener = FakeOpener {
        failing_clip: Some("bad".to_string()),
        ..FakeOpener::new(64, 48)
    };
    let exporter = Exporter::new()
        .with_decoder_opener(opener)
        .with_work_root(work.path());
    let (callback, seen) = recorder();
    let err = exporter
        .export(clips, settings(ExportFormat::Gif), Some(callback))
        .await
        .unwrap_err();

    assert!(matches!(err, MontageError::Decode { .. }));
    assert!(err.to_string().contains("bad"));
    assert!(seen.lock().unwrap().iter().all(|p| p.percent < 100));
    assert!(dir_is_empty(work.path()));
}

#[tokio::test]
async fn decoder_without_frame_size_is_fatal() {
    let media = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let clip = Clip::from_file("a", source_file(media.path(), "a.mp4"), 1.0);

    let exporter = Exporter::new()
        .with_decoder_opener(FakeOpener::new(0, 0))
        .with_work_root(work.path());
    let err = exporter
        .export(vec![clip], settings(ExportFormat::Gif), None)
        .await
        .unwrap_err();

    assert!(matches!(err, MontageError::Decode { .. }));
    assert!(dir_is_empty(work.path()));
}

#[tokio::test]
async fn malformed_request_allocates_nothing() {
    let root = tempfile::tempdir().unwrap();
    let work = root.path().join("never-created");
    let exporter = Exporter::new()
        .with_decoder_opener(FakeOpener::new(64, 48))
        .with_work_root(&work);

    let err = exporter
        .export(vec![], settings(ExportFormat::Gif), None)
        .await
        .unwrap_err();
    assert!(err.is_precondition());

    let zero_speed = {
        let mut clip = Clip::from_file("a", "a.mp4", 1.0);
        clip.effects.speed = 0.0;
        clip
    };
    let err = exporter
        .export(vec![zero_speed], settings(ExportFormat::Gif), None)
        .await
        .unwrap_err();
    assert!(err.is_precondition());

    let oversized_gif = ExportSettings {
        width: 70_000,
        height: 10,
        ..settings(ExportFormat::Gif)
    };
    let err = exporter
        .export(vec![Clip::from_file("a", "a.mp4", 1.0)], oversized_gif, None)
        .await
        .unwrap_err();
    assert!(err.is_precondition());
    assert!(err.to_string().contains("70000x10"));

    assert!(!work.exists());
}

#[tokio::test]
async fn flaky_seeks_degrade_to_best_effort() {
    let media = tempfile::tempdir().unwrap();
    let clip = Clip::from_file("a", source_file(media.path(), "a.mp4"), 1.0);
    let opener = FakeOpener {
        short_landings: u32::MAX,
        ..FakeOpener::new(64, 48)
    };

    let exporter = Exporter::new()
        .with_decoder_opener(opener)
        .with_seek_policy(fast_seeks());
    let artifact = exporter
        .export(vec![clip], settings(ExportFormat::Gif), None)
        .await
        .expect("seek flakiness should not fail the export");
    assert_eq!(gif_frame_count(&artifact.bytes), 10);
}

#[tokio::test]
async fn memory_sources_are_materialized_inside_the_workspace() {
    let work = tempfile::tempdir().unwrap();
    let clip = Clip {
        source: MediaSource::Memory {
            bytes: b"synthetic".to_vec(),
        },
        ..Clip::from_file("mem", "unused", 0.5)
    };

    let opener = Arc::new(FakeOpener::new(64, 48));
    let exporter = Exporter::new()
        .with_decoder_opener(SharedOpener(opener.clone()))
        .with_work_root(work.path());
    exporter
        .export(vec![clip], settings(ExportFormat::Gif), None)
        .await
        .expect("memory-backed export should succeed");

    let opened = opener.opened.lock().unwrap();
    assert_eq!(opened.len(), 1);
    assert!(opened[0].starts_with(work.path()));
    assert!(!opened[0].exists(), "materialized source should be cleaned up");
}

/// Shell stand-in for ffmpeg. Answers `-version`, otherwise runs `body` with
/// `$out` set to the last argument (the output path).
#[cfg(unix)]
fn fake_ffmpeg(dir: &Path, body: &str) -> FfmpegEngine {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("ffmpeg");
    let script = format!(
        "#!/bin/sh\n\
         if [ \"$1\" = \"-version\" ]; then exit 0; fi\n\
         for arg in \"$@\"; do out=\"$arg\"; done\n\
         {body}\n"
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    // A freshly written script can briefly be busy while another test forks.
    let engine = FfmpegEngine::new(&path);
    for _ in 0..50 {
        if engine.is_available() {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    engine
}

/// Records how many stills exist at encode time, reports progress and writes
/// a small artifact.
#[cfg(unix)]
fn succeeding_ffmpeg(dir: &Path) -> (FfmpegEngine, PathBuf) {
    let stills_log = dir.join("stills-at-encode");
    let body = format!(
        "ls \"$(dirname \"$out\")\" | grep -c '^frame_' > '{}'\n\
         echo out_time_us=1000000\n\
         echo progress=continue\n\
         echo progress=end\n\
         printf fake-video > \"$out\"",
        stills_log.display()
    );
    (fake_ffmpeg(dir, &body), stills_log)
}

#[cfg(unix)]
fn failing_ffmpeg(dir: &Path) -> FfmpegEngine {
    fake_ffmpeg(dir, "echo 'boom: invalid filter' >&2\nexit 3")
}

#[cfg(unix)]
fn assert_completed_once(seen: &[ExportProgress]) {
    assert!(seen.windows(2).all(|w| w[0].percent <= w[1].percent));
    assert_eq!(seen.iter().filter(|p| p.percent == 100).count(), 1);
    assert_eq!(seen.last().map(|p| p.percent), Some(100));
}

#[cfg(unix)]
#[tokio::test]
async fn fallback_video_encodes_stills_then_removes_them() {
    let media = tempfile::tempdir().unwrap();
    let bin = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let mut clip = Clip::from_file("a", source_file(media.path(), "a.mp4"), 2.0);
    clip.effects
        .regional_blurs
        .push(BlurRegion::full_frame(BlurShape::Circle, 20.0));

    let (engine, stills_log) = succeeding_ffmpeg(bin.path());
    let exporter = Exporter::new()
        .with_engine(engine)
        .with_decoder_opener(FakeOpener::new(64, 48))
        .with_seek_policy(fast_seeks())
        .with_work_root(work.path());
    let (callback, seen) = recorder();
    let artifact = exporter
        .export(vec![clip], settings(ExportFormat::Mp4), Some(callback))
        .await
        .expect("fallback export should succeed");

    assert_eq!(artifact.mime_type(), "video/mp4");
    assert_eq!(artifact.bytes, b"fake-video");
    let stills = std::fs::read_to_string(&stills_log).unwrap();
    assert_eq!(stills.trim(), "20");
    assert_completed_once(&seen.lock().unwrap());
    assert!(dir_is_empty(work.path()), "stills and workspace should be removed");
}

#[cfg(unix)]
#[tokio::test]
async fn fallback_engine_failure_attaches_diagnostics_and_removes_stills() {
    let media = tempfile::tempdir().unwrap();
    let bin = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let mut clip = Clip::from_file("a", source_file(media.path(), "a.mp4"), 1.0);
    clip.effects
        .regional_blurs
        .push(BlurRegion::full_frame(BlurShape::Rectangle, 4.0));

    let exporter = Exporter::new()
        .with_engine(failing_ffmpeg(bin.path()))
        .with_decoder_opener(FakeOpener::new(64, 48))
        .with_seek_policy(fast_seeks())
        .with_work_root(work.path());
    let (callback, seen) = recorder();
    let err = exporter
        .export(vec![clip], settings(ExportFormat::Webm), Some(callback))
        .await
        .unwrap_err();

    match &err {
        MontageError::Engine { diagnostics, .. } => {
            assert!(diagnostics.as_deref().unwrap_or("").contains("boom"));
        }
        other => panic!("expected an engine error, got {other:?}"),
    }
    assert!(seen.lock().unwrap().iter().all(|p| p.percent < 100));
    assert!(dir_is_empty(work.path()));
}

#[cfg(unix)]
#[tokio::test]
async fn filter_graph_video_completes_without_decoding() {
    let media = tempfile::tempdir().unwrap();
    let bin = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let mut clip = Clip::from_file("a", source_file(media.path(), "a.mp4"), 2.0);
    clip.effects.uniform_blur = 3.0;

    let opener = Arc::new(FakeOpener::new(64, 48));
    let (engine, stills_log) = succeeding_ffmpeg(bin.path());
    let exporter = Exporter::new()
        .with_engine(engine)
        .with_decoder_opener(SharedOpener(opener.clone()))
        .with_work_root(work.path());
    let (callback, seen) = recorder();
    let artifact = exporter
        .export(vec![clip], settings(ExportFormat::Webm), Some(callback))
        .await
        .expect("filter-graph export should succeed");

    assert_eq!(artifact.mime_type(), "video/webm");
    assert_eq!(artifact.bytes, b"fake-video");
    assert!(opener.opened.lock().unwrap().is_empty());
    assert_eq!(std::fs::read_to_string(&stills_log).unwrap().trim(), "0");
    assert_completed_once(&seen.lock().unwrap());
    assert!(dir_is_empty(work.path()));
}

#[cfg(unix)]
#[tokio::test]
async fn filter_graph_engine_failure_returns_no_artifact() {
    let media = tempfile::tempdir().unwrap();
    let bin = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let clip = Clip::from_file("a", source_file(media.path(), "a.mp4"), 2.0);

    let exporter = Exporter::new()
        .with_engine(failing_ffmpeg(bin.path()))
        .with_work_root(work.path());
    let (callback, seen) = recorder();
    let err = exporter
        .export(vec![clip], settings(ExportFormat::Mp4), Some(callback))
        .await
        .unwrap_err();

    assert!(matches!(err, MontageError::Engine { .. }));
    assert!(err.to_string().contains("boom"));
    assert!(seen.lock().unwrap().iter().all(|p| p.percent < 100));
    assert!(dir_is_empty(work.path()));
}
