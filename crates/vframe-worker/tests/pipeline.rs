//! Whole-video runs of the processor against synthetic clips and the
//! simulated transcode backend.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use vframe_media::scene::MANIFEST_FILE;
use vframe_media::testing::{SimBackend, SimConfig, SimFailure, SimResourceKind, SyntheticLibrary, SyntheticVideo};
use vframe_media::FrameSampler;
use vframe_models::{CropRect, ErrorKind, FrameRecord, HardwareMode, SamplingStrategy, Stage, StageOutcome, VideoJob};
use vframe_worker::{ProcessorOptions, VideoProcessor};

const SOURCE: &str = "/in/talk.mp4";

struct Fixture {
    dir: TempDir,
    library: Arc<SyntheticLibrary>,
    backend: SimBackend,
}

impl Fixture {
    fn new(video: SyntheticVideo) -> Self {
        Self::with_config(video, SimConfig::default())
    }

    fn with_config(video: SyntheticVideo, config: SimConfig) -> Self {
        let library = Arc::new(SyntheticLibrary::new());
        library.insert(SOURCE, video);
        let backend = SimBackend::new(config).with_library(library.clone());
        Self {
            dir: TempDir::new().unwrap(),
            library,
            backend,
        }
    }

    fn options(&self) -> ProcessorOptions {
        ProcessorOptions {
            work_dir: self.dir.path().join("work"),
            ..Default::default()
        }
    }

    fn processor(&self, options: ProcessorOptions) -> VideoProcessor<SimBackend> {
        VideoProcessor::new(self.backend.clone(), self.library.clone(), options)
    }

    fn frames_dir(&self) -> PathBuf {
        self.dir.path().join("frames").join("talk")
    }

    fn job(&self) -> VideoJob {
        VideoJob::new(SOURCE, self.frames_dir())
    }
}

fn bordered_talk() -> SyntheticVideo {
    SyntheticVideo::new(640, 360, 10.0).with_border(20)
}

fn outcome(result: &vframe_models::ProcessingResult, stage: Stage) -> &StageOutcome {
    &result
        .stage(stage)
        .unwrap_or_else(|| panic!("no {} report", stage))
        .outcome
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_bordered_static_clip_end_to_end() {
    let fixture = Fixture::new(bordered_talk());
    let processor = fixture.processor(fixture.options());

    let result = processor.process(&fixture.job());

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.crop_rect_used, Some(CropRect::new(20, 20, 600, 320)));

    // The cropped clip has the crop's dimensions and the source's length.
    let cropped = result.cropped_video.clone().expect("cropped clip kept");
    assert_eq!(cropped, processor.cropped_path(&fixture.job()));
    let info = fixture.library.probe(&cropped).unwrap();
    assert_eq!((info.width, info.height), (600, 320));
    assert!((info.duration - 10.0).abs() <= 1.0 / info.fps);

    // Single scene: fixed-interval sampling, then the static frames collapse.
    assert_eq!(result.sampling, Some(SamplingStrategy::FixedInterval));
    assert!(matches!(outcome(&result, Stage::SceneExtraction), StageOutcome::Degraded { .. }));
    assert_eq!(result.frame_count, 1);
    assert_eq!(result.frames.len(), 1);

    assert_eq!(outcome(&result, Stage::BorderDetection), &StageOutcome::Succeeded);
    assert_eq!(outcome(&result, Stage::Transcode), &StageOutcome::Succeeded);
    assert_eq!(outcome(&result, Stage::Deduplication), &StageOutcome::Succeeded);
    assert_eq!(outcome(&result, Stage::Output), &StageOutcome::Succeeded);
    assert_eq!(fixture.backend.ledger().live(), 0);
}

#[test]
fn test_without_dedup_single_scene_yields_min_frames() {
    let fixture = Fixture::new(bordered_talk());
    let options = ProcessorOptions {
        enable_dedup: false,
        ..fixture.options()
    };

    let result = fixture.processor(options).process(&fixture.job());

    assert!(result.success);
    assert_eq!(result.frame_count, 4);
    assert!(matches!(outcome(&result, Stage::Deduplication), StageOutcome::Skipped { .. }));

    let names = file_names(&fixture.frames_dir());
    assert_eq!(
        names,
        vec!["1_1.25.png", "2_3.75.png", "3_6.25.png", "4_8.75.png", MANIFEST_FILE]
    );
    let image = image::open(fixture.frames_dir().join("1_1.25.png")).unwrap();
    assert_eq!((image.width(), image.height()), (600, 320));
}

#[test]
fn test_distinct_scenes_survive_dedup() {
    let video = bordered_talk().with_scene_cuts([2.0, 4.0, 6.0, 8.0]);
    let fixture = Fixture::new(video);

    let result = fixture.processor(fixture.options()).process(&fixture.job());

    assert!(result.success);
    assert_eq!(result.sampling, Some(SamplingStrategy::SceneMidpoints));
    assert_eq!(outcome(&result, Stage::SceneExtraction), &StageOutcome::Succeeded);
    assert_eq!(result.frame_count, 5);

    let timestamps: Vec<f64> = result.frames.iter().map(|f| f.timestamp).collect();
    assert_eq!(timestamps, vec![1.0, 3.0, 5.0, 7.0, 9.0]);
}

#[test]
fn test_manifest_matches_result_frames() {
    let fixture = Fixture::new(bordered_talk().with_scene_cuts([2.0, 4.0, 6.0, 8.0]));

    let result = fixture.processor(fixture.options()).process(&fixture.job());

    let manifest = fs::read(fixture.frames_dir().join(MANIFEST_FILE)).unwrap();
    let records: Vec<FrameRecord> = serde_json::from_slice(&manifest).unwrap();
    assert_eq!(records, result.frames);
    for record in &records {
        assert!(record.path.is_file());
    }
}

#[test]
fn test_no_manifest_when_disabled() {
    let fixture = Fixture::new(bordered_talk());
    let options = ProcessorOptions {
        write_manifest: false,
        ..fixture.options()
    };

    let result = fixture.processor(options).process(&fixture.job());

    assert!(result.success);
    assert!(!fixture.frames_dir().join(MANIFEST_FILE).exists());
}

#[test]
fn test_rerun_replaces_stale_frames() {
    let fixture = Fixture::new(bordered_talk());
    fs::create_dir_all(fixture.frames_dir()).unwrap();
    fs::write(fixture.frames_dir().join("7_99.00.png"), b"stale").unwrap();
    fs::write(fixture.frames_dir().join("notes.txt"), b"keep me").unwrap();

    let result = fixture.processor(fixture.options()).process(&fixture.job());

    assert!(result.success);
    let names = file_names(&fixture.frames_dir());
    assert_eq!(names, vec!["1_1.25.png", MANIFEST_FILE, "notes.txt"]);
}

#[test]
fn test_crop_failure_falls_back_to_full_frame() {
    // Nothing but black: no crop can be found and no frame is usable.
    let fixture = Fixture::new(SyntheticVideo::new(640, 360, 10.0).with_blackout(0.0, 10.0));

    let result = fixture.processor(fixture.options()).process(&fixture.job());

    assert!(matches!(outcome(&result, Stage::BorderDetection), StageOutcome::Degraded { .. }));
    assert_eq!(result.crop_rect_used, Some(CropRect::full_frame(640, 360)));
    // A full-frame crop reads the source directly.
    assert!(matches!(outcome(&result, Stage::Transcode), StageOutcome::Skipped { .. }));
    assert_eq!(fixture.backend.ledger().created(SimResourceKind::Device), 0);

    // Scene sampling is where this clip gives out.
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::SceneDetectionFailed));
    assert!(result.error.is_some());
    assert!(result.stage(Stage::Deduplication).is_none());
    assert!(!fixture.frames_dir().exists());
}

#[test]
fn test_unreadable_source_fails_fast() {
    let fixture = Fixture::new(bordered_talk().corrupt());

    let result = fixture.processor(fixture.options()).process(&fixture.job());

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::SourceUnreadable));
    assert_eq!(result.stages.len(), 1);
    assert_eq!(fixture.backend.ledger().created(SimResourceKind::Device), 0);
}

#[test]
fn test_transcode_failure_skips_extraction() {
    let config = SimConfig {
        fail_at: Some(SimFailure::EncodeAt(40)),
        ..SimConfig::default()
    };
    let fixture = Fixture::with_config(bordered_talk(), config);
    let processor = fixture.processor(fixture.options());

    let result = processor.process(&fixture.job());

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::EncodeFailed));
    assert!(matches!(
        outcome(&result, Stage::Transcode),
        StageOutcome::Failed {
            kind: ErrorKind::EncodeFailed,
            ..
        }
    ));
    assert!(result.stage(Stage::SceneExtraction).is_none());
    assert!(result.cropped_video.is_none());
    assert!(!processor.cropped_path(&fixture.job()).exists());
    assert!(!fixture.frames_dir().exists());
    assert_eq!(fixture.backend.ledger().live(), 0);
}

#[test]
fn test_existing_cropped_clip_is_reused() {
    let fixture = Fixture::new(bordered_talk());
    let processor = fixture.processor(fixture.options());
    let job = fixture.job();

    let first = processor.process(&job);
    let devices = fixture.backend.ledger().created(SimResourceKind::Device);
    let second = processor.process(&job);

    assert!(first.success && second.success);
    assert!(matches!(outcome(&second, Stage::Transcode), StageOutcome::Skipped { .. }));
    assert_eq!(second.cropped_video, first.cropped_video);
    assert_eq!(second.frames, first.frames);
    assert_eq!(fixture.backend.ledger().created(SimResourceKind::Device), devices);
}

#[test]
fn test_existing_clip_redone_without_skip() {
    let fixture = Fixture::new(bordered_talk());
    let options = ProcessorOptions {
        skip_existing: false,
        ..fixture.options()
    };
    let processor = fixture.processor(options);

    processor.process(&fixture.job());
    let second = processor.process(&fixture.job());

    assert_eq!(outcome(&second, Stage::Transcode), &StageOutcome::Succeeded);
}

#[test]
fn test_cropped_clip_removed_when_not_kept() {
    let fixture = Fixture::new(bordered_talk());
    let options = ProcessorOptions {
        keep_cropped: false,
        ..fixture.options()
    };
    let processor = fixture.processor(options);

    let result = processor.process(&fixture.job());

    assert!(result.success);
    assert!(result.cropped_video.is_none());
    assert!(!processor.cropped_path(&fixture.job()).exists());
    assert_eq!(result.frame_count, 1);
}

#[test]
fn test_software_fallback_is_reported_as_degraded() {
    let fixture = Fixture::with_config(bordered_talk(), SimConfig::software_only());

    let result = fixture.processor(fixture.options()).process(&fixture.job());

    assert!(result.success);
    assert!(matches!(outcome(&result, Stage::Transcode), StageOutcome::Degraded { .. }));
}

#[test]
fn test_required_hardware_without_device_fails() {
    let fixture = Fixture::with_config(bordered_talk(), SimConfig::software_only());
    let options = ProcessorOptions {
        hardware: HardwareMode::Required,
        ..fixture.options()
    };

    let result = fixture.processor(options).process(&fixture.job());

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::HardwareInitFailed));
}

#[test]
fn test_disabled_hardware_opens_no_device() {
    let fixture = Fixture::new(bordered_talk());
    let options = ProcessorOptions {
        hardware: HardwareMode::Disabled,
        ..fixture.options()
    };

    let result = fixture.processor(options).process(&fixture.job());

    assert!(result.success);
    assert_eq!(outcome(&result, Stage::Transcode), &StageOutcome::Succeeded);
    assert_eq!(fixture.backend.ledger().created(SimResourceKind::Device), 0);
}
