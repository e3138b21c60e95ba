//! Per-video orchestration.
//!
//! Runs border detection, the crop transcode, scene sampling, dedup and
//! frame output for one video, recording a [`StageReport`] per stage.
//! Soft failures fall back and continue; fatal ones end the video with a
//! failed [`ProcessingResult`]. Nothing here panics or returns an error
//! to the batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use vframe_media::fs_utils::remove_if_exists;
use vframe_media::metrics as media_metrics;
use vframe_media::scene::{clear_frames, write_frames, write_manifest};
use vframe_media::transcode::AccelMode;
use vframe_media::{
    dedup, detect_crop, transcode, CropParams, ExtractedFrame, FrameSampler, MediaError, MediaResult,
    SceneExtractor, SceneParams, TranscodeBackend, TranscodeRequest,
};
use vframe_models::{
    CropRect, DeviceKind, EncoderPolicy, FrameRecord, HardwareMode, ProcessingResult, SamplingStrategy, Stage,
    StageOutcome, StageReport, VideoJob,
};

use crate::config::WorkerConfig;
use crate::logging::JobLogger;
use crate::metrics;

/// Switches and transcode policy shared by every video of a batch.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub work_dir: PathBuf,
    pub hardware: HardwareMode,
    pub device: DeviceKind,
    pub policy: EncoderPolicy,
    pub enable_crop: bool,
    pub enable_dedup: bool,
    pub skip_existing: bool,
    pub keep_cropped: bool,
    pub write_manifest: bool,
}

impl From<&WorkerConfig> for ProcessorOptions {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            hardware: config.hardware,
            device: config.device,
            policy: config.encoder_policy(),
            enable_crop: config.enable_crop,
            enable_dedup: config.enable_dedup,
            skip_existing: config.skip_existing,
            keep_cropped: config.keep_cropped,
            write_manifest: config.write_manifest,
        }
    }
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

/// Runs the full pipeline for one video at a time.
///
/// One processor is shared by all workers of a batch; every call to
/// [`VideoProcessor::process`] builds its own transcode job and hardware
/// session.
pub struct VideoProcessor<B> {
    backend: B,
    sampler: Arc<dyn FrameSampler>,
    options: ProcessorOptions,
}

impl<B: TranscodeBackend> VideoProcessor<B> {
    pub fn new(backend: B, sampler: Arc<dyn FrameSampler>, options: ProcessorOptions) -> Self {
        Self {
            backend,
            sampler,
            options,
        }
    }

    pub fn options(&self) -> &ProcessorOptions {
        &self.options
    }

    /// Deterministic location of a job's cropped working clip.
    pub fn cropped_path(&self, job: &VideoJob) -> PathBuf {
        self.options.work_dir.join(format!("{}_cropped.mp4", job.stem()))
    }

    /// Process one video. Blocking; run it off the async runtime.
    pub fn process(&self, job: &VideoJob) -> ProcessingResult {
        let logger = JobLogger::new(&job.id, "extract_frames");
        let _span = logger.create_span().entered();
        let started = Instant::now();
        logger.log_start(&job.source.display().to_string());

        let mut run = Run {
            logger: &logger,
            result: ProcessingResult::pending(job),
        };
        let outcome = self.run_stages(job, &mut run);
        let mut result = run.result;

        if !self.options.keep_cropped {
            if let Some(clip) = result.cropped_video.take() {
                if let Err(e) = remove_if_exists(&clip) {
                    logger.log_fallback(Stage::Output, &format!("could not remove {}: {}", clip.display(), e));
                }
            }
        }

        let elapsed = started.elapsed();
        match outcome {
            Ok(records) => {
                metrics::record_video("success", elapsed.as_secs_f64());
                logger.log_completion(records.len(), elapsed.as_millis() as u64);
                result.succeed(records)
            }
            Err(e) => {
                metrics::record_video("failed", elapsed.as_secs_f64());
                logger.log_error(&e.reason());
                result.fail(e.kind(), e.reason())
            }
        }
    }

    fn run_stages(&self, job: &VideoJob, run: &mut Run<'_>) -> MediaResult<Vec<FrameRecord>> {
        let crop = self.detect_stage(job, run)?;
        let working = self.transcode_stage(job, crop, run)?;
        let frames = self.extract_stage(job, &working, run)?;
        let mut frames = self.dedup_stage(job, frames, run);
        self.output_stage(job, &mut frames, run)
    }

    /// Crop for the job, or `None` when cropping is disabled.
    fn detect_stage(&self, job: &VideoJob, run: &mut Run<'_>) -> MediaResult<Option<CropChoice>> {
        if !self.options.enable_crop {
            run.skip(Stage::BorderDetection, "crop disabled");
            return Ok(None);
        }

        let started = Instant::now();
        match detect_crop(self.sampler.as_ref(), &job.source, &CropParams::from(&job.tuning)) {
            Ok(detection) => {
                run.result.crop_rect_used = Some(detection.rect);
                run.finish(Stage::BorderDetection, started, StageOutcome::Succeeded);
                Ok(Some(CropChoice {
                    rect: detection.rect,
                    full_frame: detection.is_full_frame(),
                }))
            }
            Err(e) if !e.is_fatal() => {
                let info = match self.sampler.probe(&job.source) {
                    Ok(info) => info,
                    Err(probe) => {
                        let err = MediaError::source_unreadable(&job.source, probe.reason());
                        return Err(run.fail(Stage::BorderDetection, started, err));
                    }
                };
                let rect = CropRect::full_frame(info.width, info.height);
                media_metrics::record_crop_fallback();
                run.logger
                    .log_fallback(Stage::BorderDetection, &format!("{}, using full frame {}", e.reason(), rect));
                run.result.crop_rect_used = Some(rect);
                run.finish(
                    Stage::BorderDetection,
                    started,
                    StageOutcome::Degraded {
                        reason: format!("{}; full frame used", e.reason()),
                    },
                );
                Ok(Some(CropChoice { rect, full_frame: true }))
            }
            Err(e) => Err(run.fail(Stage::BorderDetection, started, e)),
        }
    }

    /// Path of the clip later stages read.
    fn transcode_stage(&self, job: &VideoJob, crop: Option<CropChoice>, run: &mut Run<'_>) -> MediaResult<PathBuf> {
        let Some(CropChoice { rect: crop, full_frame }) = crop else {
            run.skip(Stage::Transcode, "crop disabled, using source");
            return Ok(job.source.clone());
        };
        // Nothing to cut away: the source is read as is, without a lossy re-encode.
        if full_frame {
            run.skip(Stage::Transcode, &format!("crop {} is the full frame, using source", crop));
            return Ok(job.source.clone());
        }

        let target = self.cropped_path(job);
        if self.options.skip_existing && target.is_file() {
            run.skip(Stage::Transcode, &format!("reusing {}", target.display()));
            run.result.cropped_video = Some(target.clone());
            return Ok(target);
        }

        let started = Instant::now();
        let request = TranscodeRequest::new(&job.source, &target, crop)
            .with_hardware(self.options.hardware)
            .with_device(self.options.device)
            .with_policy(self.options.policy.clone());
        match transcode(&self.backend, request) {
            Ok(report) => {
                let outcome = if self.options.hardware.wants_device() && report.accel == AccelMode::Software {
                    StageOutcome::Degraded {
                        reason: format!("hardware unavailable, encoded with {}", report.encoder),
                    }
                } else {
                    StageOutcome::Succeeded
                };
                run.result.crop_rect_used = Some(report.crop);
                run.result.cropped_video = Some(report.output.clone());
                run.finish(Stage::Transcode, started, outcome);
                Ok(report.output)
            }
            Err(e) => Err(run.fail(Stage::Transcode, started, e)),
        }
    }

    fn extract_stage(&self, job: &VideoJob, working: &Path, run: &mut Run<'_>) -> MediaResult<Vec<ExtractedFrame>> {
        let started = Instant::now();
        let extractor = SceneExtractor::new(self.sampler.as_ref(), SceneParams::from(&job.tuning));
        match extractor.extract(working) {
            Ok(extraction) => {
                let outcome = match extraction.strategy {
                    SamplingStrategy::SceneMidpoints => StageOutcome::Succeeded,
                    SamplingStrategy::FixedInterval => StageOutcome::Degraded {
                        reason: format!(
                            "{} scenes for {} frames, fixed-interval sampling",
                            extraction.segments.len(),
                            job.tuning.min_frames
                        ),
                    },
                };
                run.result.sampling = Some(extraction.strategy);
                run.finish(Stage::SceneExtraction, started, outcome);
                Ok(extraction.frames)
            }
            Err(e) => Err(run.fail(Stage::SceneExtraction, started, e)),
        }
    }

    fn dedup_stage(&self, job: &VideoJob, frames: Vec<ExtractedFrame>, run: &mut Run<'_>) -> Vec<ExtractedFrame> {
        if !self.options.enable_dedup {
            run.skip(Stage::Deduplication, "dedup disabled");
            return frames;
        }

        let started = Instant::now();
        let outcome = dedup(frames, job.tuning.hash_distance_threshold);
        let stage_outcome = if outcome.unhashed > 0 {
            StageOutcome::Degraded {
                reason: format!("{} frames kept without a hash", outcome.unhashed),
            }
        } else {
            StageOutcome::Succeeded
        };
        run.finish(Stage::Deduplication, started, stage_outcome);
        outcome.kept
    }

    fn output_stage(
        &self,
        job: &VideoJob,
        frames: &mut [ExtractedFrame],
        run: &mut Run<'_>,
    ) -> MediaResult<Vec<FrameRecord>> {
        let started = Instant::now();
        let written = clear_frames(&job.output_dir)
            .and_then(|_| write_frames(frames, &job.output_dir))
            .and_then(|records| {
                if self.options.write_manifest {
                    write_manifest(&job.output_dir, &records)?;
                }
                Ok(records)
            });
        match written {
            Ok(records) => {
                metrics::record_frames_written(records.len());
                run.finish(Stage::Output, started, StageOutcome::Succeeded);
                Ok(records)
            }
            Err(e) => Err(run.fail(Stage::Output, started, e)),
        }
    }
}

/// Crop chosen by border detection.
#[derive(Debug, Clone, Copy)]
struct CropChoice {
    rect: CropRect,
    full_frame: bool,
}

/// Result under construction plus the logger stage reports go to.
struct Run<'a> {
    logger: &'a JobLogger,
    result: ProcessingResult,
}

impl Run<'_> {
    fn finish(&mut self, stage: Stage, started: Instant, outcome: StageOutcome) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.logger.log_stage(stage, &outcome, elapsed_ms);
        self.result.stages.push(StageReport {
            stage,
            outcome,
            elapsed_ms,
        });
    }

    fn skip(&mut self, stage: Stage, reason: &str) {
        self.finish(
            stage,
            Instant::now(),
            StageOutcome::Skipped {
                reason: reason.to_string(),
            },
        );
    }

    /// Record a failed stage and hand the error back for `?`.
    fn fail(&mut self, stage: Stage, started: Instant, err: MediaError) -> MediaError {
        self.finish(
            stage,
            started,
            StageOutcome::Failed {
                kind: err.kind(),
                reason: err.reason(),
            },
        );
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vframe_media::testing::{SimBackend, SyntheticLibrary, SyntheticVideo};

    fn processor(library: SyntheticLibrary, options: ProcessorOptions) -> VideoProcessor<SimBackend> {
        let library = Arc::new(library);
        VideoProcessor::new(SimBackend::default().with_library(library.clone()), library, options)
    }

    #[test]
    fn test_cropped_path_is_deterministic() {
        let options = ProcessorOptions {
            work_dir: PathBuf::from("/work"),
            ..Default::default()
        };
        let processor = processor(SyntheticLibrary::new(), options);
        let job = VideoJob::new("/in/My Clip.mkv", "/out/My Clip");

        assert_eq!(processor.cropped_path(&job), PathBuf::from("/work/My Clip_cropped.mp4"));
        assert_eq!(processor.cropped_path(&job), processor.cropped_path(&job.clone()));
    }

    #[test]
    fn test_missing_source_fails_at_border_detection() {
        let dir = tempfile::TempDir::new().unwrap();
        let options = ProcessorOptions {
            work_dir: dir.path().join("work"),
            ..Default::default()
        };
        let processor = processor(SyntheticLibrary::new(), options);
        let job = VideoJob::new("/in/missing.mp4", dir.path().join("frames"));

        let result = processor.process(&job);

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(vframe_models::ErrorKind::SourceUnreadable));
        assert_eq!(result.stages.len(), 1);
        assert!(matches!(
            result.stage(Stage::BorderDetection).unwrap().outcome,
            StageOutcome::Failed { .. }
        ));
    }

    #[test]
    fn test_crop_disabled_reads_source_directly() {
        let dir = tempfile::TempDir::new().unwrap();
        let library = SyntheticLibrary::new();
        library.insert("/in/plain.mp4", SyntheticVideo::new(320, 180, 10.0));
        let options = ProcessorOptions {
            work_dir: dir.path().join("work"),
            enable_crop: false,
            ..Default::default()
        };
        let processor = processor(library, options);
        let job = VideoJob::new("/in/plain.mp4", dir.path().join("frames"));

        let result = processor.process(&job);

        assert!(result.success, "{:?}", result.error);
        assert!(result.crop_rect_used.is_none());
        assert!(result.cropped_video.is_none());
        assert!(matches!(
            result.stage(Stage::Transcode).unwrap().outcome,
            StageOutcome::Skipped { .. }
        ));
        assert!(!dir.path().join("work").exists());
    }

    #[test]
    fn test_borderless_source_is_not_reencoded() {
        let dir = tempfile::TempDir::new().unwrap();
        let library = SyntheticLibrary::new();
        library.insert("/in/wide.mp4", SyntheticVideo::new(320, 180, 10.0));
        let library = Arc::new(library);
        let backend = SimBackend::default().with_library(library.clone());
        let options = ProcessorOptions {
            work_dir: dir.path().join("work"),
            ..Default::default()
        };
        let processor = VideoProcessor::new(backend.clone(), library, options);
        let job = VideoJob::new("/in/wide.mp4", dir.path().join("frames"));

        let result = processor.process(&job);

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.crop_rect_used, Some(CropRect::full_frame(320, 180)));
        assert!(matches!(
            result.stage(Stage::Transcode).unwrap().outcome,
            StageOutcome::Skipped { .. }
        ));
        assert!(result.cropped_video.is_none());
        assert!(!processor.cropped_path(&job).exists());
        assert_eq!(backend.ledger().created(vframe_media::testing::SimResourceKind::Device), 0);
    }
}
