//! Batch execution: ordering, isolation of failures and concurrency bounds.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use tempfile::TempDir;
use vframe_media::testing::{SimBackend, SyntheticLibrary, SyntheticVideo};
use vframe_media::{FrameSampler, GrayFrame, MediaResult, VideoInfo};
use vframe_models::{ErrorKind, VideoJob};
use vframe_worker::{build_jobs, BatchExecutor, ProcessorOptions, VideoProcessor};

/// Sampler that panics on `explode` clips and tracks concurrent probes.
struct InstrumentedSampler {
    inner: Arc<SyntheticLibrary>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl InstrumentedSampler {
    fn new(inner: Arc<SyntheticLibrary>) -> Self {
        Self {
            inner,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl FrameSampler for InstrumentedSampler {
    fn probe(&self, path: &Path) -> MediaResult<VideoInfo> {
        if path.to_string_lossy().contains("explode") {
            panic!("decoder blew up on {}", path.display());
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        let info = self.inner.probe(path);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        info
    }

    fn gray_frame_at(&self, path: &Path, timestamp: f64, width: u32, height: u32) -> MediaResult<GrayFrame> {
        self.inner.gray_frame_at(path, timestamp, width, height)
    }

    fn rgb_frame_at(&self, path: &Path, timestamp: f64) -> MediaResult<RgbImage> {
        self.inner.rgb_frame_at(path, timestamp)
    }

    fn scan_gray(
        &self,
        path: &Path,
        fps: f64,
        width: u32,
        height: u32,
        visit: &mut dyn FnMut(f64, &GrayFrame) -> MediaResult<()>,
    ) -> MediaResult<u64> {
        self.inner.scan_gray(path, fps, width, height, visit)
    }
}

struct Batch {
    dir: TempDir,
    library: Arc<SyntheticLibrary>,
    sampler: Arc<InstrumentedSampler>,
}

impl Batch {
    fn new(videos: &[(&str, SyntheticVideo)]) -> Self {
        let library = Arc::new(SyntheticLibrary::new());
        for (path, video) in videos {
            library.insert(*path, video.clone());
        }
        Self {
            dir: TempDir::new().unwrap(),
            sampler: Arc::new(InstrumentedSampler::new(library.clone())),
            library,
        }
    }

    fn executor(&self, pool_size: usize) -> BatchExecutor<SimBackend> {
        let options = ProcessorOptions {
            work_dir: self.dir.path().join("work"),
            ..Default::default()
        };
        let backend = SimBackend::default().with_library(self.library.clone());
        BatchExecutor::new(VideoProcessor::new(backend, self.sampler.clone(), options), pool_size)
    }

    fn jobs(&self, paths: &[&str]) -> Vec<VideoJob> {
        let videos: Vec<PathBuf> = paths.iter().map(|p| PathBuf::from(*p)).collect();
        build_jobs(&videos, &self.dir.path().join("frames"), &Default::default())
    }
}

fn small_clip() -> SyntheticVideo {
    SyntheticVideo::new(160, 90, 4.0).with_border(10)
}

#[tokio::test]
async fn test_results_follow_submission_order() {
    let batch = Batch::new(&[
        ("/in/a.mp4", small_clip()),
        ("/in/b.mp4", small_clip().corrupt()),
        ("/in/c.mp4", small_clip()),
    ]);
    let jobs = batch.jobs(&["/in/a.mp4", "/in/b.mp4", "/in/c.mp4"]);
    let ids: Vec<_> = jobs.iter().map(|j| j.id.clone()).collect();

    let results = batch.executor(2).run(jobs).await;

    assert_eq!(results.iter().map(|r| r.job_id.clone()).collect::<Vec<_>>(), ids);
    assert!(results[0].success);
    assert!(!results[1].success);
    assert_eq!(results[1].error_kind, Some(ErrorKind::SourceUnreadable));
    assert!(results[2].success);
}

#[tokio::test]
async fn test_panicking_video_does_not_sink_the_batch() {
    let batch = Batch::new(&[("/in/ok.mp4", small_clip())]);
    let jobs = batch.jobs(&["/in/explode.mp4", "/in/ok.mp4"]);

    let results = batch.executor(2).run(jobs).await;

    assert_eq!(results.len(), 2);
    assert!(!results[0].success);
    assert_eq!(results[0].error_kind, Some(ErrorKind::Internal));
    assert!(results[0].error.as_deref().unwrap_or_default().contains("worker task failed"));
    assert!(results[1].success);
}

#[tokio::test]
async fn test_pool_size_bounds_concurrency() {
    let paths = ["/in/1.mp4", "/in/2.mp4", "/in/3.mp4", "/in/4.mp4", "/in/5.mp4", "/in/6.mp4"];
    let videos: Vec<_> = paths.iter().map(|p| (*p, small_clip())).collect();
    let batch = Batch::new(&videos);

    let results = batch.executor(2).run(batch.jobs(&paths)).await;

    assert!(results.iter().all(|r| r.success));
    let peak = batch.sampler.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak concurrency {}", peak);
}

#[test]
fn test_executor_on_current_thread_runtime() {
    let batch = Batch::new(&[("/in/a.mp4", small_clip())]);
    let executor = batch.executor(1);

    let results = tokio_test::block_on(executor.run(batch.jobs(&["/in/a.mp4"])));

    assert_eq!(results.len(), 1);
    assert!(results[0].success, "{:?}", results[0].error);
    assert_eq!(results[0].frame_count, 1);
}
