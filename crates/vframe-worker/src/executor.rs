//! Batch executor.
//!
//! Runs each video's pipeline on the blocking thread pool. Admission is
//! bounded by a semaphore sized to the GPU memory budget, so at most
//! `pool_size` hardware sessions exist at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info};
use vframe_media::TranscodeBackend;
use vframe_models::{ErrorKind, ProcessingResult, VideoJob};

use crate::metrics;
use crate::processor::VideoProcessor;

/// Bounded pool of video workers.
pub struct BatchExecutor<B> {
    processor: Arc<VideoProcessor<B>>,
    semaphore: Arc<Semaphore>,
    pool_size: usize,
    active: Arc<AtomicUsize>,
}

impl<B> BatchExecutor<B>
where
    B: TranscodeBackend + Send + Sync + 'static,
{
    pub fn new(processor: VideoProcessor<B>, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            processor: Arc::new(processor),
            semaphore: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Process every job and return results in submission order.
    ///
    /// A failing or panicking video yields a failed result; the rest of the
    /// batch still runs.
    pub async fn run(&self, jobs: Vec<VideoJob>) -> Vec<ProcessingResult> {
        info!(videos = jobs.len(), pool_size = self.pool_size, "Starting batch");

        let mut handles: Vec<(VideoJob, JoinHandle<ProcessingResult>)> = Vec::with_capacity(jobs.len());
        for job in jobs {
            let handle = self.spawn(job.clone()).await;
            handles.push((job, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (job, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(video_id = %job.id, source = %job.source.display(), "Video worker died: {}", e);
                    metrics::record_video("failed", 0.0);
                    ProcessingResult::pending(&job).fail(ErrorKind::Internal, format!("worker task failed: {}", e))
                }
            };
            results.push(result);
        }

        let failed = results.iter().filter(|r| !r.success).count();
        info!(videos = results.len(), failed, "Batch finished");
        results
    }

    /// Wait for a free slot, then start the job on the blocking pool.
    async fn spawn(&self, job: VideoJob) -> JoinHandle<ProcessingResult> {
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => Some(permit),
            // The semaphore is never closed; run unbounded rather than drop the job.
            Err(_) => None,
        };
        let processor = Arc::clone(&self.processor);
        let active = Arc::clone(&self.active);

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            metrics::set_active_jobs(active.fetch_add(1, Ordering::SeqCst) + 1);
            let _active = ActiveGuard(active);
            processor.process(&job)
        })
    }
}

/// Decrements the active-job gauge even when the worker panics.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let now = self.0.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_active_jobs(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::ProcessorOptions;
    use vframe_media::testing::{SimBackend, SyntheticLibrary};

    #[tokio::test]
    async fn test_pool_size_never_zero() {
        let library = Arc::new(SyntheticLibrary::new());
        let processor = VideoProcessor::new(
            SimBackend::default().with_library(library.clone()),
            library,
            ProcessorOptions::default(),
        );

        let executor = BatchExecutor::new(processor, 0);

        assert_eq!(executor.pool_size(), 1);
        assert!(executor.run(Vec::new()).await.is_empty());
    }
}
