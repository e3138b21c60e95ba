//! Frame sampling seam between decoding and the detectors.
//!
//! Border detection and scene extraction only need a few frames at given
//! timestamps plus one low-resolution grayscale pass over the clip.
//! [`FfmpegSampler`] provides them with FFmpeg CLI calls; the `testing`
//! module renders them procedurally.

use image::{ImageFormat, RgbImage};
use std::io::Read;
use std::path::Path;
use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::frame::GrayFrame;
use crate::probe::{probe_video, VideoInfo};

/// Source of decoded frames for detection and sampling.
pub trait FrameSampler: Send + Sync {
    fn probe(&self, path: &Path) -> MediaResult<VideoInfo>;

    /// One grayscale frame at `timestamp`, scaled to `width x height`.
    fn gray_frame_at(&self, path: &Path, timestamp: f64, width: u32, height: u32) -> MediaResult<GrayFrame>;

    /// One full-resolution RGB frame at `timestamp`.
    fn rgb_frame_at(&self, path: &Path, timestamp: f64) -> MediaResult<RgbImage>;

    /// Decode the whole clip at `fps` as `width x height` grayscale, calling
    /// `visit(timestamp, frame)` in order. Returns the number of frames seen.
    fn scan_gray(
        &self,
        path: &Path,
        fps: f64,
        width: u32,
        height: u32,
        visit: &mut dyn FnMut(f64, &GrayFrame) -> MediaResult<()>,
    ) -> MediaResult<u64>;
}

/// FFmpeg CLI sampler.
#[derive(Debug, Clone)]
pub struct FfmpegSampler {
    runner: FfmpegRunner,
}

impl FfmpegSampler {
    pub fn new() -> MediaResult<Self> {
        Ok(Self {
            runner: FfmpegRunner::new()?,
        })
    }

    pub fn with_runner(runner: FfmpegRunner) -> Self {
        Self { runner }
    }
}

fn gray_filter(width: u32, height: u32) -> String {
    format!("scale={}:{}:flags=area,format=gray", width, height)
}

impl FrameSampler for FfmpegSampler {
    fn probe(&self, path: &Path) -> MediaResult<VideoInfo> {
        probe_video(path)
    }

    fn gray_frame_at(&self, path: &Path, timestamp: f64, width: u32, height: u32) -> MediaResult<GrayFrame> {
        let cmd = FfmpegCommand::new(path, "pipe:1")
            .seek(timestamp)
            .video_filter(gray_filter(width, height))
            .single_frame()
            .raw_video("gray");
        let bytes = self.runner.capture(&cmd)?;
        let expected = width as usize * height as usize;
        if bytes.len() < expected {
            return Err(MediaError::decode_failed(format!(
                "no frame decoded at {:.3}s ({} of {} bytes)",
                timestamp,
                bytes.len(),
                expected
            )));
        }
        GrayFrame::new(width, height, bytes[..expected].to_vec())
    }

    fn rgb_frame_at(&self, path: &Path, timestamp: f64) -> MediaResult<RgbImage> {
        let cmd = FfmpegCommand::new(path, "pipe:1")
            .seek(timestamp)
            .single_frame()
            .output_args(["-f", "image2pipe", "-c:v", "png"]);
        let bytes = self.runner.capture(&cmd)?;
        if bytes.is_empty() {
            return Err(MediaError::decode_failed(format!(
                "no frame decoded at {:.3}s",
                timestamp
            )));
        }
        Ok(image::load_from_memory_with_format(&bytes, ImageFormat::Png)?.to_rgb8())
    }

    fn scan_gray(
        &self,
        path: &Path,
        fps: f64,
        width: u32,
        height: u32,
        visit: &mut dyn FnMut(f64, &GrayFrame) -> MediaResult<()>,
    ) -> MediaResult<u64> {
        let cmd = FfmpegCommand::new(path, "pipe:1")
            .video_filter(format!("fps={},{}", fps, gray_filter(width, height)))
            .raw_video("gray");
        let mut child = self.runner.spawn(&cmd)?;
        let mut stdout = child
            .take_stdout()
            .ok_or_else(|| MediaError::internal("ffmpeg stdout not captured"))?;

        let frame_bytes = width as usize * height as usize;
        let mut buf = vec![0u8; frame_bytes];
        let mut count = 0u64;
        loop {
            match stdout.read_exact(&mut buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let frame = GrayFrame::new(width, height, buf.clone())?;
            visit(count as f64 / fps, &frame)?;
            count += 1;
        }
        drop(stdout);
        child.wait()?;
        debug!(frames = count, fps, "Grayscale scan finished");
        Ok(count)
    }
}
