//! Black border (letterbox / pillarbox) detection.
//!
//! Probes a handful of frames spread over the clip, skipping the first and
//! last 5% where fades live, and runs a uniform-line scan on each. When the
//! scan is not stable across probes every probe is re-evaluated with a
//! gradient-energy scan. Per-probe rectangles are combined with a
//! component-wise median.
//!
//! Only [`MediaError::SourceUnreadable`] is fatal here; every other problem
//! surfaces as [`MediaError::CropDetectionFailed`] and the caller continues
//! with a full-frame crop.

mod aggregate;
mod gradient;
mod scan;

pub use aggregate::{consensus, median_edges, Consensus};
pub use gradient::gradient_scan;
pub use scan::{uniform_scan, Edges};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};
use vframe_models::{CropRect, TuningConfig};

use crate::error::{MediaError, MediaResult};
use crate::frame::GrayFrame;
use crate::metrics;
use crate::sampler::FrameSampler;

/// Fraction of the duration skipped at each end of the clip.
const EDGE_MARGIN: f64 = 0.05;

/// Border detection parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropParams {
    pub probe_count: usize,
    /// Max deviation (8-bit levels) for a line to count as uniform; also the
    /// agreement window between probes, in source pixels
    pub tolerance: u8,
    pub edge_threshold: f64,
    pub min_crop_ratio: f64,
    /// Probe frames are decoded at this fraction of the source size
    pub downscale: f64,
}

impl From<&TuningConfig> for CropParams {
    fn from(tuning: &TuningConfig) -> Self {
        Self {
            probe_count: tuning.probe_count,
            tolerance: tuning.tolerance,
            edge_threshold: tuning.edge_threshold,
            min_crop_ratio: tuning.min_crop_ratio,
            downscale: tuning.downscale,
        }
    }
}

impl Default for CropParams {
    fn default() -> Self {
        Self::from(&TuningConfig::default())
    }
}

/// Which scan produced the rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropMethod {
    Uniform,
    Gradient,
}

impl CropMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CropMethod::Uniform => "uniform",
            CropMethod::Gradient => "gradient",
        }
    }
}

impl fmt::Display for CropMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detected crop for one source video.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropDetection {
    pub rect: CropRect,
    pub method: CropMethod,
    /// Probe frames that were decoded
    pub probes: usize,
    pub source_width: u32,
    pub source_height: u32,
}

impl CropDetection {
    pub fn is_full_frame(&self) -> bool {
        self.rect.is_full_frame(self.source_width, self.source_height)
    }
}

/// Probe timestamps, evenly spread over the middle 90% of the clip.
pub fn probe_timestamps(duration: f64, count: usize) -> Vec<f64> {
    let span = 1.0 - 2.0 * EDGE_MARGIN;
    (0..count)
        .map(|i| duration * (EDGE_MARGIN + span * (i as f64 + 0.5) / count as f64))
        .collect()
}

/// Probe frame size for a source at `downscale`, at least one pixel.
pub fn probe_dimensions(width: u32, height: u32, downscale: f64) -> (u32, u32) {
    let scale = |v: u32| ((v as f64 * downscale).round() as u32).max(1);
    (scale(width), scale(height))
}

/// Detect the crop rectangle of `source`.
pub fn detect_crop(sampler: &dyn FrameSampler, source: &Path, params: &CropParams) -> MediaResult<CropDetection> {
    let info = sampler
        .probe(source)
        .map_err(|e| MediaError::source_unreadable(source, e.reason()))?;
    if info.width == 0 || info.height == 0 || info.duration <= 0.0 {
        return Err(MediaError::source_unreadable(
            source,
            format!("nothing to probe ({}x{}, {:.2}s)", info.width, info.height, info.duration),
        ));
    }

    let (pw, ph) = probe_dimensions(info.width, info.height, params.downscale);
    let frames: Vec<GrayFrame> = probe_timestamps(info.duration, params.probe_count.max(1))
        .into_iter()
        .filter_map(|t| match sampler.gray_frame_at(source, t, pw, ph) {
            Ok(frame) => Some(frame),
            Err(e) => {
                debug!(timestamp = t, "Probe frame unavailable: {}", e);
                None
            }
        })
        .collect();
    if frames.is_empty() {
        return Err(MediaError::source_unreadable(source, "no probe frame could be decoded"));
    }

    let fx = info.width as f64 / pw as f64;
    let fy = info.height as f64 / ph as f64;
    let to_source = |edges: Option<Edges>| {
        edges
            .map(|e| e.scaled(fx, fy, info.width, info.height))
            .filter(|e| !e.is_empty())
    };
    let tolerance = params.tolerance as u32;

    // A frame without any solid line is no evidence of a border.
    let no_border = Edges::full(pw, ph);
    let uniform: Vec<Option<Edges>> = frames
        .iter()
        .map(|f| to_source(uniform_scan(f, params.tolerance).filter(|e| *e != no_border)))
        .collect();
    let primary = consensus(&uniform, tolerance);

    let (method, chosen) = if primary.is_stable() {
        (CropMethod::Uniform, primary)
    } else {
        debug!(
            detected = primary.detected,
            agreeing = primary.agreeing,
            probes = primary.total,
            "Uniform scan unstable, using gradient fallback"
        );
        let gradient: Vec<Option<Edges>> = frames
            .iter()
            .map(|f| to_source(gradient_scan(f, params.edge_threshold)))
            .collect();
        (CropMethod::Gradient, consensus(&gradient, tolerance))
    };

    let median = chosen.median.ok_or_else(|| {
        MediaError::crop_detection_failed(format!(
            "no probe of {} produced a content rectangle",
            chosen.total
        ))
    })?;
    let rect = CropRect::from_edges(median.left, median.top, median.right, median.bottom)
        .clamped(info.width, info.height);
    rect.validate(info.width, info.height, params.min_crop_ratio)
        .map_err(|e| MediaError::crop_detection_failed(e.to_string()))?;

    if method == CropMethod::Gradient && !chosen.is_stable() {
        warn!(
            source = %source.display(),
            agreeing = chosen.agreeing,
            probes = chosen.total,
            "Gradient probes disagree; using their median"
        );
    }
    metrics::record_crop_detection(method.as_str());
    info!(
        source = %source.display(),
        crop = %rect,
        method = %method,
        probes = frames.len(),
        "Detected crop"
    );
    Ok(CropDetection {
        rect,
        method,
        probes: frames.len(),
        source_width: info.width,
        source_height: info.height,
    })
}
