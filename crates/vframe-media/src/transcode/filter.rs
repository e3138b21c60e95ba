//! Filter graph plan.
//!
//! One buffer source, a linear chain, one buffer sink. On the hardware path
//! the chain is `hwdownload -> format -> crop -> hwupload`; on the software
//! path it is a single `crop`. The plan is computed from the two stream
//! contexts alone and built fresh for every job.

use vframe_models::CropRect;

use crate::error::{MediaError, MediaResult};
use crate::format::{PixelFormat, Rational};
use crate::hwcontext::DeviceKind;
use crate::transcode::context::{StreamContext, FALLBACK_TIME_BASE, SQUARE_PIXELS};
use crate::transcode::negotiate::AccelMode;

/// One transform stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterNode {
    HwDownload,
    Format(PixelFormat),
    Crop(CropRect),
    HwUpload(DeviceKind),
}

impl FilterNode {
    pub fn to_filter_string(&self) -> String {
        match self {
            FilterNode::HwDownload => "hwdownload".to_string(),
            FilterNode::Format(f) => format!("format={}", f.ffmpeg_name()),
            FilterNode::Crop(rect) => rect.to_filter_arg(),
            FilterNode::HwUpload(kind) => kind.upload_filter().to_string(),
        }
    }
}

/// Buffer source parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceParams {
    pub width: u32,
    pub height: u32,
    pub pix_fmt: PixelFormat,
    pub time_base: Rational,
    pub sample_aspect_ratio: Rational,
}

/// Validated, backend-independent description of the filter graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPlan {
    pub mode: AccelMode,
    pub source: SourceParams,
    pub nodes: Vec<FilterNode>,
    pub crop: CropRect,
    /// Format the sink must emit
    pub sink_format: PixelFormat,
    pub output_width: u32,
    pub output_height: u32,
}

impl FilterPlan {
    /// Plan the graph between `decoder` and `encoder` for `crop`.
    ///
    /// Fails with `FilterGraphInitFailed` when the crop leaves the frame,
    /// disagrees with the encoder dimensions, or the two sides are in
    /// incompatible formats.
    pub fn build(
        decoder: &StreamContext,
        encoder: &StreamContext,
        crop: CropRect,
        device: Option<DeviceKind>,
    ) -> MediaResult<Self> {
        if !crop.fits_within(decoder.width, decoder.height) {
            return Err(MediaError::filter_graph_init_failed(format!(
                "crop {} outside {}x{} source",
                crop, decoder.width, decoder.height
            )));
        }
        if crop.width != encoder.width || crop.height != encoder.height {
            return Err(MediaError::filter_graph_init_failed(format!(
                "crop {}x{} does not match encoder {}x{}",
                crop.width, crop.height, encoder.width, encoder.height
            )));
        }
        if decoder.is_hardware() != encoder.is_hardware() {
            return Err(MediaError::filter_graph_init_failed(format!(
                "incompatible formats: decoder {} encoder {}",
                decoder.pix_fmt, encoder.pix_fmt
            )));
        }

        let source = SourceParams {
            width: decoder.width,
            height: decoder.height,
            pix_fmt: decoder.pix_fmt,
            time_base: decoder.time_base.or(FALLBACK_TIME_BASE),
            sample_aspect_ratio: decoder.sample_aspect_ratio.or(SQUARE_PIXELS),
        };

        let (mode, nodes) = if decoder.is_hardware() {
            let kind = device.ok_or_else(|| {
                MediaError::filter_graph_init_failed("hardware frames without a device")
            })?;
            (
                AccelMode::Hardware,
                vec![
                    FilterNode::HwDownload,
                    FilterNode::Format(decoder.sw_format),
                    FilterNode::Crop(crop),
                    FilterNode::HwUpload(kind),
                ],
            )
        } else {
            if decoder.pix_fmt != encoder.pix_fmt {
                return Err(MediaError::filter_graph_init_failed(format!(
                    "software path cannot convert {} to {}",
                    decoder.pix_fmt, encoder.pix_fmt
                )));
            }
            (AccelMode::Software, vec![FilterNode::Crop(crop)])
        };

        Ok(Self {
            mode,
            source,
            nodes,
            crop,
            sink_format: encoder.pix_fmt,
            output_width: encoder.width,
            output_height: encoder.height,
        })
    }

    /// Arguments for the `buffer` source filter.
    pub fn source_args(&self) -> String {
        format!(
            "video_size={}x{}:pix_fmt={}:time_base={}:pixel_aspect={}",
            self.source.width,
            self.source.height,
            self.source.pix_fmt.ffmpeg_name(),
            self.source.time_base,
            self.source.sample_aspect_ratio,
        )
    }

    /// The transform chain in FFmpeg filtergraph syntax.
    pub fn chain(&self) -> String {
        self.nodes
            .iter()
            .map(FilterNode::to_filter_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}
