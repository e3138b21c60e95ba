//! Decoder selection and pixel-format negotiation.
//!
//! Both are plain functions evaluated once while the decoder is opened;
//! the outcome is a tagged [`FormatChoice`] instead of a callback stored on
//! the codec context.

use serde::Serialize;
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::format::PixelFormat;
use crate::hwcontext::DeviceKind;

/// Where frames live between decode and encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccelMode {
    /// Device-resident frames; filter graph downloads, crops and re-uploads
    Hardware,
    /// Host-memory planar frames; filter graph only crops
    Software,
}

/// Outcome of pixel-format negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatChoice {
    Hardware(PixelFormat),
    Software(PixelFormat),
}

impl FormatChoice {
    pub fn format(&self) -> PixelFormat {
        match self {
            FormatChoice::Hardware(f) | FormatChoice::Software(f) => *f,
        }
    }

    pub fn mode(&self) -> AccelMode {
        match self {
            FormatChoice::Hardware(_) => AccelMode::Hardware,
            FormatChoice::Software(_) => AccelMode::Software,
        }
    }

    pub fn is_hardware(&self) -> bool {
        matches!(self, FormatChoice::Hardware(_))
    }
}

/// Decoder picked for the source codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderChoice {
    /// Decoder name (`h264_cuvid`, `h264`, ...)
    pub name: String,
    /// Codec of the source stream
    pub codec: String,
    /// Whether the decoder uses the hardware device
    pub hardware: bool,
}

impl DecoderChoice {
    /// The codec's default software decoder.
    pub fn software(codec: &str) -> Self {
        Self {
            name: codec.to_string(),
            codec: codec.to_string(),
            hardware: false,
        }
    }
}

/// NVDEC (cuvid) decoder for a codec.
pub fn cuvid_decoder(codec: &str) -> Option<&'static str> {
    match codec {
        "h264" => Some("h264_cuvid"),
        "hevc" | "h265" => Some("hevc_cuvid"),
        "vp8" => Some("vp8_cuvid"),
        "vp9" => Some("vp9_cuvid"),
        "av1" => Some("av1_cuvid"),
        "mpeg2video" => Some("mpeg2_cuvid"),
        "mpeg4" => Some("mpeg4_cuvid"),
        "vc1" => Some("vc1_cuvid"),
        "mjpeg" => Some("mjpeg_cuvid"),
        _ => None,
    }
}

/// Prefer a hardware decoder for the codec; otherwise the default software
/// decoder. A missing hardware decoder is not an error.
pub fn select_decoder(
    codec: &str,
    device: Option<DeviceKind>,
    available: impl Fn(&str) -> bool,
) -> DecoderChoice {
    match device {
        Some(DeviceKind::Cuda) => {
            if let Some(name) = cuvid_decoder(codec).filter(|name| available(*name)) {
                return DecoderChoice {
                    name: name.to_string(),
                    codec: codec.to_string(),
                    hardware: true,
                };
            }
            debug!(codec, "No hardware decoder available, using software decoder");
        }
        // VA-API hooks into the regular decoder through hwaccel.
        Some(DeviceKind::Vaapi) => {
            return DecoderChoice {
                name: codec.to_string(),
                codec: codec.to_string(),
                hardware: true,
            };
        }
        None => {}
    }
    DecoderChoice::software(codec)
}

/// Device-memory pixel format for a device family.
pub fn hardware_format_for(kind: DeviceKind) -> PixelFormat {
    match kind {
        DeviceKind::Cuda => PixelFormat::Cuda,
        DeviceKind::Vaapi => PixelFormat::Vaapi,
    }
}

/// Pick the decoder output format.
///
/// With a device, the device's surface format wins when offered. Otherwise
/// the first host format is taken, planar YUV preferred.
pub fn negotiate_pixel_format(
    offered: &[PixelFormat],
    device: Option<DeviceKind>,
) -> MediaResult<FormatChoice> {
    if let Some(kind) = device {
        let wanted = hardware_format_for(kind);
        if offered.contains(&wanted) {
            return Ok(FormatChoice::Hardware(wanted));
        }
    }

    if offered.contains(&PixelFormat::Yuv420p) {
        return Ok(FormatChoice::Software(PixelFormat::Yuv420p));
    }
    offered
        .iter()
        .copied()
        .find(|f| !f.is_hardware())
        .map(FormatChoice::Software)
        .ok_or_else(|| {
            MediaError::decode_failed(format!(
                "decoder offers no usable pixel format ({:?})",
                offered
            ))
        })
}
