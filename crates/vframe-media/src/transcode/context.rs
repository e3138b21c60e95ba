//! Decoder- and encoder-side stream parameters.

use vframe_models::{CropRect, EncoderPolicy};

use crate::format::{PixelFormat, Rational};
use crate::hwcontext::FramePool;
use crate::transcode::backend::SourceStream;
use crate::transcode::negotiate::FormatChoice;

/// Time base used when a stream reports none.
pub const FALLBACK_TIME_BASE: Rational = Rational::new(1, 25);
/// Sample aspect ratio used when a stream reports none.
pub const SQUARE_PIXELS: Rational = Rational::new(1, 1);

/// Codec parameters on one side of the filter graph.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub width: u32,
    pub height: u32,
    /// Format frames arrive in (a device format on the hardware path)
    pub pix_fmt: PixelFormat,
    /// Host layout of the frames (equal to `pix_fmt` on the software path)
    pub sw_format: PixelFormat,
    pub time_base: Rational,
    pub frame_rate: Rational,
    pub sample_aspect_ratio: Rational,
    /// Frame pool backing device frames
    pub hw_frames: Option<FramePool>,
}

impl StreamContext {
    /// Decoder side, derived from the source stream and the negotiated format.
    pub fn decoder(source: &SourceStream, format: FormatChoice) -> Self {
        let sw_format = match format {
            FormatChoice::Hardware(_) => PixelFormat::Nv12,
            FormatChoice::Software(f) => f,
        };
        let frame_rate = source.frame_rate.or(FALLBACK_TIME_BASE.invert());
        Self {
            width: source.width,
            height: source.height,
            pix_fmt: format.format(),
            sw_format,
            time_base: source.time_base.or(frame_rate.invert()),
            frame_rate,
            sample_aspect_ratio: source.sample_aspect_ratio.or(SQUARE_PIXELS),
            hw_frames: None,
        }
    }

    /// Encoder side: crop dimensions, same format family and clock as the decoder.
    pub fn encoder(decoder: &StreamContext, crop: CropRect) -> Self {
        Self {
            width: crop.width,
            height: crop.height,
            pix_fmt: decoder.pix_fmt,
            sw_format: decoder.sw_format,
            time_base: decoder.time_base.or(FALLBACK_TIME_BASE),
            frame_rate: decoder.frame_rate,
            sample_aspect_ratio: decoder.sample_aspect_ratio.or(SQUARE_PIXELS),
            hw_frames: None,
        }
    }

    pub fn with_hw_frames(mut self, pool: FramePool) -> Self {
        self.hw_frames = Some(pool);
        self
    }

    pub fn is_hardware(&self) -> bool {
        self.pix_fmt.is_hardware()
    }
}

/// Resolved encoder configuration for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub codec: String,
    pub preset: String,
    pub bitrate: u64,
    /// Always zero: packets must leave the encoder in presentation order
    pub max_b_frames: u32,
    pub hardware: bool,
}

impl EncoderSettings {
    pub fn from_policy(policy: &EncoderPolicy, hardware: bool) -> Self {
        let (codec, preset) = policy.select(hardware);
        Self {
            codec: codec.to_string(),
            preset: preset.to_string(),
            bitrate: policy.bitrate,
            max_b_frames: 0,
            hardware,
        }
    }

    /// FFmpeg CLI output arguments for this encoder.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-c:v".to_string(),
            self.codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-b:v".to_string(),
            self.bitrate.to_string(),
            "-bf".to_string(),
            self.max_b_frames.to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceStream {
        SourceStream {
            index: 0,
            codec: "h264".to_string(),
            width: 1920,
            height: 1080,
            pix_fmt: Some(PixelFormat::Yuv420p),
            time_base: Rational::new(0, 1),
            frame_rate: Rational::new(30, 1),
            sample_aspect_ratio: Rational::new(0, 1),
            frame_count: Some(300),
            duration: 10.0,
            has_audio: false,
        }
    }

    #[test]
    fn test_decoder_context_hardware() {
        let ctx = StreamContext::decoder(&source(), FormatChoice::Hardware(PixelFormat::Cuda));
        assert_eq!(ctx.pix_fmt, PixelFormat::Cuda);
        assert_eq!(ctx.sw_format, PixelFormat::Nv12);
        assert_eq!(ctx.time_base, Rational::new(1, 30));
        assert_eq!(ctx.sample_aspect_ratio, SQUARE_PIXELS);
        assert!(ctx.is_hardware());
    }

    #[test]
    fn test_encoder_context_uses_crop_dims() {
        let dec = StreamContext::decoder(&source(), FormatChoice::Software(PixelFormat::Yuv420p));
        let enc = StreamContext::encoder(&dec, CropRect::new(20, 20, 1880, 1040));
        assert_eq!((enc.width, enc.height), (1880, 1040));
        assert_eq!(enc.pix_fmt, PixelFormat::Yuv420p);
        assert_eq!(enc.time_base, dec.time_base);
        assert!(!enc.is_hardware());
    }

    #[test]
    fn test_encoder_settings() {
        let settings = EncoderSettings::from_policy(&EncoderPolicy::default(), true);
        assert_eq!(settings.codec, "h264_nvenc");
        assert_eq!(settings.preset, "p1");
        assert_eq!(settings.max_b_frames, 0);
        let settings = EncoderSettings::from_policy(&EncoderPolicy::default(), false);
        assert_eq!(settings.codec, "libx264");
    }
}
