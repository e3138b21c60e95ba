//! Codec seams the transcode state machine drives.
//!
//! A backend supplies demuxer, decoder, filter graph, encoder and muxer
//! objects with send/receive semantics modelled on libavcodec: sends may
//! report `Full` (drain first, then retry) and receives report `Again`
//! (needs more input) or `Eof` (fully drained).

use std::path::Path;

use crate::error::MediaResult;
use crate::format::{PixelFormat, Rational};
use crate::hwcontext::{DeviceContext, DeviceKind, FramePool};
use crate::transcode::context::{EncoderSettings, StreamContext};
use crate::transcode::filter::FilterPlan;
use crate::transcode::negotiate::{DecoderChoice, FormatChoice};

/// Result of handing input to a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Accepted,
    /// Output must be drained before this input is accepted
    Full,
}

/// Result of asking a codec for output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receive<T> {
    Item(T),
    /// More input is needed
    Again,
    /// Flushed; no further output
    Eof,
}

/// Presentation timestamp access.
pub trait Timestamped {
    fn timestamp(&self) -> Option<i64>;
    fn set_timestamp(&mut self, ts: Option<i64>);
}

/// Compressed packet.
pub trait MediaPacket: Timestamped {
    /// Rescale timestamps between time bases.
    fn rescale(&mut self, from: Rational, to: Rational);
}

/// Decoded or filtered frame.
pub trait MediaFrame: Timestamped {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn format(&self) -> PixelFormat;
}

/// Parameters of the selected source video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceStream {
    pub index: usize,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    /// Pixel format as stored in the file
    pub pix_fmt: Option<PixelFormat>,
    pub time_base: Rational,
    pub frame_rate: Rational,
    pub sample_aspect_ratio: Rational,
    pub frame_count: Option<u64>,
    pub duration: f64,
    pub has_audio: bool,
}

/// Demuxer yielding packets of the selected video stream only.
pub trait PacketSource {
    type Packet: MediaPacket;

    /// Next packet, or `None` at end of input.
    fn read_packet(&mut self) -> MediaResult<Option<Self::Packet>>;
}

pub trait FrameDecoder {
    type Packet: MediaPacket;
    type Frame: MediaFrame;

    /// `None` starts draining.
    fn send_packet(&mut self, packet: Option<&Self::Packet>) -> MediaResult<SendStatus>;
    fn receive_frame(&mut self) -> MediaResult<Receive<Self::Frame>>;
}

pub trait FrameFilterGraph {
    type Frame: MediaFrame;

    /// `None` signals end of stream.
    fn push_frame(&mut self, frame: Option<Self::Frame>) -> MediaResult<()>;
    fn pull_frame(&mut self) -> MediaResult<Receive<Self::Frame>>;
}

pub trait FrameEncoder {
    type Frame: MediaFrame;
    type Packet: MediaPacket;

    /// `None` starts draining.
    fn send_frame(&mut self, frame: Option<&Self::Frame>) -> MediaResult<SendStatus>;
    fn receive_packet(&mut self) -> MediaResult<Receive<Self::Packet>>;
    fn time_base(&self) -> Rational;
}

/// Muxer for the cropped output.
pub trait PacketSink {
    type Packet: MediaPacket;

    fn write_header(&mut self) -> MediaResult<()>;
    /// Output stream time base (valid after `write_header`).
    fn stream_time_base(&self) -> Rational;
    fn write_packet(&mut self, packet: Self::Packet) -> MediaResult<()>;
    fn write_trailer(&mut self) -> MediaResult<()>;
}

/// Factory for every stateful object in one transcode job.
///
/// Errors should already be in the media taxonomy (`SourceUnreadable`,
/// `HardwareInitFailed`, `FilterGraphInitFailed`, `DecodeFailed`,
/// `EncodeFailed`); the job wraps anything else by stage.
pub trait TranscodeBackend {
    type Packet: MediaPacket;
    type Frame: MediaFrame;
    type Input: PacketSource<Packet = Self::Packet>;
    type Decoder: FrameDecoder<Packet = Self::Packet, Frame = Self::Frame>;
    type Graph: FrameFilterGraph<Frame = Self::Frame>;
    type Encoder: FrameEncoder<Frame = Self::Frame, Packet = Self::Packet>;
    type Output: PacketSink<Packet = Self::Packet>;

    fn name(&self) -> &'static str;

    /// Create a device context for `kind`.
    fn create_device(&self, kind: DeviceKind) -> MediaResult<DeviceContext>;

    /// Whether a decoder with this name can be opened.
    fn has_decoder(&self, name: &str) -> bool;

    /// Open the container and select the best video stream.
    fn open_input(&self, path: &Path) -> MediaResult<(Self::Input, SourceStream)>;

    /// Pixel formats `choice` can output, in preference order.
    fn decoder_formats(&self, choice: &DecoderChoice, source: &SourceStream) -> Vec<PixelFormat>;

    fn open_decoder(
        &self,
        input: &mut Self::Input,
        source: &SourceStream,
        choice: &DecoderChoice,
        format: FormatChoice,
        device: Option<&DeviceContext>,
    ) -> MediaResult<Self::Decoder>;

    /// The decoder's hardware frame pool, allocating one explicitly when the
    /// decoder did not create it on open. `None` defers to the first frame.
    fn decoder_pool(
        &self,
        decoder: &mut Self::Decoder,
        ctx: &StreamContext,
        device: &DeviceContext,
    ) -> MediaResult<Option<FramePool>>;

    /// Pool a decoded hardware frame was allocated from.
    fn frame_pool(&self, frame: &Self::Frame, device: &DeviceContext) -> Option<FramePool>;

    fn build_filter_graph(
        &self,
        plan: &FilterPlan,
        device: Option<&DeviceContext>,
        decoder_pool: Option<&FramePool>,
    ) -> MediaResult<Self::Graph>;

    /// Allocate a fresh encoder-side pool for `width x height` surfaces.
    fn alloc_encoder_pool(
        &self,
        device: &DeviceContext,
        width: u32,
        height: u32,
        sw_format: PixelFormat,
    ) -> MediaResult<FramePool>;

    fn open_encoder(&self, ctx: &StreamContext, settings: &EncoderSettings) -> MediaResult<Self::Encoder>;

    fn open_output(
        &self,
        path: &Path,
        source: &Path,
        encoder: &Self::Encoder,
        ctx: &StreamContext,
    ) -> MediaResult<Self::Output>;
}
