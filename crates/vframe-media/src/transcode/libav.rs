//! In-process libav backend with CUDA device and frame pools.
//!
//! Everything stays on the GPU on the hardware path: NVDEC surfaces from
//! the decoder's frame pool enter a `hwdownload,format=nv12,crop,hwupload_cuda`
//! graph whose filters all reference the job's device, and NVENC consumes
//! frames from a separately allocated encoder pool.
//!
//! Native `AVBufferRef`s are owned by [`AvBuffer`], whose `Drop` unrefs
//! them; the job's `HardwareSession` holds them through `DeviceContext` and
//! `FramePool`.

use ffmpeg_next as ffmpeg;
use ffmpeg::ffi;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::ptr;
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::format::{PixelFormat, Rational};
use crate::hwcontext::{DeviceContext, DeviceKind, FramePool, HwResource, PoolRole};
use crate::transcode::backend::{
    FrameDecoder, FrameEncoder, FrameFilterGraph, MediaFrame, MediaPacket, PacketSink,
    PacketSource, Receive, SendStatus, SourceStream, Timestamped, TranscodeBackend,
};
use crate::transcode::context::{EncoderSettings, StreamContext};
use crate::transcode::filter::FilterPlan;
use crate::transcode::negotiate::{negotiate_pixel_format, AccelMode, DecoderChoice, FormatChoice};

/// Surfaces preallocated per pool.
const POOL_SIZE: i32 = 20;

/// Owned reference to a libav buffer (device or frames context).
#[derive(Debug)]
pub struct AvBuffer(*mut ffi::AVBufferRef);

// libav buffer references are atomically refcounted.
unsafe impl Send for AvBuffer {}
unsafe impl Sync for AvBuffer {}

impl AvBuffer {
    /// Take a new reference to `raw`.
    fn new_ref(raw: *mut ffi::AVBufferRef) -> Option<Self> {
        if raw.is_null() {
            return None;
        }
        let cloned = unsafe { ffi::av_buffer_ref(raw) };
        (!cloned.is_null()).then_some(Self(cloned))
    }

    fn as_ptr(&self) -> *mut ffi::AVBufferRef {
        self.0
    }
}

impl Drop for AvBuffer {
    fn drop(&mut self) {
        unsafe { ffi::av_buffer_unref(&mut self.0) };
    }
}

impl HwResource for AvBuffer {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn av_error(context: &str, code: i32) -> String {
    format!("{}: {}", context, ffmpeg::Error::from(code))
}

fn is_again(e: &ffmpeg::Error) -> bool {
    matches!(e, ffmpeg::Error::Other { errno } if *errno == ffmpeg::util::error::EAGAIN)
}

fn to_av_rational(r: Rational) -> ffmpeg::Rational {
    ffmpeg::Rational::new(r.num, r.den)
}

fn from_av_rational(r: ffmpeg::Rational) -> Rational {
    Rational::new(r.numerator(), r.denominator())
}

fn to_av_pixel(format: PixelFormat) -> ffmpeg::format::Pixel {
    use ffmpeg::format::Pixel;
    match format {
        PixelFormat::Yuv420p => Pixel::YUV420P,
        PixelFormat::Nv12 => Pixel::NV12,
        PixelFormat::Gray8 => Pixel::GRAY8,
        PixelFormat::Rgb24 => Pixel::RGB24,
        PixelFormat::Cuda => Pixel::CUDA,
        PixelFormat::Vaapi => Pixel::VAAPI,
    }
}

fn from_av_pixel(format: ffmpeg::format::Pixel) -> Option<PixelFormat> {
    use ffmpeg::format::Pixel;
    match format {
        Pixel::YUV420P | Pixel::YUVJ420P => Some(PixelFormat::Yuv420p),
        Pixel::NV12 => Some(PixelFormat::Nv12),
        Pixel::GRAY8 => Some(PixelFormat::Gray8),
        Pixel::RGB24 => Some(PixelFormat::Rgb24),
        Pixel::CUDA => Some(PixelFormat::Cuda),
        Pixel::VAAPI => Some(PixelFormat::Vaapi),
        _ => None,
    }
}

fn device_buffer(device: &DeviceContext) -> MediaResult<&AvBuffer> {
    device
        .resource::<AvBuffer>()
        .ok_or_else(|| MediaError::hardware_init_failed("device was not created by the libav backend"))
}

/// Allocate and initialise a frames context on `device`.
fn alloc_frames_ctx(device: &AvBuffer, kind: DeviceKind, width: u32, height: u32, sw_format: PixelFormat) -> MediaResult<AvBuffer> {
    unsafe {
        let raw = ffi::av_hwframe_ctx_alloc(device.as_ptr());
        if raw.is_null() {
            return Err(MediaError::hardware_init_failed("av_hwframe_ctx_alloc returned null"));
        }
        let frames = AvBuffer(raw);
        let ctx = (*frames.as_ptr()).data as *mut ffi::AVHWFramesContext;
        let hw_format = match kind {
            DeviceKind::Cuda => PixelFormat::Cuda,
            DeviceKind::Vaapi => PixelFormat::Vaapi,
        };
        (*ctx).format = to_av_pixel(hw_format).into();
        (*ctx).sw_format = to_av_pixel(sw_format).into();
        (*ctx).width = width as i32;
        (*ctx).height = height as i32;
        (*ctx).initial_pool_size = POOL_SIZE;
        let ret = ffi::av_hwframe_ctx_init(frames.as_ptr());
        if ret < 0 {
            return Err(MediaError::hardware_init_failed(av_error("av_hwframe_ctx_init", ret)));
        }
        Ok(frames)
    }
}

/// Compressed packet of the selected stream.
pub struct AvPacket(ffmpeg::Packet);

impl Timestamped for AvPacket {
    fn timestamp(&self) -> Option<i64> {
        self.0.pts()
    }

    fn set_timestamp(&mut self, ts: Option<i64>) {
        self.0.set_pts(ts);
        self.0.set_dts(ts);
    }
}

impl MediaPacket for AvPacket {
    fn rescale(&mut self, from: Rational, to: Rational) {
        self.0.rescale_ts(to_av_rational(from), to_av_rational(to));
    }
}

/// Decoded or filtered video frame (device or host memory).
pub struct AvFrame(ffmpeg::frame::Video);

impl Timestamped for AvFrame {
    fn timestamp(&self) -> Option<i64> {
        self.0.pts()
    }

    fn set_timestamp(&mut self, ts: Option<i64>) {
        self.0.set_pts(ts);
    }
}

impl MediaFrame for AvFrame {
    fn width(&self) -> u32 {
        self.0.width()
    }

    fn height(&self) -> u32 {
        self.0.height()
    }

    fn format(&self) -> PixelFormat {
        from_av_pixel(self.0.format()).unwrap_or(PixelFormat::Yuv420p)
    }
}

pub struct AvInput {
    ictx: ffmpeg::format::context::Input,
    stream_index: usize,
}

impl PacketSource for AvInput {
    type Packet = AvPacket;

    fn read_packet(&mut self) -> MediaResult<Option<AvPacket>> {
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.ictx) {
                Ok(()) if packet.stream() == self.stream_index => return Ok(Some(AvPacket(packet))),
                Ok(()) => continue,
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => return Err(MediaError::decode_failed(format!("read packet: {}", e))),
            }
        }
    }
}

/// State the `get_format` callback reads through `AVCodecContext::opaque`.
struct FormatHooks {
    device: Option<DeviceKind>,
    /// Explicitly allocated decoder pool handed out during negotiation
    frames: Option<AvBuffer>,
}

/// libav's format callback, delegating the decision to
/// [`negotiate_pixel_format`].
unsafe extern "C" fn negotiate_format(
    ctx: *mut ffi::AVCodecContext,
    formats: *const ffi::AVPixelFormat,
) -> ffi::AVPixelFormat {
    let mut offered = Vec::new();
    let mut cursor = formats;
    while *cursor != ffi::AVPixelFormat::AV_PIX_FMT_NONE {
        if let Some(format) = from_av_pixel(ffmpeg::format::Pixel::from(*cursor)) {
            offered.push(format);
        }
        cursor = cursor.add(1);
    }

    let hooks = (*ctx).opaque as *const FormatHooks;
    let device = if hooks.is_null() { None } else { (*hooks).device };
    match negotiate_pixel_format(&offered, device) {
        Ok(choice) => {
            if choice.is_hardware() && !hooks.is_null() {
                if let Some(frames) = &(*hooks).frames {
                    ffi::av_buffer_unref(&mut (*ctx).hw_frames_ctx);
                    (*ctx).hw_frames_ctx = ffi::av_buffer_ref(frames.as_ptr());
                }
            }
            to_av_pixel(choice.format()).into()
        }
        Err(_) => ffi::AVPixelFormat::AV_PIX_FMT_NONE,
    }
}

pub struct AvDecoder {
    decoder: ffmpeg::decoder::Video,
    // Dropped after the decoder, which may still call back into it.
    hooks: Box<FormatHooks>,
}

impl FrameDecoder for AvDecoder {
    type Packet = AvPacket;
    type Frame = AvFrame;

    fn send_packet(&mut self, packet: Option<&AvPacket>) -> MediaResult<SendStatus> {
        let sent = match packet {
            Some(packet) => self.decoder.send_packet(&packet.0),
            None => self.decoder.send_eof(),
        };
        match sent {
            Ok(()) => Ok(SendStatus::Accepted),
            Err(e) if is_again(&e) => Ok(SendStatus::Full),
            Err(ffmpeg::Error::Eof) => Ok(SendStatus::Accepted),
            Err(e) => Err(MediaError::decode_failed(format!("send packet: {}", e))),
        }
    }

    fn receive_frame(&mut self) -> MediaResult<Receive<AvFrame>> {
        let mut frame = ffmpeg::frame::Video::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Receive::Item(AvFrame(frame))),
            Err(e) if is_again(&e) => Ok(Receive::Again),
            Err(ffmpeg::Error::Eof) => Ok(Receive::Eof),
            Err(e) => Err(MediaError::decode_failed(format!("receive frame: {}", e))),
        }
    }
}

pub struct AvFilterGraph {
    graph: ffmpeg::filter::Graph,
}

impl FrameFilterGraph for AvFilterGraph {
    type Frame = AvFrame;

    fn push_frame(&mut self, frame: Option<AvFrame>) -> MediaResult<()> {
        let mut source = self
            .graph
            .get("in")
            .ok_or_else(|| MediaError::encode_failed("filter graph has no source"))?;
        let pushed = match frame {
            Some(frame) => source.source().add(&frame.0),
            None => source.source().flush(),
        };
        pushed.map_err(|e| MediaError::encode_failed(format!("push frame: {}", e)))
    }

    fn pull_frame(&mut self) -> MediaResult<Receive<AvFrame>> {
        let mut sink = self
            .graph
            .get("out")
            .ok_or_else(|| MediaError::encode_failed("filter graph has no sink"))?;
        let mut frame = ffmpeg::frame::Video::empty();
        match sink.sink().frame(&mut frame) {
            Ok(()) => Ok(Receive::Item(AvFrame(frame))),
            Err(e) if is_again(&e) => Ok(Receive::Again),
            Err(ffmpeg::Error::Eof) => Ok(Receive::Eof),
            Err(e) => Err(MediaError::encode_failed(format!("pull frame: {}", e))),
        }
    }
}

pub struct AvEncoder {
    encoder: ffmpeg::encoder::video::Encoder,
    codec: ffmpeg::Codec,
    time_base: Rational,
}

impl FrameEncoder for AvEncoder {
    type Frame = AvFrame;
    type Packet = AvPacket;

    fn send_frame(&mut self, frame: Option<&AvFrame>) -> MediaResult<SendStatus> {
        let sent = match frame {
            Some(frame) => self.encoder.send_frame(&frame.0),
            None => self.encoder.send_eof(),
        };
        match sent {
            Ok(()) => Ok(SendStatus::Accepted),
            Err(e) if is_again(&e) => Ok(SendStatus::Full),
            Err(ffmpeg::Error::Eof) => Ok(SendStatus::Accepted),
            Err(e) => Err(MediaError::encode_failed(format!("send frame: {}", e))),
        }
    }

    fn receive_packet(&mut self) -> MediaResult<Receive<AvPacket>> {
        let mut packet = ffmpeg::Packet::empty();
        match self.encoder.receive_packet(&mut packet) {
            Ok(()) => Ok(Receive::Item(AvPacket(packet))),
            Err(e) if is_again(&e) => Ok(Receive::Again),
            Err(ffmpeg::Error::Eof) => Ok(Receive::Eof),
            Err(e) => Err(MediaError::encode_failed(format!("receive packet: {}", e))),
        }
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }
}

pub struct AvOutput {
    octx: ffmpeg::format::context::Output,
    path: PathBuf,
}

impl PacketSink for AvOutput {
    type Packet = AvPacket;

    fn write_header(&mut self) -> MediaResult<()> {
        self.octx
            .write_header()
            .map_err(|e| MediaError::encode_failed(format!("{}: write header: {}", self.path.display(), e)))
    }

    fn stream_time_base(&self) -> Rational {
        self.octx
            .stream(0)
            .map(|s| from_av_rational(s.time_base()))
            .unwrap_or(Rational::new(1, 90_000))
    }

    fn write_packet(&mut self, mut packet: AvPacket) -> MediaResult<()> {
        packet.0.set_stream(0);
        packet
            .0
            .write_interleaved(&mut self.octx)
            .map_err(|e| MediaError::encode_failed(format!("write packet: {}", e)))
    }

    fn write_trailer(&mut self) -> MediaResult<()> {
        self.octx
            .write_trailer()
            .map_err(|e| MediaError::encode_failed(format!("write trailer: {}", e)))
    }
}

/// libav transcode backend.
#[derive(Debug, Clone, Copy)]
pub struct LibavBackend;

impl LibavBackend {
    pub fn new() -> MediaResult<Self> {
        ffmpeg::init().map_err(|e| MediaError::internal(format!("libav init: {}", e)))?;
        Ok(Self)
    }
}

impl TranscodeBackend for LibavBackend {
    type Packet = AvPacket;
    type Frame = AvFrame;
    type Input = AvInput;
    type Decoder = AvDecoder;
    type Graph = AvFilterGraph;
    type Encoder = AvEncoder;
    type Output = AvOutput;

    fn name(&self) -> &'static str {
        "libav"
    }

    fn create_device(&self, kind: DeviceKind) -> MediaResult<DeviceContext> {
        let device_type = match kind {
            DeviceKind::Cuda => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA,
            DeviceKind::Vaapi => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI,
        };
        let mut raw: *mut ffi::AVBufferRef = ptr::null_mut();
        let ret = unsafe {
            ffi::av_hwdevice_ctx_create(&mut raw, device_type, ptr::null(), ptr::null_mut(), 0)
        };
        if ret < 0 || raw.is_null() {
            return Err(MediaError::hardware_init_failed(av_error("av_hwdevice_ctx_create", ret)));
        }
        Ok(DeviceContext::new(kind, AvBuffer(raw)))
    }

    fn has_decoder(&self, name: &str) -> bool {
        ffmpeg::decoder::find_by_name(name).is_some()
    }

    fn open_input(&self, path: &Path) -> MediaResult<(AvInput, SourceStream)> {
        let ictx = ffmpeg::format::input(&path)
            .map_err(|e| MediaError::source_unreadable(path, e.to_string()))?;
        let has_audio = ictx.streams().best(ffmpeg::media::Type::Audio).is_some();
        let stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| MediaError::source_unreadable(path, "no video stream"))?;
        let params = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| MediaError::source_unreadable(path, e.to_string()))?;

        let duration = if ictx.duration() > 0 {
            ictx.duration() as f64 / 1_000_000.0
        } else {
            0.0
        };
        let frames = stream.frames();
        let source = SourceStream {
            index: stream.index(),
            codec: params.id().name().to_string(),
            width: params.width(),
            height: params.height(),
            pix_fmt: from_av_pixel(params.format()),
            time_base: from_av_rational(stream.time_base()),
            frame_rate: from_av_rational(stream.avg_frame_rate()),
            sample_aspect_ratio: from_av_rational(params.aspect_ratio()),
            frame_count: (frames > 0).then_some(frames as u64),
            duration,
            has_audio,
        };
        let stream_index = source.index;
        Ok((AvInput { ictx, stream_index }, source))
    }

    fn decoder_formats(&self, choice: &DecoderChoice, source: &SourceStream) -> Vec<PixelFormat> {
        let software = source.pix_fmt.unwrap_or(PixelFormat::Yuv420p);
        if choice.hardware {
            vec![PixelFormat::Cuda, PixelFormat::Nv12, software]
        } else {
            vec![software]
        }
    }

    fn open_decoder(
        &self,
        input: &mut AvInput,
        _source: &SourceStream,
        choice: &DecoderChoice,
        format: FormatChoice,
        device: Option<&DeviceContext>,
    ) -> MediaResult<AvDecoder> {
        let stream = input
            .ictx
            .stream(input.stream_index)
            .ok_or_else(|| MediaError::decode_failed("selected stream disappeared"))?;
        let mut ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| MediaError::decode_failed(format!("decoder parameters: {}", e)))?;
        let codec = ffmpeg::decoder::find_by_name(&choice.name)
            .ok_or_else(|| MediaError::decode_failed(format!("decoder {} not found", choice.name)))?;

        let mut hooks = Box::new(FormatHooks {
            device: None,
            frames: None,
        });
        if let (Some(device), true) = (device, format.is_hardware()) {
            let buffer = device_buffer(device)?;
            hooks.device = Some(device.kind());
            unsafe {
                let raw = ctx.as_mut_ptr();
                (*raw).hw_device_ctx = ffi::av_buffer_ref(buffer.as_ptr());
                (*raw).opaque = hooks.as_mut() as *mut FormatHooks as *mut std::ffi::c_void;
                (*raw).get_format = Some(negotiate_format);
            }
        }

        let decoder = ctx
            .decoder()
            .open_as(codec)
            .and_then(|opened| opened.video())
            .map_err(|e| MediaError::decode_failed(format!("open {}: {}", choice.name, e)))?;
        debug!(decoder = %choice.name, hardware = format.is_hardware(), "Opened libav decoder");
        Ok(AvDecoder { decoder, hooks })
    }

    fn decoder_pool(
        &self,
        decoder: &mut AvDecoder,
        ctx: &StreamContext,
        device: &DeviceContext,
    ) -> MediaResult<Option<FramePool>> {
        let existing = unsafe { (*decoder.decoder.as_ptr()).hw_frames_ctx };
        if let Some(frames) = AvBuffer::new_ref(existing) {
            return Ok(Some(FramePool::new(
                PoolRole::Decoder,
                device,
                ctx.width,
                ctx.height,
                ctx.sw_format,
                frames,
            )));
        }

        // hwaccel decoders create their pool during the first get_format;
        // hand them one up front instead.
        let frames = alloc_frames_ctx(device_buffer(device)?, device.kind(), ctx.width, ctx.height, ctx.sw_format)?;
        let pool_ref = AvBuffer::new_ref(frames.as_ptr())
            .ok_or_else(|| MediaError::hardware_init_failed("av_buffer_ref failed"))?;
        decoder.hooks.frames = Some(pool_ref);
        Ok(Some(FramePool::new(
            PoolRole::Decoder,
            device,
            ctx.width,
            ctx.height,
            ctx.sw_format,
            frames,
        )))
    }

    fn frame_pool(&self, frame: &AvFrame, device: &DeviceContext) -> Option<FramePool> {
        let raw = unsafe { (*frame.0.as_ptr()).hw_frames_ctx };
        AvBuffer::new_ref(raw).map(|frames| {
            FramePool::new(
                PoolRole::Decoder,
                device,
                frame.0.width(),
                frame.0.height(),
                PixelFormat::Nv12,
                frames,
            )
        })
    }

    fn build_filter_graph(
        &self,
        plan: &FilterPlan,
        device: Option<&DeviceContext>,
        decoder_pool: Option<&FramePool>,
    ) -> MediaResult<AvFilterGraph> {
        let fail = |what: &str, e: ffmpeg::Error| MediaError::filter_graph_init_failed(format!("{}: {}", what, e));
        let buffer = ffmpeg::filter::find("buffer")
            .ok_or_else(|| MediaError::filter_graph_init_failed("buffer filter missing"))?;
        let buffersink = ffmpeg::filter::find("buffersink")
            .ok_or_else(|| MediaError::filter_graph_init_failed("buffersink filter missing"))?;

        let mut graph = ffmpeg::filter::Graph::new();
        graph
            .add(&buffer, "in", &plan.source_args())
            .map_err(|e| fail("buffer source", e))?;
        graph.add(&buffersink, "out", "").map_err(|e| fail("buffer sink", e))?;

        if plan.mode == AccelMode::Hardware {
            let pool = decoder_pool
                .ok_or_else(|| MediaError::filter_graph_init_failed("hardware graph without a decoder pool"))?;
            let frames = pool
                .resource::<AvBuffer>()
                .ok_or_else(|| MediaError::filter_graph_init_failed("pool was not created by the libav backend"))?;
            let mut source = graph
                .get("in")
                .ok_or_else(|| MediaError::filter_graph_init_failed("buffer source missing"))?;
            unsafe {
                let params = ffi::av_buffersrc_parameters_alloc();
                if params.is_null() {
                    return Err(MediaError::filter_graph_init_failed("av_buffersrc_parameters_alloc failed"));
                }
                (*params).hw_frames_ctx = frames.as_ptr();
                let ret = ffi::av_buffersrc_parameters_set(source.as_mut_ptr(), params);
                ffi::av_free(params as *mut std::ffi::c_void);
                if ret < 0 {
                    return Err(MediaError::filter_graph_init_failed(av_error("av_buffersrc_parameters_set", ret)));
                }
            }
        }

        // Software frames may arrive in any planar layout; the encoder wants yuv420p.
        let chain = match plan.mode {
            AccelMode::Hardware => plan.chain(),
            AccelMode::Software => format!("{},format=yuv420p", plan.chain()),
        };
        graph
            .output("in", 0)
            .and_then(|parser| parser.input("out", 0))
            .and_then(|parser| parser.parse(&chain))
            .map_err(|e| fail("parse chain", e))?;

        if let Some(device) = device.filter(|_| plan.mode == AccelMode::Hardware) {
            let buffer = device_buffer(device)?;
            unsafe {
                let raw = graph.as_mut_ptr();
                for i in 0..(*raw).nb_filters as usize {
                    let filter = *(*raw).filters.add(i);
                    ffi::av_buffer_unref(&mut (*filter).hw_device_ctx);
                    (*filter).hw_device_ctx = ffi::av_buffer_ref(buffer.as_ptr());
                }
            }
        }

        graph.validate().map_err(|e| fail("configure graph", e))?;
        debug!(chain = %chain, "Configured libav filter graph");
        Ok(AvFilterGraph { graph })
    }

    fn alloc_encoder_pool(
        &self,
        device: &DeviceContext,
        width: u32,
        height: u32,
        sw_format: PixelFormat,
    ) -> MediaResult<FramePool> {
        let frames = alloc_frames_ctx(device_buffer(device)?, device.kind(), width, height, sw_format)?;
        Ok(FramePool::new(PoolRole::Encoder, device, width, height, sw_format, frames))
    }

    fn open_encoder(&self, ctx: &StreamContext, settings: &EncoderSettings) -> MediaResult<AvEncoder> {
        let codec = ffmpeg::encoder::find_by_name(&settings.codec)
            .ok_or_else(|| MediaError::encode_failed(format!("encoder {} not found", settings.codec)))?;
        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| MediaError::encode_failed(format!("encoder context: {}", e)))?;

        encoder.set_width(ctx.width);
        encoder.set_height(ctx.height);
        encoder.set_time_base(to_av_rational(ctx.time_base));
        encoder.set_frame_rate(Some(to_av_rational(ctx.frame_rate)));
        encoder.set_aspect_ratio(to_av_rational(ctx.sample_aspect_ratio));
        encoder.set_bit_rate(settings.bitrate as usize);
        encoder.set_max_b_frames(settings.max_b_frames as usize);
        match &ctx.hw_frames {
            Some(pool) => {
                let frames = pool
                    .resource::<AvBuffer>()
                    .ok_or_else(|| MediaError::hardware_init_failed("pool was not created by the libav backend"))?;
                encoder.set_format(to_av_pixel(ctx.pix_fmt));
                unsafe {
                    (*encoder.as_mut_ptr()).hw_frames_ctx = ffi::av_buffer_ref(frames.as_ptr());
                }
            }
            None => encoder.set_format(ffmpeg::format::Pixel::YUV420P),
        }

        let mut options = ffmpeg::Dictionary::new();
        options.set("preset", &settings.preset);
        let encoder = encoder
            .open_as_with(codec, options)
            .map_err(|e| MediaError::encode_failed(format!("open {}: {}", settings.codec, e)))?;
        Ok(AvEncoder {
            encoder,
            codec,
            time_base: ctx.time_base,
        })
    }

    fn open_output(
        &self,
        path: &Path,
        _source: &Path,
        encoder: &AvEncoder,
        ctx: &StreamContext,
    ) -> MediaResult<AvOutput> {
        let mut octx = ffmpeg::format::output(&path)
            .map_err(|e| MediaError::encode_failed(format!("{}: {}", path.display(), e)))?;
        let mut stream = octx
            .add_stream(encoder.codec)
            .map_err(|e| MediaError::encode_failed(format!("add stream: {}", e)))?;
        stream.set_time_base(to_av_rational(ctx.time_base));
        stream.set_parameters(&encoder.encoder);
        Ok(AvOutput {
            octx,
            path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_mapping() {
        for format in [
            PixelFormat::Yuv420p,
            PixelFormat::Nv12,
            PixelFormat::Cuda,
            PixelFormat::Gray8,
        ] {
            assert_eq!(from_av_pixel(to_av_pixel(format)), Some(format));
        }
    }

    #[test]
    fn test_decoder_formats_offer_device_first() {
        let backend = LibavBackend;
        let source = SourceStream {
            index: 0,
            codec: "h264".to_string(),
            width: 640,
            height: 360,
            pix_fmt: Some(PixelFormat::Yuv420p),
            time_base: Rational::new(1, 15360),
            frame_rate: Rational::new(30, 1),
            sample_aspect_ratio: Rational::new(1, 1),
            frame_count: None,
            duration: 1.0,
            has_audio: false,
        };
        let hw = DecoderChoice {
            name: "h264_cuvid".to_string(),
            codec: "h264".to_string(),
            hardware: true,
        };
        assert_eq!(backend.decoder_formats(&hw, &source)[0], PixelFormat::Cuda);
        assert_eq!(
            backend.decoder_formats(&DecoderChoice::software("h264"), &source),
            vec![PixelFormat::Yuv420p]
        );
    }
}
