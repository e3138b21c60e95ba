//! FFmpeg CLI backend.
//!
//! Two processes bracket the in-process stages:
//!
//! ```text
//! ffmpeg [-hwaccel cuda -c:v h264_cuvid] -i src -f rawvideo -pix_fmt yuv420p pipe:1
//!     -> frame-sized chunks -> crop -> ffmpeg -f rawvideo -i pipe:0 -i src -c:v h264_nvenc ... out.mp4
//! ```
//!
//! Frames cross the pipes as planar `yuv420p`, so the decoder side always
//! negotiates a software format. A CUDA device still selects NVDEC in the
//! upstream process and NVENC in the downstream one. Frame buffers are
//! `Arc<[u8]>` shared between packet, frame and (for a no-op crop) the
//! filtered frame.
//!
//! # Timing
//!
//! Raw video carries no timestamps. The upstream process emits decoded
//! frames in presentation order and [`PipeInput`] stamps them one tick of
//! `1/frame_rate` apart. The downstream process reads frames back to back at
//! `-framerate`, so the output is constant frame rate at the source's
//! nominal rate: a variable-frame-rate source is re-timed. [`PipeSink`]
//! places every packet in the frame slot its timestamp names, repeating a
//! frame over skipped slots and dropping one whose slot is already written.

use std::any::Any;
use std::collections::VecDeque;
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{ChildStdin, ChildStdout};
use std::sync::Arc;
use tracing::{debug, info, warn};
use vframe_models::CropRect;

use crate::command::{FfmpegChild, FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::format::{rescale_ts, PixelFormat, Rational};
use crate::hwcontext::{DeviceContext, DeviceKind, FramePool, HwResource};
use crate::probe::probe_video;
use crate::transcode::backend::{
    FrameDecoder, FrameEncoder, FrameFilterGraph, MediaFrame, MediaPacket, PacketSink,
    PacketSource, Receive, SendStatus, SourceStream, Timestamped, TranscodeBackend,
};
use crate::transcode::context::{EncoderSettings, StreamContext};
use crate::transcode::filter::{FilterNode, FilterPlan};
use crate::transcode::negotiate::{AccelMode, DecoderChoice, FormatChoice};

/// Encoder the downstream process needs before a CUDA device is reported.
const NVENC_PROBE: &str = "h264_nvenc";

/// Longest run of skipped slots filled by repetition; larger jumps restart
/// the clock.
const MAX_FILL_SLOTS: i64 = 300;

/// One raw frame read from the upstream process.
#[derive(Debug, Clone)]
pub struct PipePacket {
    data: Arc<[u8]>,
    pts: Option<i64>,
}

impl Timestamped for PipePacket {
    fn timestamp(&self) -> Option<i64> {
        self.pts
    }

    fn set_timestamp(&mut self, ts: Option<i64>) {
        self.pts = ts;
    }
}

impl MediaPacket for PipePacket {
    fn rescale(&mut self, from: Rational, to: Rational) {
        self.pts = self.pts.map(|pts| rescale_ts(pts, from, to));
    }
}

/// Planar `yuv420p` frame in host memory.
#[derive(Debug, Clone)]
pub struct PipeFrame {
    data: Arc<[u8]>,
    width: u32,
    height: u32,
    pts: Option<i64>,
}

impl PipeFrame {
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Timestamped for PipeFrame {
    fn timestamp(&self) -> Option<i64> {
        self.pts
    }

    fn set_timestamp(&mut self, ts: Option<i64>) {
        self.pts = ts;
    }
}

impl MediaFrame for PipeFrame {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> PixelFormat {
        PixelFormat::Yuv420p
    }
}

/// Marker for a device verified through the FFmpeg binary.
#[derive(Debug)]
struct CliDevice;

impl HwResource for CliDevice {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Demuxer side: the upstream decode process, started by `open_decoder`.
pub struct PipeInput {
    path: PathBuf,
    frame_bytes: usize,
    next_pts: i64,
    process: Option<FfmpegChild>,
    stdout: Option<ChildStdout>,
}

impl PipeInput {
    /// Fill `buf` completely; `Ok(false)` on a clean end of stream.
    fn read_frame(&mut self, buf: &mut [u8]) -> MediaResult<bool> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| MediaError::invalid_state("decode process not started"))?;
        let mut filled = 0;
        while filled < buf.len() {
            match stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            return Ok(false);
        }
        if filled < buf.len() {
            return Err(MediaError::decode_failed(format!(
                "truncated frame from decoder ({} of {} bytes)",
                filled,
                buf.len()
            )));
        }
        Ok(true)
    }
}

impl PacketSource for PipeInput {
    type Packet = PipePacket;

    fn read_packet(&mut self) -> MediaResult<Option<PipePacket>> {
        let mut buf = vec![0u8; self.frame_bytes];
        if self.read_frame(&mut buf)? {
            let pts = self.next_pts;
            self.next_pts += 1;
            return Ok(Some(PipePacket {
                data: Arc::from(buf),
                pts: Some(pts),
            }));
        }

        self.stdout = None;
        if let Some(mut process) = self.process.take() {
            process.wait().map_err(|e| {
                MediaError::decode_failed(format!("{}: {}", self.path.display(), e.reason()))
            })?;
        }
        Ok(None)
    }
}

/// Raw video needs no decoding; packets become frames unchanged.
pub struct PipeDecoder {
    width: u32,
    height: u32,
    pending: VecDeque<PipeFrame>,
    draining: bool,
}

impl FrameDecoder for PipeDecoder {
    type Packet = PipePacket;
    type Frame = PipeFrame;

    fn send_packet(&mut self, packet: Option<&PipePacket>) -> MediaResult<SendStatus> {
        match packet {
            Some(packet) => self.pending.push_back(PipeFrame {
                data: packet.data.clone(),
                width: self.width,
                height: self.height,
                pts: packet.pts,
            }),
            None => self.draining = true,
        }
        Ok(SendStatus::Accepted)
    }

    fn receive_frame(&mut self) -> MediaResult<Receive<PipeFrame>> {
        Ok(match self.pending.pop_front() {
            Some(frame) => Receive::Item(frame),
            None if self.draining => Receive::Eof,
            None => Receive::Again,
        })
    }
}

/// In-process crop over planar frames.
pub struct PipeCropGraph {
    crop: CropRect,
    source_width: u32,
    source_height: u32,
    passthrough: bool,
    pending: VecDeque<PipeFrame>,
    eos: bool,
}

impl FrameFilterGraph for PipeCropGraph {
    type Frame = PipeFrame;

    fn push_frame(&mut self, frame: Option<PipeFrame>) -> MediaResult<()> {
        let Some(frame) = frame else {
            self.eos = true;
            return Ok(());
        };
        if self.eos {
            return Err(MediaError::encode_failed("frame pushed after end of stream"));
        }
        if frame.width != self.source_width || frame.height != self.source_height {
            return Err(MediaError::encode_failed(format!(
                "frame is {}x{}, graph expects {}x{}",
                frame.width, frame.height, self.source_width, self.source_height
            )));
        }
        let filtered = if self.passthrough {
            frame
        } else {
            PipeFrame {
                data: Arc::from(crop_yuv420p(&frame.data, frame.width, frame.height, self.crop)?),
                width: self.crop.width,
                height: self.crop.height,
                pts: frame.pts,
            }
        };
        self.pending.push_back(filtered);
        Ok(())
    }

    fn pull_frame(&mut self) -> MediaResult<Receive<PipeFrame>> {
        Ok(match self.pending.pop_front() {
            Some(frame) => Receive::Item(frame),
            None if self.eos => Receive::Eof,
            None => Receive::Again,
        })
    }
}

/// Hands cropped frames to the downstream process, which encodes and muxes.
pub struct PipeEncoder {
    settings: EncoderSettings,
    width: u32,
    height: u32,
    frame_rate: Rational,
    time_base: Rational,
    pending: VecDeque<PipePacket>,
    draining: bool,
}

impl FrameEncoder for PipeEncoder {
    type Frame = PipeFrame;
    type Packet = PipePacket;

    fn send_frame(&mut self, frame: Option<&PipeFrame>) -> MediaResult<SendStatus> {
        match frame {
            Some(frame) => {
                if frame.width != self.width || frame.height != self.height {
                    return Err(MediaError::encode_failed(format!(
                        "frame is {}x{}, encoder expects {}x{}",
                        frame.width, frame.height, self.width, self.height
                    )));
                }
                self.pending.push_back(PipePacket {
                    data: frame.data.clone(),
                    pts: frame.pts,
                });
            }
            None => self.draining = true,
        }
        Ok(SendStatus::Accepted)
    }

    fn receive_packet(&mut self) -> MediaResult<Receive<PipePacket>> {
        Ok(match self.pending.pop_front() {
            Some(packet) => Receive::Item(packet),
            None if self.draining => Receive::Eof,
            None => Receive::Again,
        })
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }
}

/// Maps packet timestamps onto the constant-rate frame slots of the pipe.
#[derive(Debug, Clone)]
pub(crate) struct FrameClock {
    time_base: Rational,
    slot_base: Rational,
    next_slot: Option<i64>,
}

impl FrameClock {
    pub(crate) fn new(time_base: Rational, frame_rate: Rational) -> Self {
        Self {
            time_base,
            slot_base: frame_rate.invert(),
            next_slot: None,
        }
    }

    /// How many times the packet stamped `pts` is written: once in order,
    /// more over a gap, zero when its slot is already taken. A packet
    /// without a timestamp takes the next slot.
    pub(crate) fn copies(&mut self, pts: Option<i64>) -> usize {
        let slot = pts.map(|pts| rescale_ts(pts, self.time_base, self.slot_base));
        let (slot, copies) = match (slot, self.next_slot) {
            (Some(slot), Some(next)) if slot < next => return 0,
            (Some(slot), Some(next)) if slot - next >= MAX_FILL_SLOTS => {
                warn!(slot, expected = next, "Timestamp jump in encoder input, restarting frame clock");
                (slot, 1)
            }
            (Some(slot), Some(next)) => (slot, (slot - next + 1) as usize),
            (Some(slot), None) => (slot, 1),
            (None, next) => (next.unwrap_or(0), 1),
        };
        self.next_slot = Some(slot + 1);
        copies
    }
}

/// The downstream encode/mux process.
pub struct PipeSink {
    command: FfmpegCommand,
    runner: FfmpegRunner,
    time_base: Rational,
    clock: FrameClock,
    process: Option<FfmpegChild>,
    stdin: Option<ChildStdin>,
}

impl PipeSink {
    /// Surface the process's own error when a write fails.
    fn write_error(&mut self, e: std::io::Error) -> MediaError {
        self.stdin = None;
        match self.process.take() {
            Some(mut process) => match process.wait() {
                Err(process_error) => MediaError::encode_failed(process_error.reason()),
                Ok(()) => MediaError::encode_failed(format!("encoder pipe closed: {}", e)),
            },
            None => MediaError::encode_failed(format!("encoder pipe closed: {}", e)),
        }
    }
}

impl PacketSink for PipeSink {
    type Packet = PipePacket;

    fn write_header(&mut self) -> MediaResult<()> {
        let mut process = self.runner.spawn(&self.command)?;
        self.stdin = process.take_stdin();
        if self.stdin.is_none() {
            return Err(MediaError::encode_failed("encode process has no stdin"));
        }
        self.process = Some(process);
        Ok(())
    }

    fn stream_time_base(&self) -> Rational {
        self.time_base
    }

    fn write_packet(&mut self, packet: PipePacket) -> MediaResult<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(MediaError::invalid_state("encode process not started"));
        };
        let copies = self.clock.copies(packet.pts);
        if copies != 1 {
            debug!(pts = ?packet.pts, copies, "Re-timed frame for constant-rate output");
        }
        let mut result = Ok(());
        for _ in 0..copies {
            result = stdin.write_all(&packet.data);
            if result.is_err() {
                break;
            }
        }
        result.map_err(|e| self.write_error(e))
    }

    fn write_trailer(&mut self) -> MediaResult<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush().map_err(|e| self.write_error(e))?;
        }
        match self.process.take() {
            Some(mut process) => process.wait().map_err(|e| MediaError::encode_failed(e.reason())),
            None => Err(MediaError::invalid_state("encode process not started")),
        }
    }
}

/// FFmpeg CLI transcode backend.
#[derive(Debug, Clone)]
pub struct PipeBackend {
    runner: FfmpegRunner,
}

impl PipeBackend {
    /// Locate `ffmpeg` in PATH.
    pub fn new() -> MediaResult<Self> {
        Ok(Self {
            runner: FfmpegRunner::new()?,
        })
    }

    pub fn with_runner(runner: FfmpegRunner) -> Self {
        Self { runner }
    }
}

impl TranscodeBackend for PipeBackend {
    type Packet = PipePacket;
    type Frame = PipeFrame;
    type Input = PipeInput;
    type Decoder = PipeDecoder;
    type Graph = PipeCropGraph;
    type Encoder = PipeEncoder;
    type Output = PipeSink;

    fn name(&self) -> &'static str {
        "pipe"
    }

    fn create_device(&self, kind: DeviceKind) -> MediaResult<DeviceContext> {
        if kind != DeviceKind::Cuda {
            return Err(MediaError::hardware_init_failed(format!(
                "{} devices are not supported by the pipe backend",
                kind
            )));
        }
        let hwaccels = self
            .runner
            .hwaccels()
            .map_err(|e| MediaError::hardware_init_failed(e.reason()))?;
        if !hwaccels.iter().any(|h| h == kind.ffmpeg_name()) {
            return Err(MediaError::hardware_init_failed(format!(
                "ffmpeg reports no {} hwaccel",
                kind
            )));
        }
        if !self.runner.has_encoder(NVENC_PROBE).unwrap_or(false) {
            return Err(MediaError::hardware_init_failed(format!(
                "ffmpeg was built without {}",
                NVENC_PROBE
            )));
        }
        info!(kind = %kind, "Using FFmpeg hardware device");
        Ok(DeviceContext::new(kind, CliDevice))
    }

    fn has_decoder(&self, name: &str) -> bool {
        self.runner.has_decoder(name).unwrap_or(false)
    }

    fn open_input(&self, path: &Path) -> MediaResult<(PipeInput, SourceStream)> {
        let info = probe_video(path).map_err(|e| MediaError::source_unreadable(path, e.reason()))?;
        if info.width == 0 || info.height == 0 {
            return Err(MediaError::source_unreadable(path, "video stream has no dimensions"));
        }
        let frame_rate = info.frame_rate.or(Rational::new(30, 1));
        let frame_bytes = PixelFormat::Yuv420p
            .frame_bytes(info.width, info.height)
            .ok_or_else(|| MediaError::internal("yuv420p has no host layout"))?;

        let source = SourceStream {
            index: 0,
            codec: info.codec.clone(),
            width: info.width,
            height: info.height,
            pix_fmt: PixelFormat::from_ffmpeg_name(&info.pix_fmt),
            // Packets are numbered by frame, one tick per frame.
            time_base: frame_rate.invert(),
            frame_rate,
            sample_aspect_ratio: info.sample_aspect_ratio,
            frame_count: info.frame_count,
            duration: info.duration,
            has_audio: info.has_audio,
        };
        let input = PipeInput {
            path: path.to_path_buf(),
            frame_bytes,
            next_pts: 0,
            process: None,
            stdout: None,
        };
        Ok((input, source))
    }

    fn decoder_formats(&self, _choice: &DecoderChoice, _source: &SourceStream) -> Vec<PixelFormat> {
        vec![PixelFormat::Yuv420p]
    }

    fn open_decoder(
        &self,
        input: &mut PipeInput,
        source: &SourceStream,
        choice: &DecoderChoice,
        format: FormatChoice,
        device: Option<&DeviceContext>,
    ) -> MediaResult<PipeDecoder> {
        if format != FormatChoice::Software(PixelFormat::Yuv420p) {
            return Err(MediaError::decode_failed(format!(
                "pipe backend cannot output {}",
                format.format()
            )));
        }

        let mut cmd = FfmpegCommand::new(&input.path, "pipe:1");
        if let (Some(device), true) = (device, choice.hardware) {
            cmd = cmd.hwaccel(device.kind().ffmpeg_name(), Some(&choice.name));
        }
        let cmd = cmd
            .output_args(["-map", "0:v:0", "-fps_mode", "passthrough"])
            .raw_video(PixelFormat::Yuv420p.ffmpeg_name());

        let mut process = self.runner.spawn(&cmd)?;
        input.stdout = process.take_stdout();
        if input.stdout.is_none() {
            return Err(MediaError::decode_failed("decode process has no stdout"));
        }
        input.process = Some(process);
        debug!(decoder = %choice.name, "Started decode process");

        Ok(PipeDecoder {
            width: source.width,
            height: source.height,
            pending: VecDeque::new(),
            draining: false,
        })
    }

    fn decoder_pool(
        &self,
        _decoder: &mut PipeDecoder,
        _ctx: &StreamContext,
        _device: &DeviceContext,
    ) -> MediaResult<Option<FramePool>> {
        Ok(None)
    }

    fn frame_pool(&self, _frame: &PipeFrame, _device: &DeviceContext) -> Option<FramePool> {
        None
    }

    fn build_filter_graph(
        &self,
        plan: &FilterPlan,
        _device: Option<&DeviceContext>,
        _decoder_pool: Option<&FramePool>,
    ) -> MediaResult<PipeCropGraph> {
        if plan.mode != AccelMode::Software || plan.nodes != [FilterNode::Crop(plan.crop)] {
            return Err(MediaError::filter_graph_init_failed(format!(
                "pipe backend only crops host frames, got '{}'",
                plan.chain()
            )));
        }
        if plan.source.pix_fmt != PixelFormat::Yuv420p {
            return Err(MediaError::filter_graph_init_failed(format!(
                "pipe backend cannot crop {}",
                plan.source.pix_fmt
            )));
        }
        Ok(PipeCropGraph {
            crop: plan.crop,
            source_width: plan.source.width,
            source_height: plan.source.height,
            passthrough: plan.crop.is_full_frame(plan.source.width, plan.source.height),
            pending: VecDeque::new(),
            eos: false,
        })
    }

    fn alloc_encoder_pool(
        &self,
        _device: &DeviceContext,
        _width: u32,
        _height: u32,
        _sw_format: PixelFormat,
    ) -> MediaResult<FramePool> {
        Err(MediaError::hardware_init_failed(
            "pipe backend exchanges host frames and has no device frame pools",
        ))
    }

    fn open_encoder(&self, ctx: &StreamContext, settings: &EncoderSettings) -> MediaResult<PipeEncoder> {
        if ctx.is_hardware() {
            return Err(MediaError::encode_failed("pipe backend cannot encode device frames"));
        }
        Ok(PipeEncoder {
            settings: settings.clone(),
            width: ctx.width,
            height: ctx.height,
            frame_rate: ctx.frame_rate,
            time_base: ctx.time_base,
            pending: VecDeque::new(),
            draining: false,
        })
    }

    fn open_output(
        &self,
        path: &Path,
        source: &Path,
        encoder: &PipeEncoder,
        _ctx: &StreamContext,
    ) -> MediaResult<PipeSink> {
        let command = FfmpegCommand::new("pipe:0", path)
            .input_args([
                "-f".to_string(),
                "rawvideo".to_string(),
                "-pix_fmt".to_string(),
                PixelFormat::Yuv420p.ffmpeg_name().to_string(),
                "-video_size".to_string(),
                format!("{}x{}", encoder.width, encoder.height),
                "-framerate".to_string(),
                encoder.frame_rate.to_string(),
            ])
            .extra_input(Vec::<String>::new(), source)
            .output_args(["-map", "0:v:0", "-map", "1:a:0?", "-c:a", "copy"])
            .output_args(encoder.settings.to_ffmpeg_args())
            .output_args(["-pix_fmt", "yuv420p", "-movflags", "+faststart", "-f", "mp4"]);

        Ok(PipeSink {
            command,
            runner: self.runner.clone(),
            time_base: encoder.time_base,
            clock: FrameClock::new(encoder.time_base, encoder.frame_rate),
            process: None,
            stdin: None,
        })
    }
}

/// Crop a planar 4:2:0 frame. Offsets and dimensions must be even.
pub(crate) fn crop_yuv420p(data: &[u8], width: u32, height: u32, crop: CropRect) -> MediaResult<Vec<u8>> {
    let expected = PixelFormat::Yuv420p
        .frame_bytes(width, height)
        .ok_or_else(|| MediaError::internal("yuv420p has no host layout"))?;
    if data.len() != expected {
        return Err(MediaError::encode_failed(format!(
            "frame has {} bytes, expected {}",
            data.len(),
            expected
        )));
    }
    if !crop.fits_within(width, height) || crop.x % 2 != 0 || crop.y % 2 != 0 {
        return Err(MediaError::encode_failed(format!(
            "crop {} not applicable to {}x{}",
            crop, width, height
        )));
    }

    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let (x, y) = (crop.x as usize, crop.y as usize);
    let (out_w, out_h) = (crop.width as usize, crop.height as usize);
    let (out_cw, out_ch) = (out_w.div_ceil(2), out_h.div_ceil(2));

    let mut out = Vec::with_capacity(out_w * out_h + 2 * out_cw * out_ch);
    copy_plane(&data[..w * h], w, x, y, out_w, out_h, &mut out);
    let u = &data[w * h..w * h + cw * ch];
    let v = &data[w * h + cw * ch..];
    copy_plane(u, cw, x / 2, y / 2, out_cw, out_ch, &mut out);
    copy_plane(v, cw, x / 2, y / 2, out_cw, out_ch, &mut out);
    Ok(out)
}

fn copy_plane(plane: &[u8], stride: usize, x: usize, y: usize, w: usize, h: usize, out: &mut Vec<u8>) {
    for row in plane.chunks_exact(stride).skip(y).take(h) {
        out.extend_from_slice(&row[x..x + w]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 4x4 frame: luma value = row*4+col, U = 100+i, V = 200+i.
    fn frame_4x4() -> Vec<u8> {
        let mut data: Vec<u8> = (0..16).collect();
        data.extend([100, 101, 102, 103]);
        data.extend([200, 201, 202, 203]);
        data
    }

    #[test]
    fn test_crop_planes() {
        let out = crop_yuv420p(&frame_4x4(), 4, 4, CropRect::new(2, 2, 2, 2)).unwrap();
        assert_eq!(out, vec![10, 11, 14, 15, 103, 203]);
    }

    #[test]
    fn test_full_crop_is_identity() {
        let data = frame_4x4();
        let out = crop_yuv420p(&data, 4, 4, CropRect::full_frame(4, 4)).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_crop_rejects_bad_input() {
        assert!(crop_yuv420p(&[0; 10], 4, 4, CropRect::full_frame(4, 4)).is_err());
        assert!(crop_yuv420p(&frame_4x4(), 4, 4, CropRect::new(1, 0, 2, 2)).is_err());
    }

    #[test]
    fn test_decoder_passes_frames_through() {
        let mut decoder = PipeDecoder {
            width: 4,
            height: 4,
            pending: VecDeque::new(),
            draining: false,
        };
        let packet = PipePacket {
            data: Arc::from(frame_4x4()),
            pts: Some(7),
        };
        assert_eq!(decoder.send_packet(Some(&packet)).unwrap(), SendStatus::Accepted);
        match decoder.receive_frame().unwrap() {
            Receive::Item(frame) => {
                assert_eq!(frame.timestamp(), Some(7));
                assert!(Arc::ptr_eq(&frame.data, &packet.data));
            }
            other => panic!("expected a frame, got {:?}", other),
        }
        assert!(matches!(decoder.receive_frame().unwrap(), Receive::Again));
        decoder.send_packet(None).unwrap();
        assert!(matches!(decoder.receive_frame().unwrap(), Receive::Eof));
    }

    #[test]
    fn test_graph_shares_buffer_on_noop_crop() {
        let mut graph = PipeCropGraph {
            crop: CropRect::full_frame(4, 4),
            source_width: 4,
            source_height: 4,
            passthrough: true,
            pending: VecDeque::new(),
            eos: false,
        };
        let data: Arc<[u8]> = Arc::from(frame_4x4());
        graph
            .push_frame(Some(PipeFrame {
                data: data.clone(),
                width: 4,
                height: 4,
                pts: Some(0),
            }))
            .unwrap();
        match graph.pull_frame().unwrap() {
            Receive::Item(frame) => assert!(Arc::ptr_eq(&frame.data, &data)),
            other => panic!("expected a frame, got {:?}", other),
        }
        graph.push_frame(None).unwrap();
        assert!(matches!(graph.pull_frame().unwrap(), Receive::Eof));
    }

    #[test]
    fn test_frame_timestamps_reach_encoder_unchanged() {
        let mut encoder = PipeEncoder {
            settings: EncoderSettings::from_policy(&vframe_models::EncoderPolicy::default(), false),
            width: 4,
            height: 4,
            frame_rate: Rational::new(25, 1),
            time_base: Rational::new(1, 25),
            pending: VecDeque::new(),
            draining: false,
        };
        for pts in [0, 1, 3] {
            let frame = PipeFrame {
                data: Arc::from(frame_4x4()),
                width: 4,
                height: 4,
                pts: Some(pts),
            };
            encoder.send_frame(Some(&frame)).unwrap();
        }
        encoder.send_frame(None).unwrap();

        let mut stamps = Vec::new();
        while let Receive::Item(packet) = encoder.receive_packet().unwrap() {
            stamps.push(packet.timestamp());
        }
        assert_eq!(stamps, vec![Some(0), Some(1), Some(3)]);
        assert!(matches!(encoder.receive_packet().unwrap(), Receive::Eof));
    }

    #[test]
    fn test_frame_clock_fills_gaps_and_drops_repeats() {
        let mut clock = FrameClock::new(Rational::new(1, 25), Rational::new(25, 1));
        let copies: Vec<usize> = [0, 1, 3, 3, 4, 2]
            .into_iter()
            .map(|pts| clock.copies(Some(pts)))
            .collect();
        // Slot 2 repeats the frame stamped 3; the late duplicate and the
        // out-of-order frame are dropped.
        assert_eq!(copies, vec![1, 1, 2, 0, 1, 0]);
        assert_eq!(clock.copies(None), 1);
        assert_eq!(clock.copies(Some(6)), 1);
    }

    #[test]
    fn test_frame_clock_rescales_to_frame_slots() {
        // 90 kHz timestamps at 25 fps: 3600 ticks per frame.
        let mut clock = FrameClock::new(Rational::new(1, 90_000), Rational::new(25, 1));
        assert_eq!(clock.copies(Some(3600)), 1);
        assert_eq!(clock.copies(Some(7200)), 1);
        assert_eq!(clock.copies(Some(7250)), 0);
        assert_eq!(clock.copies(Some(14_400)), 2);
    }

    #[test]
    fn test_frame_clock_restarts_after_jump() {
        let mut clock = FrameClock::new(Rational::new(1, 25), Rational::new(25, 1));
        assert_eq!(clock.copies(Some(0)), 1);
        assert_eq!(clock.copies(Some(10_000)), 1);
        assert_eq!(clock.copies(Some(10_001)), 1);
    }
}
