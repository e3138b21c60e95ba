//! Deterministic stand-ins for FFmpeg and the GPU.
//!
//! - [`SimBackend`]: in-memory [`TranscodeBackend`] with configurable codec
//!   delays, timestamp jitter, hardware availability, lazy frame pools and
//!   failure injection. Every native handle it hands out is tracked in a
//!   [`ResourceLedger`], together with the flush sequence and the
//!   timestamps that reached the muxer.
//! - [`SyntheticVideo`] and [`SyntheticLibrary`]: procedurally rendered clips
//!   (borders, scene cuts, black title cards, flicker) behind
//!   [`FrameSampler`]. Outputs written by [`SimBackend`] resolve back to a
//!   cropped view of their source, so a whole job can run without media
//!   files.

use image::{Rgb, RgbImage};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::f64::consts::PI;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use vframe_models::CropRect;

use crate::error::{MediaError, MediaResult};
use crate::format::{rescale_ts, PixelFormat, Rational};
use crate::frame::GrayFrame;
use crate::hwcontext::{DeviceContext, DeviceKind, FramePool, HwResource, PoolRole};
use crate::probe::VideoInfo;
use crate::sampler::FrameSampler;
use crate::transcode::backend::{
    FrameDecoder, FrameEncoder, FrameFilterGraph, MediaFrame, MediaPacket, PacketSink,
    PacketSource, Receive, SendStatus, SourceStream, Timestamped, TranscodeBackend,
};
use crate::transcode::context::{EncoderSettings, StreamContext};
use crate::transcode::filter::FilterPlan;
use crate::transcode::negotiate::{AccelMode, DecoderChoice, FormatChoice};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Native handle categories handed out by [`SimBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimResourceKind {
    Device,
    DecoderPool,
    EncoderPool,
    Decoder,
    FilterGraph,
    Encoder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Created(SimResourceKind),
    Released(SimResourceKind),
    DecoderFlushStarted,
    DecoderDrained,
    GraphFlushStarted,
    GraphDrained,
    EncoderFlushStarted,
    EncoderDrained,
    HeaderWritten,
    TrailerWritten,
}

impl SimEvent {
    fn is_lifecycle(&self) -> bool {
        !matches!(self, SimEvent::Created(_) | SimEvent::Released(_))
    }
}

/// Shared record of everything a [`SimBackend`] did.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    events: Mutex<Vec<SimEvent>>,
    written_pts: Mutex<Vec<i64>>,
}

impl ResourceLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, event: SimEvent) {
        lock(&self.events).push(event);
    }

    fn track(self: &Arc<Self>, kind: SimResourceKind) -> SimResource {
        self.record(SimEvent::Created(kind));
        SimResource {
            kind,
            ledger: self.clone(),
        }
    }

    pub fn events(&self) -> Vec<SimEvent> {
        lock(&self.events).clone()
    }

    /// Flush, header and trailer events in the order they happened.
    pub fn lifecycle(&self) -> Vec<SimEvent> {
        lock(&self.events)
            .iter()
            .filter(|e| e.is_lifecycle())
            .cloned()
            .collect()
    }

    pub fn created(&self, kind: SimResourceKind) -> usize {
        lock(&self.events)
            .iter()
            .filter(|e| **e == SimEvent::Created(kind))
            .count()
    }

    pub fn released(&self, kind: SimResourceKind) -> usize {
        lock(&self.events)
            .iter()
            .filter(|e| **e == SimEvent::Released(kind))
            .count()
    }

    /// Handles created and not yet released.
    pub fn live(&self) -> usize {
        let events = lock(&self.events);
        let created = events.iter().filter(|e| matches!(e, SimEvent::Created(_))).count();
        let released = events.iter().filter(|e| matches!(e, SimEvent::Released(_))).count();
        created.saturating_sub(released)
    }

    /// Timestamps of every packet the muxer accepted, in write order.
    pub fn written_pts(&self) -> Vec<i64> {
        lock(&self.written_pts).clone()
    }
}

/// Tracked native handle; records its release on drop.
#[derive(Debug)]
pub struct SimResource {
    kind: SimResourceKind,
    ledger: Arc<ResourceLedger>,
}

impl HwResource for SimResource {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for SimResource {
    fn drop(&mut self) {
        self.ledger.record(SimEvent::Released(self.kind));
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Failure injected into a [`SimBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFailure {
    OpenInput,
    CreateDevice,
    DecoderPool,
    FilterGraph,
    EncoderPool,
    OpenEncoder,
    /// Decoder rejects the packet with this index
    DecodeAt(u64),
    /// Filter graph rejects the frame with this index
    FilterAt(u64),
    /// Encoder rejects the frame with this index
    EncodeAt(u64),
    /// Muxer fails on the n-th packet (0-based)
    WriteAt(u64),
    Trailer,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
    pub frame_rate: Rational,
    pub time_base: Rational,
    /// Muxer stream time base
    pub output_time_base: Rational,
    /// Device creation succeeds
    pub hardware_available: bool,
    /// `has_decoder` reports cuvid decoders
    pub hw_decoder_available: bool,
    /// cuvid decoders open successfully
    pub hw_decoder_opens: bool,
    /// Decoder creates its pool with the first frame instead of on request
    pub lazy_pool: bool,
    pub decoder_delay: usize,
    pub graph_delay: usize,
    pub encoder_delay: usize,
    /// Encoder answers `Full` to every n-th send
    pub encoder_full_every: Option<u64>,
    /// Every n-th packet repeats the previous timestamp
    pub jitter_every: Option<u64>,
    pub fail_at: Option<SimFailure>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            codec: "h264".to_string(),
            width: 64,
            height: 48,
            frame_count: 100,
            frame_rate: Rational::new(25, 1),
            time_base: Rational::new(1, 90_000),
            output_time_base: Rational::new(1, 12_800),
            hardware_available: true,
            hw_decoder_available: true,
            hw_decoder_opens: true,
            lazy_pool: false,
            decoder_delay: 2,
            graph_delay: 1,
            encoder_delay: 3,
            encoder_full_every: None,
            jitter_every: None,
            fail_at: None,
        }
    }
}

impl SimConfig {
    /// No device; every job takes the software path.
    pub fn software_only() -> Self {
        Self {
            hardware_available: false,
            ..Default::default()
        }
    }

    fn fails(&self, failure: SimFailure) -> bool {
        self.fail_at == Some(failure)
    }

    fn ticks_per_frame(&self) -> i64 {
        let num = self.time_base.den as i64 * self.frame_rate.den as i64;
        let den = self.time_base.num as i64 * self.frame_rate.num as i64;
        if den <= 0 {
            return 1;
        }
        (num / den).max(1)
    }
}

// ---------------------------------------------------------------------------
// Packets and frames
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SimPacket {
    pts: Option<i64>,
    index: u64,
    /// Top-left corner of the picture in source coordinates
    origin: (u32, u32),
}

impl SimPacket {
    pub fn index(&self) -> u64 {
        self.index
    }
}

impl Timestamped for SimPacket {
    fn timestamp(&self) -> Option<i64> {
        self.pts
    }

    fn set_timestamp(&mut self, ts: Option<i64>) {
        self.pts = ts;
    }
}

impl MediaPacket for SimPacket {
    fn rescale(&mut self, from: Rational, to: Rational) {
        self.pts = self.pts.map(|pts| rescale_ts(pts, from, to));
    }
}

#[derive(Debug, Clone)]
pub struct SimFrame {
    pts: Option<i64>,
    index: u64,
    width: u32,
    height: u32,
    format: PixelFormat,
    origin: (u32, u32),
    /// Pool a device frame was allocated from
    pool: Option<FramePool>,
}

impl Timestamped for SimFrame {
    fn timestamp(&self) -> Option<i64> {
        self.pts
    }

    fn set_timestamp(&mut self, ts: Option<i64>) {
        self.pts = ts;
    }
}

impl MediaFrame for SimFrame {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> PixelFormat {
        self.format
    }
}

// ---------------------------------------------------------------------------
// Pipeline objects
// ---------------------------------------------------------------------------

pub struct SimInput {
    frame_count: u64,
    ticks_per_frame: i64,
    jitter_every: Option<u64>,
    next: u64,
    last_pts: Option<i64>,
}

impl PacketSource for SimInput {
    type Packet = SimPacket;

    fn read_packet(&mut self) -> MediaResult<Option<SimPacket>> {
        if self.next >= self.frame_count {
            return Ok(None);
        }
        let index = self.next;
        self.next += 1;
        let jitter = matches!(self.jitter_every, Some(n) if n > 0 && index > 0 && index % n == 0);
        let pts = match (jitter, self.last_pts) {
            (true, Some(last)) => last,
            _ => index as i64 * self.ticks_per_frame,
        };
        self.last_pts = Some(pts);
        Ok(Some(SimPacket {
            pts: Some(pts),
            index,
            origin: (0, 0),
        }))
    }
}

pub struct SimDecoder {
    width: u32,
    height: u32,
    format: PixelFormat,
    delay: usize,
    queue: VecDeque<SimFrame>,
    draining: bool,
    drained: bool,
    device: Option<DeviceContext>,
    pool: Option<FramePool>,
    lazy_pool: bool,
    fail_at: Option<u64>,
    ledger: Arc<ResourceLedger>,
    _resource: SimResource,
}

impl SimDecoder {
    fn frame_pool(&mut self) -> MediaResult<Option<FramePool>> {
        if !self.format.is_hardware() {
            return Ok(None);
        }
        if self.pool.is_none() && self.lazy_pool {
            let device = self
                .device
                .as_ref()
                .ok_or_else(|| MediaError::hardware_init_failed("device frames without a device"))?;
            self.pool = Some(FramePool::new(
                PoolRole::Decoder,
                device,
                self.width,
                self.height,
                PixelFormat::Nv12,
                self.ledger.track(SimResourceKind::DecoderPool),
            ));
        }
        match &self.pool {
            Some(pool) => Ok(Some(pool.clone())),
            None => Err(MediaError::hardware_init_failed("decoder has no frame pool")),
        }
    }
}

impl FrameDecoder for SimDecoder {
    type Packet = SimPacket;
    type Frame = SimFrame;

    fn send_packet(&mut self, packet: Option<&SimPacket>) -> MediaResult<SendStatus> {
        let Some(packet) = packet else {
            if !self.draining {
                self.draining = true;
                self.ledger.record(SimEvent::DecoderFlushStarted);
            }
            return Ok(SendStatus::Accepted);
        };
        if self.draining {
            return Err(MediaError::decode_failed("packet sent after flush"));
        }
        if self.fail_at == Some(packet.index) {
            return Err(MediaError::decode_failed(format!(
                "corrupt packet {}",
                packet.index
            )));
        }
        let pool = self.frame_pool()?;
        self.queue.push_back(SimFrame {
            pts: packet.pts,
            index: packet.index,
            width: self.width,
            height: self.height,
            format: self.format,
            origin: packet.origin,
            pool,
        });
        Ok(SendStatus::Accepted)
    }

    fn receive_frame(&mut self) -> MediaResult<Receive<SimFrame>> {
        if self.queue.len() > self.delay || (self.draining && !self.queue.is_empty()) {
            if let Some(frame) = self.queue.pop_front() {
                return Ok(Receive::Item(frame));
            }
        }
        if !self.draining {
            return Ok(Receive::Again);
        }
        if !self.drained {
            self.drained = true;
            self.ledger.record(SimEvent::DecoderDrained);
        }
        Ok(Receive::Eof)
    }
}

pub struct SimGraph {
    crop: CropRect,
    source_width: u32,
    source_height: u32,
    input_format: PixelFormat,
    output_format: PixelFormat,
    delay: usize,
    queue: VecDeque<SimFrame>,
    eos: bool,
    drained: bool,
    fail_at: Option<u64>,
    ledger: Arc<ResourceLedger>,
    _device: Option<DeviceContext>,
    _decoder_pool: Option<FramePool>,
    _resource: SimResource,
}

impl FrameFilterGraph for SimGraph {
    type Frame = SimFrame;

    fn push_frame(&mut self, frame: Option<SimFrame>) -> MediaResult<()> {
        let Some(frame) = frame else {
            if !self.eos {
                self.eos = true;
                self.ledger.record(SimEvent::GraphFlushStarted);
            }
            return Ok(());
        };
        if self.eos {
            return Err(MediaError::encode_failed("frame pushed after end of stream"));
        }
        if frame.format != self.input_format
            || frame.width != self.source_width
            || frame.height != self.source_height
        {
            return Err(MediaError::encode_failed(format!(
                "graph expects {}x{} {}, got {}x{} {}",
                self.source_width,
                self.source_height,
                self.input_format,
                frame.width,
                frame.height,
                frame.format
            )));
        }
        if self.fail_at == Some(frame.index) {
            return Err(MediaError::encode_failed(format!("filter error on frame {}", frame.index)));
        }
        self.queue.push_back(SimFrame {
            pts: frame.pts,
            index: frame.index,
            width: self.crop.width,
            height: self.crop.height,
            format: self.output_format,
            origin: (frame.origin.0 + self.crop.x, frame.origin.1 + self.crop.y),
            pool: None,
        });
        Ok(())
    }

    fn pull_frame(&mut self) -> MediaResult<Receive<SimFrame>> {
        if self.queue.len() > self.delay || (self.eos && !self.queue.is_empty()) {
            if let Some(frame) = self.queue.pop_front() {
                return Ok(Receive::Item(frame));
            }
        }
        if !self.eos {
            return Ok(Receive::Again);
        }
        if !self.drained {
            self.drained = true;
            self.ledger.record(SimEvent::GraphDrained);
        }
        Ok(Receive::Eof)
    }
}

pub struct SimEncoder {
    codec: String,
    width: u32,
    height: u32,
    format: PixelFormat,
    time_base: Rational,
    delay: usize,
    full_every: Option<u64>,
    attempts: u64,
    refused_last: bool,
    queue: VecDeque<SimPacket>,
    draining: bool,
    drained: bool,
    fail_at: Option<u64>,
    ledger: Arc<ResourceLedger>,
    _pool: Option<FramePool>,
    _resource: SimResource,
}

impl SimEncoder {
    pub fn codec(&self) -> &str {
        &self.codec
    }
}

impl FrameEncoder for SimEncoder {
    type Frame = SimFrame;
    type Packet = SimPacket;

    fn send_frame(&mut self, frame: Option<&SimFrame>) -> MediaResult<SendStatus> {
        let Some(frame) = frame else {
            if !self.draining {
                self.draining = true;
                self.ledger.record(SimEvent::EncoderFlushStarted);
            }
            return Ok(SendStatus::Accepted);
        };
        if self.draining {
            return Err(MediaError::encode_failed("frame sent after flush"));
        }
        self.attempts += 1;
        if let Some(n) = self.full_every {
            if n > 0 && self.attempts % n == 0 && !self.refused_last {
                self.refused_last = true;
                return Ok(SendStatus::Full);
            }
        }
        self.refused_last = false;
        if frame.format != self.format || frame.width != self.width || frame.height != self.height {
            return Err(MediaError::encode_failed(format!(
                "encoder expects {}x{} {}, got {}x{} {}",
                self.width, self.height, self.format, frame.width, frame.height, frame.format
            )));
        }
        if self.fail_at == Some(frame.index) {
            return Err(MediaError::encode_failed(format!("encoder error on frame {}", frame.index)));
        }
        self.queue.push_back(SimPacket {
            pts: frame.pts,
            index: frame.index,
            origin: frame.origin,
        });
        Ok(SendStatus::Accepted)
    }

    fn receive_packet(&mut self) -> MediaResult<Receive<SimPacket>> {
        if self.queue.len() > self.delay || (self.draining && !self.queue.is_empty()) {
            if let Some(packet) = self.queue.pop_front() {
                return Ok(Receive::Item(packet));
            }
        }
        if !self.draining {
            return Ok(Receive::Again);
        }
        if !self.drained {
            self.drained = true;
            self.ledger.record(SimEvent::EncoderDrained);
        }
        Ok(Receive::Eof)
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }
}

const SIM_MAGIC: &str = "vframe-sim";

/// Writes a small text description of the output instead of a container.
pub struct SimOutput {
    path: PathBuf,
    source: PathBuf,
    width: u32,
    height: u32,
    frame_rate: Rational,
    time_base: Rational,
    file: Option<File>,
    origin: Option<(u32, u32)>,
    packets: u64,
    fail_write_at: Option<u64>,
    fail_trailer: bool,
    ledger: Arc<ResourceLedger>,
}

impl PacketSink for SimOutput {
    type Packet = SimPacket;

    fn write_header(&mut self) -> MediaResult<()> {
        let mut file = File::create(&self.path)?;
        writeln!(file, "{}", SIM_MAGIC)?;
        writeln!(file, "source={}", self.source.display())?;
        writeln!(file, "size={}x{}", self.width, self.height)?;
        writeln!(file, "frame_rate={}", self.frame_rate)?;
        self.file = Some(file);
        self.ledger.record(SimEvent::HeaderWritten);
        Ok(())
    }

    fn stream_time_base(&self) -> Rational {
        self.time_base
    }

    fn write_packet(&mut self, packet: SimPacket) -> MediaResult<()> {
        if self.file.is_none() {
            return Err(MediaError::invalid_state("header not written"));
        }
        if self.fail_write_at == Some(self.packets) {
            return Err(MediaError::encode_failed("simulated muxer write failure"));
        }
        self.origin.get_or_insert(packet.origin);
        if let Some(pts) = packet.pts {
            lock(&self.ledger.written_pts).push(pts);
        }
        self.packets += 1;
        Ok(())
    }

    fn write_trailer(&mut self) -> MediaResult<()> {
        if self.fail_trailer {
            return Err(MediaError::encode_failed("simulated trailer failure"));
        }
        let mut file = self
            .file
            .take()
            .ok_or_else(|| MediaError::invalid_state("header not written"))?;
        let (x, y) = self.origin.unwrap_or((0, 0));
        writeln!(file, "frames={}", self.packets)?;
        writeln!(file, "origin={},{}", x, y)?;
        writeln!(file, "end")?;
        file.flush()?;
        self.ledger.record(SimEvent::TrailerWritten);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Deterministic in-memory transcode backend.
#[derive(Debug, Clone)]
pub struct SimBackend {
    config: SimConfig,
    ledger: Arc<ResourceLedger>,
    library: Option<Arc<SyntheticLibrary>>,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimBackend {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            ledger: ResourceLedger::new(),
            library: None,
        }
    }

    /// Take source dimensions and frame counts from `library`.
    pub fn with_library(mut self, library: Arc<SyntheticLibrary>) -> Self {
        self.library = Some(library);
        self
    }

    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.ledger
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    fn fail_index(&self, pick: fn(SimFailure) -> Option<u64>) -> Option<u64> {
        self.config.fail_at.and_then(pick)
    }
}

impl TranscodeBackend for SimBackend {
    type Packet = SimPacket;
    type Frame = SimFrame;
    type Input = SimInput;
    type Decoder = SimDecoder;
    type Graph = SimGraph;
    type Encoder = SimEncoder;
    type Output = SimOutput;

    fn name(&self) -> &'static str {
        "sim"
    }

    fn create_device(&self, kind: DeviceKind) -> MediaResult<DeviceContext> {
        if !self.config.hardware_available || self.config.fails(SimFailure::CreateDevice) {
            return Err(MediaError::hardware_init_failed(format!("no simulated {} device", kind)));
        }
        Ok(DeviceContext::new(kind, self.ledger.track(SimResourceKind::Device)))
    }

    fn has_decoder(&self, name: &str) -> bool {
        if name.ends_with("_cuvid") {
            return self.config.hw_decoder_available;
        }
        true
    }

    fn open_input(&self, path: &Path) -> MediaResult<(SimInput, SourceStream)> {
        if self.config.fails(SimFailure::OpenInput) {
            return Err(MediaError::source_unreadable(path, "simulated open failure"));
        }
        let (codec, width, height, frame_count, frame_rate) = match &self.library {
            Some(library) => {
                let video = library
                    .resolve(path)
                    .map_err(|e| MediaError::source_unreadable(path, e.reason()))?;
                if video.is_corrupt() {
                    return Err(MediaError::source_unreadable(path, "invalid data found when processing input"));
                }
                (video.codec.clone(), video.width, video.height, video.frame_count(), video.frame_rate)
            }
            None => (
                self.config.codec.clone(),
                self.config.width,
                self.config.height,
                self.config.frame_count,
                self.config.frame_rate,
            ),
        };
        let source = SourceStream {
            index: 0,
            codec,
            width,
            height,
            pix_fmt: Some(PixelFormat::Yuv420p),
            time_base: self.config.time_base,
            frame_rate,
            sample_aspect_ratio: Rational::new(1, 1),
            frame_count: Some(frame_count),
            duration: frame_count as f64 / frame_rate.as_f64().max(f64::EPSILON),
            has_audio: false,
        };
        let config = SimConfig {
            frame_rate,
            ..self.config.clone()
        };
        let input = SimInput {
            frame_count,
            ticks_per_frame: config.ticks_per_frame(),
            jitter_every: self.config.jitter_every,
            next: 0,
            last_pts: None,
        };
        Ok((input, source))
    }

    fn decoder_formats(&self, choice: &DecoderChoice, _source: &SourceStream) -> Vec<PixelFormat> {
        if choice.hardware {
            vec![PixelFormat::Cuda, PixelFormat::Nv12]
        } else {
            vec![PixelFormat::Yuv420p]
        }
    }

    fn open_decoder(
        &self,
        _input: &mut SimInput,
        source: &SourceStream,
        choice: &DecoderChoice,
        format: FormatChoice,
        device: Option<&DeviceContext>,
    ) -> MediaResult<SimDecoder> {
        if choice.hardware && !self.config.hw_decoder_opens {
            return Err(MediaError::decode_failed(format!("{}: cuvid session init failed", choice.name)));
        }
        if format.is_hardware() && device.is_none() {
            return Err(MediaError::hardware_init_failed("device format without a device"));
        }
        Ok(SimDecoder {
            width: source.width,
            height: source.height,
            format: format.format(),
            delay: self.config.decoder_delay,
            queue: VecDeque::new(),
            draining: false,
            drained: false,
            device: device.filter(|_| format.is_hardware()).cloned(),
            pool: None,
            lazy_pool: self.config.lazy_pool,
            fail_at: self.fail_index(|f| match f {
                SimFailure::DecodeAt(n) => Some(n),
                _ => None,
            }),
            ledger: self.ledger.clone(),
            _resource: self.ledger.track(SimResourceKind::Decoder),
        })
    }

    fn decoder_pool(
        &self,
        decoder: &mut SimDecoder,
        ctx: &StreamContext,
        device: &DeviceContext,
    ) -> MediaResult<Option<FramePool>> {
        if self.config.fails(SimFailure::DecoderPool) {
            return Err(MediaError::hardware_init_failed("simulated decoder pool allocation failure"));
        }
        if decoder.lazy_pool {
            return Ok(None);
        }
        let pool = FramePool::new(
            PoolRole::Decoder,
            device,
            ctx.width,
            ctx.height,
            ctx.sw_format,
            self.ledger.track(SimResourceKind::DecoderPool),
        );
        decoder.pool = Some(pool.clone());
        Ok(Some(pool))
    }

    fn frame_pool(&self, frame: &SimFrame, device: &DeviceContext) -> Option<FramePool> {
        frame
            .pool
            .as_ref()
            .filter(|pool| pool.device().same_device(device))
            .cloned()
    }

    fn build_filter_graph(
        &self,
        plan: &FilterPlan,
        device: Option<&DeviceContext>,
        decoder_pool: Option<&FramePool>,
    ) -> MediaResult<SimGraph> {
        if self.config.fails(SimFailure::FilterGraph) {
            return Err(MediaError::filter_graph_init_failed(format!(
                "simulated failure configuring '{}'",
                plan.chain()
            )));
        }
        if plan.mode == AccelMode::Hardware && device.is_none() {
            return Err(MediaError::filter_graph_init_failed("hardware chain without a device"));
        }
        Ok(SimGraph {
            crop: plan.crop,
            source_width: plan.source.width,
            source_height: plan.source.height,
            input_format: plan.source.pix_fmt,
            output_format: plan.sink_format,
            delay: self.config.graph_delay,
            queue: VecDeque::new(),
            eos: false,
            drained: false,
            fail_at: self.fail_index(|f| match f {
                SimFailure::FilterAt(n) => Some(n),
                _ => None,
            }),
            ledger: self.ledger.clone(),
            _device: device.cloned(),
            _decoder_pool: decoder_pool.cloned(),
            _resource: self.ledger.track(SimResourceKind::FilterGraph),
        })
    }

    fn alloc_encoder_pool(
        &self,
        device: &DeviceContext,
        width: u32,
        height: u32,
        sw_format: PixelFormat,
    ) -> MediaResult<FramePool> {
        if self.config.fails(SimFailure::EncoderPool) {
            return Err(MediaError::hardware_init_failed("simulated out of device memory"));
        }
        Ok(FramePool::new(
            PoolRole::Encoder,
            device,
            width,
            height,
            sw_format,
            self.ledger.track(SimResourceKind::EncoderPool),
        ))
    }

    fn open_encoder(&self, ctx: &StreamContext, settings: &EncoderSettings) -> MediaResult<SimEncoder> {
        if self.config.fails(SimFailure::OpenEncoder) {
            return Err(MediaError::encode_failed(format!("{}: simulated open failure", settings.codec)));
        }
        if ctx.is_hardware() && ctx.hw_frames.is_none() {
            return Err(MediaError::encode_failed("device frames without an encoder frame pool"));
        }
        Ok(SimEncoder {
            codec: settings.codec.clone(),
            width: ctx.width,
            height: ctx.height,
            format: ctx.pix_fmt,
            time_base: ctx.time_base,
            delay: self.config.encoder_delay,
            full_every: self.config.encoder_full_every,
            attempts: 0,
            refused_last: false,
            queue: VecDeque::new(),
            draining: false,
            drained: false,
            fail_at: self.fail_index(|f| match f {
                SimFailure::EncodeAt(n) => Some(n),
                _ => None,
            }),
            ledger: self.ledger.clone(),
            _pool: ctx.hw_frames.clone(),
            _resource: self.ledger.track(SimResourceKind::Encoder),
        })
    }

    fn open_output(
        &self,
        path: &Path,
        source: &Path,
        encoder: &SimEncoder,
        ctx: &StreamContext,
    ) -> MediaResult<SimOutput> {
        Ok(SimOutput {
            path: path.to_path_buf(),
            source: source.to_path_buf(),
            width: encoder.width,
            height: encoder.height,
            frame_rate: ctx.frame_rate,
            time_base: self.config.output_time_base,
            file: None,
            origin: None,
            packets: 0,
            fail_write_at: self.fail_index(|f| match f {
                SimFailure::WriteAt(n) => Some(n),
                _ => None,
            }),
            fail_trailer: self.config.fails(SimFailure::Trailer),
            ledger: self.ledger.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Synthetic clips
// ---------------------------------------------------------------------------

/// Period of the content wave, in source pixels.
const WAVE_PERIOD: f64 = 256.0;
const WAVE_AMPLITUDE: f64 = 80.0;
/// Phase advance of the wave at every scene cut.
const SCENE_PHASE_STEP: f64 = 0.6 * PI;
const TEXTURE_CELL: u32 = 4;
const TEXTURE_AMPLITUDE: f64 = 12.0;

/// Procedurally rendered clip.
///
/// Content is a horizontal wave with a fine checker texture; every scene
/// cut shifts the wave's phase. Pixels outside the content rectangle are
/// border, blackout intervals render fully black.
#[derive(Debug, Clone)]
pub struct SyntheticVideo {
    width: u32,
    height: u32,
    /// View offset into the original picture
    origin: (u32, u32),
    duration: f64,
    frame_rate: Rational,
    codec: String,
    /// Content box in original coordinates; `None` is borderless
    content: Option<CropRect>,
    border_level: u8,
    border_noise: u8,
    scene_cuts: Vec<f64>,
    blackouts: Vec<(f64, f64)>,
    flicker: u8,
    corrupt: bool,
    scan_fails: bool,
}

impl SyntheticVideo {
    pub fn new(width: u32, height: u32, duration: f64) -> Self {
        Self {
            width,
            height,
            origin: (0, 0),
            duration,
            frame_rate: Rational::new(25, 1),
            codec: "h264".to_string(),
            content: None,
            border_level: 0,
            border_noise: 0,
            scene_cuts: Vec::new(),
            blackouts: Vec::new(),
            flicker: 0,
            corrupt: false,
            scan_fails: false,
        }
    }

    pub fn with_frame_rate(mut self, frame_rate: Rational) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    /// Same border width on all four sides.
    pub fn with_border(self, px: u32) -> Self {
        let content = CropRect::new(
            px,
            px,
            self.width.saturating_sub(2 * px),
            self.height.saturating_sub(2 * px),
        );
        self.with_content(content)
    }

    pub fn with_content(mut self, content: CropRect) -> Self {
        self.content = Some(content);
        self
    }

    /// Border pixels alternate between the border level and `level + amplitude`.
    pub fn with_noisy_border(mut self, amplitude: u8) -> Self {
        self.border_noise = amplitude;
        self
    }

    pub fn with_border_level(mut self, level: u8) -> Self {
        self.border_level = level;
        self
    }

    pub fn with_scene_cuts(mut self, cuts: impl IntoIterator<Item = f64>) -> Self {
        self.scene_cuts = cuts.into_iter().collect();
        self.scene_cuts.sort_by(f64::total_cmp);
        self
    }

    /// Fully black frames in `[start, end)`.
    pub fn with_blackout(mut self, start: f64, end: f64) -> Self {
        self.blackouts.push((start, end));
        self
    }

    /// Odd frames are brighter by `amplitude`.
    pub fn with_flicker(mut self, amplitude: u8) -> Self {
        self.flicker = amplitude;
        self
    }

    /// Probing and opening fail.
    pub fn corrupt(mut self) -> Self {
        self.corrupt = true;
        self
    }

    /// The full-clip analysis scan fails; single-frame grabs still work.
    pub fn with_failing_scan(mut self) -> Self {
        self.scan_fails = true;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn fps(&self) -> f64 {
        self.frame_rate.as_f64()
    }

    pub fn frame_count(&self) -> u64 {
        (self.duration * self.fps()).round() as u64
    }

    pub fn scene_count(&self) -> usize {
        self.scene_cuts
            .iter()
            .filter(|&&c| c > 0.0 && c < self.duration)
            .count()
            + 1
    }

    pub fn is_corrupt(&self) -> bool {
        self.corrupt
    }

    /// Content box in this view's coordinates.
    pub fn content_rect(&self) -> CropRect {
        let Some(content) = self.content else {
            return CropRect::full_frame(self.width, self.height);
        };
        let (ox, oy) = self.origin;
        let left = content.x.max(ox) - ox;
        let top = content.y.max(oy) - oy;
        let right = content.right().min(ox + self.width).saturating_sub(ox);
        let bottom = content.bottom().min(oy + self.height).saturating_sub(oy);
        CropRect::from_edges(left, top, right.max(left), bottom.max(top))
    }

    /// View of `rect` (in this view's coordinates) lasting `duration`.
    pub fn cropped(&self, rect: CropRect) -> Self {
        let mut view = self.clone();
        view.origin = (self.origin.0 + rect.x, self.origin.1 + rect.y);
        view.width = rect.width;
        view.height = rect.height;
        view
    }

    fn with_duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    fn is_blackout(&self, t: f64) -> bool {
        self.blackouts.iter().any(|&(start, end)| t >= start && t < end)
    }

    fn wave_row(&self, t: f64, columns: &[u32]) -> Vec<f64> {
        let scene = self.scene_cuts.iter().filter(|&&c| c <= t).count();
        let phase = scene as f64 * SCENE_PHASE_STEP;
        let flicker = if (t * self.fps()).floor() as u64 % 2 == 1 {
            self.flicker as f64
        } else {
            0.0
        };
        columns
            .iter()
            .map(|&sx| 128.0 + WAVE_AMPLITUDE * (2.0 * PI * sx as f64 / WAVE_PERIOD + phase).sin() + flicker)
            .collect()
    }

    /// Luma at original coordinates `(sx, sy)`, given the precomputed wave.
    fn luma(&self, sx: u32, sy: u32, wave: f64) -> u8 {
        let inside = self
            .content
            .map_or(true, |c| sx >= c.x && sx < c.right() && sy >= c.y && sy < c.bottom());
        if !inside {
            let noise = if (sx * 7 + sy * 5) % 3 == 0 { self.border_noise } else { 0 };
            return self.border_level.saturating_add(noise);
        }
        let texture = if (sx / TEXTURE_CELL + sy / TEXTURE_CELL) % 2 == 0 {
            TEXTURE_AMPLITUDE
        } else {
            -TEXTURE_AMPLITUDE
        };
        (wave + texture).round().clamp(0.0, 255.0) as u8
    }

    /// Nearest-neighbour sample positions in original coordinates.
    fn sample_axis(&self, out: u32, size: u32, offset: u32) -> Vec<u32> {
        (0..out)
            .map(|i| {
                let pos = ((i as f64 + 0.5) * size as f64 / out as f64) as u32;
                pos.min(size.saturating_sub(1)) + offset
            })
            .collect()
    }

    fn render(&self, t: f64, width: u32, height: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        if self.is_blackout(t) {
            data.resize(width as usize * height as usize, 0);
            return data;
        }
        let xs = self.sample_axis(width, self.width, self.origin.0);
        let ys = self.sample_axis(height, self.height, self.origin.1);
        let wave = self.wave_row(t, &xs);
        for &sy in &ys {
            for (i, &sx) in xs.iter().enumerate() {
                data.push(self.luma(sx, sy, wave[i]));
            }
        }
        data
    }

    /// Grayscale frame at `t`, scaled to `width x height`.
    pub fn render_gray(&self, t: f64, width: u32, height: u32) -> MediaResult<GrayFrame> {
        GrayFrame::new(width, height, self.render(t, width, height))
    }

    /// Full-resolution frame at `t`.
    pub fn render_rgb(&self, t: f64) -> RgbImage {
        let luma = self.render(t, self.width, self.height);
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let v = luma[y as usize * self.width as usize + x as usize];
            Rgb([v, v, v])
        })
    }

    fn video_info(&self) -> VideoInfo {
        VideoInfo {
            duration: self.duration,
            width: self.width,
            height: self.height,
            fps: self.fps(),
            frame_rate: self.frame_rate,
            time_base: Rational::new(1, 90_000),
            sample_aspect_ratio: Rational::new(1, 1),
            codec: self.codec.clone(),
            pix_fmt: "yuv420p".to_string(),
            frame_count: Some(self.frame_count()),
            has_audio: false,
        }
    }
}

/// Registry of synthetic clips by path.
///
/// Paths written by [`SimBackend`] resolve to the cropped view of their
/// source, with the duration of the frames actually written.
#[derive(Debug, Default)]
pub struct SyntheticLibrary {
    videos: Mutex<HashMap<PathBuf, SyntheticVideo>>,
}

impl SyntheticLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, video: SyntheticVideo) {
        lock(&self.videos).insert(path.into(), video);
    }

    pub fn get(&self, path: &Path) -> Option<SyntheticVideo> {
        lock(&self.videos).get(path).cloned()
    }

    /// The clip at `path`, registered or written by [`SimBackend`].
    pub fn resolve(&self, path: &Path) -> MediaResult<SyntheticVideo> {
        if let Some(video) = self.get(path) {
            return Ok(video);
        }
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MediaError::FileNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut lines = text.lines();
        if lines.next() != Some(SIM_MAGIC) {
            return Err(MediaError::InvalidVideo(format!("{} is not a synthetic clip", path.display())));
        }
        let fields: HashMap<&str, &str> = lines.filter_map(|l| l.split_once('=')).collect();
        if !text.lines().any(|l| l == "end") {
            return Err(MediaError::InvalidVideo(format!("{} is truncated", path.display())));
        }

        let field = |key: &str| {
            fields
                .get(key)
                .copied()
                .ok_or_else(|| MediaError::InvalidVideo(format!("{} lacks '{}'", path.display(), key)))
        };
        let invalid = |key: &str| MediaError::InvalidVideo(format!("{}: bad '{}'", path.display(), key));

        let source = self.resolve(Path::new(field("source")?))?;
        let (w, h) = field("size")?.split_once('x').ok_or_else(|| invalid("size"))?;
        let (x, y) = field("origin")?.split_once(',').ok_or_else(|| invalid("origin"))?;
        let rect = CropRect::new(
            x.parse().map_err(|_| invalid("origin"))?,
            y.parse().map_err(|_| invalid("origin"))?,
            w.parse().map_err(|_| invalid("size"))?,
            h.parse().map_err(|_| invalid("size"))?,
        );
        let frames: u64 = field("frames")?.parse().map_err(|_| invalid("frames"))?;
        let frame_rate = Rational::parse(field("frame_rate")?).ok_or_else(|| invalid("frame_rate"))?;

        Ok(source
            .cropped(rect)
            .with_frame_rate(frame_rate)
            .with_duration(frames as f64 / frame_rate.as_f64().max(f64::EPSILON)))
    }

    fn readable(&self, path: &Path) -> MediaResult<SyntheticVideo> {
        let video = self.resolve(path)?;
        if video.corrupt {
            return Err(MediaError::InvalidVideo(format!(
                "{}: invalid data found when processing input",
                path.display()
            )));
        }
        Ok(video)
    }
}

impl FrameSampler for SyntheticLibrary {
    fn probe(&self, path: &Path) -> MediaResult<VideoInfo> {
        Ok(self.readable(path)?.video_info())
    }

    fn gray_frame_at(&self, path: &Path, timestamp: f64, width: u32, height: u32) -> MediaResult<GrayFrame> {
        let video = self.readable(path)?;
        if !(0.0..video.duration).contains(&timestamp) {
            return Err(MediaError::decode_failed(format!("no frame at {:.3}s", timestamp)));
        }
        video.render_gray(timestamp, width, height)
    }

    fn rgb_frame_at(&self, path: &Path, timestamp: f64) -> MediaResult<RgbImage> {
        let video = self.readable(path)?;
        if !(0.0..video.duration).contains(&timestamp) {
            return Err(MediaError::decode_failed(format!("no frame at {:.3}s", timestamp)));
        }
        Ok(video.render_rgb(timestamp))
    }

    fn scan_gray(
        &self,
        path: &Path,
        fps: f64,
        width: u32,
        height: u32,
        visit: &mut dyn FnMut(f64, &GrayFrame) -> MediaResult<()>,
    ) -> MediaResult<u64> {
        let video = self.readable(path)?;
        if video.scan_fails {
            return Err(MediaError::ffmpeg_failed(
                "scene scan failed",
                Some("Error while decoding stream #0:0".to_string()),
                Some(1),
            ));
        }
        if fps <= 0.0 {
            return Err(MediaError::internal("scan rate must be positive"));
        }
        let mut count = 0u64;
        loop {
            let t = count as f64 / fps;
            if t >= video.duration {
                break;
            }
            visit(t, &video.render_gray(t, width, height)?)?;
            count += 1;
        }
        Ok(count)
    }
}
