//! The per-video transcode state machine.
//!
//! A [`TranscodeJob`] owns every stateful object of one crop transcode:
//! demuxer, decoder, filter graph, encoder, muxer, the hardware session and
//! the partial output file. Nothing is global, so independent jobs can run
//! on different threads.
//!
//! Every exit path funnels through either `close` (success) or `fail`,
//! both of which drop the codec objects and release the hardware session.
//! Dropping the job mid-flight has the same effect through `Drop`.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use vframe_models::{CropRect, DeviceKind, EncoderPolicy, ErrorKind, HardwareMode};

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::PartialOutput;
use crate::hwcontext::HardwareSession;
use crate::metrics;
use crate::transcode::backend::{
    FrameDecoder, FrameEncoder, FrameFilterGraph, MediaPacket, PacketSink, PacketSource, Receive,
    SendStatus, SourceStream, TranscodeBackend,
};
use crate::transcode::context::{EncoderSettings, StreamContext};
use crate::transcode::filter::FilterPlan;
use crate::transcode::negotiate::{negotiate_pixel_format, select_decoder, AccelMode, DecoderChoice};
use crate::transcode::pts::PtsGuard;
use crate::transcode::state::{TranscodeFailure, TranscodeState};

/// Upper bound on consecutive `Full`/`Again` answers before a codec is
/// considered stalled.
const MAX_SPINS: usize = 10_000;

/// Input of one crop transcode.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub source: PathBuf,
    pub output: PathBuf,
    pub crop: CropRect,
    pub hardware: HardwareMode,
    pub device: DeviceKind,
    pub policy: EncoderPolicy,
}

impl TranscodeRequest {
    pub fn new(source: impl Into<PathBuf>, output: impl Into<PathBuf>, crop: CropRect) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            crop,
            hardware: HardwareMode::default(),
            device: DeviceKind::default(),
            policy: EncoderPolicy::default(),
        }
    }

    pub fn with_hardware(mut self, hardware: HardwareMode) -> Self {
        self.hardware = hardware;
        self
    }

    pub fn with_device(mut self, device: DeviceKind) -> Self {
        self.device = device;
        self
    }

    pub fn with_policy(mut self, policy: EncoderPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Frame and packet counters of one job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TranscodeStats {
    pub packets_read: u64,
    pub frames_decoded: u64,
    pub frames_filtered: u64,
    pub frames_encoded: u64,
    pub packets_written: u64,
    /// Timestamps rewritten to keep output strictly increasing
    pub pts_adjusted: u64,
}

/// Summary of a job that reached `Closed`.
#[derive(Debug, Clone, Serialize)]
pub struct TranscodeReport {
    pub output: PathBuf,
    /// Crop actually applied (even-aligned)
    pub crop: CropRect,
    pub accel: AccelMode,
    pub decoder: String,
    pub encoder: String,
    pub source_width: u32,
    pub source_height: u32,
    pub stats: TranscodeStats,
    pub history: Vec<&'static str>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drain {
    /// Stop when the codec wants more input
    Available,
    /// Keep going until the codec reports end of stream
    ToEof,
}

/// Errors outside the taxonomy raised while decoding become `DecodeFailed`.
fn decode_failure(e: MediaError) -> MediaError {
    match e.kind() {
        ErrorKind::Internal => MediaError::decode_failed(e.to_string()),
        _ => e,
    }
}

/// Errors outside the taxonomy raised after decoding become `EncodeFailed`.
fn encode_failure(e: MediaError) -> MediaError {
    match e.kind() {
        ErrorKind::Internal => MediaError::encode_failed(e.to_string()),
        _ => e,
    }
}

fn hardware_failure(e: MediaError) -> MediaError {
    match e.kind() {
        ErrorKind::Internal => MediaError::hardware_init_failed(e.to_string()),
        _ => e,
    }
}

fn filter_failure(e: MediaError) -> MediaError {
    match e.kind() {
        ErrorKind::Internal => MediaError::filter_graph_init_failed(e.to_string()),
        _ => e,
    }
}

/// One crop transcode driven through its lifecycle.
///
/// # Usage
///
/// ```ignore
/// let mut job = TranscodeJob::new(&backend, request);
/// let report = job.run()?;
/// assert_eq!(job.state(), &TranscodeState::Closed);
/// ```
pub struct TranscodeJob<'b, B: TranscodeBackend> {
    backend: &'b B,
    request: TranscodeRequest,
    crop: CropRect,
    state: TranscodeState,
    history: Vec<&'static str>,
    session: HardwareSession,

    source: Option<SourceStream>,
    input: Option<B::Input>,
    decoder: Option<B::Decoder>,
    decoder_choice: Option<DecoderChoice>,
    decoder_ctx: Option<StreamContext>,
    accel: AccelMode,
    plan: Option<FilterPlan>,
    graph: Option<B::Graph>,
    encoder_ctx: Option<StreamContext>,
    encoder_settings: Option<EncoderSettings>,
    encoder: Option<B::Encoder>,
    output: Option<B::Output>,
    partial: Option<PartialOutput>,

    frame_pts: PtsGuard,
    packet_pts: PtsGuard,
    stats: TranscodeStats,
}

impl<'b, B: TranscodeBackend> TranscodeJob<'b, B> {
    pub fn new(backend: &'b B, request: TranscodeRequest) -> Self {
        let crop = request.crop.aligned_even();
        Self {
            backend,
            request,
            crop,
            state: TranscodeState::Init,
            history: vec![TranscodeState::Init.name()],
            session: HardwareSession::new(),
            source: None,
            input: None,
            decoder: None,
            decoder_choice: None,
            decoder_ctx: None,
            accel: AccelMode::Software,
            plan: None,
            graph: None,
            encoder_ctx: None,
            encoder_settings: None,
            encoder: None,
            output: None,
            partial: None,
            frame_pts: PtsGuard::new(),
            packet_pts: PtsGuard::new(),
            stats: TranscodeStats::default(),
        }
    }

    pub fn state(&self) -> &TranscodeState {
        &self.state
    }

    /// Names of every state entered so far, in order.
    pub fn history(&self) -> &[&'static str] {
        &self.history
    }

    pub fn stats(&self) -> &TranscodeStats {
        &self.stats
    }

    pub fn session(&self) -> &HardwareSession {
        &self.session
    }

    pub fn plan(&self) -> Option<&FilterPlan> {
        self.plan.as_ref()
    }

    /// Drive the job to `Closed` or `Failed`.
    pub fn run(&mut self) -> MediaResult<TranscodeReport> {
        if self.state != TranscodeState::Init {
            return Err(MediaError::invalid_state(format!(
                "transcode job already ran (state {})",
                self.state
            )));
        }
        let started = Instant::now();
        info!(
            source = %self.request.source.display(),
            crop = %self.crop,
            hardware = %self.request.hardware,
            backend = self.backend.name(),
            "Starting crop transcode"
        );

        match self.drive() {
            Ok(output) => {
                let elapsed = started.elapsed();
                let report = self.report(output, elapsed.as_millis() as u64);
                metrics::record_transcode(
                    self.backend.name(),
                    accel_label(report.accel),
                    "closed",
                    elapsed.as_secs_f64(),
                    report.stats.frames_encoded,
                );
                metrics::record_pts_adjustments(report.stats.pts_adjusted);
                info!(
                    output = %report.output.display(),
                    frames = report.stats.frames_encoded,
                    accel = accel_label(report.accel),
                    decoder = %report.decoder,
                    encoder = %report.encoder,
                    elapsed_ms = report.elapsed_ms,
                    "Crop transcode finished"
                );
                Ok(report)
            }
            Err(e) => {
                self.fail(&e);
                metrics::record_transcode(
                    self.backend.name(),
                    accel_label(self.accel),
                    "failed",
                    started.elapsed().as_secs_f64(),
                    self.stats.frames_encoded,
                );
                Err(e)
            }
        }
    }

    fn drive(&mut self) -> MediaResult<PathBuf> {
        self.open_decoder()?;
        self.prepare_hw_frames()?;
        self.build_filter_graph()?;
        self.open_encoder()?;
        self.stream()?;
        self.flush()?;
        self.close()
    }

    fn transition(&mut self, next: TranscodeState) -> MediaResult<()> {
        if !self.state.can_transition_to(&next) {
            return Err(MediaError::invalid_state(format!(
                "illegal transition {} -> {}",
                self.state, next
            )));
        }
        debug!(from = self.state.name(), to = next.name(), "Transcode state change");
        self.history.push(next.name());
        self.state = next;
        Ok(())
    }

    /// Apply the hardware mode to a failed device or decoder open.
    fn hardware_unavailable(&self, what: &'static str, e: MediaError) -> MediaResult<()> {
        match self.request.hardware {
            HardwareMode::Required => Err(MediaError::hardware_init_failed(format!(
                "hardware {} unavailable: {}",
                what,
                e.reason()
            ))),
            _ => {
                warn!(
                    source = %self.request.source.display(),
                    "Hardware {} unavailable, falling back to software: {}",
                    what,
                    e.reason()
                );
                metrics::record_hardware_fallback(what);
                Ok(())
            }
        }
    }

    // Init -> DecoderOpen
    fn open_decoder(&mut self) -> MediaResult<()> {
        let backend = self.backend;
        let (mut input, source) = backend.open_input(&self.request.source)?;

        if self.request.hardware.wants_device() {
            match backend.create_device(self.request.device) {
                Ok(device) => self.session.attach_device(device)?,
                Err(e) => self.hardware_unavailable("device", e)?,
            }
        }

        let device_kind = self.session.device().map(|d| d.kind());
        let choice = select_decoder(&source.codec, device_kind, |name| backend.has_decoder(name));
        let format = negotiate_pixel_format(&backend.decoder_formats(&choice, &source), device_kind)?;

        let opened = backend.open_decoder(&mut input, &source, &choice, format, self.session.device());
        let (decoder, choice, format) = match opened {
            Ok(decoder) => (decoder, choice, format),
            Err(e) if choice.hardware || format.is_hardware() => {
                self.hardware_unavailable("decoder", e)?;
                self.session.detach_device();
                let choice = DecoderChoice::software(&source.codec);
                let format = negotiate_pixel_format(&backend.decoder_formats(&choice, &source), None)?;
                let decoder = backend
                    .open_decoder(&mut input, &source, &choice, format, None)
                    .map_err(decode_failure)?;
                (decoder, choice, format)
            }
            Err(e) => return Err(decode_failure(e)),
        };

        info!(
            decoder = %choice.name,
            codec = %source.codec,
            width = source.width,
            height = source.height,
            pix_fmt = %format.format(),
            "Opened decoder"
        );
        self.accel = format.mode();
        self.decoder_ctx = Some(StreamContext::decoder(&source, format));
        self.decoder_choice = Some(choice);
        self.decoder = Some(decoder);
        self.input = Some(input);
        self.source = Some(source);
        self.transition(TranscodeState::DecoderOpen)
    }

    // DecoderOpen -> HwFramesReady
    fn prepare_hw_frames(&mut self) -> MediaResult<()> {
        if self.accel == AccelMode::Hardware {
            let backend = self.backend;
            let device = self
                .session
                .device()
                .cloned()
                .ok_or_else(|| MediaError::hardware_init_failed("hardware frames without a device"))?;
            let ctx = self.decoder_ctx()?.clone();
            let decoder = self
                .decoder
                .as_mut()
                .ok_or_else(|| MediaError::invalid_state("decoder not open"))?;
            match backend.decoder_pool(decoder, &ctx, &device).map_err(hardware_failure)? {
                Some(pool) => {
                    self.session.adopt_decoder_pool(pool.clone())?;
                    self.decoder_ctx = Some(ctx.with_hw_frames(pool));
                }
                None => debug!("Decoder frame pool deferred to the first decoded frame"),
            }
        }
        self.transition(TranscodeState::HwFramesReady)
    }

    // HwFramesReady -> FilterGraphBuilt
    fn build_filter_graph(&mut self) -> MediaResult<()> {
        let decoder_ctx = self.decoder_ctx()?.clone();
        let encoder_ctx = StreamContext::encoder(&decoder_ctx, self.crop);
        let device_kind = self.session.device().map(|d| d.kind());
        let plan = FilterPlan::build(&decoder_ctx, &encoder_ctx, self.crop, device_kind)?;
        debug!(chain = %plan.chain(), args = %plan.source_args(), "Building filter graph");

        let graph = self
            .backend
            .build_filter_graph(&plan, self.session.device(), self.session.decoder_pool())
            .map_err(filter_failure)?;

        self.graph = Some(graph);
        self.plan = Some(plan);
        self.encoder_ctx = Some(encoder_ctx);
        self.transition(TranscodeState::FilterGraphBuilt)
    }

    // FilterGraphBuilt -> EncoderOpen
    fn open_encoder(&mut self) -> MediaResult<()> {
        let backend = self.backend;
        let mut ctx = self
            .encoder_ctx
            .take()
            .ok_or_else(|| MediaError::invalid_state("encoder context missing"))?;

        if self.accel == AccelMode::Hardware {
            let device = self
                .session
                .device()
                .cloned()
                .ok_or_else(|| MediaError::hardware_init_failed("encoder pool without a device"))?;
            let pool = backend
                .alloc_encoder_pool(&device, ctx.width, ctx.height, ctx.sw_format)
                .map_err(hardware_failure)?;
            self.session.install_encoder_pool(pool.clone())?;
            ctx = ctx.with_hw_frames(pool);
        }

        let settings = EncoderSettings::from_policy(&self.request.policy, self.session.has_device());
        let encoder = backend.open_encoder(&ctx, &settings).map_err(encode_failure)?;
        let partial = PartialOutput::new(&self.request.output)?;
        let mut output = backend
            .open_output(partial.path(), &self.request.source, &encoder, &ctx)
            .map_err(encode_failure)?;
        // The guard owns the partial file from here on.
        self.partial = Some(partial);
        output.write_header().map_err(encode_failure)?;

        info!(
            encoder = %settings.codec,
            preset = %settings.preset,
            width = ctx.width,
            height = ctx.height,
            "Opened encoder"
        );
        self.encoder_settings = Some(settings);
        self.encoder_ctx = Some(ctx);
        self.encoder = Some(encoder);
        self.output = Some(output);
        self.transition(TranscodeState::EncoderOpen)
    }

    // EncoderOpen -> Streaming, until end of input
    fn stream(&mut self) -> MediaResult<()> {
        self.transition(TranscodeState::Streaming)?;
        loop {
            let packet = self.input_mut()?.read_packet().map_err(decode_failure)?;
            let Some(packet) = packet else {
                break;
            };
            self.stats.packets_read += 1;
            self.send_packet(Some(&packet))?;
            self.drain_decoder(Drain::Available)?;
        }
        debug!(packets = self.stats.packets_read, "End of input");
        Ok(())
    }

    // Streaming -> Flushing: decoder, then filter graph, then encoder.
    fn flush(&mut self) -> MediaResult<()> {
        self.transition(TranscodeState::Flushing)?;

        self.send_packet(None)?;
        self.drain_decoder(Drain::ToEof)?;

        self.graph_mut()?.push_frame(None).map_err(encode_failure)?;
        self.drain_graph(Drain::ToEof)?;

        self.send_frame(None)?;
        self.drain_encoder(Drain::ToEof)?;

        debug!(
            decoded = self.stats.frames_decoded,
            filtered = self.stats.frames_filtered,
            encoded = self.stats.frames_encoded,
            "Flushed pipeline"
        );
        Ok(())
    }

    // Flushing -> Closed
    fn close(&mut self) -> MediaResult<PathBuf> {
        self.output_mut()?.write_trailer().map_err(encode_failure)?;
        self.release_codecs();
        let partial = self
            .partial
            .take()
            .ok_or_else(|| MediaError::invalid_state("output was never opened"))?;
        let path = partial.commit()?;
        self.session.release();
        self.transition(TranscodeState::Closed)?;
        Ok(path)
    }

    /// Enter `Failed`, discarding partial output and releasing the session.
    fn fail(&mut self, e: &MediaError) {
        if self.state.is_terminal() {
            return;
        }
        let failure = TranscodeFailure {
            from: self.state.name(),
            kind: e.kind(),
            message: e.reason(),
        };
        self.release_codecs();
        self.partial = None;
        self.session.release();
        error!(
            source = %self.request.source.display(),
            state = failure.from,
            kind = %failure.kind,
            "Crop transcode failed: {}",
            failure.message
        );
        let next = TranscodeState::Failed(failure);
        self.history.push(next.name());
        self.state = next;
    }

    /// Drop codec objects (each may hold device or pool references),
    /// muxer first, demuxer last.
    fn release_codecs(&mut self) {
        self.output = None;
        self.encoder = None;
        self.graph = None;
        self.decoder = None;
        self.input = None;
        self.encoder_ctx = None;
        self.decoder_ctx = None;
    }

    fn report(&self, output: PathBuf, elapsed_ms: u64) -> TranscodeReport {
        let (source_width, source_height) = self
            .source
            .as_ref()
            .map(|s| (s.width, s.height))
            .unwrap_or_default();
        let mut stats = self.stats.clone();
        stats.pts_adjusted = self.frame_pts.adjusted() + self.packet_pts.adjusted();
        TranscodeReport {
            output,
            crop: self.crop,
            accel: self.accel,
            decoder: self
                .decoder_choice
                .as_ref()
                .map(|c| c.name.clone())
                .unwrap_or_default(),
            encoder: self
                .encoder_settings
                .as_ref()
                .map(|s| s.codec.clone())
                .unwrap_or_default(),
            source_width,
            source_height,
            stats,
            history: self.history.clone(),
            elapsed_ms,
        }
    }

    fn decoder_ctx(&self) -> MediaResult<&StreamContext> {
        self.decoder_ctx
            .as_ref()
            .ok_or_else(|| MediaError::invalid_state("decoder context missing"))
    }

    fn input_mut(&mut self) -> MediaResult<&mut B::Input> {
        self.input
            .as_mut()
            .ok_or_else(|| MediaError::invalid_state("input not open"))
    }

    fn decoder_mut(&mut self) -> MediaResult<&mut B::Decoder> {
        self.decoder
            .as_mut()
            .ok_or_else(|| MediaError::invalid_state("decoder not open"))
    }

    fn graph_mut(&mut self) -> MediaResult<&mut B::Graph> {
        self.graph
            .as_mut()
            .ok_or_else(|| MediaError::invalid_state("filter graph not built"))
    }

    fn encoder_mut(&mut self) -> MediaResult<&mut B::Encoder> {
        self.encoder
            .as_mut()
            .ok_or_else(|| MediaError::invalid_state("encoder not open"))
    }

    fn output_mut(&mut self) -> MediaResult<&mut B::Output> {
        self.output
            .as_mut()
            .ok_or_else(|| MediaError::invalid_state("output not open"))
    }

    fn send_packet(&mut self, packet: Option<&B::Packet>) -> MediaResult<()> {
        for _ in 0..MAX_SPINS {
            match self.decoder_mut()?.send_packet(packet).map_err(decode_failure)? {
                SendStatus::Accepted => return Ok(()),
                SendStatus::Full => self.drain_decoder(Drain::Available)?,
            }
        }
        Err(MediaError::decode_failed("decoder stopped accepting packets"))
    }

    fn drain_decoder(&mut self, mode: Drain) -> MediaResult<()> {
        let mut spins = 0;
        loop {
            match self.decoder_mut()?.receive_frame().map_err(decode_failure)? {
                Receive::Item(frame) => self.on_decoded(frame)?,
                Receive::Again if mode == Drain::Available => return Ok(()),
                Receive::Again => {
                    spins += 1;
                    if spins >= MAX_SPINS {
                        return Err(MediaError::decode_failed("decoder never reached end of stream"));
                    }
                }
                Receive::Eof => return Ok(()),
            }
        }
    }

    fn on_decoded(&mut self, frame: B::Frame) -> MediaResult<()> {
        self.stats.frames_decoded += 1;
        if self.accel == AccelMode::Hardware && self.session.decoder_pool().is_none() {
            let pool = self
                .session
                .device()
                .and_then(|device| self.backend.frame_pool(&frame, device));
            if let Some(pool) = pool {
                self.session.adopt_decoder_pool(pool)?;
                debug!("Adopted decoder frame pool from first decoded frame");
            }
        }
        self.graph_mut()?.push_frame(Some(frame)).map_err(encode_failure)?;
        self.drain_graph(Drain::Available)
    }

    fn drain_graph(&mut self, mode: Drain) -> MediaResult<()> {
        let mut spins = 0;
        loop {
            match self.graph_mut()?.pull_frame().map_err(encode_failure)? {
                Receive::Item(mut frame) => {
                    self.frame_pts.apply(&mut frame);
                    self.stats.frames_filtered += 1;
                    self.send_frame(Some(&frame))?;
                    self.drain_encoder(Drain::Available)?;
                }
                Receive::Again if mode == Drain::Available => return Ok(()),
                Receive::Again => {
                    spins += 1;
                    if spins >= MAX_SPINS {
                        return Err(MediaError::encode_failed("filter graph never reached end of stream"));
                    }
                }
                Receive::Eof => return Ok(()),
            }
        }
    }

    fn send_frame(&mut self, frame: Option<&B::Frame>) -> MediaResult<()> {
        for _ in 0..MAX_SPINS {
            match self.encoder_mut()?.send_frame(frame).map_err(encode_failure)? {
                SendStatus::Accepted => return Ok(()),
                SendStatus::Full => self.drain_encoder(Drain::Available)?,
            }
        }
        Err(MediaError::encode_failed("encoder stopped accepting frames"))
    }

    fn drain_encoder(&mut self, mode: Drain) -> MediaResult<()> {
        let mut spins = 0;
        loop {
            match self.encoder_mut()?.receive_packet().map_err(encode_failure)? {
                Receive::Item(mut packet) => {
                    self.stats.frames_encoded += 1;
                    let from = self.encoder_mut()?.time_base();
                    let to = self.output_mut()?.stream_time_base();
                    packet.rescale(from, to);
                    self.packet_pts.apply(&mut packet);
                    self.output_mut()?.write_packet(packet).map_err(encode_failure)?;
                    self.stats.packets_written += 1;
                }
                Receive::Again if mode == Drain::Available => return Ok(()),
                Receive::Again => {
                    spins += 1;
                    if spins >= MAX_SPINS {
                        return Err(MediaError::encode_failed("encoder never reached end of stream"));
                    }
                }
                Receive::Eof => return Ok(()),
            }
        }
    }
}

impl<B: TranscodeBackend> Drop for TranscodeJob<'_, B> {
    fn drop(&mut self) {
        self.release_codecs();
        self.partial = None;
        self.session.release();
    }
}

fn accel_label(accel: AccelMode) -> &'static str {
    match accel {
        AccelMode::Hardware => "hardware",
        AccelMode::Software => "software",
    }
}

/// Run one crop transcode to completion.
pub fn transcode<B: TranscodeBackend>(backend: &B, request: TranscodeRequest) -> MediaResult<TranscodeReport> {
    TranscodeJob::new(backend, request).run()
}
