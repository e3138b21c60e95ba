//! Hardware context manager.
//!
//! Owns the GPU device context and the hardware frame pools of one
//! transcode job. Native handles are wrapped in [`HwResource`] values whose
//! `Drop` releases them; the wrappers here are `Arc`-shared so a pool keeps
//! its device alive and a handle is released exactly once, after the last
//! clone goes away.
//!
//! # Usage
//!
//! ```ignore
//! let mut session = HardwareSession::new();
//! session.attach_device(backend.create_device(DeviceKind::Cuda)?)?;
//! session.adopt_decoder_pool(decoder_pool)?;
//! session.install_encoder_pool(encoder_pool)?;
//! // ... transcode ...
//! session.release();
//! ```

use std::any::Any;
use std::fmt;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub use vframe_models::DeviceKind;

use crate::error::{MediaError, MediaResult};
use crate::format::PixelFormat;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

fn next_handle_id() -> u64 {
    NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A backend-owned native handle released by its `Drop` impl.
pub trait HwResource: Send + Sync + fmt::Debug + 'static {
    fn as_any(&self) -> &dyn Any;
}

struct DeviceInner {
    id: u64,
    kind: DeviceKind,
    resource: Box<dyn HwResource>,
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        debug!(device_id = self.id, kind = %self.kind, "Releasing hardware device context");
    }
}

/// Shared handle to a GPU device context.
#[derive(Clone)]
pub struct DeviceContext {
    inner: Arc<DeviceInner>,
}

impl DeviceContext {
    pub fn new(kind: DeviceKind, resource: impl HwResource) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                id: next_handle_id(),
                kind,
                resource: Box::new(resource),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn kind(&self) -> DeviceKind {
        self.inner.kind
    }

    /// Downcast the native handle to a backend type.
    pub fn resource<T: 'static>(&self) -> Option<&T> {
        self.inner.resource.as_any().downcast_ref::<T>()
    }

    /// Number of live handles (session, pools, filter graphs, ...).
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn same_device(&self, other: &DeviceContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("resource", &self.inner.resource)
            .finish()
    }
}

/// Which side of the pipeline a frame pool feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolRole {
    Decoder,
    Encoder,
}

struct PoolInner {
    id: u64,
    role: PoolRole,
    width: u32,
    height: u32,
    sw_format: PixelFormat,
    resource: Box<dyn HwResource>,
    // Declared last so the pool's native handle drops before its device.
    device: DeviceContext,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        debug!(
            pool_id = self.id,
            role = ?self.role,
            width = self.width,
            height = self.height,
            "Releasing hardware frame pool"
        );
    }
}

/// Shared handle to a preallocated set of device frame buffers.
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<PoolInner>,
}

impl FramePool {
    pub fn new(
        role: PoolRole,
        device: &DeviceContext,
        width: u32,
        height: u32,
        sw_format: PixelFormat,
        resource: impl HwResource,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                id: next_handle_id(),
                role,
                width,
                height,
                sw_format,
                resource: Box::new(resource),
                device: device.clone(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn role(&self) -> PoolRole {
        self.inner.role
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    /// Layout of the surfaces when downloaded to host memory.
    pub fn sw_format(&self) -> PixelFormat {
        self.inner.sw_format
    }

    pub fn device(&self) -> &DeviceContext {
        &self.inner.device
    }

    pub fn resource<T: 'static>(&self) -> Option<&T> {
        self.inner.resource.as_any().downcast_ref::<T>()
    }

    pub fn same_pool(&self, other: &FramePool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for FramePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePool")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("sw_format", &self.inner.sw_format)
            .field("device", &self.inner.device.id())
            .finish()
    }
}

/// Per-job owner of the device context and both frame pools.
///
/// Never shared between jobs. `release` (or drop) gives up the session's
/// references; the native handles go away once decoder, filter graph and
/// encoder have dropped theirs too.
#[derive(Debug, Default)]
pub struct HardwareSession {
    device: Option<DeviceContext>,
    decoder_pool: Option<FramePool>,
    encoder_pool: Option<FramePool>,
    released: bool,
}

impl HardwareSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach_device(&mut self, device: DeviceContext) -> MediaResult<()> {
        if self.released {
            return Err(MediaError::invalid_state("hardware session already released"));
        }
        if self.device.is_some() {
            return Err(MediaError::invalid_state("hardware session already has a device"));
        }
        debug!(device_id = device.id(), kind = %device.kind(), "Attached hardware device");
        self.device = Some(device);
        Ok(())
    }

    pub fn device(&self) -> Option<&DeviceContext> {
        self.device.as_ref()
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    /// Take ownership of the decoder pool (pre-allocated, explicitly
    /// allocated, or adopted from the first decoded hardware frame).
    pub fn adopt_decoder_pool(&mut self, pool: FramePool) -> MediaResult<()> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| MediaError::invalid_state("decoder pool without a device"))?;
        if pool.role() != PoolRole::Decoder {
            return Err(MediaError::invalid_state("expected a decoder-side frame pool"));
        }
        if !pool.device().same_device(device) {
            return Err(MediaError::hardware_init_failed(
                "decoder frame pool belongs to a different device",
            ));
        }
        match &self.decoder_pool {
            Some(existing) if existing.same_pool(&pool) => Ok(()),
            Some(_) => Err(MediaError::invalid_state("decoder pool already installed")),
            None => {
                debug!(pool_id = pool.id(), "Adopted decoder frame pool");
                self.decoder_pool = Some(pool);
                Ok(())
            }
        }
    }

    pub fn decoder_pool(&self) -> Option<&FramePool> {
        self.decoder_pool.as_ref()
    }

    /// Install the encoder pool. It must be freshly allocated for this job
    /// and distinct from the decoder pool.
    pub fn install_encoder_pool(&mut self, pool: FramePool) -> MediaResult<()> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| MediaError::invalid_state("encoder pool without a device"))?;
        if pool.role() != PoolRole::Encoder {
            return Err(MediaError::invalid_state("expected an encoder-side frame pool"));
        }
        if !pool.device().same_device(device) {
            return Err(MediaError::hardware_init_failed(
                "encoder frame pool belongs to a different device",
            ));
        }
        if let Some(decoder_pool) = &self.decoder_pool {
            if decoder_pool.same_pool(&pool) {
                return Err(MediaError::invalid_state(
                    "encoder must not reuse the decoder frame pool",
                ));
            }
        }
        if self.encoder_pool.is_some() {
            return Err(MediaError::invalid_state("encoder pool already installed"));
        }
        debug!(pool_id = pool.id(), "Installed encoder frame pool");
        self.encoder_pool = Some(pool);
        Ok(())
    }

    pub fn encoder_pool(&self) -> Option<&FramePool> {
        self.encoder_pool.as_ref()
    }

    /// Drop the device and any pools, e.g. when falling back to software.
    pub fn detach_device(&mut self) {
        self.encoder_pool = None;
        self.decoder_pool = None;
        if let Some(device) = self.device.take() {
            debug!(device_id = device.id(), "Detached hardware device");
        }
    }

    /// Release everything the session holds. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.detach_device();
        self.released = true;
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for HardwareSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// GPU memory budget used to size the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuBudget {
    pub available_bytes: u64,
    pub per_job_bytes: u64,
}

impl GpuBudget {
    pub fn new(available_bytes: u64, per_job_bytes: u64) -> Self {
        Self {
            available_bytes,
            per_job_bytes,
        }
    }

    /// Largest pool with `size * per_job <= available`, capped at
    /// `max_workers` and never below one.
    pub fn pool_size(&self, max_workers: usize) -> usize {
        let max_workers = max_workers.max(1);
        if self.per_job_bytes == 0 {
            return max_workers;
        }
        let fit = (self.available_bytes / self.per_job_bytes) as usize;
        fit.clamp(1, max_workers)
    }
}

/// Free memory in bytes on the first GPU, via `nvidia-smi`.
///
/// `None` when the tool is missing or its output is unexpected.
pub fn query_free_gpu_memory() -> Option<u64> {
    let nvidia_smi = which::which("nvidia-smi").ok()?;
    let output = Command::new(nvidia_smi)
        .args(["--query-gpu=memory.free", "--format=csv,noheader,nounits"])
        .stdin(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        warn!("nvidia-smi exited with {}", output.status);
        return None;
    }
    parse_free_memory_mib(&String::from_utf8_lossy(&output.stdout)).map(|mib| mib * 1024 * 1024)
}

fn parse_free_memory_mib(text: &str) -> Option<u64> {
    text.lines().next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct Tracked(Arc<AtomicUsize>);

    impl HwResource for Tracked {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn device(released: &Arc<AtomicUsize>) -> DeviceContext {
        DeviceContext::new(DeviceKind::Cuda, Tracked(released.clone()))
    }

    fn pool(role: PoolRole, device: &DeviceContext, released: &Arc<AtomicUsize>) -> FramePool {
        FramePool::new(role, device, 640, 360, PixelFormat::Nv12, Tracked(released.clone()))
    }

    #[test]
    fn test_session_releases_everything_once() {
        let device_drops = Arc::new(AtomicUsize::new(0));
        let pool_drops = Arc::new(AtomicUsize::new(0));

        let mut session = HardwareSession::new();
        let dev = device(&device_drops);
        session.attach_device(dev.clone()).unwrap();
        session
            .adopt_decoder_pool(pool(PoolRole::Decoder, &dev, &pool_drops))
            .unwrap();
        session
            .install_encoder_pool(pool(PoolRole::Encoder, &dev, &pool_drops))
            .unwrap();
        drop(dev);

        session.release();
        session.release();
        assert!(session.is_released());
        assert_eq!(pool_drops.load(Ordering::SeqCst), 2);
        assert_eq!(device_drops.load(Ordering::SeqCst), 1);

        drop(session);
        assert_eq!(device_drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pool_keeps_device_alive() {
        let device_drops = Arc::new(AtomicUsize::new(0));
        let pool_drops = Arc::new(AtomicUsize::new(0));
        let dev = device(&device_drops);
        let p = pool(PoolRole::Decoder, &dev, &pool_drops);
        assert_eq!(dev.handle_count(), 2);
        drop(dev);
        assert_eq!(device_drops.load(Ordering::SeqCst), 0);
        drop(p);
        assert_eq!(pool_drops.load(Ordering::SeqCst), 1);
        assert_eq!(device_drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_encoder_pool_must_be_fresh() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut session = HardwareSession::new();
        let dev = device(&drops);
        session.attach_device(dev.clone()).unwrap();

        let decoder_pool = pool(PoolRole::Decoder, &dev, &drops);
        session.adopt_decoder_pool(decoder_pool.clone()).unwrap();
        // Adopting the same pool twice is a no-op.
        session.adopt_decoder_pool(decoder_pool.clone()).unwrap();

        assert!(session.install_encoder_pool(decoder_pool).is_err());
        let encoder_pool = pool(PoolRole::Encoder, &dev, &drops);
        session.install_encoder_pool(encoder_pool.clone()).unwrap();
        assert!(session.install_encoder_pool(encoder_pool).is_err());
    }

    #[test]
    fn test_pool_from_other_device_rejected() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut session = HardwareSession::new();
        session.attach_device(device(&drops)).unwrap();
        let other = device(&drops);
        let err = session
            .adopt_decoder_pool(pool(PoolRole::Decoder, &other, &drops))
            .unwrap_err();
        assert!(matches!(err, MediaError::HardwareInitFailed(_)));
    }

    #[test]
    fn test_attach_after_release_fails() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut session = HardwareSession::new();
        session.release();
        assert!(session.attach_device(device(&drops)).is_err());
    }

    #[test]
    fn test_resource_downcast() {
        let drops = Arc::new(AtomicUsize::new(0));
        let dev = device(&drops);
        assert!(dev.resource::<Tracked>().is_some());
        assert!(dev.resource::<String>().is_none());
    }

    #[test]
    fn test_gpu_budget_pool_size() {
        let gib = 1024 * 1024 * 1024;
        assert_eq!(GpuBudget::new(8 * gib, gib).pool_size(3), 3);
        assert_eq!(GpuBudget::new(2 * gib, gib).pool_size(3), 2);
        assert_eq!(GpuBudget::new(gib / 2, gib).pool_size(3), 1);
        assert_eq!(GpuBudget::new(gib, 0).pool_size(4), 4);
    }

    #[test]
    fn test_parse_free_memory() {
        assert_eq!(parse_free_memory_mib("11012\n"), Some(11012));
        assert_eq!(parse_free_memory_mib("N/A"), None);
    }
}
