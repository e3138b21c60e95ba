//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use validator::Validate;
use vframe_media::{query_free_gpu_memory, GpuBudget};
use vframe_models::{DeviceKind, EncoderPolicy, HardwareMode, TuningConfig, DEFAULT_HW_PRESET};

use crate::error::{WorkerError, WorkerResult};

const MIB: u64 = 1024 * 1024;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Upper bound on videos processed at once
    pub max_concurrent_jobs: usize,
    /// GPU memory to budget for, in MiB. `None` means query the device.
    pub gpu_memory_mb: Option<u64>,
    /// GPU memory one transcode job is expected to hold, in MiB
    pub job_gpu_memory_mb: u64,
    /// Where cropped working clips are written
    pub work_dir: PathBuf,
    /// Root of the per-video frame directories
    pub frames_dir: PathBuf,
    pub hardware: HardwareMode,
    pub device: DeviceKind,
    pub encoder_preset: String,
    pub enable_crop: bool,
    pub enable_dedup: bool,
    /// Reuse a cropped clip left by an earlier run
    pub skip_existing: bool,
    pub keep_cropped: bool,
    pub write_manifest: bool,
    /// Prometheus listener; no exporter when unset
    pub metrics_addr: Option<SocketAddr>,
    /// Default tuning for jobs that do not carry their own
    pub tuning: TuningConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            gpu_memory_mb: None,
            job_gpu_memory_mb: 1024,
            work_dir: PathBuf::from(".output/tmp/videos"),
            frames_dir: PathBuf::from(".output/frames"),
            hardware: HardwareMode::Auto,
            device: DeviceKind::Cuda,
            encoder_preset: DEFAULT_HW_PRESET.to_string(),
            enable_crop: true,
            enable_dedup: true,
            skip_existing: true,
            keep_cropped: true,
            write_manifest: true,
            metrics_addr: None,
            tuning: TuningConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key lookup. Unparseable values fall back to
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let tuning = TuningConfig::default();
        let vars = Vars(&lookup);

        Self {
            max_concurrent_jobs: vars.parse("WORKER_MAX_JOBS").unwrap_or(defaults.max_concurrent_jobs),
            gpu_memory_mb: vars.parse("WORKER_GPU_MEMORY_MB"),
            job_gpu_memory_mb: vars.parse("WORKER_JOB_GPU_MEMORY_MB").unwrap_or(defaults.job_gpu_memory_mb),
            work_dir: vars.get("VFRAME_WORK_DIR").map(PathBuf::from).unwrap_or(defaults.work_dir),
            frames_dir: vars.get("VFRAME_FRAMES_DIR").map(PathBuf::from).unwrap_or(defaults.frames_dir),
            hardware: vars.get("VFRAME_HW_MODE")
                .and_then(|s| HardwareMode::from_str(&s).ok())
                .unwrap_or(defaults.hardware),
            device: vars.get("VFRAME_HW_DEVICE")
                .and_then(|s| DeviceKind::from_str(&s).ok())
                .unwrap_or(defaults.device),
            encoder_preset: vars.get("VFRAME_ENCODER_PRESET").unwrap_or(defaults.encoder_preset),
            enable_crop: vars.flag("VFRAME_ENABLE_CROP", defaults.enable_crop),
            enable_dedup: vars.flag("VFRAME_ENABLE_DEDUP", defaults.enable_dedup),
            skip_existing: vars.flag("VFRAME_SKIP_EXISTING", defaults.skip_existing),
            keep_cropped: vars.flag("VFRAME_KEEP_CROPPED", defaults.keep_cropped),
            write_manifest: vars.flag("VFRAME_WRITE_MANIFEST", defaults.write_manifest),
            metrics_addr: vars.parse("METRICS_ADDR"),
            tuning: TuningConfig {
                probe_count: vars.parse("VFRAME_CROP_PROBES").unwrap_or(tuning.probe_count),
                tolerance: vars.parse("VFRAME_TOLERANCE").unwrap_or(tuning.tolerance),
                edge_threshold: vars.parse("VFRAME_EDGE_THRESH").unwrap_or(tuning.edge_threshold),
                min_crop_ratio: vars.parse("VFRAME_MIN_CROP_RATIO").unwrap_or(tuning.min_crop_ratio),
                downscale: vars.parse("VFRAME_DOWNSCALE").unwrap_or(tuning.downscale),
                min_frames: vars.parse("VFRAME_MIN_FRAMES").unwrap_or(tuning.min_frames),
                scene_threshold: vars.parse("VFRAME_SCENE_THRESH").unwrap_or(tuning.scene_threshold),
                sample_fps: vars.parse("VFRAME_SAMPLE_FPS").unwrap_or(tuning.sample_fps),
                hash_distance_threshold: vars.parse("VFRAME_HASH_DISTANCE")
                    .unwrap_or(tuning.hash_distance_threshold),
                solid_std_threshold: vars.parse("VFRAME_SOLID_STD").unwrap_or(tuning.solid_std_threshold),
            },
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(WorkerError::config_error("WORKER_MAX_JOBS must be at least 1"));
        }
        if self.job_gpu_memory_mb == 0 {
            return Err(WorkerError::config_error("WORKER_JOB_GPU_MEMORY_MB must be at least 1"));
        }
        self.tuning
            .validate()
            .map_err(|e| WorkerError::config_error(format!("invalid tuning: {}", e)))
    }

    pub fn encoder_policy(&self) -> EncoderPolicy {
        EncoderPolicy::default().with_preset(self.encoder_preset.clone())
    }

    /// Worker pool size for the GPU memory at hand.
    ///
    /// Software-only runs and hosts without a readable GPU use
    /// `max_concurrent_jobs` as is.
    pub fn pool_size(&self) -> usize {
        if !self.hardware.wants_device() {
            return self.max_concurrent_jobs.max(1);
        }
        let available = self
            .gpu_memory_mb
            .map(|mb| mb * MIB)
            .or_else(query_free_gpu_memory);
        match available {
            Some(bytes) => GpuBudget::new(bytes, self.job_gpu_memory_mb * MIB).pool_size(self.max_concurrent_jobs),
            None => self.max_concurrent_jobs.max(1),
        }
    }
}

/// Typed access to a key lookup; empty values count as unset.
struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|s| s.parse().ok())
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|s| parse_flag(&s)).unwrap_or(default)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> WorkerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_env() {
        let config = config_from(&[]);

        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.job_gpu_memory_mb, 1024);
        assert_eq!(config.frames_dir, PathBuf::from(".output/frames"));
        assert_eq!(config.hardware, HardwareMode::Auto);
        assert!(config.enable_crop && config.enable_dedup && config.skip_existing);
        assert!(config.metrics_addr.is_none());
        assert_eq!(config.tuning, TuningConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = config_from(&[
            ("WORKER_MAX_JOBS", "6"),
            ("VFRAME_HW_MODE", "software"),
            ("VFRAME_ENABLE_DEDUP", "0"),
            ("VFRAME_KEEP_CROPPED", "false"),
            ("VFRAME_MIN_FRAMES", "8"),
            ("VFRAME_SCENE_THRESH", "0.3"),
            ("METRICS_ADDR", "127.0.0.1:9100"),
        ]);

        assert_eq!(config.max_concurrent_jobs, 6);
        assert_eq!(config.hardware, HardwareMode::Disabled);
        assert!(!config.enable_dedup);
        assert!(!config.keep_cropped);
        assert_eq!(config.tuning.min_frames, 8);
        assert_eq!(config.tuning.scene_threshold, 0.3);
        assert_eq!(config.metrics_addr, Some("127.0.0.1:9100".parse().unwrap()));
    }

    #[test]
    fn test_garbage_values_fall_back() {
        let config = config_from(&[("WORKER_MAX_JOBS", "many"), ("VFRAME_ENABLE_CROP", "maybe")]);

        assert_eq!(config.max_concurrent_jobs, 3);
        assert!(config.enable_crop);
    }

    #[test]
    fn test_out_of_range_tuning_rejected() {
        let config = config_from(&[("VFRAME_DOWNSCALE", "4.0")]);
        assert!(config.validate().is_err());

        let config = config_from(&[("WORKER_MAX_JOBS", "0")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_size_from_budget() {
        let config = config_from(&[("WORKER_GPU_MEMORY_MB", "2500"), ("WORKER_MAX_JOBS", "8")]);
        assert_eq!(config.pool_size(), 2);

        let config = config_from(&[("WORKER_GPU_MEMORY_MB", "100")]);
        assert_eq!(config.pool_size(), 1);

        let config = config_from(&[("VFRAME_HW_MODE", "disabled"), ("WORKER_MAX_JOBS", "5")]);
        assert_eq!(config.pool_size(), 5);
    }
}
