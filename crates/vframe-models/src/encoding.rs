//! Encoder policy and hardware-acceleration settings for the crop transcode.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hardware encoder used when a GPU device is available
pub const DEFAULT_HW_ENCODER: &str = "h264_nvenc";
/// Software encoder used on the fallback path
pub const DEFAULT_SW_ENCODER: &str = "libx264";
/// Fastest NVENC preset
pub const DEFAULT_HW_PRESET: &str = "p1";
/// Fastest x264 preset
pub const DEFAULT_SW_PRESET: &str = "ultrafast";
/// Fixed target bitrate for cropped working clips (bits/second)
pub const TARGET_BITRATE: u64 = 4_000_000;

/// How the transcode pipeline treats hardware acceleration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HardwareMode {
    /// Use the GPU when it initialises; fall back to software otherwise
    #[default]
    Auto,
    /// GPU initialisation failures fail the video
    Required,
    /// Never touch the GPU
    Disabled,
}

impl HardwareMode {
    pub fn wants_device(&self) -> bool {
        !matches!(self, HardwareMode::Disabled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HardwareMode::Auto => "auto",
            HardwareMode::Required => "required",
            HardwareMode::Disabled => "disabled",
        }
    }
}

impl fmt::Display for HardwareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HardwareMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(HardwareMode::Auto),
            "required" | "gpu" => Ok(HardwareMode::Required),
            "disabled" | "software" | "cpu" | "off" => Ok(HardwareMode::Disabled),
            other => Err(format!("unknown hardware mode: {}", other)),
        }
    }
}

/// GPU device family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    #[default]
    Cuda,
    Vaapi,
}

impl DeviceKind {
    /// FFmpeg hwaccel / hwdevice type name.
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            DeviceKind::Cuda => "cuda",
            DeviceKind::Vaapi => "vaapi",
        }
    }

    /// Filter that uploads system-memory frames to this device.
    pub fn upload_filter(&self) -> &'static str {
        match self {
            DeviceKind::Cuda => "hwupload_cuda",
            DeviceKind::Vaapi => "hwupload",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ffmpeg_name())
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cuda" | "nvidia" => Ok(DeviceKind::Cuda),
            "vaapi" => Ok(DeviceKind::Vaapi),
            other => Err(format!("unknown hardware device: {}", other)),
        }
    }
}

/// Encoder selection and rate-control policy.
///
/// Bitrate is fixed; only the preset is meant to be tuned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EncoderPolicy {
    #[serde(default = "default_hw_encoder")]
    pub hardware_encoder: String,

    #[serde(default = "default_sw_encoder")]
    pub software_encoder: String,

    /// Preset for the hardware encoder
    #[serde(default = "default_hw_preset")]
    pub preset: String,

    /// Preset for the software encoder
    #[serde(default = "default_sw_preset")]
    pub software_preset: String,

    #[serde(default = "default_bitrate")]
    pub bitrate: u64,
}

fn default_hw_encoder() -> String {
    DEFAULT_HW_ENCODER.to_string()
}
fn default_sw_encoder() -> String {
    DEFAULT_SW_ENCODER.to_string()
}
fn default_hw_preset() -> String {
    DEFAULT_HW_PRESET.to_string()
}
fn default_sw_preset() -> String {
    DEFAULT_SW_PRESET.to_string()
}
fn default_bitrate() -> u64 {
    TARGET_BITRATE
}

impl Default for EncoderPolicy {
    fn default() -> Self {
        Self {
            hardware_encoder: default_hw_encoder(),
            software_encoder: default_sw_encoder(),
            preset: default_hw_preset(),
            software_preset: default_sw_preset(),
            bitrate: TARGET_BITRATE,
        }
    }
}

impl EncoderPolicy {
    /// Returns a policy with a different hardware preset.
    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = preset.into();
        self
    }

    /// Encoder name and preset for the given path.
    pub fn select(&self, hardware: bool) -> (&str, &str) {
        if hardware {
            (&self.hardware_encoder, &self.preset)
        } else {
            (&self.software_encoder, &self.software_preset)
        }
    }

    /// FFmpeg CLI output arguments for the selected encoder.
    ///
    /// B-frames are disabled so packets leave the encoder in presentation order.
    pub fn to_ffmpeg_args(&self, hardware: bool) -> Vec<String> {
        let (codec, preset) = self.select(hardware);
        vec![
            "-c:v".to_string(),
            codec.to_string(),
            "-preset".to_string(),
            preset.to_string(),
            "-b:v".to_string(),
            self.bitrate.to_string(),
            "-bf".to_string(),
            "0".to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults_to_fastest_hw_preset() {
        let policy = EncoderPolicy::default();
        assert_eq!(policy.select(true), ("h264_nvenc", "p1"));
        assert_eq!(policy.select(false), ("libx264", "ultrafast"));
    }

    #[test]
    fn test_policy_args() {
        let args = EncoderPolicy::default().with_preset("p4").to_ffmpeg_args(true);
        assert_eq!(
            args,
            vec!["-c:v", "h264_nvenc", "-preset", "p4", "-b:v", "4000000", "-bf", "0"]
        );
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("AUTO".parse::<HardwareMode>(), Ok(HardwareMode::Auto));
        assert_eq!("software".parse::<HardwareMode>(), Ok(HardwareMode::Disabled));
        assert!("maybe".parse::<HardwareMode>().is_err());
        assert_eq!("cuda".parse::<DeviceKind>(), Ok(DeviceKind::Cuda));
    }
}
