//! FFprobe video information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};
use crate::format::Rational;

/// Video stream information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Frame rate as a rational
    pub frame_rate: Rational,
    /// Stream time base
    pub time_base: Rational,
    /// Sample aspect ratio (1/1 when unknown)
    pub sample_aspect_ratio: Rational,
    /// Video codec
    pub codec: String,
    /// Decoded pixel format name
    pub pix_fmt: String,
    /// Container-reported frame count, when present
    pub frame_count: Option<u64>,
    /// Whether the file has an audio stream
    pub has_audio: bool,
}

impl VideoInfo {
    /// Frame number at a presentation time.
    pub fn frame_index_at(&self, seconds: f64) -> u64 {
        if self.fps <= 0.0 || seconds <= 0.0 {
            return 0;
        }
        (seconds * self.fps).floor() as u64
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    time_base: Option<String>,
    sample_aspect_ratio: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

/// Probe a video file for information.
pub fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let ffprobe = check_ffprobe()?;

    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("FFprobe failed on {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_probe_output(&output.stdout)
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe_output(json: &[u8]) -> MediaResult<VideoInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::InvalidVideo("No video stream found".to_string()))?;
    let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

    let duration = probe
        .format
        .duration
        .as_deref()
        .or(video_stream.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let frame_rate = video_stream
        .avg_frame_rate
        .as_deref()
        .and_then(Rational::parse)
        .filter(Rational::is_valid)
        .or_else(|| {
            video_stream
                .r_frame_rate
                .as_deref()
                .and_then(Rational::parse)
                .filter(Rational::is_valid)
        })
        .unwrap_or(Rational::new(30, 1));

    let time_base = video_stream
        .time_base
        .as_deref()
        .and_then(Rational::parse)
        .unwrap_or_else(|| frame_rate.invert());

    let sample_aspect_ratio = video_stream
        .sample_aspect_ratio
        .as_deref()
        .and_then(Rational::parse)
        .unwrap_or(Rational::new(1, 1))
        .or(Rational::new(1, 1));

    Ok(VideoInfo {
        duration,
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        fps: frame_rate.as_f64(),
        frame_rate,
        time_base,
        sample_aspect_ratio,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
        pix_fmt: video_stream.pix_fmt.clone().unwrap_or_default(),
        frame_count: video_stream.nb_frames.as_deref().and_then(|n| n.parse().ok()),
        has_audio,
    })
}

/// Get video duration in seconds.
pub fn get_duration(path: impl AsRef<Path>) -> MediaResult<f64> {
    let info = probe_video(path)?;
    Ok(info.duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
             "pix_fmt": "yuv420p", "r_frame_rate": "30000/1001", "avg_frame_rate": "30000/1001",
             "time_base": "1/30000", "sample_aspect_ratio": "1:1", "nb_frames": "300"},
            {"codec_type": "audio", "codec_name": "aac"}
        ],
        "format": {"duration": "10.010000"}
    }"#;

    #[test]
    fn test_parse_probe_output() {
        let info = parse_probe_output(SAMPLE.as_bytes()).unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert_eq!(info.codec, "h264");
        assert!((info.fps - 29.97).abs() < 0.01);
        assert_eq!(info.time_base, Rational::new(1, 30000));
        assert_eq!(info.frame_count, Some(300));
        assert!(info.has_audio);
        assert!((info.duration - 10.01).abs() < 1e-9);
    }

    #[test]
    fn test_zero_sar_defaults_to_square() {
        let json = r#"{"streams": [{"codec_type": "video", "width": 64, "height": 64,
            "avg_frame_rate": "0/0", "r_frame_rate": "25/1", "sample_aspect_ratio": "0:1"}],
            "format": {}}"#;
        let info = parse_probe_output(json.as_bytes()).unwrap();
        assert_eq!(info.sample_aspect_ratio, Rational::new(1, 1));
        assert_eq!(info.frame_rate, Rational::new(25, 1));
        assert_eq!(info.time_base, Rational::new(1, 25));
        assert_eq!(info.duration, 0.0);
    }

    #[test]
    fn test_no_video_stream() {
        let json = r#"{"streams": [{"codec_type": "audio"}], "format": {}}"#;
        assert!(matches!(
            parse_probe_output(json.as_bytes()),
            Err(MediaError::InvalidVideo(_))
        ));
    }

    #[test]
    fn test_frame_index_at() {
        let info = parse_probe_output(SAMPLE.as_bytes()).unwrap();
        assert_eq!(info.frame_index_at(1.0), 29);
        assert_eq!(info.frame_index_at(-1.0), 0);
    }
}
