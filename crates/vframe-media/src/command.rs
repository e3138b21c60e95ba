//! FFmpeg command builder and blocking runner.
//!
//! The crop pipeline runs one video per worker thread, so commands are
//! driven with `std::process` and never touch an async runtime.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use tracing::debug;

use crate::error::{last_stderr_line, MediaError, MediaResult};

/// An additional `-i` input with its own input arguments.
#[derive(Debug, Clone)]
struct ExtraInput {
    args: Vec<String>,
    path: PathBuf,
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path (or `pipe:0`)
    input: PathBuf,
    /// Output file path (or `pipe:1`)
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Inputs after the primary one
    extra_inputs: Vec<ExtraInput>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            extra_inputs: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add multiple input arguments.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a second (third, ...) input.
    pub fn extra_input<I, S>(mut self, args: I, path: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_inputs.push(ExtraInput {
            args: args.into_iter().map(Into::into).collect(),
            path: path.as_ref().to_path_buf(),
        });
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set seek position (before input).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Decode with a hardware accelerator and an explicit decoder.
    pub fn hwaccel(self, device: &str, decoder: Option<&str>) -> Self {
        let cmd = self.input_arg("-hwaccel").input_arg(device);
        match decoder {
            Some(name) => cmd.input_arg("-c:v").input_arg(name),
            None => cmd,
        }
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Extract single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-frames:v").output_arg("1")
    }

    /// Write raw frames of `pix_fmt` to the output.
    pub fn raw_video(self, pix_fmt: &str) -> Self {
        self.output_args(["-f", "rawvideo", "-pix_fmt", pix_fmt])
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-nostdin".to_string());
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        args.extend(self.input_args.clone());
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        for extra in &self.extra_inputs {
            args.extend(extra.args.clone());
            args.push("-i".to_string());
            args.push(extra.path.to_string_lossy().to_string());
        }

        args.extend(self.output_args.clone());
        args.push(self.output.to_string_lossy().to_string());

        args
    }

    /// Whether the primary input is read from stdin.
    fn reads_stdin(&self) -> bool {
        self.input.as_os_str() == "pipe:0" || self.input.as_os_str() == "-"
    }
}

/// Blocking runner for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    binary: PathBuf,
}

impl FfmpegRunner {
    /// Locate `ffmpeg` in PATH.
    pub fn new() -> MediaResult<Self> {
        Ok(Self {
            binary: check_ffmpeg()?,
        })
    }

    /// Use a specific ffmpeg binary.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run a command to completion.
    pub fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.capture(cmd).map(|_| ())
    }

    /// Run a command and return everything it wrote to stdout.
    pub fn capture(&self, cmd: &FfmpegCommand) -> MediaResult<Vec<u8>> {
        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(MediaError::ffmpeg_failed(
                last_stderr_line(&stderr).unwrap_or_else(|| "FFmpeg exited with non-zero status".to_string()),
                Some(stderr),
                output.status.code(),
            ))
        }
    }

    /// Spawn a long-running command with piped stdout (and stdin when the
    /// input is `pipe:0`). Stderr is drained on a helper thread.
    pub fn spawn(&self, cmd: &FfmpegCommand) -> MediaResult<FfmpegChild> {
        let args = cmd.build_args();
        debug!("Spawning FFmpeg: ffmpeg {}", args.join(" "));

        let stdin = if cmd.reads_stdin() {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });

        Ok(FfmpegChild {
            child,
            stderr,
            finished: false,
        })
    }

    /// Run `ffmpeg <args>` and return stdout as text (capability queries).
    pub fn query(&self, args: &[&str]) -> MediaResult<String> {
        let output = Command::new(&self.binary)
            .arg("-hide_banner")
            .args(args)
            .stdin(Stdio::null())
            .output()?;
        if !output.status.success() {
            return Err(MediaError::ffmpeg_failed(
                format!("ffmpeg {} failed", args.join(" ")),
                Some(String::from_utf8_lossy(&output.stderr).to_string()),
                output.status.code(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Hardware accelerators reported by `ffmpeg -hwaccels`.
    pub fn hwaccels(&self) -> MediaResult<Vec<String>> {
        let text = self.query(&["-hwaccels"])?;
        Ok(parse_hwaccels(&text))
    }

    /// Whether ffmpeg was built with the named encoder.
    pub fn has_encoder(&self, name: &str) -> MediaResult<bool> {
        let text = self.query(&["-encoders"])?;
        Ok(listing_contains(&text, name))
    }

    /// Whether ffmpeg was built with the named decoder.
    pub fn has_decoder(&self, name: &str) -> MediaResult<bool> {
        let text = self.query(&["-decoders"])?;
        Ok(listing_contains(&text, name))
    }
}

/// A running FFmpeg process. Killed on drop unless waited.
#[derive(Debug)]
pub struct FfmpegChild {
    child: Child,
    stderr: Option<JoinHandle<String>>,
    finished: bool,
}

impl FfmpegChild {
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Wait for exit; a non-zero status becomes `FfmpegFailed` carrying stderr.
    pub fn wait(&mut self) -> MediaResult<()> {
        // Closing stdin lets encoders reading from a pipe see end-of-input.
        drop(self.child.stdin.take());
        let status = self.child.wait()?;
        self.finished = true;
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                last_stderr_line(&stderr).unwrap_or_else(|| "FFmpeg exited with non-zero status".to_string()),
                Some(stderr),
                status.code(),
            ))
        }
    }

    /// Terminate the process without reporting its status.
    pub fn kill(&mut self) {
        if self.finished {
            return;
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.finished = true;
    }
}

impl Drop for FfmpegChild {
    fn drop(&mut self) {
        self.kill();
    }
}

fn parse_hwaccels(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.ends_with(':'))
        .map(str::to_string)
        .collect()
}

/// Match a codec name in `-encoders`/`-decoders` listings (` V....D name  desc`).
fn listing_contains(text: &str, name: &str) -> bool {
    text.lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|codec| codec == name)
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mp4", "pipe:1")
            .seek(10.0)
            .hwaccel("cuda", Some("h264_cuvid"))
            .video_filter("scale=320:180,format=gray")
            .single_frame()
            .raw_video("gray");

        let args = cmd.build_args();
        let joined = args.join(" ");
        assert!(joined.starts_with("-y -hide_banner -nostdin -v error"));
        assert!(joined.contains("-ss 10.000 -hwaccel cuda -c:v h264_cuvid -i input.mp4"));
        assert!(joined.contains("-frames:v 1 -f rawvideo -pix_fmt gray pipe:1"));
        assert!(!cmd.reads_stdin());
    }

    #[test]
    fn test_extra_input_order() {
        let cmd = FfmpegCommand::new("pipe:0", "out.mp4")
            .input_args(["-f", "rawvideo"])
            .extra_input(Vec::<String>::new(), "source.mkv")
            .output_args(["-map", "0:v:0", "-map", "1:a:0?"]);
        let args = cmd.build_args();
        let first = args.iter().position(|a| a == "pipe:0").unwrap();
        let second = args.iter().position(|a| a == "source.mkv").unwrap();
        let map = args.iter().position(|a| a == "-map").unwrap();
        assert!(first < second && second < map);
        assert!(cmd.reads_stdin());
    }

    #[test]
    fn test_capability_parsing() {
        let hwaccels = "Hardware acceleration methods:\ncuda\nvaapi\n\n";
        assert_eq!(parse_hwaccels(hwaccels), vec!["cuda", "vaapi"]);

        let encoders = " V....D libx264              libx264 H.264\n V....D h264_nvenc           NVIDIA NVENC H.264 encoder\n";
        assert!(listing_contains(encoders, "h264_nvenc"));
        assert!(!listing_contains(encoders, "hevc_nvenc"));
    }
}
