//! FFmpeg command builder and runner.
//!
//! The builder supports multiple inputs (the muxing stage feeds a video and
//! an audio file) and a stdin input (the encoding stage pipes raw frames).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{RenderError, RenderResult};
use crate::progress::{parse_progress_line, FfmpegProgress};

/// A single FFmpeg input with its preceding arguments.
#[derive(Debug, Clone)]
struct FfmpegInput {
    /// Arguments placed before this input's `-i`
    args: Vec<String>,
    /// Input source: a file path, or stdin (`-`)
    source: InputSource,
}

#[derive(Debug, Clone)]
enum InputSource {
    Path(PathBuf),
    Stdin,
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<FfmpegInput>,
    /// Output file path
    output: PathBuf,
    /// Output arguments (after the inputs)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command writing to `output`.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add a file input.
    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.inputs.push(FfmpegInput {
            args: Vec::new(),
            source: InputSource::Path(path.as_ref().to_path_buf()),
        });
        self
    }

    /// Add a stdin (`-i -`) input.
    pub fn stdin_input(mut self) -> Self {
        self.inputs.push(FfmpegInput {
            args: Vec::new(),
            source: InputSource::Stdin,
        });
        self
    }

    /// Add an argument before the most recently added input's `-i`.
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        if let Some(input) = self.inputs.last_mut() {
            input.args.push(arg.into());
        }
        self
    }

    /// Add multiple arguments before the most recently added input's `-i`.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(input) = self.inputs.last_mut() {
            input.args.extend(args.into_iter().map(Into::into));
        }
        self
    }

    /// Add an output argument (after the inputs).
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

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set audio bitrate.
    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Add a stream mapping (e.g. "0:v:0").
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    /// Stop writing at the end of the shortest input.
    pub fn shortest(self) -> Self {
        self.output_arg("-shortest")
    }

    /// Drop the audio streams of all inputs.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Drop the video streams of all inputs.
    pub fn no_video(self) -> Self {
        self.output_arg("-vn")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Whether any input reads from stdin.
    pub fn reads_stdin(&self) -> bool {
        self.inputs
            .iter()
            .any(|i| matches!(i.source, InputSource::Stdin))
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        for input in &self.inputs {
            args.extend(input.args.clone());
            args.push("-i".to_string());
            match &input.source {
                InputSource::Path(p) => args.push(p.to_string_lossy().to_string()),
                InputSource::Stdin => args.push("-".to_string()),
            }
        }

        args.extend(self.output_args.clone());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with progress tracking and cancellation.
pub struct FfmpegRunner {
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
    /// Timeout in seconds
    timeout_secs: Option<u64>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self {
            cancel_rx: None,
            timeout_secs: None,
        }
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run an FFmpeg command to completion.
    pub async fn run(&self, cmd: &FfmpegCommand) -> RenderResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with a progress callback.
    pub async fn run_with_progress<F>(&self, cmd: &FfmpegCommand, progress_callback: F) -> RenderResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        let mut child = self.spawn(cmd)?;

        // Close stdin immediately; streaming callers use `spawn` directly
        drop(child.stdin.take());

        let stderr = child.stderr.take().expect("stderr not captured");
        let mut reader = BufReader::new(stderr).lines();

        // Parse progress lines while the encoder runs
        let progress_handle = tokio::spawn(async move {
            let mut current_progress = FfmpegProgress::default();

            while let Ok(Some(line)) = reader.next_line().await {
                if let Some(progress) = parse_progress_line(&line, &mut current_progress) {
                    progress_callback(progress.clone());
                }
            }
        });

        let result = self.wait(&mut child).await;

        let _ = progress_handle.await;

        result
    }

    /// Spawn an FFmpeg child without waiting for it.
    ///
    /// Stdin is piped when the command declares a stdin input, so the caller
    /// can stream data in; otherwise it is closed.
    pub fn spawn(&self, cmd: &FfmpegCommand) -> RenderResult<Child> {
        which::which("ffmpeg").map_err(|_| RenderError::FfmpegNotFound)?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let stdin = if cmd.reads_stdin() {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        let child = Command::new("ffmpeg")
            .args(&args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        Ok(child)
    }

    /// Wait for a spawned child with cancellation and timeout.
    pub async fn wait(&self, child: &mut Child) -> RenderResult<()> {
        let wait_future = child.wait();

        let wait_future = if let Some(timeout_secs) = self.timeout_secs {
            let timeout = tokio::time::timeout(
                std::time::Duration::from_secs(timeout_secs),
                wait_future,
            );
            match timeout.await {
                Ok(result) => result,
                Err(_) => {
                    warn!("FFmpeg timed out after {} seconds, killing process", timeout_secs);
                    let _ = child.kill().await;
                    return Err(RenderError::Timeout(timeout_secs));
                }
            }
        } else {
            wait_future.await
        };

        if let Some(ref cancel_rx) = self.cancel_rx {
            if *cancel_rx.borrow() {
                info!("FFmpeg cancelled, killing process");
                let _ = child.kill().await;
                return Err(RenderError::Cancelled);
            }
        }

        let status = wait_future?;

        if status.success() {
            Ok(())
        } else {
            Err(RenderError::ffmpeg(
                "FFmpeg exited with non-zero status",
                None,
                status.code(),
            ))
        }
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> RenderResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| RenderError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> RenderResult<PathBuf> {
    which::which("ffprobe").map_err(|_| RenderError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_input_ordering() {
        let cmd = FfmpegCommand::new("output.mp4")
            .input("input.wav")
            .no_video()
            .audio_codec("aac");

        let args = cmd.build_args();
        let i_pos = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i_pos + 1], "input.wav");
        // Output args come after the input
        let vn_pos = args.iter().position(|a| a == "-vn").unwrap();
        assert!(vn_pos > i_pos);
        assert_eq!(args.last().unwrap(), "output.mp4");
    }

    #[test]
    fn test_multi_input_ordering() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input("video.mp4")
            .input("audio.m4a")
            .video_codec("copy")
            .map("0:v:0")
            .map("1:a:0")
            .shortest();

        let args = cmd.build_args();
        let i_positions: Vec<usize> = args
            .iter()
            .enumerate()
            .filter(|(_, a)| *a == "-i")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(i_positions.len(), 2);
        assert_eq!(args[i_positions[0] + 1], "video.mp4");
        assert_eq!(args[i_positions[1] + 1], "audio.m4a");
        assert!(args.contains(&"-shortest".to_string()));
    }

    #[test]
    fn test_stdin_input_args() {
        let cmd = FfmpegCommand::new("out.mp4")
            .stdin_input()
            .input_args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .video_codec("libx264");

        assert!(cmd.reads_stdin());
        let args = cmd.build_args();
        let i_pos = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i_pos + 1], "-");
        // Raw-format args precede the stdin input
        let f_pos = args.iter().position(|a| a == "-f").unwrap();
        assert!(f_pos < i_pos);
    }

    #[test]
    fn test_input_args_attach_to_last_input() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input("a.mp4")
            .input("b.wav")
            .input_args(["-ss", "1.5"]);

        let args = cmd.build_args();
        let ss_pos = args.iter().position(|a| a == "-ss").unwrap();
        let b_pos = args.iter().position(|a| a == "b.wav").unwrap();
        let a_pos = args.iter().position(|a| a == "a.mp4").unwrap();
        assert!(ss_pos > a_pos && ss_pos < b_pos);
    }
}
