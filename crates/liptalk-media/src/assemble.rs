//! Video assembly: frame encoding and audio muxing.
//!
//! Frames are streamed into an FFmpeg child as raw RGB24 on stdin, so
//! encoding overlaps frame synthesis without giving up the sequential
//! fold. Audio is attached afterwards by an ordered list of uniform
//! try/succeed/reject strategies; when every strategy fails the video-only
//! file is still promoted to the output path — audio failure is never a
//! hard failure of the run.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::RgbImage;
use liptalk_models::EncodingConfig;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{RenderError, RenderResult};
use crate::progress::{parse_progress_line, FfmpegProgress};

/// Streams raw frames into a spawned FFmpeg encoder.
pub struct FrameSink {
    child: Child,
    stdin: ChildStdin,
    runner: FfmpegRunner,
    frames_written: usize,
}

/// Spawn the frame encoder writing a video-only container to `dest`.
///
/// Any failure here (or in the sink later) is a fatal `Encode` error: with
/// no video there is nothing to deliver.
pub fn start_encoder(
    width: u32,
    height: u32,
    fps: u32,
    encoding: &EncodingConfig,
    dest: &Path,
    cancel: Option<watch::Receiver<bool>>,
) -> RenderResult<FrameSink> {
    let cmd = FfmpegCommand::new(dest)
        .stdin_input()
        .input_args(["-f", "rawvideo"])
        .input_args(["-pix_fmt", "rgb24"])
        .input_arg("-s")
        .input_arg(format!("{width}x{height}"))
        .input_arg("-r")
        .input_arg(fps.to_string())
        .no_audio()
        .output_args(encoding.to_video_args())
        // yuv420p needs even dimensions; scale odd inputs down one pixel
        .video_filter("scale=trunc(iw/2)*2:trunc(ih/2)*2")
        .log_level("error");

    let mut runner = FfmpegRunner::new();
    if let Some(rx) = cancel {
        runner = runner.with_cancel(rx);
    }

    let mut child = runner.spawn(&cmd).map_err(|e| e.into_encode())?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| RenderError::encode("encoder stdin not captured", None, None))?;

    // Drain stderr so the progress pipe never backs up and blocks the
    // encoder mid-stream
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            let mut progress = FfmpegProgress::default();
            while let Ok(Some(line)) = reader.next_line().await {
                if let Some(snapshot) = parse_progress_line(&line, &mut progress) {
                    debug!(frame = snapshot.frame, fps = snapshot.fps, "Encoder progress");
                }
            }
        });
    }

    debug!(width, height, fps, dest = %dest.display(), "Frame encoder started");

    Ok(FrameSink {
        child,
        stdin,
        runner,
        frames_written: 0,
    })
}

impl FrameSink {
    /// Write one RGB24 frame.
    pub async fn write_frame(&mut self, frame: &RgbImage) -> RenderResult<()> {
        self.stdin.write_all(frame.as_raw()).await.map_err(|e| {
            RenderError::encode(format!("writing frame {}: {e}", self.frames_written), None, None)
        })?;
        self.frames_written += 1;
        Ok(())
    }

    /// Close stdin and wait for the encoder to finish.
    pub async fn finish(mut self) -> RenderResult<usize> {
        // Dropping stdin signals end of stream
        drop(self.stdin);

        self.runner
            .wait(&mut self.child)
            .await
            .map_err(|e| e.into_encode())?;

        debug!(frames = self.frames_written, "Frame encoding complete");
        Ok(self.frames_written)
    }
}

/// A single audio/video muxing strategy.
#[async_trait]
pub trait MuxStrategy: Send + Sync {
    /// Strategy name for logs and the render report.
    fn name(&self) -> &'static str;

    /// Attempt to produce `output` from the video-only file and the audio
    /// track. `workdir` may be used for intermediate files.
    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        encoding: &EncodingConfig,
        workdir: &Path,
    ) -> RenderResult<()>;
}

/// Stream-copy the video and encode the audio in one pass.
pub struct StreamCopyMux;

#[async_trait]
impl MuxStrategy for StreamCopyMux {
    fn name(&self) -> &'static str {
        "stream_copy"
    }

    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        encoding: &EncodingConfig,
        _workdir: &Path,
    ) -> RenderResult<()> {
        let cmd = stream_copy_command(video, audio, output, encoding);
        FfmpegRunner::new()
            .run(&cmd)
            .await
            .map_err(|e| RenderError::mux("stream_copy", e.to_string()))
    }
}

/// Re-encode the audio to a known format first, then stream-copy mux.
pub struct ReencodeAudioMux;

#[async_trait]
impl MuxStrategy for ReencodeAudioMux {
    fn name(&self) -> &'static str {
        "reencode_audio"
    }

    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        encoding: &EncodingConfig,
        workdir: &Path,
    ) -> RenderResult<()> {
        let reencoded = workdir.join(format!("audio_{}.m4a", uuid::Uuid::new_v4()));

        let prep = FfmpegCommand::new(&reencoded)
            .input(audio)
            .no_video()
            .output_args(encoding.to_audio_args())
            .log_level("error");

        let result = async {
            FfmpegRunner::new()
                .run(&prep)
                .await
                .map_err(|e| RenderError::mux("reencode_audio", format!("audio prep: {e}")))?;

            let cmd = stream_copy_command(video, &reencoded, output, encoding);
            FfmpegRunner::new()
                .run(&cmd)
                .await
                .map_err(|e| RenderError::mux("reencode_audio", e.to_string()))
        }
        .await;

        // The intermediate is removed on both success and failure; the
        // workdir itself is a TempDir guard for the panic path
        let _ = tokio::fs::remove_file(&reencoded).await;

        result
    }
}

/// Terminal strategy: full re-encode of both streams in one pass.
pub struct ReencodeBothMux;

#[async_trait]
impl MuxStrategy for ReencodeBothMux {
    fn name(&self) -> &'static str {
        "reencode_both"
    }

    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        encoding: &EncodingConfig,
        _workdir: &Path,
    ) -> RenderResult<()> {
        let cmd = FfmpegCommand::new(output)
            .input(video)
            .input(audio)
            .output_args(encoding.to_video_args())
            .output_args(encoding.to_audio_args())
            .map("0:v:0")
            .map("1:a:0")
            .shortest()
            .log_level("error");

        FfmpegRunner::new()
            .run(&cmd)
            .await
            .map_err(|e| RenderError::mux("reencode_both", e.to_string()))
    }
}

fn stream_copy_command(
    video: &Path,
    audio: &Path,
    output: &Path,
    encoding: &EncodingConfig,
) -> FfmpegCommand {
    FfmpegCommand::new(output)
        .input(video)
        .input(audio)
        .video_codec("copy")
        .audio_codec(encoding.audio_codec.as_str())
        .audio_bitrate(encoding.audio_bitrate.as_str())
        .map("0:v:0")
        .map("1:a:0")
        .shortest()
        .log_level("error")
}

/// The default strategy order.
pub fn default_strategies() -> Vec<Box<dyn MuxStrategy>> {
    vec![
        Box::new(StreamCopyMux),
        Box::new(ReencodeAudioMux),
        Box::new(ReencodeBothMux),
    ]
}

/// Try each strategy in order until one succeeds.
///
/// Returns the name of the winning strategy, or `None` when every strategy
/// failed and the caller should fall back to the video-only file.
pub async fn mux_with_fallback(
    strategies: &[Box<dyn MuxStrategy>],
    video: &Path,
    audio: &Path,
    output: &Path,
    encoding: &EncodingConfig,
    workdir: &Path,
) -> Option<&'static str> {
    for strategy in strategies {
        match strategy.mux(video, audio, output, encoding, workdir).await {
            Ok(()) => {
                debug!(strategy = strategy.name(), "Audio muxed");
                return Some(strategy.name());
            }
            Err(e) => {
                warn!(strategy = strategy.name(), error = %e, "Mux strategy failed, trying next");
            }
        }
    }
    None
}

/// Derive the default output path next to the base image (the original
/// tool's convention: `<stem>_lip_talking.mp4`).
pub fn default_output_path(base_image: &Path) -> PathBuf {
    let stem = base_image
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "portrait".to_string());
    base_image.with_file_name(format!("{stem}_lip_talking.mp4"))
}
