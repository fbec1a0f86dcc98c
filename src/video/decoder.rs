//! ffmpeg decode process adapter
//!
//! Spawns one ffmpeg process per session that turns the configured media
//! file into a raw I420 byte stream on stdout, paced at the source's
//! native rate (`-re`). stderr is drained by a background task so the
//! pipe never fills up.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::format::FrameGeometry;
use crate::error::{AppError, Result};

/// Number of stderr lines kept for error reporting
const STDERR_TAIL_LINES: usize = 8;

/// Byte stream produced by a decoder
///
/// `read_chunk` returning 0 is end-of-stream; `finish` then tells a
/// clean end apart from a decoder error.
#[async_trait]
pub trait DecodeStream: Send {
    /// Read the next chunk of raw bytes. Must be cancel safe.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Wait for the decoder to exit after end-of-stream
    async fn finish(&mut self) -> Result<()>;

    /// Kill the decoder if it is still running. Idempotent.
    async fn terminate(&mut self);
}

/// Decoder invocation settings
#[derive(Debug, Clone)]
pub struct DecoderSettings {
    /// ffmpeg binary
    pub program: PathBuf,
    /// ffmpeg `-loglevel`
    pub log_level: String,
    /// Output geometry
    pub geometry: FrameGeometry,
}

impl DecoderSettings {
    pub fn new(program: impl Into<PathBuf>, geometry: FrameGeometry) -> Self {
        Self {
            program: program.into(),
            log_level: "error".to_string(),
            geometry,
        }
    }

    /// Build the ffmpeg argument list for an input file
    pub fn args(&self, input: &Path) -> Vec<String> {
        let geometry = &self.geometry;
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
            // Read input at native frame rate instead of dumping it
            "-re".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-an".to_string(),
            "-vcodec".to_string(),
            "rawvideo".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            geometry.format.ffmpeg_name().to_string(),
            "-s".to_string(),
            geometry.resolution.to_string(),
            "-r".to_string(),
            geometry.fps.to_string(),
            "pipe:1".to_string(),
        ]
    }
}

/// Running ffmpeg process exposing its stdout as a decode stream
pub struct FfmpegDecoder {
    child: Child,
    stdout: ChildStdout,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    exited: Option<ExitStatus>,
}

impl FfmpegDecoder {
    /// Spawn the decoder for `input`
    ///
    /// Fails with `ResourceNotFound` when the file does not exist and
    /// with `DecodeFailure` when the process cannot be started.
    pub fn spawn(settings: &DecoderSettings, input: &Path) -> Result<Self> {
        if !input.is_file() {
            return Err(AppError::ResourceNotFound(input.display().to_string()));
        }

        let args = settings.args(input);
        info!(
            "Starting decoder: {} {}",
            settings.program.display(),
            args.join(" ")
        );

        let mut child = Command::new(&settings.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::DecodeFailure(format!(
                    "Failed to start {}: {}",
                    settings.program.display(),
                    e
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::DecodeFailure("Decoder stdout not captured".to_string()))?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        if let Some(stderr) = child.stderr.take() {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                collect_stderr(stderr, tail).await;
            });
        }

        debug!("Decoder started with PID {:?}", child.id());

        Ok(Self {
            child,
            stdout,
            stderr_tail,
            exited: None,
        })
    }

    fn last_stderr_line(&self) -> Option<String> {
        self.stderr_tail.lock().back().cloned()
    }

    fn failure(&self, reason: String) -> AppError {
        match self.last_stderr_line() {
            Some(line) => AppError::DecodeFailure(format!("{} ({})", reason, line)),
            None => AppError::DecodeFailure(reason),
        }
    }
}

#[async_trait]
impl DecodeStream for FfmpegDecoder {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stdout
            .read(buf)
            .await
            .map_err(|e| self.failure(format!("Failed to read decoder output: {}", e)))
    }

    async fn finish(&mut self) -> Result<()> {
        let status = match self.exited {
            Some(status) => status,
            None => {
                let status = self
                    .child
                    .wait()
                    .await
                    .map_err(|e| self.failure(format!("Failed to wait for decoder: {}", e)))?;
                self.exited = Some(status);
                status
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(self.failure(format!("Decoder exited with {}", status)))
        }
    }

    async fn terminate(&mut self) {
        if self.exited.is_some() {
            return;
        }

        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exited = Some(status);
            }
            Ok(None) => {
                if let Err(e) = self.child.kill().await {
                    warn!("Failed to kill decoder: {}", e);
                } else {
                    info!("Decoder process terminated");
                }
                self.exited = self.child.try_wait().ok().flatten();
            }
            Err(e) => {
                warn!("Failed to query decoder status: {}", e);
            }
        }
    }
}

/// Log decoder stderr and keep the last few lines
async fn collect_stderr<R: AsyncRead + Unpin>(reader: R, tail: Arc<Mutex<VecDeque<String>>>) {
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!("[ffmpeg] {}", line);
                let mut tail = tail.lock();
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                warn!("[ffmpeg] Error reading stderr: {}", e);
                break;
            }
        }
    }
}
