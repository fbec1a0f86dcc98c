//! Frame pump: decode stream -> framer -> track
//!
//! One pump runs per session inside the session's background task. It
//! owns the decoder and the accumulation buffer; nothing else touches
//! either. The pump stops when the decoder ends or fails, or when the
//! session's cancellation token fires.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::decoder::DecodeStream;
use super::format::FrameGeometry;
use super::frame::FrameSink;
use super::framer::FrameFramer;

/// Size of a single read from the decode stream
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Default number of frames between progress logs
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100;

/// Why the pump stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    /// Decoder reached end of file and exited cleanly
    StreamEnd,
    /// Session was torn down
    Cancelled,
    /// Decoder read failed or the process exited with an error
    DecodeFailure(String),
}

/// Summary returned when the pump stops
#[derive(Debug, Clone)]
pub struct PumpReport {
    pub exit: PumpExit,
    /// Frames accepted by the track
    pub frames_sent: u64,
    /// Frames the track rejected
    pub frames_dropped: u64,
    /// Partial frame bytes left in the buffer
    pub leftover_bytes: usize,
}

/// Pumps frames from one decoder into one sink
pub struct FramePump<D: DecodeStream> {
    session_id: String,
    decoder: D,
    framer: FrameFramer,
    sink: Arc<dyn FrameSink>,
    cancel: CancellationToken,
    progress_interval: u64,
}

impl<D: DecodeStream> FramePump<D> {
    pub fn new(
        session_id: impl Into<String>,
        decoder: D,
        geometry: FrameGeometry,
        sink: Arc<dyn FrameSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            decoder,
            framer: FrameFramer::new(geometry),
            sink,
            cancel,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Log progress every `interval` frames (0 disables)
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.sink.is_stopped()
    }

    /// Run until the decoder ends, fails, or the session is cancelled
    pub async fn run(mut self) -> PumpReport {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let mut frames_sent = 0u64;
        let mut frames_dropped = 0u64;

        info!("Frame pump started for session {}", self.session_id);

        let exit = 'pump: loop {
            if self.should_stop() {
                break PumpExit::Cancelled;
            }

            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break 'pump PumpExit::Cancelled,
                read = self.decoder.read_chunk(&mut buf) => read,
            };

            let n = match read {
                Ok(0) => match self.decoder.finish().await {
                    Ok(()) => break PumpExit::StreamEnd,
                    Err(e) => break PumpExit::DecodeFailure(e.to_string()),
                },
                Ok(n) => n,
                Err(e) => break PumpExit::DecodeFailure(e.to_string()),
            };

            for frame in self.framer.feed(&buf[..n]) {
                if self.should_stop() {
                    break 'pump PumpExit::Cancelled;
                }

                match self.sink.on_frame(&frame).await {
                    Ok(()) => {
                        frames_sent += 1;
                        if self.progress_interval > 0 && frames_sent % self.progress_interval == 0 {
                            info!(
                                "Session {}: {} frames sent",
                                self.session_id, frames_sent
                            );
                        }
                    }
                    Err(e) => {
                        frames_dropped += 1;
                        warn!(
                            "Session {}: dropped frame {}: {}",
                            self.session_id, frame.sequence, e
                        );
                    }
                }
            }
        };

        self.decoder.terminate().await;

        match &exit {
            PumpExit::StreamEnd => info!("Session {}: video playback finished", self.session_id),
            PumpExit::Cancelled => debug!("Session {}: frame pump cancelled", self.session_id),
            PumpExit::DecodeFailure(reason) => {
                warn!("Session {}: decoder failed: {}", self.session_id, reason)
            }
        }
        info!(
            "Frame pump stopped for session {} ({} sent, {} dropped)",
            self.session_id, frames_sent, frames_dropped
        );

        PumpReport {
            exit,
            frames_sent,
            frames_dropped,
            leftover_bytes: self.framer.leftover().len(),
        }
    }
}
