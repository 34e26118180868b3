//! Receives endpoint turns and queues them for playback.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use vox_relay_providers::{LiveSession, Turn};

use crate::convert::{ResamplerState, to_downlink_format};
use crate::stats::{Counter, RelayStats};

/// Cuts a continuous byte stream into fixed-size playback frames.
#[derive(Debug)]
pub struct PlaybackFramer {
    frame_bytes: usize,
    pending: BytesMut,
}

impl PlaybackFramer {
    pub fn new(frame_bytes: usize) -> Self {
        Self {
            frame_bytes: frame_bytes.max(1),
            pending: BytesMut::with_capacity(frame_bytes * 2),
        }
    }

    /// Append audio and return every frame that is now complete.
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.pending.extend_from_slice(data);
        let mut frames = Vec::with_capacity(self.pending.len() / self.frame_bytes);
        while self.pending.len() >= self.frame_bytes {
            frames.push(self.pending.split_to(self.frame_bytes).freeze());
        }
        frames
    }

    /// Zero-pad and return the partial tail, if any.
    pub fn flush(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            return None;
        }
        self.pending.resize(self.frame_bytes, 0);
        Some(self.pending.split().freeze())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Reads turns from the session, converts their audio, and queues playback
/// frames.
///
/// Any failure of the turn stream is logged and counted; the task then waits
/// for the backoff and opens a fresh iteration. Only cancellation stops it.
pub struct DownlinkTask {
    session: Arc<dyn LiveSession>,
    playback_tx: mpsc::UnboundedSender<Bytes>,
    source_rate: u32,
    target_rate: u32,
    backoff: Duration,
    framer: PlaybackFramer,
    resampler: ResamplerState,
    stats: Arc<RelayStats>,
}

impl DownlinkTask {
    pub fn new(
        session: Arc<dyn LiveSession>,
        playback_tx: mpsc::UnboundedSender<Bytes>,
        source_rate: u32,
        target_rate: u32,
        frame_bytes: usize,
        backoff: Duration,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            session,
            playback_tx,
            source_rate,
            target_rate,
            backoff,
            framer: PlaybackFramer::new(frame_bytes),
            resampler: ResamplerState::new(),
            stats,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        debug!(
            session = self.session.id(),
            from = self.source_rate,
            to = self.target_rate,
            "Downlink started"
        );
        let session = self.session.clone();
        loop {
            let outcome = {
                let mut turns = session.receive_turns();
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!("Downlink stopped");
                            return;
                        }
                        next = turns.next() => match next {
                            Some(Ok(turn)) => self.handle_turn(turn),
                            Some(Err(e)) => break Err(e),
                            None => break Ok(()),
                        },
                    }
                }
            };

            match outcome {
                Err(e) => warn!(%e, kind = e.kind(), "Turn stream failed, retrying"),
                Ok(()) => warn!("Turn stream ended, retrying"),
            }
            self.stats.incr(Counter::ReceiveErrors);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
        debug!("Downlink stopped");
    }

    fn handle_turn(&mut self, turn: Turn) {
        self.stats.incr(Counter::TurnsReceived);

        if turn.interrupted {
            let dropped = self.framer.flush().map_or(0, |tail| tail.len());
            self.resampler.reset();
            debug!(dropped, "Endpoint reply interrupted");
        }

        if let Some(audio) = turn.audio.as_ref().filter(|a| !a.is_empty()) {
            let frame = to_downlink_format(
                audio,
                self.source_rate,
                self.target_rate,
                &mut self.resampler,
            );
            trace!(in_len = audio.len(), out_len = frame.len(), "Downlinked audio");
            for playback in self.framer.push(&frame.data) {
                self.enqueue(playback);
            }
        }

        if turn.turn_complete {
            if let Some(tail) = self.framer.flush() {
                self.enqueue(tail);
            }
            self.resampler.reset();
        }
    }

    fn enqueue(&self, frame: Bytes) {
        if self.playback_tx.send(frame).is_err() {
            trace!("Egress gone, discarding playback frame");
            return;
        }
        self.stats.incr(Counter::PlaybackFrames);
    }
}
