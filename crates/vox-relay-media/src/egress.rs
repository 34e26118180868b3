//! Outbound side of the voice transport.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use vox_relay_core::types::silence_of_len;

use crate::stats::{Counter, RelayStats};

/// Supplies playback audio to the voice transport.
///
/// Polled on the transport's clock, once per playback frame. Must never
/// block; when nothing is ready it returns silence.
pub trait VoiceSource: Send + Sync {
    fn read(&self) -> Bytes;
}

/// Hands queued playback frames to the transport, or silence.
#[derive(Debug)]
pub struct EgressAdapter {
    playback_rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    silence: Bytes,
    stats: Arc<RelayStats>,
}

impl EgressAdapter {
    pub fn new(
        playback_rx: mpsc::UnboundedReceiver<Bytes>,
        frame_bytes: usize,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            playback_rx: Mutex::new(playback_rx),
            silence: silence_of_len(frame_bytes),
            stats,
        }
    }

    /// Number of playback frames waiting.
    pub fn pending(&self) -> usize {
        self.playback_rx.try_lock().map(|rx| rx.len()).unwrap_or(0)
    }

    fn silence(&self) -> Bytes {
        self.stats.incr(Counter::EgressSilence);
        self.silence.clone()
    }
}

impl VoiceSource for EgressAdapter {
    fn read(&self) -> Bytes {
        // A concurrent reader or a poisoned lock is treated like an empty queue.
        let Ok(mut rx) = self.playback_rx.try_lock() else {
            return self.silence();
        };
        match rx.try_recv() {
            Ok(frame) => {
                self.stats.incr(Counter::EgressAudio);
                frame
            }
            Err(_) => self.silence(),
        }
    }
}
