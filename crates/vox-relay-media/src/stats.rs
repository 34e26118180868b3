//! Per-relay counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Events counted by the relay pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Frames handed to the ingress adapter, sentinels included.
    FramesReceived,
    /// Frames written after the relay had shut down.
    IngressDiscarded,
    /// Frames the sequencer dropped for bad alignment.
    FramesDropped,
    /// Silence frames the sequencer inserted for sentinels.
    SilenceInserted,
    FramesSequenced,
    FramesSent,
    SendErrors,
    TurnsReceived,
    ReceiveErrors,
    PlaybackFrames,
    /// Egress reads answered with queued audio.
    EgressAudio,
    /// Egress reads answered with the silence frame.
    EgressSilence,
}

impl Counter {
    pub fn label(self) -> &'static str {
        match self {
            Self::FramesReceived => "received",
            Self::IngressDiscarded => "ingress_discarded",
            Self::FramesDropped => "misaligned",
            Self::SilenceInserted => "silence_inserted",
            Self::FramesSequenced => "sequenced",
            Self::FramesSent => "sent",
            Self::SendErrors => "send",
            Self::TurnsReceived => "turns",
            Self::ReceiveErrors => "receive",
            Self::PlaybackFrames => "playback",
            Self::EgressAudio => "egress_audio",
            Self::EgressSilence => "egress_silence",
        }
    }

    pub fn is_error(self) -> bool {
        matches!(
            self,
            Self::IngressDiscarded | Self::FramesDropped | Self::SendErrors | Self::ReceiveErrors
        )
    }
}

/// Atomic counters shared by every stage of one relay.
#[derive(Debug, Default)]
pub struct RelayStats {
    frames_received: AtomicU64,
    ingress_discarded: AtomicU64,
    frames_dropped: AtomicU64,
    silence_inserted: AtomicU64,
    frames_sequenced: AtomicU64,
    frames_sent: AtomicU64,
    send_errors: AtomicU64,
    turns_received: AtomicU64,
    receive_errors: AtomicU64,
    playback_frames: AtomicU64,
    egress_audio: AtomicU64,
    egress_silence: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::FramesReceived => &self.frames_received,
            Counter::IngressDiscarded => &self.ingress_discarded,
            Counter::FramesDropped => &self.frames_dropped,
            Counter::SilenceInserted => &self.silence_inserted,
            Counter::FramesSequenced => &self.frames_sequenced,
            Counter::FramesSent => &self.frames_sent,
            Counter::SendErrors => &self.send_errors,
            Counter::TurnsReceived => &self.turns_received,
            Counter::ReceiveErrors => &self.receive_errors,
            Counter::PlaybackFrames => &self.playback_frames,
            Counter::EgressAudio => &self.egress_audio,
            Counter::EgressSilence => &self.egress_silence,
        }
    }

    pub fn incr(&self, counter: Counter) {
        self.slot(counter).fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        crate::metrics::record(counter);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.slot(counter).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.get(Counter::FramesReceived),
            ingress_discarded: self.get(Counter::IngressDiscarded),
            frames_dropped: self.get(Counter::FramesDropped),
            silence_inserted: self.get(Counter::SilenceInserted),
            frames_sequenced: self.get(Counter::FramesSequenced),
            frames_sent: self.get(Counter::FramesSent),
            send_errors: self.get(Counter::SendErrors),
            turns_received: self.get(Counter::TurnsReceived),
            receive_errors: self.get(Counter::ReceiveErrors),
            playback_frames: self.get(Counter::PlaybackFrames),
            egress_audio: self.get(Counter::EgressAudio),
            egress_silence: self.get(Counter::EgressSilence),
        }
    }
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub ingress_discarded: u64,
    pub frames_dropped: u64,
    pub silence_inserted: u64,
    pub frames_sequenced: u64,
    pub frames_sent: u64,
    pub send_errors: u64,
    pub turns_received: u64,
    pub receive_errors: u64,
    pub playback_frames: u64,
    pub egress_audio: u64,
    pub egress_silence: u64,
}
