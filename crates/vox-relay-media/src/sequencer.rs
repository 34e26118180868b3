//! Validates raw inbound frames before they reach the uplink.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use vox_relay_core::types::silence_frame;

use crate::stats::{Counter, RelayStats};

/// Drains the raw queue and republishes well-formed frames.
///
/// A frame whose length is not a multiple of `alignment` is dropped; nothing
/// is buffered across frames. A `None` sentinel becomes exactly one silence
/// frame.
pub struct Sequencer {
    alignment: usize,
    raw_rx: mpsc::UnboundedReceiver<Option<Bytes>>,
    sequenced_tx: mpsc::UnboundedSender<Bytes>,
    stats: Arc<RelayStats>,
}

impl Sequencer {
    pub fn new(
        alignment: usize,
        raw_rx: mpsc::UnboundedReceiver<Option<Bytes>>,
        sequenced_tx: mpsc::UnboundedSender<Bytes>,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            alignment,
            raw_rx,
            sequenced_tx,
            stats,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        debug!(alignment = self.alignment, "Sequencer started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                item = self.raw_rx.recv() => match item {
                    Some(frame) => self.process(frame),
                    None => {
                        debug!("Ingress closed, sequencer idle until cancelled");
                        cancel.cancelled().await;
                        break;
                    }
                },
            }
        }
        debug!("Sequencer stopped");
    }

    fn process(&self, frame: Option<Bytes>) {
        let out = match frame {
            None => {
                self.stats.incr(Counter::SilenceInserted);
                silence_frame()
            }
            Some(pcm) if self.alignment == 0 || pcm.len() % self.alignment != 0 => {
                debug!(len = pcm.len(), alignment = self.alignment, "Dropping misaligned frame");
                self.stats.incr(Counter::FramesDropped);
                return;
            }
            Some(pcm) => pcm,
        };

        if self.sequenced_tx.send(out).is_err() {
            trace!("Uplink gone, discarding sequenced frame");
            return;
        }
        self.stats.incr(Counter::FramesSequenced);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    struct Harness {
        raw_tx: mpsc::UnboundedSender<Option<Bytes>>,
        sequenced_rx: mpsc::UnboundedReceiver<Bytes>,
        stats: Arc<RelayStats>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(alignment: usize) -> Harness {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (sequenced_tx, sequenced_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(RelayStats::new());
        let cancel = CancellationToken::new();
        let sequencer = Sequencer::new(alignment, raw_rx, sequenced_tx, stats.clone());
        let task = tokio::spawn(sequencer.run(cancel.clone()));
        Harness {
            raw_tx,
            sequenced_rx,
            stats,
            cancel,
            task,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_aligned_frame_passes_through() {
        let mut h = start(960);
        let frame = Bytes::from(vec![3u8; 3840]);
        h.raw_tx.send(Some(frame.clone())).unwrap();
        assert_eq!(h.sequenced_rx.recv().await.unwrap(), frame);
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_misaligned_frame_is_dropped() {
        let mut h = start(960);
        h.raw_tx.send(Some(Bytes::from(vec![1u8; 1000]))).unwrap();
        settle().await;

        assert!(h.sequenced_rx.try_recv().is_err());
        assert_eq!(h.stats.get(Counter::FramesDropped), 1);
        assert!(!h.task.is_finished());
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_sentinel_becomes_one_silence_frame() {
        let mut h = start(960);
        h.raw_tx.send(None).unwrap();
        settle().await;

        assert_eq!(h.sequenced_rx.try_recv().unwrap(), silence_frame());
        assert!(h.sequenced_rx.try_recv().is_err());
        assert_eq!(h.stats.get(Counter::SilenceInserted), 1);
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_ingress_idles_until_cancelled() {
        let h = start(960);
        drop(h.raw_tx);
        settle().await;
        assert!(!h.task.is_finished());

        h.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), h.task)
            .await
            .unwrap()
            .unwrap();
    }
}
