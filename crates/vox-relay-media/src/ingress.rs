//! Inbound side of the voice transport.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use crate::stats::{Counter, RelayStats};

/// Receives inbound audio from the voice transport.
///
/// Called on the transport's own thread for every packet; implementations
/// must return immediately.
pub trait VoiceSink: Send + Sync {
    /// `pcm` is `None` when the packet carried no decodable audio.
    fn write(&self, participant: Option<u64>, pcm: Option<Bytes>);
}

/// Enqueues raw inbound frames for the sequencer. Does no conversion.
#[derive(Debug, Clone)]
pub struct IngressAdapter {
    raw_tx: mpsc::UnboundedSender<Option<Bytes>>,
    stats: Arc<RelayStats>,
}

impl IngressAdapter {
    pub fn new(raw_tx: mpsc::UnboundedSender<Option<Bytes>>, stats: Arc<RelayStats>) -> Self {
        Self { raw_tx, stats }
    }

    /// Whether the relay is still consuming frames.
    pub fn is_open(&self) -> bool {
        !self.raw_tx.is_closed()
    }
}

impl VoiceSink for IngressAdapter {
    fn write(&self, participant: Option<u64>, pcm: Option<Bytes>) {
        self.stats.incr(Counter::FramesReceived);
        let len = pcm.as_ref().map(Bytes::len);
        if self.raw_tx.send(pcm).is_err() {
            trace!(?participant, ?len, "Relay closed, discarding inbound frame");
            self.stats.incr(Counter::IngressDiscarded);
            return;
        }
        trace!(?participant, ?len, "Inbound frame queued");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_enqueues_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stats = Arc::new(RelayStats::new());
        let ingress = IngressAdapter::new(tx, stats.clone());

        ingress.write(Some(7), Some(Bytes::from_static(&[1, 2])));
        ingress.write(None, None);

        assert_eq!(rx.try_recv().unwrap(), Some(Bytes::from_static(&[1, 2])));
        assert_eq!(rx.try_recv().unwrap(), None);
        assert_eq!(stats.get(Counter::FramesReceived), 2);
    }

    #[test]
    fn test_write_after_close_is_discarded() {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(RelayStats::new());
        let ingress = IngressAdapter::new(tx, stats.clone());
        drop(rx);

        assert!(!ingress.is_open());
        ingress.write(Some(1), Some(Bytes::from_static(&[0; 4])));
        assert_eq!(stats.get(Counter::IngressDiscarded), 1);
    }
}
