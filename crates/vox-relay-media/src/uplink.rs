//! Sends sequenced transport audio to the AI endpoint.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use vox_relay_core::types::PcmFormat;
use vox_relay_providers::LiveSession;

use crate::convert::to_uplink_format;
use crate::stats::{Counter, RelayStats};

/// Converts each sequenced frame to the endpoint input format and sends it.
///
/// A failed send is logged and counted; the next frame is processed as
/// usual. Only cancellation stops the task.
pub struct UplinkTask {
    session: Arc<dyn LiveSession>,
    sequenced_rx: mpsc::UnboundedReceiver<Bytes>,
    source_rate: u32,
    target_rate: u32,
    stats: Arc<RelayStats>,
}

impl UplinkTask {
    pub fn new(
        session: Arc<dyn LiveSession>,
        sequenced_rx: mpsc::UnboundedReceiver<Bytes>,
        capture: PcmFormat,
        uplink: PcmFormat,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            session,
            sequenced_rx,
            source_rate: capture.sample_rate,
            target_rate: uplink.sample_rate,
            stats,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        debug!(
            session = self.session.id(),
            from = self.source_rate,
            to = self.target_rate,
            "Uplink started"
        );
        loop {
            let pcm = tokio::select! {
                _ = cancel.cancelled() => break,
                pcm = self.sequenced_rx.recv() => match pcm {
                    Some(pcm) => pcm,
                    None => {
                        debug!("Sequencer gone, uplink idle until cancelled");
                        cancel.cancelled().await;
                        break;
                    }
                },
            };

            let frame = to_uplink_format(&pcm, self.source_rate, self.target_rate);
            let len = frame.len();

            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.session.send_audio(frame) => match result {
                    Ok(()) => {
                        trace!(len, "Uplinked frame");
                        self.stats.incr(Counter::FramesSent);
                    }
                    Err(e) => {
                        warn!(%e, kind = e.kind(), "Failed to send audio to endpoint");
                        self.stats.incr(Counter::SendErrors);
                    }
                },
            }
        }
        debug!("Uplink stopped");
    }
}
