//! Loopback endpoint: every uplinked frame comes straight back as one
//! complete audio turn.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use vox_relay_core::types::AudioFrame;

use crate::{LiveSession, SessionConnector, SessionError, SessionOptions, Turn, TurnStream};

#[derive(Debug, Default)]
pub struct EchoConnector;

impl EchoConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionConnector for EchoConnector {
    fn id(&self) -> &str {
        "echo"
    }

    async fn connect(&self, options: &SessionOptions) -> Result<Arc<dyn LiveSession>, SessionError> {
        debug!(model = %options.model, voice = %options.voice, "Opening echo session");
        Ok(Arc::new(EchoSession::new()))
    }
}

pub struct EchoSession {
    turn_tx: mpsc::UnboundedSender<Turn>,
    turn_rx: Mutex<mpsc::UnboundedReceiver<Turn>>,
    closed: AtomicBool,
    frames_echoed: AtomicU64,
}

impl EchoSession {
    pub fn new() -> Self {
        let (turn_tx, turn_rx) = mpsc::unbounded_channel();
        Self {
            turn_tx,
            turn_rx: Mutex::new(turn_rx),
            closed: AtomicBool::new(false),
            frames_echoed: AtomicU64::new(0),
        }
    }

    pub fn frames_echoed(&self) -> u64 {
        self.frames_echoed.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for EchoSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LiveSession for EchoSession {
    fn id(&self) -> &str {
        "echo"
    }

    async fn send_audio(&self, frame: AudioFrame) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        self.turn_tx
            .send(Turn::audio(frame.data).completed())
            .map_err(|_| SessionError::Closed)?;
        self.frames_echoed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn receive_turns(&self) -> TurnStream<'_> {
        Box::pin(futures::stream::unfold(&self.turn_rx, |turn_rx| async move {
            let next = turn_rx.lock().await.recv().await;
            Some((next.ok_or(SessionError::Closed), turn_rx))
        }))
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
