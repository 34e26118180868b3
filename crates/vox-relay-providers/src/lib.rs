//! AI voice endpoint abstraction.
//!
//! Every streaming voice endpoint implements [`SessionConnector`], which opens
//! a bidirectional [`LiveSession`]: uplinked PCM goes in through
//! [`LiveSession::send_audio`], and the endpoint's replies come back on its
//! own schedule as a lazy stream of [`Turn`]s.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

use vox_relay_core::config::EndpointConfig;
use vox_relay_core::types::AudioFrame;

#[cfg(feature = "echo")]
pub mod echo;

#[cfg(feature = "gemini")]
pub mod gemini;

/// Errors raised by an endpoint session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session could not be established.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Credentials were missing or rejected.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// An uplink frame could not be delivered.
    #[error("Send failed: {0}")]
    Send(String),

    /// Reading from the endpoint failed.
    #[error("Receive failed: {0}")]
    Receive(String),

    /// The endpoint sent something the session could not interpret.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Session closed")]
    Closed,
}

impl SessionError {
    /// Short stable label for logs and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Auth(_) => "auth",
            Self::Send(_) => "send",
            Self::Receive(_) => "receive",
            Self::Protocol(_) => "protocol",
            Self::Timeout(_) => "timeout",
            Self::Closed => "closed",
        }
    }
}

/// One unit of output from the endpoint. It may or may not carry audio.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Turn {
    /// Raw 16-bit mono PCM at the endpoint's output rate.
    pub audio: Option<Bytes>,
    pub text: Option<String>,
    /// The endpoint finished its current reply.
    pub turn_complete: bool,
    /// The endpoint abandoned its current reply (e.g. the user barged in).
    pub interrupted: bool,
}

impl Turn {
    /// A turn carrying an audio payload.
    pub fn audio(data: impl Into<Bytes>) -> Self {
        Self {
            audio: Some(data.into()),
            ..Self::default()
        }
    }

    /// A text-only turn.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Mark this turn as the end of the endpoint's reply.
    pub fn completed(mut self) -> Self {
        self.turn_complete = true;
        self
    }

    pub fn has_audio(&self) -> bool {
        self.audio.as_ref().is_some_and(|a| !a.is_empty())
    }
}

/// Lazy, unbounded, non-restartable sequence of inbound turns.
pub type TurnStream<'a> = Pin<Box<dyn Stream<Item = Result<Turn, SessionError>> + Send + 'a>>;

/// Caller-supplied parameters for opening a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub model: String,
    pub voice: String,
    pub system_instruction: Option<String>,
}

impl SessionOptions {
    pub fn from_endpoint(config: &EndpointConfig) -> Self {
        Self {
            model: config.model.clone(),
            voice: config.voice.clone(),
            system_instruction: config.system_instruction.clone(),
        }
    }
}

/// A live bidirectional connection to an AI voice endpoint.
#[async_trait]
pub trait LiveSession: Send + Sync {
    /// Provider identifier (e.g., "gemini").
    fn id(&self) -> &str;

    /// Uplink one frame of 16-bit mono PCM.
    async fn send_audio(&self, frame: AudioFrame) -> Result<(), SessionError>;

    /// Stream inbound turns. Calling this again after an error resumes
    /// reading from where the previous stream stopped.
    fn receive_turns(&self) -> TurnStream<'_>;

    /// Release the connection.
    async fn close(&self) -> Result<(), SessionError>;
}

/// Opens [`LiveSession`]s against one endpoint.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    fn id(&self) -> &str;

    async fn connect(&self, options: &SessionOptions) -> Result<Arc<dyn LiveSession>, SessionError>;
}

/// Build the connector named by `config.provider`.
pub fn create_connector(config: &EndpointConfig) -> Result<Arc<dyn SessionConnector>, SessionError> {
    match config.provider.as_str() {
        #[cfg(feature = "gemini")]
        "gemini" => Ok(Arc::new(gemini::GeminiLiveConnector::from_config(config)?)),
        #[cfg(feature = "echo")]
        "echo" => Ok(Arc::new(echo::EchoConnector::new())),
        other => Err(SessionError::Connect(format!("unknown endpoint provider '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_constructors() {
        let turn = Turn::audio(vec![1u8, 2, 3]).completed();
        assert!(turn.has_audio());
        assert!(turn.turn_complete);
        assert!(!turn.interrupted);

        let text = Turn::text("hi");
        assert!(!text.has_audio());
        assert_eq!(text.text.as_deref(), Some("hi"));

        assert!(!Turn::audio(Vec::<u8>::new()).has_audio());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(SessionError::Send("x".into()).kind(), "send");
        assert_eq!(SessionError::Closed.kind(), "closed");
        assert_eq!(SessionError::Timeout("setup".into()).kind(), "timeout");
    }

    #[test]
    fn test_session_options_from_endpoint() {
        let config = EndpointConfig {
            voice: "Puck".into(),
            system_instruction: Some("be brief".into()),
            ..EndpointConfig::default()
        };
        let options = SessionOptions::from_endpoint(&config);
        assert_eq!(options.voice, "Puck");
        assert_eq!(options.model, config.model);
        assert_eq!(options.system_instruction.as_deref(), Some("be brief"));
    }

    #[test]
    fn test_create_connector_unknown_provider() {
        let config = EndpointConfig {
            provider: "carrier-pigeon".into(),
            ..EndpointConfig::default()
        };
        let err = create_connector(&config).err().expect("should fail");
        assert_eq!(err.kind(), "connect");
    }

    #[cfg(feature = "echo")]
    #[test]
    fn test_create_echo_connector() {
        let config = EndpointConfig {
            provider: "echo".into(),
            ..EndpointConfig::default()
        };
        let connector = create_connector(&config).unwrap();
        assert_eq!(connector.id(), "echo");
    }

    #[cfg(not(feature = "gemini"))]
    #[test]
    fn test_gemini_needs_feature() {
        let config = EndpointConfig {
            provider: "gemini".into(),
            api_key: Some("k".into()),
            ..EndpointConfig::default()
        };
        let err = create_connector(&config).err().expect("should fail");
        assert!(err.to_string().contains("unknown endpoint provider"));
    }
}
