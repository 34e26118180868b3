//! Gemini Live endpoint.
//!
//! Speaks the `BidiGenerateContent` WebSocket protocol: a `setup` message
//! selects the model, voice, and system instruction; uplink audio travels as
//! base64 PCM in `realtimeInput` messages; replies arrive as `serverContent`
//! messages whose model-turn parts carry base64 PCM at 24 kHz.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::BytesMut;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use vox_relay_core::config::EndpointConfig;
use vox_relay_core::types::AudioFrame;

use crate::{LiveSession, SessionConnector, SessionError, SessionOptions, Turn, TurnStream};

const DEFAULT_BASE_URL: &str = "wss://generativelanguage.googleapis.com";
const BIDI_PATH: &str =
    "/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct GeminiLiveConnector {
    pub base_url: String,
    api_key: String,
    connect_timeout: Duration,
}

impl GeminiLiveConnector {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>, connect_timeout: Duration) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.into(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &EndpointConfig) -> Result<Self, SessionError> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| SessionError::Auth("No Gemini API key configured".into()))?;
        Ok(Self::new(
            api_key,
            config.base_url.as_deref(),
            config.connect_timeout(),
        ))
    }

    fn url(&self) -> String {
        format!("{}{BIDI_PATH}?key={}", self.base_url, self.api_key)
    }
}

#[async_trait]
impl SessionConnector for GeminiLiveConnector {
    fn id(&self) -> &str {
        "gemini"
    }

    async fn connect(&self, options: &SessionOptions) -> Result<Arc<dyn LiveSession>, SessionError> {
        debug!(base_url = %self.base_url, model = %options.model, "Connecting to Gemini Live");

        let (ws, _response) = tokio::time::timeout(self.connect_timeout, connect_async(self.url()))
            .await
            .map_err(|_| SessionError::Timeout("websocket handshake".into()))?
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        let (mut sink, mut stream) = ws.split();

        sink.send(Message::Text(setup_message(options).to_string().into()))
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        tokio::time::timeout(self.connect_timeout, await_setup_complete(&mut stream))
            .await
            .map_err(|_| SessionError::Timeout("setupComplete".into()))??;

        info!(model = %options.model, voice = %options.voice, "Connected to Gemini Live");

        Ok(Arc::new(GeminiLiveSession {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Build the `setup` message that opens a session.
pub fn setup_message(options: &SessionOptions) -> serde_json::Value {
    let model = if options.model.starts_with("models/") {
        options.model.clone()
    } else {
        format!("models/{}", options.model)
    };

    let mut setup = json!({
        "model": model,
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "voiceConfig": {
                    "prebuiltVoiceConfig": { "voiceName": options.voice }
                }
            }
        }
    });

    if let Some(instruction) = &options.system_instruction {
        setup["systemInstruction"] = json!({
            "parts": [{ "text": instruction }],
            "role": "user",
        });
    }

    json!({ "setup": setup })
}

/// Build the `realtimeInput` message carrying one uplink frame.
pub fn realtime_input_message(frame: &AudioFrame) -> serde_json::Value {
    json!({
        "realtimeInput": {
            "audio": {
                "data": STANDARD.encode(&frame.data),
                "mimeType": format!("audio/pcm;rate={}", frame.format.sample_rate),
            }
        }
    })
}

async fn await_setup_complete(stream: &mut SplitStream<WsStream>) -> Result<(), SessionError> {
    while let Some(msg) = stream.next().await {
        let msg = msg.map_err(|e| SessionError::Connect(e.to_string()))?;
        let Some(payload) = message_payload(&msg)? else {
            continue;
        };
        let parsed: ServerMessage = serde_json::from_slice(payload)
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        if parsed.setup_complete.is_some() {
            return Ok(());
        }
        trace!("Ignoring pre-setup message");
    }
    Err(SessionError::Connect("connection closed before setupComplete".into()))
}

/// Extract the JSON body of a frame. `Ok(None)` for control frames.
fn message_payload(msg: &Message) -> Result<Option<&[u8]>, SessionError> {
    match msg {
        Message::Text(text) => Ok(Some(text.as_bytes())),
        Message::Binary(data) => Ok(Some(data.as_ref())),
        Message::Close(frame) => {
            let reason = frame
                .as_ref()
                .map(|f| f.reason.as_str().to_string())
                .unwrap_or_default();
            debug!(%reason, "Gemini Live sent close frame");
            Err(SessionError::Closed)
        }
        _ => Ok(None),
    }
}

// --- Gemini Live server message types ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    go_away: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

/// Turn a raw server message into a [`Turn`]. Messages without server
/// content (setup acks, usage metadata, tool calls) yield `Ok(None)`.
pub fn parse_server_message(raw: &[u8]) -> Result<Option<Turn>, SessionError> {
    let message: ServerMessage =
        serde_json::from_slice(raw).map_err(|e| SessionError::Protocol(e.to_string()))?;

    if message.go_away.is_some() {
        warn!("Gemini Live announced it will drop the connection");
    }

    let Some(content) = message.server_content else {
        return Ok(None);
    };

    let mut audio = BytesMut::new();
    let mut text = String::new();

    for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
        if let Some(inline) = part.inline_data {
            let is_pcm = inline
                .mime_type
                .as_deref()
                .is_none_or(|m| m.starts_with("audio/pcm"));
            if !is_pcm {
                trace!(mime = ?inline.mime_type, "Skipping non-PCM inline data");
                continue;
            }
            let decoded = STANDARD
                .decode(inline.data.as_bytes())
                .map_err(|e| SessionError::Protocol(format!("bad inline audio: {e}")))?;
            audio.extend_from_slice(&decoded);
        }
        if let Some(t) = part.text {
            text.push_str(&t);
        }
    }

    Ok(Some(Turn {
        audio: (!audio.is_empty()).then(|| audio.freeze()),
        text: (!text.is_empty()).then_some(text),
        turn_complete: content.turn_complete,
        interrupted: content.interrupted,
    }))
}

pub struct GeminiLiveSession {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    closed: AtomicBool,
}

impl GeminiLiveSession {
    async fn next_turn(&self) -> Result<Turn, SessionError> {
        let mut stream = self.stream.lock().await;
        loop {
            let msg = match stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(SessionError::Receive(e.to_string())),
                None => return Err(SessionError::Closed),
            };
            let Some(payload) = message_payload(&msg)? else {
                continue;
            };
            match parse_server_message(payload) {
                Ok(Some(turn)) => return Ok(turn),
                Ok(None) => continue,
                Err(e) => {
                    warn!(%e, "Skipping unreadable Gemini Live message");
                }
            }
        }
    }
}

#[async_trait]
impl LiveSession for GeminiLiveSession {
    fn id(&self) -> &str {
        "gemini"
    }

    async fn send_audio(&self, frame: AudioFrame) -> Result<(), SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        let msg = realtime_input_message(&frame).to_string();
        self.sink
            .lock()
            .await
            .send(Message::Text(msg.into()))
            .await
            .map_err(|e| SessionError::Send(e.to_string()))
    }

    fn receive_turns(&self) -> TurnStream<'_> {
        Box::pin(futures::stream::unfold(self, |session| async move {
            let turn = session.next_turn().await;
            Some((turn, session))
        }))
    }

    async fn close(&self) -> Result<(), SessionError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("Closing Gemini Live session");
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| SessionError::Send(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use vox_relay_core::types::PcmFormat;

    use super::*;

    fn decode_audio(data: &str) -> Option<Bytes> {
        STANDARD.decode(data).ok().map(Bytes::from)
    }

    fn options() -> SessionOptions {
        SessionOptions {
            model: "gemini-2.0-flash-live-001".into(),
            voice: "Leda".into(),
            system_instruction: Some("Speak like a pirate.".into()),
        }
    }

    #[test]
    fn test_setup_message_shape() {
        let setup = setup_message(&options());
        assert_eq!(setup["setup"]["model"], "models/gemini-2.0-flash-live-001");
        assert_eq!(
            setup["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            setup["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Leda"
        );
        assert_eq!(
            setup["setup"]["systemInstruction"]["parts"][0]["text"],
            "Speak like a pirate."
        );
    }

    #[test]
    fn test_setup_message_keeps_prefixed_model_and_omits_instruction() {
        let opts = SessionOptions {
            model: "models/custom".into(),
            system_instruction: None,
            ..options()
        };
        let setup = setup_message(&opts);
        assert_eq!(setup["setup"]["model"], "models/custom");
        assert!(setup["setup"].get("systemInstruction").is_none());
    }

    #[test]
    fn test_realtime_input_message() {
        let frame = AudioFrame::new(vec![1u8, 0, 2, 0], PcmFormat::mono16(16_000));
        let msg = realtime_input_message(&frame);
        let audio = &msg["realtimeInput"]["audio"];
        assert_eq!(audio["mimeType"], "audio/pcm;rate=16000");
        let decoded = decode_audio(audio["data"].as_str().unwrap()).unwrap();
        assert_eq!(decoded.as_ref(), &[1u8, 0, 2, 0]);
    }

    #[test]
    fn test_parse_audio_turn() {
        let pcm = STANDARD.encode([0xcau8, 0xfe, 0x01, 0x02]);
        let raw = json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": pcm } },
                        { "text": "ahoy" }
                    ]
                },
                "turnComplete": true
            }
        })
        .to_string();

        let turn = parse_server_message(raw.as_bytes()).unwrap().unwrap();
        assert_eq!(turn.audio.as_deref(), Some(&[0xcau8, 0xfe, 0x01, 0x02][..]));
        assert_eq!(turn.text.as_deref(), Some("ahoy"));
        assert!(turn.turn_complete);
        assert!(!turn.interrupted);
    }

    #[test]
    fn test_parse_interrupted_without_audio() {
        let raw = br#"{"serverContent": {"interrupted": true}}"#;
        let turn = parse_server_message(raw).unwrap().unwrap();
        assert!(turn.interrupted);
        assert!(!turn.has_audio());
    }

    #[test]
    fn test_parse_skips_non_pcm_inline_data() {
        let raw = json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [{ "inlineData": { "mimeType": "image/png", "data": "AAAA" } }]
                }
            }
        })
        .to_string();
        let turn = parse_server_message(raw.as_bytes()).unwrap().unwrap();
        assert!(turn.audio.is_none());
    }

    #[test]
    fn test_parse_setup_complete_is_not_a_turn() {
        assert!(parse_server_message(br#"{"setupComplete": {}}"#).unwrap().is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_server_message(b"not json").unwrap_err();
        assert_eq!(err.kind(), "protocol");

        let bad_audio = br#"{"serverContent": {"modelTurn": {"parts": [{"inlineData": {"data": "!!"}}]}}}"#;
        assert_eq!(parse_server_message(bad_audio).unwrap_err().kind(), "protocol");
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = EndpointConfig {
            api_key: None,
            api_key_env: Some("NONEXISTENT_VR_GEMINI_KEY".into()),
            ..EndpointConfig::default()
        };
        let err = GeminiLiveConnector::from_config(&config).err().unwrap();
        assert_eq!(err.kind(), "auth");
    }

    #[test]
    fn test_url_uses_base_and_key() {
        let connector = GeminiLiveConnector::new("k123", Some("ws://127.0.0.1:9/"), Duration::from_secs(1));
        let url = connector.url();
        assert!(url.starts_with("ws://127.0.0.1:9/ws/"));
        assert!(url.ends_with("BidiGenerateContent?key=k123"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_connect_error() {
        // Port 9 (discard) is closed on test machines; the handshake fails fast.
        let connector = GeminiLiveConnector::new("k", Some("ws://127.0.0.1:9"), Duration::from_secs(2));
        let err = connector.connect(&options()).await.err().unwrap();
        assert!(matches!(err, SessionError::Connect(_) | SessionError::Timeout(_)));
    }
}
