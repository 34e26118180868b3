//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoxRelayError};
use crate::types::{PLAYBACK_FRAME_BYTES, PcmFormat};

/// Top-level vox-relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Audio formats, framing, and task timing of the relay pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Sample rate of the voice transport, both directions.
    #[serde(default = "default_transport_rate")]
    pub transport_rate: u32,

    /// Rate the AI endpoint expects uplinked audio at.
    #[serde(default = "default_endpoint_input_rate")]
    pub endpoint_input_rate: u32,

    /// Rate the AI endpoint emits downlinked audio at.
    #[serde(default = "default_endpoint_output_rate")]
    pub endpoint_output_rate: u32,

    /// Inbound frames must be a whole multiple of this many bytes.
    #[serde(default = "default_frame_alignment")]
    pub frame_alignment: usize,

    /// Size of each frame handed to the transport for playback.
    #[serde(default = "default_playback_frame_bytes")]
    pub playback_frame_bytes: usize,

    /// Pause after a failed turn iteration before re-entering it.
    #[serde(default = "default_receive_backoff_ms")]
    pub receive_backoff_ms: u64,

    /// How long teardown waits for each child task before aborting it.
    #[serde(default = "default_task_shutdown_timeout_ms")]
    pub task_shutdown_timeout_ms: u64,
}

fn default_transport_rate() -> u32 {
    48_000
}

fn default_endpoint_input_rate() -> u32 {
    16_000
}

fn default_endpoint_output_rate() -> u32 {
    24_000
}

fn default_frame_alignment() -> usize {
    960
}

fn default_playback_frame_bytes() -> usize {
    PLAYBACK_FRAME_BYTES
}

fn default_receive_backoff_ms() -> u64 {
    1000
}

fn default_task_shutdown_timeout_ms() -> u64 {
    1000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            transport_rate: default_transport_rate(),
            endpoint_input_rate: default_endpoint_input_rate(),
            endpoint_output_rate: default_endpoint_output_rate(),
            frame_alignment: default_frame_alignment(),
            playback_frame_bytes: default_playback_frame_bytes(),
            receive_backoff_ms: default_receive_backoff_ms(),
            task_shutdown_timeout_ms: default_task_shutdown_timeout_ms(),
        }
    }
}

impl RelayConfig {
    pub fn receive_backoff(&self) -> Duration {
        Duration::from_millis(self.receive_backoff_ms)
    }

    pub fn task_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.task_shutdown_timeout_ms)
    }

    /// Format of frames the transport delivers to the ingress adapter.
    pub fn capture_format(&self) -> PcmFormat {
        PcmFormat::capture(self.transport_rate)
    }

    /// Format of frames sent to the endpoint.
    pub fn uplink_format(&self) -> PcmFormat {
        PcmFormat::mono16(self.endpoint_input_rate)
    }

    /// Format of frames handed back to the transport.
    pub fn playback_format(&self) -> PcmFormat {
        PcmFormat::stereo16(self.transport_rate)
    }
}

/// Connection settings for the AI voice endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Provider id: "gemini" or "echo".
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(
        default = "default_api_key_env",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_voice")]
    pub voice: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_provider() -> String {
    "gemini".into()
}

fn default_api_key_env() -> Option<String> {
    Some("GEMINI_API_KEY".into())
}

fn default_model() -> String {
    "gemini-2.0-flash-live-001".into()
}

fn default_voice() -> String {
    "Leda".into()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: None,
            model: default_model(),
            voice: default_voice(),
            system_instruction: None,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl EndpointConfig {
    /// Resolve the API key: check `api_key` field first, then `api_key_env` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Whether the provider talks to a remote service and needs credentials.
    pub fn is_remote(&self) -> bool {
        self.provider != "echo"
    }
}

/// Endpoint providers the relay knows how to open sessions with.
pub const KNOWN_PROVIDERS: &[&str] = &["gemini", "echo"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "vox_relay_media=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| VoxRelayError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        tracing::debug!(path = %path.display(), "Loading config");
        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw)?;

        json5::from_str(&substituted).map_err(|e| VoxRelayError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Relay settings, falling back to defaults.
    pub fn relay(&self) -> RelayConfig {
        self.relay.clone().unwrap_or_default()
    }

    /// Endpoint settings, falling back to defaults.
    pub fn endpoint(&self) -> EndpointConfig {
        self.endpoint.clone().unwrap_or_default()
    }

    /// Get a config value by dotted path (e.g. "relay.frame_alignment", "endpoint.voice").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let endpoint = self.endpoint();
        if !KNOWN_PROVIDERS.contains(&endpoint.provider.as_str()) {
            errors.push(format!("Unknown endpoint provider '{}'", endpoint.provider));
        } else if endpoint.is_remote() && endpoint.resolve_api_key().is_none() {
            warnings.push(format!(
                "Endpoint provider '{}' has no API key configured",
                endpoint.provider
            ));
        }

        let relay = self.relay();
        for (name, rate) in [
            ("transport_rate", relay.transport_rate),
            ("endpoint_input_rate", relay.endpoint_input_rate),
            ("endpoint_output_rate", relay.endpoint_output_rate),
        ] {
            if rate == 0 {
                errors.push(format!("relay.{name} cannot be 0"));
            }
        }

        if relay.frame_alignment == 0 {
            errors.push("relay.frame_alignment cannot be 0".to_string());
        }

        let block = relay.playback_format().block_align();
        if relay.playback_frame_bytes == 0 || relay.playback_frame_bytes % block != 0 {
            errors.push(format!(
                "relay.playback_frame_bytes must be a non-zero multiple of {block}, got {}",
                relay.playback_frame_bytes
            ));
        }

        if relay.receive_backoff_ms == 0 {
            warnings.push("relay.receive_backoff_ms is 0; receive errors will retry immediately".into());
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for vox-relay data: `~/.vox_relay/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vox_relay")
}
