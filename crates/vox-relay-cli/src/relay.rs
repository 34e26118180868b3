//! `vox-relay relay`: drive a live relay from a synthetic voice transport.
//!
//! The synthetic transport ticks every 20 ms like a real voice gateway. On
//! each tick it writes one capture frame of a 440 Hz tone into the ingress
//! adapter and pulls one playback frame from the egress adapter.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vox_relay_core::config::Config;
use vox_relay_media::{RelayError, VoiceRelay, VoiceSink, VoiceSource};
use vox_relay_providers::{SessionOptions, create_connector};

const TICK: Duration = Duration::from_millis(20);

#[derive(Debug, Default)]
pub struct RelayArgs {
    pub seconds: u64,
    pub provider: Option<String>,
    pub voice: Option<String>,
    pub model: Option<String>,
}

/// Continuous sine tone packed the way the transport captures audio: one
/// 32-bit word per stereo pair, the same sample in both halves.
pub struct ToneSource {
    sample_rate: u32,
    frequency: f32,
    amplitude: f32,
    index: u64,
}

impl ToneSource {
    pub fn new(sample_rate: u32, frequency: f32) -> Self {
        Self {
            sample_rate,
            frequency,
            amplitude: 0.25,
            index: 0,
        }
    }

    /// One 20 ms capture frame.
    pub fn next_frame(&mut self) -> Bytes {
        let samples = (self.sample_rate / 50) as usize;
        let mut out = BytesMut::with_capacity(samples * 4);
        for _ in 0..samples {
            let t = self.index as f32 / self.sample_rate as f32;
            let s = ((t * self.frequency * std::f32::consts::TAU).sin()
                * self.amplitude
                * i16::MAX as f32) as i16;
            out.put_i16_le(s);
            out.put_i16_le(s);
            self.index += 1;
        }
        out.freeze()
    }
}

pub async fn run(config: &Config, args: RelayArgs) -> anyhow::Result<()> {
    let mut endpoint = config.endpoint();
    if let Some(provider) = args.provider {
        endpoint.provider = provider;
    }
    if let Some(voice) = args.voice {
        endpoint.voice = voice;
    }
    if let Some(model) = args.model {
        endpoint.model = model;
    }
    let relay_config = config.relay();

    #[cfg(feature = "metrics")]
    let prometheus = crate::metrics::install_prometheus_recorder()?;

    let connector = create_connector(&endpoint)?;
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, leaving relay");
            ctrl_c.cancel();
        }
    });

    let relay = match VoiceRelay::join(
        connector,
        SessionOptions::from_endpoint(&endpoint),
        relay_config.clone(),
        &cancel,
    )
    .await
    {
        Ok(relay) => relay,
        Err(RelayError::Cancelled { .. }) => {
            info!("Cancelled before the relay became active");
            return Ok(());
        }
        Err(e) => anyhow::bail!("Could not join: {e}"),
    };

    info!(
        provider = %endpoint.provider,
        seconds = args.seconds,
        "Relay joined, streaming synthetic audio"
    );

    let ingress = relay.ingress();
    let egress = relay.egress();
    let mut tone = ToneSource::new(relay_config.transport_rate, 440.0);
    let mut ticker = tokio::time::interval(TICK);
    let deadline = tokio::time::sleep(Duration::from_secs(args.seconds));
    tokio::pin!(deadline);

    let mut audible = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = &mut deadline => break,
            _ = ticker.tick() => {
                ingress.write(Some(0), Some(tone.next_frame()));
                if egress.read().iter().any(|&b| b != 0) {
                    audible += 1;
                }
            }
        }
    }

    let report = relay.leave().await?;
    if !report.is_clean() {
        warn!(?report, "Relay did not shut down cleanly");
    }

    println!("Audible playback frames: {audible}");
    println!("{}", serde_json::to_string_pretty(&report)?);

    #[cfg(feature = "metrics")]
    println!("{}", prometheus.render());

    Ok(())
}
