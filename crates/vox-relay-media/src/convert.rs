//! PCM conversion between the voice transport and the AI endpoint.
//!
//! Uplink: 32-bit capture words at the transport rate become 16-bit mono at
//! the endpoint input rate. Downlink: 16-bit mono at the endpoint output rate
//! becomes 16-bit interleaved stereo at the transport rate.
//!
//! The public converters never fail. A buffer that cannot be converted is
//! logged and replaced by the silence frame so the pipeline keeps moving.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::warn;

use vox_relay_core::types::{AudioFrame, PcmFormat, silence_frame};

/// Errors raised while converting a single buffer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("Sample rate must be greater than 0 (got {source_rate} -> {target_rate})")]
    InvalidRate { source_rate: u32, target_rate: u32 },

    #[error("{len} bytes is not a whole number of {width}-byte samples")]
    Misaligned { len: usize, width: usize },

    #[error("Expected mono input, got {0} channels")]
    NotMono(u16),
}

const I32_SCALE: f64 = 2_147_483_648.0;
const I16_MAX: f64 = 32_767.0;

/// Convert captured transport audio to the endpoint's input format.
pub fn to_uplink_format(pcm: &[u8], source_rate: u32, target_rate: u32) -> AudioFrame {
    let format = PcmFormat::mono16(target_rate);
    if pcm.is_empty() {
        return AudioFrame::new(silence_frame(), format);
    }
    match convert_uplink(pcm, source_rate, target_rate) {
        Ok(data) => AudioFrame::new(data, format),
        Err(e) => {
            warn!(%e, len = pcm.len(), "Uplink conversion failed, substituting silence");
            AudioFrame::new(silence_frame(), format)
        }
    }
}

fn convert_uplink(pcm: &[u8], source_rate: u32, target_rate: u32) -> Result<Bytes, ConvertError> {
    check_rates(source_rate, target_rate)?;
    if pcm.len() % 4 != 0 {
        return Err(ConvertError::Misaligned {
            len: pcm.len(),
            width: 4,
        });
    }

    let words = pcm
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]));

    if source_rate == target_rate {
        let mut out = BytesMut::with_capacity(pcm.len() / 2);
        for word in words {
            out.put_i16_le((word >> 16) as i16);
        }
        return Ok(out.freeze());
    }

    let samples: Vec<f64> = words.map(|w| w as f64 / I32_SCALE).collect();
    let resampled = resample_linear(&samples, source_rate, target_rate);

    let mut out = BytesMut::with_capacity(resampled.len() * 2);
    for s in resampled {
        // `as` truncates toward zero and saturates at the i16 bounds.
        out.put_i16_le((s * I16_MAX) as i16);
    }
    Ok(out.freeze())
}

/// Stateless linear resample to exactly `round(n * target / source)` samples.
fn resample_linear(samples: &[f64], source_rate: u32, target_rate: u32) -> Vec<f64> {
    let ratio = target_rate as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).round() as usize;
    if samples.is_empty() || output_len == 0 {
        return Vec::new();
    }

    let last = samples.len() - 1;
    (0..output_len)
        .map(|i| {
            let src_pos = i as f64 / ratio;
            let idx = src_pos.floor() as usize;
            if idx >= last {
                return samples[last];
            }
            let frac = src_pos - idx as f64;
            samples[idx] + (samples[idx + 1] - samples[idx]) * frac
        })
        .collect()
}

/// Carry-over state of the downlink resampler.
///
/// Holds the last input sample and the fractional read position of the
/// previous call so that consecutive payloads of one reply join without a
/// seam. Reset it between replies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResamplerState {
    last: Option<f32>,
    pos: f64,
}

impl ResamplerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_fresh(&self) -> bool {
        self.last.is_none()
    }

    fn resample(&mut self, input: &[i16], source_rate: u32, target_rate: u32) -> Vec<i16> {
        let mut buf = Vec::with_capacity(input.len() + 1);
        buf.extend(self.last);
        buf.extend(input.iter().map(|&s| s as f32));

        let Some(&tail) = buf.last() else {
            return Vec::new();
        };
        let end = (buf.len() - 1) as f64;
        let step = source_rate as f64 / target_rate as f64;

        let mut out = Vec::with_capacity((input.len() as f64 / step).ceil() as usize + 1);
        let mut pos = self.pos;
        while pos <= end {
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let sample = match buf.get(idx + 1) {
                Some(&next) => buf[idx] + (next - buf[idx]) * frac,
                None => buf[idx],
            };
            out.push(sample.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16);
            pos += step;
        }

        self.pos = pos - end;
        self.last = Some(tail);
        out
    }
}

/// Convert endpoint audio to the transport's playback format.
pub fn to_downlink_format(
    pcm: &[u8],
    source_rate: u32,
    target_rate: u32,
    state: &mut ResamplerState,
) -> AudioFrame {
    let format = PcmFormat::stereo16(target_rate);
    if pcm.is_empty() {
        return AudioFrame::new(silence_frame(), format);
    }
    match convert_downlink(pcm, source_rate, target_rate, state) {
        Ok(data) => AudioFrame::new(data, format),
        Err(e) => {
            warn!(%e, len = pcm.len(), "Downlink conversion failed, substituting silence");
            AudioFrame::new(silence_frame(), format)
        }
    }
}

fn convert_downlink(
    pcm: &[u8],
    source_rate: u32,
    target_rate: u32,
    state: &mut ResamplerState,
) -> Result<Bytes, ConvertError> {
    check_rates(source_rate, target_rate)?;
    if pcm.len() % 2 != 0 {
        return Err(ConvertError::Misaligned {
            len: pcm.len(),
            width: 2,
        });
    }

    let samples: Vec<i16> = pcm
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();

    if source_rate == target_rate {
        return mono_to_stereo(&samples, 1);
    }

    let resampled = state.resample(&samples, source_rate, target_rate);
    mono_to_stereo(&resampled, 1)
}

/// Duplicate every mono sample into an interleaved L/R pair.
pub fn mono_to_stereo(samples: &[i16], channels: u16) -> Result<Bytes, ConvertError> {
    if channels != 1 {
        return Err(ConvertError::NotMono(channels));
    }
    if samples.is_empty() {
        return Ok(silence_frame());
    }

    let mut out = BytesMut::with_capacity(samples.len() * 4);
    for &s in samples {
        out.put_i16_le(s);
        out.put_i16_le(s);
    }
    Ok(out.freeze())
}

fn check_rates(source_rate: u32, target_rate: u32) -> Result<(), ConvertError> {
    if source_rate == 0 || target_rate == 0 {
        return Err(ConvertError::InvalidRate {
            source_rate,
            target_rate,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use vox_relay_core::types::PLAYBACK_FRAME_BYTES;

    use super::*;

    fn words(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn i16s(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    #[test]
    fn test_uplink_resample_length() {
        let pcm = words(&[1 << 20; 1920]);
        let out = to_uplink_format(&pcm, 48_000, 16_000);
        assert_eq!(out.len(), 1280);
        assert_eq!(out.format, PcmFormat::mono16(16_000));
    }

    #[test]
    fn test_uplink_length_rounds() {
        // 7 words at 3:1 -> round(2.33) = 2 samples
        let out = to_uplink_format(&words(&[0; 7]), 48_000, 16_000);
        assert_eq!(out.len(), 4);
        // 8 words at 3:1 -> round(2.67) = 3 samples
        let out = to_uplink_format(&words(&[0; 8]), 48_000, 16_000);
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn test_uplink_same_rate_narrows() {
        let pcm = words(&[0x1234_5678, -0x0001_0000, -1, 0x7fff_ffff]);
        let out = to_uplink_format(&pcm, 48_000, 48_000);
        assert_eq!(out.len(), pcm.len() / 2);
        // Arithmetic shift floors toward negative infinity.
        assert_eq!(i16s(&out.data), vec![0x1234, -1, -1, 0x7fff]);
    }

    #[test]
    fn test_uplink_same_rate_full_frame() {
        let out = to_uplink_format(&words(&[0; 1920]), 48_000, 48_000);
        assert_eq!(out.len(), 3840);
    }

    #[test]
    fn test_uplink_scales_and_truncates() {
        // Half scale: 2^30 / 2^31 * 32767 = 16383.5 -> 16383
        let out = to_uplink_format(&words(&[1 << 30; 6]), 48_000, 16_000);
        assert_eq!(i16s(&out.data), vec![16383, 16383]);

        let out = to_uplink_format(&words(&[-(1 << 30); 6]), 48_000, 16_000);
        assert_eq!(i16s(&out.data), vec![-16383, -16383]);
    }

    #[test]
    fn test_uplink_empty_is_silence() {
        let out = to_uplink_format(&[], 48_000, 16_000);
        assert_eq!(out.data, silence_frame());
    }

    #[test]
    fn test_uplink_failures_degrade_to_silence() {
        assert_eq!(to_uplink_format(&[1, 2, 3], 48_000, 16_000).data, silence_frame());
        assert_eq!(to_uplink_format(&[0; 8], 0, 16_000).data, silence_frame());
        assert_eq!(
            convert_uplink(&[1, 2, 3], 48_000, 16_000),
            Err(ConvertError::Misaligned { len: 3, width: 4 })
        );
    }

    #[test]
    fn test_mono_to_stereo_doubles() {
        let out = mono_to_stereo(&[1, -2, 3], 1).unwrap();
        assert_eq!(out.len(), 12);
        assert_eq!(i16s(&out), vec![1, 1, -2, -2, 3, 3]);
    }

    #[test]
    fn test_mono_to_stereo_rejects_multichannel() {
        assert_eq!(mono_to_stereo(&[1, 2], 2), Err(ConvertError::NotMono(2)));
    }

    #[test]
    fn test_mono_to_stereo_empty_is_silence() {
        let out = mono_to_stereo(&[], 1).unwrap();
        assert_eq!(out.len(), PLAYBACK_FRAME_BYTES);
    }

    #[test]
    fn test_downlink_same_rate_is_channel_doubling() {
        let pcm: Vec<u8> = [5i16, -5].iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut state = ResamplerState::new();
        let out = to_downlink_format(&pcm, 48_000, 48_000, &mut state);
        assert_eq!(i16s(&out.data), vec![5, 5, -5, -5]);
        assert!(state.is_fresh());
    }

    #[test]
    fn test_downlink_resampler_is_seamless() {
        let mut state = ResamplerState::new();
        let chunk: Vec<u8> = (0..480i16).flat_map(|s| s.to_le_bytes()).collect();

        let first = to_downlink_format(&chunk, 24_000, 48_000, &mut state);
        // The last input sample has no successor yet; it is emitted once and
        // interpolated against the next payload.
        assert_eq!(first.len(), 959 * 4);

        let second = to_downlink_format(&chunk, 24_000, 48_000, &mut state);
        assert_eq!(second.len(), 960 * 4);
        let third = to_downlink_format(&chunk, 24_000, 48_000, &mut state);
        assert_eq!(third.len(), 960 * 4);

        // Seam: last of chunk one is 479, first of chunk two is 0.
        let left: Vec<i16> = i16s(&second.data).into_iter().step_by(2).collect();
        assert_eq!(left[0], 240);
        assert_eq!(left[1], 0);
        assert_eq!(left[2], 1);
    }

    #[test]
    fn test_downlink_upsample_interpolates() {
        let pcm: Vec<u8> = [0i16, 100, 200].iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut state = ResamplerState::new();
        let out = to_downlink_format(&pcm, 24_000, 48_000, &mut state);
        let left: Vec<i16> = i16s(&out.data).into_iter().step_by(2).collect();
        assert_eq!(left, vec![0, 50, 100, 150, 200]);
    }

    #[test]
    fn test_resampler_reset() {
        let mut state = ResamplerState::new();
        let pcm: Vec<u8> = [1i16, 2].iter().flat_map(|s| s.to_le_bytes()).collect();
        to_downlink_format(&pcm, 24_000, 48_000, &mut state);
        assert!(!state.is_fresh());
        state.reset();
        assert!(state.is_fresh());
    }

    #[test]
    fn test_downlink_empty_and_failures_are_silence() {
        let mut state = ResamplerState::new();
        assert_eq!(to_downlink_format(&[], 24_000, 48_000, &mut state).data, silence_frame());
        assert_eq!(to_downlink_format(&[1, 2, 3], 24_000, 48_000, &mut state).data, silence_frame());
        assert_eq!(to_downlink_format(&[1, 2], 24_000, 0, &mut state).data, silence_frame());
        assert!(state.is_fresh());
    }
}
