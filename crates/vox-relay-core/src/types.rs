//! PCM frame types shared by every relay stage.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Size of one transport playback frame: 20 ms of 48 kHz 16-bit stereo.
pub const PLAYBACK_FRAME_BYTES: usize = 3840;

static SILENCE: [u8; PLAYBACK_FRAME_BYTES] = [0; PLAYBACK_FRAME_BYTES];

/// The constant silence frame handed to the transport whenever there is
/// nothing else to play, and returned by converters that cannot produce audio.
pub fn silence_frame() -> Bytes {
    Bytes::from_static(&SILENCE)
}

/// A zero-filled frame of `len` bytes. Reuses the static buffer for the
/// standard playback size.
pub fn silence_of_len(len: usize) -> Bytes {
    if len == PLAYBACK_FRAME_BYTES {
        silence_frame()
    } else {
        Bytes::from(vec![0u8; len])
    }
}

/// Width of one PCM sample word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleWidth {
    I16,
    I32,
}

impl SampleWidth {
    pub const fn bytes(self) -> usize {
        match self {
            Self::I16 => 2,
            Self::I32 => 4,
        }
    }
}

/// Sample rate, width and channel count of a PCM buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub width: SampleWidth,
    pub channels: u16,
}

impl PcmFormat {
    pub const fn new(sample_rate: u32, width: SampleWidth, channels: u16) -> Self {
        Self {
            sample_rate,
            width,
            channels,
        }
    }

    /// 16-bit mono, the AI endpoint's native format.
    pub const fn mono16(sample_rate: u32) -> Self {
        Self::new(sample_rate, SampleWidth::I16, 1)
    }

    /// 16-bit interleaved stereo, the transport's playback format.
    pub const fn stereo16(sample_rate: u32) -> Self {
        Self::new(sample_rate, SampleWidth::I16, 2)
    }

    /// The transport's capture format as the relay reads it.
    ///
    /// The transport delivers interleaved 16-bit stereo; every L/R pair is
    /// consumed as a single little-endian 32-bit word.
    pub const fn capture(sample_rate: u32) -> Self {
        Self::new(sample_rate, SampleWidth::I32, 1)
    }

    /// Bytes per sample frame (one sample for every channel).
    pub const fn block_align(&self) -> usize {
        self.width.bytes() * self.channels as usize
    }

    /// Playback duration of `len` bytes in this format, in milliseconds.
    pub fn duration_ms(&self, len: usize) -> u64 {
        let align = self.block_align();
        if align == 0 || self.sample_rate == 0 {
            return 0;
        }
        (len / align) as u64 * 1000 / self.sample_rate as u64
    }
}

/// An immutable PCM buffer tagged with its format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub data: Bytes,
    pub format: PcmFormat,
}

impl AudioFrame {
    pub fn new(data: impl Into<Bytes>, format: PcmFormat) -> Self {
        Self {
            data: data.into(),
            format,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of whole sample frames in the buffer.
    pub fn sample_frames(&self) -> usize {
        match self.format.block_align() {
            0 => 0,
            align => self.data.len() / align,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.format.duration_ms(self.data.len())
    }

    /// Whether every byte of the buffer is zero.
    pub fn is_silent(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }
}
