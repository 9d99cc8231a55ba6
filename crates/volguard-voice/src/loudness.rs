//! Windowed RMS loudness detection over decoded PCM.
//!
//! Input is interleaved little-endian signed 16-bit stereo at 48 kHz. Bytes are
//! accumulated until a 3 second window is full; the whole accumulated buffer is
//! then evaluated once and cleared, whether or not it was too loud.

use chrono::{DateTime, Utc};
use tracing::debug;

/// Decoder output sample rate (Hz).
pub const SAMPLE_RATE: usize = 48_000;
pub const CHANNELS: usize = 2;
pub const BYTES_PER_SAMPLE: usize = 2;
pub const WINDOW_SECONDS: usize = 3;
/// Bytes in one evaluation window (576,000).
pub const WINDOW_BYTES: usize = SAMPLE_RATE * CHANNELS * BYTES_PER_SAMPLE * WINDOW_SECONDS;

/// A speaker's window RMS went over the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Exceeded {
    pub speaker_id: String,
    pub guild_id: String,
    pub rms: f64,
    pub timestamp: DateTime<Utc>,
}

/// Root-mean-square of the complete 16-bit samples in `pcm`.
///
/// A trailing odd byte is ignored. Empty input yields 0.
pub fn compute_rms(pcm: &[u8]) -> f64 {
    let mut sum_squares: u64 = 0;
    let mut samples: u64 = 0;
    for pair in pcm.chunks_exact(BYTES_PER_SAMPLE) {
        let sample = i64::from(i16::from_le_bytes([pair[0], pair[1]]));
        sum_squares += (sample * sample) as u64;
        samples += 1;
    }
    if samples == 0 {
        return 0.0;
    }
    (sum_squares as f64 / samples as f64).sqrt()
}

/// Per-speaker window accumulator. Owned by exactly one task.
#[derive(Debug)]
pub struct LoudnessDetector {
    speaker_id: String,
    guild_id: String,
    threshold: f64,
    buffer: Vec<u8>,
}

impl LoudnessDetector {
    pub fn new(speaker_id: impl Into<String>, guild_id: impl Into<String>, threshold: f64) -> Self {
        Self {
            speaker_id: speaker_id.into(),
            guild_id: guild_id.into(),
            threshold,
            buffer: Vec::with_capacity(WINDOW_BYTES),
        }
    }

    pub fn speaker_id(&self) -> &str {
        &self.speaker_id
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Bytes accumulated toward the current window.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Appends a chunk. Returns an event when this chunk closed a window whose
    /// RMS is strictly above the threshold.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<Exceeded> {
        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() < WINDOW_BYTES {
            return None;
        }

        let rms = compute_rms(&self.buffer);
        self.buffer.clear();

        debug!(
            target: "volguard::voice",
            speaker_id = %self.speaker_id,
            rms,
            threshold = self.threshold,
            "window evaluated"
        );

        (rms > self.threshold).then(|| Exceeded {
            speaker_id: self.speaker_id.clone(),
            guild_id: self.guild_id.clone(),
            rms,
            timestamp: Utc::now(),
        })
    }
}
