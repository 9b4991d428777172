//! Finished recordings handed to the caller.

use anyhow::Result;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Integer tag identifying which capture channel produced a recording.
pub type Slot = u8;

/// The microphone capture channel.
pub const MICROPHONE_SLOT: Slot = 0;

/// Layout of the bytes a recorder emits: interleaved little-endian 16-bit PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Bytes needed for `millis` of audio, rounded down to whole frames.
    pub fn bytes_for_millis(&self, millis: u32) -> usize {
        let frame_bytes = self.channels as usize * 2;
        let frames = self.sample_rate as u64 * millis as u64 / 1000;
        (frames as usize * frame_bytes).max(frame_bytes)
    }
}

/// Immutable audio produced by one capture session.
///
/// Cloning is cheap; the bytes are shared.
#[derive(Clone)]
pub struct FinishedRecording {
    id: Uuid,
    data: Arc<[u8]>,
    format: AudioFormat,
}

impl FinishedRecording {
    /// Concatenates `chunks` in order. Returns `None` when there are no bytes.
    pub(crate) fn from_chunks(chunks: &[Vec<u8>], format: AudioFormat) -> Option<Self> {
        let total: usize = chunks.iter().map(Vec::len).sum();
        if total == 0 {
            return None;
        }

        let mut data = Vec::with_capacity(total);
        for chunk in chunks {
            data.extend_from_slice(chunk);
        }

        Some(Self {
            id: Uuid::new_v4(),
            data: data.into(),
            format,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Opaque locator for this recording.
    pub fn url(&self) -> String {
        format!("blob:vmemo/{}", self.id)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Playback length derived from the PCM byte count.
    pub fn duration(&self) -> Duration {
        let bytes_per_second =
            self.format.sample_rate as u64 * self.format.channels as u64 * 2;
        if bytes_per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.data.len() as f64 / bytes_per_second as f64)
    }

    /// Wraps the PCM data in an in-memory WAV container.
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: self.format.channels,
            sample_rate: self.format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::with_capacity(self.data.len() + 44));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for pair in self.data.chunks_exact(2) {
                writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
            }
            writer.finalize()?;
        }

        Ok(cursor.into_inner())
    }
}

impl fmt::Debug for FinishedRecording {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinishedRecording")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .field("format", &self.format)
            .finish()
    }
}
