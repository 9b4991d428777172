//! cpal-backed microphone capture.
//!
//! Opens an input device at its native rate, down-mixes every callback buffer to
//! mono 16-bit PCM and fans it out to the session's taps: the PCM recorder that
//! produces byte chunks, and the sample rings feeding the frequency analysers.

use anyhow::anyhow;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex, MutexGuard};

use super::device::{Analyser, CaptureBackend, CaptureError, LiveStream, Recorder};
use super::resource::AudioFormat;
use super::sink::ChunkSink;
use super::visualizations::{AnalyserSettings, FftAnalyser, SampleRing};

#[cfg(target_os = "linux")]
use std::fs::OpenOptions;
#[cfg(target_os = "linux")]
use std::os::unix::io::AsRawFd;

/// Opens microphone streams through the default cpal host.
pub struct CpalBackend {
    /// Device name, numeric index, or "default"
    device_name: String,
    /// Recorder timeslice in milliseconds
    chunk_millis: u32,
    analyser: AnalyserSettings,
}

impl CpalBackend {
    pub fn new(device_name: String, chunk_millis: u32, analyser: AnalyserSettings) -> Self {
        Self {
            device_name,
            chunk_millis,
            analyser,
        }
    }
}

#[async_trait(?Send)]
impl CaptureBackend for CpalBackend {
    async fn open_stream(&self) -> Result<Box<dyn LiveStream>, CaptureError> {
        let device = suppress_alsa_warnings(|| {
            let host = cpal::default_host();

            if self.device_name == "default" {
                host.default_input_device()
                    .ok_or_else(|| anyhow!("No audio input device available"))
            } else {
                find_device_by_name(&host, &self.device_name)
            }
        })
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        let device_name = device
            .name()
            .unwrap_or_else(|_| "Unknown device".to_string());
        tracing::info!("Recording device: {}", device_name);

        let supported = device
            .default_input_config()
            .map_err(|e| classify_device_error(&e))?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let channels = config.channels as usize;

        tracing::debug!(
            "Device configuration: {}Hz, {} channels, {:?}",
            config.sample_rate.0,
            channels,
            sample_format
        );

        let taps = Arc::new(Mutex::new(StreamTaps::default()));
        let stream = match sample_format {
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, &taps, |s| s),
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, &taps, |s| {
                (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
            }),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, &taps, |s| {
                (s as i32 - 32768) as i16
            }),
            other => {
                return Err(CaptureError::DeviceUnavailable(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        }?;

        stream.play().map_err(|e| classify_device_error(&e))?;
        tracing::debug!("Audio stream started");

        Ok(Box::new(CpalStream {
            stream: Some(stream),
            taps,
            format: AudioFormat::new(config.sample_rate.0, 1),
            chunk_millis: self.chunk_millis,
            analyser: self.analyser,
        }))
    }

    fn name(&self) -> &str {
        "cpal"
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    taps: &Arc<Mutex<StreamTaps>>,
    to_i16: fn(T) -> i16,
) -> Result<cpal::Stream, CaptureError>
where
    T: cpal::SizedSample + 'static,
{
    let taps = Arc::clone(taps);
    let channels = config.channels as usize;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let samples: Vec<i16> = data.iter().map(|&s| to_i16(s)).collect();
                let mono = downmix_to_mono(&samples, channels);
                lock_taps(&taps).feed(&mono);
            },
            |err| {
                tracing::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| classify_device_error(&e))
}

/// Maps a platform error onto the capture taxonomy.
///
/// Hosts report refused microphone permission through backend-specific errors,
/// so the message is the only signal available.
fn classify_device_error(err: &dyn std::fmt::Display) -> CaptureError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not permitted")
    {
        CaptureError::AccessDenied(message)
    } else {
        CaptureError::DeviceUnavailable(message)
    }
}

/// Converts interleaved audio to mono by averaging all channels per frame.
fn downmix_to_mono(data: &[i16], num_channels: usize) -> Vec<i16> {
    match num_channels {
        0 | 1 => data.to_vec(),
        2 => data
            .chunks_exact(2)
            .map(|pair| ((pair[0] as i32 + pair[1] as i32) / 2) as i16)
            .collect(),
        _ => data
            .chunks_exact(num_channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / num_channels as i32) as i16
            })
            .collect(),
    }
}

/// Consumers of the mono sample stream.
#[derive(Default)]
struct StreamTaps {
    encoder: Option<PcmEncoder>,
    rings: Vec<SampleRing>,
}

impl StreamTaps {
    fn feed(&mut self, mono: &[i16]) {
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.write(mono);
        }
        for ring in &self.rings {
            ring.push(mono);
        }
    }
}

fn lock_taps(taps: &Mutex<StreamTaps>) -> MutexGuard<'_, StreamTaps> {
    taps.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Buffers little-endian PCM and flushes it to the sink in fixed-size chunks.
struct PcmEncoder {
    pending: Vec<u8>,
    chunk_bytes: usize,
    sink: ChunkSink,
}

impl PcmEncoder {
    fn new(sink: ChunkSink, chunk_bytes: usize) -> Self {
        Self {
            pending: Vec::with_capacity(chunk_bytes),
            chunk_bytes,
            sink,
        }
    }

    fn write(&mut self, samples: &[i16]) {
        for s in samples {
            self.pending.extend_from_slice(&s.to_le_bytes());
        }
        while self.pending.len() >= self.chunk_bytes {
            let chunk: Vec<u8> = self.pending.drain(..self.chunk_bytes).collect();
            self.sink.data_available(&chunk);
        }
    }

    /// Flushes the remainder as the final chunk and reports the stop.
    fn finish(mut self) {
        let rest = std::mem::take(&mut self.pending);
        self.sink.data_available(&rest);
        self.sink.recorder_stopped();
    }
}

/// A running cpal input stream.
struct CpalStream {
    stream: Option<cpal::Stream>,
    taps: Arc<Mutex<StreamTaps>>,
    format: AudioFormat,
    chunk_millis: u32,
    analyser: AnalyserSettings,
}

impl LiveStream for CpalStream {
    fn create_recorder(&mut self) -> Result<Box<dyn Recorder>, CaptureError> {
        if self.stream.is_none() {
            return Err(CaptureError::DeviceUnavailable(
                "stream tracks already stopped".to_string(),
            ));
        }
        Ok(Box::new(PcmRecorder {
            taps: Arc::clone(&self.taps),
            format: self.format,
            chunk_bytes: self.format.bytes_for_millis(self.chunk_millis),
        }))
    }

    fn create_analyser(&mut self) -> Box<dyn Analyser> {
        let ring = SampleRing::new(self.analyser.fft_size);
        lock_taps(&self.taps).rings.push(ring.clone());
        Box::new(FftAnalyser::new(ring, self.analyser))
    }

    fn stop_tracks(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!("Failed to pause stream before release: {}", e);
            }
            drop(stream);
            lock_taps(&self.taps).rings.clear();
            tracing::debug!("Audio stream released");
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

/// Recorder producing mono 16-bit PCM chunks.
struct PcmRecorder {
    taps: Arc<Mutex<StreamTaps>>,
    format: AudioFormat,
    chunk_bytes: usize,
}

impl Recorder for PcmRecorder {
    fn start(&mut self, sink: ChunkSink) -> Result<(), CaptureError> {
        let mut taps = lock_taps(&self.taps);
        if taps.encoder.is_some() {
            return Err(CaptureError::DoubleStart);
        }
        taps.encoder = Some(PcmEncoder::new(sink, self.chunk_bytes));
        tracing::debug!("Recorder started ({} byte chunks)", self.chunk_bytes);
        Ok(())
    }

    fn stop(&mut self) {
        // Take the encoder first so the final flush runs outside the taps lock.
        let encoder = lock_taps(&self.taps).encoder.take();
        if let Some(encoder) = encoder {
            encoder.finish();
            tracing::debug!("Recorder stopped");
        }
    }

    fn format(&self) -> AudioFormat {
        self.format
    }
}

/// Finds an audio input device by name or numeric index.
///
/// # Arguments
/// * `host` - The cpal audio host
/// * `device_spec` - Either a device name or a numeric index (0, 1, 2, etc.)
///
/// # Errors
/// - If no device with the specified name/index is found
fn find_device_by_name(host: &cpal::Host, device_spec: &str) -> anyhow::Result<cpal::Device> {
    let devices: Vec<_> = host
        .input_devices()
        .map_err(|e| anyhow!("Failed to enumerate devices: {e}"))?
        .collect();

    if let Ok(index) = device_spec.parse::<usize>() {
        let count = devices.len();
        return devices.into_iter().nth(index).ok_or_else(|| {
            anyhow!(
                "Device index {} is out of range (0-{})",
                index,
                count.saturating_sub(1)
            )
        });
    }

    devices
        .into_iter()
        .find(|device| device.name().is_ok_and(|name| name == device_spec))
        .ok_or_else(|| {
            anyhow!(
                "Audio input device '{device_spec}' not found. Use 'vmemo list-devices' to see available devices."
            )
        })
}

/// Temporarily redirects stderr to /dev/null to suppress ALSA library warnings on Linux.
/// On non-Linux platforms, this is a no-op since ALSA doesn't exist.
#[cfg(target_os = "linux")]
pub(crate) fn suppress_alsa_warnings<F, T>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    let dev_null = OpenOptions::new()
        .write(true)
        .open("/dev/null")
        .map_err(|e| anyhow!("Failed to open /dev/null: {e}"))?;

    let dev_null_fd = dev_null.as_raw_fd();

    let old_stderr = unsafe { libc::dup(libc::STDERR_FILENO) };
    if old_stderr == -1 {
        return Err(anyhow!("Failed to duplicate stderr"));
    }

    let redirect_result = unsafe { libc::dup2(dev_null_fd, libc::STDERR_FILENO) };
    if redirect_result == -1 {
        unsafe { libc::close(old_stderr) };
        return Err(anyhow!("Failed to redirect stderr"));
    }

    let result = f();

    unsafe {
        libc::dup2(old_stderr, libc::STDERR_FILENO);
        libc::close(old_stderr);
    }

    result
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn suppress_alsa_warnings<F, T>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    f()
}
