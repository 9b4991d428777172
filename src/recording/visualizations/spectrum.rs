//! Frequency-domain analyser over the most recent microphone samples.
//!
//! Produces one byte magnitude per FFT bin, scaled between a decibel floor and
//! ceiling, with exponential smoothing between snapshots.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::recording::device::Analyser;

/// Analyser tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyserSettings {
    /// FFT window length in samples (power of two)
    pub fft_size: usize,
    /// Weight of the previous snapshot, 0.0 (none) to 1.0 (frozen)
    pub smoothing: f32,
    /// Level mapped to byte 0
    pub min_decibels: f32,
    /// Level mapped to byte 255
    pub max_decibels: f32,
}

impl Default for AnalyserSettings {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

/// Shared window of the most recent mono samples, fed by the capture callback.
#[derive(Clone)]
pub struct SampleRing {
    samples: Arc<Mutex<VecDeque<f32>>>,
    capacity: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Appends i16 PCM samples, discarding the oldest beyond capacity.
    pub fn push(&self, data: &[i16]) {
        let mut samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        for &s in data {
            if samples.len() == self.capacity {
                samples.pop_front();
            }
            samples.push_back(s as f32 / 32768.0);
        }
    }

    /// Copies the newest samples into `out`, right-aligned and zero-padded.
    fn copy_latest(&self, out: &mut [f32]) {
        let samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        let n = samples.len().min(out.len());
        let pad = out.len() - n;
        out[..pad].fill(0.0);
        for (dst, src) in out[pad..].iter_mut().zip(samples.iter().skip(samples.len() - n)) {
            *dst = *src;
        }
    }
}

/// FFT analyser reading from a [`SampleRing`].
pub struct FftAnalyser {
    settings: AnalyserSettings,
    ring: SampleRing,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    time_domain: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
}

impl FftAnalyser {
    pub fn new(ring: SampleRing, settings: AnalyserSettings) -> Self {
        let n = settings.fft_size;
        let fft = FftPlanner::new().plan_fft_forward(n);
        Self {
            settings,
            ring,
            fft,
            window: blackman_window(n),
            time_domain: vec![0.0; n],
            buffer: vec![Complex::new(0.0, 0.0); n],
            smoothed: vec![0.0; n / 2],
        }
    }

    fn byte_for_magnitude(&self, magnitude: f32) -> u8 {
        if magnitude <= 0.0 {
            return 0;
        }
        let db = 20.0 * magnitude.log10();
        let range = self.settings.max_decibels - self.settings.min_decibels;
        let scaled = 255.0 * (db - self.settings.min_decibels) / range;
        scaled.clamp(0.0, 255.0) as u8
    }
}

impl Analyser for FftAnalyser {
    fn frequency_bin_count(&self) -> usize {
        self.settings.fft_size / 2
    }

    fn read_byte_frequency_data(&mut self, buf: &mut [u8]) {
        self.ring.copy_latest(&mut self.time_domain);

        for ((slot, &sample), &w) in self
            .buffer
            .iter_mut()
            .zip(self.time_domain.iter())
            .zip(self.window.iter())
        {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.buffer);

        let n = self.settings.fft_size as f32;
        let k = self.settings.smoothing;
        for (prev, bin) in self.smoothed.iter_mut().zip(self.buffer.iter()) {
            *prev = k * *prev + (1.0 - k) * (bin.norm() / n);
        }

        for (dst, &magnitude) in buf.iter_mut().zip(self.smoothed.iter()) {
            *dst = self.byte_for_magnitude(magnitude);
        }
    }
}

fn blackman_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
        })
        .collect()
}
