//! Loudness pulse: one circle size per display frame.
//!
//! The visualizer reads a byte frequency snapshot each frame, averages it into a
//! loudness scalar and maps that onto a circle size.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::recording::device::{Analyser, FrameScheduler};

/// Linearly maps `value` from `[in_min, in_max]` onto `[out_min, out_max]`.
///
/// The result is not clamped: loudness above `in_max` yields a size above
/// `out_max`, so loud input visibly overshoots the resting pulse range.
pub fn map_range(value: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> f32 {
    (value - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}

/// Arithmetic mean of all bins. An empty snapshot is silent.
pub fn average_volume(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u64 = bins.iter().map(|&b| b as u64).sum();
    sum as f32 / bins.len() as f32
}

/// Domain and range of the loudness-to-size mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseRange {
    pub volume_floor: f32,
    pub volume_ceiling: f32,
    pub min_size: f32,
    pub max_size: f32,
}

impl Default for PulseRange {
    fn default() -> Self {
        Self {
            volume_floor: 0.0,
            volume_ceiling: 100.0,
            min_size: 100.0,
            max_size: 150.0,
        }
    }
}

impl PulseRange {
    pub fn size_for(&self, volume: f32) -> f32 {
        map_range(
            volume,
            self.volume_floor,
            self.volume_ceiling,
            self.min_size,
            self.max_size,
        )
    }
}

/// Cancellation flag shared between the controller and its visualizer.
#[derive(Clone)]
pub struct PulseHandle {
    attached: Arc<AtomicBool>,
}

impl PulseHandle {
    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }
}

/// Turns a live analyser into a stream of pulse sizes.
pub struct Visualizer {
    analyser: Box<dyn Analyser>,
    buffer: Vec<u8>,
    range: PulseRange,
    attached: Arc<AtomicBool>,
}

impl Visualizer {
    /// Binds a visualizer to `analyser` with a buffer of one byte per bin.
    pub fn attach(analyser: Box<dyn Analyser>, range: PulseRange) -> Self {
        let buffer = vec![0u8; analyser.frequency_bin_count()];
        tracing::debug!("Visualizer attached ({} bins)", buffer.len());
        Self {
            analyser,
            buffer,
            range,
            attached: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn handle(&self) -> PulseHandle {
        PulseHandle {
            attached: Arc::clone(&self.attached),
        }
    }

    /// Computes the pulse size for the current frame.
    ///
    /// Returns `None` once the visualizer has been detached.
    pub fn frame_step(&mut self) -> Option<f32> {
        if !self.attached.load(Ordering::SeqCst) {
            return None;
        }
        self.analyser.read_byte_frequency_data(&mut self.buffer);
        Some(self.range.size_for(average_volume(&self.buffer)))
    }

    /// Publishes one size per display frame until detached.
    ///
    /// The first step runs immediately; every later step waits for the
    /// scheduler's next frame. The attached flag is re-checked under the watch
    /// lock, so a size computed before a detach never overwrites the `None`
    /// published by the controller.
    pub async fn run(
        mut self,
        mut frames: Box<dyn FrameScheduler>,
        publish: Arc<watch::Sender<Option<f32>>>,
    ) {
        let attached = Arc::clone(&self.attached);
        let mut steps = 0u64;
        while let Some(size) = self.frame_step() {
            let published = publish.send_if_modified(|current| {
                if attached.load(Ordering::SeqCst) {
                    *current = Some(size);
                    true
                } else {
                    false
                }
            });
            if !published {
                break;
            }
            steps += 1;
            frames.next_frame().await;
        }
        tracing::debug!("Visualizer loop ended after {} frames", steps);
    }
}

/// Frame scheduler backed by a tokio interval at a fixed refresh rate.
pub struct DisplayClock {
    interval: Interval,
}

impl DisplayClock {
    /// Must be called from within a tokio runtime.
    pub fn new(frame_rate: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / frame_rate.max(1) as f64);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl FrameScheduler for DisplayClock {
    async fn next_frame(&mut self) {
        self.interval.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::device::fakes::ManualFrames;

    struct ConstantAnalyser(Vec<u8>);

    impl Analyser for ConstantAnalyser {
        fn frequency_bin_count(&self) -> usize {
            self.0.len()
        }

        fn read_byte_frequency_data(&mut self, buf: &mut [u8]) {
            buf.copy_from_slice(&self.0);
        }
    }

    #[test]
    fn test_map_range_is_unclamped() {
        assert_eq!(map_range(0.0, 0.0, 100.0, 100.0, 150.0), 100.0);
        assert_eq!(map_range(100.0, 0.0, 100.0, 100.0, 150.0), 150.0);
        assert_eq!(map_range(50.0, 0.0, 100.0, 100.0, 150.0), 125.0);
        assert_eq!(map_range(200.0, 0.0, 100.0, 100.0, 150.0), 200.0);
        assert_eq!(map_range(-100.0, 0.0, 100.0, 100.0, 150.0), 50.0);
    }

    #[test]
    fn test_average_volume() {
        assert_eq!(average_volume(&[]), 0.0);
        assert_eq!(average_volume(&[10, 20, 30]), 20.0);
        assert_eq!(average_volume(&[255; 4]), 255.0);
    }

    #[test]
    fn test_frame_step_maps_mean_volume() {
        let mut viz = Visualizer::attach(
            Box::new(ConstantAnalyser(vec![40, 60, 50, 50])),
            PulseRange::default(),
        );
        assert_eq!(viz.frame_step(), Some(125.0));

        viz.handle().detach();
        assert_eq!(viz.frame_step(), None);
    }

    #[test]
    fn test_loud_input_overshoots_max_size() {
        let mut viz =
            Visualizer::attach(Box::new(ConstantAnalyser(vec![255; 8])), PulseRange::default());
        let size = viz.frame_step().unwrap();
        assert!(size > 150.0);
        assert_eq!(size, 227.5);
    }

    #[tokio::test]
    async fn test_run_publishes_each_frame_until_detached() {
        let viz =
            Visualizer::attach(Box::new(ConstantAnalyser(vec![0; 16])), PulseRange::default());
        let handle = viz.handle();
        let frames = ManualFrames::default();
        let (tx, mut rx) = watch::channel(None);
        let task = tokio::spawn(viz.run(Box::new(frames.clone()), Arc::new(tx)));

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(100.0));

        handle.detach();
        frames.tick();
        task.await.unwrap();
        assert!(!rx.has_changed().unwrap_or(false));
    }

    /// Detaches its own visualizer from inside the read, as a stop landing
    /// between the attached check and the publish would.
    struct DetachingAnalyser {
        handle: Arc<std::sync::Mutex<Option<PulseHandle>>>,
    }

    impl Analyser for DetachingAnalyser {
        fn frequency_bin_count(&self) -> usize {
            4
        }

        fn read_byte_frequency_data(&mut self, buf: &mut [u8]) {
            if let Some(handle) = self.handle.lock().unwrap().as_ref() {
                handle.detach();
            }
            buf.fill(50);
        }
    }

    #[tokio::test]
    async fn test_size_computed_after_detach_is_not_published() {
        let slot = Arc::new(std::sync::Mutex::new(None));
        let viz = Visualizer::attach(
            Box::new(DetachingAnalyser {
                handle: Arc::clone(&slot),
            }),
            PulseRange::default(),
        );
        *slot.lock().unwrap() = Some(viz.handle());

        let (tx, rx) = watch::channel(None);
        let tx = Arc::new(tx);
        viz.run(Box::new(ManualFrames::default()), Arc::clone(&tx)).await;

        assert_eq!(*rx.borrow(), None);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_clock_ticks_at_frame_rate() {
        let mut clock = DisplayClock::new(50);
        let start = Instant::now();
        clock.next_frame().await;
        clock.next_frame().await;
        assert_eq!(start.elapsed(), Duration::from_millis(40));
    }
}
