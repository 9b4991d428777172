//! Collaborator seams for the capture controller.
//!
//! The controller never talks to audio hardware directly. It asks a
//! [`CaptureBackend`] for a live microphone stream, binds a [`Recorder`] and an
//! [`Analyser`] to that stream, and paces the loudness visualizer with a
//! [`FrameScheduler`]. The cpal implementations live in `audio.rs`.

use async_trait::async_trait;
use thiserror::Error;

use super::resource::AudioFormat;
use super::sink::ChunkSink;

/// Failures surfaced by the capture state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The user or the platform refused microphone access.
    #[error("microphone access denied: {0}")]
    AccessDenied(String),
    /// No usable input device, or the stream could not be opened.
    #[error("audio input device unavailable: {0}")]
    DeviceUnavailable(String),
    /// `start()` was called while a session is already recording.
    #[error("a recording session is already active")]
    DoubleStart,
    /// `submit()` was called without an active session.
    #[error("no recording session is active")]
    NotRecording,
}

/// Grants access to the microphone.
///
/// Futures are not required to be `Send`: platform streams (cpal on macOS, for
/// example) must stay on the thread that created them.
#[async_trait(?Send)]
pub trait CaptureBackend {
    /// Requests microphone access and opens a live input stream.
    async fn open_stream(&self) -> Result<Box<dyn LiveStream>, CaptureError>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// A live microphone stream. Owns the hardware handle.
pub trait LiveStream {
    /// Creates a recording device bound to this stream.
    fn create_recorder(&mut self) -> Result<Box<dyn Recorder>, CaptureError>;

    /// Creates a frequency analyser fed by this stream.
    ///
    /// The analyser only holds a sample tap; it does not keep the stream alive.
    fn create_analyser(&mut self) -> Box<dyn Analyser>;

    /// Halts every track of the stream and releases the hardware.
    fn stop_tracks(&mut self);
}

/// Encodes a live stream into byte chunks.
pub trait Recorder {
    /// Starts encoding. Chunks are delivered to `sink` as they are flushed.
    fn start(&mut self, sink: ChunkSink) -> Result<(), CaptureError>;

    /// Stops encoding.
    ///
    /// The recorder flushes its remaining buffered bytes as one final chunk and
    /// then calls [`ChunkSink::recorder_stopped`]. Both may happen before this
    /// returns or later from another thread.
    fn stop(&mut self);

    /// Format of the bytes this recorder produces.
    fn format(&self) -> AudioFormat;
}

/// Streaming frequency-domain analyser.
pub trait Analyser: Send {
    /// Number of frequency bins in one snapshot.
    fn frequency_bin_count(&self) -> usize;

    /// Copies the current snapshot, one byte magnitude per bin, into `buf`.
    fn read_byte_frequency_data(&mut self, buf: &mut [u8]);
}

/// Display refresh scheduler.
#[async_trait]
pub trait FrameScheduler: Send {
    /// Resolves once, right before the next display frame.
    async fn next_frame(&mut self);
}

#[cfg(test)]
pub(crate) mod fakes {
    //! Deterministic collaborators for state-machine tests.

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    /// Holds the next analyser read until the test releases it.
    pub struct ReadGate {
        entered: mpsc::Sender<()>,
        release: mpsc::Receiver<()>,
    }

    /// Observable hardware state shared between a test and its fakes.
    #[derive(Default)]
    pub struct Hardware {
        pub streams_opened: AtomicUsize,
        pub tracks_stopped: AtomicUsize,
        pub recorders_stopped: AtomicUsize,
        pub analysers_dropped: AtomicUsize,
        pub live: AtomicBool,
        pub fail_recorder_create: AtomicBool,
        pub fail_recorder_start: AtomicBool,
        pub sink: Mutex<Option<ChunkSink>>,
        pub snapshot: Mutex<Vec<u8>>,
        pub gate: Mutex<Option<ReadGate>>,
    }

    impl Hardware {
        /// Emits a data-available notification through the current sink.
        pub fn emit(&self, chunk: &[u8]) {
            let sink = self.sink.lock().unwrap().clone();
            sink.expect("recorder was never started").data_available(chunk);
        }

        /// Reports that the recorder finished its final flush.
        pub fn finish(&self) {
            let sink = self.sink.lock().unwrap().clone();
            sink.expect("recorder was never started").recorder_stopped();
        }

        /// Blocks the next analyser read. Returns a receiver signalled once the
        /// read has begun and a sender that lets it complete.
        pub fn gate_next_read(&self) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
            let (entered, entered_rx) = mpsc::channel();
            let (release_tx, release) = mpsc::channel();
            *self.gate.lock().unwrap() = Some(ReadGate { entered, release });
            (entered_rx, release_tx)
        }
    }

    pub struct FakeBackend {
        pub hardware: Arc<Hardware>,
        pub deny: Option<CaptureError>,
    }

    impl FakeBackend {
        pub fn granting() -> Self {
            Self {
                hardware: Arc::new(Hardware::default()),
                deny: None,
            }
        }

        pub fn denying(err: CaptureError) -> Self {
            Self {
                hardware: Arc::new(Hardware::default()),
                deny: Some(err),
            }
        }
    }

    #[async_trait(?Send)]
    impl CaptureBackend for FakeBackend {
        async fn open_stream(&self) -> Result<Box<dyn LiveStream>, CaptureError> {
            tokio::task::yield_now().await;
            if let Some(err) = &self.deny {
                return Err(err.clone());
            }
            self.hardware.streams_opened.fetch_add(1, Ordering::SeqCst);
            self.hardware.live.store(true, Ordering::SeqCst);
            Ok(Box::new(FakeStream {
                hardware: Arc::clone(&self.hardware),
            }))
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    pub struct FakeStream {
        hardware: Arc<Hardware>,
    }

    impl LiveStream for FakeStream {
        fn create_recorder(&mut self) -> Result<Box<dyn Recorder>, CaptureError> {
            if self.hardware.fail_recorder_create.load(Ordering::SeqCst) {
                return Err(CaptureError::DeviceUnavailable("no recorder".to_string()));
            }
            Ok(Box::new(FakeRecorder {
                hardware: Arc::clone(&self.hardware),
            }))
        }

        fn create_analyser(&mut self) -> Box<dyn Analyser> {
            Box::new(FakeAnalyser {
                hardware: Arc::clone(&self.hardware),
            })
        }

        fn stop_tracks(&mut self) {
            self.hardware.tracks_stopped.fetch_add(1, Ordering::SeqCst);
            self.hardware.live.store(false, Ordering::SeqCst);
        }
    }

    /// Recorder whose chunks are emitted by the test through [`Hardware`].
    pub struct FakeRecorder {
        hardware: Arc<Hardware>,
    }

    impl Recorder for FakeRecorder {
        fn start(&mut self, sink: ChunkSink) -> Result<(), CaptureError> {
            if self.hardware.fail_recorder_start.load(Ordering::SeqCst) {
                return Err(CaptureError::DeviceUnavailable("recorder busy".to_string()));
            }
            *self.hardware.sink.lock().unwrap() = Some(sink);
            Ok(())
        }

        fn stop(&mut self) {
            self.hardware.recorders_stopped.fetch_add(1, Ordering::SeqCst);
        }

        fn format(&self) -> AudioFormat {
            AudioFormat::new(16_000, 1)
        }
    }

    /// Analyser reporting whatever snapshot the test placed in [`Hardware`].
    pub struct FakeAnalyser {
        hardware: Arc<Hardware>,
    }

    impl Analyser for FakeAnalyser {
        fn frequency_bin_count(&self) -> usize {
            self.hardware.snapshot.lock().unwrap().len()
        }

        fn read_byte_frequency_data(&mut self, buf: &mut [u8]) {
            let gate = self.hardware.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.entered.send(());
                let _ = gate.release.recv();
            }
            let snapshot = self.hardware.snapshot.lock().unwrap();
            for (dst, src) in buf.iter_mut().zip(snapshot.iter()) {
                *dst = *src;
            }
        }
    }

    impl Drop for FakeAnalyser {
        fn drop(&mut self) {
            self.hardware.analysers_dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Frame scheduler advanced by hand with [`ManualFrames::tick`].
    #[derive(Clone, Default)]
    pub struct ManualFrames {
        notify: Arc<Notify>,
    }

    impl ManualFrames {
        pub fn tick(&self) {
            self.notify.notify_one();
        }
    }

    #[async_trait]
    impl FrameScheduler for ManualFrames {
        async fn next_frame(&mut self) {
            self.notify.notified().await;
        }
    }
}
