//! Capture controller: the recording session state machine.
//!
//! ```text
//! Idle --start ok--> Recording --stop---> Stopped --start ok--> Recording
//!                              --submit-> Stopped (hand-off pending)
//! ```
//!
//! Every path out of `Recording` detaches the visualizer and the chunk listener
//! first, then stops the stream tracks and the recorder.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::device::{CaptureBackend, CaptureError, FrameScheduler, LiveStream, Recorder};
use super::resource::FinishedRecording;
use super::sink::{ChunkSink, SubmitHandler, Submission};
use super::visualizations::{DisplayClock, PulseHandle, PulseRange, Visualizer};

/// Creates the frame scheduler for each new session.
pub type SchedulerFactory = Box<dyn Fn() -> Box<dyn FrameScheduler>>;

/// Lifecycle of the current capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording,
    Stopped,
}

/// Hardware and listeners owned by the recording session.
struct ActiveSession {
    stream: Box<dyn LiveStream>,
    recorder: Box<dyn Recorder>,
    sink: ChunkSink,
    pulse: PulseHandle,
    frame_loop: JoinHandle<()>,
}

impl ActiveSession {
    fn release(mut self) {
        self.stream.stop_tracks();
        self.recorder.stop();
        self.frame_loop.abort();
    }
}

/// Owns one microphone recording session at a time.
pub struct CaptureController {
    backend: Box<dyn CaptureBackend>,
    on_submit: SubmitHandler,
    frames: SchedulerFactory,
    range: PulseRange,
    pulse: Arc<watch::Sender<Option<f32>>>,
    state: SessionState,
    session: Option<ActiveSession>,
    last_recording: Option<FinishedRecording>,
}

impl CaptureController {
    /// Creates an idle controller. `on_submit` receives every submitted recording.
    pub fn new(backend: Box<dyn CaptureBackend>, on_submit: SubmitHandler) -> Self {
        let (pulse, _) = watch::channel(None);
        Self {
            backend,
            on_submit,
            frames: Box::new(|| Box::new(DisplayClock::new(60)) as Box<dyn FrameScheduler>),
            range: PulseRange::default(),
            pulse: Arc::new(pulse),
            state: SessionState::Idle,
            session: None,
            last_recording: None,
        }
    }

    pub fn with_pulse_range(mut self, range: PulseRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frames =
            Box::new(move || Box::new(DisplayClock::new(frame_rate)) as Box<dyn FrameScheduler>);
        self
    }

    pub fn with_frame_scheduler(mut self, frames: SchedulerFactory) -> Self {
        self.frames = frames;
        self
    }

    /// Requests microphone access and begins a fresh recording session.
    ///
    /// On failure no handles are kept and the state is left unchanged.
    ///
    /// # Errors
    /// - `DoubleStart` if a session is already recording
    /// - `AccessDenied` / `DeviceUnavailable` from the capture backend
    pub async fn start(&mut self) -> Result<(), CaptureError> {
        if self.state == SessionState::Recording {
            tracing::warn!("Ignoring start: a session is already recording");
            return Err(CaptureError::DoubleStart);
        }

        tracing::info!("Requesting microphone access ({})", self.backend.name());
        let mut stream = self.backend.open_stream().await.map_err(|e| {
            tracing::warn!("Microphone access failed: {}", e);
            e
        })?;

        let mut recorder = match stream.create_recorder() {
            Ok(recorder) => recorder,
            Err(e) => {
                tracing::error!("Failed to create recorder: {}", e);
                stream.stop_tracks();
                return Err(e);
            }
        };

        let sink = ChunkSink::new(recorder.format());
        if let Err(e) = recorder.start(sink.clone()) {
            tracing::error!("Failed to start recorder: {}", e);
            stream.stop_tracks();
            return Err(e);
        }

        let visualizer = Visualizer::attach(stream.create_analyser(), self.range);
        let pulse = visualizer.handle();
        let frame_loop = tokio::spawn(visualizer.run((self.frames)(), Arc::clone(&self.pulse)));

        self.session = Some(ActiveSession {
            stream,
            recorder,
            sink,
            pulse,
            frame_loop,
        });
        self.last_recording = None;
        self.state = SessionState::Recording;
        tracing::info!("Recording started");
        Ok(())
    }

    /// Stops the active session without handing it off.
    ///
    /// Whatever was captured is kept as [`Self::last_recording`]. A no-op when
    /// nothing is recording.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            tracing::debug!("Stop requested without an active session");
            return;
        };

        session.pulse.detach();
        self.pulse.send_replace(None);
        let recording = session.sink.detach();
        session.release();

        match &recording {
            Some(rec) => tracing::info!(
                "Recording stopped: {:.2}s ({} bytes)",
                rec.duration().as_secs_f32(),
                rec.len()
            ),
            None => tracing::warn!("Recording stopped with no audio captured"),
        }

        self.last_recording = recording;
        self.state = SessionState::Stopped;
    }

    /// Stops the active session and hands its audio to the submit handler.
    ///
    /// The recorder's final chunk is still accepted. The handler runs once that
    /// chunk has arrived; the returned [`Submission`] resolves at the same time.
    ///
    /// # Errors
    /// - `NotRecording` if there is no active session
    pub fn submit(&mut self) -> Result<Submission, CaptureError> {
        let Some(session) = self.session.take() else {
            tracing::warn!("Submit requested without an active session");
            return Err(CaptureError::NotRecording);
        };

        session.pulse.detach();
        self.pulse.send_replace(None);
        let submission = session.sink.request_handoff(Arc::clone(&self.on_submit));
        session.release();

        tracing::info!("Recording submitted, awaiting final chunk");
        self.last_recording = None;
        self.state = SessionState::Stopped;
        Ok(submission)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == SessionState::Recording
    }

    /// Receiver of the pulse size; `None` whenever nothing is recording.
    pub fn pulse(&self) -> watch::Receiver<Option<f32>> {
        self.pulse.subscribe()
    }

    /// Current pulse size, if recording.
    pub fn pulse_size(&self) -> Option<f32> {
        *self.pulse.borrow()
    }

    /// Bytes captured so far by the active session.
    pub fn accumulated_len(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |session| session.sink.accumulated_len())
    }

    /// Audio of the last stopped (not submitted) session.
    pub fn last_recording(&self) -> Option<&FinishedRecording> {
        self.last_recording.as_ref()
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::device::fakes::{FakeBackend, Hardware, ManualFrames};
    use crate::recording::resource::{Slot, MICROPHONE_SLOT};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    type Submitted = Arc<Mutex<Vec<(FinishedRecording, Slot)>>>;

    fn controller(backend: FakeBackend) -> (CaptureController, Arc<Hardware>, Submitted, ManualFrames) {
        let hardware = Arc::clone(&backend.hardware);
        let submitted: Submitted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&submitted);
        let handler: SubmitHandler = Arc::new(move |rec, slot| {
            sink.lock().unwrap().push((rec, slot));
        });
        let frames = ManualFrames::default();
        let factory_frames = frames.clone();
        let controller = CaptureController::new(Box::new(backend), handler)
            .with_frame_scheduler(Box::new(move || {
                Box::new(factory_frames.clone()) as Box<dyn FrameScheduler>
            }));
        (controller, hardware, submitted, frames)
    }

    #[tokio::test]
    async fn test_submit_hands_off_all_chunks_once() {
        let (mut ctl, hw, submitted, _) = controller(FakeBackend::granting());
        ctl.start().await.unwrap();
        assert_eq!(ctl.state(), SessionState::Recording);

        hw.emit(&[1u8; 10]);
        hw.emit(&[2u8; 20]);
        let submission = ctl.submit().unwrap();
        assert_eq!(ctl.state(), SessionState::Stopped);
        assert_eq!(hw.tracks_stopped.load(Ordering::SeqCst), 1);
        assert_eq!(hw.recorders_stopped.load(Ordering::SeqCst), 1);

        hw.emit(&[3u8; 5]);
        hw.finish();
        let rec = submission.finished().await.unwrap();
        assert_eq!(rec.len(), 35);

        let submitted = submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].0.len(), 35);
        assert_eq!(submitted[0].1, MICROPHONE_SLOT);
        assert_eq!(submitted[0].0.id(), rec.id());
    }

    #[tokio::test]
    async fn test_finished_audio_is_ordered_concatenation() {
        let (mut ctl, hw, _, _) = controller(FakeBackend::granting());
        ctl.start().await.unwrap();
        hw.emit(&[1, 2]);
        hw.emit(&[]);
        hw.emit(&[3]);
        hw.emit(&[4, 5, 6]);
        let submission = ctl.submit().unwrap();
        hw.emit(&[]);
        hw.finish();

        let rec = submission.finished().await.unwrap();
        assert_eq!(rec.bytes(), &[1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_denied_access_stays_idle() {
        let (mut ctl, hw, submitted, _) = controller(FakeBackend::denying(
            CaptureError::AccessDenied("user said no".to_string()),
        ));

        let err = ctl.start().await.unwrap_err();
        assert!(matches!(err, CaptureError::AccessDenied(_)));
        assert_eq!(ctl.state(), SessionState::Idle);
        assert_eq!(hw.streams_opened.load(Ordering::SeqCst), 0);
        assert!(matches!(ctl.submit(), Err(CaptureError::NotRecording)));
        assert!(submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_without_audio_produces_nothing() {
        let (mut ctl, hw, submitted, _) = controller(FakeBackend::granting());
        ctl.start().await.unwrap();
        ctl.stop();

        assert_eq!(ctl.state(), SessionState::Stopped);
        assert!(ctl.last_recording().is_none());
        assert!(!hw.live.load(Ordering::SeqCst));
        assert!(submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (mut ctl, hw, _, _) = controller(FakeBackend::granting());
        ctl.stop();
        assert_eq!(ctl.state(), SessionState::Idle);

        ctl.start().await.unwrap();
        hw.emit(&[1, 2, 3]);
        ctl.stop();
        ctl.stop();

        assert_eq!(ctl.state(), SessionState::Stopped);
        assert_eq!(hw.tracks_stopped.load(Ordering::SeqCst), 1);
        assert_eq!(hw.recorders_stopped.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.last_recording().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_chunks_after_stop_are_dropped() {
        let (mut ctl, hw, submitted, _) = controller(FakeBackend::granting());
        ctl.start().await.unwrap();
        hw.emit(&[1, 2]);
        ctl.stop();
        hw.emit(&[3, 4]);
        hw.finish();

        assert_eq!(ctl.last_recording().unwrap().bytes(), &[1, 2]);
        assert!(submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let (mut ctl, hw, _, _) = controller(FakeBackend::granting());
        ctl.start().await.unwrap();
        hw.emit(&[9; 4]);

        assert_eq!(ctl.start().await, Err(CaptureError::DoubleStart));
        assert_eq!(hw.streams_opened.load(Ordering::SeqCst), 1);
        assert!(ctl.is_recording());
        assert_eq!(ctl.accumulated_len(), 4);
    }

    #[tokio::test]
    async fn test_restart_begins_fresh_session() {
        let (mut ctl, hw, _, _) = controller(FakeBackend::granting());
        ctl.start().await.unwrap();
        hw.emit(&[1; 8]);
        ctl.stop();

        ctl.start().await.unwrap();
        assert!(ctl.is_recording());
        assert_eq!(ctl.accumulated_len(), 0);
        assert!(ctl.last_recording().is_none());
        assert_eq!(hw.streams_opened.load(Ordering::SeqCst), 2);

        hw.emit(&[2; 3]);
        assert_eq!(ctl.accumulated_len(), 3);
    }

    #[tokio::test]
    async fn test_pulse_follows_loudness_and_resets_on_stop() {
        let (mut ctl, hw, _, frames) = controller(FakeBackend::granting());
        *hw.snapshot.lock().unwrap() = vec![50; 4];
        let mut pulse = ctl.pulse();

        ctl.start().await.unwrap();
        pulse.changed().await.unwrap();
        assert_eq!(*pulse.borrow_and_update(), Some(125.0));

        *hw.snapshot.lock().unwrap() = vec![100; 4];
        frames.tick();
        pulse.changed().await.unwrap();
        assert_eq!(*pulse.borrow_and_update(), Some(150.0));

        ctl.stop();
        assert_eq!(ctl.pulse_size(), None);
        assert_eq!(*pulse.borrow_and_update(), None);
    }

    #[tokio::test]
    async fn test_dropping_controller_releases_hardware() {
        let (mut ctl, hw, _, _) = controller(FakeBackend::granting());
        ctl.start().await.unwrap();
        drop(ctl);
        assert_eq!(hw.tracks_stopped.load(Ordering::SeqCst), 1);
        assert!(!hw.live.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_during_frame_step_leaves_pulse_cleared() {
        let (mut ctl, hw, _, _) = controller(FakeBackend::granting());
        *hw.snapshot.lock().unwrap() = vec![50; 4];
        let (entered, release) = hw.gate_next_read();

        ctl.start().await.unwrap();
        entered.recv_timeout(Duration::from_secs(5)).unwrap();

        // The frame step has read the flag and is computing a size.
        ctl.stop();
        assert_eq!(ctl.pulse_size(), None);
        release.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while hw.analysers_dropped.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(ctl.state(), SessionState::Stopped);
        assert_eq!(ctl.pulse_size(), None);
    }

    fn recorder_failure(hw: &Hardware, at_start: bool) -> &AtomicBool {
        if at_start {
            &hw.fail_recorder_start
        } else {
            &hw.fail_recorder_create
        }
    }

    #[tokio::test]
    async fn test_recorder_failure_from_idle_releases_stream() {
        for at_start in [false, true] {
            let (mut ctl, hw, submitted, _) = controller(FakeBackend::granting());
            recorder_failure(&hw, at_start).store(true, Ordering::SeqCst);

            let err = ctl.start().await.unwrap_err();
            assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
            assert_eq!(ctl.state(), SessionState::Idle);
            assert_eq!(hw.streams_opened.load(Ordering::SeqCst), 1);
            assert_eq!(hw.tracks_stopped.load(Ordering::SeqCst), 1);
            assert!(!hw.live.load(Ordering::SeqCst));
            assert_eq!(ctl.pulse_size(), None);
            assert_eq!(ctl.accumulated_len(), 0);
            assert!(matches!(ctl.submit(), Err(CaptureError::NotRecording)));
            assert!(submitted.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_recorder_failure_from_stopped_keeps_state() {
        for at_start in [false, true] {
            let (mut ctl, hw, submitted, _) = controller(FakeBackend::granting());
            ctl.start().await.unwrap();
            hw.emit(&[7; 6]);
            ctl.stop();
            assert_eq!(hw.tracks_stopped.load(Ordering::SeqCst), 1);

            recorder_failure(&hw, at_start).store(true, Ordering::SeqCst);
            assert!(ctl.start().await.is_err());

            assert_eq!(ctl.state(), SessionState::Stopped);
            assert_eq!(hw.streams_opened.load(Ordering::SeqCst), 2);
            assert_eq!(hw.tracks_stopped.load(Ordering::SeqCst), 2);
            assert!(!hw.live.load(Ordering::SeqCst));
            assert_eq!(ctl.last_recording().unwrap().len(), 6);
            assert!(matches!(ctl.submit(), Err(CaptureError::NotRecording)));
            assert!(submitted.lock().unwrap().is_empty());
        }
    }
}
