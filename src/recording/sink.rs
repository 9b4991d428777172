//! Chunk accumulation and the one-shot submit hand-off.
//!
//! A [`ChunkSink`] is the data-available listener of one capture session. The
//! recorder calls it from whatever thread produces audio; the controller flips its
//! mode when the session is stopped or submitted.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

use super::resource::{AudioFormat, FinishedRecording, Slot, MICROPHONE_SLOT};

/// Caller-supplied receiver of submitted recordings.
pub type SubmitHandler = Arc<dyn Fn(FinishedRecording, Slot) + Send + Sync>;

enum Mode {
    /// Appending chunks while recording.
    Listening,
    /// Listener removed by `stop()`; late chunks are dropped.
    Detached,
    /// Submit requested; waiting for the recorder's final flush.
    Submitting {
        done: oneshot::Sender<Option<FinishedRecording>>,
        on_submit: SubmitHandler,
    },
    /// Hand-off delivered.
    Finished,
}

struct SinkState {
    chunks: Vec<Vec<u8>>,
    format: AudioFormat,
    mode: Mode,
}

/// Data-available listener for one recording session.
#[derive(Clone)]
pub struct ChunkSink {
    inner: Arc<Mutex<SinkState>>,
}

impl ChunkSink {
    pub(crate) fn new(format: AudioFormat) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkState {
                chunks: Vec::new(),
                format,
                mode: Mode::Listening,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SinkState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Handles one flushed chunk from the recorder.
    ///
    /// Empty chunks are ignored. Chunks arriving after the listener was detached
    /// are dropped.
    pub fn data_available(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            tracing::trace!("Ignoring empty chunk");
            return;
        }

        let mut guard = self.state();
        let state = &mut *guard;
        match state.mode {
            Mode::Listening | Mode::Submitting { .. } => {
                state.chunks.push(chunk.to_vec());
            }
            Mode::Detached | Mode::Finished => {
                tracing::debug!("Dropping {} byte chunk after listener detached", chunk.len());
            }
        }
    }

    /// Called by the recorder once its final chunk has been delivered.
    ///
    /// Completes a pending submit: the accumulated audio is finalized and handed
    /// to the submit handler exactly once.
    pub fn recorder_stopped(&self) {
        let (recording, done, on_submit) = {
            let mut state = self.state();
            match std::mem::replace(&mut state.mode, Mode::Finished) {
                Mode::Submitting { done, on_submit } => {
                    let recording = FinishedRecording::from_chunks(&state.chunks, state.format);
                    (recording, done, on_submit)
                }
                other => {
                    state.mode = other;
                    tracing::debug!("Recorder stopped without a pending submit");
                    return;
                }
            }
        };

        match &recording {
            Some(rec) => {
                tracing::info!(
                    "Handing off recording {} ({} bytes, {:.2}s) to slot {}",
                    rec.url(),
                    rec.len(),
                    rec.duration().as_secs_f32(),
                    MICROPHONE_SLOT
                );
                on_submit(rec.clone(), MICROPHONE_SLOT);
            }
            None => tracing::warn!("Submit finished with no audio captured; nothing handed off"),
        }

        // The submitter may have dropped its handle; the hand-off already happened.
        let _ = done.send(recording);
    }

    /// Removes the listener and finalizes what has been accumulated so far.
    pub(crate) fn detach(&self) -> Option<FinishedRecording> {
        let mut state = self.state();
        state.mode = Mode::Detached;
        FinishedRecording::from_chunks(&state.chunks, state.format)
    }

    /// Registers the intent to submit. The returned handle resolves once the
    /// recorder reports its final flush.
    pub(crate) fn request_handoff(&self, on_submit: SubmitHandler) -> Submission {
        let (done, rx) = oneshot::channel();
        let mut guard = self.state();
        let state = &mut *guard;
        match state.mode {
            Mode::Listening => {
                state.mode = Mode::Submitting { done, on_submit };
            }
            _ => {
                // Only reachable if the session already ended; resolve empty.
                let _ = done.send(None);
            }
        }
        Submission { rx }
    }

    /// Total bytes accumulated so far.
    pub fn accumulated_len(&self) -> usize {
        self.state().chunks.iter().map(Vec::len).sum()
    }
}

/// One-shot completion of a submitted session.
pub struct Submission {
    rx: oneshot::Receiver<Option<FinishedRecording>>,
}

impl Submission {
    /// Waits for the hand-off. Resolves to `None` when the session produced no
    /// audio or the recorder went away without reporting its final flush.
    pub async fn finished(self) -> Option<FinishedRecording> {
        self.rx.await.ok().flatten()
    }
}
