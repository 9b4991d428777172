//! Voice memo capture for vmemo.
//!
//! The capture controller drives one microphone session at a time, the loudness
//! visualizer turns the live stream into a pulse size per display frame, and the
//! finished audio is handed to the caller as an in-memory resource.

pub mod audio;
pub mod controller;
pub mod device;
pub mod resource;
pub mod sink;
pub mod ui;
pub mod visualizations;

pub use audio::CpalBackend;
pub use controller::{CaptureController, SessionState};
pub use device::CaptureError;
pub use resource::{FinishedRecording, Slot, MICROPHONE_SLOT};
pub use sink::SubmitHandler;
pub use ui::{MemoTui, RecordingCommand};
