//! Loudness analysis and the recording pulse.
//!
//! `spectrum` turns live samples into byte frequency snapshots; `pulse` reduces
//! each snapshot to a circle size once per display frame.

pub mod pulse;
pub mod spectrum;

pub use pulse::{map_range, DisplayClock, PulseHandle, PulseRange, Visualizer};
pub use spectrum::{AnalyserSettings, FftAnalyser, SampleRing};
