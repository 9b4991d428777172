//! Configuration management for vmemo.
//!
//! Settings live in `~/.config/vmemo/vmemo.toml`: the input device and recorder
//! timeslice, the frequency analyser, and the pulse mapping.

pub mod file;

pub use file::{get_config_path, AnalyserConfig, AudioConfig, PulseConfig, VmemoConfig};
