//! List available audio input devices.

use anyhow::anyhow;
use cpal::traits::{DeviceTrait, HostTrait};

use crate::recording::audio::suppress_alsa_warnings;

/// Lists the input devices a memo can be recorded from.
///
/// The printed IDs and names are what `audio.device` in vmemo.toml accepts.
///
/// # Errors
/// - If the audio host cannot enumerate its devices
pub fn handle_list_devices() -> Result<(), anyhow::Error> {
    let (host, devices) = suppress_alsa_warnings(|| {
        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = host
            .input_devices()
            .map_err(|e| anyhow!("Failed to enumerate audio devices: {e}"))?
            // Skip devices that cannot even report a name
            .filter(|d| d.name().is_ok())
            .collect();
        Ok((host, devices))
    })?;

    if devices.is_empty() {
        println!("No audio input devices found on this system.");
        return Ok(());
    }

    println!();
    println!("vmemo input devices:");
    println!();

    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    for (index, device) in devices.iter().enumerate() {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let marker = if default_name.as_deref() == Some(name.as_str()) {
            " [DEFAULT]"
        } else {
            ""
        };

        let config_info = match device.default_input_config() {
            Ok(config) => format!(
                " ({}Hz, {} channels, {:?})",
                config.sample_rate().0,
                config.channels(),
                config.sample_format()
            ),
            Err(_) => " (configuration unavailable)".to_string(),
        };

        println!("  ID: {index}");
        println!("    Name: {name}{marker}");
        println!("    Config:{config_info}");
        println!();
    }

    println!("Set one with `device = \"<ID or name>\"` under [audio] in vmemo.toml.");
    Ok(())
}
