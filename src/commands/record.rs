//! Interactive voice memo recording.
//!
//! Runs the recorder control until the user submits or quits, then delivers the
//! submitted memo: a summary line, raw WAV on stdout, or playback. Supports an
//! external submit trigger via SIGUSR1.

use anyhow::anyhow;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::config::VmemoConfig;
use crate::recording::ui::ViewState;
use crate::recording::{
    CaptureController, CpalBackend, FinishedRecording, MemoTui, RecordingCommand, Slot,
    SubmitHandler,
};
use crate::ui::ErrorScreen;

/// How long to wait for the recorder's final chunk after a submit.
const FINAL_CHUNK_TIMEOUT: Duration = Duration::from_secs(5);

/// What happens to a submitted memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitOutput {
    /// Print `<url> <bytes> bytes <secs>s slot <slot>`
    #[default]
    Summary,
    /// Write the memo as WAV to stdout
    Wav,
    /// Play the memo through the system audio player
    Play,
}

/// Records one voice memo and delivers it according to `output`.
///
/// # Errors
/// - If the configuration is invalid
/// - If the terminal cannot be driven
/// - If delivering the memo fails
pub async fn handle_record(output: SubmitOutput) -> Result<(), anyhow::Error> {
    tracing::info!("=== vmemo recorder started ===");

    let config = match VmemoConfig::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("Failed to load configuration: {err}");
            let mut screen = ErrorScreen::new()?;
            screen.show_error(&format!(
                "Configuration Error:\n\n{err}\n\nPlease check ~/.config/vmemo/vmemo.toml and try again."
            ))?;
            screen.cleanup()?;
            return Err(anyhow!("Configuration error: {err}"));
        }
    };

    tracing::info!(
        "Configuration loaded: device={}, chunk={}ms, fft_size={}, frame_rate={}fps",
        config.audio.device,
        config.audio.chunk_millis,
        config.analyser.fft_size,
        config.pulse.frame_rate
    );

    let (handoff_tx, mut handoffs) = mpsc::unbounded_channel::<(FinishedRecording, Slot)>();
    let on_submit: SubmitHandler = Arc::new(move |recording, slot| {
        if handoff_tx.send((recording, slot)).is_err() {
            tracing::warn!("Submitted memo arrived after the recorder exited");
        }
    });

    let backend = CpalBackend::new(
        config.audio.device.clone(),
        config.audio.chunk_millis,
        config.analyser_settings(),
    );
    let mut controller = CaptureController::new(Box::new(backend), on_submit)
        .with_pulse_range(config.pulse_range())
        .with_frame_rate(config.pulse.frame_rate);

    let trigger = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGUSR1, Arc::clone(&trigger))
        .map_err(|e| anyhow!("Failed to register signal handler: {e}"))?;

    let mut tui = MemoTui::new()?;
    let frame_interval = Duration::from_secs_f64(1.0 / config.pulse.frame_rate as f64);
    let mut view = ViewState::default();
    let mut started_at: Option<Instant> = None;
    let mut submission = None;

    loop {
        let mut command = tui.handle_input(frame_interval)?;
        if trigger.swap(false, Ordering::Relaxed) {
            tracing::info!("Received SIGUSR1: submitting via external trigger");
            if controller.is_recording() {
                command = RecordingCommand::StartOrSubmit;
            }
        }

        match command {
            RecordingCommand::Continue => {}
            RecordingCommand::StartOrSubmit if controller.is_recording() => {
                submission = Some(controller.submit()?);
                break;
            }
            RecordingCommand::StartOrSubmit => match controller.start().await {
                Ok(()) => {
                    started_at = Some(Instant::now());
                    view.notice = None;
                }
                Err(e) => {
                    tracing::warn!("Start failed: {}", e);
                    view.notice = Some(format!("Could not start recording: {e}"));
                }
            },
            RecordingCommand::Stop => {
                controller.stop();
                started_at = None;
                view.notice = controller
                    .last_recording()
                    .map(|rec| format!("Stopped after {:.1}s, not submitted", rec.duration().as_secs_f32()));
            }
            RecordingCommand::Quit => {
                controller.stop();
                break;
            }
        }

        view.recording = controller.is_recording();
        view.pulse = controller.pulse_size();
        view.elapsed = started_at.map(|t| t.elapsed()).unwrap_or_default();
        view.captured_bytes = controller.accumulated_len();
        tui.render(&view)?;
        tokio::task::yield_now().await;
    }

    let submitted = match submission {
        Some(submission) => tokio::time::timeout(FINAL_CHUNK_TIMEOUT, submission.finished())
            .await
            .unwrap_or_else(|_| {
                tracing::error!("Recorder never reported its final chunk");
                None
            }),
        None => None,
    };

    tui.cleanup()?;
    drop(tui);
    drop(controller);

    if submitted.is_none() {
        tracing::info!("=== vmemo recorder exited without a memo ===");
        return Ok(());
    }

    while let Ok((recording, slot)) = handoffs.try_recv() {
        deliver(&recording, slot, output)?;
    }

    tracing::info!("=== vmemo recorder exited successfully ===");
    Ok(())
}

/// Hands the memo to the user according to `output`.
fn deliver(recording: &FinishedRecording, slot: Slot, output: SubmitOutput) -> anyhow::Result<()> {
    match output {
        SubmitOutput::Summary => {
            println!("{}", summary_line(recording, slot));
        }
        SubmitOutput::Wav => {
            let wav = recording.to_wav()?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&wav)?;
            stdout.flush()?;
            tracing::debug!("Wrote {} WAV bytes to stdout", wav.len());
        }
        SubmitOutput::Play => play_recording(recording)?,
    }
    Ok(())
}

fn summary_line(recording: &FinishedRecording, slot: Slot) -> String {
    format!(
        "{} {} bytes {:.2}s slot {}",
        recording.url(),
        recording.len(),
        recording.duration().as_secs_f32(),
        slot
    )
}

/// Plays the memo with the first available system player.
///
/// The audio is written to a temporary WAV that is removed after playback.
fn play_recording(recording: &FinishedRecording) -> anyhow::Result<()> {
    let path: PathBuf = std::env::temp_dir().join(format!("vmemo-{}.wav", recording.id()));
    std::fs::write(&path, recording.to_wav()?)?;

    let result = run_player(&path);

    if let Err(e) = std::fs::remove_file(&path) {
        tracing::debug!("Failed to remove temp file: {}", e);
    }
    result
}

fn run_player(path: &PathBuf) -> anyhow::Result<()> {
    let players: &[(&str, &[&str])] = if cfg!(target_os = "macos") {
        &[("afplay", &[])]
    } else {
        &[
            ("paplay", &[]),
            ("aplay", &["-q"]),
            ("ffplay", &["-nodisp", "-autoexit", "-loglevel", "error"]),
            ("mpv", &["--really-quiet"]),
        ]
    };

    for (player, args) in players {
        match Command::new(player).args(*args).arg(path).status() {
            Ok(status) if status.success() => {
                tracing::info!("Played memo with {}", player);
                return Ok(());
            }
            Ok(status) => {
                return Err(anyhow!("{player} exited with {status}"));
            }
            Err(_) => continue,
        }
    }

    Err(anyhow!(
        "No audio player found. Install paplay, aplay, ffplay or mpv"
    ))
}
