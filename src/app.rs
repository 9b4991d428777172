//! Application orchestration and command routing.
//!
//! Handles command-line argument parsing and delegates to appropriate command handlers.

use crate::commands::{self, SubmitOutput};
use crate::logging;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;

/// A terminal voice memo recorder with a live loudness pulse
#[derive(Parser)]
#[command(name = "vmemo")]
#[command(version)]
#[command(about = "A terminal voice memo recorder with a live loudness pulse")]
#[command(long_about = "A terminal voice memo recorder with a live loudness pulse.\n\nPress Enter to start speaking, Enter again to submit the memo, s to stop\nwithout submitting and q or Esc to leave. Sending SIGUSR1 submits the memo\nfrom outside the terminal.\n\nDEFAULT COMMAND:\n    If no command is specified, 'record' is used by default.\n    Record options (--wav, --play) can be used without explicitly saying 'record'.\n\nEXAMPLES:\n    # Record and print the memo summary\n    $ vmemo\n\n    # Record and save the memo as WAV\n    $ vmemo --wav > memo.wav\n\n    # Record and listen back\n    $ vmemo record --play\n\n    # Submit from another terminal or a hotkey daemon\n    $ pkill -USR1 vmemo")]
#[command(
    after_help = "CONFIGURATION:\n    Config file:        ~/.config/vmemo/vmemo.toml\n    Logs:               ~/.local/state/vmemo/vmemo.log.*"
)]
struct Cli {
    /// Write the submitted memo as WAV to stdout (record default command)
    #[arg(long, global = true, conflicts_with = "play")]
    wav: bool,

    /// Play the submitted memo back (record default command)
    #[arg(long, global = true)]
    play: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a voice memo with a live loudness pulse (default)
    ///
    /// Press Enter to start and again to submit, s to stop, Escape/q to quit.
    /// By default the submitted memo is summarised on stdout.
    #[command(visible_alias = "r")]
    Record,

    /// Open configuration file in your preferred editor
    ///
    /// Edit the input device, analyser and pulse settings.
    /// Uses $EDITOR environment variable or falls back to nano/vi.
    #[command(visible_alias = "c")]
    Config,

    /// List available audio input devices
    ///
    /// Shows device IDs, names, and configurations to help configure
    /// the correct input device in vmemo.toml.
    #[command(name = "list-devices")]
    ListDevices,

    /// Show recent log entries from the application
    ///
    /// Display the last 50 lines of the most recent log file.
    Logs,

    /// Generate shell completion script
    ///
    /// Examples:
    ///   vmemo completions bash > vmemo.bash
    ///   vmemo completions zsh > _vmemo
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    fn submit_output(&self) -> SubmitOutput {
        if self.wav {
            SubmitOutput::Wav
        } else if self.play {
            SubmitOutput::Play
        } else {
            SubmitOutput::Summary
        }
    }
}

/// Runs the main application based on command-line arguments.
///
/// # Errors
/// - If logging initialization fails
/// - If command execution fails
pub async fn run() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Commands that need neither logging nor config
    match &cli.command {
        Some(Commands::Completions { shell }) => {
            generate(*shell, &mut Cli::command(), "vmemo", &mut io::stdout());
            return Ok(());
        }
        Some(Commands::ListDevices) => return commands::handle_list_devices(),
        Some(Commands::Logs) => return commands::handle_logs(),
        _ => {}
    }

    logging::init_logging()?;

    match cli.command {
        None | Some(Commands::Record) => {
            commands::handle_record(cli.submit_output()).await?;
        }
        Some(Commands::Config) => {
            commands::handle_config()?;
        }
        Some(Commands::Completions { .. }) | Some(Commands::ListDevices) | Some(Commands::Logs) => {
            unreachable!("These commands are handled earlier")
        }
    }

    Ok(())
}
