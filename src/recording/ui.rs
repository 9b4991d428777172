//! Terminal control for recording a voice memo.
//!
//! A round record button with a translucent pulse behind it that grows with the
//! input loudness while recording. Drawn on stderr so stdout stays free for the
//! submitted audio.

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    style::{Color, Style},
    widgets::{
        canvas::{Canvas, Circle, Context},
        Paragraph,
    },
};
use std::io::{stderr, Stderr};
use std::time::Duration;

const BUTTON_GREEN: Color = Color::Rgb(38, 166, 91);
const STOP_RED: Color = Color::Rgb(220, 53, 69);

/// Diameter of the record button, in the same units as the pulse size.
const BUTTON_SIZE: f64 = 64.0;

/// User input command for the recorder control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingCommand {
    /// No key pressed
    Continue,
    /// Start recording when idle, submit when recording (Enter)
    StartOrSubmit,
    /// Stop recording without submitting ('s')
    Stop,
    /// Leave the recorder (Escape, 'q' or Ctrl+C)
    Quit,
}

/// Maps a key press to a recorder command.
pub fn command_for_key(key: KeyEvent) -> RecordingCommand {
    if key.kind == KeyEventKind::Release {
        return RecordingCommand::Continue;
    }
    match key.code {
        KeyCode::Enter | KeyCode::Char(' ') => RecordingCommand::StartOrSubmit,
        KeyCode::Char('s') => RecordingCommand::Stop,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            RecordingCommand::Quit
        }
        KeyCode::Char('q') | KeyCode::Esc => RecordingCommand::Quit,
        _ => RecordingCommand::Continue,
    }
}

/// Everything the control shows for one frame.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub recording: bool,
    /// Pulse diameter, present only while recording
    pub pulse: Option<f32>,
    pub elapsed: Duration,
    pub captured_bytes: usize,
    /// One-line notice, e.g. after a failed start
    pub notice: Option<String>,
}

impl ViewState {
    fn prompt(&self) -> [&'static str; 2] {
        if self.recording {
            [
                "Your voice is being recorded",
                "Enter to submit · s to stop · q to quit",
            ]
        } else {
            [
                "Press Enter to start speaking",
                "The memo is handed off when you submit",
            ]
        }
    }
}

/// Terminal UI for the memo recorder.
pub struct MemoTui {
    terminal: Terminal<CrosstermBackend<Stderr>>,
}

impl MemoTui {
    /// Creates a new TUI instance and enters alternate screen mode.
    ///
    /// # Errors
    /// - If raw mode cannot be enabled or the alternate screen entered
    pub fn new() -> anyhow::Result<Self> {
        enable_raw_mode()?;
        let mut out = stderr();
        execute!(out, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(out))?;
        Ok(Self { terminal })
    }

    /// Draws the control.
    pub fn render(&mut self, view: &ViewState) -> anyhow::Result<()> {
        self.terminal.draw(|frame| {
            let area = frame.area();
            let [canvas_area, prompt_area, footer_area] = Layout::vertical([
                Constraint::Min(6),
                Constraint::Length(3),
                Constraint::Length(1),
            ])
            .areas(area);

            frame.render_widget(pulse_canvas(view), canvas_area);

            let [line1, line2] = view.prompt();
            let mut lines = vec![Line::from(line1), Line::from(line2)];
            if let Some(notice) = &view.notice {
                lines.push(Line::styled(notice.as_str(), Style::default().fg(STOP_RED)));
            }
            frame.render_widget(
                Paragraph::new(lines).alignment(Alignment::Center),
                prompt_area,
            );

            frame.render_widget(footer(view), footer_area);
        })?;
        Ok(())
    }

    /// Processes pending input within `timeout`.
    ///
    /// # Errors
    /// - If event polling fails
    pub fn handle_input(&mut self, timeout: Duration) -> anyhow::Result<RecordingCommand> {
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                let command = command_for_key(key);
                if command != RecordingCommand::Continue {
                    tracing::debug!("Key {:?} -> {:?}", key.code, command);
                }
                return Ok(command);
            }
        }
        Ok(RecordingCommand::Continue)
    }

    /// Restores the terminal.
    ///
    /// # Errors
    /// - If terminal mode cannot be disabled or the cursor shown
    pub fn cleanup(&mut self) -> anyhow::Result<()> {
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

impl Drop for MemoTui {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

fn pulse_canvas(view: &ViewState) -> Canvas<'static, impl Fn(&mut Context)> {
    let recording = view.recording;
    let pulse = view.pulse.map(f64::from);
    // The pulse may overshoot its nominal maximum; keep it on screen.
    let bound = pulse.map_or(100.0, |size| (size / 2.0 + 4.0).max(100.0));

    Canvas::default()
        .marker(ratatui::symbols::Marker::Braille)
        .x_bounds([-bound, bound])
        .y_bounds([-bound, bound])
        .paint(move |ctx| {
            if let Some(size) = pulse {
                ctx.draw(&Circle {
                    x: 0.0,
                    y: 0.0,
                    radius: size / 2.0,
                    color: Color::Rgb(120, 200, 150),
                });
            }
            ctx.draw(&Circle {
                x: 0.0,
                y: 0.0,
                radius: BUTTON_SIZE / 2.0,
                color: BUTTON_GREEN,
            });
            ctx.layer();
            let icon = if recording { "➤" } else { "🎤" };
            ctx.print(0.0, 0.0, Span::styled(icon, Style::default().fg(Color::White)));
        })
}

fn footer(view: &ViewState) -> Paragraph<'static> {
    let indicator = if view.recording {
        Span::styled("● ", Style::default().fg(STOP_RED))
    } else {
        Span::styled("○ ", Style::default().fg(Color::Gray))
    };

    let secs = view.elapsed.as_secs();
    let mut spans = vec![indicator, Span::raw(format!("{}:{:02}", secs / 60, secs % 60))];
    if view.recording {
        spans.push(Span::raw(format!(" / {} KiB", view.captured_bytes / 1024)));
        if let Some(size) = view.pulse {
            spans.push(Span::raw(format!(" / pulse {size:.0}")));
        }
    }

    Paragraph::new(Line::from(spans)).style(Style::default().fg(Color::Rgb(185, 207, 212)))
}
