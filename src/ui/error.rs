//! Full-screen error notice shown before vmemo exits on a fatal problem.

use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Paragraph, Wrap},
};
use std::io::{self, Stderr};
use std::time::Duration;

const ERROR_RED: Color = Color::Rgb(220, 53, 69);

/// Red screen with a centered, wrapped message; dismissed by any key.
pub struct ErrorScreen {
    terminal: Terminal<CrosstermBackend<Stderr>>,
}

impl ErrorScreen {
    /// Enters the alternate screen on stderr.
    ///
    /// # Errors
    /// - If raw mode cannot be enabled or the alternate screen entered
    pub fn new() -> anyhow::Result<Self> {
        enable_raw_mode()?;
        let mut out = io::stderr();
        execute!(out, EnterAlternateScreen)?;
        Ok(ErrorScreen {
            terminal: Terminal::new(CrosstermBackend::new(out))?,
        })
    }

    /// Shows `message` until a key is pressed.
    pub fn show_error(&mut self, message: &str) -> anyhow::Result<()> {
        loop {
            self.terminal.draw(|frame| {
                let area = frame.area();
                frame.render_widget(Block::default().style(Style::default().bg(ERROR_RED)), area);

                let [_, body, hint] = Layout::vertical([
                    Constraint::Percentage(40),
                    Constraint::Min(3),
                    Constraint::Length(2),
                ])
                .areas(area);
                let [_, body, _] = Layout::horizontal([
                    Constraint::Percentage(10),
                    Constraint::Percentage(80),
                    Constraint::Percentage(10),
                ])
                .areas(body);

                let text = Style::default().fg(Color::White).bg(ERROR_RED);
                frame.render_widget(
                    Paragraph::new(message)
                        .style(text)
                        .alignment(Alignment::Center)
                        .wrap(Wrap { trim: true }),
                    body,
                );
                frame.render_widget(
                    Paragraph::new("press any key").style(text).alignment(Alignment::Center),
                    hint,
                );
            })?;

            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(_) = event::read()? {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Restores the terminal.
    pub fn cleanup(&mut self) -> anyhow::Result<()> {
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

impl Drop for ErrorScreen {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}
