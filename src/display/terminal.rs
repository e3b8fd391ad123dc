// src/display/terminal.rs
//! Terminal-based status display

use crate::{
    error::Result,
    gps::Fix,
    run::{RunPhase, Snapshot},
};
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute, queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType, DisableLineWrap, EnableLineWrap},
};
use std::io::{self, Write};

pub struct TerminalDisplay {
    show_run: bool,
}

impl TerminalDisplay {
    /// Display with GPS, transponder and run sections
    pub fn new() -> Self {
        Self { show_run: true }
    }

    /// Display with the GPS section only
    pub fn gps_only() -> Self {
        Self { show_run: false }
    }

    /// Take over the terminal
    pub fn enter(&self) -> Result<()> {
        execute!(io::stdout(), Hide, DisableLineWrap)?;
        Ok(())
    }

    /// Give the terminal back
    pub fn leave(&self) -> Result<()> {
        execute!(io::stdout(), Show, EnableLineWrap)?;
        Ok(())
    }

    /// Redraw the whole screen
    pub fn draw(&self, snapshot: &Snapshot) -> Result<()> {
        let mut stdout = io::stdout();
        queue!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;
        self.render(&mut stdout, snapshot)?;
        stdout.flush()?;
        Ok(())
    }

    /// Render a snapshot to any writer
    pub fn render(&self, out: &mut impl Write, snapshot: &Snapshot) -> Result<()> {
        // Header
        queue!(
            out,
            SetForegroundColor(Color::Green),
            Print("=".repeat(60)),
            Print("\n"),
            Print("Ping GPS Logger"),
            Print("\n"),
            Print("=".repeat(60)),
            Print("\n"),
            ResetColor
        )?;

        self.render_gps_section(out, snapshot)?;

        if self.show_run {
            self.render_transponder_section(out, snapshot)?;
            self.render_run_section(out, snapshot)?;
        }

        // Footer
        let help = if self.show_run {
            "p + Enter: pause   r + Enter: resume   s + Enter: stop   Ctrl+C: quit"
        } else {
            "Press Ctrl+C to exit"
        };
        queue!(
            out,
            SetForegroundColor(Color::Green),
            Print("=".repeat(60)),
            Print("\n"),
            Print(help),
            Print("\n"),
            ResetColor
        )?;

        Ok(())
    }

    fn render_gps_section(&self, out: &mut impl Write, snapshot: &Snapshot) -> Result<()> {
        queue!(
            out,
            SetForegroundColor(Color::Yellow),
            Print("GPS:\n"),
            ResetColor
        )?;

        let link = match (snapshot.gps_connected, snapshot.gps_running) {
            (false, _) => "Disconnected".to_string(),
            (true, false) => "Connected, not reading".to_string(),
            (true, true) => snapshot.gps_health.description(),
        };
        queue!(out, Print(format!("  Status:    {:>20}\n", link)))?;

        let fix = &snapshot.last_fix;
        queue!(
            out,
            Print(format!("  Date:      {:>20}\n", field_or_dash(&fix.date))),
            Print(format!("  Time:      {:>20}\n", field_or_dash(&fix.time))),
            Print(format!("  Latitude:  {:>20}\n", field_or_dash(&fix.latitude))),
            Print(format!("  Longitude: {:>20}\n", field_or_dash(&fix.longitude))),
            Print(format!("  Heading:   {:>20}\n\n", field_or_dash(&fix.heading)))
        )?;

        Ok(())
    }

    fn render_transponder_section(&self, out: &mut impl Write, snapshot: &Snapshot) -> Result<()> {
        queue!(
            out,
            SetForegroundColor(Color::Cyan),
            Print("TRANSPONDER:\n"),
            ResetColor
        )?;

        let status = if snapshot.transponder_connected {
            "Connected"
        } else {
            "Disconnected"
        };
        queue!(out, Print(format!("  Status:    {:>20}\n\n", status)))?;

        Ok(())
    }

    fn render_run_section(&self, out: &mut impl Write, snapshot: &Snapshot) -> Result<()> {
        queue!(
            out,
            SetForegroundColor(Color::Magenta),
            Print("RUN:\n"),
            ResetColor
        )?;

        queue!(
            out,
            Print(format!("  State:     {:>20}\n", phase_label(snapshot.phase))),
            Print(format!("  Pings:     {:>20}\n", snapshot.ping_count))
        )?;

        if snapshot.phase == RunPhase::Starting {
            queue!(
                out,
                Print(format!("  Countdown: {:>19}s\n", snapshot.countdown_remaining))
            )?;
        }

        if let Some(path) = &snapshot.log_path {
            queue!(out, Print(format!("  Log file:  {}\n", path.display())))?;
        }

        if let Some(reason) = &snapshot.last_stop_reason {
            queue!(
                out,
                Print(format!("  Last stop: {:>20}\n", reason.description()))
            )?;
        }

        queue!(out, Print("\n"))?;
        Ok(())
    }
}

impl Default for TerminalDisplay {
    fn default() -> Self {
        Self::new()
    }
}

fn phase_label(phase: RunPhase) -> &'static str {
    match phase {
        RunPhase::Idle => "Idle",
        RunPhase::Starting => "Starting",
        RunPhase::Pinging => "Pinging",
        RunPhase::Paused => "Paused",
    }
}

fn field_or_dash(field: &str) -> &str {
    if field.is_empty() {
        "----"
    } else {
        field
    }
}

/// One-line summary of a fix, for log output
pub fn fix_summary(fix: &Fix) -> String {
    if fix.is_empty() {
        return "no fix".to_string();
    }
    format!(
        "{} {} {} {} hdg {}",
        field_or_dash(&fix.date),
        field_or_dash(&fix.time),
        field_or_dash(&fix.latitude),
        field_or_dash(&fix.longitude),
        field_or_dash(&fix.heading)
    )
}
