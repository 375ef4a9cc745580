use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;

use crate::progress::ProgressRenderer;

const OPTION_LABELS: [&str; 2] = ["Yes", "No"];

/// The seam the orchestrator asks questions through. Prompt text is written
/// through `out` so its lines are counted.
pub trait Prompter {
    fn confirm<W: Write>(&mut self, out: &mut ProgressRenderer<W>, message: &str) -> Result<bool>;
    fn prompt_number<W: Write>(
        &mut self,
        out: &mut ProgressRenderer<W>,
        message: &str,
        default: u32,
    ) -> Result<u32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Left,
    Right,
}

impl Selection {
    const ALL: [Selection; 2] = [Selection::Left, Selection::Right];

    fn position(self) -> usize {
        match self {
            Selection::Left => 0,
            Selection::Right => 1,
        }
    }

    fn from_position(position: usize) -> Self {
        Self::ALL[position % Self::ALL.len()]
    }

    pub fn moved_left(self) -> Self {
        Self::from_position(self.position() + Self::ALL.len() - 1)
    }

    pub fn moved_right(self) -> Self {
        Self::from_position(self.position() + 1)
    }

    pub fn label(self) -> &'static str {
        OPTION_LABELS[self.position()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmKey {
    Left,
    Right,
    Enter,
    Interrupt,
    Ignored,
}

impl ConfirmKey {
    pub fn from_key_event(key: &KeyEvent) -> Self {
        if key.kind != KeyEventKind::Press {
            return ConfirmKey::Ignored;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                ConfirmKey::Interrupt
            }
            KeyCode::Left | KeyCode::Up => ConfirmKey::Left,
            KeyCode::Right | KeyCode::Down => ConfirmKey::Right,
            KeyCode::Enter => ConfirmKey::Enter,
            _ => ConfirmKey::Ignored,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmTransition {
    Redraw,
    Unchanged,
    Resolved(bool),
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmState {
    selected: Selection,
}

impl Default for ConfirmState {
    fn default() -> Self {
        Self {
            selected: Selection::Left,
        }
    }
}

impl ConfirmState {
    pub fn selected(&self) -> Selection {
        self.selected
    }

    pub fn apply(&mut self, key: ConfirmKey) -> ConfirmTransition {
        match key {
            ConfirmKey::Left => {
                self.selected = self.selected.moved_left();
                ConfirmTransition::Redraw
            }
            ConfirmKey::Right => {
                self.selected = self.selected.moved_right();
                ConfirmTransition::Redraw
            }
            ConfirmKey::Enter => ConfirmTransition::Resolved(self.selected == Selection::Left),
            ConfirmKey::Interrupt => ConfirmTransition::Interrupted,
            ConfirmKey::Ignored => ConfirmTransition::Unchanged,
        }
    }

    pub fn render(&self, message: &str) -> String {
        let display = Selection::ALL
            .iter()
            .map(|option| {
                if *option == self.selected {
                    format!("[{}]", option.label())
                } else {
                    format!(" {} ", option.label())
                }
            })
            .collect::<Vec<_>>()
            .join("  ");
        format!("\r{message} {display}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberAnswer {
    pub value: u32,
    pub used_default: bool,
}

/// Accepts positive whole numbers (`"200"`, `" 200 "`, `"2e2"`); anything else
/// yields `default`.
pub fn parse_number_answer(answer: &str, default: u32) -> NumberAnswer {
    let parsed = answer
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value > 0.0 && value.fract() == 0.0)
        .filter(|value| *value <= f64::from(u32::MAX));
    match parsed {
        Some(value) => NumberAnswer {
            value: value as u32,
            used_default: false,
        },
        None => NumberAnswer {
            value: default,
            used_default: true,
        },
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TerminalPrompter {
    interactive: bool,
}

impl TerminalPrompter {
    pub fn detect() -> Self {
        Self {
            interactive: io::stdin().is_terminal(),
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }
}

impl Prompter for TerminalPrompter {
    fn confirm<W: Write>(&mut self, out: &mut ProgressRenderer<W>, message: &str) -> Result<bool> {
        if !self.interactive {
            return Ok(true);
        }

        let mut state = ConfirmState::default();
        let raw_mode = RawModeGuard::enable()?;

        write!(out, "{}", state.render(message))?;
        out.flush()?;

        let accepted = loop {
            let Event::Key(key) = event::read().context("failed to read terminal input")? else {
                continue;
            };
            match state.apply(ConfirmKey::from_key_event(&key)) {
                ConfirmTransition::Redraw => {
                    write!(out, "{}", state.render(message))?;
                    out.flush()?;
                }
                ConfirmTransition::Unchanged => {}
                ConfirmTransition::Resolved(accepted) => break accepted,
                ConfirmTransition::Interrupted => {
                    drop(raw_mode);
                    let _ = writeln!(out);
                    std::process::exit(0);
                }
            }
        };

        drop(raw_mode);
        writeln!(out)?;
        Ok(accepted)
    }

    fn prompt_number<W: Write>(
        &mut self,
        out: &mut ProgressRenderer<W>,
        message: &str,
        default: u32,
    ) -> Result<u32> {
        if !self.interactive {
            return Ok(default);
        }

        write!(out, "{message}")?;
        out.flush()?;

        let mut answer = String::new();
        io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("failed to read answer from terminal")?;
        if answer.ends_with('\n') {
            out.record_echoed_line();
        }

        let parsed = parse_number_answer(&answer, default);
        if parsed.used_default {
            out.log_line(&format!("Invalid value. Using default: {default}"))?;
        }
        Ok(parsed.value)
    }
}

struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        terminal::enable_raw_mode().context("failed to switch terminal to raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}
