use std::io::{self, Stdout, Write};

use crossterm::cursor::{MoveDown, MoveUp};
use crossterm::queue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineHandle {
    index: usize,
    width: usize,
}

impl LineHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

#[derive(Debug)]
pub struct ProgressRenderer<W: Write> {
    out: W,
    lines_emitted: usize,
}

impl ProgressRenderer<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ProgressRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            lines_emitted: 0,
        }
    }

    pub fn lines_emitted(&self) -> usize {
        self.lines_emitted
    }

    /// Emits `text` as a new line. The handle pads every later rewrite to the
    /// widest of `text` and `variants`.
    pub fn register_line(&mut self, text: &str, variants: &[&str]) -> io::Result<LineHandle> {
        let width = variants
            .iter()
            .map(|variant| variant.chars().count())
            .chain(std::iter::once(text.chars().count()))
            .max()
            .unwrap_or_default();
        let handle = LineHandle {
            index: self.lines_emitted,
            width,
        };
        self.lines_emitted += 1;
        writeln!(self.out, "{}", pad_line(text, width))?;
        self.out.flush()?;
        Ok(handle)
    }

    pub fn update_line(&mut self, handle: &LineHandle, text: &str) -> io::Result<()> {
        let distance = self.lines_emitted.saturating_sub(handle.index);
        let padded = pad_line(text, handle.width);
        if distance == 0 {
            write!(self.out, "\r{padded}\r")?;
            return self.out.flush();
        }

        let rows = u16::try_from(distance).unwrap_or(u16::MAX);
        queue!(self.out, MoveUp(rows))?;
        write!(self.out, "\r{padded}")?;
        queue!(self.out, MoveDown(rows))?;
        write!(self.out, "\r")?;
        self.out.flush()
    }

    /// Emits a status message that is never rewritten. Embedded newlines count.
    pub fn log_line(&mut self, text: &str) -> io::Result<()> {
        writeln!(self, "{text}")?;
        self.flush()
    }

    /// Counts a line break the terminal echoed for typed input.
    pub fn record_echoed_line(&mut self) {
        self.lines_emitted += 1;
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Write for ProgressRenderer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.out.write(buf)?;
        self.lines_emitted += buf[..written].iter().filter(|byte| **byte == b'\n').count();
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

fn pad_line(text: &str, width: usize) -> String {
    format!("{text:<width$}")
}
