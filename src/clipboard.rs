use std::io::{self, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub trait Clipboard {
    fn write_text(&mut self, text: &str) -> io::Result<()>;
}

/// Sets the system clipboard through the terminal using the OSC 52
/// escape sequence. Works over SSH as long as the terminal allows it.
pub struct Osc52Clipboard<W> {
    out: W,
}

impl Osc52Clipboard<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> Osc52Clipboard<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Clipboard for Osc52Clipboard<W> {
    fn write_text(&mut self, text: &str) -> io::Result<()> {
        write!(self.out, "\x1b]52;c;{}\x07", STANDARD.encode(text))?;
        self.out.flush()
    }
}
