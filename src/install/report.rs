//! Operator-facing transcript.
//!
//! Colored step/ok/warn/fail lines on a `termcolor` stream, plus a tally of
//! advisory failures so the caller can apply the configured
//! [`FailurePolicy`](crate::config::FailurePolicy).

use std::io::Write;

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

pub struct Reporter<W: WriteColor> {
    out: W,
    soft_failures: Vec<String>,
}

impl Reporter<StandardStream> {
    pub fn stdout() -> Self {
        Self::new(StandardStream::stdout(ColorChoice::Auto))
    }
}

impl<W: WriteColor> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            soft_failures: Vec::new(),
        }
    }

    /// Section header, e.g. "Configuring firewall"
    pub fn header(&mut self, msg: &str) {
        self.colored(Color::Cyan, true, &format!("\n==> {msg}"));
    }

    pub fn ok(&mut self, msg: &str) {
        self.colored(Color::Green, false, &format!("  ✓ {msg}"));
    }

    pub fn info(&mut self, msg: &str) {
        let _ = writeln!(self.out, "    {msg}");
    }

    /// Operator hint that is not itself a failure
    pub fn hint(&mut self, msg: &str) {
        self.colored(Color::Blue, false, &format!("  → {msg}"));
    }

    /// Advisory problem; counted against the failure policy
    pub fn warn(&mut self, msg: &str) {
        log::debug!("soft failure: {msg}");
        self.colored(Color::Yellow, false, &format!("  ⚠ {msg}"));
        self.soft_failures.push(msg.to_string());
    }

    /// Failed check that still does not abort the run; counted
    pub fn fail(&mut self, msg: &str) {
        log::debug!("soft failure: {msg}");
        self.colored(Color::Red, false, &format!("  ✗ {msg}"));
        self.soft_failures.push(msg.to_string());
    }

    pub fn soft_failures(&self) -> &[String] {
        &self.soft_failures
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn colored(&mut self, color: Color, bold: bool, line: &str) {
        let _ = self
            .out
            .set_color(ColorSpec::new().set_fg(Some(color)).set_bold(bold));
        let _ = writeln!(self.out, "{line}");
        let _ = self.out.reset();
    }
}

#[cfg(test)]
pub(crate) fn buffer() -> Reporter<termcolor::NoColor<Vec<u8>>> {
    Reporter::new(termcolor::NoColor::new(Vec::new()))
}

#[cfg(test)]
pub(crate) fn text(reporter: Reporter<termcolor::NoColor<Vec<u8>>>) -> String {
    String::from_utf8(reporter.into_inner().into_inner()).expect("utf8 transcript")
}
