//! Raw REPL program output framing
//!
//! After a program runs the device prints `stdout \x04 stderr \x04 >`.
//! Plain raw mode prefixes that with `OK` once the program is accepted.

use serde::Serialize;

const END_OF_OUTPUT: char = '\x04';

/// Output of one program
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    /// Standard output
    pub stdout: String,
    /// Error output (a traceback when the program raised)
    pub stderr: String,
}

impl ExecOutput {
    /// Check if the program reported an error
    pub fn is_error(&self) -> bool {
        !self.stderr.is_empty()
    }
}

/// Accumulates session text until a program's output is complete
#[derive(Debug, Default)]
pub struct RawOutputParser {
    expect_ok: bool,
    buffer: String,
}

impl RawOutputParser {
    /// `expect_ok` strips the plain raw mode `OK` preamble
    pub fn new(expect_ok: bool) -> Self {
        Self {
            expect_ok,
            buffer: String::new(),
        }
    }

    /// Switch `OK` preamble stripping; applies to text already fed too
    pub fn set_expect_ok(&mut self, expect_ok: bool) {
        self.expect_ok = expect_ok;
    }

    /// Add session text
    pub fn feed(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    /// Check if both output sections and the prompt have arrived
    pub fn is_complete(&self) -> bool {
        self.parse().is_some()
    }

    /// Everything received so far, split as far as the markers allow
    pub fn output(&self) -> ExecOutput {
        if let Some(output) = self.parse() {
            return output;
        }
        let body = self.body();
        match body.split_once(END_OF_OUTPUT) {
            Some((stdout, stderr)) => ExecOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
            None => ExecOutput {
                stdout: body.to_string(),
                stderr: String::new(),
            },
        }
    }

    /// Forget everything fed so far
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    fn body(&self) -> &str {
        if self.expect_ok {
            self.buffer.strip_prefix("OK").unwrap_or(&self.buffer)
        } else {
            &self.buffer
        }
    }

    fn parse(&self) -> Option<ExecOutput> {
        let (stdout, rest) = self.body().split_once(END_OF_OUTPUT)?;
        let (stderr, rest) = rest.split_once(END_OF_OUTPUT)?;
        rest.starts_with(super::RAW_PROMPT).then(|| ExecOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_mode_output() {
        let mut parser = RawOutputParser::new(true);
        parser.feed("OK1\r\n");
        assert!(!parser.is_complete());
        parser.feed("\x04\x04");
        assert!(!parser.is_complete());
        parser.feed(">");
        assert!(parser.is_complete());
        assert_eq!(parser.output().stdout, "1\r\n");
        assert!(!parser.output().is_error());
    }

    #[test]
    fn test_traceback_goes_to_stderr() {
        let mut parser = RawOutputParser::new(false);
        parser.feed("\x04Traceback (most recent call last):\r\nNameError\r\n\x04>");
        let output = parser.output();
        assert!(output.stdout.is_empty());
        assert!(output.is_error());
        assert!(output.stderr.starts_with("Traceback"));
    }

    #[test]
    fn test_raw_paste_output_keeps_leading_ok() {
        let mut parser = RawOutputParser::new(false);
        parser.feed("OK\r\n\x04\x04>");
        assert_eq!(parser.output().stdout, "OK\r\n");
    }

    #[test]
    fn test_preamble_mode_set_after_feeding() {
        let mut parser = RawOutputParser::default();
        parser.feed("OKdone\r\n\x04\x04>");
        assert!(parser.is_complete());
        parser.set_expect_ok(true);
        assert_eq!(parser.output().stdout, "done\r\n");
    }

    #[test]
    fn test_partial_output() {
        let mut parser = RawOutputParser::new(true);
        parser.feed("OKpartial");
        assert_eq!(parser.output().stdout, "partial");
        parser.reset();
        assert!(parser.output().stdout.is_empty());
    }
}
