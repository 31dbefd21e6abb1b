//! Control protocol framing.
//!
//! Requests are single lines:
//!
//! ```text
//! vm slot_add_nio_binding "r1" 1 0 udp-vm1-1-0
//! ```
//!
//! Replies are zero or more continuation lines followed by one final line,
//! each starting with a three digit status code:
//!
//! ```text
//! 100-r1 is running
//! 100 OK
//! ```
//!
//! Codes 100-199 are success, everything else is an error.

use thiserror::Error;

/// Errors talking to the emulator.
#[derive(Debug, Error)]
pub enum ControlProtocolError {
    #[error("control connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("control exchange timed out: {0}")]
    Timeout(String),

    #[error("control connection closed")]
    Disconnected,

    #[error("emulator rejected command ({code}): {message}")]
    Rejected { code: u16, message: String },

    #[error("malformed reply line: {0:?}")]
    Malformed(String),
}

/// A complete reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Code of the final line.
    pub code: u16,
    /// Text of every line, continuation lines first.
    pub lines: Vec<String>,
}

impl Reply {
    /// Text of the final line.
    pub fn message(&self) -> &str {
        self.lines.last().map(String::as_str).unwrap_or_default()
    }
}

/// One parsed reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReplyLine {
    Continuation(u16, String),
    Final(u16, String),
}

pub(crate) fn is_success(code: u16) -> bool {
    (100..=199).contains(&code)
}

/// Parse one reply line (without the trailing newline).
pub(crate) fn parse_line(line: &str) -> Result<ReplyLine, ControlProtocolError> {
    let malformed = || ControlProtocolError::Malformed(line.to_string());

    let code = line.get(..3).ok_or_else(malformed)?;
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let code: u16 = code.parse().map_err(|_| malformed())?;

    match line.as_bytes().get(3) {
        None => Ok(ReplyLine::Final(code, String::new())),
        Some(b' ') => Ok(ReplyLine::Final(code, line[4..].to_string())),
        Some(b'-') => Ok(ReplyLine::Continuation(code, line[4..].to_string())),
        Some(_) => Err(malformed()),
    }
}

/// Quote an argument if it would otherwise split.
pub(crate) fn quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains(|c: char| c.is_whitespace() || c == '"') {
        return arg.to_string();
    }
    format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Render a request line, newline included.
pub(crate) fn request_line(module: &str, command: &str, args: &[String]) -> String {
    let mut line = format!("{} {}", module, command);
    for arg in args {
        line.push(' ');
        line.push_str(&quote(arg));
    }
    line.push('\n');
    line
}
