//! SMTP wire replies.
//!
//! Each ingestion phase produces a tagged outcome; this module turns those
//! outcomes into deterministic reply codes. Permanent failures (5xx) tell
//! the sending MTA not to retry; transient failures (4xx) invite a retry
//! once the operational problem clears.

use uuid::Uuid;

use crate::error::DevinboxError;

/// A reply to be written to the SMTP client.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    code: u16,
    text: String,
    /// Extra lines for multiline replies (EHLO capabilities).
    extensions: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
            extensions: Vec::new(),
        }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    // ── Positive replies ────────────────────────────────────────

    pub fn greeting(hostname: &str) -> Self {
        Self::new(220, format!("{hostname} devinbox ESMTP service ready"))
    }

    pub fn helo(hostname: &str, client: &str) -> Self {
        Self::new(250, format!("{hostname} Hello {client}"))
    }

    /// EHLO reply advertising the accepted message size.
    pub fn ehlo(hostname: &str, client: &str, max_message_bytes: usize) -> Self {
        Self {
            code: 250,
            text: format!("{hostname} Hello {client}"),
            extensions: vec!["8BITMIME".to_string(), format!("SIZE {max_message_bytes}")],
        }
    }

    pub fn ok() -> Self {
        Self::new(250, "OK")
    }

    /// Final acceptance after a successful commit.
    pub fn delivered(message_id: Uuid) -> Self {
        Self::new(250, format!("OK id={message_id}"))
    }

    pub fn data_start() -> Self {
        Self::new(354, "End data with <CR><LF>.<CR><LF>")
    }

    pub fn quit() -> Self {
        Self::new(221, "Bye")
    }

    // ── Negative replies ────────────────────────────────────────

    pub fn unrecognized() -> Self {
        Self::new(500, "Syntax error, command unrecognized")
    }

    pub fn syntax(text: &str) -> Self {
        Self::new(501, format!("Syntax error: {text}"))
    }

    pub fn bad_sequence(text: &str) -> Self {
        Self::new(503, format!("Bad sequence of commands: {text}"))
    }

    pub fn too_many_recipients(max: usize) -> Self {
        Self::new(452, format!("Too many recipients (max {max})"))
    }

    pub fn too_large(max: usize) -> Self {
        Self::new(552, format!("Message exceeds maximum size ({max} bytes)"))
    }

    pub fn line_too_long() -> Self {
        Self::new(500, "Line too long")
    }

    pub fn idle_timeout() -> Self {
        Self::new(421, "Idle timeout, closing connection")
    }

    /// Map a failed ingestion phase to its reply.
    pub fn rejected(error: &DevinboxError) -> Self {
        if error.is_transient() {
            return Self::new(451, "Local error in processing, try again later");
        }
        match error {
            DevinboxError::InvalidDomain(_) => Self::new(550, "Invalid recipient domain"),
            DevinboxError::UnknownProject(_) => Self::new(550, "Project not found"),
            DevinboxError::MalformedMessage(_) => Self::new(550, "Message rejected: unparsable content"),
            _ => Self::new(550, "Requested action not taken"),
        }
    }

    /// Format for the wire, CRLF-terminated. Multiline replies use the
    /// `250-`/`250 ` continuation convention.
    pub fn format(&self) -> String {
        if self.extensions.is_empty() {
            return format!("{} {}\r\n", self.code, self.text);
        }

        let mut out = format!("{}-{}\r\n", self.code, self.text);
        for (i, ext) in self.extensions.iter().enumerate() {
            if i == self.extensions.len() - 1 {
                out.push_str(&format!("{} {ext}\r\n", self.code));
            } else {
                out.push_str(&format!("{}-{ext}\r\n", self.code));
            }
        }
        out
    }
}
