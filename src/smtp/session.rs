//! Per-connection SMTP session state.
//!
//! The session is a pure state machine: the listener feeds it parsed
//! commands and resolved projects, and it tracks where the transaction
//! stands. All I/O lives in [`super::server`].

use tracing::warn;

use crate::model::Project;

/// Maximum recipients accepted per transaction.
pub(crate) const MAX_RECIPIENTS: usize = 100;

/// Maximum accepted command line length, including CRLF.
pub(crate) const MAX_COMMAND_LINE: usize = 512;

/// Where a connection stands between commands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum SessionState {
    /// Connected, no HELO yet.
    Connected,
    /// HELO/EHLO received; ready for MAIL FROM.
    Greeted,
    /// MAIL FROM received; ready for RCPT TO.
    MailFrom,
    /// At least one recipient accepted; ready for DATA or more RCPT.
    RcptTo,
}

/// A parsed client command.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    Helo(String),
    Ehlo(String),
    Mail(String),
    Rcpt(String),
    Data,
    Rset,
    Noop,
    Quit,
    Unknown,
}

impl Command {
    /// Parse one CRLF-stripped command line.
    pub(crate) fn parse(line: &str) -> Self {
        let upper = line.to_ascii_uppercase();

        if let Some(rest) = upper.strip_prefix("HELO") {
            return Self::Helo(argument(line, "HELO".len(), rest));
        }
        if let Some(rest) = upper.strip_prefix("EHLO") {
            return Self::Ehlo(argument(line, "EHLO".len(), rest));
        }
        if upper.starts_with("MAIL FROM:") {
            return Self::Mail(extract_path(&line["MAIL FROM:".len()..]));
        }
        if upper.starts_with("RCPT TO:") {
            return Self::Rcpt(extract_path(&line["RCPT TO:".len()..]));
        }

        match upper.trim() {
            "DATA" => Self::Data,
            "RSET" => Self::Rset,
            "NOOP" => Self::Noop,
            "QUIT" => Self::Quit,
            _ => Self::Unknown,
        }
    }
}

/// The argument after a verb, or empty when missing.
fn argument(line: &str, verb_len: usize, rest_upper: &str) -> String {
    // Reject "HELOx" style run-ons; the verb must stand alone.
    if !rest_upper.is_empty() && !rest_upper.starts_with(' ') {
        return String::new();
    }
    line[verb_len..].trim().to_string()
}

/// Extract the address from a forward/reverse path, dropping angle
/// brackets and any ESMTP parameters after the path.
fn extract_path(rest: &str) -> String {
    rest.trim()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_matches(['<', '>'])
        .to_string()
}

/// State and transaction data for one connection.
#[derive(Debug, Default)]
pub(crate) struct Session {
    state: SessionState,
    client_domain: Option<String>,
    mail_from: Option<String>,
    recipients: Vec<String>,
    /// Project resolved from the first accepted recipient; the whole
    /// transaction delivers to it.
    project: Option<Project>,
}

/// A completed envelope, ready for DATA collection and delivery.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub from: String,
    pub recipients: Vec<String>,
    pub project: Project,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Connected
    }
}

impl Session {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn can_mail(&self) -> bool {
        self.state == SessionState::Greeted
    }

    pub(crate) fn can_rcpt(&self) -> bool {
        matches!(self.state, SessionState::MailFrom | SessionState::RcptTo)
    }

    pub(crate) fn can_data(&self) -> bool {
        self.state == SessionState::RcptTo
    }

    pub(crate) fn recipient_count(&self) -> usize {
        self.recipients.len()
    }

    /// HELO/EHLO: remember the client and clear any open transaction.
    pub(crate) fn greet(&mut self, domain: String) {
        self.client_domain = Some(domain);
        self.reset();
    }

    /// MAIL FROM: begin a transaction. An empty reverse-path (bounces) is
    /// valid.
    pub(crate) fn set_sender(&mut self, sender: String) {
        self.mail_from = Some(sender);
        self.recipients.clear();
        self.project = None;
        self.state = SessionState::MailFrom;
    }

    /// Record an accepted recipient and its resolved project.
    ///
    /// The first accepted recipient's project owns the transaction; later
    /// recipients resolving elsewhere are accepted but only logged.
    pub(crate) fn add_recipient(&mut self, recipient: String, project: Project) {
        match &self.project {
            None => self.project = Some(project),
            Some(owner) if owner.id != project.id => {
                warn!(
                    recipient = %recipient,
                    delivering_to = %owner.slug,
                    also_resolved = %project.slug,
                    "recipients span multiple projects; delivering to the first"
                );
            }
            Some(_) => {}
        }
        self.recipients.push(recipient);
        self.state = SessionState::RcptTo;
    }

    /// Hand over the completed envelope for DATA collection and return the
    /// session to the post-greeting state.
    pub(crate) fn take_envelope(&mut self) -> Option<Envelope> {
        if !self.can_data() {
            return None;
        }
        let envelope = Envelope {
            from: self.mail_from.take().unwrap_or_default(),
            recipients: std::mem::take(&mut self.recipients),
            project: self.project.take()?,
        };
        self.reset();
        Some(envelope)
    }

    /// Clear transaction state, keeping the HELO greeting.
    pub(crate) fn reset(&mut self) {
        self.mail_from = None;
        self.recipients.clear();
        self.project = None;
        self.state = if self.client_domain.is_some() {
            SessionState::Greeted
        } else {
            SessionState::Connected
        };
    }
}
