//! MIME message parsing: envelope fields, bodies, headers, attachment payloads.

use std::collections::BTreeMap;

use mail_parser::{MessageParser, MimeHeaders, PartType};

use crate::error::{DevinboxError, Result};

/// A fully parsed inbound email, decoded and buffered.
///
/// `subject`, `body_text` and `body_html` are `None` when the message had
/// no such part. No body is synthesized from the other representation: an
/// HTML-only message has `body_text == None`, and vice versa.
#[derive(Debug, Clone)]
pub struct ParsedEmail {
    /// Sender as written in the From header (`"Name <addr>"` or bare
    /// address), if the header was present.
    pub from: Option<String>,
    /// Recipient addresses flattened from all To-header address groups.
    ///
    /// May be empty; envelope routing does not depend on this header.
    pub to: Vec<String>,
    pub subject: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    /// Raw header name → value, first occurrence wins.
    pub headers: BTreeMap<String, String>,
    pub attachments: Vec<AttachmentPart>,
}

/// One decoded attachment part.
#[derive(Debug, Clone)]
pub struct AttachmentPart {
    /// Filename from the part headers; generated when missing.
    pub filename: String,
    /// Declared content type, `application/octet-stream` when missing.
    pub content_type: String,
    /// Decoded payload.
    pub data: Vec<u8>,
}

/// Parse a complete raw message (headers + body).
///
/// The caller must hand over the entire DATA stream; partial payloads are
/// not valid input. Fails with [`DevinboxError::MalformedMessage`] when the
/// bytes cannot be interpreted as a MIME message.
pub fn parse_message(raw: &[u8]) -> Result<ParsedEmail> {
    if raw.trim_ascii().is_empty() {
        return Err(DevinboxError::MalformedMessage("empty payload".into()));
    }

    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| DevinboxError::MalformedMessage(format!("{} bytes of unparsable MIME", raw.len())))?;

    let from = message
        .from()
        .and_then(|addr| addr.first())
        .map(format_sender);

    let to = message
        .to()
        .map(|addr| {
            addr.iter()
                .filter_map(|a| a.address().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let subject = message.subject().map(str::to_string);

    // mail-parser synthesizes the missing representation on demand (an
    // HTML-only message gets a text rendering and vice versa). Absence must
    // round-trip as absence, so only genuine parts are taken.
    let body_text = message
        .text_body
        .first()
        .and_then(|&id| message.parts.get(id))
        .and_then(|part| match &part.body {
            PartType::Text(text) => Some(text.to_string()),
            _ => None,
        });

    let body_html = message
        .html_body
        .first()
        .and_then(|&id| message.parts.get(id))
        .and_then(|part| match &part.body {
            PartType::Html(html) => Some(html.to_string()),
            _ => None,
        });

    let mut headers = BTreeMap::new();
    for header in message.headers() {
        let name = header.name();
        if let Some(value) = message.header_raw(name) {
            headers
                .entry(name.to_string())
                .or_insert_with(|| value.trim().to_string());
        }
    }

    let attachments = collect_attachments(&message);

    Ok(ParsedEmail {
        from,
        to,
        subject,
        body_text,
        body_html,
        headers,
        attachments,
    })
}

/// Format a sender as `"Name <addr>"`, or the bare address without a
/// display name.
fn format_sender(addr: &mail_parser::Addr<'_>) -> String {
    let address = addr.address().unwrap_or_default();
    match addr.name() {
        Some(name) if !name.is_empty() => format!("{name} <{address}>"),
        _ => address.to_string(),
    }
}

/// Decode attachment parts with their payloads.
fn collect_attachments(message: &mail_parser::Message<'_>) -> Vec<AttachmentPart> {
    let mut result = Vec::new();

    for (idx, part) in message.attachments().enumerate() {
        let filename = part
            .attachment_name()
            .map(String::from)
            .unwrap_or_else(|| format!("attachment_{idx}"));

        let content_type = part
            .content_type()
            .map(|ct| {
                let main = ct.ctype();
                match ct.subtype() {
                    Some(sub) => format!("{main}/{sub}"),
                    None => main.to_string(),
                }
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());

        result.push(AttachmentPart {
            filename,
            content_type,
            data: part.contents().to_vec(),
        });
    }

    result
}
