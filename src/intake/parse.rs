//! Extraction of the fields we store from a raw RFC 5322 message.

use chrono::{DateTime, Utc};
use mail_parser::{Address, MessageParser};

use crate::store::DEFAULT_SUBJECT;
use crate::{DispomailError, Result};

/// The parts of an inbound message that intake cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    /// Sender address, or the display name when the From header has no
    /// address part.
    pub sender: String,
    /// Sender display name.
    pub sender_name: Option<String>,
    /// Subject, defaulting to "No Subject".
    pub subject: String,
    /// HTML body; plain text is converted, no body gives "".
    pub content: String,
    /// Addresses from the `To` header.
    pub to: Vec<String>,
    /// `Date` header, if present and after the epoch.
    pub date: Option<DateTime<Utc>>,
}

/// Parse a raw message.
///
/// Fails only when the input has no recognizable header block.
pub fn parse_message(raw: &[u8]) -> Result<ParsedMessage> {
    let message = MessageParser::default()
        .parse(raw)
        .filter(|m| !m.headers().is_empty())
        .ok_or_else(|| DispomailError::Parse("not an RFC 5322 message".to_string()))?;

    let from = message.from().and_then(Address::first);
    let sender_name = from
        .and_then(|a| a.name())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);
    let sender = from
        .and_then(|a| a.address())
        .map(str::to_string)
        .or_else(|| sender_name.clone())
        .unwrap_or_default();

    let subject = message
        .subject()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SUBJECT)
        .to_string();

    let content = message
        .body_html(0)
        .map(|body| body.into_owned())
        .unwrap_or_default();

    let to = message
        .to()
        .map(|list| {
            list.iter()
                .filter_map(|a| a.address())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let date = message
        .date()
        .map(|d| d.to_timestamp())
        .filter(|ts| *ts > 0)
        .and_then(|ts| DateTime::from_timestamp(ts, 0));

    Ok(ParsedMessage {
        sender,
        sender_name,
        subject,
        content,
        to,
        date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML_MESSAGE: &str = "From: Alice Example <alice@example.org>\r\n\
To: Box <box@mail.test>, other@mail.test\r\n\
Subject: Hello there\r\n\
Date: Tue, 14 Nov 2023 22:13:20 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain\r\n\
\r\n\
plain body\r\n\
--b1\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>html body</p>\r\n\
--b1--\r\n";

    #[test]
    fn test_parse_full_message() {
        let parsed = parse_message(HTML_MESSAGE.as_bytes()).unwrap();
        assert_eq!(parsed.sender, "alice@example.org");
        assert_eq!(parsed.sender_name.as_deref(), Some("Alice Example"));
        assert_eq!(parsed.subject, "Hello there");
        assert!(parsed.content.contains("<p>html body</p>"));
        assert_eq!(parsed.to, vec!["box@mail.test", "other@mail.test"]);
        assert_eq!(
            parsed.date.map(|d| d.timestamp_millis()),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn test_plain_text_becomes_html() {
        let raw = "From: bob@example.org\r\nTo: box@mail.test\r\n\r\nline one\r\n";
        let parsed = parse_message(raw.as_bytes()).unwrap();
        assert!(parsed.content.contains("line one"));
        assert_eq!(parsed.sender_name, None);
    }

    #[test]
    fn test_missing_subject_and_date() {
        let raw = "From: bob@example.org\r\nTo: box@mail.test\r\n\r\nbody\r\n";
        let parsed = parse_message(raw.as_bytes()).unwrap();
        assert_eq!(parsed.subject, DEFAULT_SUBJECT);
        assert_eq!(parsed.date, None);
    }

    #[test]
    fn test_no_to_header() {
        let raw = "From: bob@example.org\r\nSubject: x\r\n\r\nbody\r\n";
        let parsed = parse_message(raw.as_bytes()).unwrap();
        assert!(parsed.to.is_empty());
    }

    #[test]
    fn test_empty_input_is_parse_error() {
        assert!(matches!(parse_message(b""), Err(DispomailError::Parse(_))));
    }
}
