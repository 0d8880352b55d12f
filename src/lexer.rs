//! SIP message lexer
//!
//! Extracts, by textual search over CRLF-delimited header lines, exactly
//! the fields the signaling engine consumes: the start line, `Call-ID`,
//! the verbatim `Via`/`From`/`To`/`CSeq`/`Contact` lines, the CSeq
//! number, `Max-Forwards`, and SDP detection. Header captures are kept as
//! ranges into the raw text; nothing is copied until a call record stores
//! the lines it needs.

use std::str::FromStr;

use crate::error::{SipError, SipResult};
use crate::limits::DEFAULT_MAX_FORWARDS;
use crate::types::{MessageKind, Method, TextRange};

/// A lexed SIP message borrowing the raw datagram text
#[derive(Debug, Clone)]
pub struct LexedMessage<'a> {
    raw: &'a str,

    /// Request method or response status code
    pub kind: MessageKind,

    /// Whether the message carries an `application/sdp` body
    pub has_sdp: bool,

    /// CSeq sequence number (first run of digits after `CSeq:`)
    pub cseq_number: Option<u32>,

    /// Max-Forwards value, defaulted when the header is absent
    pub max_forwards: u32,

    /// Byte offset of the `Content-Type:` line, for verbatim body
    /// forwarding from that position to the end of the message
    pub content_type_offset: Option<usize>,

    call_id: Option<TextRange>,
    via_line: Option<TextRange>,
    from_line: Option<TextRange>,
    to_line: Option<TextRange>,
    cseq_line: Option<TextRange>,
    call_id_line: Option<TextRange>,
    contact_line: Option<TextRange>,
}

impl<'a> LexedMessage<'a> {
    /// Lex a raw SIP message.
    ///
    /// Fails on an empty or unterminated start line; missing optional
    /// headers lex to `None`.
    pub fn parse(raw: &'a str) -> SipResult<Self> {
        let first_end = raw
            .find("\r\n")
            .ok_or_else(|| SipError::parse("message has no CRLF-terminated start line", None))?;
        let start_line = &raw[..first_end];
        if start_line.is_empty() {
            return Err(SipError::parse("empty start line", None));
        }

        let kind = parse_start_line(start_line)?;

        let mut msg = LexedMessage {
            raw,
            kind,
            has_sdp: false,
            cseq_number: None,
            max_forwards: DEFAULT_MAX_FORWARDS,
            content_type_offset: None,
            call_id: None,
            via_line: None,
            from_line: None,
            to_line: None,
            cseq_line: None,
            call_id_line: None,
            contact_line: None,
        };

        let mut cursor = first_end + 2;
        while cursor < raw.len() {
            let line_end = match raw[cursor..].find("\r\n") {
                Some(rel) => cursor + rel,
                None => break,
            };
            let line = &raw[cursor..line_end];
            if line.is_empty() {
                // Blank line: end of headers, body follows.
                break;
            }
            msg.lex_header_line(cursor, line);
            cursor = line_end + 2;
        }

        Ok(msg)
    }

    fn lex_header_line(&mut self, offset: usize, line: &str) {
        let range = TextRange::new(offset, offset + line.len());

        if header_value(line, "Via:").is_some() {
            if self.via_line.is_none() {
                self.via_line = Some(range);
            }
        } else if header_value(line, "From:").is_some() {
            if self.from_line.is_none() {
                self.from_line = Some(range);
            }
        } else if header_value(line, "To:").is_some() {
            if self.to_line.is_none() {
                self.to_line = Some(range);
            }
        } else if let Some(value) = header_value(line, "CSeq:") {
            if self.cseq_line.is_none() {
                self.cseq_line = Some(range);
                self.cseq_number = leading_digits(value.trim_start());
            }
        } else if let Some(value) = header_value(line, "Call-ID:") {
            if self.call_id_line.is_none() {
                self.call_id_line = Some(range);
                let trimmed = value.trim();
                let start = offset + (line.len() - value.len()) + (value.len() - value.trim_start().len());
                self.call_id = Some(TextRange::new(start, start + trimmed.len()));
            }
        } else if header_value(line, "Contact:").is_some() {
            if self.contact_line.is_none() {
                self.contact_line = Some(range);
            }
        } else if let Some(value) = header_value(line, "Max-Forwards:") {
            if let Some(n) = leading_digits(value.trim_start()) {
                self.max_forwards = n;
            }
        } else if let Some(value) = header_value(line, "Content-Type:") {
            if self.content_type_offset.is_none() {
                self.content_type_offset = Some(offset);
                let media_type = value.trim();
                if media_type.len() >= 15
                    && media_type.as_bytes()[..15].eq_ignore_ascii_case(b"application/sdp")
                {
                    self.has_sdp = true;
                }
            }
        }
    }

    /// The raw message text this lexed view borrows from
    pub fn raw(&self) -> &'a str {
        self.raw
    }

    /// Call-ID value, up to end of line
    pub fn call_id(&self) -> Option<&'a str> {
        self.call_id.map(|r| r.as_str(self.raw))
    }

    /// Verbatim `Via:` line without trailing CRLF
    pub fn via_line(&self) -> Option<&'a str> {
        self.via_line.map(|r| r.as_str(self.raw))
    }

    /// Verbatim `From:` line without trailing CRLF
    pub fn from_line(&self) -> Option<&'a str> {
        self.from_line.map(|r| r.as_str(self.raw))
    }

    /// Verbatim `To:` line without trailing CRLF
    pub fn to_line(&self) -> Option<&'a str> {
        self.to_line.map(|r| r.as_str(self.raw))
    }

    /// Verbatim `CSeq:` line without trailing CRLF
    pub fn cseq_line(&self) -> Option<&'a str> {
        self.cseq_line.map(|r| r.as_str(self.raw))
    }

    /// Verbatim `Call-ID:` line without trailing CRLF
    pub fn call_id_line(&self) -> Option<&'a str> {
        self.call_id_line.map(|r| r.as_str(self.raw))
    }

    /// Verbatim `Contact:` line without trailing CRLF
    pub fn contact_line(&self) -> Option<&'a str> {
        self.contact_line.map(|r| r.as_str(self.raw))
    }

    /// Contact URI extracted from between `<` and `>`
    pub fn contact_uri(&self) -> Option<&'a str> {
        let line = self.contact_line()?;
        angle_bracket_uri(line)
    }

    /// Everything from the `Content-Type:` line to the end of the
    /// message, verbatim. `None` when the message carries no body.
    pub fn body_segment(&self) -> Option<&'a str> {
        self.content_type_offset.map(|off| &self.raw[off..])
    }
}

fn parse_start_line(line: &str) -> SipResult<MessageKind> {
    if let Some(rest) = line.strip_prefix("SIP/2.0 ") {
        let code = leading_digits(rest)
            .ok_or_else(|| SipError::parse("status line has no numeric code", Some(line.to_string())))?;
        if !(100..700).contains(&code) {
            return Err(SipError::parse("status code out of range", Some(line.to_string())));
        }
        return Ok(MessageKind::Status(code as u16));
    }

    let method_token = line
        .split_whitespace()
        .next()
        .ok_or_else(|| SipError::parse("request line has no method", None))?;
    // EnumString with a default variant never fails.
    let method = Method::from_str(method_token)
        .unwrap_or_else(|_| Method::Unknown(method_token.to_string()));
    Ok(MessageKind::Request(method))
}

/// Case-insensitive header-name prefix match; returns the value part
/// after the colon on a hit.
fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    if line.len() >= name.len() && line.as_bytes()[..name.len()].eq_ignore_ascii_case(name.as_bytes()) {
        Some(&line[name.len()..])
    } else {
        None
    }
}

/// First run of ASCII digits at the start of the text
fn leading_digits(text: &str) -> Option<u32> {
    let digits: &str = {
        let end = text
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(text.len());
        &text[..end]
    };
    digits.parse().ok()
}

/// Extract the URI between `<` and `>` from a header line
pub fn angle_bracket_uri(line: &str) -> Option<&str> {
    let open = line.find('<')?;
    let close = line[open + 1..].find('>')?;
    Some(&line[open + 1..open + 1 + close])
}

/// Username from a `From:` line URI, between `sip:` and `@`
pub fn username_from_uri(line: &str) -> Option<&str> {
    let start = line.find("sip:")? + 4;
    let rest = &line[start..];
    let at = rest.find('@')?;
    Some(&rest[..at])
}

/// Callee username from a `To:` line: strip the `sip:`/`tel:` prefix,
/// stop at `@` or whitespace.
pub fn callee_from_to(line: &str) -> Option<&str> {
    let start = if let Some(pos) = line.find("sip:") {
        pos + 4
    } else if let Some(pos) = line.find("tel:") {
        pos + 4
    } else {
        return None;
    };
    let rest = &line[start..];
    let end = rest
        .char_indices()
        .find(|(_, c)| *c == '@' || c.is_whitespace())
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    if end == 0 {
        None
    } else {
        Some(&rest[..end])
    }
}
