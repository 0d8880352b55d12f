//! Outbound SIP message formatting
//!
//! Builds responses and requests purely from strings: a start line, the
//! stored verbatim header lines each followed by CRLF, then either a
//! `Content-Length: 0` line or a verbatim body segment, and the
//! terminating blank line. Every message formatted here is stamped with
//! the server's `User-Agent`.

use std::fmt::Display;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::limits::{BRANCH_COOKIE, USER_AGENT};

/// Fluent writer for one outbound SIP message
pub struct MessageWriter {
    start_line: String,
    headers: Vec<String>,
    body: Option<String>,
}

impl MessageWriter {
    /// Start a response, `SIP/2.0 <code> <reason>`
    pub fn response(code: u16, reason: &str) -> Self {
        Self {
            start_line: format!("SIP/2.0 {} {}", code, reason),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Start a request, `<METHOD> <uri> SIP/2.0`
    pub fn request(method: &str, uri: &str) -> Self {
        Self {
            start_line: format!("{} {} SIP/2.0", method, uri),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Append a stored header line verbatim (already carries its name)
    pub fn line(mut self, header_line: &str) -> Self {
        self.headers.push(header_line.to_string());
        self
    }

    /// Append a stored header line when present
    pub fn line_opt(mut self, header_line: Option<&str>) -> Self {
        if let Some(line) = header_line {
            self.headers.push(line.to_string());
        }
        self
    }

    /// Append a freshly formatted `Name: value` header
    pub fn header(mut self, name: &str, value: impl Display) -> Self {
        self.headers.push(format!("{}: {}", name, value));
        self
    }

    /// Attach a verbatim body segment beginning at its `Content-Type:`
    /// line (the segment includes the blank separator line and the SDP)
    pub fn body_segment(mut self, segment: Option<&str>) -> Self {
        self.body = segment.map(String::from);
        self
    }

    /// Assemble the final on-wire message
    pub fn build(self) -> String {
        let mut out = String::with_capacity(512);
        out.push_str(&self.start_line);
        out.push_str("\r\n");
        for header in &self.headers {
            out.push_str(header);
            out.push_str("\r\n");
        }
        out.push_str("User-Agent: ");
        out.push_str(USER_AGENT);
        out.push_str("\r\n");
        match self.body {
            Some(segment) => out.push_str(&segment),
            None => out.push_str("Content-Length: 0\r\n\r\n"),
        }
        out
    }
}

/// Standard reason phrase for the status codes the server emits or
/// forwards; unknown codes get an empty phrase.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Trying",
        180 => "Ringing",
        183 => "Session Progress",
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        480 => "Temporarily Unavailable",
        486 => "Busy Here",
        487 => "Request Terminated",
        500 => "Server Internal Error",
        503 => "Service Unavailable",
        600 => "Busy Everywhere",
        603 => "Decline",
        _ => "",
    }
}

/// Freshly minted `Via:` line for a request this server originates
pub fn fresh_via(server_addr: SocketAddr) -> String {
    format!(
        "Via: SIP/2.0/UDP {};branch={}{:x}",
        server_addr,
        BRANCH_COOKIE,
        branch_timestamp()
    )
}

/// The server's own `Contact:` line
pub fn server_contact(server_addr: SocketAddr) -> String {
    format!("Contact: <sip:{}@{}>", USER_AGENT, server_addr)
}

fn branch_timestamp() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0)
}

/// Rewrite an inbound `Via:` line with the observed source address:
/// append `;received=<ip>`, and when the line carries an `rport`
/// parameter (with or without a value), replace it with
/// `rport=<source-port>` followed immediately by `received`, preserving
/// any parameters after the replaced token.
pub fn rewrite_via(via_line: &str, src: SocketAddr) -> String {
    if let Some(pos) = via_line.find(";rport") {
        let token_start = pos + 1;
        let after_token = &via_line[token_start + "rport".len()..];
        // Swallow an existing `=value` so the rewrite is idempotent in shape.
        let value_len = if let Some(rest) = after_token.strip_prefix('=') {
            1 + rest
                .char_indices()
                .find(|(_, c)| *c == ';' || c.is_whitespace())
                .map(|(i, _)| i)
                .unwrap_or(rest.len())
        } else {
            0
        };
        let suffix = &via_line[token_start + "rport".len() + value_len..];
        format!(
            "{}rport={};received={}{}",
            &via_line[..token_start],
            src.port(),
            src.ip(),
            suffix
        )
    } else {
        format!("{};received={}", via_line, src.ip())
    }
}
