//! REGISTER handling
//!
//! Resolves the username from the `From:` URI, updates the location
//! record's transport address, and answers `200 OK` (echoing the Contact
//! with `;expires=7200`) or `404 Not Found`. No credential check is
//! performed; the password/realm fields exist for future digest
//! authentication.

use std::net::SocketAddr;

use tracing::{info, warn};

use crate::builder::{reason_phrase, server_contact, MessageWriter};
use crate::lexer::{username_from_uri, LexedMessage};
use crate::limits::REGISTER_EXPIRES;
use crate::location::LocationTable;
use crate::transport::Outgoing;

/// Process one REGISTER request, returning the response to emit
pub fn process(
    table: &LocationTable,
    msg: &LexedMessage<'_>,
    src: SocketAddr,
    server_addr: SocketAddr,
) -> Vec<Outgoing> {
    let username = match msg.from_line().and_then(username_from_uri) {
        Some(name) => name,
        None => {
            warn!(%src, "REGISTER without resolvable From username, dropping");
            return Vec::new();
        }
    };

    match table.register(username, src) {
        Some(entry) => {
            info!(user = %entry.username, %src, "registered");
            let mut writer = MessageWriter::response(200, reason_phrase(200))
                .line_opt(msg.via_line())
                .line_opt(msg.from_line())
                .line_opt(msg.to_line())
                .line_opt(msg.call_id_line())
                .line_opt(msg.cseq_line());
            if let Some(contact) = msg.contact_line() {
                writer = writer.line(&format!("{};expires={}", contact, REGISTER_EXPIRES));
            }
            vec![Outgoing::new(writer.build(), src)]
        }
        None => {
            info!(user = %username, %src, "REGISTER for unknown user");
            let writer = MessageWriter::response(404, reason_phrase(404))
                .line_opt(msg.via_line())
                .line_opt(msg.from_line())
                .line_opt(msg.to_line())
                .line_opt(msg.call_id_line())
                .line_opt(msg.cseq_line())
                .line(&server_contact(server_addr));
            vec![Outgoing::new(writer.build(), src)]
        }
    }
}
