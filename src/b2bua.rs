//! B2BUA call state machine and signaling engine
//!
//! Each bridged call is driven through a shared finite-state machine fed
//! by events from either dialog. The engine synthesizes outbound
//! requests and responses for the opposite leg from the header lines
//! captured when the dialog was set up, preserves dialog identifiers
//! across directions, and reclaims the call slot once both sides have
//! quiesced. Transitions for one call run under that call's slot lock;
//! the computed datagrams are sent after the lock is dropped.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::builder::{fresh_via, reason_phrase, rewrite_via, server_contact, MessageWriter};
use crate::call::{derive_b_leg_uuid, Call, CallMap};
use crate::lexer::{callee_from_to, LexedMessage};
use crate::limits::{DEFAULT_MAX_FORWARDS, MAX_CALLS};
use crate::location::LocationTable;
use crate::registrar;
use crate::transport::{Outbound, Outgoing};
use crate::types::{CallState, Leg, MessageKind, Method};

/// The signaling engine: call map, location table, global CSeq counter,
/// and the outbound transport
pub struct Engine {
    calls: CallMap,
    locations: LocationTable,
    cseq: AtomicU32,
    server_addr: SocketAddr,
    transport: Arc<dyn Outbound>,
}

impl Engine {
    /// Engine with the embedded roster and default call capacity
    pub fn new(server_addr: SocketAddr, transport: Arc<dyn Outbound>) -> Self {
        Self::with_roster(server_addr, transport, LocationTable::new(), MAX_CALLS)
    }

    /// Engine with an explicit roster and call capacity
    pub fn with_roster(
        server_addr: SocketAddr,
        transport: Arc<dyn Outbound>,
        locations: LocationTable,
        capacity: usize,
    ) -> Self {
        Self {
            calls: CallMap::new(capacity),
            locations,
            cseq: AtomicU32::new(1),
            server_addr,
            transport,
        }
    }

    pub fn calls(&self) -> &CallMap {
        &self.calls
    }

    pub fn locations(&self) -> &LocationTable {
        &self.locations
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Lex one inbound datagram, run it through the state machine, and
    /// emit whatever the transition produced. Every failure is local to
    /// the message.
    pub async fn handle_datagram(&self, payload: &[u8], src: SocketAddr) {
        let text = match std::str::from_utf8(payload) {
            Ok(text) => text,
            Err(_) => {
                debug!(%src, "non-UTF-8 datagram dropped");
                return;
            }
        };
        let msg = match LexedMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(%src, error = %e, "unparseable datagram dropped");
                return;
            }
        };
        info!(
            %src,
            kind = ?msg.kind,
            call_id = msg.call_id().unwrap_or("-"),
            "received"
        );

        for out in self.dispatch(&msg, src) {
            info!(
                dest = %out.dest,
                line = out.payload.lines().next().unwrap_or(""),
                "emit"
            );
            if let Err(e) = self.transport.send(&out.payload, out.dest).await {
                warn!(dest = %out.dest, error = %e, "send failed");
            }
        }
    }

    /// Route a lexed message: REGISTER to the registrar, everything else
    /// through Call-ID lookup into the state machine. Only an INVITE may
    /// start a new dialog; every other lookup miss is dropped.
    pub fn dispatch(&self, msg: &LexedMessage<'_>, src: SocketAddr) -> Vec<Outgoing> {
        if let MessageKind::Request(Method::REGISTER) = &msg.kind {
            return registrar::process(&self.locations, msg, src, self.server_addr);
        }

        let call_id = match msg.call_id() {
            Some(id) => id,
            None => {
                debug!(%src, "message without Call-ID dropped");
                return Vec::new();
            }
        };

        match self.calls.find_by_callid(call_id) {
            Some((slot, leg)) => {
                let mut call = slot.lock().unwrap();
                self.transition(&mut call, leg, msg)
            }
            None => match &msg.kind {
                MessageKind::Request(Method::INVITE) => self.initial_invite(msg, src),
                _ => {
                    info!(call_id, "unexpected message, may already be released");
                    Vec::new()
                }
            },
        }
    }

    /// Initial INVITE: allocate a slot, capture the A-leg, resolve the
    /// callee, answer `100 Trying`, and originate the B-leg INVITE.
    fn initial_invite(&self, msg: &LexedMessage<'_>, src: SocketAddr) -> Vec<Outgoing> {
        let (call_id, via, from, to, cseq) = match (
            msg.call_id(),
            msg.via_line(),
            msg.from_line(),
            msg.to_line(),
            msg.cseq_line(),
        ) {
            (Some(call_id), Some(via), Some(from), Some(to), Some(cseq)) => {
                (call_id, via, from, to, cseq)
            }
            _ => {
                warn!(%src, "INVITE missing dialog headers, dropping");
                return Vec::new();
            }
        };

        let rewritten_via = rewrite_via(via, src);

        let slot = match self.calls.allocate() {
            Some(slot) => slot,
            None => {
                warn!(call_id, "call map full, rejecting INVITE");
                let response = MessageWriter::response(500, reason_phrase(500))
                    .line(&rewritten_via)
                    .line(from)
                    .line(to)
                    .line_opt(msg.call_id_line())
                    .line(cseq)
                    .line(&server_contact(self.server_addr))
                    .build();
                return vec![Outgoing::new(response, src)];
            }
        };
        let mut call = slot.lock().unwrap();

        call.a_leg_uuid = call_id.to_string();
        call.b_leg_uuid = derive_b_leg_uuid(call_id);
        call.a_leg_addr = Some(src);
        call.a_leg_headers.via = rewritten_via;
        call.a_leg_headers.from = from.to_string();
        call.a_leg_headers.to = to.to_string();
        call.a_leg_headers.cseq = cseq.to_string();
        call.a_leg_contact = msg.contact_uri().unwrap_or("").to_string();
        call.caller = msg
            .from_line()
            .and_then(crate::lexer::username_from_uri)
            .unwrap_or("")
            .to_string();

        let callee = match callee_from_to(to) {
            Some(name) => name.to_string(),
            None => {
                warn!(call_id, "INVITE To URI has no callee, rejecting");
                let out = self.reject_invite(&mut call, 404);
                return out;
            }
        };
        let entry = match self.locations.find(&callee) {
            Some(entry) => entry,
            None => {
                info!(call_id, callee = %callee, "callee unknown, rejecting");
                let out = self.reject_invite(&mut call, 404);
                return out;
            }
        };
        call.callee = callee;
        call.b_leg_addr = Some(entry.addr());

        call.a_leg_media.remote_media = true;
        call.b_leg_media.local_media = true;

        let mut outgoing = Vec::with_capacity(2);

        let trying = MessageWriter::response(100, reason_phrase(100))
            .line(&call.a_leg_headers.via)
            .line(&call.a_leg_headers.from)
            .line(&call.a_leg_headers.to)
            .header("Call-ID", &call.a_leg_uuid)
            .line(&call.a_leg_headers.cseq)
            .line(&server_contact(self.server_addr))
            .build();
        outgoing.push(Outgoing::new(trying, src));

        let b_addr = entry.addr();
        let b_via = fresh_via(self.server_addr);
        let b_cseq = format!("CSeq: {} INVITE", self.next_cseq());
        let b_to = format!(
            "To: <sip:{}@{}:{};ob>",
            call.callee,
            entry.ip,
            entry.port
        );
        call.b_leg_headers.via = b_via;
        call.b_leg_headers.cseq = b_cseq;
        call.b_leg_headers.to = b_to;
        call.b_leg_headers.from = call.a_leg_headers.from.clone();

        let request_uri = format!("sip:{}@{}:{}", call.callee, entry.ip, entry.port);
        let invite = MessageWriter::request("INVITE", &request_uri)
            .line(&call.b_leg_headers.via)
            .line(&call.b_leg_headers.from)
            .line(&call.b_leg_headers.to)
            .header("Call-ID", &call.b_leg_uuid)
            .line(&call.b_leg_headers.cseq)
            .header("Max-Forwards", decrement(msg.max_forwards))
            .line(&server_contact(self.server_addr))
            .body_segment(msg.body_segment())
            .build();
        outgoing.push(Outgoing::new(invite, b_addr));

        call.state = CallState::Routing;
        info!(call_id = %call.a_leg_uuid, caller = %call.caller, callee = %call.callee, "routing");
        outgoing
    }

    /// Reject an initial INVITE after the slot was claimed: answer the
    /// caller from the captured A-leg headers and release the slot.
    fn reject_invite(&self, call: &mut Call, code: u16) -> Vec<Outgoing> {
        let response = MessageWriter::response(code, reason_phrase(code))
            .line(&call.a_leg_headers.via)
            .line(&call.a_leg_headers.from)
            .line(&call.a_leg_headers.to)
            .header("Call-ID", &call.a_leg_uuid)
            .line(&call.a_leg_headers.cseq)
            .line(&server_contact(self.server_addr))
            .build();
        let dest = call.a_leg_addr.expect("A-leg address set before rejection");
        self.calls.release(call);
        vec![Outgoing::new(response, dest)]
    }

    /// One state-machine transition for an established call record
    pub fn transition(&self, call: &mut Call, leg: Leg, msg: &LexedMessage<'_>) -> Vec<Outgoing> {
        match (call.state, leg, &msg.kind) {
            (CallState::Routing | CallState::Ringing, Leg::B, MessageKind::Status(code)) => {
                self.status_from_b(call, msg, *code)
            }
            (CallState::Routing | CallState::Ringing, Leg::A, MessageKind::Request(Method::CANCEL)) => {
                self.cancel_from_a(call, msg)
            }
            (CallState::Answered, Leg::A, MessageKind::Request(Method::ACK)) => {
                self.ack_from_a(call, msg)
            }
            (CallState::Answered, Leg::A, MessageKind::Request(Method::CANCEL)) => {
                // TODO: release both legs properly on late CANCEL.
                warn!(call_id = %call.a_leg_uuid, "CANCEL in Answered not handled");
                Vec::new()
            }
            (CallState::Answered, Leg::B, MessageKind::Request(Method::BYE)) => {
                // TODO: release both legs properly on early BYE.
                warn!(call_id = %call.a_leg_uuid, "BYE from callee in Answered not handled");
                Vec::new()
            }
            (CallState::Connected, sender, MessageKind::Request(Method::BYE)) => {
                self.bye_from(call, sender, msg)
            }
            (CallState::Disconnecting, _, MessageKind::Status(200)) => {
                let closes_dialog = msg
                    .cseq_line()
                    .map(|line| line.contains("BYE") || line.contains("CANCEL"))
                    .unwrap_or(false);
                if closes_dialog {
                    info!(call_id = %call.a_leg_uuid, "dialog closed, releasing slot");
                    self.calls.release(call);
                } else {
                    warn!(call_id = %call.a_leg_uuid, "200 without BYE/CANCEL CSeq in Disconnecting");
                }
                Vec::new()
            }
            (state, leg, kind) => {
                warn!(
                    call_id = %call.a_leg_uuid,
                    %state,
                    %leg,
                    kind = ?kind,
                    "unexpected event for call state"
                );
                Vec::new()
            }
        }
    }

    /// Response on the B-leg while the call is being set up
    fn status_from_b(&self, call: &mut Call, msg: &LexedMessage<'_>, code: u16) -> Vec<Outgoing> {
        match code {
            183 => self.forward_to_a(call, msg, 183),
            180 => {
                let out = self.forward_to_a(call, msg, 180);
                call.state = CallState::Ringing;
                out
            }
            200..=299 => {
                if let Some(contact) = msg.contact_uri() {
                    call.b_leg_contact = contact.to_string();
                }
                let out = self.forward_to_a(call, msg, code);
                call.state = CallState::Answered;
                out
            }
            400..=699 => self.fail_from_b(call, msg, code),
            100..=199 => {
                debug!(call_id = %call.a_leg_uuid, code, "provisional response dropped");
                Vec::new()
            }
            _ => {
                warn!(call_id = %call.a_leg_uuid, code, "unexpected status from callee");
                Vec::new()
            }
        }
    }

    /// Forward a B-leg response to the caller, echoing the stored A-leg
    /// headers and carrying the body verbatim when one is present
    fn forward_to_a(&self, call: &mut Call, msg: &LexedMessage<'_>, code: u16) -> Vec<Outgoing> {
        if msg.has_sdp {
            call.a_leg_media.local_media = true;
            call.b_leg_media.remote_media = true;
        }
        let response = MessageWriter::response(code, reason_phrase(code))
            .line(&call.a_leg_headers.via)
            .line(&call.a_leg_headers.from)
            .line(&call.a_leg_headers.to)
            .header("Call-ID", &call.a_leg_uuid)
            .line(&call.a_leg_headers.cseq)
            .body_segment(msg.body_segment())
            .build();
        let dest = call.a_leg_addr.expect("A-leg address set at INVITE");
        vec![Outgoing::new(response, dest)]
    }

    /// Failure on the B-leg: ACK it, propagate the code to the caller,
    /// release the slot
    fn fail_from_b(&self, call: &mut Call, msg: &LexedMessage<'_>, code: u16) -> Vec<Outgoing> {
        let b_addr = call.b_leg_addr.expect("B-leg address set at INVITE");
        let ack_cseq = msg
            .cseq_number
            .or_else(|| call.b_leg_headers.cseq_number())
            .unwrap_or(1);
        let ack = MessageWriter::request("ACK", &format!("sip:{}@{}", call.callee, b_addr))
            .line(&call.b_leg_headers.via)
            .line(&call.b_leg_headers.from)
            .line(&call.b_leg_headers.to)
            .header("Call-ID", &call.b_leg_uuid)
            .header("CSeq", format!("{} ACK", ack_cseq))
            .header("Max-Forwards", DEFAULT_MAX_FORWARDS)
            .line(&server_contact(self.server_addr))
            .build();

        let mut outgoing = vec![Outgoing::new(ack, b_addr)];
        outgoing.extend(self.reject_invite(call, code));
        outgoing
    }

    /// CANCEL from the caller while the B-leg is still being set up
    fn cancel_from_a(&self, call: &mut Call, msg: &LexedMessage<'_>) -> Vec<Outgoing> {
        let a_addr = call.a_leg_addr.expect("A-leg address set at INVITE");
        let b_addr = call.b_leg_addr.expect("B-leg address set at INVITE");
        let mut outgoing = Vec::with_capacity(3);

        // Answer the CANCEL itself with the headers it arrived with.
        let cancel_ok = MessageWriter::response(200, reason_phrase(200))
            .line_opt(msg.via_line())
            .line_opt(msg.from_line())
            .line_opt(msg.to_line())
            .line_opt(msg.call_id_line())
            .line_opt(msg.cseq_line())
            .line(&server_contact(self.server_addr))
            .build();
        outgoing.push(Outgoing::new(cancel_ok, a_addr));

        // Terminate the pending INVITE transaction toward the caller.
        let terminated = MessageWriter::response(487, reason_phrase(487))
            .line(&call.a_leg_headers.via)
            .line(&call.a_leg_headers.from)
            .line(&call.a_leg_headers.to)
            .header("Call-ID", &call.a_leg_uuid)
            .line(&call.a_leg_headers.cseq)
            .line(&server_contact(self.server_addr))
            .build();
        outgoing.push(Outgoing::new(terminated, a_addr));

        let cancel_cseq = call.b_leg_headers.cseq_number().unwrap_or(1);
        let cancel = MessageWriter::request("CANCEL", &format!("sip:{}@{}", call.callee, b_addr))
            .line(&call.b_leg_headers.via)
            .line(&call.b_leg_headers.from)
            .line(&call.b_leg_headers.to)
            .header("Call-ID", &call.b_leg_uuid)
            .header("CSeq", format!("{} CANCEL", cancel_cseq))
            .header("Max-Forwards", decrement(msg.max_forwards))
            .line(&server_contact(self.server_addr))
            .build();
        outgoing.push(Outgoing::new(cancel, b_addr));

        call.state = CallState::Disconnecting;
        outgoing
    }

    /// ACK from the caller completing the answered call
    fn ack_from_a(&self, call: &mut Call, msg: &LexedMessage<'_>) -> Vec<Outgoing> {
        let b_addr = call.b_leg_addr.expect("B-leg address set at INVITE");
        let request_uri = if call.b_leg_contact.is_empty() {
            format!("sip:{}@{}", call.callee, b_addr)
        } else {
            call.b_leg_contact.clone()
        };
        let ack_cseq = call.b_leg_headers.cseq_number().unwrap_or(1);
        let ack = MessageWriter::request("ACK", &request_uri)
            .line(&fresh_via(self.server_addr))
            .line(&call.b_leg_headers.from)
            .line(&call.b_leg_headers.to)
            .header("Call-ID", &call.b_leg_uuid)
            .header("CSeq", format!("{} ACK", ack_cseq))
            .header("Max-Forwards", decrement(msg.max_forwards))
            .line(&server_contact(self.server_addr))
            .build();

        call.state = CallState::Connected;
        info!(call_id = %call.a_leg_uuid, "connected");
        vec![Outgoing::new(ack, b_addr)]
    }

    /// BYE from either side of an established call
    fn bye_from(&self, call: &mut Call, sender: Leg, msg: &LexedMessage<'_>) -> Vec<Outgoing> {
        let sender_addr = call.addr(sender).expect("leg addresses set at INVITE");
        let mut outgoing = Vec::with_capacity(2);

        let bye_ok = MessageWriter::response(200, reason_phrase(200))
            .line_opt(msg.via_line())
            .line_opt(msg.from_line())
            .line_opt(msg.to_line())
            .line_opt(msg.call_id_line())
            .line_opt(msg.cseq_line())
            .line(&server_contact(self.server_addr))
            .build();
        outgoing.push(Outgoing::new(bye_ok, sender_addr));

        let other = sender.other();
        let other_addr = call.addr(other).expect("leg addresses set at INVITE");
        let bye = match other {
            Leg::B => MessageWriter::request("BYE", &format!("sip:{}@{}", call.callee, other_addr))
                .line(&fresh_via(self.server_addr))
                .line(&call.b_leg_headers.from)
                .line(&call.b_leg_headers.to)
                .header("Call-ID", &call.b_leg_uuid)
                .header("CSeq", format!("{} BYE", self.next_cseq()))
                .header("Max-Forwards", decrement(msg.max_forwards))
                .line(&server_contact(self.server_addr))
                .build(),
            // Toward the caller the dialog direction flips: the stored
            // To becomes From and vice versa, tags included.
            Leg::A => MessageWriter::request("BYE", &call.a_leg_contact)
                .line(&fresh_via(self.server_addr))
                .line(&swap_header_name(&call.a_leg_headers.to, "From"))
                .line(&swap_header_name(&call.a_leg_headers.from, "To"))
                .header("Call-ID", &call.a_leg_uuid)
                .header("CSeq", format!("{} BYE", self.next_cseq()))
                .header("Max-Forwards", decrement(msg.max_forwards))
                .line(&server_contact(self.server_addr))
                .build(),
        };
        outgoing.push(Outgoing::new(bye, other_addr));

        call.state = CallState::Disconnecting;
        info!(call_id = %call.a_leg_uuid, from_leg = %sender, "tearing down");
        outgoing
    }

    fn next_cseq(&self) -> u32 {
        self.cseq.fetch_add(1, Ordering::SeqCst)
    }
}

/// Decrement Max-Forwards once before forwarding, clamped at zero
fn decrement(max_forwards: u32) -> u32 {
    max_forwards.saturating_sub(1)
}

/// Re-tag a stored header line with the opposite header name, keeping
/// the value (display name, URI, and tag) verbatim
fn swap_header_name(line: &str, new_name: &str) -> String {
    match line.split_once(':') {
        Some((_, value)) => format!("{}:{}", new_name, value),
        None => format!("{}: {}", new_name, line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CaptureSender;

    fn to_sip_message(msg: &str) -> String {
        msg.replace('\n', "\r\n")
    }

    fn engine() -> (Engine, Arc<CaptureSender>) {
        let sender = Arc::new(CaptureSender::new());
        let engine = Engine::new(
            "192.168.1.1:5060".parse().unwrap(),
            sender.clone() as Arc<dyn Outbound>,
        );
        (engine, sender)
    }

    #[test]
    fn test_swap_header_name() {
        assert_eq!(
            swap_header_name("To: <sip:1002@example.com>;tag=b99", "From"),
            "From: <sip:1002@example.com>;tag=b99"
        );
        assert_eq!(
            swap_header_name("From: \"1001\" <sip:1001@example.com>;tag=a1", "To"),
            "To: \"1001\" <sip:1001@example.com>;tag=a1"
        );
    }

    #[test]
    fn test_non_invite_miss_is_dropped() {
        let (engine, _) = engine();
        let raw = to_sip_message(
            "BYE sip:1002@example.com SIP/2.0\n\
Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK1\n\
From: <sip:1001@example.com>;tag=a\n\
To: <sip:1002@example.com>;tag=b\n\
Call-ID: nobody-home\n\
CSeq: 2 BYE\n\
\n",
        );
        let msg = LexedMessage::parse(&raw).unwrap();
        let out = engine.dispatch(&msg, "10.0.0.1:5060".parse().unwrap());
        assert!(out.is_empty());
        assert_eq!(engine.calls().active_count(), 0);
    }

    #[test]
    fn test_invite_for_unknown_callee_rejects_and_releases() {
        let (engine, _) = engine();
        let raw = to_sip_message(
            "INVITE sip:7777@example.com SIP/2.0\n\
Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK1\n\
From: <sip:1001@example.com>;tag=a\n\
To: <sip:7777@example.com>\n\
Call-ID: no-such-callee\n\
CSeq: 1 INVITE\n\
Max-Forwards: 70\n\
\n",
        );
        let msg = LexedMessage::parse(&raw).unwrap();
        let out = engine.dispatch(&msg, "10.0.0.1:5060".parse().unwrap());

        assert_eq!(out.len(), 1);
        assert!(out[0].payload.starts_with("SIP/2.0 404 Not Found\r\n"));
        assert_eq!(engine.calls().active_count(), 0);
        assert!(engine.calls().find_by_callid("no-such-callee").is_none());
    }
}
