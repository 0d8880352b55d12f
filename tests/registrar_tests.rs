//! REGISTER handling against the seeded location table

use std::sync::Arc;

use tinysip::{CaptureSender, Engine, Outbound, Outgoing};

/// Convert Unix line endings to SIP-compliant CRLF
fn to_sip_message(msg: &str) -> String {
    msg.replace('\n', "\r\n")
}

fn new_engine() -> (Engine, Arc<CaptureSender>) {
    let sender = Arc::new(CaptureSender::new());
    let engine = Engine::new(
        "192.168.1.1:5060".parse().unwrap(),
        sender.clone() as Arc<dyn Outbound>,
    );
    (engine, sender)
}

async fn feed(
    engine: &Engine,
    sender: &CaptureSender,
    raw: &str,
    src: &str,
) -> Vec<Outgoing> {
    engine
        .handle_datagram(to_sip_message(raw).as_bytes(), src.parse().unwrap())
        .await;
    sender.take()
}

const REGISTER_UNKNOWN: &str = "REGISTER sip:example.com SIP/2.0
Via: SIP/2.0/UDP 10.0.0.9:5070;branch=z9hG4bK-r-9
Max-Forwards: 70
From: <sip:9999@example.com>;tag=r-tag-9
To: <sip:9999@example.com>
Call-ID: reg-9999@example.com
CSeq: 1 REGISTER
Contact: <sip:9999@10.0.0.9:5070>

";

const REGISTER_1001: &str = "REGISTER sip:example.com SIP/2.0
Via: SIP/2.0/UDP 10.0.0.5:5062;branch=z9hG4bK-r-1
Max-Forwards: 70
From: <sip:1001@example.com>;tag=r-tag-1
To: <sip:1001@example.com>
Call-ID: reg-1001@example.com
CSeq: 1 REGISTER
Contact: <sip:1001@10.0.0.5:5062>

";

#[tokio::test]
async fn test_register_unknown_user_gets_404() {
    let (engine, sender) = new_engine();

    let out = feed(&engine, &sender, REGISTER_UNKNOWN, "10.0.0.9:5070").await;
    assert_eq!(out.len(), 1);

    let response = &out[0];
    assert_eq!(response.dest, "10.0.0.9:5070".parse().unwrap());
    assert!(response.payload.starts_with("SIP/2.0 404 Not Found\r\n"));
    assert!(response
        .payload
        .contains("Via: SIP/2.0/UDP 10.0.0.9:5070;branch=z9hG4bK-r-9"));
    assert!(response.payload.contains("From: <sip:9999@example.com>;tag=r-tag-9"));
    assert!(response.payload.contains("To: <sip:9999@example.com>"));
    assert!(response.payload.contains("Call-ID: reg-9999@example.com"));
    assert!(response.payload.contains("CSeq: 1 REGISTER"));
    assert!(response.payload.ends_with("Content-Length: 0\r\n\r\n"));
}

#[tokio::test]
async fn test_register_known_user_updates_location() {
    let (engine, sender) = new_engine();

    let out = feed(&engine, &sender, REGISTER_1001, "10.0.0.5:5062").await;
    assert_eq!(out.len(), 1);

    let response = &out[0];
    assert!(response.payload.starts_with("SIP/2.0 200 OK\r\n"));
    assert!(response
        .payload
        .contains("Contact: <sip:1001@10.0.0.5:5062>;expires=7200"));
    assert!(response.payload.contains("Call-ID: reg-1001@example.com"));
    assert!(response.payload.ends_with("Content-Length: 0\r\n\r\n"));

    let entry = engine.locations().find("1001").unwrap();
    assert_eq!(entry.addr(), "10.0.0.5:5062".parse().unwrap());
    assert!(entry.registered);
}

#[tokio::test]
async fn test_repeated_register_is_idempotent() {
    let (engine, sender) = new_engine();

    feed(&engine, &sender, REGISTER_1001, "10.0.0.5:5062").await;
    let first = engine.locations().find("1001").unwrap();

    feed(&engine, &sender, REGISTER_1001, "10.0.0.5:5062").await;
    let second = engine.locations().find("1001").unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_register_steers_subsequent_invite() {
    let (engine, sender) = new_engine();

    // 1002 re-registers from a new address; an INVITE for it must go
    // there instead of the seeded default.
    let register_1002 = REGISTER_1001
        .replace("1001", "1002")
        .replace("10.0.0.5:5062", "172.16.0.20:5064");
    feed(&engine, &sender, &register_1002, "172.16.0.20:5064").await;

    let invite = "INVITE sip:1002@example.com SIP/2.0
Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK-a-1
Max-Forwards: 70
From: \"1001\" <sip:1001@example.com>;tag=a-tag-1
To: <sip:1002@example.com>
Call-ID: steer-001@example.com
CSeq: 5 INVITE
Contact: <sip:1001@10.0.0.1:5060>

";
    let out = feed(&engine, &sender, invite, "10.0.0.1:5060").await;
    assert_eq!(out.len(), 2);
    assert_eq!(out[1].dest, "172.16.0.20:5064".parse().unwrap());
    assert!(out[1]
        .payload
        .starts_with("INVITE sip:1002@172.16.0.20:5064 SIP/2.0\r\n"));
}
