use super::*;
use serde_json::json;
use std::time::Duration;
use storage::Storage;

fn datagram(value: Value) -> Vec<u8> {
    serde_json::to_vec(&value).expect("encode")
}

#[test]
fn advertisement_becomes_up() {
    let parsed = parse_datagram(&datagram(json!({
        "event": "up",
        "data": { "advertisement": {
            "uuid": "a1",
            "name": "users",
            "hosts": ["192.168.1.20"],
            "port": 8000,
            "proto": "http"
        } }
    })))
    .expect("parse")
    .expect("announcement");

    let Announcement::Advertisement(drosse) = parsed else {
        panic!("expected an advertisement, got {parsed:?}");
    };
    assert_eq!(drosse.uuid, DrosseId::from("a1"));
    assert_eq!(drosse.port, 8000);
    assert_eq!(drosse.name.as_deref(), Some("users"));
}

#[test]
fn lifecycle_and_traffic_events_are_decoded() {
    assert_eq!(
        parse_datagram(&datagram(json!({ "event": "down", "data": { "uuid": "a1" } })))
            .expect("parse"),
        Some(Announcement::Event(DrosseEvent::Down {
            uuid: DrosseId::from("a1")
        }))
    );

    assert_eq!(
        parse_datagram(&datagram(json!({
            "event": "log",
            "data": { "uuid": "a1", "msg": "listening" }
        })))
        .expect("parse"),
        Some(Announcement::Event(DrosseEvent::Log {
            uuid: DrosseId::from("a1"),
            msg: json!("listening"),
        }))
    );

    assert_eq!(
        parse_datagram(&datagram(json!({
            "event": "request",
            "data": { "uuid": "a1", "method": "GET", "url": "/api/users" }
        })))
        .expect("parse"),
        Some(Announcement::Event(DrosseEvent::Request {
            request: TrafficRequest {
                method: "GET".to_string(),
                url: "/api/users".to_string(),
                uuid: DrosseId::from("a1"),
            }
        }))
    );
}

#[test]
fn empty_advertisement_falls_back_to_event_name() {
    let parsed = parse_datagram(&datagram(json!({
        "event": "down",
        "data": { "advertisement": {}, "uuid": "a1" }
    })))
    .expect("parse");
    assert!(matches!(
        parsed,
        Some(Announcement::Event(DrosseEvent::Down { .. }))
    ));
}

#[test]
fn unknown_events_are_ignored() {
    let parsed = parse_datagram(&datagram(json!({ "event": "restart", "data": {} })))
        .expect("parse");
    assert_eq!(parsed, None);
}

#[test]
fn malformed_datagrams_are_rejected() {
    assert!(parse_datagram(b"not json").is_err());
    assert!(parse_datagram(&datagram(json!({ "data": { "uuid": "a1" } }))).is_err());
    assert!(parse_datagram(&datagram(json!({ "event": "down", "data": {} }))).is_err());
    assert!(parse_datagram(&datagram(json!({ "event": "down", "data": { "uuid": " " } }))).is_err());
}

#[tokio::test]
async fn datagrams_reach_the_event_stream() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let api = ApiContext { storage };
    let (events, mut rx) = broadcast::channel(8);

    let socket = bind("127.0.0.1:0").await.expect("bind");
    let addr = socket.local_addr().expect("addr");
    let listener = tokio::spawn(listen(socket, api, events));

    let sender = UdpSocket::bind("127.0.0.1:0").await.expect("sender");
    sender.send_to(b"garbage", addr).await.expect("send");
    sender
        .send_to(
            &datagram(json!({
                "event": "up",
                "data": { "advertisement": { "uuid": "a1", "hosts": ["127.0.0.1"], "port": 8000 } }
            })),
            addr,
        )
        .await
        .expect("send");

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event in time")
        .expect("event");
    let DrosseEvent::Up { drosse } = event else {
        panic!("expected up, got {event:?}");
    };
    assert!(drosse.up);
    assert!(drosse.last_seen.is_some());

    listener.abort();
}

#[tokio::test]
async fn discovery_port_can_be_shared() {
    let first = bind("127.0.0.1:0").await.expect("first bind");
    let addr = first.local_addr().expect("addr").to_string();

    let second = bind(&addr).await.expect("second bind on a shared port");
    assert_eq!(second.local_addr().expect("addr").to_string(), addr);
}

#[tokio::test]
async fn discovery_address_must_be_a_socket_address() {
    let err = bind("not-an-address").await.expect_err("must fail");
    assert!(err.to_string().contains("invalid discovery address"));
}
