//! Integration tests for the Colloquy server, handler, and full session flow.

use std::time::Duration;

use colloquy::prelude::*;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

const PIN: &str = "AB12-CD34";

/// Starts a server on a random port and returns its address and registry.
async fn start_server() -> (String, SessionRegistry) {
    let timings = RoomTimings::default()
        .with_start_grace(Duration::from_millis(50))
        .with_turn_delay(Duration::ZERO);
    let server = ColloquyServerBuilder::new()
        .bind("127.0.0.1:0")
        .timings(timings)
        .build()
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();
    let registry = server.registry().clone();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    (addr, registry)
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

async fn send(ws: &mut ClientWs, envelope: Value) {
    ws.send(Message::Text(envelope.to_string().into()))
        .await
        .expect("send");
}

/// Next server event, or `None` once the server closed the socket.
async fn recv(ws: &mut ClientWs) -> Option<ServerEvent> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for the server")?;
        match msg {
            Ok(Message::Text(text)) => {
                return Some(serde_json::from_str(text.as_str()).expect("decode event"));
            }
            Ok(Message::Binary(data)) => {
                return Some(serde_json::from_slice(&data).expect("decode event"));
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

/// Skips events until one matches.
async fn recv_until(ws: &mut ClientWs, pred: impl Fn(&ServerEvent) -> bool) -> ServerEvent {
    while let Some(event) = recv(ws).await {
        if pred(&event) {
            return event;
        }
    }
    panic!("socket closed before the expected event");
}

fn settings() -> Value {
    json!({
        "checkpointInterval": 10,
        "setup": {
            "speakers": [
                {"name": "model-a", "provider": "openai", "modelId": "gpt-4o"},
                {"name": "model-b", "provider": "anthropic", "modelId": "claude"}
            ],
            "instructions": "Debate the motion.",
            "opening": "Tabs or spaces?"
        }
    })
}

/// Opens a room as host 1 and consumes the creation replies.
async fn create_as_host(addr: &str) -> ClientWs {
    let mut host = connect(addr).await;
    send(
        &mut host,
        json!({
            "type": "create_session",
            "pin": PIN,
            "hostId": 1,
            "hostName": "Hal",
            "settings": settings()
        }),
    )
    .await;
    let created = recv(&mut host).await.unwrap();
    assert_eq!(
        created,
        ServerEvent::SessionCreated {
            pin: SessionPin::new(PIN),
            host_id: ParticipantId(1),
        }
    );
    recv_until(&mut host, |e| matches!(e, ServerEvent::Joined { .. })).await;
    host
}

async fn join(addr: &str, id: u64, name: &str) -> ClientWs {
    let mut ws = connect(addr).await;
    send(
        &mut ws,
        json!({"type": "join_session", "pin": PIN, "participantId": id, "participantName": name}),
    )
    .await;
    recv_until(&mut ws, |e| matches!(e, ServerEvent::Joined { .. })).await;
    ws
}

async fn turn(ws: &mut ClientWs, sender: &str, content: &str) {
    send(
        ws,
        json!({"type": "turn_update", "pin": PIN, "message": {"sender": sender, "content": content}}),
    )
    .await;
}

fn speaker(n: usize) -> &'static str {
    if n % 2 == 0 { "model-a" } else { "model-b" }
}

fn error_code(event: &ServerEvent) -> Option<u16> {
    match event {
        ServerEvent::Error { code, .. } => Some(*code),
        _ => None,
    }
}

// =========================================================================
// Connection handling
// =========================================================================

#[tokio::test]
async fn test_heartbeat_response() {
    let (addr, _) = start_server().await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"type": "heartbeat", "clientTime": 12345})).await;
    match recv(&mut ws).await {
        Some(ServerEvent::HeartbeatAck { client_time, server_time }) => {
            assert_eq!(client_time, 12345);
            assert!(server_time > 0);
        }
        other => panic!("expected heartbeat_ack, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_frames_dropped_connection_kept() {
    let (addr, _) = start_server().await;
    let mut ws = connect(&addr).await;

    ws.send(Message::Text("{not json".into())).await.unwrap();
    send(&mut ws, json!({"type": "dance", "pin": PIN})).await;
    send(&mut ws, json!({"type": "join_session", "pin": 7})).await;
    send(&mut ws, json!({"type": "heartbeat", "clientTime": 1})).await;

    let reply = recv(&mut ws).await;
    assert!(
        matches!(reply, Some(ServerEvent::HeartbeatAck { client_time: 1, .. })),
        "bad frames produce no reply, got {reply:?}"
    );
}

#[tokio::test]
async fn test_stalled_handshake_other_clients_still_served() {
    let (addr, _) = start_server().await;

    // Connects over TCP but never sends the upgrade request.
    let _silent = tokio::net::TcpStream::connect(&addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut ws = tokio::time::timeout(Duration::from_secs(3), connect(&addr))
        .await
        .expect("second client must not wait behind the silent one");
    send(&mut ws, json!({"type": "heartbeat", "clientTime": 1})).await;
    assert!(matches!(
        recv(&mut ws).await,
        Some(ServerEvent::HeartbeatAck { client_time: 1, .. })
    ));
}

#[tokio::test]
async fn test_stalled_handshake_dropped_after_timeout() {
    use tokio::io::AsyncReadExt;

    let server = ColloquyServerBuilder::new()
        .bind("127.0.0.1:0")
        .handshake_timeout(Duration::from_millis(100))
        .build()
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    let mut silent = tokio::net::TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(2), silent.read(&mut buf))
        .await
        .expect("server should drop the socket");
    assert!(matches!(read, Ok(0) | Err(_)));
}

// =========================================================================
// Errors go only to the sender
// =========================================================================

#[tokio::test]
async fn test_join_unknown_pin_not_found() {
    let (addr, _) = start_server().await;
    let mut ws = connect(&addr).await;

    send(
        &mut ws,
        json!({"type": "join_session", "pin": "ZZZZ-9999", "participantId": 2, "participantName": "Bea"}),
    )
    .await;
    let reply = recv(&mut ws).await.unwrap();
    assert_eq!(error_code(&reply), Some(404));
}

#[tokio::test]
async fn test_create_duplicate_pin_conflict() {
    let (addr, _) = start_server().await;
    let _host = create_as_host(&addr).await;

    let mut other = connect(&addr).await;
    send(
        &mut other,
        json!({"type": "create_session", "pin": PIN, "hostId": 9, "hostName": "Eve", "settings": settings()}),
    )
    .await;
    let reply = recv(&mut other).await.unwrap();
    assert_eq!(error_code(&reply), Some(409));
}

#[tokio::test]
async fn test_create_without_pin_generates_one() {
    let (addr, registry) = start_server().await;
    let mut host = connect(&addr).await;
    send(
        &mut host,
        json!({"type": "create_session", "hostId": 1, "hostName": "Hal", "settings": settings()}),
    )
    .await;

    let Some(ServerEvent::SessionCreated { pin, .. }) = recv(&mut host).await else {
        panic!("expected session_created");
    };
    assert_eq!(pin.as_str().len(), 9);
    assert!(registry.get(&pin).await.is_some());
}

#[tokio::test]
async fn test_begin_by_participant_unauthorized() {
    let (addr, _) = start_server().await;
    let _host = create_as_host(&addr).await;
    let mut bea = join(&addr, 2, "Bea").await;

    send(&mut bea, json!({"type": "begin_session", "pin": PIN})).await;
    let reply = recv_until(&mut bea, |e| error_code(e).is_some()).await;
    assert_eq!(error_code(&reply), Some(403));
}

#[tokio::test]
async fn test_begin_from_unattached_socket_rejected() {
    let (addr, _) = start_server().await;
    let _host = create_as_host(&addr).await;
    let mut stranger = connect(&addr).await;

    send(&mut stranger, json!({"type": "begin_session", "pin": PIN})).await;
    let reply = recv(&mut stranger).await.unwrap();
    assert_eq!(error_code(&reply), Some(403));
}

// =========================================================================
// Session flow
// =========================================================================

#[tokio::test]
async fn test_checkpoint_and_intervention_flow() {
    let (addr, _) = start_server().await;
    let mut host = create_as_host(&addr).await;
    let mut bea = join(&addr, 2, "Bea").await;

    send(&mut host, json!({"type": "begin_session", "pin": PIN})).await;
    recv_until(&mut bea, |e| matches!(e, ServerEvent::SessionStarting { .. })).await;
    recv_until(&mut bea, |e| matches!(e, ServerEvent::SessionStarted { .. })).await;

    for n in 0..10 {
        turn(&mut host, speaker(n), &format!("point {n}")).await;
    }
    for expected in 1..=10u64 {
        let event = recv_until(&mut bea, |e| matches!(e, ServerEvent::TurnUpdate { .. })).await;
        let ServerEvent::TurnUpdate {
            exchange_count,
            waiting_for_intervention,
            ..
        } = event
        else {
            unreachable!()
        };
        assert_eq!(exchange_count, expected);
        assert_eq!(waiting_for_intervention, expected == 10);
    }

    send(
        &mut host,
        json!({
            "type": "intervention",
            "pin": PIN,
            "content": "Consider readability.",
            "authorName": "Hal",
            "targetSpeaker": "model-a"
        }),
    )
    .await;
    let intervention = recv_until(&mut bea, |e| matches!(e, ServerEvent::Intervention { .. })).await;
    assert!(matches!(
        intervention,
        ServerEvent::Intervention { ref next_turn, .. } if next_turn.as_deref() == Some("model-b")
    ));

    turn(&mut host, "model-b", "Readability favours spaces.").await;
    let next = recv_until(&mut bea, |e| matches!(e, ServerEvent::TurnUpdate { .. })).await;
    let ServerEvent::TurnUpdate {
        message,
        exchange_count,
        waiting_for_intervention,
        ..
    } = next
    else {
        unreachable!()
    };
    assert_eq!(message.sender, "model-b");
    assert_eq!(exchange_count, 11);
    assert!(!waiting_for_intervention);
}

#[tokio::test]
async fn test_join_viewer_receives_backlog_first() {
    let (addr, _) = start_server().await;
    let mut host = create_as_host(&addr).await;
    send(&mut host, json!({"type": "begin_session", "pin": PIN})).await;
    recv_until(&mut host, |e| matches!(e, ServerEvent::SessionStarted { .. })).await;

    for n in 0..7 {
        turn(&mut host, speaker(n), &format!("point {n}")).await;
    }
    recv_until(&mut host, |e| {
        matches!(e, ServerEvent::TurnUpdate { exchange_count: 7, .. })
    })
    .await;

    let mut viewer = connect(&addr).await;
    send(
        &mut viewer,
        json!({"type": "join_viewer", "pin": PIN, "participantId": 50, "participantName": "Vic"}),
    )
    .await;
    let joined = recv(&mut viewer).await.unwrap();
    assert!(matches!(joined, ServerEvent::Joined { role: Role::Viewer, .. }));

    turn(&mut host, speaker(7), "point 7").await;

    let Some(ServerEvent::MessageHistory { messages }) = recv(&mut viewer).await else {
        panic!("expected message_history right after joined");
    };
    assert_eq!(messages.len(), 7);
    let contents: Vec<String> = messages.iter().map(|m| m.content.clone()).collect();
    let expected: Vec<String> = (0..7).map(|n| format!("point {n}")).collect();
    assert_eq!(contents, expected);

    let count = recv(&mut viewer).await.unwrap();
    assert!(matches!(count, ServerEvent::ParticipantCount { count: 2 }));
    let live = recv_until(&mut viewer, |e| matches!(e, ServerEvent::TurnUpdate { .. })).await;
    assert!(matches!(live, ServerEvent::TurnUpdate { exchange_count: 8, .. }));
}

#[tokio::test]
async fn test_viewer_chat_rejected() {
    let (addr, _) = start_server().await;
    let _host = create_as_host(&addr).await;
    let mut viewer = connect(&addr).await;
    send(
        &mut viewer,
        json!({"type": "join_viewer", "pin": PIN, "participantId": 50, "participantName": "Vic"}),
    )
    .await;
    recv_until(&mut viewer, |e| matches!(e, ServerEvent::Joined { .. })).await;

    send(&mut viewer, json!({"type": "chat_message", "pin": PIN, "content": "hi"})).await;
    let reply = recv_until(&mut viewer, |e| error_code(e).is_some()).await;
    assert_eq!(error_code(&reply), Some(403));
}

#[tokio::test]
async fn test_host_disconnect_while_waiting_ends_session() {
    let (addr, registry) = start_server().await;
    let mut host = create_as_host(&addr).await;
    let mut bea = join(&addr, 2, "Bea").await;

    host.close(None).await.unwrap();

    let ended = recv_until(&mut bea, |e| matches!(e, ServerEvent::SessionEnded { .. })).await;
    assert_eq!(
        ended,
        ServerEvent::SessionEnded {
            reason: "host disconnected".into()
        }
    );
    assert!(recv(&mut bea).await.is_none(), "socket is closed after the notice");

    for _ in 0..100 {
        if registry.get(&SessionPin::new(PIN)).await.is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("room was not removed");
}

#[tokio::test]
async fn test_host_rejoin_while_active_restores_state() {
    let (addr, _) = start_server().await;
    let mut host = create_as_host(&addr).await;
    let mut bea = join(&addr, 2, "Bea").await;
    send(&mut host, json!({"type": "begin_session", "pin": PIN})).await;
    recv_until(&mut bea, |e| matches!(e, ServerEvent::SessionStarted { .. })).await;
    for n in 0..3 {
        turn(&mut host, speaker(n), "...").await;
    }
    recv_until(&mut bea, |e| {
        matches!(e, ServerEvent::TurnUpdate { exchange_count: 3, .. })
    })
    .await;

    host.close(None).await.unwrap();
    recv_until(&mut bea, |e| matches!(e, ServerEvent::ParticipantCount { count: 1 })).await;

    let mut host = connect(&addr).await;
    send(
        &mut host,
        json!({"type": "rejoin_session", "pin": PIN, "participantId": 1, "participantName": "Hal"}),
    )
    .await;
    let joined = recv(&mut host).await.unwrap();
    let ServerEvent::Joined {
        role,
        rejoined,
        status,
        exchange_count,
        ..
    } = joined
    else {
        panic!("expected joined, got {joined:?}");
    };
    assert_eq!(role, Role::Host);
    assert!(rejoined);
    assert_eq!(status, SessionStatus::Active);
    assert_eq!(exchange_count, 3);
}
