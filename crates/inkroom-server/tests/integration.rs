//! End-to-end tests: a real server on an ephemeral port and WebSocket clients
//! speaking the JSON protocol.

use std::net::SocketAddr;
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use inkroom_core::{
    ClientMessage, CollaborationClient, PALETTE, Point, ServerMessage, StrokeDraft, SyncEvent,
    ToolKind,
};
use inkroom_server::{AppState, Config, app};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Duration, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a server on a free port, return its address.
async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(Config::default());
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });
    addr
}

/// Connect to a room and return the socket with its `init` message.
async fn connect(addr: SocketAddr, room: Option<&str>) -> (Ws, ServerMessage) {
    let url = match room {
        Some(room) => format!("ws://{addr}/ws?room={room}"),
        None => format!("ws://{addr}/ws"),
    };
    let (mut ws, _) = connect_async(url).await.unwrap();
    let init = recv(&mut ws).await.expect("no init message");
    assert_eq!(init.event_name(), "init");
    (ws, init)
}

async fn send(ws: &mut Ws, msg: &ClientMessage) {
    send_raw(ws, &msg.to_json().unwrap()).await;
}

async fn send_raw(ws: &mut Ws, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

/// Next server message, or `None` if nothing arrives shortly.
async fn recv(ws: &mut Ws) -> Option<ServerMessage> {
    loop {
        let frame = timeout(Duration::from_millis(300), ws.next()).await.ok()??.ok()?;
        if let Message::Text(text) = frame {
            return Some(ServerMessage::from_json(text.as_str()).unwrap());
        }
    }
}

fn stroke(tool: ToolKind) -> StrokeDraft {
    StrokeDraft::new(tool, "#4363d8", 5.0)
        .with_points(vec![Point::new(10.0, 10.0), Point::new(20.0, 25.0)])
}

fn me_of(init: &ServerMessage) -> inkroom_core::User {
    match init {
        ServerMessage::Init { me, .. } => me.clone(),
        other => panic!("expected init, got {other:?}"),
    }
}

#[tokio::test]
async fn test_join_presence_and_colors() {
    let addr = start_test_server().await;
    let (mut alice, alice_init) = connect(addr, Some("studio")).await;
    let (_bob, bob_init) = connect(addr, Some("studio")).await;

    let alice_user = me_of(&alice_init);
    let bob_user = me_of(&bob_init);
    assert_eq!(alice_user.color, PALETTE[0]);
    assert_eq!(bob_user.color, PALETTE[1]);
    assert!(bob_user.name.starts_with("User-"));

    match &bob_init {
        ServerMessage::Init { users, ops, .. } => {
            assert_eq!(users, &vec![alice_user.clone(), bob_user.clone()]);
            assert!(ops.is_empty());
        }
        other => panic!("expected init, got {other:?}"),
    }

    assert_eq!(recv(&mut alice).await, Some(ServerMessage::UserJoin(bob_user)));
}

#[tokio::test]
async fn test_commit_reaches_all_and_cursor_skips_sender() {
    let addr = start_test_server().await;
    let (mut alice, alice_init) = connect(addr, None).await;
    let (mut bob, _) = connect(addr, None).await;
    recv(&mut alice).await; // bob's user:join
    let alice_id = me_of(&alice_init).id;

    send(&mut alice, &ClientMessage::Cursor(Point::new(7.0, 8.0))).await;
    assert_eq!(
        recv(&mut bob).await,
        Some(ServerMessage::Cursor { user_id: alice_id.clone(), x: 7.0, y: 8.0 })
    );

    send(&mut alice, &ClientMessage::StrokeCommit(stroke(ToolKind::Eraser))).await;
    for ws in [&mut alice, &mut bob] {
        match recv(ws).await {
            Some(ServerMessage::OpAdd(op)) => {
                assert_eq!(op.user_id(), alice_id);
                assert_eq!(op.tool(), ToolKind::Eraser);
                assert!(!op.is_undone());
            }
            other => panic!("expected op:add, got {other:?}"),
        }
    }
    // The cursor never came back to alice.
    assert_eq!(recv(&mut alice).await, None);
}

#[tokio::test]
async fn test_preview_is_relayed_but_not_replayed() {
    let addr = start_test_server().await;
    let (mut alice, alice_init) = connect(addr, Some("p")).await;
    let (mut bob, _) = connect(addr, Some("p")).await;
    recv(&mut alice).await;

    send(&mut alice, &ClientMessage::StrokePreview(stroke(ToolKind::Brush))).await;
    match recv(&mut bob).await {
        Some(ServerMessage::StrokePreview { user_id, points, .. }) => {
            assert_eq!(user_id, me_of(&alice_init).id);
            assert_eq!(points.len(), 2);
        }
        other => panic!("expected stroke:preview, got {other:?}"),
    }

    let (_carol, carol_init) = connect(addr, Some("p")).await;
    match carol_init {
        ServerMessage::Init { ops, .. } => assert!(ops.is_empty()),
        other => panic!("expected init, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let addr = start_test_server().await;
    let (mut x, _) = connect(addr, Some("x")).await;
    let (mut y, _) = connect(addr, Some("y")).await;

    send(&mut x, &ClientMessage::StrokeCommit(stroke(ToolKind::Brush))).await;
    send(&mut x, &ClientMessage::Cursor(Point::new(1.0, 1.0))).await;
    assert!(matches!(recv(&mut x).await, Some(ServerMessage::OpAdd(_))));
    assert_eq!(recv(&mut y).await, None);

    // Color assignment is per room.
    let (_, y2_init) = connect(addr, Some("y")).await;
    assert_eq!(me_of(&y2_init).color, PALETTE[1]);
}

#[tokio::test]
async fn test_disconnect_announces_leave() {
    let addr = start_test_server().await;
    let (mut alice, _) = connect(addr, Some("bye")).await;
    let (mut bob, bob_init) = connect(addr, Some("bye")).await;
    recv(&mut alice).await;

    bob.close(None).await.unwrap();
    assert_eq!(
        recv(&mut alice).await,
        Some(ServerMessage::UserLeave { id: me_of(&bob_init).id })
    );
}

#[tokio::test]
async fn test_abrupt_disconnect_announces_leave() {
    let addr = start_test_server().await;
    let (mut alice, _) = connect(addr, Some("crash")).await;
    let (bob, bob_init) = connect(addr, Some("crash")).await;
    recv(&mut alice).await;

    drop(bob);
    assert_eq!(
        recv(&mut alice).await,
        Some(ServerMessage::UserLeave { id: me_of(&bob_init).id })
    );
    assert_eq!(recv(&mut alice).await, None);
}

#[tokio::test]
async fn test_malformed_frames_keep_connection_alive() {
    let addr = start_test_server().await;
    let (mut alice, _) = connect(addr, Some("junk")).await;
    let (mut bob, _) = connect(addr, Some("junk")).await;
    recv(&mut alice).await;

    send_raw(&mut alice, "not json").await;
    send_raw(&mut alice, r#"{"event":"stroke:commit","data":{"tool":"brush"}}"#).await;
    send_raw(&mut alice, r#"{"event":"cursor","data":{"x":"left","y":0}}"#).await;
    assert_eq!(recv(&mut alice).await, None);
    assert_eq!(recv(&mut bob).await, None);

    send(&mut alice, &ClientMessage::Ping {}).await;
    assert_eq!(recv(&mut alice).await, Some(ServerMessage::Pong {}));
    assert_eq!(recv(&mut bob).await, None);
}

/// Pump a replica: send its queued frames and apply whatever arrives.
async fn sync(client: &mut CollaborationClient, ws: &mut Ws) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    loop {
        for frame in client.take_outgoing() {
            send_raw(ws, &frame).await;
        }
        match recv(ws).await {
            Some(msg) => events.extend(client.apply(msg, Instant::now())),
            None if client.has_outgoing() => continue,
            None => return events,
        }
    }
}

#[tokio::test]
async fn test_replicas_converge_through_global_undo_redo() {
    let addr = start_test_server().await;
    let (mut alice_ws, alice_init) = connect(addr, Some("canvas")).await;
    let (mut bob_ws, bob_init) = connect(addr, Some("canvas")).await;

    let mut alice = CollaborationClient::new();
    let mut bob = CollaborationClient::new();
    let now = Instant::now();
    alice.apply(alice_init, now);
    bob.apply(bob_init, now);
    sync(&mut alice, &mut alice_ws).await;
    assert_eq!(alice.users().count(), 2);

    // Alice draws two strokes, Bob one.
    for x in [0.0, 50.0] {
        alice.begin_stroke(Point::new(x, 0.0), now);
        alice.extend_stroke(Point::new(x + 5.0, 5.0), now);
        alice.end_stroke();
    }
    sync(&mut alice, &mut alice_ws).await;
    bob.begin_stroke(Point::new(100.0, 100.0), now);
    bob.end_stroke();
    sync(&mut bob, &mut bob_ws).await;
    sync(&mut alice, &mut alice_ws).await;

    assert_eq!(alice.history().len(), 3);
    assert_eq!(alice.history(), bob.history());
    let ids: Vec<_> = alice.history().iter().map(|op| op.id()).collect();

    // Bob's undo removes the newest stroke, whoever drew it.
    bob.undo();
    let events = sync(&mut bob, &mut bob_ws).await;
    assert!(events.iter().any(
        |e| matches!(e, SyncEvent::OperationUndone { id, bounds: Some(_) } if *id == ids[2])
    ));
    bob.undo();
    sync(&mut bob, &mut bob_ws).await;
    sync(&mut alice, &mut alice_ws).await;
    assert_eq!(alice.history().iter().map(|op| op.id()).collect::<Vec<_>>(), vec![ids[0]]);
    assert_eq!(alice.history(), bob.history());

    // Alice's redo brings back the most recently undone stroke; replicas
    // re-fetch a snapshot.
    alice.redo();
    sync(&mut alice, &mut alice_ws).await;
    sync(&mut bob, &mut bob_ws).await;
    let expected = vec![ids[0], ids[1]];
    assert_eq!(alice.history().iter().map(|op| op.id()).collect::<Vec<_>>(), expected);
    assert_eq!(bob.history().iter().map(|op| op.id()).collect::<Vec<_>>(), expected);
}

#[tokio::test]
async fn test_health_endpoint() {
    let addr = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.ends_with("ok"));
}
