/// WebSocket channel against a bound listener
mod common;

use backend::build_router;
use common::{decimal, provider_event, TestContext};
use futures::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::{net::SocketAddr, time::Duration};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(ctx: &TestContext) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(ctx.state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("WebSocket handshake failed");
    socket
}

async fn send(socket: &mut Socket, frame: Value) {
    socket.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn next_frame(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Authenticates and consumes the confirmation and the initial snapshot
async fn authenticated(ctx: &TestContext, addr: SocketAddr, user: Uuid) -> (Socket, Value) {
    let token = format!("token-{}", user);
    ctx.sessions.insert(token.clone(), user);

    let mut socket = connect(addr).await;
    send(&mut socket, json!({ "type": "auth", "token": token })).await;

    let confirmed = next_frame(&mut socket).await;
    assert_eq!(confirmed["type"], "connection_confirmed");
    assert_eq!(confirmed["user_id"], json!(user));

    let snapshot = next_frame(&mut socket).await;
    (socket, snapshot)
}

#[tokio::test]
async fn test_ping_and_rejected_auth() {
    let ctx = TestContext::new();
    let addr = serve(&ctx).await;
    let mut socket = connect(addr).await;

    send(&mut socket, json!({ "type": "ping" })).await;
    assert_eq!(next_frame(&mut socket).await["type"], "pong");

    send(&mut socket, json!({ "type": "auth", "token": "unknown" })).await;
    assert_eq!(next_frame(&mut socket).await["type"], "auth_failed");
    assert_eq!(ctx.hub.total_connections(), 0);

    // Still usable after a failed attempt
    send(&mut socket, json!({ "type": "ping" })).await;
    assert_eq!(next_frame(&mut socket).await["type"], "pong");
}

#[tokio::test]
async fn test_auth_sends_balance_snapshot() {
    let ctx = TestContext::new();
    let addr = serve(&ctx).await;
    let user = Uuid::new_v4();
    ctx.funded_account(user, dec!(42)).await;

    let (_socket, snapshot) = authenticated(&ctx, addr, user).await;

    assert_eq!(snapshot["type"], "balance_changed");
    assert_eq!(decimal(&snapshot["data"]["balance"]), dec!(42));
    assert_eq!(snapshot["data"]["currency"], "USD");
    assert_eq!(ctx.hub.connection_count(user), 1);
}

#[tokio::test]
async fn test_round_pushes_balance_and_win() {
    let ctx = TestContext::new();
    let addr = serve(&ctx).await;
    let user = Uuid::new_v4();
    let account = ctx.funded_account(user, dec!(100)).await;
    let (mut socket, _) = authenticated(&ctx, addr, user).await;

    ctx.provider(provider_event("ws-w", "wager", &account, "round-1", "10"))
        .await;
    let debit = next_frame(&mut socket).await;
    assert_eq!(debit["type"], "balance_changed");
    assert_eq!(decimal(&debit["data"]["balance"]), dec!(90));

    ctx.provider(provider_event("ws-r", "result", &account, "round-1", "30"))
        .await;
    let credit = next_frame(&mut socket).await;
    assert_eq!(credit["type"], "balance_changed");
    assert_eq!(decimal(&credit["data"]["balance"]), dec!(120));

    let win = next_frame(&mut socket).await;
    assert_eq!(win["type"], "win_notification");
    assert_eq!(decimal(&win["data"]["bet_amount"]), dec!(10));
    assert_eq!(decimal(&win["data"]["win_amount"]), dec!(30));
    assert_eq!(decimal(&win["data"]["net_winnings"]), dec!(20));
    assert_eq!(win["data"]["game"], "slot-1");
}

#[tokio::test]
async fn test_losing_round_pushes_cashback() {
    let ctx = TestContext::new();
    let addr = serve(&ctx).await;
    let user = Uuid::new_v4();
    let account = ctx.funded_account(user, dec!(2000)).await;
    let (mut socket, _) = authenticated(&ctx, addr, user).await;

    ctx.provider(provider_event("ws-l", "wager", &account, "round-2", "1000"))
        .await;
    ctx.provider(provider_event("ws-l-r", "result", &account, "round-2", "0"))
        .await;

    let mut cashback = None;
    for _ in 0..5 {
        let frame = next_frame(&mut socket).await;
        if frame["type"] == "cashback_changed" {
            cashback = Some(frame);
            break;
        }
    }
    let cashback = cashback.expect("no cashback_changed frame");
    assert_eq!(decimal(&cashback["data"]["available_cashback"]), dec!(2.5));
    assert_eq!(cashback["data"]["tier"], "Bronze");
}

#[tokio::test]
async fn test_closed_socket_is_unregistered() {
    let ctx = TestContext::new();
    let addr = serve(&ctx).await;
    let user = Uuid::new_v4();
    ctx.funded_account(user, dec!(1)).await;

    let (mut socket, _) = authenticated(&ctx, addr, user).await;
    assert_eq!(ctx.hub.connection_count(user), 1);

    socket.close(None).await.unwrap();
    let hub = ctx.hub.clone();
    let gone = common::eventually(|| {
        let hub = hub.clone();
        async move { (hub.connection_count(user) == 0).then_some(()) }
    })
    .await;
    assert!(gone.is_some());
}
