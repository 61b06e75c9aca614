//! WebSocket notification flow against a live listener
//! Two clients register, bet the same stake and receive the game start; the
//! first client is then superseded by a second connection for its account.

use betgammon::{
    api::{build_app, AppState},
    config::BetgammonConfig,
    services::BettingService,
    AccountId,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> (SocketAddr, Arc<BettingService>) {
    let config = BetgammonConfig::default();
    let service = Arc::new(BettingService::from_config(config.clone()).unwrap());
    let app = build_app(Arc::new(AppState::new(Arc::clone(&service))), &config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, service)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    client
}

async fn send(client: &mut Client, message: Value) {
    client.send(Message::Text(message.to_string())).await.unwrap();
}

/// Next JSON event, skipping control frames
async fn next_event(client: &mut Client) -> Option<Value> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .ok()??;
        match frame.ok()? {
            Message::Text(text) => return serde_json::from_str(&text).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

/// Read events until one of type `kind` arrives
async fn expect_event(client: &mut Client, kind: &str) -> Value {
    loop {
        let event = next_event(client)
            .await
            .unwrap_or_else(|| panic!("connection ended before {}", kind));
        if event["type"] == kind {
            return event;
        }
    }
}

#[tokio::test]
async fn test_register_bet_and_match_over_websocket() {
    let (addr, service) = start_server().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    send(&mut alice, json!({"type": "register", "userId": "alice"})).await;
    let balance = expect_event(&mut alice, "balance_update").await;
    assert_eq!(balance["balance"], 1000);

    send(&mut bob, json!({"type": "register", "userId": "bob"})).await;
    expect_event(&mut bob, "balance_update").await;

    send(&mut alice, json!({"type": "place_bet", "userId": "alice", "amount": 200})).await;
    let queued = expect_event(&mut alice, "bet_queued").await;
    assert_eq!(queued["amount"], 200);

    send(&mut bob, json!({"type": "place_bet", "userId": "bob", "amount": 200})).await;
    let start_bob = expect_event(&mut bob, "game_start").await;
    let start_alice = expect_event(&mut alice, "game_start").await;
    assert_eq!(start_bob["gameId"], start_alice["gameId"]);
    assert_eq!(start_alice["player1Id"], "alice");
    assert_eq!(start_alice["player2Id"], "bob");
    assert_eq!(start_alice["pot"], 400);

    let game_id = start_alice["gameId"].clone();
    send(&mut bob, json!({"type": "game_ack", "gameId": game_id})).await;
    send(
        &mut bob,
        json!({"type": "game_winner", "gameId": game_id, "winnerId": "bob"}),
    )
    .await;

    let over = expect_event(&mut alice, "game_over").await;
    assert_eq!(over["winnerId"], "bob");
    assert_eq!(over["pot"], 400);
    expect_event(&mut bob, "game_over").await;

    let bob_account = service.balance(&AccountId::from("bob"));
    assert_eq!(bob_account.available_balance, 1200);
    assert_eq!(bob_account.escrowed_balance, 0);
}

#[tokio::test]
async fn test_rejections_are_reported_to_the_sender() {
    let (addr, _service) = start_server().await;
    let mut client = connect(addr).await;

    // Betting before registering is refused
    send(&mut client, json!({"type": "place_bet", "userId": "carol", "amount": 10})).await;
    let error = expect_event(&mut client, "error").await;
    assert_eq!(error["code"], "NOT_REGISTERED");

    send(&mut client, json!({"type": "register", "userId": "carol"})).await;
    expect_event(&mut client, "balance_update").await;

    send(&mut client, json!({"type": "place_bet", "userId": "carol", "amount": 5000})).await;
    let error = expect_event(&mut client, "error").await;
    assert_eq!(error["code"], "INSUFFICIENT_FUNDS");

    client.send(Message::Text("not json".to_string())).await.unwrap();
    let error = expect_event(&mut client, "error").await;
    assert_eq!(error["code"], "BAD_MESSAGE");
}

#[tokio::test]
async fn test_new_registration_supersedes_old_connection() {
    let (addr, service) = start_server().await;
    let dave = AccountId::from("dave");

    let mut first = connect(addr).await;
    send(&mut first, json!({"type": "register", "userId": "dave"})).await;
    expect_event(&mut first, "balance_update").await;

    let mut second = connect(addr).await;
    send(&mut second, json!({"type": "register", "userId": "dave"})).await;
    expect_event(&mut second, "balance_update").await;

    // The first connection is closed by the server
    assert!(next_event(&mut first).await.is_none());

    service.place_bet(&dave, 100).unwrap();
    expect_event(&mut second, "bet_queued").await;
    assert!(service.hub().is_connected(&dave));
    assert_eq!(service.hub().connection_count(), 1);

    // Closing the live connection unregisters it but keeps the bet
    second.close(None).await.unwrap();
    for _ in 0..50 {
        if !service.hub().is_connected(&dave) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!service.hub().is_connected(&dave));
    assert!(service.queue().is_queued(&dave, 100));
}
