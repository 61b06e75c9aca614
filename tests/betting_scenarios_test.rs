//! End-to-end betting flows through the service layer
//! Each test drives the public operations and checks both balances and the
//! events pushed to the players' channels.

use betgammon::{
    config::BetgammonConfig,
    events::ServerEvent,
    notifications::EventReceiver,
    services::{BetPlacement, BettingService},
    sessions::SessionStatus,
    AccountId, BetError,
};
use chrono::{Duration as ChronoDuration, Utc};

fn service_with_balance(starting_balance: u64) -> BettingService {
    let mut config = BetgammonConfig::default();
    config.ledger.starting_balance = starting_balance;
    BettingService::from_config(config).unwrap()
}

fn drain(rx: &mut EventReceiver) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn balances(service: &BettingService, id: &AccountId) -> (u64, u64) {
    let account = service.balance(id);
    (account.available_balance, account.escrowed_balance)
}

#[test]
fn test_full_game_flow() {
    let service = service_with_balance(1000);
    let x = AccountId::from("x");
    let y = AccountId::from("y");
    let (_hx, mut rx_x) = service.connect(&x);
    let (_hy, mut rx_y) = service.connect(&y);
    drain(&mut rx_x);
    drain(&mut rx_y);

    // Scenario A: first bettor waits
    let placement = service.place_bet(&x, 200).unwrap();
    assert!(matches!(placement, BetPlacement::Waiting { stake: 200, .. }));
    assert_eq!(balances(&service, &x), (800, 200));
    assert_eq!(
        drain(&mut rx_x),
        vec![
            ServerEvent::BalanceUpdate { balance: 800, escrowed: 200 },
            ServerEvent::BetQueued { amount: 200 },
        ]
    );

    // Scenario B: an equal stake matches
    let session = match service.place_bet(&y, 200).unwrap() {
        BetPlacement::Matched(session) => session,
        other => panic!("expected a match, got {:?}", other),
    };
    assert_eq!(session.pot, 400);
    assert_eq!(session.status, SessionStatus::Starting);
    assert!(service.queue().is_empty());

    let start = ServerEvent::GameStart {
        game_id: session.id,
        player1_id: x.clone(),
        player2_id: y.clone(),
        stake: 200,
        pot: 400,
    };
    assert_eq!(drain(&mut rx_x), vec![start.clone()]);
    assert_eq!(
        drain(&mut rx_y),
        vec![
            ServerEvent::BalanceUpdate { balance: 800, escrowed: 200 },
            start,
        ]
    );

    // Scenario C: the winner collects the pot
    let closed = service.report_winner(session.id, &x).unwrap();
    assert_eq!(closed.status, SessionStatus::Completed);
    assert_eq!(balances(&service, &x), (1200, 0));
    assert_eq!(balances(&service, &y), (800, 0));

    let over = ServerEvent::GameOver {
        game_id: session.id,
        winner_id: x.clone(),
        pot: 400,
    };
    assert!(drain(&mut rx_x).contains(&over));
    assert!(drain(&mut rx_y).contains(&over));

    // A repeated report pays nothing
    assert_eq!(
        service.report_winner(session.id, &x).unwrap_err(),
        BetError::AlreadySettled
    );
    assert_eq!(balances(&service, &x), (1200, 0));
}

#[test]
fn test_insufficient_funds_leaves_no_trace() {
    // Scenario D
    let service = service_with_balance(50);
    let z = AccountId::from("z");

    let err = service.place_bet(&z, 200).unwrap_err();
    assert_eq!(err, BetError::InsufficientFunds { need: 200, available: 50 });
    assert_eq!(balances(&service, &z), (50, 0));
    assert!(!service.queue().is_queued(&z, 200));
    assert!(service.queue().is_empty());
}

#[test]
fn test_unmatched_bet_times_out() {
    // Scenario E
    let service = service_with_balance(1000);
    let x = AccountId::from("x");
    let (_handle, mut rx) = service.connect(&x);
    drain(&mut rx);

    let before = Utc::now();
    service.place_bet(&x, 300).unwrap();
    assert_eq!(balances(&service, &x), (700, 300));
    drain(&mut rx);

    // Inside the window nothing happens
    let report = service.run_sweep(before + ChronoDuration::seconds(60));
    assert_eq!(report.expired_bets, 0);
    assert!(service.queue().is_queued(&x, 300));

    let report = service.run_sweep(before + ChronoDuration::seconds(121));
    assert_eq!(report.expired_bets, 1);
    assert_eq!(balances(&service, &x), (1000, 0));
    assert!(!service.queue().is_queued(&x, 300));
    assert_eq!(
        drain(&mut rx),
        vec![
            ServerEvent::BalanceUpdate { balance: 1000, escrowed: 0 },
            ServerEvent::MatchTimeout { amount: 300 },
        ]
    );
}

#[test]
fn test_abandoned_game_refunds_both_players() {
    let service = service_with_balance(1000);
    let x = AccountId::from("x");
    let y = AccountId::from("y");
    let (_hy, mut rx_y) = service.connect(&y);

    service.place_bet(&x, 250).unwrap();
    let session = match service.place_bet(&y, 250).unwrap() {
        BetPlacement::Matched(session) => session,
        other => panic!("expected a match, got {:?}", other),
    };
    drain(&mut rx_y);

    service.abandon(session.id, "player left").unwrap();
    assert_eq!(balances(&service, &x), (1000, 0));
    assert_eq!(balances(&service, &y), (1000, 0));
    assert!(drain(&mut rx_y).contains(&ServerEvent::GameAbandoned {
        game_id: session.id,
        reason: "player left".to_string(),
    }));

    assert_eq!(
        service.report_winner(session.id, &x).unwrap_err(),
        BetError::SessionNotActive(session.id)
    );
    assert_eq!(balances(&service, &x), (1000, 0));
}

#[test]
fn test_payment_confirmation_places_bet() {
    let service = service_with_balance(0);
    let x = AccountId::from("x");
    let (_handle, mut rx) = service.connect(&x);
    drain(&mut rx);

    service.confirm_payment(&x, 100, "charge-1").unwrap();
    assert_eq!(balances(&service, &x), (0, 100));

    let events = drain(&mut rx);
    assert!(events.contains(&ServerEvent::PaymentSuccess { amount: 100 }));
    assert!(events.contains(&ServerEvent::BetQueued { amount: 100 }));

    let status = service.payment_status(&x, 100);
    assert!(status.payment_confirmed);
    assert!(status.is_matching);

    // The same charge is never credited twice
    assert_eq!(
        service.confirm_payment(&x, 100, "charge-1").unwrap_err(),
        BetError::DuplicateCharge("charge-1".to_string())
    );
    assert_eq!(balances(&service, &x), (0, 100));
}

#[test]
fn test_disconnect_keeps_bet_queued() {
    let service = service_with_balance(1000);
    let x = AccountId::from("x");
    let (handle, _rx) = service.connect(&x);
    service.place_bet(&x, 100).unwrap();

    service.disconnect(&handle);
    assert!(!service.hub().is_connected(&x));
    assert!(service.queue().is_queued(&x, 100));

    // Matching still works; the missing channel just drops x's events
    let y = AccountId::from("y");
    assert!(matches!(
        service.place_bet(&y, 100).unwrap(),
        BetPlacement::Matched(_)
    ));
}
