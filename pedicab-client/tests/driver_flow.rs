//! End-to-end driver flows against the in-memory authority

use chrono::Utc;
use pedicab_client::mock::MockAuthority;
use pedicab_client::session::{MemorySessionStorage, SessionStorage, TOKEN_KEY};
use pedicab_client::{
    AcceptOutcome, ClaimState, ClientConfig, ClientError, Credentials, DriverClient,
    FixedLocationProvider, Role, SessionEvent, WithdrawalRequest,
};
use rust_decimal::Decimal;
use serde_json::json;
use shared::ErrorCode;
use shared::models::EarningsRecord;
use std::sync::Arc;
use std::time::Duration;

const PASSWORD: &str = "secret";

fn quiet_config() -> ClientConfig {
    ClientConfig::default().with_presence_interval(Duration::from_secs(60))
}

fn driver_with(
    authority: &Arc<MockAuthority>,
    storage: Arc<MemorySessionStorage>,
    config: ClientConfig,
) -> DriverClient {
    DriverClient::new(
        config,
        Arc::new(authority.client()),
        storage,
        Arc::new(FixedLocationProvider::new(-7.797, 110.370)),
    )
}

fn driver(authority: &Arc<MockAuthority>) -> DriverClient {
    driver_with(
        authority,
        Arc::new(MemorySessionStorage::new()),
        quiet_config(),
    )
}

async fn logged_in(authority: &Arc<MockAuthority>, email: &str) -> DriverClient {
    let client = driver(authority);
    client
        .login(&Credentials::new(email, PASSWORD))
        .await
        .expect("login");
    client
}

#[tokio::test]
async fn two_drivers_race_for_one_order() {
    let authority = MockAuthority::new();
    authority.add_driver("a@pedicab.id", PASSWORD, "Agus");
    let b_id = authority.add_driver("b@pedicab.id", PASSWORD, "Bayu");
    authority.add_order("O1", Decimal::from(15_000));

    let a = logged_in(&authority, "a@pedicab.id").await;
    let b = logged_in(&authority, "b@pedicab.id").await;
    assert!(a.snapshot().partition.is_available("O1"));
    assert!(b.snapshot().partition.is_available("O1"));

    let ticket_a = a.prepare_accept("O1").unwrap();
    let ticket_b = b.prepare_accept("O1").unwrap();

    assert_eq!(a.accept(ticket_a).await.unwrap(), AcceptOutcome::Accepted);
    match b.accept(ticket_b).await.unwrap() {
        AcceptOutcome::LostToOther { message } => assert!(!message.is_empty()),
        other => panic!("expected LostToOther, got {other:?}"),
    }

    let a_view = a.snapshot();
    assert!(a_view.partition.is_active("O1"));
    assert_eq!(a_view.claims.get("O1"), Some(&ClaimState::Mine));

    let b_view = b.snapshot();
    assert!(b_view.partition.find("O1").is_none());
    assert_eq!(b_view.claims.get("O1"), Some(&ClaimState::LostToOther));

    let held_by = authority.order("O1").and_then(|o| o.driver_id);
    assert_ne!(held_by.as_deref(), Some(b_id.as_str()));
}

#[tokio::test]
async fn expired_token_redirects_once() {
    let authority = MockAuthority::new();
    authority.add_driver("a@pedicab.id", PASSWORD, "Agus");
    let client = logged_in(&authority, "a@pedicab.id").await;
    let mut events = client.events();

    authority.expire_tokens();
    let (orders, earnings, toggle) = tokio::join!(
        client.refresh_orders(),
        client.refresh_earnings(),
        client.toggle_online(true),
    );
    assert!(orders.is_err());
    assert!(earnings.is_err());
    assert!(toggle.is_err());
    assert!(client.session().current().is_none());

    let mut redirects = Vec::new();
    let mut ended = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::LoginRequired { role, route } => redirects.push((role, route)),
            SessionEvent::Ended { .. } => ended += 1,
            SessionEvent::Established { .. } => {}
        }
    }
    assert_eq!(ended, 1);
    assert_eq!(redirects, vec![(Role::Driver, Role::Driver.login_route())]);
    assert!(client.snapshot().partition.is_empty());
}

#[tokio::test]
async fn restore_is_idempotent_and_clears_bad_tokens() {
    let authority = MockAuthority::new();
    authority.add_driver("a@pedicab.id", PASSWORD, "Agus");
    let storage = Arc::new(MemorySessionStorage::new());

    let first = driver_with(&authority, storage.clone(), quiet_config());
    first
        .login(&Credentials::new("a@pedicab.id", PASSWORD))
        .await
        .unwrap();

    // the app restarts with the persisted credential
    let second = driver_with(&authority, storage.clone(), quiet_config());
    let restored = second.restore().await.expect("session restored");
    assert_eq!(restored.role, Role::Driver);
    let profile_calls = authority.calls("profile");

    let again = second.restore().await.expect("still restored");
    assert_eq!(again.user_id(), restored.user_id());
    assert_eq!(authority.calls("profile"), profile_calls);
    assert_eq!(second.running_tasks().await.len(), 2);

    authority.expire_tokens();
    let third = driver_with(&authority, storage.clone(), quiet_config());
    assert!(third.restore().await.is_none());
    assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
    assert!(third.running_tasks().await.is_empty());
}

#[tokio::test]
async fn completing_twice_is_harmless() {
    let authority = MockAuthority::new();
    authority.add_driver("a@pedicab.id", PASSWORD, "Agus");
    authority.add_order("O1", Decimal::from(15_000));
    let client = logged_in(&authority, "a@pedicab.id").await;

    let ticket = client.prepare_accept("O1").unwrap();
    client.accept(ticket).await.unwrap();
    client.complete("O1").await.unwrap();

    let err = client.complete("O1").await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidState(_)));
    assert_eq!(authority.calls("driver/orders/{id}/complete"), 1);

    let snapshot = client.snapshot();
    assert!(snapshot.partition.is_completed("O1"));
    assert_eq!(snapshot.earnings.total_earnings, Decimal::from(15_000));
    assert_eq!(snapshot.earnings.completed_trip_count, 1);
}

#[tokio::test]
async fn earnings_follow_completed_history() {
    let authority = MockAuthority::new();
    let driver_id = authority.add_driver("a@pedicab.id", PASSWORD, "Agus");
    authority.add_driver("b@pedicab.id", PASSWORD, "Bayu");
    let now = Utc::now();
    for (id, price) in [("H1", 15_000), ("H2", 18_000), ("H3", 12_000)] {
        authority.add_completed_order(id, &driver_id, Decimal::from(price), now);
    }

    let a = logged_in(&authority, "a@pedicab.id").await;
    let earnings = a.snapshot().earnings;
    assert_eq!(earnings.total_earnings, Decimal::from(45_000));
    assert_eq!(earnings.completed_trip_count, 3);
    assert_eq!(earnings.available_balance, Decimal::from(45_000));

    let b = logged_in(&authority, "b@pedicab.id").await;
    let earnings = b.snapshot().earnings;
    assert_eq!(earnings.total_earnings, Decimal::ZERO);
    assert_eq!(earnings.completed_trip_count, 0);
}

#[tokio::test]
async fn completion_outdates_server_aggregates() {
    let authority = MockAuthority::new();
    let driver_id = authority.add_driver("a@pedicab.id", PASSWORD, "Agus");
    authority.add_completed_order("H1", &driver_id, Decimal::from(15_000), Utc::now());
    authority.add_order("O2", Decimal::from(18_000));
    // the server also counts a bonus the order list does not show
    authority.set_server_earnings(Some(EarningsRecord {
        total_earnings: Some(json!(20_000)),
        completed_trip_count: Some(json!(1)),
        ..Default::default()
    }));
    let client = logged_in(&authority, "a@pedicab.id").await;
    assert_eq!(
        client.snapshot().earnings.total_earnings,
        Decimal::from(20_000)
    );

    let ticket = client.prepare_accept("O2").unwrap();
    client.accept(ticket).await.unwrap();
    client.complete("O2").await.unwrap();

    let earnings = client.snapshot().earnings;
    assert_eq!(earnings.total_earnings, Decimal::from(33_000));
    assert_eq!(earnings.today_earnings, Decimal::from(33_000));
    assert_eq!(earnings.completed_trip_count, 2);
    assert!(earnings.today_earnings <= earnings.total_earnings);

    // a fresh fetch is trusted again
    authority.set_server_earnings(Some(EarningsRecord {
        total_earnings: Some(json!(38_000)),
        ..Default::default()
    }));
    client.refresh_earnings().await.unwrap();
    assert_eq!(
        client.snapshot().earnings.available_balance,
        Decimal::from(38_000)
    );
}

#[tokio::test]
async fn latest_toggle_wins() {
    let authority = MockAuthority::new();
    let driver_id = authority.add_driver("a@pedicab.id", PASSWORD, "Agus");
    let client = Arc::new(logged_in(&authority, "a@pedicab.id").await);

    // the first answer arrives after the second one
    authority.set_status_delays([Duration::from_millis(80), Duration::from_millis(5)]);
    let slow = {
        let client = client.clone();
        tokio::spawn(async move { client.toggle_online(true).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(client.snapshot().presence.toggling, Some(true));

    assert!(!client.toggle_online(false).await.unwrap());
    slow.await.unwrap().unwrap();

    let presence = client.snapshot().presence;
    assert!(!presence.presence.is_online);
    assert_eq!(presence.toggling, None);
    assert!(!authority.is_online(&driver_id));
}

#[tokio::test]
async fn invalid_withdrawal_never_reaches_authority() {
    let authority = MockAuthority::new();
    let driver_id = authority.add_driver("a@pedicab.id", PASSWORD, "Agus");
    authority.add_completed_order("H1", &driver_id, Decimal::from(45_000), Utc::now());
    let client = logged_in(&authority, "a@pedicab.id").await;

    let mut request = WithdrawalRequest {
        amount: Decimal::from(5_000),
        bank_name: "BCA".into(),
        account_number: "1234567890".into(),
        account_name: "Agus".into(),
    };
    let err = client.submit_withdrawal(&request).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::WithdrawalBelowMinimum);

    request.amount = Decimal::from(50_000);
    let err = client.submit_withdrawal(&request).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::WithdrawalInsufficientBalance);
    assert_eq!(authority.calls("POST driver/withdrawals"), 0);

    request.amount = Decimal::from(20_000);
    let withdrawal = client.submit_withdrawal(&request).await.unwrap();
    assert_eq!(withdrawal.amount, Decimal::from(20_000));
    assert_eq!(authority.calls("POST driver/withdrawals"), 1);
    assert_eq!(authority.withdrawals(&driver_id).len(), 1);
    assert_eq!(
        client.snapshot().earnings.available_balance,
        Decimal::from(25_000)
    );
}

#[tokio::test]
async fn loops_stop_on_logout() {
    let authority = MockAuthority::new();
    let driver_id = authority.add_driver("a@pedicab.id", PASSWORD, "Agus");
    let client = driver_with(
        &authority,
        Arc::new(MemorySessionStorage::new()),
        ClientConfig::default().with_presence_interval(Duration::from_millis(15)),
    );
    client
        .login(&Credentials::new("a@pedicab.id", PASSWORD))
        .await
        .unwrap();
    client.toggle_online(true).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!authority.locations(&driver_id).is_empty());

    client.logout().await;
    assert!(client.running_tasks().await.is_empty());
    let heartbeats = authority.calls("driver/online-status");
    let pushes = authority.locations(&driver_id).len();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(authority.calls("driver/online-status"), heartbeats);
    assert_eq!(authority.locations(&driver_id).len(), pushes);
}

#[tokio::test]
async fn fallback_lookup_keeps_orders_flowing() {
    let authority = MockAuthority::new();
    authority.add_driver("a@pedicab.id", PASSWORD, "Agus");
    authority.add_order("O1", Decimal::from(15_000));
    let client = logged_in(&authority, "a@pedicab.id").await;

    authority.set_primary_orders_down(true);
    authority.add_order("O2", Decimal::from(20_000));
    client.refresh_orders().await.unwrap();
    assert!(client.snapshot().partition.is_available("O2"));
    assert!(client.snapshot().banner.is_none());

    authority.set_order_lookups_down(true);
    assert!(client.refresh_orders().await.is_err());
    let snapshot = client.snapshot();
    assert!(snapshot.banner.is_some());
    assert_eq!(snapshot.partition.len(), 2);
}
