//! A driver shift against the in-memory authority
//!
//! ```sh
//! RUST_LOG=pedicab_client=debug cargo run -p pedicab-client --features mock --example driver_session
//! ```

use pedicab_client::logger::init_from_config;
use pedicab_client::mock::MockAuthority;
use pedicab_client::session::MemorySessionStorage;
use pedicab_client::{
    AcceptOutcome, ClientConfig, Credentials, DriverClient, FixedLocationProvider,
    WithdrawalRequest,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::from_env()
        .with_presence_interval(Duration::from_millis(500))
        .with_order_poll_interval(Duration::from_secs(1));
    init_from_config(&config);

    let authority = MockAuthority::new();
    authority.add_driver("agus@pedicab.id", "secret", "Agus");
    authority.add_driver("bayu@pedicab.id", "secret", "Bayu");
    authority.add_order("O1", Decimal::from(15_000));
    authority.add_order("O2", Decimal::from(18_000));

    let new_driver = || {
        DriverClient::new(
            config.clone(),
            Arc::new(authority.client()),
            Arc::new(MemorySessionStorage::new()),
            Arc::new(FixedLocationProvider::new(-7.797, 110.370)),
        )
    };
    let agus = new_driver();
    let bayu = new_driver();

    agus.login(&Credentials::new("agus@pedicab.id", "secret")).await?;
    bayu.login(&Credentials::new("bayu@pedicab.id", "secret")).await?;
    agus.toggle_online(true).await?;
    bayu.toggle_online(true).await?;

    // both drivers confirm O1; the authority picks one
    let agus_ticket = agus.prepare_accept("O1")?;
    let bayu_ticket = bayu.prepare_accept("O1")?;
    let (agus_outcome, bayu_outcome) =
        tokio::join!(agus.accept(agus_ticket), bayu.accept(bayu_ticket));
    println!("agus: {:?}", agus_outcome?);
    println!("bayu: {:?}", bayu_outcome?);

    for driver in [&agus, &bayu] {
        let mine: Vec<String> = driver
            .snapshot()
            .partition
            .active
            .iter()
            .map(|o| o.id.clone())
            .collect();
        for id in mine {
            driver.complete(&id).await?;
        }
    }

    // the loser still has O2
    if bayu.snapshot().partition.is_available("O2") {
        let ticket = bayu.prepare_accept("O2")?;
        if bayu.accept(ticket).await? == AcceptOutcome::Accepted {
            bayu.complete("O2").await?;
        }
    }

    tokio::time::sleep(Duration::from_secs(2)).await;

    for (name, driver) in [("agus", &agus), ("bayu", &bayu)] {
        driver.refresh_earnings().await?;
        let earnings = driver.snapshot().earnings;
        println!(
            "{name}: {} trips, total {}, available {}",
            earnings.completed_trip_count, earnings.total_earnings, earnings.available_balance
        );
    }

    let request = WithdrawalRequest {
        amount: Decimal::from(10_000),
        bank_name: "BCA".into(),
        account_number: "1234-5678-90".into(),
        account_name: "Agus".into(),
    };
    match agus.submit_withdrawal(&request).await {
        Ok(w) => println!("agus withdrawal {} is {:?}", w.id, w.status),
        Err(e) => println!("agus withdrawal refused: {}", e.user_message()),
    }

    agus.logout().await;
    bayu.logout().await;
    Ok(())
}
