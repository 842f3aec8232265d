mod common;

use ajo_ledger::application::webhook::{WebhookOutcome, sign};
use ajo_ledger::config::LedgerConfig;
use ajo_ledger::domain::money::Balance;
use ajo_ledger::domain::payment::SettlementStatus;
use ajo_ledger::domain::transaction::TransactionStatus;
use ajo_ledger::domain::wallet::Wallet;
use ajo_ledger::error::LedgerError;
use ajo_ledger::infrastructure::gateway::SandboxBehaviour;
use common::{DEADLINE, Harness, amount, balance};
use rust_decimal_macros::dec;

const SECRET: &str = "whsec-test";

fn harness() -> Harness {
    Harness::with_config(LedgerConfig::default().with_webhook_secret(SECRET))
}

fn body(event: &str, status: &str, reference: &str, value: &str) -> Vec<u8> {
    format!(
        r#"{{"event":"{event}","data":{{"status":"{status}","tx_ref":"{reference}","amount":{value}}}}}"#
    )
    .into_bytes()
}

/// Starts a funding that the provider has not settled yet.
async fn pending_funding(h: &Harness, reference: &str) -> Wallet {
    let (ada, wallet) = h.funded_member("ada", dec!(0)).await;
    h.gateway
        .set_behaviour(SandboxBehaviour {
            settle_as: SettlementStatus::Pending,
            ..SandboxBehaviour::default()
        })
        .await;
    let tx = h
        .engine
        .fund_from_external_source(
            &ada,
            wallet.id,
            amount(dec!(2500)),
            Some(reference.to_string()),
            DEADLINE,
        )
        .await
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    wallet
}

#[tokio::test]
async fn test_signed_completion_credits_once() {
    let h = harness();
    let wallet = pending_funding(&h, "ref-77").await;
    h.gateway.settle("ref-77", SettlementStatus::Successful).await;

    let payload = body("charge.completed", "successful", "ref-77", "2500");
    let signature = sign(SECRET, &payload).unwrap();

    let outcome = h.engine.ingest_webhook(&payload, &signature).await.unwrap();
    match outcome {
        WebhookOutcome::Credited(tx) => assert_eq!(tx.status, TransactionStatus::Success),
        other => panic!("expected a credit, got {other:?}"),
    }
    assert_eq!(h.balance_of(wallet.id).await, balance(dec!(2500)));

    let again = h.engine.ingest_webhook(&payload, &signature).await.unwrap();
    assert_eq!(again, WebhookOutcome::AlreadyProcessed);
    assert_eq!(h.balance_of(wallet.id).await, balance(dec!(2500)));
}

#[tokio::test]
async fn test_bad_signature_is_rejected_before_parsing() {
    let h = harness();
    let wallet = pending_funding(&h, "ref-1").await;
    h.gateway.settle("ref-1", SettlementStatus::Successful).await;

    let payload = body("charge.completed", "successful", "ref-1", "2500");
    let forged = sign("wrong-secret", &payload).unwrap();
    let err = h.engine.ingest_webhook(&payload, &forged).await.unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized(_)));

    let err = h
        .engine
        .ingest_webhook(b"not json", &sign("other", b"not json").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized(_)));
    assert_eq!(h.balance_of(wallet.id).await, Balance::ZERO);
}

#[tokio::test]
async fn test_irrelevant_events_are_ignored() {
    let h = harness();
    pending_funding(&h, "ref-2").await;

    for payload in [
        body("transfer.completed", "successful", "ref-2", "2500"),
        body("charge.completed", "failed", "ref-2", "2500"),
        body("charge.completed", "successful", "", "2500"),
        body("charge.completed", "successful", "ref-unknown", "2500"),
    ] {
        let signature = sign(SECRET, &payload).unwrap();
        assert_eq!(
            h.engine.ingest_webhook(&payload, &signature).await.unwrap(),
            WebhookOutcome::Ignored
        );
    }
}

#[tokio::test]
async fn test_amount_must_match_the_recorded_funding() {
    let h = harness();
    let wallet = pending_funding(&h, "ref-3").await;
    h.gateway.settle("ref-3", SettlementStatus::Successful).await;

    let payload = body("charge.completed", "successful", "ref-3", "25000");
    let signature = sign(SECRET, &payload).unwrap();
    let err = h.engine.ingest_webhook(&payload, &signature).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)));
    assert_eq!(h.balance_of(wallet.id).await, Balance::ZERO);
}

#[tokio::test]
async fn test_malformed_payload_and_missing_secret() {
    let h = harness();
    let signature = sign(SECRET, b"{").unwrap();
    let err = h.engine.ingest_webhook(b"{", &signature).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)));

    let unconfigured = Harness::new();
    let err = unconfigured
        .engine
        .ingest_webhook(b"{}", &signature)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)));
}

#[tokio::test]
async fn test_unsettled_charge_stays_pending() {
    let h = harness();
    let wallet = pending_funding(&h, "ref-4").await;

    // The callback claims success but the provider still reports pending.
    let payload = body("charge.completed", "successful", "ref-4", "2500");
    let signature = sign(SECRET, &payload).unwrap();
    assert_eq!(
        h.engine.ingest_webhook(&payload, &signature).await.unwrap(),
        WebhookOutcome::Ignored
    );
    assert_eq!(h.balance_of(wallet.id).await, Balance::ZERO);

    h.gateway.settle("ref-4", SettlementStatus::Successful).await;
    assert!(matches!(
        h.engine.ingest_webhook(&payload, &signature).await.unwrap(),
        WebhookOutcome::Credited(_)
    ));
}
