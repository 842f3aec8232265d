use super::engine::{LedgerEngine, with_deadline};
use super::saga::{Saga, Undo};
use crate::domain::auth::Actor;
use crate::domain::event::LedgerEvent;
use crate::domain::ids::WalletId;
use crate::domain::money::Amount;
use crate::domain::payment::{FundingRequest, SettlementStatus};
use crate::domain::saga::{SagaKey, SagaStep};
use crate::domain::transaction::{Transaction, TransactionStatus};
use crate::domain::wallet::WalletKind;
use crate::error::{Entity, GatewayError, LedgerError, Result};
use std::time::Duration;
use tracing::{info, instrument, warn};

impl LedgerEngine {
    /// Credits a personal wallet with money collected by the payment provider.
    ///
    /// A pending transaction is recorded under `reference` first, then the
    /// provider is asked to fund the wallet's virtual account and to verify
    /// the charge, each call bounded by `deadline`. Only a verified success
    /// for the exact amount credits the wallet. A timeout leaves the
    /// transaction pending for [`LedgerEngine::reconcile_external_reference`];
    /// every other failure marks it failed.
    ///
    /// Repeating the call with the same reference never credits twice.
    #[instrument(skip_all, fields(wallet = %wallet_id, amount = %amount))]
    pub async fn fund_from_external_source(
        &self,
        actor: &Actor,
        wallet_id: WalletId,
        amount: Amount,
        reference: Option<String>,
        deadline: Duration,
    ) -> Result<Transaction> {
        let wallet = self.load_wallet(wallet_id).await?;
        if !actor.is(&wallet.owner) {
            return Err(LedgerError::Unauthorized(format!(
                "{} does not own wallet {}",
                actor.user, wallet.id
            )));
        }
        if wallet.kind != WalletKind::User {
            return Err(LedgerError::InvalidInput(
                "only personal wallets are funded externally".to_string(),
            ));
        }
        let account = wallet.virtual_account.clone().ok_or_else(|| {
            LedgerError::InvalidInput(format!("wallet {} has no linked virtual account", wallet.id))
        })?;

        let now = self.now();
        let reference = reference.unwrap_or_else(|| {
            format!(
                "fund-wallet-{}-{}",
                wallet.owner,
                now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp_micros())
            )
        });

        if let Some(existing) = self.transactions.find_by_external_ref(&reference).await? {
            if existing.to_wallet != wallet.id || existing.amount != amount {
                return Err(LedgerError::InvalidInput(format!(
                    "reference {reference} belongs to a different funding"
                )));
            }
            return match existing.status {
                TransactionStatus::Success => Ok(existing),
                TransactionStatus::Failed => Err(LedgerError::AlreadyProcessed(format!(
                    "funding {reference} already failed"
                ))),
                TransactionStatus::Pending => {
                    self.reconcile_external_reference(&reference, deadline).await
                }
            };
        }

        let mut saga = Saga::begin(self, SagaKey::Funding(reference.clone())).await?;
        let tx = Transaction::external_funding(wallet.id, amount, reference.clone(), now);
        saga.step(
            SagaStep::TransactionRecorded,
            self.transactions.record(tx.clone()),
            Some(Undo::FailTransaction(tx.id)),
        )
        .await?;

        let request = FundingRequest {
            amount,
            reference: reference.clone(),
            currency: self.config.currency.clone(),
            narration: format!("Wallet funding for {}", wallet.owner),
        };
        let receipt = match with_deadline(
            deadline,
            self.gateway.fund_virtual_account(&account.account_id, &request),
        )
        .await
        {
            Ok(receipt) => receipt,
            Err(GatewayError::Timeout) => {
                saga.finish().await;
                warn!(%reference, "funding request timed out, left pending");
                return Err(GatewayError::Timeout.into());
            }
            Err(e) => return Err(saga.abort(e.into()).await),
        };

        self.settle_funding(saga, tx, &receipt.transaction_ref, deadline)
            .await
    }

    /// Resolves a pending external funding by asking the provider for its
    /// outcome. Settled references are returned unchanged.
    #[instrument(skip(self, deadline))]
    pub async fn reconcile_external_reference(
        &self,
        reference: &str,
        deadline: Duration,
    ) -> Result<Transaction> {
        let tx = self.funding_by_reference(reference).await?;
        if tx.status != TransactionStatus::Pending {
            return Ok(tx);
        }

        let mut saga = Saga::begin(self, SagaKey::Funding(reference.to_string())).await?;
        // Re-read under the claim; a concurrent call may have settled it.
        let tx = match self.funding_by_reference(reference).await {
            Ok(tx) => tx,
            Err(e) => return Err(saga.abort(e).await),
        };
        if tx.status != TransactionStatus::Pending {
            saga.finish().await;
            return Ok(tx);
        }
        saga.guard(Undo::FailTransaction(tx.id));
        self.settle_funding(saga, tx, reference, deadline).await
    }

    pub(crate) async fn funding_by_reference(&self, reference: &str) -> Result<Transaction> {
        self.transactions
            .find_by_external_ref(reference)
            .await?
            .ok_or_else(|| LedgerError::not_found(Entity::Transaction, reference))
    }

    /// Verifies the charge behind `provider_ref` and credits the wallet if it
    /// settled for the recorded amount. Expects the saga to already hold the
    /// compensation that fails `tx`.
    pub(crate) async fn settle_funding(
        &self,
        mut saga: Saga<'_>,
        tx: Transaction,
        provider_ref: &str,
        deadline: Duration,
    ) -> Result<Transaction> {
        let verification =
            match with_deadline(deadline, self.gateway.verify_transaction(provider_ref)).await {
                Ok(verification) => verification,
                Err(GatewayError::Timeout) => {
                    saga.finish().await;
                    warn!(transaction = %tx.id, "verification timed out, left pending");
                    return Err(GatewayError::Timeout.into());
                }
                Err(e) => return Err(saga.abort(e.into()).await),
            };

        match verification.status {
            SettlementStatus::Pending => {
                saga.finish().await;
                info!(transaction = %tx.id, "charge not settled yet");
                return Ok(tx);
            }
            SettlementStatus::Failed => {
                let cause = GatewayError::Declined("provider reported the charge as failed".into());
                return Err(saga.abort(cause.into()).await);
            }
            SettlementStatus::Successful if !verification.confirms(tx.amount) => {
                let cause = LedgerError::InvalidInput(format!(
                    "provider settled {} but {} was requested",
                    verification.amount, tx.amount
                ));
                return Err(saga.abort(cause).await);
            }
            SettlementStatus::Successful => {}
        }

        let wallet = match self.load_wallet(tx.to_wallet).await {
            Ok(wallet) => wallet,
            Err(e) => return Err(saga.abort(e).await),
        };
        saga.step(
            SagaStep::DestinationCredited,
            self.wallets.credit(wallet.id, tx.amount),
            Some(Undo::Debit(wallet.id, tx.amount)),
        )
        .await?;
        let settled = saga
            .step(
                SagaStep::TransactionSettled,
                self.transactions.transition(tx.id, TransactionStatus::Success),
                None,
            )
            .await?;
        saga.finish().await;

        info!(transaction = %settled.id, wallet = %wallet.id, "wallet funded");
        self.notify(
            &wallet.owner,
            LedgerEvent::WalletFunded {
                amount: settled.amount,
                transaction: settled.id,
            },
        )
        .await;
        Ok(settled)
    }
}

#[cfg(test)]
mod tests {
    use crate::application::engine::LedgerEngine;
    use crate::config::LedgerConfig;
    use crate::domain::auth::Actor;
    use crate::domain::money::{Amount, Balance};
    use crate::domain::payment::SettlementStatus;
    use crate::domain::ports::Stores;
    use crate::domain::transaction::TransactionStatus;
    use crate::error::{GatewayError, LedgerError};
    use crate::infrastructure::gateway::{SandboxBehaviour, SandboxGateway};
    use crate::infrastructure::notifier::RecordingNotifier;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const DEADLINE: Duration = Duration::from_millis(100);

    fn engine(gateway: &SandboxGateway) -> LedgerEngine {
        LedgerEngine::new(
            Stores::in_memory(),
            Box::new(gateway.clone()),
            Box::new(RecordingNotifier::new()),
            LedgerConfig::default(),
        )
    }

    fn amount() -> Amount {
        Amount::new(dec!(2500)).unwrap()
    }

    #[tokio::test]
    async fn test_repeated_reference_credits_once() {
        let gateway = SandboxGateway::new();
        let engine = engine(&gateway);
        let ada = Actor::member("ada");
        let wallet = engine.open_user_wallet(&ada).await.unwrap();

        let first = engine
            .fund_from_external_source(&ada, wallet.id, amount(), Some("ref-1".into()), DEADLINE)
            .await
            .unwrap();
        let second = engine
            .fund_from_external_source(&ada, wallet.id, amount(), Some("ref-1".into()), DEADLINE)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.status, TransactionStatus::Success);
        assert_eq!(gateway.funding_calls().await, 1);
        assert_eq!(
            engine.load_wallet(wallet.id).await.unwrap().balance,
            Balance::new(dec!(2500)).unwrap()
        );
    }

    #[tokio::test]
    async fn test_declined_funding_marks_failed() {
        let gateway = SandboxGateway::new();
        let engine = engine(&gateway);
        let ada = Actor::member("ada");
        let wallet = engine.open_user_wallet(&ada).await.unwrap();
        gateway
            .set_behaviour(SandboxBehaviour {
                fail_funding: Some(GatewayError::Declined("card blocked".into())),
                ..SandboxBehaviour::default()
            })
            .await;

        let err = engine
            .fund_from_external_source(&ada, wallet.id, amount(), Some("ref-2".into()), DEADLINE)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Gateway(GatewayError::Declined(_))));

        let tx = engine.funding_by_reference("ref-2").await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(engine.load_wallet(wallet.id).await.unwrap().balance, Balance::ZERO);

        // A failed reference is final.
        let again = engine
            .fund_from_external_source(&ada, wallet.id, amount(), Some("ref-2".into()), DEADLINE)
            .await
            .unwrap_err();
        assert!(matches!(again, LedgerError::AlreadyProcessed(_)));
    }

    #[tokio::test]
    async fn test_amount_mismatch_is_not_credited() {
        let gateway = SandboxGateway::with_behaviour(SandboxBehaviour {
            verified_amount: Some(dec!(2499)),
            ..SandboxBehaviour::default()
        });
        let engine = engine(&gateway);
        let ada = Actor::member("ada");
        let wallet = engine.open_user_wallet(&ada).await.unwrap();

        let err = engine
            .fund_from_external_source(&ada, wallet.id, amount(), Some("ref-3".into()), DEADLINE)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
        assert_eq!(
            engine.funding_by_reference("ref-3").await.unwrap().status,
            TransactionStatus::Failed
        );
        assert_eq!(engine.load_wallet(wallet.id).await.unwrap().balance, Balance::ZERO);
    }

    #[tokio::test]
    async fn test_verification_timeout_is_reconciled_later() {
        let gateway = SandboxGateway::with_behaviour(SandboxBehaviour {
            verification_delay: Some(Duration::from_millis(500)),
            ..SandboxBehaviour::default()
        });
        let engine = engine(&gateway);
        let ada = Actor::member("ada");
        let wallet = engine.open_user_wallet(&ada).await.unwrap();

        let err = engine
            .fund_from_external_source(&ada, wallet.id, amount(), Some("ref-4".into()), DEADLINE)
            .await
            .unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(
            engine.funding_by_reference("ref-4").await.unwrap().status,
            TransactionStatus::Pending
        );
        assert!(engine.unsettled_operations().await.unwrap().is_empty());

        gateway.set_behaviour(SandboxBehaviour::default()).await;
        let settled = engine
            .reconcile_external_reference("ref-4", DEADLINE)
            .await
            .unwrap();
        assert_eq!(settled.status, TransactionStatus::Success);
        assert_eq!(
            engine.load_wallet(wallet.id).await.unwrap().balance,
            Balance::new(dec!(2500)).unwrap()
        );
        assert_eq!(gateway.funding_calls().await, 1);
    }

    #[tokio::test]
    async fn test_unsettled_charge_stays_pending() {
        let gateway = SandboxGateway::with_behaviour(SandboxBehaviour {
            settle_as: SettlementStatus::Pending,
            ..SandboxBehaviour::default()
        });
        let engine = engine(&gateway);
        let ada = Actor::member("ada");
        let wallet = engine.open_user_wallet(&ada).await.unwrap();

        let tx = engine
            .fund_from_external_source(&ada, wallet.id, amount(), Some("ref-5".into()), DEADLINE)
            .await
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);

        gateway.settle("ref-5", SettlementStatus::Successful).await;
        let tx = engine
            .fund_from_external_source(&ada, wallet.id, amount(), Some("ref-5".into()), DEADLINE)
            .await
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(
            engine.load_wallet(wallet.id).await.unwrap().balance,
            Balance::new(dec!(2500)).unwrap()
        );
    }

    #[tokio::test]
    async fn test_overflowing_credit_fails_the_funding() {
        let gateway = SandboxGateway::new();
        let engine = engine(&gateway);
        let ada = Actor::member("ada");
        let wallet = engine.open_user_wallet(&ada).await.unwrap();
        let max = Amount::new(Decimal::MAX).unwrap();

        engine
            .fund_from_external_source(&ada, wallet.id, max, Some("ref-a".into()), DEADLINE)
            .await
            .unwrap();
        let err = engine
            .fund_from_external_source(&ada, wallet.id, max, Some("ref-b".into()), DEADLINE)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));

        assert_eq!(
            engine.funding_by_reference("ref-b").await.unwrap().status,
            TransactionStatus::Failed
        );
        assert_eq!(
            engine.load_wallet(wallet.id).await.unwrap().balance,
            Balance::new(Decimal::MAX).unwrap()
        );
        assert!(engine.unsettled_operations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_only_owner_may_fund() {
        let gateway = SandboxGateway::new();
        let engine = engine(&gateway);
        let wallet = engine.open_user_wallet(&Actor::member("ada")).await.unwrap();

        let err = engine
            .fund_from_external_source(&Actor::member("bo"), wallet.id, amount(), None, DEADLINE)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized(_)));
        assert_eq!(gateway.funding_calls().await, 0);
    }
}
