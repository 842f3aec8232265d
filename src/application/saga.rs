use super::engine::LedgerEngine;
use crate::domain::ids::{TransactionId, WalletId};
use crate::domain::money::Amount;
use crate::domain::saga::{SagaKey, SagaRecord, SagaStep};
use crate::domain::transaction::TransactionStatus;
use crate::error::{LedgerError, Result};
use std::future::Future;
use tracing::{error, warn};

/// Reverses one completed step.
#[derive(Debug, Clone)]
pub(crate) enum Undo {
    /// Returns funds taken from a wallet.
    Credit(WalletId, Amount),
    /// Takes back funds given to a wallet.
    Debit(WalletId, Amount),
    FailTransaction(TransactionId),
}

/// A journaled multi-step operation.
///
/// Each step either completes and is checkpointed in the journal, or fails
/// and triggers compensation of every earlier step in the order they ran.
/// A step without compensation, like [`Saga::commit`], is a point of no
/// return: nothing before it is compensated any more and later failures
/// leave the journal entry open, surfacing as `Inconsistent`.
///
/// Checkpoints only trail the work. A checkpoint that cannot be written is
/// logged and the operation carries on, since the step it describes has
/// already happened.
pub(crate) struct Saga<'a> {
    engine: &'a LedgerEngine,
    key: SagaKey,
    undo: Vec<Undo>,
    irreversible: bool,
}

impl<'a> Saga<'a> {
    /// Claims `key`. Fails with `AlreadyProcessed` while another call holds it.
    pub(crate) async fn begin(engine: &'a LedgerEngine, key: SagaKey) -> Result<Saga<'a>> {
        engine
            .sagas
            .begin(SagaRecord::new(key.clone(), engine.now()))
            .await?;
        Ok(Self {
            engine,
            key,
            undo: Vec::new(),
            irreversible: false,
        })
    }

    /// Registers compensation for work done before the saga began.
    pub(crate) fn guard(&mut self, undo: Undo) {
        self.undo.push(undo);
    }

    /// Runs `action`; compensates everything so far if it fails.
    ///
    /// Without an `undo`, a successful `action` cannot be taken back and the
    /// saga is past its point of no return.
    pub(crate) async fn step<T, F>(&mut self, step: SagaStep, action: F, undo: Option<Undo>) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let value = match action.await {
            Ok(value) => value,
            Err(e) => return Err(self.fail(e).await),
        };
        match undo {
            Some(undo) => self.undo.push(undo),
            None => self.pass_point_of_no_return(),
        }
        self.checkpoint(step).await;
        Ok(value)
    }

    /// Runs `action` past the point where compensation is possible.
    pub(crate) async fn commit<T, F>(&mut self, step: SagaStep, action: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.pass_point_of_no_return();
        let value = match action.await {
            Ok(value) => value,
            Err(e) => return Err(self.strand(e).await),
        };
        self.checkpoint(step).await;
        Ok(value)
    }

    /// Compensates and releases the key, handing back `cause` (or
    /// `Inconsistent` if compensation itself failed or is no longer possible).
    pub(crate) async fn abort(mut self, cause: LedgerError) -> LedgerError {
        self.fail(cause).await
    }

    /// Closes the journal entry without compensating anything.
    pub(crate) async fn finish(self) {
        self.close().await;
    }

    fn pass_point_of_no_return(&mut self) {
        self.undo.clear();
        self.irreversible = true;
    }

    async fn checkpoint(&self, step: SagaStep) {
        if let Err(e) = self.engine.sagas.advance(&self.key, step).await {
            warn!(key = %self.key, %step, error = %e, "could not checkpoint step");
        }
    }

    async fn fail(&mut self, cause: LedgerError) -> LedgerError {
        if self.irreversible {
            self.strand(cause).await
        } else {
            self.unwind(cause).await
        }
    }

    async fn unwind(&mut self, cause: LedgerError) -> LedgerError {
        let undo = std::mem::take(&mut self.undo);
        if !undo.is_empty() {
            if let Err(e) = self
                .engine
                .sagas
                .advance(&self.key, SagaStep::Compensating)
                .await
            {
                warn!(key = %self.key, error = %e, "could not checkpoint compensation");
            }
            warn!(key = %self.key, cause = %cause, steps = undo.len(), "compensating");
        }

        for action in &undo {
            if let Err(e) = self.apply(action).await {
                return self
                    .strand(LedgerError::Inconsistent(format!(
                        "{cause}; compensation {action:?} failed: {e}"
                    )))
                    .await;
            }
        }

        self.close().await;
        cause
    }

    async fn apply(&self, undo: &Undo) -> Result<()> {
        match undo {
            Undo::Credit(wallet, amount) => {
                self.engine.wallets.credit(*wallet, *amount).await?;
            }
            Undo::Debit(wallet, amount) => {
                self.engine.wallets.debit(*wallet, *amount).await?;
            }
            Undo::FailTransaction(id) => {
                self.engine
                    .transactions
                    .transition(*id, TransactionStatus::Failed)
                    .await?;
            }
        }
        Ok(())
    }

    /// Leaves the journal entry open for manual reconciliation.
    async fn strand(&mut self, cause: LedgerError) -> LedgerError {
        self.undo.clear();
        if let Err(e) = self.engine.sagas.fail(&self.key, cause.to_string()).await {
            warn!(key = %self.key, error = %e, "could not record journal failure");
        }
        error!(key = %self.key, cause = %cause, "operation left unsettled");
        match cause {
            LedgerError::Inconsistent(_) => cause,
            other => LedgerError::Inconsistent(format!("{}: {other}", self.key)),
        }
    }

    async fn close(&self) {
        if let Err(e) = self.engine.sagas.finish(&self.key).await {
            error!(key = %self.key, error = %e, "journal entry left open");
        }
    }
}
