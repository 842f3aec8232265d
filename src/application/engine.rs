use super::saga::{Saga, Undo};
use crate::config::LedgerConfig;
use crate::domain::approval::{Approval, Decision};
use crate::domain::auth::Actor;
use crate::domain::event::LedgerEvent;
use crate::domain::group::Group;
use crate::domain::ids::{ApprovalId, GroupId, UserId, WalletId};
use crate::domain::money::Amount;
use crate::domain::ports::{
    ApprovalStoreBox, ClockBox, CollectionStoreBox, GroupStoreBox, NotifierBox,
    PaymentGatewayBox, SagaStoreBox, Stores, TransactionLogBox, WalletStoreBox,
};
use crate::domain::saga::{SagaKey, SagaRecord, SagaStep};
use crate::domain::transaction::{PaymentMethod, Transaction, TransactionStatus};
use crate::domain::wallet::Wallet;
use crate::error::{Entity, GatewayError, LedgerError, Result};
use crate::infrastructure::clock::SystemClock;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Everything an approval decision acts on, read under the payout claim.
struct PayoutPlan {
    tx: Transaction,
    source: WalletId,
    recipient: Wallet,
    member: UserId,
    group: Group,
}

/// The wallet ledger and payout approval engine.
///
/// Every operation runs as an independent unit of work; the engine holds no
/// lock of its own. Balance safety comes from the wallet store's atomic
/// credit and debit, and multi-step consistency from the saga journal.
pub struct LedgerEngine {
    pub(crate) wallets: WalletStoreBox,
    pub(crate) transactions: TransactionLogBox,
    pub(crate) approvals: ApprovalStoreBox,
    pub(crate) groups: GroupStoreBox,
    pub(crate) collections: CollectionStoreBox,
    pub(crate) sagas: SagaStoreBox,
    pub(crate) gateway: PaymentGatewayBox,
    notifier: NotifierBox,
    clock: ClockBox,
    pub(crate) config: LedgerConfig,
}

impl LedgerEngine {
    pub fn new(
        stores: Stores,
        gateway: PaymentGatewayBox,
        notifier: NotifierBox,
        config: LedgerConfig,
    ) -> Self {
        Self {
            wallets: stores.wallets,
            transactions: stores.transactions,
            approvals: stores.approvals,
            groups: stores.groups,
            collections: stores.collections,
            sagas: stores.sagas,
            gateway,
            notifier,
            clock: Box::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: ClockBox) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Best effort: a failed delivery is logged and never undoes the
    /// operation that produced the event.
    pub(crate) async fn notify(&self, user: &UserId, event: LedgerEvent) {
        let kind = event.kind();
        if let Err(e) = self.notifier.emit(user, event).await {
            warn!(%user, %kind, error = %e, "notification not delivered");
        }
    }

    pub(crate) async fn load_group(&self, id: GroupId) -> Result<Group> {
        self.groups
            .get(id)
            .await?
            .ok_or_else(|| LedgerError::not_found(Entity::Group, id))
    }

    pub(crate) async fn load_wallet(&self, id: WalletId) -> Result<Wallet> {
        self.wallets
            .get(id)
            .await?
            .ok_or_else(|| LedgerError::not_found(Entity::Wallet, id))
    }

    pub(crate) async fn personal_wallet(&self, user: &UserId) -> Result<Wallet> {
        self.wallets
            .find_personal(user)
            .await?
            .ok_or_else(|| LedgerError::not_found(Entity::Wallet, format!("personal wallet of {user}")))
    }

    /// Moves `amount` from the contributor's personal wallet into the group wallet.
    ///
    /// The contributor must be a member in either set and pay exactly the
    /// group's cycle amount. A contribution after the collection deadline is
    /// still accepted; the penalty is only reported.
    #[instrument(skip_all, fields(group = %group_id, member = %actor.user, amount = %amount))]
    pub async fn contribute(
        &self,
        actor: &Actor,
        group_id: GroupId,
        amount: Amount,
        method: PaymentMethod,
    ) -> Result<Transaction> {
        let member = &actor.user;
        let group = self.load_group(group_id).await?;
        if !group.membership.contains(member) {
            return Err(LedgerError::NotMember(member.clone()));
        }
        if amount != group.amount {
            return Err(LedgerError::InvalidInput(format!(
                "contribution of {amount} does not match the group amount of {}",
                group.amount
            )));
        }
        let source = self.personal_wallet(member).await?;
        let destination = self.load_wallet(group.wallet).await?;
        if !source.balance.covers(amount) {
            return Err(LedgerError::InsufficientFunds {
                wallet: source.id,
                balance: source.balance,
                requested: amount,
            });
        }

        let now = self.now();
        let tx = Transaction::contribution(source.id, destination.id, amount, method, group.id, now);
        let mut saga = Saga::begin(self, SagaKey::Contribution(tx.id)).await?;
        saga.step(
            SagaStep::SourceDebited,
            self.wallets.debit(source.id, amount),
            Some(Undo::Credit(source.id, amount)),
        )
        .await?;
        saga.step(
            SagaStep::DestinationCredited,
            self.wallets.credit(destination.id, amount),
            Some(Undo::Debit(destination.id, amount)),
        )
        .await?;
        saga.step(
            SagaStep::TransactionRecorded,
            self.transactions.record(tx.clone()),
            None,
        )
        .await?;
        saga.finish().await;

        info!(transaction = %tx.id, "contribution recorded");
        self.notify(
            member,
            LedgerEvent::ContributionRecorded {
                group: group.id,
                group_name: group.name.clone(),
                amount,
                transaction: tx.id,
            },
        )
        .await;
        if now > group.collection_deadline {
            self.notify(
                member,
                LedgerEvent::LateContribution {
                    group: group.id,
                    group_name: group.name,
                    penalty: group.penalty,
                },
            )
            .await;
        }
        Ok(tx)
    }

    /// Records a pending payout to `target` and the approval gating it.
    /// No balance moves until the approval is decided.
    #[instrument(skip_all, fields(group = %group_id, target = %target, amount = %amount))]
    pub async fn request_payout(
        &self,
        actor: &Actor,
        group_id: GroupId,
        target: &UserId,
        amount: Amount,
        method: PaymentMethod,
    ) -> Result<Approval> {
        let group = self.load_group(group_id).await?;
        if !group.is_admin(&actor.user) {
            return Err(LedgerError::Unauthorized(format!(
                "{} is not the admin of group {}",
                actor.user, group.id
            )));
        }
        if !group.membership.is_pending(target) {
            return Err(LedgerError::NotMember(target.clone()));
        }
        let recipient = self.personal_wallet(target).await?;
        let pool = self.load_wallet(group.wallet).await?;
        if !pool.balance.covers(amount) {
            return Err(LedgerError::InsufficientFunds {
                wallet: pool.id,
                balance: pool.balance,
                requested: amount,
            });
        }

        let now = self.now();
        let tx = Transaction::payout(pool.id, recipient.id, amount, method, group.id, now);
        self.transactions.record(tx.clone()).await?;

        let approval = Approval::new(tx.id, group.id, group.admin.clone(), now);
        if let Err(e) = self.approvals.create(approval.clone()).await {
            if let Err(undo) = self.transactions.delete(tx.id).await {
                return Err(LedgerError::Inconsistent(format!(
                    "payout {} has no approval and could not be deleted: {e}; {undo}",
                    tx.id
                )));
            }
            return Err(e);
        }

        info!(transaction = %tx.id, approval = %approval.id, "payout requested");
        self.notify(
            target,
            LedgerEvent::PayoutRequested {
                group: group.id,
                group_name: group.name,
                amount,
            },
        )
        .await;
        Ok(approval)
    }

    /// Applies the approver's decision to a pending payout.
    ///
    /// Approving moves the funds, settles the transaction, moves the member to
    /// the collected set and only then marks the approval approved, so a
    /// settlement that fails and is compensated leaves the approval pending
    /// and retriable. Rejecting moves no funds and fails the transaction.
    #[instrument(skip_all, fields(approval = %approval_id, approver = %actor.user, decision = ?decision))]
    pub async fn approve_payout(
        &self,
        actor: &Actor,
        approval_id: ApprovalId,
        decision: Decision,
    ) -> Result<Approval> {
        let approval = self.approval(approval_id).await?;
        approval.authorize(&actor.user)?;

        let mut saga = Saga::begin(self, SagaKey::Payout(approval.id)).await?;
        // Re-read under the claim: another approver call may have finished
        // between the first read and the claim.
        let PayoutPlan {
            tx,
            source,
            recipient,
            member,
            group,
        } = match self.plan_payout(approval.id, decision).await {
            Ok(plan) => plan,
            Err(e) => return Err(saga.abort(e).await),
        };

        let decided = match decision {
            Decision::Approve => {
                saga.step(
                    SagaStep::SourceDebited,
                    self.wallets.debit(source, tx.amount),
                    Some(Undo::Credit(source, tx.amount)),
                )
                .await?;
                saga.step(
                    SagaStep::DestinationCredited,
                    self.wallets.credit(recipient.id, tx.amount),
                    Some(Undo::Debit(recipient.id, tx.amount)),
                )
                .await?;
                saga.step(
                    SagaStep::TransactionSettled,
                    self.transactions.transition(tx.id, TransactionStatus::Success),
                    None,
                )
                .await?;
                saga.commit(
                    SagaStep::MembershipUpdated,
                    self.groups.mark_collected(group.id, &member),
                )
                .await?;
                saga.commit(
                    SagaStep::ApprovalDecided,
                    self.approvals.decide(approval.id, Decision::Approve),
                )
                .await?
            }
            Decision::Reject => {
                let decided = saga
                    .step(
                        SagaStep::ApprovalDecided,
                        self.approvals.decide(approval.id, Decision::Reject),
                        None,
                    )
                    .await?;
                saga.commit(
                    SagaStep::TransactionSettled,
                    self.transactions.transition(tx.id, TransactionStatus::Failed),
                )
                .await?;
                decided
            }
        };
        saga.finish().await;

        let event = match decision {
            Decision::Approve => {
                info!(transaction = %tx.id, %member, "payout approved");
                LedgerEvent::PayoutApproved {
                    group: group.id,
                    amount: tx.amount,
                    transaction: tx.id,
                }
            }
            Decision::Reject => {
                info!(transaction = %tx.id, %member, "payout rejected");
                LedgerEvent::PayoutRejected {
                    group: group.id,
                    amount: tx.amount,
                    transaction: tx.id,
                }
            }
        };
        self.notify(&member, event).await;
        Ok(decided)
    }

    async fn plan_payout(&self, approval_id: ApprovalId, decision: Decision) -> Result<PayoutPlan> {
        let approval = self.approval(approval_id).await?;
        approval.ensure_pending()?;

        let tx = self
            .transactions
            .get(approval.transaction)
            .await?
            .ok_or_else(|| LedgerError::not_found(Entity::Transaction, approval.transaction))?;
        if tx.status != TransactionStatus::Pending {
            return Err(LedgerError::Inconsistent(format!(
                "approval {} is pending but transaction {} is {}",
                approval.id, tx.id, tx.status
            )));
        }
        let source = tx.from_wallet.ok_or_else(|| {
            LedgerError::Inconsistent(format!("payout {} has no source wallet", tx.id))
        })?;
        let recipient = self.load_wallet(tx.to_wallet).await?;
        let member = recipient.owner.clone();
        let group = self.load_group(approval.group).await?;
        if decision == Decision::Approve && !group.membership.is_pending(&member) {
            return Err(LedgerError::NotMember(member));
        }
        Ok(PayoutPlan {
            tx,
            source,
            recipient,
            member,
            group,
        })
    }

    pub async fn approval(&self, id: ApprovalId) -> Result<Approval> {
        self.approvals
            .get(id)
            .await?
            .ok_or_else(|| LedgerError::not_found(Entity::Approval, id))
    }

    /// Approvals still waiting on `actor`, oldest first.
    pub async fn pending_approvals(&self, actor: &Actor) -> Result<Vec<Approval>> {
        self.approvals.pending_for(&actor.user).await
    }

    /// Transactions touching the actor's personal wallet, newest first.
    /// System admins see every transaction.
    pub async fn transactions_for(&self, actor: &Actor) -> Result<Vec<Transaction>> {
        let mut all = self.transactions.get_all().await?;
        if !actor.is_system_admin() {
            let Some(wallet) = self.wallets.find_personal(&actor.user).await? else {
                return Ok(Vec::new());
            };
            all.retain(|tx| tx.touches(wallet.id));
        }
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    /// Transactions touching the group wallet, newest first.
    pub async fn group_transactions(&self, actor: &Actor, group_id: GroupId) -> Result<Vec<Transaction>> {
        let group = self.load_group(group_id).await?;
        if !group.is_participant(&actor.user) && !actor.is_system_admin() {
            return Err(LedgerError::Unauthorized(format!(
                "{} is not part of group {}",
                actor.user, group.id
            )));
        }
        let mut txs = self.transactions.get_all().await?;
        txs.retain(|tx| tx.touches(group.wallet));
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(txs)
    }

    pub async fn wallets(&self) -> Result<Vec<Wallet>> {
        self.wallets.get_all().await
    }

    /// Journal entries of operations that stopped without completing or
    /// being undone.
    pub async fn unsettled_operations(&self) -> Result<Vec<SagaRecord>> {
        self.sagas.open().await
    }
}

/// Runs one payment gateway call under `deadline`.
pub(crate) async fn with_deadline<T, F>(deadline: Duration, call: F) -> std::result::Result<T, GatewayError>
where
    F: Future<Output = std::result::Result<T, GatewayError>>,
{
    tokio::time::timeout(deadline, call)
        .await
        .unwrap_or(Err(GatewayError::Timeout))
}
