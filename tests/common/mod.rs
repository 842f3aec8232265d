#![allow(dead_code)]

use ajo_ledger::application::engine::LedgerEngine;
use ajo_ledger::config::LedgerConfig;
use ajo_ledger::domain::approval::{Approval, Decision};
use ajo_ledger::domain::auth::Actor;
use ajo_ledger::domain::group::{ContributionType, Cycle, Group, GroupSettings, NewGroup};
use ajo_ledger::domain::ids::{ApprovalId, GroupId, TransactionId, UserId, WalletId};
use ajo_ledger::domain::money::{Amount, Balance};
use ajo_ledger::domain::ports::{
    ApprovalStore, GroupStore, SagaStore, Stores, TransactionLog, WalletStore,
};
use ajo_ledger::domain::saga::{SagaKey, SagaRecord, SagaStep};
use ajo_ledger::domain::transaction::{Transaction, TransactionStatus};
use ajo_ledger::domain::wallet::{VirtualAccount, Wallet};
use ajo_ledger::error::{LedgerError, Result};
use ajo_ledger::infrastructure::clock::FixedClock;
use ajo_ledger::infrastructure::gateway::SandboxGateway;
use ajo_ledger::infrastructure::in_memory::{
    InMemoryApprovalStore, InMemoryCollectionStore, InMemoryGroupStore, InMemorySagaStore,
    InMemoryTransactionLog, InMemoryWalletStore,
};
use ajo_ledger::infrastructure::notifier::RecordingNotifier;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEADLINE: Duration = Duration::from_secs(1);

pub fn amount(value: Decimal) -> Amount {
    Amount::new(value).unwrap()
}

pub fn balance(value: Decimal) -> Balance {
    Balance::new(value).unwrap()
}

/// Friday 2026-10-16 09:00 UTC.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()
}

fn injected() -> LedgerError {
    LedgerError::Io(std::io::Error::other("injected fault"))
}

/// Switches shared by the failure-injecting stores.
#[derive(Clone, Default)]
pub struct Faults {
    credits_to: Arc<Mutex<HashSet<WalletId>>>,
    debits_from: Arc<Mutex<HashSet<WalletId>>>,
    record: Arc<AtomicBool>,
    transition: Arc<AtomicBool>,
    approval_create: Arc<AtomicBool>,
    decide: Arc<AtomicBool>,
    mark_collected: Arc<AtomicBool>,
    checkpoint: Arc<Mutex<Option<SagaStep>>>,
}

impl Faults {
    pub fn fail_credits_to(&self, wallet: WalletId) {
        self.credits_to.lock().unwrap().insert(wallet);
    }

    pub fn fail_debits_from(&self, wallet: WalletId) {
        self.debits_from.lock().unwrap().insert(wallet);
    }

    pub fn fail_record(&self, on: bool) {
        self.record.store(on, Ordering::SeqCst);
    }

    pub fn fail_transition(&self, on: bool) {
        self.transition.store(on, Ordering::SeqCst);
    }

    pub fn fail_approval_create(&self, on: bool) {
        self.approval_create.store(on, Ordering::SeqCst);
    }

    pub fn fail_decide(&self, on: bool) {
        self.decide.store(on, Ordering::SeqCst);
    }

    pub fn fail_mark_collected(&self, on: bool) {
        self.mark_collected.store(on, Ordering::SeqCst);
    }

    /// Makes the journal refuse to record `step`.
    pub fn fail_checkpoint(&self, step: SagaStep) {
        *self.checkpoint.lock().unwrap() = Some(step);
    }

    pub fn clear(&self) {
        *self.checkpoint.lock().unwrap() = None;
        self.credits_to.lock().unwrap().clear();
        self.debits_from.lock().unwrap().clear();
        for flag in [
            &self.record,
            &self.transition,
            &self.approval_create,
            &self.decide,
            &self.mark_collected,
        ] {
            flag.store(false, Ordering::SeqCst);
        }
    }
}

pub struct FlakyWalletStore {
    inner: InMemoryWalletStore,
    faults: Faults,
}

#[async_trait]
impl WalletStore for FlakyWalletStore {
    async fn create(&self, wallet: Wallet) -> Result<()> {
        self.inner.create(wallet).await
    }

    async fn get(&self, id: WalletId) -> Result<Option<Wallet>> {
        self.inner.get(id).await
    }

    async fn find_personal(&self, owner: &UserId) -> Result<Option<Wallet>> {
        self.inner.find_personal(owner).await
    }

    async fn credit(&self, id: WalletId, amount: Amount) -> Result<Wallet> {
        if self.faults.credits_to.lock().unwrap().contains(&id) {
            return Err(injected());
        }
        self.inner.credit(id, amount).await
    }

    async fn debit(&self, id: WalletId, amount: Amount) -> Result<Wallet> {
        if self.faults.debits_from.lock().unwrap().contains(&id) {
            return Err(injected());
        }
        self.inner.debit(id, amount).await
    }

    async fn set_virtual_account(
        &self,
        id: WalletId,
        account: Option<VirtualAccount>,
    ) -> Result<()> {
        self.inner.set_virtual_account(id, account).await
    }

    async fn delete(&self, id: WalletId) -> Result<()> {
        self.inner.delete(id).await
    }

    async fn get_all(&self) -> Result<Vec<Wallet>> {
        self.inner.get_all().await
    }
}

pub struct FlakyTransactionLog {
    inner: InMemoryTransactionLog,
    faults: Faults,
}

#[async_trait]
impl TransactionLog for FlakyTransactionLog {
    async fn record(&self, tx: Transaction) -> Result<TransactionId> {
        if self.faults.record.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.record(tx).await
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        self.inner.get(id).await
    }

    async fn transition(
        &self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<Transaction> {
        if self.faults.transition.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.transition(id, status).await
    }

    async fn find_by_external_ref(&self, reference: &str) -> Result<Option<Transaction>> {
        self.inner.find_by_external_ref(reference).await
    }

    async fn delete(&self, id: TransactionId) -> Result<()> {
        self.inner.delete(id).await
    }

    async fn get_all(&self) -> Result<Vec<Transaction>> {
        self.inner.get_all().await
    }
}

pub struct FlakyApprovalStore {
    inner: InMemoryApprovalStore,
    faults: Faults,
}

#[async_trait]
impl ApprovalStore for FlakyApprovalStore {
    async fn create(&self, approval: Approval) -> Result<()> {
        if self.faults.approval_create.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.create(approval).await
    }

    async fn get(&self, id: ApprovalId) -> Result<Option<Approval>> {
        self.inner.get(id).await
    }

    async fn decide(&self, id: ApprovalId, decision: Decision) -> Result<Approval> {
        if self.faults.decide.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.decide(id, decision).await
    }

    async fn pending_for(&self, approver: &UserId) -> Result<Vec<Approval>> {
        self.inner.pending_for(approver).await
    }
}

pub struct FlakyGroupStore {
    inner: InMemoryGroupStore,
    faults: Faults,
}

#[async_trait]
impl GroupStore for FlakyGroupStore {
    async fn create(&self, group: Group) -> Result<()> {
        self.inner.create(group).await
    }

    async fn get(&self, id: GroupId) -> Result<Option<Group>> {
        self.inner.get(id).await
    }

    async fn find_by_invite_code(&self, code: &str) -> Result<Option<Group>> {
        self.inner.find_by_invite_code(code).await
    }

    async fn join(&self, id: GroupId, user: UserId) -> Result<Group> {
        self.inner.join(id, user).await
    }

    async fn remove_member(&self, id: GroupId, user: &UserId) -> Result<Group> {
        self.inner.remove_member(id, user).await
    }

    async fn mark_collected(&self, id: GroupId, user: &UserId) -> Result<Group> {
        if self.faults.mark_collected.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.mark_collected(id, user).await
    }

    async fn update_settings(&self, id: GroupId, settings: GroupSettings) -> Result<Group> {
        self.inner.update_settings(id, settings).await
    }

    async fn get_all(&self) -> Result<Vec<Group>> {
        self.inner.get_all().await
    }
}

pub struct FlakySagaStore {
    inner: InMemorySagaStore,
    faults: Faults,
}

#[async_trait]
impl SagaStore for FlakySagaStore {
    async fn begin(&self, record: SagaRecord) -> Result<()> {
        self.inner.begin(record).await
    }

    async fn advance(&self, key: &SagaKey, step: SagaStep) -> Result<()> {
        if *self.faults.checkpoint.lock().unwrap() == Some(step) {
            return Err(injected());
        }
        self.inner.advance(key, step).await
    }

    async fn fail(&self, key: &SagaKey, reason: String) -> Result<()> {
        self.inner.fail(key, reason).await
    }

    async fn finish(&self, key: &SagaKey) -> Result<()> {
        self.inner.finish(key).await
    }

    async fn open(&self) -> Result<Vec<SagaRecord>> {
        self.inner.open().await
    }
}

fn flaky_stores(faults: &Faults) -> Stores {
    Stores {
        wallets: Box::new(FlakyWalletStore {
            inner: InMemoryWalletStore::new(),
            faults: faults.clone(),
        }),
        transactions: Box::new(FlakyTransactionLog {
            inner: InMemoryTransactionLog::new(),
            faults: faults.clone(),
        }),
        approvals: Box::new(FlakyApprovalStore {
            inner: InMemoryApprovalStore::new(),
            faults: faults.clone(),
        }),
        groups: Box::new(FlakyGroupStore {
            inner: InMemoryGroupStore::new(),
            faults: faults.clone(),
        }),
        collections: Box::new(InMemoryCollectionStore::new()),
        sagas: Box::new(FlakySagaStore {
            inner: InMemorySagaStore::new(),
            faults: faults.clone(),
        }),
    }
}

/// An engine over in-memory stores that can be told to fail, a sandbox
/// gateway, a recording notifier and a settable clock.
pub struct Harness {
    pub engine: LedgerEngine,
    pub gateway: SandboxGateway,
    pub notifier: RecordingNotifier,
    pub clock: FixedClock,
    pub faults: Faults,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        let faults = Faults::default();
        let gateway = SandboxGateway::new();
        let notifier = RecordingNotifier::new();
        let clock = FixedClock::new(start_time());
        let engine = LedgerEngine::new(
            flaky_stores(&faults),
            Box::new(gateway.clone()),
            Box::new(notifier.clone()),
            config,
        )
        .with_clock(Box::new(clock.clone()));
        Self {
            engine,
            gateway,
            notifier,
            clock,
            faults,
        }
    }

    /// Opens a personal wallet for `name` and funds it externally.
    pub async fn funded_member(&self, name: &str, funds: Decimal) -> (Actor, Wallet) {
        let actor = Actor::member(name);
        let wallet = self.engine.open_user_wallet(&actor).await.unwrap();
        if funds > Decimal::ZERO {
            self.engine
                .fund_from_external_source(
                    &actor,
                    wallet.id,
                    amount(funds),
                    Some(format!("seed-{name}")),
                    DEADLINE,
                )
                .await
                .unwrap();
        }
        (actor, wallet)
    }

    pub async fn group(&self, admin: &Actor, per_cycle: Decimal, cycle: Cycle) -> Group {
        self.engine
            .create_group(
                admin,
                NewGroup {
                    name: format!("{}'s circle", admin.user),
                    description: String::new(),
                    kind: ContributionType::GroupContribution,
                    amount: amount(per_cycle),
                    cycle,
                    penalty: Balance::ZERO,
                },
            )
            .await
            .unwrap()
    }

    pub async fn balance_of(&self, wallet: WalletId) -> Balance {
        self.engine
            .wallets()
            .await
            .unwrap()
            .into_iter()
            .find(|w| w.id == wallet)
            .map(|w| w.balance)
            .unwrap()
    }

    pub async fn total_balance(&self) -> Decimal {
        self.engine
            .wallets()
            .await
            .unwrap()
            .iter()
            .map(|w| w.balance.value())
            .sum()
    }
}

/// Writes a command script with `rows` funding commands for one member.
pub fn generate_script(path: &Path, rows: usize) -> std::result::Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record([
        "op", "actor", "group", "member", "amount", "cycle", "penalty", "reference",
    ])?;
    wtr.write_record(["open_wallet", "ada", "", "", "", "", "", ""])?;
    for i in 1..=rows {
        let reference = format!("ref-{i}");
        wtr.write_record(["fund", "ada", "", "", "1.0", "", "", reference.as_str()])?;
    }

    wtr.flush()?;
    Ok(())
}
