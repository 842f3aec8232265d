use crate::domain::approval::{Approval, ApprovalStatus, Decision};
use crate::domain::collection::Collection;
use crate::domain::group::{Group, GroupSettings};
use crate::domain::ids::{ApprovalId, CollectionId, GroupId, TransactionId, UserId, WalletId};
use crate::domain::money::Amount;
use crate::domain::ports::{
    ApprovalStore, CollectionStore, GroupStore, SagaStore, Stores, TransactionLog, WalletStore,
};
use crate::domain::saga::{SagaKey, SagaRecord, SagaStep};
use crate::domain::transaction::{Transaction, TransactionStatus};
use crate::domain::wallet::{VirtualAccount, Wallet, WalletKind};
use crate::error::{Entity, LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory wallet store.
///
/// Balance changes happen under the map's write lock, so each credit or
/// debit is a single indivisible read-modify-write.
#[derive(Default, Clone)]
pub struct InMemoryWalletStore {
    wallets: Arc<RwLock<HashMap<WalletId, Wallet>>>,
}

impl InMemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletStore for InMemoryWalletStore {
    async fn create(&self, wallet: Wallet) -> Result<()> {
        let mut wallets = self.wallets.write().await;
        if wallets.contains_key(&wallet.id) {
            return Err(LedgerError::AlreadyProcessed(format!(
                "wallet {} already exists",
                wallet.id
            )));
        }
        if wallet.kind == WalletKind::User
            && wallets
                .values()
                .any(|w| w.kind == WalletKind::User && w.owner == wallet.owner)
        {
            return Err(LedgerError::AlreadyProcessed(format!(
                "{} already owns a personal wallet",
                wallet.owner
            )));
        }
        wallets.insert(wallet.id, wallet);
        Ok(())
    }

    async fn get(&self, id: WalletId) -> Result<Option<Wallet>> {
        let wallets = self.wallets.read().await;
        Ok(wallets.get(&id).cloned())
    }

    async fn find_personal(&self, owner: &UserId) -> Result<Option<Wallet>> {
        let wallets = self.wallets.read().await;
        Ok(wallets
            .values()
            .find(|w| w.kind == WalletKind::User && &w.owner == owner)
            .cloned())
    }

    async fn credit(&self, id: WalletId, amount: Amount) -> Result<Wallet> {
        let mut wallets = self.wallets.write().await;
        let wallet = wallets
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found(Entity::Wallet, id))?;
        wallet.credit(amount, Utc::now())?;
        Ok(wallet.clone())
    }

    async fn debit(&self, id: WalletId, amount: Amount) -> Result<Wallet> {
        let mut wallets = self.wallets.write().await;
        let wallet = wallets
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found(Entity::Wallet, id))?;
        wallet.debit(amount, Utc::now())?;
        Ok(wallet.clone())
    }

    async fn set_virtual_account(
        &self,
        id: WalletId,
        account: Option<VirtualAccount>,
    ) -> Result<()> {
        let mut wallets = self.wallets.write().await;
        let wallet = wallets
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found(Entity::Wallet, id))?;
        wallet.virtual_account = account;
        wallet.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: WalletId) -> Result<()> {
        let mut wallets = self.wallets.write().await;
        wallets
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| LedgerError::not_found(Entity::Wallet, id))
    }

    async fn get_all(&self) -> Result<Vec<Wallet>> {
        let wallets = self.wallets.read().await;
        Ok(wallets.values().cloned().collect())
    }
}

#[derive(Default)]
struct TransactionTable {
    by_id: HashMap<TransactionId, Transaction>,
    by_reference: HashMap<String, TransactionId>,
}

/// A thread-safe in-memory transaction log with an external-reference index.
#[derive(Default, Clone)]
pub struct InMemoryTransactionLog {
    table: Arc<RwLock<TransactionTable>>,
}

impl InMemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionLog for InMemoryTransactionLog {
    async fn record(&self, tx: Transaction) -> Result<TransactionId> {
        if tx.status == TransactionStatus::Failed {
            return Err(LedgerError::InvalidInput(
                "transactions are recorded as pending or success".to_string(),
            ));
        }
        let mut table = self.table.write().await;
        if table.by_id.contains_key(&tx.id) {
            return Err(LedgerError::AlreadyProcessed(format!(
                "transaction {} already recorded",
                tx.id
            )));
        }
        if let Some(reference) = &tx.external_reference {
            if table.by_reference.contains_key(reference) {
                return Err(LedgerError::AlreadyProcessed(format!(
                    "external reference {reference} already recorded"
                )));
            }
            table.by_reference.insert(reference.clone(), tx.id);
        }
        let id = tx.id;
        table.by_id.insert(id, tx);
        Ok(id)
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let table = self.table.read().await;
        Ok(table.by_id.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<Transaction> {
        let mut table = self.table.write().await;
        let tx = table
            .by_id
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found(Entity::Transaction, id))?;
        tx.transition(status, Utc::now())?;
        Ok(tx.clone())
    }

    async fn find_by_external_ref(&self, reference: &str) -> Result<Option<Transaction>> {
        let table = self.table.read().await;
        Ok(table
            .by_reference
            .get(reference)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn delete(&self, id: TransactionId) -> Result<()> {
        let mut table = self.table.write().await;
        let tx = table
            .by_id
            .get(&id)
            .ok_or_else(|| LedgerError::not_found(Entity::Transaction, id))?;
        if tx.status != TransactionStatus::Pending {
            return Err(LedgerError::AlreadyProcessed(format!(
                "transaction {id} is {} and cannot be deleted",
                tx.status
            )));
        }
        if let Some(tx) = table.by_id.remove(&id)
            && let Some(reference) = tx.external_reference
        {
            table.by_reference.remove(&reference);
        }
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Transaction>> {
        let table = self.table.read().await;
        Ok(table.by_id.values().cloned().collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryApprovalStore {
    approvals: Arc<RwLock<HashMap<ApprovalId, Approval>>>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn create(&self, approval: Approval) -> Result<()> {
        let mut approvals = self.approvals.write().await;
        if approvals
            .values()
            .any(|a| a.transaction == approval.transaction)
        {
            return Err(LedgerError::AlreadyProcessed(format!(
                "transaction {} already has an approval",
                approval.transaction
            )));
        }
        approvals.insert(approval.id, approval);
        Ok(())
    }

    async fn get(&self, id: ApprovalId) -> Result<Option<Approval>> {
        let approvals = self.approvals.read().await;
        Ok(approvals.get(&id).cloned())
    }

    async fn decide(&self, id: ApprovalId, decision: Decision) -> Result<Approval> {
        let mut approvals = self.approvals.write().await;
        let approval = approvals
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found(Entity::Approval, id))?;
        approval.decide(decision, Utc::now())?;
        Ok(approval.clone())
    }

    async fn pending_for(&self, approver: &UserId) -> Result<Vec<Approval>> {
        let approvals = self.approvals.read().await;
        let mut pending: Vec<Approval> = approvals
            .values()
            .filter(|a| &a.approver == approver && a.status == ApprovalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|a| a.created_at);
        Ok(pending)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryGroupStore {
    groups: Arc<RwLock<HashMap<GroupId, Group>>>,
}

impl InMemoryGroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, id: GroupId, change: F) -> Result<Group>
    where
        F: FnOnce(&mut Group) -> Result<()>,
    {
        let mut groups = self.groups.write().await;
        let group = groups
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found(Entity::Group, id))?;
        change(group)?;
        group.updated_at = Utc::now();
        Ok(group.clone())
    }
}

#[async_trait]
impl GroupStore for InMemoryGroupStore {
    async fn create(&self, group: Group) -> Result<()> {
        let mut groups = self.groups.write().await;
        if groups.values().any(|g| g.invite_code == group.invite_code) {
            return Err(LedgerError::InvalidInput(
                "invite code already in use".to_string(),
            ));
        }
        groups.insert(group.id, group);
        Ok(())
    }

    async fn get(&self, id: GroupId) -> Result<Option<Group>> {
        let groups = self.groups.read().await;
        Ok(groups.get(&id).cloned())
    }

    async fn find_by_invite_code(&self, code: &str) -> Result<Option<Group>> {
        let groups = self.groups.read().await;
        Ok(groups.values().find(|g| g.invite_code == code).cloned())
    }

    async fn join(&self, id: GroupId, user: UserId) -> Result<Group> {
        self.update(id, |g| g.membership.join(user)).await
    }

    async fn remove_member(&self, id: GroupId, user: &UserId) -> Result<Group> {
        self.update(id, |g| g.membership.remove(user)).await
    }

    async fn mark_collected(&self, id: GroupId, user: &UserId) -> Result<Group> {
        self.update(id, |g| g.membership.mark_collected(user)).await
    }

    async fn update_settings(&self, id: GroupId, settings: GroupSettings) -> Result<Group> {
        self.update(id, |g| {
            g.apply(settings);
            Ok(())
        })
        .await
    }

    async fn get_all(&self) -> Result<Vec<Group>> {
        let groups = self.groups.read().await;
        Ok(groups.values().cloned().collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryCollectionStore {
    collections: Arc<RwLock<HashMap<CollectionId, Collection>>>,
}

impl InMemoryCollectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CollectionStore for InMemoryCollectionStore {
    async fn create(&self, collection: Collection) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections.insert(collection.id, collection);
        Ok(())
    }

    async fn for_group(&self, group: GroupId) -> Result<Vec<Collection>> {
        let collections = self.collections.read().await;
        let mut found: Vec<Collection> = collections
            .values()
            .filter(|c| c.group == group)
            .cloned()
            .collect();
        found.sort_by_key(|c| c.date);
        Ok(found)
    }

    async fn due_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Collection>> {
        let collections = self.collections.read().await;
        let mut found: Vec<Collection> = collections
            .values()
            .filter(|c| c.date >= from && c.date < until)
            .cloned()
            .collect();
        found.sort_by_key(|c| c.date);
        Ok(found)
    }
}

#[derive(Default, Clone)]
pub struct InMemorySagaStore {
    records: Arc<RwLock<BTreeMap<SagaKey, SagaRecord>>>,
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn begin(&self, record: SagaRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.key) {
            return Err(LedgerError::AlreadyProcessed(format!(
                "{} is already in flight",
                record.key
            )));
        }
        records.insert(record.key.clone(), record);
        Ok(())
    }

    async fn advance(&self, key: &SagaKey, step: SagaStep) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(key).ok_or_else(|| {
            LedgerError::Inconsistent(format!("journal entry {key} disappeared"))
        })?;
        record.step = step;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn fail(&self, key: &SagaKey, reason: String) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(key).ok_or_else(|| {
            LedgerError::Inconsistent(format!("journal entry {key} disappeared"))
        })?;
        record.failure = Some(reason);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn finish(&self, key: &SagaKey) -> Result<()> {
        let mut records = self.records.write().await;
        records.remove(key);
        Ok(())
    }

    async fn open(&self) -> Result<Vec<SagaRecord>> {
        let records = self.records.read().await;
        Ok(records.values().cloned().collect())
    }
}

impl Stores {
    /// Fresh, empty in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            wallets: Box::new(InMemoryWalletStore::new()),
            transactions: Box::new(InMemoryTransactionLog::new()),
            approvals: Box::new(InMemoryApprovalStore::new()),
            groups: Box::new(InMemoryGroupStore::new()),
            collections: Box::new(InMemoryCollectionStore::new()),
            sagas: Box::new(InMemorySagaStore::new()),
        }
    }
}
