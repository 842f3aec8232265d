use crate::domain::approval::{Approval, ApprovalStatus, Decision};
use crate::domain::collection::Collection;
use crate::domain::group::{Group, GroupSettings};
use crate::domain::ids::{ApprovalId, GroupId, TransactionId, UserId, WalletId};
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
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const CF_WALLETS: &str = "wallets";
/// Index: personal wallet owner -> wallet id.
pub const CF_OWNERS: &str = "owners";
pub const CF_TRANSACTIONS: &str = "transactions";
/// Index: external reference -> transaction id.
pub const CF_TX_REFS: &str = "tx_refs";
pub const CF_APPROVALS: &str = "approvals";
pub const CF_GROUPS: &str = "groups";
/// Index: invite code -> group id.
pub const CF_INVITES: &str = "invites";
pub const CF_COLLECTIONS: &str = "collections";
pub const CF_SAGAS: &str = "sagas";

const COLUMN_FAMILIES: [&str; 9] = [
    CF_WALLETS,
    CF_OWNERS,
    CF_TRANSACTIONS,
    CF_TX_REFS,
    CF_APPROVALS,
    CF_GROUPS,
    CF_INVITES,
    CF_COLLECTIONS,
    CF_SAGAS,
];

/// A persistent store implementing every ledger port on top of RocksDB.
///
/// Each record kind lives in its own column family, keyed by the raw UUID
/// bytes of its id. Secondary indexes are kept in dedicated families and
/// written in the same `WriteBatch` as the record they point to.
///
/// RocksDB has no conditional update, so every read-modify-write (balance
/// changes, status transitions, membership edits, insert-if-absent) runs
/// under one process-wide write lock. Reads never take it.
///
/// That lock is only atomic within this process. It is enough because
/// RocksDB's `LOCK` file lets a single process open the database for
/// writing; a second `open` on the same path fails instead of racing.
/// Sharing one ledger between processes would need a `TransactionDB` or a
/// merge operator for balance changes.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path`, creating any missing
    /// column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Boxes this store behind every port.
    pub fn into_stores(self) -> Stores {
        Stores {
            wallets: Box::new(self.clone()),
            transactions: Box::new(self.clone()),
            approvals: Box::new(self.clone()),
            groups: Box::new(self.clone()),
            collections: Box::new(self.clone()),
            sagas: Box::new(self),
        }
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            LedgerError::Storage(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let value = serde_json::to_vec(value)?;
        self.db.put_cf(self.cf(cf)?, key, value)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    /// Resolves an index entry to the primary record it names.
    fn follow<T: DeserializeOwned>(
        &self,
        index: &str,
        index_key: &[u8],
        cf: &str,
    ) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(index)?, index_key)? {
            Some(key) => self.read(cf, &key),
            None => Ok(None),
        }
    }

    async fn update_wallet<F>(&self, id: WalletId, change: F) -> Result<Wallet>
    where
        F: FnOnce(&mut Wallet) -> Result<()>,
    {
        let _guard = self.write_lock.lock().await;
        let key = id.as_uuid().as_bytes();
        let mut wallet: Wallet = self
            .read(CF_WALLETS, key)?
            .ok_or_else(|| LedgerError::not_found(Entity::Wallet, id))?;
        change(&mut wallet)?;
        self.write(CF_WALLETS, key, &wallet)?;
        Ok(wallet)
    }

    async fn update_group<F>(&self, id: GroupId, change: F) -> Result<Group>
    where
        F: FnOnce(&mut Group) -> Result<()>,
    {
        let _guard = self.write_lock.lock().await;
        let key = id.as_uuid().as_bytes();
        let mut group: Group = self
            .read(CF_GROUPS, key)?
            .ok_or_else(|| LedgerError::not_found(Entity::Group, id))?;
        change(&mut group)?;
        group.updated_at = Utc::now();
        self.write(CF_GROUPS, key, &group)?;
        Ok(group)
    }

    async fn update_saga<F>(&self, key: &SagaKey, change: F) -> Result<()>
    where
        F: FnOnce(&mut SagaRecord),
    {
        let _guard = self.write_lock.lock().await;
        let db_key = key.to_string();
        let mut record: SagaRecord = self.read(CF_SAGAS, db_key.as_bytes())?.ok_or_else(|| {
            LedgerError::Inconsistent(format!("journal entry {key} disappeared"))
        })?;
        change(&mut record);
        record.updated_at = Utc::now();
        self.write(CF_SAGAS, db_key.as_bytes(), &record)
    }
}

#[async_trait]
impl WalletStore for RocksDBStore {
    async fn create(&self, wallet: Wallet) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = wallet.id.as_uuid().as_bytes();
        if self.db.get_pinned_cf(self.cf(CF_WALLETS)?, key)?.is_some() {
            return Err(LedgerError::AlreadyProcessed(format!(
                "wallet {} already exists",
                wallet.id
            )));
        }

        let mut batch = WriteBatch::default();
        if wallet.kind == WalletKind::User {
            let owner = wallet.owner.as_str().as_bytes();
            if self.db.get_pinned_cf(self.cf(CF_OWNERS)?, owner)?.is_some() {
                return Err(LedgerError::AlreadyProcessed(format!(
                    "{} already owns a personal wallet",
                    wallet.owner
                )));
            }
            batch.put_cf(self.cf(CF_OWNERS)?, owner, key);
        }
        batch.put_cf(self.cf(CF_WALLETS)?, key, serde_json::to_vec(&wallet)?);
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: WalletId) -> Result<Option<Wallet>> {
        self.read(CF_WALLETS, id.as_uuid().as_bytes())
    }

    async fn find_personal(&self, owner: &UserId) -> Result<Option<Wallet>> {
        self.follow(CF_OWNERS, owner.as_str().as_bytes(), CF_WALLETS)
    }

    async fn credit(&self, id: WalletId, amount: Amount) -> Result<Wallet> {
        self.update_wallet(id, |w| w.credit(amount, Utc::now())).await
    }

    async fn debit(&self, id: WalletId, amount: Amount) -> Result<Wallet> {
        self.update_wallet(id, |w| w.debit(amount, Utc::now())).await
    }

    async fn set_virtual_account(
        &self,
        id: WalletId,
        account: Option<VirtualAccount>,
    ) -> Result<()> {
        self.update_wallet(id, |w| {
            w.virtual_account = account;
            w.updated_at = Utc::now();
            Ok(())
        })
        .await
        .map(|_| ())
    }

    async fn delete(&self, id: WalletId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = id.as_uuid().as_bytes();
        let wallet: Wallet = self
            .read(CF_WALLETS, key)?
            .ok_or_else(|| LedgerError::not_found(Entity::Wallet, id))?;

        let mut batch = WriteBatch::default();
        if wallet.kind == WalletKind::User {
            batch.delete_cf(self.cf(CF_OWNERS)?, wallet.owner.as_str().as_bytes());
        }
        batch.delete_cf(self.cf(CF_WALLETS)?, key);
        self.db.write(batch)?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Wallet>> {
        self.scan(CF_WALLETS)
    }
}

#[async_trait]
impl TransactionLog for RocksDBStore {
    async fn record(&self, tx: Transaction) -> Result<TransactionId> {
        if tx.status == TransactionStatus::Failed {
            return Err(LedgerError::InvalidInput(
                "transactions are recorded as pending or success".to_string(),
            ));
        }
        let _guard = self.write_lock.lock().await;
        let key = tx.id.as_uuid().as_bytes();
        if self.db.get_pinned_cf(self.cf(CF_TRANSACTIONS)?, key)?.is_some() {
            return Err(LedgerError::AlreadyProcessed(format!(
                "transaction {} already recorded",
                tx.id
            )));
        }

        let mut batch = WriteBatch::default();
        if let Some(reference) = &tx.external_reference {
            let index = self.cf(CF_TX_REFS)?;
            if self.db.get_pinned_cf(index, reference.as_bytes())?.is_some() {
                return Err(LedgerError::AlreadyProcessed(format!(
                    "external reference {reference} already recorded"
                )));
            }
            batch.put_cf(index, reference.as_bytes(), key);
        }
        batch.put_cf(self.cf(CF_TRANSACTIONS)?, key, serde_json::to_vec(&tx)?);
        self.db.write(batch)?;
        Ok(tx.id)
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        self.read(CF_TRANSACTIONS, id.as_uuid().as_bytes())
    }

    async fn transition(
        &self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<Transaction> {
        let _guard = self.write_lock.lock().await;
        let key = id.as_uuid().as_bytes();
        let mut tx: Transaction = self
            .read(CF_TRANSACTIONS, key)?
            .ok_or_else(|| LedgerError::not_found(Entity::Transaction, id))?;
        tx.transition(status, Utc::now())?;
        self.write(CF_TRANSACTIONS, key, &tx)?;
        Ok(tx)
    }

    async fn find_by_external_ref(&self, reference: &str) -> Result<Option<Transaction>> {
        self.follow(CF_TX_REFS, reference.as_bytes(), CF_TRANSACTIONS)
    }

    async fn delete(&self, id: TransactionId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = id.as_uuid().as_bytes();
        let tx: Transaction = self
            .read(CF_TRANSACTIONS, key)?
            .ok_or_else(|| LedgerError::not_found(Entity::Transaction, id))?;
        if tx.status != TransactionStatus::Pending {
            return Err(LedgerError::AlreadyProcessed(format!(
                "transaction {id} is {} and cannot be deleted",
                tx.status
            )));
        }

        let mut batch = WriteBatch::default();
        if let Some(reference) = &tx.external_reference {
            batch.delete_cf(self.cf(CF_TX_REFS)?, reference.as_bytes());
        }
        batch.delete_cf(self.cf(CF_TRANSACTIONS)?, key);
        self.db.write(batch)?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Transaction>> {
        self.scan(CF_TRANSACTIONS)
    }
}

#[async_trait]
impl ApprovalStore for RocksDBStore {
    async fn create(&self, approval: Approval) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let existing: Vec<Approval> = self.scan(CF_APPROVALS)?;
        if existing.iter().any(|a| a.transaction == approval.transaction) {
            return Err(LedgerError::AlreadyProcessed(format!(
                "transaction {} already has an approval",
                approval.transaction
            )));
        }
        self.write(CF_APPROVALS, approval.id.as_uuid().as_bytes(), &approval)
    }

    async fn get(&self, id: ApprovalId) -> Result<Option<Approval>> {
        self.read(CF_APPROVALS, id.as_uuid().as_bytes())
    }

    async fn decide(&self, id: ApprovalId, decision: Decision) -> Result<Approval> {
        let _guard = self.write_lock.lock().await;
        let key = id.as_uuid().as_bytes();
        let mut approval: Approval = self
            .read(CF_APPROVALS, key)?
            .ok_or_else(|| LedgerError::not_found(Entity::Approval, id))?;
        approval.decide(decision, Utc::now())?;
        self.write(CF_APPROVALS, key, &approval)?;
        Ok(approval)
    }

    async fn pending_for(&self, approver: &UserId) -> Result<Vec<Approval>> {
        let mut pending: Vec<Approval> = self
            .scan::<Approval>(CF_APPROVALS)?
            .into_iter()
            .filter(|a| &a.approver == approver && a.status == ApprovalStatus::Pending)
            .collect();
        pending.sort_by_key(|a| a.created_at);
        Ok(pending)
    }
}

#[async_trait]
impl GroupStore for RocksDBStore {
    async fn create(&self, group: Group) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let index = self.cf(CF_INVITES)?;
        if self
            .db
            .get_pinned_cf(index, group.invite_code.as_bytes())?
            .is_some()
        {
            return Err(LedgerError::InvalidInput(
                "invite code already in use".to_string(),
            ));
        }

        let key = group.id.as_uuid().as_bytes();
        let mut batch = WriteBatch::default();
        batch.put_cf(index, group.invite_code.as_bytes(), key);
        batch.put_cf(self.cf(CF_GROUPS)?, key, serde_json::to_vec(&group)?);
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: GroupId) -> Result<Option<Group>> {
        self.read(CF_GROUPS, id.as_uuid().as_bytes())
    }

    async fn find_by_invite_code(&self, code: &str) -> Result<Option<Group>> {
        self.follow(CF_INVITES, code.as_bytes(), CF_GROUPS)
    }

    async fn join(&self, id: GroupId, user: UserId) -> Result<Group> {
        self.update_group(id, |g| g.membership.join(user)).await
    }

    async fn remove_member(&self, id: GroupId, user: &UserId) -> Result<Group> {
        self.update_group(id, |g| g.membership.remove(user)).await
    }

    async fn mark_collected(&self, id: GroupId, user: &UserId) -> Result<Group> {
        self.update_group(id, |g| g.membership.mark_collected(user))
            .await
    }

    async fn update_settings(&self, id: GroupId, settings: GroupSettings) -> Result<Group> {
        self.update_group(id, |g| {
            g.apply(settings);
            Ok(())
        })
        .await
    }

    async fn get_all(&self) -> Result<Vec<Group>> {
        self.scan(CF_GROUPS)
    }
}

#[async_trait]
impl CollectionStore for RocksDBStore {
    async fn create(&self, collection: Collection) -> Result<()> {
        self.write(
            CF_COLLECTIONS,
            collection.id.as_uuid().as_bytes(),
            &collection,
        )
    }

    async fn for_group(&self, group: GroupId) -> Result<Vec<Collection>> {
        let mut found: Vec<Collection> = self
            .scan::<Collection>(CF_COLLECTIONS)?
            .into_iter()
            .filter(|c| c.group == group)
            .collect();
        found.sort_by_key(|c| c.date);
        Ok(found)
    }

    async fn due_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Collection>> {
        let mut found: Vec<Collection> = self
            .scan::<Collection>(CF_COLLECTIONS)?
            .into_iter()
            .filter(|c| c.date >= from && c.date < until)
            .collect();
        found.sort_by_key(|c| c.date);
        Ok(found)
    }
}

#[async_trait]
impl SagaStore for RocksDBStore {
    async fn begin(&self, record: SagaRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = record.key.to_string();
        if self
            .db
            .get_pinned_cf(self.cf(CF_SAGAS)?, key.as_bytes())?
            .is_some()
        {
            return Err(LedgerError::AlreadyProcessed(format!(
                "{} is already in flight",
                record.key
            )));
        }
        self.write(CF_SAGAS, key.as_bytes(), &record)
    }

    async fn advance(&self, key: &SagaKey, step: SagaStep) -> Result<()> {
        self.update_saga(key, |r| r.step = step).await
    }

    async fn fail(&self, key: &SagaKey, reason: String) -> Result<()> {
        self.update_saga(key, |r| r.failure = Some(reason)).await
    }

    async fn finish(&self, key: &SagaKey) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.db
            .delete_cf(self.cf(CF_SAGAS)?, key.to_string().as_bytes())?;
        Ok(())
    }

    async fn open(&self) -> Result<Vec<SagaRecord>> {
        self.scan(CF_SAGAS)
    }
}
