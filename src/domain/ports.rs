//! Boundaries between the ledger core and everything it does not own:
//! storage for each record kind and the external collaborators.

use super::approval::{Approval, Decision};
use super::collection::Collection;
use super::event::LedgerEvent;
use super::group::{Group, GroupSettings};
use super::ids::{ApprovalId, GroupId, TransactionId, UserId, WalletId};
use super::money::Amount;
use super::payment::{FundingReceipt, FundingRequest, Verification, VirtualAccountRequest};
use super::saga::{SagaKey, SagaRecord, SagaStep};
use super::transaction::{Transaction, TransactionStatus};
use super::wallet::{VirtualAccount, Wallet};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Balances and wallet metadata.
///
/// `credit` and `debit` are each one atomic read-modify-write of a single
/// wallet; no other method touches a balance.
#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn create(&self, wallet: Wallet) -> Result<()>;
    async fn get(&self, id: WalletId) -> Result<Option<Wallet>>;
    async fn find_personal(&self, owner: &UserId) -> Result<Option<Wallet>>;
    async fn credit(&self, id: WalletId, amount: Amount) -> Result<Wallet>;
    /// Fails with `InsufficientFunds` without mutating when the balance is short.
    async fn debit(&self, id: WalletId, amount: Amount) -> Result<Wallet>;
    async fn set_virtual_account(
        &self,
        id: WalletId,
        account: Option<VirtualAccount>,
    ) -> Result<()>;
    async fn delete(&self, id: WalletId) -> Result<()>;
    async fn get_all(&self) -> Result<Vec<Wallet>>;
}

/// Append-only log of funds movements.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Persists a `pending` or `success` transaction. External references are unique.
    async fn record(&self, tx: Transaction) -> Result<TransactionId>;
    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>>;
    /// Enforces the monotone status lattice.
    async fn transition(&self, id: TransactionId, status: TransactionStatus)
    -> Result<Transaction>;
    async fn find_by_external_ref(&self, reference: &str) -> Result<Option<Transaction>>;
    /// Compensating delete; only `pending` transactions can be removed.
    async fn delete(&self, id: TransactionId) -> Result<()>;
    async fn get_all(&self) -> Result<Vec<Transaction>>;
}

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn create(&self, approval: Approval) -> Result<()>;
    async fn get(&self, id: ApprovalId) -> Result<Option<Approval>>;
    /// Atomically applies a decision to a still-pending approval.
    async fn decide(&self, id: ApprovalId, decision: Decision) -> Result<Approval>;
    async fn pending_for(&self, approver: &UserId) -> Result<Vec<Approval>>;
}

/// Group records. Membership changes are atomic per call.
#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn create(&self, group: Group) -> Result<()>;
    async fn get(&self, id: GroupId) -> Result<Option<Group>>;
    async fn find_by_invite_code(&self, code: &str) -> Result<Option<Group>>;
    async fn join(&self, id: GroupId, user: UserId) -> Result<Group>;
    async fn remove_member(&self, id: GroupId, user: &UserId) -> Result<Group>;
    async fn mark_collected(&self, id: GroupId, user: &UserId) -> Result<Group>;
    /// Replaces the editable settings, leaving membership as it stands.
    async fn update_settings(&self, id: GroupId, settings: GroupSettings) -> Result<Group>;
    async fn get_all(&self) -> Result<Vec<Group>>;
}

#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn create(&self, collection: Collection) -> Result<()>;
    async fn for_group(&self, group: GroupId) -> Result<Vec<Collection>>;
    async fn due_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Collection>>;
}

/// Journal of multi-step operations in flight.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Inserts the record, failing with `AlreadyProcessed` if its key is taken.
    async fn begin(&self, record: SagaRecord) -> Result<()>;
    async fn advance(&self, key: &SagaKey, step: SagaStep) -> Result<()>;
    /// Keeps the entry open and notes why it could not be completed or undone.
    async fn fail(&self, key: &SagaKey, reason: String) -> Result<()>;
    async fn finish(&self, key: &SagaKey) -> Result<()>;
    async fn open(&self) -> Result<Vec<SagaRecord>>;
}

/// The third-party payment provider, treated as an asynchronous settlement oracle.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_virtual_account(
        &self,
        request: &VirtualAccountRequest,
    ) -> std::result::Result<VirtualAccount, GatewayError>;
    async fn get_virtual_account(
        &self,
        account_id: &str,
    ) -> std::result::Result<VirtualAccount, GatewayError>;
    async fn deactivate_virtual_account(
        &self,
        account_id: &str,
    ) -> std::result::Result<(), GatewayError>;
    async fn fund_virtual_account(
        &self,
        account_id: &str,
        request: &FundingRequest,
    ) -> std::result::Result<FundingReceipt, GatewayError>;
    /// Accepts either the provider's transaction ref or the merchant reference.
    async fn verify_transaction(
        &self,
        transaction_ref: &str,
    ) -> std::result::Result<Verification, GatewayError>;
}

/// Best-effort delivery of domain events to users.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn emit(&self, user: &UserId, event: LedgerEvent) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type WalletStoreBox = Box<dyn WalletStore>;
pub type TransactionLogBox = Box<dyn TransactionLog>;
pub type ApprovalStoreBox = Box<dyn ApprovalStore>;
pub type GroupStoreBox = Box<dyn GroupStore>;
pub type CollectionStoreBox = Box<dyn CollectionStore>;
pub type SagaStoreBox = Box<dyn SagaStore>;
pub type PaymentGatewayBox = Box<dyn PaymentGateway>;
pub type NotifierBox = Box<dyn Notifier>;
pub type ClockBox = Box<dyn Clock>;

/// Every store the engine writes to, injected together.
pub struct Stores {
    pub wallets: WalletStoreBox,
    pub transactions: TransactionLogBox,
    pub approvals: ApprovalStoreBox,
    pub groups: GroupStoreBox,
    pub collections: CollectionStoreBox,
    pub sagas: SagaStoreBox,
}
