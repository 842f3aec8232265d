use crate::domain::ids::{UserId, WalletId};
use crate::domain::money::{Amount, Balance};
use crate::domain::transaction::TransactionStatus;
use miette::Diagnostic;
use std::fmt;
use thiserror::Error;

/// The kind of record a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Wallet,
    Transaction,
    Approval,
    Group,
    Collection,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Wallet => "wallet",
            Entity::Transaction => "transaction",
            Entity::Approval => "approval",
            Entity::Group => "group",
            Entity::Collection => "collection",
        };
        f.write_str(name)
    }
}

/// Failures reported by a payment gateway collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway call exceeded its deadline")]
    Timeout,
    #[error("gateway declined the request: {0}")]
    Declined(String),
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Diagnostic, Debug)]
pub enum LedgerError {
    #[error("{entity} not found: {id}")]
    #[diagnostic(code(ledger::not_found))]
    NotFound { entity: Entity, id: String },

    #[error("invalid input: {0}")]
    #[diagnostic(code(ledger::invalid_input))]
    InvalidInput(String),

    #[error("insufficient funds in wallet {wallet}: balance {balance}, requested {requested}")]
    #[diagnostic(code(ledger::insufficient_funds))]
    InsufficientFunds {
        wallet: WalletId,
        balance: Balance,
        requested: Amount,
    },

    #[error("unauthorized: {0}")]
    #[diagnostic(code(ledger::unauthorized))]
    Unauthorized(String),

    #[error("already processed: {0}")]
    #[diagnostic(code(ledger::already_processed))]
    AlreadyProcessed(String),

    #[error("user {0} is already a member of the group")]
    #[diagnostic(code(ledger::already_member))]
    AlreadyMember(UserId),

    #[error("user {0} is not an eligible member of the group")]
    #[diagnostic(code(ledger::not_member))]
    NotMember(UserId),

    #[error("invalid status transition from {from} to {to}")]
    #[diagnostic(code(ledger::invalid_transition))]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("payment gateway error: {0}")]
    #[diagnostic(code(ledger::external_gateway))]
    Gateway(#[from] GatewayError),

    #[error("ledger left inconsistent, manual reconciliation required: {0}")]
    #[diagnostic(code(ledger::inconsistent))]
    Inconsistent(String),

    #[error("storage error: {0}")]
    #[diagnostic(code(ledger::storage))]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("CSV error: {0}")]
    #[diagnostic(code(ledger::csv))]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    #[diagnostic(code(ledger::io))]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    pub fn not_found(entity: Entity, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code for this error category.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::Unauthorized(_) => "unauthorized",
            Self::AlreadyProcessed(_) => "already_processed",
            Self::AlreadyMember(_) => "already_member",
            Self::NotMember(_) => "not_member",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Gateway(_) => "external_gateway",
            Self::Inconsistent(_) => "inconsistent",
            Self::Storage(_) => "storage",
            Self::Csv(_) => "csv",
            Self::Io(_) => "io",
        }
    }

    /// Whether the same call may be repeated. Only meaningful for idempotent
    /// operations such as external funding keyed by reference.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Gateway(GatewayError::Timeout) | Self::Gateway(GatewayError::Unavailable(_))
        )
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LedgerError {
    fn from(e: rocksdb::Error) -> Self {
        Self::Storage(Box::new(e))
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
