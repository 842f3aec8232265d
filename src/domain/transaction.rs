use super::ids::{GroupId, TransactionId, WalletId};
use super::money::Amount;
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Contribution,
    Payout,
    ExternalFunding,
}

/// Lifecycle of a funds movement. Transitions only go
/// `Pending -> Success` or `Pending -> Failed`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        self == TransactionStatus::Pending && next.is_terminal()
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    BankTransfer,
    MobileMoney,
    Cash,
    #[default]
    Wallet,
}

/// A persisted record of one funds movement.
///
/// Everything except `status` (and the `updated_at` stamp that follows it)
/// is fixed at creation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    /// `None` for funds entering the system from the payment provider.
    pub from_wallet: Option<WalletId>,
    pub to_wallet: WalletId,
    pub amount: Amount,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub method: PaymentMethod,
    pub group: Option<GroupId>,
    /// Idempotency key for provider callbacks.
    pub external_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn contribution(
        from: WalletId,
        to: WalletId,
        amount: Amount,
        method: PaymentMethod,
        group: GroupId,
        now: DateTime<Utc>,
    ) -> Self {
        Self::build(
            Some(from),
            to,
            amount,
            TransactionKind::Contribution,
            TransactionStatus::Success,
            method,
            Some(group),
            None,
            now,
        )
    }

    pub fn payout(
        from: WalletId,
        to: WalletId,
        amount: Amount,
        method: PaymentMethod,
        group: GroupId,
        now: DateTime<Utc>,
    ) -> Self {
        Self::build(
            Some(from),
            to,
            amount,
            TransactionKind::Payout,
            TransactionStatus::Pending,
            method,
            Some(group),
            None,
            now,
        )
    }

    pub fn external_funding(
        to: WalletId,
        amount: Amount,
        reference: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self::build(
            None,
            to,
            amount,
            TransactionKind::ExternalFunding,
            TransactionStatus::Pending,
            PaymentMethod::BankTransfer,
            None,
            Some(reference),
            now,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        from_wallet: Option<WalletId>,
        to_wallet: WalletId,
        amount: Amount,
        kind: TransactionKind,
        status: TransactionStatus,
        method: PaymentMethod,
        group: Option<GroupId>,
        external_reference: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            from_wallet,
            to_wallet,
            amount,
            kind,
            status,
            method,
            group,
            external_reference,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the transaction along the status lattice.
    pub fn transition(
        &mut self,
        next: TransactionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn touches(&self, wallet: WalletId) -> bool {
        self.to_wallet == wallet || self.from_wallet == Some(wallet)
    }
}
