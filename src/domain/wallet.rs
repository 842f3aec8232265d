use super::ids::{UserId, WalletId};
use super::money::{Amount, Balance};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WalletKind {
    /// A member's personal wallet.
    User,
    /// The pooled wallet of a contribution group.
    Group,
}

impl fmt::Display for WalletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletKind::User => f.write_str("user"),
            WalletKind::Group => f.write_str("group"),
        }
    }
}

/// Bank account issued by the payment provider and linked to a wallet.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct VirtualAccount {
    pub account_id: String,
    pub account_number: String,
    pub bank_name: String,
}

/// A balance-holding account owned by a user or a contribution group.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Wallet {
    pub id: WalletId,
    /// For group wallets this is the group admin.
    pub owner: UserId,
    pub kind: WalletKind,
    pub balance: Balance,
    pub virtual_account: Option<VirtualAccount>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(owner: UserId, kind: WalletKind, now: DateTime<Utc>) -> Self {
        Self {
            id: WalletId::new(),
            owner,
            kind,
            balance: Balance::ZERO,
            virtual_account: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Adds funds to the balance. Leaves the wallet untouched if the result
    /// would not be representable.
    pub fn credit(&mut self, amount: Amount, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.balance = self.balance.checked_add(amount).ok_or_else(|| {
            LedgerError::InvalidInput(format!(
                "crediting {amount} would overflow the balance of wallet {}",
                self.id
            ))
        })?;
        self.updated_at = now;
        Ok(())
    }

    /// Removes funds if the balance covers them. Leaves the wallet untouched otherwise.
    pub fn debit(&mut self, amount: Amount, now: DateTime<Utc>) -> Result<(), LedgerError> {
        match self.balance.checked_sub(amount) {
            Some(balance) => {
                self.balance = balance;
                self.updated_at = now;
                Ok(())
            }
            None => Err(LedgerError::InsufficientFunds {
                wallet: self.id,
                balance: self.balance,
                requested: amount,
            }),
        }
    }
}
