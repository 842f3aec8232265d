use super::ids::UserId;
use super::money::Amount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Request to provision a virtual bank account for a wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualAccountRequest {
    pub owner: UserId,
    pub narration: String,
    pub is_permanent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRequest {
    pub amount: Amount,
    /// Merchant-side reference; also the ledger's idempotency key.
    pub reference: String,
    pub currency: String,
    pub narration: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Successful,
    Pending,
    Failed,
}

/// Provider acknowledgement of a funding request. Never proof of settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingReceipt {
    pub transaction_ref: String,
    pub status: SettlementStatus,
}

/// Provider's authoritative view of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub status: SettlementStatus,
    pub amount: Decimal,
}

impl Verification {
    /// Settled successfully for exactly `expected`.
    pub fn confirms(&self, expected: Amount) -> bool {
        self.status == SettlementStatus::Successful && self.amount == expected.value()
    }
}
