use super::ids::{ApprovalId, GroupId, TransactionId, UserId};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// What the approver decided.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Decision {
    Approve,
    Reject,
}

impl From<Decision> for ApprovalStatus {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Reject => ApprovalStatus::Rejected,
        }
    }
}

/// The single admin decision gating one payout transaction.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Approval {
    pub id: ApprovalId,
    pub transaction: TransactionId,
    pub group: GroupId,
    pub approver: UserId,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Approval {
    pub fn new(
        transaction: TransactionId,
        group: GroupId,
        approver: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ApprovalId::new(),
            transaction,
            group,
            approver,
            status: ApprovalStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition guard: only the designated approver, only while pending.
    pub fn authorize(&self, actor: &UserId) -> Result<(), LedgerError> {
        if &self.approver != actor {
            return Err(LedgerError::Unauthorized(format!(
                "{actor} is not the approver of {}",
                self.id
            )));
        }
        self.ensure_pending()
    }

    pub fn ensure_pending(&self) -> Result<(), LedgerError> {
        if self.status != ApprovalStatus::Pending {
            return Err(LedgerError::AlreadyProcessed(format!(
                "approval {} is already {}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    pub fn decide(&mut self, decision: Decision, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.ensure_pending()?;
        self.status = decision.into();
        self.updated_at = now;
        Ok(())
    }
}
