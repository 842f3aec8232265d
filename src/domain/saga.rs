use super::ids::{ApprovalId, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one in-flight multi-step operation.
///
/// At most one journal entry exists per key, which is what stops a payout
/// from being settled twice or a funding reference from being credited twice
/// by racing callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SagaKey {
    Contribution(TransactionId),
    Payout(ApprovalId),
    Funding(String),
}

impl fmt::Display for SagaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SagaKey::Contribution(id) => write!(f, "contribution:{id}"),
            SagaKey::Payout(id) => write!(f, "payout:{id}"),
            SagaKey::Funding(reference) => write!(f, "funding:{reference}"),
        }
    }
}

/// Last step an operation completed. Ordered by progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStep {
    Started,
    TransactionRecorded,
    SourceDebited,
    DestinationCredited,
    TransactionSettled,
    MembershipUpdated,
    ApprovalDecided,
    Compensating,
}

impl fmt::Display for SagaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SagaStep::Started => "started",
            SagaStep::TransactionRecorded => "transaction_recorded",
            SagaStep::SourceDebited => "source_debited",
            SagaStep::DestinationCredited => "destination_credited",
            SagaStep::TransactionSettled => "transaction_settled",
            SagaStep::MembershipUpdated => "membership_updated",
            SagaStep::ApprovalDecided => "approval_decided",
            SagaStep::Compensating => "compensating",
        };
        f.write_str(s)
    }
}

/// Journal entry of an operation that has not finished.
///
/// Entries still present after the owning call returned mark operations that
/// need manual reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaRecord {
    pub key: SagaKey,
    pub step: SagaStep,
    /// Error that stopped the operation, when it could not be undone.
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaRecord {
    pub fn new(key: SagaKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            step: SagaStep::Started,
            failure: None,
            started_at: now,
            updated_at: now,
        }
    }
}
