use super::ids::{GroupId, TransactionId, UserId};
use super::money::{Amount, Balance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain events handed to the notifier after a ledger operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    ContributionRecorded {
        group: GroupId,
        group_name: String,
        amount: Amount,
        transaction: TransactionId,
    },
    /// Informational only: the penalty is reported, never charged.
    LateContribution {
        group: GroupId,
        group_name: String,
        penalty: Balance,
    },
    PayoutRequested {
        group: GroupId,
        group_name: String,
        amount: Amount,
    },
    PayoutApproved {
        group: GroupId,
        amount: Amount,
        transaction: TransactionId,
    },
    PayoutRejected {
        group: GroupId,
        amount: Amount,
        transaction: TransactionId,
    },
    WalletFunded {
        amount: Amount,
        transaction: TransactionId,
    },
    MemberJoined {
        group: GroupId,
        group_name: String,
        member: UserId,
    },
    RemovedFromGroup {
        group: GroupId,
        group_name: String,
    },
    CollectionScheduled {
        group: GroupId,
        group_name: String,
        date: DateTime<Utc>,
    },
    CollectionDue {
        group: GroupId,
        group_name: String,
        date: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ContributionRecorded,
    LateContribution,
    PayoutRequested,
    PayoutApproved,
    PayoutRejected,
    WalletFunded,
    MemberJoined,
    RemovedFromGroup,
    CollectionScheduled,
    CollectionDue,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ContributionRecorded => "group_contribution",
            EventKind::LateContribution => "late_contribution",
            EventKind::PayoutRequested => "payout_requested",
            EventKind::PayoutApproved => "payout_approved",
            EventKind::PayoutRejected => "payout_rejected",
            EventKind::WalletFunded => "wallet_funded",
            EventKind::MemberJoined => "group_member_joined",
            EventKind::RemovedFromGroup => "removed_from_group",
            EventKind::CollectionScheduled => "collection_scheduled",
            EventKind::CollectionDue => "collection_due",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LedgerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LedgerEvent::ContributionRecorded { .. } => EventKind::ContributionRecorded,
            LedgerEvent::LateContribution { .. } => EventKind::LateContribution,
            LedgerEvent::PayoutRequested { .. } => EventKind::PayoutRequested,
            LedgerEvent::PayoutApproved { .. } => EventKind::PayoutApproved,
            LedgerEvent::PayoutRejected { .. } => EventKind::PayoutRejected,
            LedgerEvent::WalletFunded { .. } => EventKind::WalletFunded,
            LedgerEvent::MemberJoined { .. } => EventKind::MemberJoined,
            LedgerEvent::RemovedFromGroup { .. } => EventKind::RemovedFromGroup,
            LedgerEvent::CollectionScheduled { .. } => EventKind::CollectionScheduled,
            LedgerEvent::CollectionDue { .. } => EventKind::CollectionDue,
        }
    }

    /// One-line human message, as shown in a notification inbox.
    pub fn message(&self) -> String {
        match self {
            LedgerEvent::ContributionRecorded { group_name, .. } => {
                format!("You contributed to group {group_name}")
            }
            LedgerEvent::LateContribution { penalty, .. } => {
                format!("Late contribution recorded. Penalty applied: {penalty}")
            }
            LedgerEvent::PayoutRequested {
                group_name, amount, ..
            } => format!("Payout of {amount} requested for contribution: {group_name}"),
            LedgerEvent::PayoutApproved { amount, .. } => {
                format!("Payout of {amount} approved for contribution")
            }
            LedgerEvent::PayoutRejected { amount, .. } => {
                format!("Payout of {amount} was rejected")
            }
            LedgerEvent::WalletFunded { amount, .. } => {
                format!("Your wallet has been funded with {amount}")
            }
            LedgerEvent::MemberJoined {
                group_name, member, ..
            } => format!("{member} has joined your contribution group: {group_name}"),
            LedgerEvent::RemovedFromGroup { group_name, .. } => {
                format!("You have been removed from the contribution group: {group_name}")
            }
            LedgerEvent::CollectionScheduled {
                group_name, date, ..
            } => format!(
                "You are scheduled to collect for group: {group_name} on {}",
                date.format("%Y-%m-%d")
            ),
            LedgerEvent::CollectionDue { group_name, .. } => {
                format!("Reminder: Collection due today for group: {group_name}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = LedgerEvent::LateContribution {
            group: GroupId::new(),
            group_name: "savers".to_string(),
            penalty: Balance::new(dec!(250)).unwrap(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "late_contribution");
        assert_eq!(json["group_name"], "savers");
        assert_eq!(event.kind(), EventKind::LateContribution);
        assert_eq!(
            event.message(),
            "Late contribution recorded. Penalty applied: 250"
        );
    }
}
