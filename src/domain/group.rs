use super::ids::{GroupId, UserId, WalletId};
use super::money::{Amount, Balance};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Cycle {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Cycle {
    /// Human label for when collection falls due.
    pub fn collection_day(self) -> &'static str {
        match self {
            Cycle::Daily => "end of day",
            Cycle::Weekly => "end of week",
            Cycle::Monthly => "last day of month",
            Cycle::Yearly => "last day of year",
        }
    }
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cycle::Daily => "daily",
            Cycle::Weekly => "weekly",
            Cycle::Monthly => "monthly",
            Cycle::Yearly => "yearly",
        };
        f.write_str(s)
    }
}

impl FromStr for Cycle {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Cycle::Daily),
            "weekly" => Ok(Cycle::Weekly),
            "monthly" => Ok(Cycle::Monthly),
            "yearly" => Ok(Cycle::Yearly),
            other => Err(LedgerError::InvalidInput(format!("invalid cycle: {other}"))),
        }
    }
}

/// What a group saves for.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContributionType {
    DailySavings,
    #[default]
    GroupContribution,
}

impl fmt::Display for ContributionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContributionType::DailySavings => "daily_savings",
            ContributionType::GroupContribution => "group_contribution",
        };
        f.write_str(s)
    }
}

impl FromStr for ContributionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily_savings" => Ok(ContributionType::DailySavings),
            "group_contribution" => Ok(ContributionType::GroupContribution),
            other => Err(LedgerError::InvalidInput(format!(
                "invalid contribution type: {other}"
            ))),
        }
    }
}

/// The roster of a group, split into members still waiting for their payout
/// and members who already collected.
///
/// The two sets are disjoint; every mutation keeps them that way.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Default)]
pub struct Membership {
    pending: BTreeSet<UserId>,
    collected: BTreeSet<UserId>,
}

impl Membership {
    pub fn with_member(user: UserId) -> Self {
        Self {
            pending: BTreeSet::from([user]),
            collected: BTreeSet::new(),
        }
    }

    pub fn pending(&self) -> &BTreeSet<UserId> {
        &self.pending
    }

    pub fn collected(&self) -> &BTreeSet<UserId> {
        &self.collected
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.pending.contains(user) || self.collected.contains(user)
    }

    pub fn is_pending(&self, user: &UserId) -> bool {
        self.pending.contains(user)
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.collected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn join(&mut self, user: UserId) -> Result<(), LedgerError> {
        if self.contains(&user) {
            return Err(LedgerError::AlreadyMember(user));
        }
        self.pending.insert(user);
        Ok(())
    }

    /// Removes the user from whichever set holds them.
    pub fn remove(&mut self, user: &UserId) -> Result<(), LedgerError> {
        if self.pending.remove(user) || self.collected.remove(user) {
            Ok(())
        } else {
            Err(LedgerError::NotMember(user.clone()))
        }
    }

    /// Moves a member from the pending set to the collected set.
    pub fn mark_collected(&mut self, user: &UserId) -> Result<(), LedgerError> {
        if !self.pending.remove(user) {
            return Err(LedgerError::NotMember(user.clone()));
        }
        self.collected.insert(user.clone());
        Ok(())
    }
}

/// A rotating savings circle.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub admin: UserId,
    #[serde(default)]
    pub kind: ContributionType,
    /// Fixed amount every member pays per cycle.
    pub amount: Amount,
    pub cycle: Cycle,
    pub penalty: Balance,
    pub invite_code: String,
    pub wallet: WalletId,
    pub collection_day: String,
    pub collection_deadline: DateTime<Utc>,
    pub membership: Membership,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn is_admin(&self, user: &UserId) -> bool {
        &self.admin == user
    }

    /// Admin or any member, in either set.
    pub fn is_participant(&self, user: &UserId) -> bool {
        self.is_admin(user) || self.membership.contains(user)
    }

    pub fn settings(&self) -> GroupSettings {
        GroupSettings {
            name: self.name.clone(),
            description: self.description.clone(),
            kind: self.kind,
            amount: self.amount,
            cycle: self.cycle,
            penalty: self.penalty,
            collection_day: self.collection_day.clone(),
            collection_deadline: self.collection_deadline,
        }
    }

    /// Replaces the editable settings. Id, admin, invite code, wallet and
    /// membership are untouched.
    pub fn apply(&mut self, settings: GroupSettings) {
        self.name = settings.name;
        self.description = settings.description;
        self.kind = settings.kind;
        self.amount = settings.amount;
        self.cycle = settings.cycle;
        self.penalty = settings.penalty;
        self.collection_day = settings.collection_day;
        self.collection_deadline = settings.collection_deadline;
    }
}

/// The part of a group its admin may change after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSettings {
    pub name: String,
    pub description: String,
    pub kind: ContributionType,
    pub amount: Amount,
    pub cycle: Cycle,
    pub penalty: Balance,
    pub collection_day: String,
    pub collection_deadline: DateTime<Utc>,
}

/// Changes an admin asks for. Unset fields keep their current value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub kind: Option<ContributionType>,
    pub amount: Option<Amount>,
    pub cycle: Option<Cycle>,
    pub penalty: Option<Balance>,
}

/// Parameters an admin supplies when creating a group.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGroup {
    pub name: String,
    pub description: String,
    pub kind: ContributionType,
    pub amount: Amount,
    pub cycle: Cycle,
    pub penalty: Balance,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> UserId {
        UserId::from(name)
    }

    fn assert_disjoint(m: &Membership) {
        assert!(m.pending().is_disjoint(m.collected()));
    }

    #[test]
    fn test_join_rejects_existing_member_in_either_set() {
        let mut m = Membership::with_member(user("admin"));
        m.join(user("ada")).unwrap();
        m.mark_collected(&user("ada")).unwrap();

        assert!(matches!(
            m.join(user("ada")),
            Err(LedgerError::AlreadyMember(_))
        ));
        assert!(matches!(
            m.join(user("admin")),
            Err(LedgerError::AlreadyMember(_))
        ));
        assert_disjoint(&m);
    }

    #[test]
    fn test_mark_collected_moves_between_sets() {
        let mut m = Membership::with_member(user("ada"));
        m.mark_collected(&user("ada")).unwrap();
        assert!(!m.is_pending(&user("ada")));
        assert!(m.collected().contains(&user("ada")));
        assert_disjoint(&m);

        // A collected member cannot collect again.
        assert!(matches!(
            m.mark_collected(&user("ada")),
            Err(LedgerError::NotMember(_))
        ));
    }

    #[test]
    fn test_remove_from_whichever_set() {
        let mut m = Membership::with_member(user("ada"));
        m.join(user("bo")).unwrap();
        m.mark_collected(&user("bo")).unwrap();

        m.remove(&user("bo")).unwrap();
        m.remove(&user("ada")).unwrap();
        assert!(m.is_empty());
        assert!(matches!(
            m.remove(&user("ada")),
            Err(LedgerError::NotMember(_))
        ));
    }

    #[test]
    fn test_cycle_parsing() {
        assert_eq!("Monthly".parse::<Cycle>().unwrap(), Cycle::Monthly);
        assert_eq!(" weekly ".parse::<Cycle>().unwrap(), Cycle::Weekly);
        assert!(matches!(
            "fortnightly".parse::<Cycle>(),
            Err(LedgerError::InvalidInput(_))
        ));
        assert_eq!(Cycle::Yearly.collection_day(), "last day of year");
    }

    #[test]
    fn test_contribution_type_parsing() {
        assert_eq!(
            "daily_savings".parse::<ContributionType>().unwrap(),
            ContributionType::DailySavings
        );
        assert_eq!(
            " Group_Contribution ".parse::<ContributionType>().unwrap(),
            ContributionType::GroupContribution
        );
        assert!(matches!(
            "lottery".parse::<ContributionType>(),
            Err(LedgerError::InvalidInput(_))
        ));
        assert_eq!(ContributionType::DailySavings.to_string(), "daily_savings");
    }
}
