use super::ids::UserId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Member,
    /// Operator with read access across all groups and wallets.
    SystemAdmin,
}

/// The already-authenticated caller of an engine operation.
///
/// Group-level rights (admin of a group, approver of a payout) are decided
/// against the records themselves; the role only widens read access.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Actor {
    pub user: UserId,
    pub role: Role,
}

impl Actor {
    pub fn member(user: impl Into<UserId>) -> Self {
        Self {
            user: user.into(),
            role: Role::Member,
        }
    }

    pub fn system_admin(user: impl Into<UserId>) -> Self {
        Self {
            user: user.into(),
            role: Role::SystemAdmin,
        }
    }

    pub fn is(&self, user: &UserId) -> bool {
        &self.user == user
    }

    pub fn is_system_admin(&self) -> bool {
        self.role == Role::SystemAdmin
    }
}
