use super::ids::{CollectionId, GroupId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A member's scheduled turn to receive the pot. Not itself a funds movement.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Collection {
    pub id: CollectionId,
    pub group: GroupId,
    pub collector: UserId,
    pub date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Collection {
    pub fn new(group: GroupId, collector: UserId, date: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: CollectionId::new(),
            group,
            collector,
            date,
            created_at: now,
        }
    }
}
