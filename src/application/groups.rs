use super::engine::{LedgerEngine, with_deadline};
use crate::domain::auth::Actor;
use crate::domain::collection::Collection;
use crate::domain::event::LedgerEvent;
use crate::domain::group::{Cycle, Group, GroupUpdate, Membership, NewGroup};
use crate::domain::ids::{GroupId, UserId, WalletId};
use crate::domain::payment::VirtualAccountRequest;
use crate::domain::schedule::next_due_date;
use crate::domain::wallet::{Wallet, WalletKind};
use crate::error::{Entity, LedgerError, Result};
use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

impl LedgerEngine {
    /// Creates the actor's personal wallet and links a virtual account to it.
    #[instrument(skip_all, fields(user = %actor.user))]
    pub async fn open_user_wallet(&self, actor: &Actor) -> Result<Wallet> {
        if self.wallets.find_personal(&actor.user).await?.is_some() {
            return Err(LedgerError::AlreadyProcessed(format!(
                "{} already has a wallet",
                actor.user
            )));
        }
        let wallet = Wallet::new(actor.user.clone(), WalletKind::User, self.now());
        let wallet = self
            .provision_wallet(wallet, actor.user.to_string())
            .await?;
        info!(wallet = %wallet.id, "wallet opened");
        Ok(wallet)
    }

    /// Stores `wallet` and links a fresh virtual account. The wallet is
    /// removed again if the account cannot be created.
    async fn provision_wallet(&self, mut wallet: Wallet, narration: String) -> Result<Wallet> {
        self.wallets.create(wallet.clone()).await?;

        let request = VirtualAccountRequest {
            owner: wallet.owner.clone(),
            narration,
            is_permanent: true,
        };
        let linked = match with_deadline(
            self.config.gateway_timeout,
            self.gateway.create_virtual_account(&request),
        )
        .await
        {
            Ok(account) => self
                .wallets
                .set_virtual_account(wallet.id, Some(account.clone()))
                .await
                .map(|_| account),
            Err(e) => Err(e.into()),
        };

        match linked {
            Ok(account) => {
                wallet.virtual_account = Some(account);
                Ok(wallet)
            }
            Err(e) => {
                self.discard_wallet(wallet.id, &e).await?;
                Err(e)
            }
        }
    }

    async fn discard_wallet(&self, id: WalletId, cause: &LedgerError) -> Result<()> {
        self.wallets.delete(id).await.map_err(|undo| {
            LedgerError::Inconsistent(format!(
                "wallet {id} was left without an account after {cause}: {undo}"
            ))
        })
    }

    /// Wallet details with the account linkage refreshed from the provider.
    /// Visible to the owner, the members of an owning group and system admins.
    pub async fn wallet_details(&self, actor: &Actor, wallet_id: WalletId) -> Result<Wallet> {
        let mut wallet = self.load_wallet(wallet_id).await?;
        let allowed = actor.is(&wallet.owner)
            || actor.is_system_admin()
            || (wallet.kind == WalletKind::Group
                && self
                    .groups
                    .get_all()
                    .await?
                    .iter()
                    .any(|g| g.wallet == wallet.id && g.is_participant(&actor.user)));
        if !allowed {
            return Err(LedgerError::Unauthorized(format!(
                "{} may not view wallet {}",
                actor.user, wallet.id
            )));
        }

        if let Some(stored) = &wallet.virtual_account {
            match with_deadline(
                self.config.gateway_timeout,
                self.gateway.get_virtual_account(&stored.account_id),
            )
            .await
            {
                Ok(fresh) if &fresh != stored => {
                    self.wallets
                        .set_virtual_account(wallet.id, Some(fresh.clone()))
                        .await?;
                    wallet.virtual_account = Some(fresh);
                }
                Ok(_) => {}
                Err(e) => warn!(wallet = %wallet.id, error = %e, "account details not refreshed"),
            }
        }
        Ok(wallet)
    }

    /// Closes the wallet's virtual account at the provider and unlinks it.
    #[instrument(skip_all, fields(wallet = %wallet_id))]
    pub async fn deactivate_virtual_account(&self, actor: &Actor, wallet_id: WalletId) -> Result<()> {
        let wallet = self.load_wallet(wallet_id).await?;
        if !actor.is(&wallet.owner) {
            return Err(LedgerError::Unauthorized(format!(
                "{} does not own wallet {}",
                actor.user, wallet.id
            )));
        }
        let account = wallet.virtual_account.ok_or_else(|| {
            LedgerError::InvalidInput(format!("wallet {} has no linked virtual account", wallet.id))
        })?;
        with_deadline(
            self.config.gateway_timeout,
            self.gateway.deactivate_virtual_account(&account.account_id),
        )
        .await?;
        self.wallets.set_virtual_account(wallet.id, None).await?;
        info!(account = %account.account_id, "virtual account deactivated");
        Ok(())
    }

    /// Creates a group administered by the actor, with its own wallet and a
    /// fresh invite code. The admin starts as the only member.
    #[instrument(skip_all, fields(admin = %actor.user, name = %new.name))]
    pub async fn create_group(&self, actor: &Actor, new: NewGroup) -> Result<Group> {
        let name = group_name(&new.name)?;
        let now = self.now();
        let deadline = self.collection_deadline(new.cycle, now)?;

        let wallet = Wallet::new(actor.user.clone(), WalletKind::Group, now);
        let wallet = self.provision_wallet(wallet, name.clone()).await?;

        let group = Group {
            id: GroupId::new(),
            name,
            description: new.description,
            admin: actor.user.clone(),
            kind: new.kind,
            amount: new.amount,
            cycle: new.cycle,
            penalty: new.penalty,
            invite_code: Uuid::new_v4().to_string(),
            wallet: wallet.id,
            collection_day: new.cycle.collection_day().to_string(),
            collection_deadline: deadline,
            membership: Membership::with_member(actor.user.clone()),
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.groups.create(group.clone()).await {
            self.discard_wallet(wallet.id, &e).await?;
            return Err(e);
        }
        info!(group = %group.id, deadline = %deadline, "group created");
        Ok(group)
    }

    /// Changes a group's settings. Admin only.
    ///
    /// The invite code, wallet and membership never change. A new cycle
    /// restarts the collection schedule from now.
    #[instrument(skip_all, fields(group = %id, admin = %actor.user))]
    pub async fn update_group(&self, actor: &Actor, id: GroupId, update: GroupUpdate) -> Result<Group> {
        let group = self.load_group(id).await?;
        self.ensure_admin(actor, &group)?;

        let mut settings = group.settings();
        if let Some(name) = &update.name {
            settings.name = group_name(name)?;
        }
        if let Some(description) = update.description {
            settings.description = description;
        }
        if let Some(kind) = update.kind {
            settings.kind = kind;
        }
        if let Some(amount) = update.amount {
            settings.amount = amount;
        }
        if let Some(penalty) = update.penalty {
            settings.penalty = penalty;
        }
        if let Some(cycle) = update.cycle.filter(|&c| c != group.cycle) {
            settings.cycle = cycle;
            settings.collection_day = cycle.collection_day().to_string();
            settings.collection_deadline = self.collection_deadline(cycle, self.now())?;
        }

        let updated = self.groups.update_settings(group.id, settings).await?;
        info!(cycle = %updated.cycle, amount = %updated.amount, "group updated");
        Ok(updated)
    }

    /// Every group, oldest first. System admins only.
    pub async fn all_groups(&self, actor: &Actor) -> Result<Vec<Group>> {
        if !actor.is_system_admin() {
            return Err(LedgerError::Unauthorized(format!(
                "{} may not list all groups",
                actor.user
            )));
        }
        let mut groups = self.groups.get_all().await?;
        groups.sort_by_key(|g| g.created_at);
        Ok(groups)
    }

    fn collection_deadline(&self, cycle: Cycle, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        next_due_date(cycle, &now.with_timezone(&self.config.timezone))
            .map(|due| due.with_timezone(&Utc))
            .ok_or_else(|| LedgerError::InvalidInput("collection deadline out of range".to_string()))
    }

    pub async fn find_group_by_invite_code(&self, code: &str) -> Result<Group> {
        self.groups
            .find_by_invite_code(code)
            .await?
            .ok_or_else(|| LedgerError::not_found(Entity::Group, code))
    }

    /// A group as seen by its admin, its members or a system admin.
    pub async fn group(&self, actor: &Actor, id: GroupId) -> Result<Group> {
        let group = self.load_group(id).await?;
        self.ensure_participant(actor, &group)?;
        Ok(group)
    }

    /// Groups the user administers or belongs to, oldest first.
    pub async fn groups_for(&self, user: &UserId) -> Result<Vec<Group>> {
        let mut groups = self.groups.get_all().await?;
        groups.retain(|g| g.is_participant(user));
        groups.sort_by_key(|g| g.created_at);
        Ok(groups)
    }

    fn ensure_participant(&self, actor: &Actor, group: &Group) -> Result<()> {
        if group.is_participant(&actor.user) || actor.is_system_admin() {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized(format!(
                "{} is not part of group {}",
                actor.user, group.id
            )))
        }
    }

    fn ensure_admin(&self, actor: &Actor, group: &Group) -> Result<()> {
        if group.is_admin(&actor.user) {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized(format!(
                "{} is not the admin of group {}",
                actor.user, group.id
            )))
        }
    }

    /// Adds the actor to the pending set of the group holding `invite_code`.
    #[instrument(skip_all, fields(user = %actor.user))]
    pub async fn join_group(&self, actor: &Actor, invite_code: &str) -> Result<Group> {
        let group = self.find_group_by_invite_code(invite_code).await?;
        let group = self.groups.join(group.id, actor.user.clone()).await?;
        info!(group = %group.id, "member joined");
        self.notify(
            &group.admin,
            LedgerEvent::MemberJoined {
                group: group.id,
                group_name: group.name.clone(),
                member: actor.user.clone(),
            },
        )
        .await;
        Ok(group)
    }

    /// Removes `member` from whichever set holds them. Admin only; the admin
    /// cannot remove themselves.
    #[instrument(skip_all, fields(group = %group_id, member = %member))]
    pub async fn remove_member(&self, actor: &Actor, group_id: GroupId, member: &UserId) -> Result<Group> {
        let group = self.load_group(group_id).await?;
        self.ensure_admin(actor, &group)?;
        if group.is_admin(member) {
            return Err(LedgerError::InvalidInput(
                "the group admin cannot be removed".to_string(),
            ));
        }
        let group = self.groups.remove_member(group.id, member).await?;
        info!("member removed");
        self.notify(
            member,
            LedgerEvent::RemovedFromGroup {
                group: group.id,
                group_name: group.name.clone(),
            },
        )
        .await;
        Ok(group)
    }

    /// Schedules `collector`'s turn. Without an explicit date the turn falls on
    /// the next due date counted from the group's creation.
    #[instrument(skip_all, fields(group = %group_id, collector = %collector))]
    pub async fn schedule_collection(
        &self,
        actor: &Actor,
        group_id: GroupId,
        collector: &UserId,
        date: Option<DateTime<Utc>>,
    ) -> Result<Collection> {
        let group = self.load_group(group_id).await?;
        self.ensure_admin(actor, &group)?;
        if !group.membership.is_pending(collector) {
            return Err(LedgerError::NotMember(collector.clone()));
        }
        let date = match date {
            Some(date) => date,
            None => next_due_date(
                group.cycle,
                &group.created_at.with_timezone(&self.config.timezone),
            )
            .ok_or_else(|| LedgerError::InvalidInput("collection date out of range".to_string()))?
            .with_timezone(&Utc),
        };

        let collection = Collection::new(group.id, collector.clone(), date, self.now());
        self.collections.create(collection.clone()).await?;
        self.notify(
            collector,
            LedgerEvent::CollectionScheduled {
                group: group.id,
                group_name: group.name,
                date,
            },
        )
        .await;
        Ok(collection)
    }

    pub async fn collections(&self, actor: &Actor, group_id: GroupId) -> Result<Vec<Collection>> {
        let group = self.load_group(group_id).await?;
        self.ensure_participant(actor, &group)?;
        self.collections.for_group(group.id).await
    }

    /// Reminds every collector whose turn falls on `today` in the configured
    /// zone. Collections that cannot be processed are logged and skipped.
    #[instrument(skip(self))]
    pub async fn process_due_collections(&self, today: NaiveDate) -> Result<usize> {
        let tz = self.config.timezone;
        let start = tz
            .from_local_datetime(&today.and_time(chrono::NaiveTime::MIN))
            .earliest()
            .ok_or_else(|| LedgerError::InvalidInput(format!("no local midnight on {today}")))?;
        let end = today
            .checked_add_days(Days::new(1))
            .and_then(|next| tz.from_local_datetime(&next.and_time(chrono::NaiveTime::MIN)).earliest())
            .ok_or_else(|| LedgerError::InvalidInput(format!("{today} is out of range")))?;

        let due = self
            .collections
            .due_between(start.with_timezone(&Utc), end.with_timezone(&Utc))
            .await?;
        let mut processed = 0;
        for collection in due {
            let group = match self.load_group(collection.group).await {
                Ok(group) => group,
                Err(e) => {
                    warn!(collection = %collection.id, error = %e, "skipping collection");
                    continue;
                }
            };
            self.notify(
                &collection.collector,
                LedgerEvent::CollectionDue {
                    group: group.id,
                    group_name: group.name,
                    date: collection.date,
                },
            )
            .await;
            processed += 1;
        }
        info!(processed, "due collections processed");
        Ok(processed)
    }
}

fn group_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LedgerError::InvalidInput(
            "group name must not be empty".to_string(),
        ));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use crate::application::engine::LedgerEngine;
    use crate::config::LedgerConfig;
    use crate::domain::auth::Actor;
    use crate::domain::event::EventKind;
    use crate::domain::group::{ContributionType, Cycle, GroupUpdate, NewGroup};
    use crate::domain::ids::UserId;
    use crate::domain::money::{Amount, Balance};
    use crate::domain::ports::Stores;
    use crate::error::{GatewayError, LedgerError};
    use crate::infrastructure::clock::FixedClock;
    use crate::infrastructure::gateway::{SandboxBehaviour, SandboxGateway};
    use crate::infrastructure::notifier::RecordingNotifier;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;

    struct Harness {
        engine: LedgerEngine,
        gateway: SandboxGateway,
        notifier: RecordingNotifier,
    }

    fn harness() -> Harness {
        let gateway = SandboxGateway::new();
        let notifier = RecordingNotifier::new();
        // Friday 2026-10-16
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap());
        let engine = LedgerEngine::new(
            Stores::in_memory(),
            Box::new(gateway.clone()),
            Box::new(notifier.clone()),
            LedgerConfig::default(),
        )
        .with_clock(Box::new(clock));
        Harness {
            engine,
            gateway,
            notifier,
        }
    }

    fn new_group(cycle: Cycle) -> NewGroup {
        NewGroup {
            name: "  savers ".to_string(),
            description: String::new(),
            kind: ContributionType::DailySavings,
            amount: Amount::new(dec!(5000)).unwrap(),
            cycle,
            penalty: Balance::ZERO,
        }
    }

    #[tokio::test]
    async fn test_create_group() {
        let h = harness();
        let admin = Actor::member("admin");
        let group = h
            .engine
            .create_group(&admin, new_group(Cycle::Weekly))
            .await
            .unwrap();

        assert_eq!(group.name, "savers");
        assert_eq!(group.kind, ContributionType::DailySavings);
        assert_eq!(group.collection_day, "end of week");
        assert_eq!(
            group.collection_deadline,
            Utc.with_ymd_and_hms(2026, 10, 18, 23, 59, 59).unwrap()
        );
        assert!(group.membership.is_pending(&admin.user));
        assert_eq!(group.membership.len(), 1);

        let wallet = h.engine.wallet_details(&admin, group.wallet).await.unwrap();
        assert!(wallet.virtual_account.is_some());
        assert_eq!(
            h.engine
                .find_group_by_invite_code(&group.invite_code)
                .await
                .unwrap()
                .id,
            group.id
        );
    }

    #[tokio::test]
    async fn test_admin_updates_settings_but_not_roster() {
        let h = harness();
        let admin = Actor::member("admin");
        let ada = Actor::member("ada");
        let group = h
            .engine
            .create_group(&admin, new_group(Cycle::Weekly))
            .await
            .unwrap();
        h.engine.join_group(&ada, &group.invite_code).await.unwrap();

        let err = h
            .engine
            .update_group(&ada, group.id, GroupUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized(_)));

        let updated = h
            .engine
            .update_group(
                &admin,
                group.id,
                GroupUpdate {
                    name: Some(" weekly savers ".to_string()),
                    kind: Some(ContributionType::GroupContribution),
                    amount: Some(Amount::new(dec!(7500)).unwrap()),
                    cycle: Some(Cycle::Yearly),
                    ..GroupUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "weekly savers");
        assert_eq!(updated.kind, ContributionType::GroupContribution);
        assert_eq!(updated.amount, Amount::new(dec!(7500)).unwrap());
        assert_eq!(updated.collection_day, "last day of year");
        assert_eq!(
            updated.collection_deadline,
            Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).unwrap()
        );
        assert_eq!(updated.invite_code, group.invite_code);
        assert_eq!(updated.wallet, group.wallet);
        assert_eq!(updated.admin, group.admin);
        assert!(updated.membership.is_pending(&ada.user));
        assert_eq!(updated.membership.len(), 2);

        let err = h
            .engine
            .update_group(
                &admin,
                group.id,
                GroupUpdate {
                    name: Some("  ".to_string()),
                    ..GroupUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
        assert_eq!(h.engine.group(&admin, group.id).await.unwrap().name, "weekly savers");
    }

    #[tokio::test]
    async fn test_only_system_admin_lists_all_groups() {
        let h = harness();
        let first = h
            .engine
            .create_group(&Actor::member("admin"), new_group(Cycle::Daily))
            .await
            .unwrap();
        let second = h
            .engine
            .create_group(&Actor::member("other"), new_group(Cycle::Monthly))
            .await
            .unwrap();

        let err = h
            .engine
            .all_groups(&Actor::member("admin"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized(_)));

        let all = h.engine.all_groups(&Actor::system_admin("ops")).await.unwrap();
        let ids: Vec<_> = all.iter().map(|g| g.id).collect();
        assert_eq!(all.len(), 2);
        assert!(ids.contains(&first.id) && ids.contains(&second.id));
    }

    #[tokio::test]
    async fn test_create_group_rejects_blank_name() {
        let h = harness();
        let mut blank = new_group(Cycle::Daily);
        blank.name = "   ".to_string();
        assert!(matches!(
            h.engine.create_group(&Actor::member("admin"), blank).await,
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(h.engine.wallets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wallet_removed_when_account_fails() {
        let h = harness();
        h.gateway
            .set_behaviour(SandboxBehaviour {
                fail_account_creation: Some(GatewayError::Unavailable("maintenance".into())),
                ..SandboxBehaviour::default()
            })
            .await;

        let err = h
            .engine
            .open_user_wallet(&Actor::member("ada"))
            .await
            .unwrap_err();
        assert!(err.is_retriable());
        assert!(h.engine.wallets().await.unwrap().is_empty());

        h.gateway.set_behaviour(SandboxBehaviour::default()).await;
        h.engine.open_user_wallet(&Actor::member("ada")).await.unwrap();
        assert!(matches!(
            h.engine.open_user_wallet(&Actor::member("ada")).await,
            Err(LedgerError::AlreadyProcessed(_))
        ));
    }

    #[tokio::test]
    async fn test_join_and_remove() {
        let h = harness();
        let admin = Actor::member("admin");
        let ada = Actor::member("ada");
        let group = h
            .engine
            .create_group(&admin, new_group(Cycle::Monthly))
            .await
            .unwrap();

        h.engine.join_group(&ada, &group.invite_code).await.unwrap();
        assert!(matches!(
            h.engine.join_group(&ada, &group.invite_code).await,
            Err(LedgerError::AlreadyMember(_))
        ));
        assert!(matches!(
            h.engine.join_group(&ada, "bogus").await,
            Err(LedgerError::NotFound { .. })
        ));
        assert_eq!(h.engine.groups_for(&ada.user).await.unwrap().len(), 1);

        let joined = h.notifier.events_for(&admin.user).await;
        assert_eq!(joined[0].kind(), EventKind::MemberJoined);

        assert!(matches!(
            h.engine.remove_member(&ada, group.id, &admin.user).await,
            Err(LedgerError::Unauthorized(_))
        ));
        let group = h
            .engine
            .remove_member(&admin, group.id, &ada.user)
            .await
            .unwrap();
        assert!(!group.membership.contains(&ada.user));
        assert!(matches!(
            h.engine.remove_member(&admin, group.id, &ada.user).await,
            Err(LedgerError::NotMember(_))
        ));
        assert!(matches!(
            h.engine.group(&ada, group.id).await,
            Err(LedgerError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_schedule_and_process_collections() {
        let h = harness();
        let admin = Actor::member("admin");
        let group = h
            .engine
            .create_group(&admin, new_group(Cycle::Daily))
            .await
            .unwrap();

        let collection = h
            .engine
            .schedule_collection(&admin, group.id, &admin.user, None)
            .await
            .unwrap();
        assert_eq!(
            collection.date,
            Utc.with_ymd_and_hms(2026, 10, 16, 23, 59, 59).unwrap()
        );
        assert!(matches!(
            h.engine
                .schedule_collection(&admin, group.id, &UserId::from("ghost"), None)
                .await,
            Err(LedgerError::NotMember(_))
        ));

        let today = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        assert_eq!(h.engine.process_due_collections(today).await.unwrap(), 1);
        let tomorrow = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        assert_eq!(h.engine.process_due_collections(tomorrow).await.unwrap(), 0);

        let kinds: Vec<EventKind> = h
            .notifier
            .events_for(&admin.user)
            .await
            .iter()
            .map(|e| e.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![EventKind::CollectionScheduled, EventKind::CollectionDue]
        );
        assert_eq!(
            h.engine.collections(&admin, group.id).await.unwrap(),
            vec![collection]
        );
    }

    #[tokio::test]
    async fn test_deactivate_virtual_account() {
        let h = harness();
        let ada = Actor::member("ada");
        let wallet = h.engine.open_user_wallet(&ada).await.unwrap();
        let account = wallet.virtual_account.clone().unwrap();

        assert!(matches!(
            h.engine
                .deactivate_virtual_account(&Actor::member("bo"), wallet.id)
                .await,
            Err(LedgerError::Unauthorized(_))
        ));
        h.engine
            .deactivate_virtual_account(&ada, wallet.id)
            .await
            .unwrap();
        assert!(!h.gateway.is_active(&account.account_id).await);

        let err = h
            .engine
            .fund_from_external_source(
                &ada,
                wallet.id,
                Amount::new(dec!(10)).unwrap(),
                None,
                std::time::Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }
}
