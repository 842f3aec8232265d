use super::command_reader::{Op, ScriptCommand};
use super::wallet_writer::WalletBalance;
use crate::application::engine::LedgerEngine;
use crate::domain::approval::Decision;
use crate::domain::auth::Actor;
use crate::domain::group::{Cycle, Group, NewGroup};
use crate::domain::money::{Amount, Balance};
use crate::domain::transaction::PaymentMethod;
use crate::domain::wallet::WalletKind;
use crate::error::{Entity, LedgerError, Result};
use tracing::debug;

/// Applies script commands to an engine, resolving group names against the
/// stored groups so that a script can continue a persisted ledger.
pub struct ScriptRunner {
    engine: LedgerEngine,
}

impl ScriptRunner {
    pub fn new(engine: LedgerEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &LedgerEngine {
        &self.engine
    }

    pub async fn execute(&self, command: &ScriptCommand) -> Result<()> {
        debug!(op = %command.op, actor = %command.actor, "executing");
        let actor = Actor::member(command.actor.clone());
        let engine = &self.engine;

        match command.op {
            Op::OpenWallet => {
                engine.open_user_wallet(&actor).await?;
            }
            Op::Fund => {
                let wallet = engine.personal_wallet(&actor.user).await?;
                engine
                    .fund_from_external_source(
                        &actor,
                        wallet.id,
                        Amount::new(command.amount()?)?,
                        command.reference.clone(),
                        engine.config().gateway_timeout,
                    )
                    .await?;
            }
            Op::CreateGroup => {
                let penalty = match command.penalty {
                    Some(penalty) => Balance::new(penalty)?,
                    None => Balance::ZERO,
                };
                let new = NewGroup {
                    name: command.group()?.to_string(),
                    description: String::new(),
                    kind: command.kind()?,
                    amount: Amount::new(command.amount()?)?,
                    cycle: command.cycle.unwrap_or(Cycle::Monthly),
                    penalty,
                };
                engine.create_group(&actor, new).await?;
            }
            Op::Join => {
                let code = match &command.reference {
                    Some(code) => code.clone(),
                    None => self.resolve(command.group()?).await?.invite_code,
                };
                engine.join_group(&actor, &code).await?;
            }
            Op::Remove => {
                let group = self.resolve(command.group()?).await?;
                engine
                    .remove_member(&actor, group.id, command.member()?)
                    .await?;
            }
            Op::Contribute => {
                let group = self.resolve(command.group()?).await?;
                engine
                    .contribute(
                        &actor,
                        group.id,
                        Amount::new(command.amount()?)?,
                        PaymentMethod::Wallet,
                    )
                    .await?;
            }
            Op::RequestPayout => {
                let group = self.resolve(command.group()?).await?;
                engine
                    .request_payout(
                        &actor,
                        group.id,
                        command.member()?,
                        Amount::new(command.amount()?)?,
                        PaymentMethod::Wallet,
                    )
                    .await?;
            }
            Op::Approve | Op::Reject => {
                let decision = if command.op == Op::Approve {
                    Decision::Approve
                } else {
                    Decision::Reject
                };
                let group = self.resolve(command.group()?).await?;
                let member = command.member()?;
                let wallet = engine.personal_wallet(member).await?;

                let mut approval = None;
                for candidate in engine.pending_approvals(&actor).await? {
                    if candidate.group != group.id {
                        continue;
                    }
                    let tx = engine.transactions.get(candidate.transaction).await?;
                    if tx.is_some_and(|tx| tx.to_wallet == wallet.id) {
                        approval = Some(candidate);
                        break;
                    }
                }
                let approval = approval.ok_or_else(|| {
                    LedgerError::not_found(
                        Entity::Approval,
                        format!("pending payout to {member} in {}", group.name),
                    )
                })?;
                engine.approve_payout(&actor, approval.id, decision).await?;
            }
            Op::Schedule => {
                let group = self.resolve(command.group()?).await?;
                engine
                    .schedule_collection(&actor, group.id, command.member()?, None)
                    .await?;
            }
        }
        Ok(())
    }

    /// The oldest group carrying `name`.
    async fn resolve(&self, name: &str) -> Result<Group> {
        let mut groups = self.engine.groups.get_all().await?;
        groups.retain(|g| g.name == name);
        groups
            .into_iter()
            .min_by_key(|g| g.created_at)
            .ok_or_else(|| LedgerError::not_found(Entity::Group, name))
    }

    /// Every wallet with its report label, sorted by label.
    pub async fn balances(&self) -> Result<Vec<WalletBalance>> {
        let groups = self.engine.groups.get_all().await?;
        let mut balances: Vec<WalletBalance> = self
            .engine
            .wallets()
            .await?
            .into_iter()
            .map(|wallet| {
                let label = match wallet.kind {
                    WalletKind::User => wallet.owner.to_string(),
                    WalletKind::Group => groups
                        .iter()
                        .find(|g| g.wallet == wallet.id)
                        .map(|g| g.name.clone())
                        .unwrap_or_else(|| wallet.id.to_string()),
                };
                WalletBalance {
                    label,
                    kind: wallet.kind,
                    balance: wallet.balance,
                }
            })
            .collect();
        balances.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(balances)
    }
}
