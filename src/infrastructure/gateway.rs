use crate::domain::payment::{
    FundingReceipt, FundingRequest, SettlementStatus, Verification, VirtualAccountRequest,
};
use crate::domain::ports::PaymentGateway;
use crate::domain::wallet::VirtualAccount;
use crate::error::GatewayError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// How the sandbox answers. The default settles every charge immediately
/// for the requested amount.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxBehaviour {
    pub fail_account_creation: Option<GatewayError>,
    pub fail_funding: Option<GatewayError>,
    pub fail_verification: Option<GatewayError>,
    pub funding_delay: Option<Duration>,
    pub verification_delay: Option<Duration>,
    /// Status new charges settle with.
    pub settle_as: SettlementStatus,
    /// Amount reported on verification instead of the requested one.
    pub verified_amount: Option<Decimal>,
}

impl Default for SandboxBehaviour {
    fn default() -> Self {
        Self {
            fail_account_creation: None,
            fail_funding: None,
            fail_verification: None,
            funding_delay: None,
            verification_delay: None,
            settle_as: SettlementStatus::Successful,
            verified_amount: None,
        }
    }
}

#[derive(Debug)]
struct Charge {
    status: SettlementStatus,
    amount: Decimal,
}

#[derive(Debug, Default)]
struct SandboxState {
    behaviour: SandboxBehaviour,
    accounts: HashMap<String, VirtualAccount>,
    deactivated: HashSet<String>,
    charges: Vec<Charge>,
    /// Both the provider ref and the merchant reference point at a charge.
    charge_refs: HashMap<String, usize>,
    funding_calls: usize,
    sequence: u64,
}

/// A payment provider stand-in that keeps its accounts and charges in memory.
///
/// Used by the CLI and by tests, which reconfigure it to decline, stall or
/// misreport amounts.
#[derive(Debug, Clone, Default)]
pub struct SandboxGateway {
    state: Arc<Mutex<SandboxState>>,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behaviour(behaviour: SandboxBehaviour) -> Self {
        Self {
            state: Arc::new(Mutex::new(SandboxState {
                behaviour,
                ..SandboxState::default()
            })),
        }
    }

    pub async fn set_behaviour(&self, behaviour: SandboxBehaviour) {
        self.state.lock().await.behaviour = behaviour;
    }

    /// Changes the provider-side outcome of an existing charge, as a late
    /// settlement would.
    pub async fn settle(&self, reference: &str, status: SettlementStatus) {
        let mut state = self.state.lock().await;
        let index = state.charge_refs.get(reference).copied();
        if let Some(charge) = index.and_then(|i| state.charges.get_mut(i)) {
            charge.status = status;
        }
    }

    /// Number of funding requests that reached the provider.
    pub async fn funding_calls(&self) -> usize {
        self.state.lock().await.funding_calls
    }

    pub async fn is_active(&self, account_id: &str) -> bool {
        let state = self.state.lock().await;
        state.accounts.contains_key(account_id) && !state.deactivated.contains(account_id)
    }

    async fn behaviour(&self) -> SandboxBehaviour {
        self.state.lock().await.behaviour.clone()
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_virtual_account(
        &self,
        request: &VirtualAccountRequest,
    ) -> Result<VirtualAccount, GatewayError> {
        let mut state = self.state.lock().await;
        if let Some(err) = state.behaviour.fail_account_creation.clone() {
            return Err(err);
        }
        state.sequence += 1;
        let account = VirtualAccount {
            account_id: format!("VA-{:06}", state.sequence),
            account_number: format!("{:010}", 9_000_000_000u64 + state.sequence),
            bank_name: "Sandbox Bank".to_string(),
        };
        debug!(owner = %request.owner, account = %account.account_id, "virtual account created");
        state
            .accounts
            .insert(account.account_id.clone(), account.clone());
        Ok(account)
    }

    async fn get_virtual_account(&self, account_id: &str) -> Result<VirtualAccount, GatewayError> {
        let state = self.state.lock().await;
        state
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| GatewayError::Declined(format!("unknown account {account_id}")))
    }

    async fn deactivate_virtual_account(&self, account_id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        if !state.accounts.contains_key(account_id) {
            return Err(GatewayError::Declined(format!(
                "unknown account {account_id}"
            )));
        }
        state.deactivated.insert(account_id.to_string());
        Ok(())
    }

    async fn fund_virtual_account(
        &self,
        account_id: &str,
        request: &FundingRequest,
    ) -> Result<FundingReceipt, GatewayError> {
        let behaviour = self.behaviour().await;
        if let Some(delay) = behaviour.funding_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        state.funding_calls += 1;
        if let Some(err) = behaviour.fail_funding {
            return Err(err);
        }
        // Accounts the sandbox does not know were opened in an earlier session
        // against a persistent ledger.
        if state.deactivated.contains(account_id) {
            return Err(GatewayError::Declined(format!(
                "account {account_id} is not active"
            )));
        }

        state.sequence += 1;
        let transaction_ref = format!("SBX-{:08}", state.sequence);
        let charge = Charge {
            status: behaviour.settle_as,
            amount: behaviour
                .verified_amount
                .unwrap_or_else(|| request.amount.value()),
        };
        let index = state.charges.len();
        state.charges.push(charge);
        state.charge_refs.insert(transaction_ref.clone(), index);
        state.charge_refs.insert(request.reference.clone(), index);

        Ok(FundingReceipt {
            transaction_ref,
            status: behaviour.settle_as,
        })
    }

    async fn verify_transaction(&self, transaction_ref: &str) -> Result<Verification, GatewayError> {
        let behaviour = self.behaviour().await;
        if let Some(delay) = behaviour.verification_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = behaviour.fail_verification {
            return Err(err);
        }

        let state = self.state.lock().await;
        let charge = state
            .charge_refs
            .get(transaction_ref)
            .and_then(|&index| state.charges.get(index))
            .ok_or_else(|| {
                GatewayError::Declined(format!("unknown transaction {transaction_ref}"))
            })?;
        Ok(Verification {
            status: charge.status,
            amount: charge.amount,
        })
    }
}
