//! Payment provider callbacks.

use super::engine::LedgerEngine;
use super::saga::{Saga, Undo};
use crate::domain::saga::SagaKey;
use crate::domain::transaction::{Transaction, TransactionStatus};
use crate::error::{LedgerError, Result};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, instrument};

type HmacSha256 = Hmac<Sha256>;

const CHARGE_COMPLETED: &str = "charge.completed";
const SUCCESSFUL: &str = "successful";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookData {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tx_ref: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Credited(Transaction),
    /// The reference was already credited.
    AlreadyProcessed,
    Ignored,
}

/// Hex-encoded HMAC-SHA256 of `body`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| LedgerError::InvalidInput(format!("unusable webhook secret: {e}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks `signature_hex` against the body in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> Result<()> {
    let rejected = || LedgerError::Unauthorized("invalid webhook signature".to_string());
    let signature = hex::decode(signature_hex.trim()).map_err(|_| rejected())?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| LedgerError::InvalidInput(format!("unusable webhook secret: {e}")))?;
    mac.update(body);
    mac.verify_slice(&signature).map_err(|_| rejected())
}

impl LedgerEngine {
    /// Handles a provider callback for an external funding.
    ///
    /// The signature is checked over the raw body before anything is parsed.
    /// A completed, successful charge for a known pending reference is
    /// re-verified with the provider and credited once; repeats report
    /// `AlreadyProcessed`.
    #[instrument(skip_all)]
    pub async fn ingest_webhook(&self, body: &[u8], signature_hex: &str) -> Result<WebhookOutcome> {
        let secret = self.config.webhook_secret.as_deref().ok_or_else(|| {
            LedgerError::InvalidInput("no webhook secret configured".to_string())
        })?;
        verify_signature(secret, body, signature_hex)?;

        let payload: WebhookPayload = serde_json::from_slice(body)
            .map_err(|e| LedgerError::InvalidInput(format!("malformed webhook payload: {e}")))?;
        let data = &payload.data;
        if payload.event != CHARGE_COMPLETED || data.status != SUCCESSFUL || data.tx_ref.is_empty()
        {
            debug!(event = %payload.event, status = %data.status, "webhook ignored");
            return Ok(WebhookOutcome::Ignored);
        }

        let Some(tx) = self.transactions.find_by_external_ref(&data.tx_ref).await? else {
            debug!(reference = %data.tx_ref, "webhook for unknown reference");
            return Ok(WebhookOutcome::Ignored);
        };
        match tx.status {
            TransactionStatus::Success => return Ok(WebhookOutcome::AlreadyProcessed),
            TransactionStatus::Failed => return Ok(WebhookOutcome::Ignored),
            TransactionStatus::Pending => {}
        }
        if data.amount != tx.amount.value() {
            return Err(LedgerError::InvalidInput(format!(
                "webhook amount {} does not match recorded {}",
                data.amount, tx.amount
            )));
        }

        let mut saga = match Saga::begin(self, SagaKey::Funding(data.tx_ref.clone())).await {
            Ok(saga) => saga,
            // The in-flight call will settle it.
            Err(LedgerError::AlreadyProcessed(_)) => return Ok(WebhookOutcome::AlreadyProcessed),
            Err(e) => return Err(e),
        };
        let tx = match self.funding_by_reference(&data.tx_ref).await {
            Ok(tx) => tx,
            Err(e) => return Err(saga.abort(e).await),
        };
        if tx.status == TransactionStatus::Success {
            saga.finish().await;
            return Ok(WebhookOutcome::AlreadyProcessed);
        }
        saga.guard(Undo::FailTransaction(tx.id));

        let settled = self
            .settle_funding(saga, tx, &data.tx_ref, self.config.gateway_timeout)
            .await?;
        if settled.status == TransactionStatus::Success {
            Ok(WebhookOutcome::Credited(settled))
        } else {
            Ok(WebhookOutcome::Ignored)
        }
    }
}
