use crate::error::{LedgerError, Result};
use chrono::{FixedOffset, Offset, Utc};
use std::time::Duration;

/// Default deadline for each payment gateway leg.
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Currency funding requests are denominated in.
pub const DEFAULT_CURRENCY: &str = "NGN";

/// Engine-wide settings, fixed for the lifetime of a [`LedgerEngine`].
///
/// [`LedgerEngine`]: crate::application::engine::LedgerEngine
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    pub gateway_timeout: Duration,
    /// Zone in which collection days and due dates are computed.
    pub timezone: FixedOffset,
    pub currency: String,
    /// Shared secret for payment provider webhooks. Webhooks are refused when unset.
    pub webhook_secret: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
            timezone: Utc.fix(),
            currency: DEFAULT_CURRENCY.to_string(),
            webhook_secret: None,
        }
    }
}

impl LedgerConfig {
    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Result<Self> {
        self.timezone = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                LedgerError::InvalidInput(format!("UTC offset out of range: {minutes} minutes"))
            })?;
        Ok(self)
    }

    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }
}
