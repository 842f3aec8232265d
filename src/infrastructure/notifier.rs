use crate::domain::event::LedgerEvent;
use crate::domain::ids::UserId;
use crate::domain::ports::Notifier;
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::info;

/// Writes every event to the log instead of delivering it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn emit(&self, user: &UserId, event: LedgerEvent) -> Result<()> {
        info!(%user, kind = %event.kind(), message = %event.message(), "notification");
        Ok(())
    }
}

/// Keeps emitted events in memory so callers can inspect them.
///
/// Can be switched into a failing mode to exercise best-effort delivery.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<RwLock<Vec<(UserId, LedgerEvent)>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn events(&self) -> Vec<(UserId, LedgerEvent)> {
        self.events.read().await.clone()
    }

    pub async fn events_for(&self, user: &UserId) -> Vec<LedgerEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|(to, _)| to == user)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn emit(&self, user: &UserId, event: LedgerEvent) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LedgerError::Io(std::io::Error::other(
                "notification channel closed",
            )));
        }
        self.events.write().await.push((user.clone(), event));
        Ok(())
    }
}
