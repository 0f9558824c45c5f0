//! Background refresh of active sessions nearing expiry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::registry::SessionRegistry;

/// Session ids touched by one rotation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub rotated: Vec<String>,
    pub failed: Vec<String>,
}

pub struct RotationService {
    registry: Arc<SessionRegistry>,
}

impl RotationService {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Rotate every active session within the refresh buffer of expiry.
    /// Failures are logged; the session stays active.
    pub async fn rotate_expiring(&self) -> Result<RotationReport> {
        let now = Utc::now();
        let buffer = self.registry.context().config.refresh_buffer();
        let mut report = RotationReport::default();

        for session in self.registry.active_sessions()? {
            if !session.needs_rotation(now, buffer) {
                continue;
            }
            debug!(session_id = %session.session_id, expires = ?session.session_token_expiration, "Rotating session");
            match self.registry.rotate(&session.session_id).await {
                Ok(()) => report.rotated.push(session.session_id),
                Err(e) => {
                    warn!(session_id = %session.session_id, name = %session.session_name, error = %e, "Session rotation failed");
                    report.failed.push(session.session_id);
                }
            }
        }

        if !report.rotated.is_empty() || !report.failed.is_empty() {
            info!(rotated = report.rotated.len(), failed = report.failed.len(), "Rotation pass complete");
        }
        Ok(report)
    }

    /// Check on every tick until cancelled.
    pub async fn run(&self, check_interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Rotation loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.rotate_expiring().await {
                        warn!(error = %e, "Rotation pass failed");
                    }
                }
            }
        }
    }
}
