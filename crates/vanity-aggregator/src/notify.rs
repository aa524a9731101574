//! New high score notifications.

use crate::score::ScoreReport;
use async_trait::async_trait;
use tracing::info;

/// Receives every new high score after it has been logged.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers `report`; `pretty` is the text written to the score log.
    async fn notify(&self, report: &ScoreReport, pretty: &str);
}

/// Notifier that emits a log event.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, report: &ScoreReport, pretty: &str) {
        info!(
            score = report.score,
            address = %report.address,
            salt = %report.salt,
            "New high score\n{}",
            pretty
        );
    }
}
