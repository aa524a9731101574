//! Shared application state.

use crate::error::AggregatorError;
use crate::notify::{Notifier, TracingNotifier};
use crate::score::ScoreReport;
use crate::score_log::ScoreLog;
use crate::tracker::HighScoreTracker;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Outcome of one score submission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Submission {
    /// Whether the score became the new maximum.
    pub new_highest: bool,
    /// Maximum after the submission.
    pub highest: f64,
}

/// Accepts scores, logs new maxima and notifies about them.
pub struct ScoreBoard {
    tracker: HighScoreTracker,
    // Held across offer and append so the log stays in ascending order.
    log: Mutex<ScoreLog>,
    notifier: Arc<dyn Notifier>,
}

impl ScoreBoard {
    pub fn new(tracker: HighScoreTracker, log: ScoreLog, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            tracker,
            log: Mutex::new(log),
            notifier,
        }
    }

    /// Current maximum.
    pub fn highest(&self) -> f64 {
        self.tracker.highest()
    }

    /// Records `report`, appending it to the log if it beats the maximum.
    pub async fn submit(&self, report: &ScoreReport) -> Result<Submission, AggregatorError> {
        let log = self.log.lock().await;

        if !self.tracker.offer(report.score) {
            debug!(score = report.score, highest = self.tracker.highest(), "Score below maximum");
            return Ok(Submission {
                new_highest: false,
                highest: self.tracker.highest(),
            });
        }

        let pretty = serde_json::to_string_pretty(report)?;
        log.append(&pretty).await?;
        info!(score = report.score, path = %log.path().display(), "Score saved");
        drop(log);

        self.notifier.notify(report, &pretty).await;

        Ok(Submission {
            new_highest: true,
            highest: report.score,
        })
    }
}

/// Application state for Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub board: Arc<ScoreBoard>,
}

impl AppState {
    pub fn new(board: ScoreBoard) -> Self {
        Self {
            board: Arc::new(board),
        }
    }

    /// State starting from zero with a log at `path` and log-only notifications.
    pub fn with_log_path(path: impl Into<std::path::PathBuf>) -> Self {
        Self::new(ScoreBoard::new(
            HighScoreTracker::default(),
            ScoreLog::new(path),
            Arc::new(TracingNotifier),
        ))
    }
}
