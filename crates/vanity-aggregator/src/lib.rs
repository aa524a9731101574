//! # Vanity Aggregator
//!
//! Receives scored vanity addresses from miners, keeps the highest score
//! seen by this process and appends every new maximum to a score log.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod notify;
pub mod router;
pub mod score;
pub mod score_log;
pub mod state;
pub mod tracker;

pub use error::{AggregatorError, AppError};
pub use notify::{Notifier, TracingNotifier};
pub use router::create_router;
pub use score::{ScoreBreakdown, ScoreReport};
pub use score_log::ScoreLog;
pub use state::{AppState, ScoreBoard, Submission};
pub use tracker::HighScoreTracker;
