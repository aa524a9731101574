//! Process-wide maximum score.

use parking_lot::Mutex;

/// Tracks the highest score accepted by this process.
///
/// [`HighScoreTracker::offer`] is the only way to change the maximum.
#[derive(Debug)]
pub struct HighScoreTracker {
    highest: Mutex<f64>,
}

impl HighScoreTracker {
    /// Creates a tracker starting at `initial`.
    pub fn new(initial: f64) -> Self {
        Self {
            highest: Mutex::new(initial),
        }
    }

    /// Raises the maximum to `score` if it is strictly higher.
    ///
    /// Returns true when `score` became the new maximum.
    pub fn offer(&self, score: f64) -> bool {
        let mut highest = self.highest.lock();
        if score > *highest {
            *highest = score;
            true
        } else {
            false
        }
    }

    /// Current maximum.
    pub fn highest(&self) -> f64 {
        *self.highest.lock()
    }
}

impl Default for HighScoreTracker {
    fn default() -> Self {
        Self::new(0.0)
    }
}
