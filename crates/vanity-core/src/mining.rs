//! Mining job payloads, results and failure taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Payload describing one vanity salt search.
///
/// Field names are camelCase on the wire so jobs written by existing
/// producers decode unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MiningPayload {
    /// Deployer address (`0x` + 40 hex digits).
    #[validate(custom(function = "crate::validation::rules::hex_address"))]
    pub deployer_address: String,

    /// Init code hash (`0x` + 64 hex digits).
    #[validate(custom(function = "crate::validation::rules::hex_word"))]
    pub init_code_hash: String,

    /// Producer-supplied correlation id.
    #[validate(custom(function = "crate::validation::rules::not_blank"))]
    pub token_id: String,

    /// Minimum count of leading vanity nibbles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 40))]
    pub min_leading_bs: Option<u32>,
}

impl MiningPayload {
    /// Creates a payload without a vanity threshold.
    pub fn new(
        deployer_address: impl Into<String>,
        init_code_hash: impl Into<String>,
        token_id: impl Into<String>,
    ) -> Self {
        Self {
            deployer_address: deployer_address.into(),
            init_code_hash: init_code_hash.into(),
            token_id: token_id.into(),
            min_leading_bs: None,
        }
    }

    /// Sets the vanity threshold.
    #[must_use]
    pub fn with_min_leading_bs(mut self, min_leading_bs: u32) -> Self {
        self.min_leading_bs = Some(min_leading_bs);
        self
    }

    /// Returns the vanity threshold, falling back to `default`.
    #[must_use]
    pub fn threshold_or(&self, default: u32) -> u32 {
        self.min_leading_bs.unwrap_or(default)
    }
}

/// A discovered salt and the address it yields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiningResult {
    /// Salt (`0x` + 64 hex digits).
    pub salt: String,

    /// Resulting vanity address (`0x` + 40 hex digits).
    pub vanity_address: String,
}

/// Why a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// Deadline elapsed before a result was found.
    Timeout,
    /// Process exited cleanly without printing a result.
    NoResultFound,
    /// Supervising the running process failed.
    ProcessError,
    /// Process exited abnormally without printing a result.
    ProcessNonzeroExit,
    /// Compute binary could not be launched.
    SpawnError,
    /// Broker revoked the lease too many times.
    StalledExhausted,
}

impl FailureReason {
    /// All reasons, for metric registration and tests.
    pub const ALL: [FailureReason; 6] = [
        FailureReason::Timeout,
        FailureReason::NoResultFound,
        FailureReason::ProcessError,
        FailureReason::ProcessNonzeroExit,
        FailureReason::SpawnError,
        FailureReason::StalledExhausted,
    ];

    /// Returns the wire form of the reason.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::NoResultFound => "no-result-found",
            Self::ProcessError => "process-error",
            Self::ProcessNonzeroExit => "process-nonzero-exit",
            Self::SpawnError => "spawn-error",
            Self::StalledExhausted => "stalled-exhausted",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reason with a diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Machine-readable reason.
    pub reason: FailureReason,

    /// Human-readable detail.
    pub message: String,
}

impl JobFailure {
    /// Creates a failure.
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}
