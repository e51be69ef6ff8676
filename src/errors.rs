// =============================================================================
// Error Kinds
// =============================================================================
//
// The six error kinds the engine distinguishes, each with its own
// propagation policy (see the module doc comments at each call site for the
// policy that applies). Callers branch on variant, so these are hand-rolled
// rather than a single `anyhow::Error` — `anyhow` is reserved for I/O
// boundaries (config load, broker transport) where nothing downstream needs
// to match on the failure kind.
// =============================================================================

use std::fmt;

/// Malformed inbound payload. Maps to HTTP 400 at the webhook boundary, and
/// the signal is dropped — never retried.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed on `{}`: {}", self.field, self.reason)
    }
}

impl std::error::Error for ValidationError {}

/// Order rejected or connection blip. Retry is never automatic for order
/// submission (the caller decides); read-only queries instead fall back to
/// a stale-or-default value and log a warning.
#[derive(Debug, Clone, PartialEq)]
pub struct TransientBrokerError {
    pub operation: String,
    pub detail: String,
}

impl fmt::Display for TransientBrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "broker error during `{}`: {}", self.operation, self.detail)
    }
}

impl std::error::Error for TransientBrokerError {}

/// Missing credentials or a corrupt score/runtime config file. Fail-fast at
/// startup; never surfaces after the process is up.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Persistence (DB) failure. Logged; risk checks treat it as a pass and
/// decisions proceed — a sick store must never make the system both unable
/// to trade and unable to recover.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceError {
    pub operation: String,
    pub detail: String,
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "persistence error during `{}`: {}", self.operation, self.detail)
    }
}

impl std::error::Error for PersistenceError {}

/// Not an error: a documented `blocked` result with a human-readable reason
/// (news filter, market closed, risk gate). Recorded in the decision record
/// so audits can explain skipped trades.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalPolicyBlock {
    pub reason: String,
}

impl fmt::Display for ExternalPolicyBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blocked: {}", self.reason)
    }
}

impl std::error::Error for ExternalPolicyBlock {}

/// An internal invariant was about to be violated (e.g. SL on the wrong
/// side after break-even). Logged at ERROR, the offending update is
/// skipped, and the caller continues — the next tick re-attempts from the
/// last known-good state.
#[derive(Debug, Clone, PartialEq)]
pub struct InvariantViolation {
    pub invariant: String,
    pub detail: String,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invariant violated ({}): {}", self.invariant, self.detail)
    }
}

impl std::error::Error for InvariantViolation {}
