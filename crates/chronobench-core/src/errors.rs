use std::fmt;

/// The sandbox could not prepare (build) the requested revision.
///
/// Recoverable once per revision via a clean rebuild; beyond that the
/// revision becomes a blacklist candidate.
#[derive(Debug, Clone)]
pub struct FailedToBuildError(pub String);

impl fmt::Display for FailedToBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to build revision: {}", self.0)
    }
}

impl std::error::Error for FailedToBuildError {}

/// Unrecognized run-option / run-order. Raised before any revision is
/// touched.
#[derive(Debug, Clone)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Constraint violation in the result store: duplicate (checksum, revision)
/// write, or an update against a row that does not exist. Aborts the current
/// revision's transaction.
#[derive(Debug, Clone)]
pub struct StoreIntegrityError(pub String);

impl fmt::Display for StoreIntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store integrity error: {}", self.0)
    }
}

impl std::error::Error for StoreIntegrityError {}

/// True if the error chain bottoms out in a sandbox build failure.
pub fn is_build_failure(e: &anyhow::Error) -> bool {
    e.downcast_ref::<FailedToBuildError>().is_some()
}
