use std::time::Duration;

use thiserror::Error;

/// Canonical error type for harness operations.
///
/// Only [`HarnessError::Unreachable`] is transient; the convergence waiter
/// retries it until its deadline. Every other variant is fatal to a scenario.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Endpoint could not be reached (connection refused, request timeout).
    #[error("endpoint `{endpoint}` unreachable: {message}")]
    Unreachable {
        /// `host:port` or URL that was contacted.
        endpoint: String,
        /// Underlying transport error.
        message: String,
    },

    /// Endpoint answered with something that is not a metrics document.
    #[error("malformed metrics document from `{endpoint}`: {message}")]
    MalformedDocument {
        /// `host:port` or URL that was contacted.
        endpoint: String,
        /// Parse or status failure details.
        message: String,
    },

    /// No entity of the requested kind carries the requested metric.
    #[error("metric `{metric}` not found on any `{entity_kind}` entity")]
    MetricNotFound {
        /// Entity kind that was searched (e.g. `"cluster"`).
        entity_kind: String,
        /// Metric name that was searched for.
        metric: String,
    },

    /// A convergence condition did not hold before its deadline.
    #[error(
        "`{condition}` did not converge within {timeout:?} (elapsed {elapsed:?}, last observed: {last_observed})"
    )]
    ConvergenceTimeout {
        /// Human-readable condition name.
        condition: String,
        /// Last value the predicate reported.
        last_observed: String,
        /// Time spent waiting.
        elapsed: Duration,
        /// Configured timeout.
        timeout: Duration,
    },

    /// The control plane rejected an administrative request.
    #[error("admin rpc `{operation}` failed: {message}")]
    AdminRpc {
        /// Operation name (e.g. `"submit_blacklist"`).
        operation: &'static str,
        /// Rejection reason reported by the control plane.
        message: String,
    },

    /// The workload generator reported a failure or exited with an error.
    #[error("workload failure: {message}")]
    WorkloadFailure {
        /// Failure description.
        message: String,
    },

    /// An observed value disagrees with the expected invariant.
    #[error("assertion violated: {message}")]
    AssertionViolation {
        /// What was expected and what was seen.
        message: String,
    },

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Creates an `Unreachable` variant.
    #[must_use]
    pub fn unreachable(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a `MalformedDocument` variant.
    #[must_use]
    pub fn malformed(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedDocument {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a `MetricNotFound` variant.
    #[must_use]
    pub fn metric_not_found(entity_kind: impl Into<String>, metric: impl Into<String>) -> Self {
        Self::MetricNotFound {
            entity_kind: entity_kind.into(),
            metric: metric.into(),
        }
    }

    /// Creates an `AdminRpc` variant.
    #[must_use]
    pub fn admin_rpc(operation: &'static str, message: impl Into<String>) -> Self {
        Self::AdminRpc {
            operation,
            message: message.into(),
        }
    }

    /// Creates a `WorkloadFailure` variant.
    #[must_use]
    pub fn workload_failure(message: impl Into<String>) -> Self {
        Self::WorkloadFailure {
            message: message.into(),
        }
    }

    /// Creates an `AssertionViolation` variant.
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::AssertionViolation {
            message: message.into(),
        }
    }

    /// Whether a polling loop may retry past this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

impl From<config::ConfigError> for HarnessError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Convenient result alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;
