use std::error::Error as StdError;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tracing::error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors surfaced by query compilation, execution and the storage layer.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A storage backend failure, classified as temporary or permanent.
    #[error("{0}")]
    Backend(#[from] BackendError),
    /// A backend failure that escaped the retry executor for a named operation.
    #[error("{operation} failed: {source}")]
    Operation {
        /// Name of the operation that was being executed.
        operation: String,
        /// The terminal backend failure.
        #[source]
        source: BackendError,
    },
    /// No sort-key candidate of the type can answer the constrained query.
    #[error("schema does not support the specified query constraints for type {type_name}")]
    Unsatisfiable {
        /// Name of the offending relation type.
        type_name: String,
    },
    /// A query mixed property keys and edge labels, or asked for the wrong category.
    #[error("querying for {requested} but {type_name} is {actual}")]
    CategoryMismatch {
        /// Category the query returns.
        requested: &'static str,
        /// Kind of the offending type.
        actual: &'static str,
        /// Name of the offending type.
        type_name: String,
    },
    /// The requested feature is not supported by this query path.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Invalid argument with a static description.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Invalid argument with a formatted description.
    #[error("invalid argument: {0}")]
    InvalidOwned(String),
    /// A named entity could not be found.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Stored data could not be interpreted.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Configuration could not be parsed or failed validation.
    #[error("configuration error: {0}")]
    Config(String),
}

impl GraphError {
    /// Returns true when the innermost backend failure in the cause chain is temporary.
    pub fn is_temporary(&self) -> bool {
        innermost_backend_error(self).is_some_and(BackendError::is_temporary)
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        GraphError::Serialization(err.to_string())
    }
}

/// Failures reported by storage backends.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Transient failure (timeout, overload, contention) that may succeed on retry.
    #[error("temporary backend failure: {message}")]
    Temporary {
        /// Human-readable description.
        message: String,
        /// Underlying cause, if any.
        #[source]
        cause: Option<Box<GraphError>>,
    },
    /// Failure that will not go away by retrying.
    #[error("permanent backend failure: {message}")]
    Permanent {
        /// Human-readable description.
        message: String,
        /// Underlying cause, if any.
        #[source]
        cause: Option<Box<GraphError>>,
    },
    /// The waiting thread was interrupted between retries.
    #[error("interrupted while waiting to retry a backend operation")]
    Interrupted,
}

impl BackendError {
    /// Creates a temporary failure without a cause.
    pub fn temporary(message: impl Into<String>) -> Self {
        BackendError::Temporary {
            message: message.into(),
            cause: None,
        }
    }

    /// Creates a temporary failure wrapping `cause`.
    pub fn temporary_caused(message: impl Into<String>, cause: GraphError) -> Self {
        BackendError::Temporary {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Creates a permanent failure without a cause.
    pub fn permanent(message: impl Into<String>) -> Self {
        BackendError::Permanent {
            message: message.into(),
            cause: None,
        }
    }

    /// Creates a permanent failure wrapping `cause`.
    pub fn permanent_caused(message: impl Into<String>, cause: GraphError) -> Self {
        BackendError::Permanent {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Returns true for [`BackendError::Temporary`].
    pub fn is_temporary(&self) -> bool {
        matches!(self, BackendError::Temporary { .. })
    }
}

/// Walks the `source()` chain of `err` and returns the deepest [`BackendError`].
pub fn innermost_backend_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a BackendError> {
    let mut found = None;
    let mut current: Option<&'a (dyn StdError + 'static)> = Some(err);
    while let Some(link) = current {
        if let Some(backend) = link.downcast_ref::<BackendError>() {
            found = Some(backend);
        }
        current = link.source();
    }
    found
}

/// Locks a std mutex, mapping poisoning to [`GraphError::Corruption`].
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| {
        error!("store registry lock poisoned - fatal error");
        GraphError::Corruption("store registry lock poisoned - fatal error".into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn innermost_backend_error_wins() {
        let inner = GraphError::from(BackendError::permanent("schema violation"));
        let outer = GraphError::from(BackendError::temporary_caused("timed out", inner));
        assert!(!outer.is_temporary());

        let inner = GraphError::from(BackendError::temporary("overloaded"));
        let outer = GraphError::from(BackendError::permanent_caused("wrapped", inner));
        assert!(outer.is_temporary());
    }

    #[test]
    fn non_backend_errors_are_not_temporary() {
        assert!(!GraphError::Invalid("bad").is_temporary());
        assert!(innermost_backend_error(&GraphError::NotFound("store")).is_none());
    }

    #[test]
    fn operation_error_exposes_backend_source() {
        let err = GraphError::Operation {
            operation: "edgestore.get_slice".into(),
            source: BackendError::temporary("timeout"),
        };
        assert!(err.to_string().contains("edgestore.get_slice"));
        assert!(err.is_temporary());
    }

    #[test]
    fn interrupted_is_permanent() {
        let err = GraphError::from(BackendError::Interrupted);
        assert!(!err.is_temporary());
    }
}
