//! Error taxonomy shared by the channel, directory, broker, and queue layers.

use thiserror::Error;

/// Boxed error type carried by fallible subscribers and worker callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by broker lookups, service dispatch, and queue shutdown.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A service name was empty after normalization.
    #[error("service name is empty after normalization")]
    NameInvalid,

    /// Registration collided with an existing service or group.
    #[error("'{name}' already exists in the directory")]
    NameConflict {
        /// The normalized name that collided.
        name: String,
    },

    /// No service or group exists under the given name.
    #[error("no service or group named '{name}'")]
    NotFound {
        /// The normalized name that was looked up.
        name: String,
    },

    /// A registered service was requested with a different signature.
    #[error("service '{name}' is a {found}, not a {expected}")]
    TypeMismatch {
        /// Name of the offending service.
        name: String,
        /// Signature the caller asked for.
        expected: &'static str,
        /// Signature the service was registered with.
        found: &'static str,
    },

    /// A subscriber callback failed during dispatch.
    #[error("subscriber on '{name}' failed")]
    Subscriber {
        /// Name of the service whose subscriber failed.
        name: String,
        /// The underlying callback error.
        #[source]
        source: BoxError,
    },

    /// A blocking queue was closed while a caller was still using it.
    #[error("queue closed during shutdown")]
    Shutdown,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_the_offending_name() {
        let err = BrokerError::NotFound {
            name: "a.b".to_string(),
        };
        assert_eq!(format!("{err}"), "no service or group named 'a.b'");

        let err = BrokerError::NameConflict {
            name: "a.b".to_string(),
        };
        assert!(format!("{err}").contains("a.b"));
    }

    #[test]
    fn subscriber_failure_exposes_the_source() {
        use std::error::Error;

        let inner: BoxError = "boom".into();
        let err = BrokerError::Subscriber {
            name: "log.worker".to_string(),
            source: inner,
        };
        assert_eq!(err.source().unwrap().to_string(), "boom");
    }
}
