//! Error types for wgmesh operations
//!
//! Three failure classes exist: precondition errors (required external state
//! missing or malformed), transport errors (the cluster store or the local
//! device subsystem), and benign already-satisfied conditions. The last
//! class never surfaces here; callers swallow it and report success.

use thiserror::Error;

/// Main error type for wgmesh operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Required external state is missing or malformed
    #[error("precondition failed: {message}")]
    Precondition {
        /// Description of the missing or malformed state
        message: String,
    },

    /// A local device command could not be run or reported failure
    #[error("{program} command failed: {message}")]
    Command {
        /// The program that failed (e.g. "ip", "wg")
        program: String,
        /// Captured failure detail
        message: String,
    },

    /// CIDR input could not be parsed
    #[error("invalid CIDR '{value}': {message}")]
    InvalidCidr {
        /// The rejected input
        value: String,
        /// Parser diagnostic
        message: String,
    },

    /// WireGuard key material is malformed
    #[error("invalid key: {message}")]
    Key {
        /// Description of what's wrong with the key
        message: String,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a precondition error with the given message
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Create a command error for the given program
    pub fn command(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-CIDR error for the given input
    pub fn invalid_cidr(value: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCidr {
            value: value.into(),
            message: message.into(),
        }
    }

    /// Create a key error with the given message
    pub fn key(message: impl Into<String>) -> Self {
        Self::Key {
            message: message.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Whether this is a Kubernetes 404 on the requested object
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// Whether this is a Kubernetes 409 optimistic-concurrency conflict
    ///
    /// The peer registry retries conflicts with a fresh fetch; every other
    /// transport failure aborts the invocation.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// Whether this error is a precondition failure (never retryable)
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::Precondition { .. } | Error::InvalidCidr { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::from(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} ({code})"),
            reason: reason.to_string(),
            code,
        }))
    }

    /// Story: a fresh cluster without the server artifact fails fast
    ///
    /// Join never creates the artifact itself; the user is pointed at
    /// `deploy` instead.
    #[test]
    fn story_missing_artifact_is_a_precondition_failure() {
        let err = Error::precondition(
            "server config kube-system/wireguard not found; run `wgmesh deploy` first",
        );
        assert!(err.is_precondition());
        assert!(err.to_string().contains("precondition failed"));
        assert!(err.to_string().contains("wgmesh deploy"));
    }

    /// Story: malformed CIDR input is rejected before any state is touched
    #[test]
    fn story_malformed_cidr_is_fatal_and_contextual() {
        let err = Error::invalid_cidr("10.0.0.0/99", "prefix length out of range");
        assert!(err.is_precondition());
        assert!(err.to_string().contains("10.0.0.0/99"));
        assert!(err.to_string().contains("prefix length"));
    }

    /// Story: a failed device command names the program and its diagnostic
    #[test]
    fn story_device_command_failures_carry_program_context() {
        let err = Error::command("ip", "RTNETLINK answers: Operation not permitted");
        assert!(err.to_string().contains("ip command failed"));
        assert!(err.to_string().contains("Operation not permitted"));
        assert!(!err.is_precondition());
    }

    #[test]
    fn test_not_found_detection() {
        assert!(api_error(404, "NotFound").is_not_found());
        assert!(!api_error(409, "Conflict").is_not_found());
        assert!(!Error::precondition("missing").is_not_found());
    }

    #[test]
    fn test_conflict_detection() {
        assert!(api_error(409, "Conflict").is_conflict());
        assert!(!api_error(404, "NotFound").is_conflict());
        assert!(!Error::command("wg", "boom").is_conflict());
    }

    #[test]
    fn test_kube_error_display() {
        let err = api_error(500, "InternalError");
        assert!(err.to_string().contains("kubernetes error"));
    }
}
