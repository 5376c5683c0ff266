//! Error taxonomy shared by every Hoist crate.

use thiserror::Error;

/// Boxed cause carried by the conversion and preservation variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HoistError {
    /// Kubeconfig missing, unparseable, or naming an unknown context.
    #[error("loading kubeconfig {path}: {message}")]
    ConfigLoad { path: String, message: String },

    /// Transport or authentication failure reaching the cluster.
    #[error("connecting to cluster: {0}")]
    Connection(String),

    /// Both a legacy and a current record exist for the release.
    #[error("release {release} in namespace {namespace} has both a legacy and a current record; resolve it manually before migrating")]
    Conflict { release: String, namespace: String },

    #[error("converting release {release}: {source}")]
    Conversion {
        release: String,
        #[source]
        source: BoxError,
    },

    #[error("preserving legacy record {record}: {source}")]
    Preservation {
        record: String,
        #[source]
        source: BoxError,
    },

    /// The addressed object or resource type does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other cluster API failure.
    #[error("cluster api: {0}")]
    Api(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HoistError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conversion(release: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Conversion { release: release.into(), source: source.into() }
    }

    pub fn preservation(record: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Preservation { record: record.into(), source: source.into() }
    }

    pub fn command(command: impl ToString, message: impl Into<String>) -> Self {
        Self::Command { command: command.to_string(), message: message.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type HoistResult<T> = Result<T, HoistError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn conflict_names_release_and_namespace() {
        let err = HoistError::Conflict { release: "myapp".into(), namespace: "prod".into() };
        let msg = err.to_string();
        assert!(msg.contains("myapp"), "msg={}", msg);
        assert!(msg.contains("prod"), "msg={}", msg);
    }

    #[test]
    fn conversion_keeps_underlying_cause() {
        let cause = HoistError::command("helm 2to3 convert myapp", "exited with status 1");
        let err = HoistError::conversion("myapp", cause);
        let source = err.source().expect("source kept");
        assert!(source.to_string().contains("helm 2to3 convert myapp"));
        assert!(err.to_string().starts_with("converting release myapp"));
    }

    #[test]
    fn preservation_accepts_plain_messages() {
        let err = HoistError::preservation("myapp.v1", "update rejected");
        assert_eq!(err.to_string(), "preserving legacy record myapp.v1: update rejected");
        assert!(!err.is_not_found());
        assert!(HoistError::NotFound("x".into()).is_not_found());
    }
}
