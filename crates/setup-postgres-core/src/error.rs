//! Error types for provisioning

use thiserror::Error;

/// Errors that can abort a provisioning run.
///
/// The first four variants mirror the stages that talk to external tools;
/// every one of them is fatal and none are retried.
#[derive(Error, Debug)]
pub enum SetupError {
    /// Package manager, repository or signing key setup failed
    #[error("installation failed: {0}")]
    Install(String),

    /// `initdb` or the cluster directory could not be prepared
    #[error("cluster initialization failed: {0}")]
    Initialization(String),

    /// `pg_ctl start` failed
    #[error("server start failed: {0}")]
    Start(String),

    /// `createdb` failed
    #[error("database provisioning failed: {0}")]
    Provisioning(String),

    /// Rejected input value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Host OS is not one of Linux, macOS, Windows
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// A child process could not be spawned
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A child process exceeded its timeout
    #[error("{program} timed out after {seconds} seconds")]
    Timeout { program: String, seconds: u64 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error (signing key download)
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for SetupError {
    fn from(err: reqwest::Error) -> Self {
        SetupError::Http(err.to_string())
    }
}

/// Result type for provisioning operations
pub type Result<T> = std::result::Result<T, SetupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_errors_carry_their_class() {
        let err = SetupError::Provisioning("database \"app\" already exists".to_string());
        assert_eq!(
            err.to_string(),
            "database provisioning failed: database \"app\" already exists"
        );

        let err = SetupError::Timeout {
            program: "apt-get".to_string(),
            seconds: 600,
        };
        assert_eq!(err.to_string(), "apt-get timed out after 600 seconds");
    }

    #[test]
    fn test_io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SetupError = io.into();
        assert!(matches!(err, SetupError::Io(_)));
    }
}
