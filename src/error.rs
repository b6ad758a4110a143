//! Error types for ssh-deploy

use thiserror::Error;

/// Main error type for ssh-deploy operations
#[derive(Debug, Error)]
pub enum SshDeployError {
    /// SSH connection failed
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// Authentication failed (password or key)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// An operation exceeded its deadline
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    /// Invalid parameters provided
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// SFTP subsystem or transfer error
    #[error("SFTP error: {0}")]
    Sftp(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH key parsing error
    #[error("SSH key error: {0}")]
    SshKey(String),
}

/// Result type alias using SshDeployError
pub type Result<T> = std::result::Result<T, SshDeployError>;

impl SshDeployError {
    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        SshDeployError::Connection(msg.into())
    }

    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        SshDeployError::Authentication(msg.into())
    }

    /// Create an invalid params error from a string
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        SshDeployError::InvalidParams(msg.into())
    }

    /// Create an SFTP error from a string
    pub fn sftp(msg: impl Into<String>) -> Self {
        SshDeployError::Sftp(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        SshDeployError::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SshDeployError::Connection("failed to connect".to_string());
        assert_eq!(err.to_string(), "SSH connection error: failed to connect");

        let err = SshDeployError::Timeout(5000);
        assert_eq!(err.to_string(), "Timed out after 5000ms");

        let err = SshDeployError::sftp("no such file");
        assert_eq!(err.to_string(), "SFTP error: no such file");
    }
}
