//! Configuration and CLI argument parsing for ssh-deploy

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::error::{Result, SshDeployError};
use crate::ssh::ServerDescriptor;

/// Connection timeout in seconds
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// How long the multi-command shell waits for output before giving up on
/// the session
pub const SHELL_IDLE_TIMEOUT_MS: u64 = 15_000;

/// Maximum simultaneous in-flight operations within a transfer batch
pub const TRANSFER_CONCURRENCY: usize = 4;

/// ssh-deploy CLI arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "ssh-deploy")]
#[command(version)]
#[command(about = "Remote command execution and file deployment over SSH")]
pub struct Args {
    /// Remote host to connect to
    #[arg(long, env = "SSH_DEPLOY_HOST")]
    pub host: Option<String>,

    /// SSH port
    #[arg(long, env = "SSH_DEPLOY_PORT")]
    pub port: Option<u16>,

    /// SSH username
    #[arg(long, env = "SSH_DEPLOY_USER")]
    pub user: Option<String>,

    /// SSH password (alternative to key)
    #[arg(long, env = "SSH_DEPLOY_PASSWORD")]
    pub password: Option<String>,

    /// Path to SSH private key file (alternative to password)
    #[arg(long, env = "SSH_DEPLOY_KEY")]
    pub key: Option<PathBuf>,

    /// JSON file holding a server descriptor (host, port, username|userName,
    /// password, privateKey); CLI flags override its fields
    #[arg(long, env = "SSH_DEPLOY_SERVER")]
    pub server: Option<PathBuf>,

    #[command(subcommand)]
    pub operation: Operation,
}

/// One public operation per subcommand
#[derive(Subcommand, Debug, Clone)]
pub enum Operation {
    /// Execute one command and print its buffered output
    Exec {
        /// Command to execute; a leading `sudo` triggers the password
        /// challenge when a password is configured
        command: String,
    },
    /// Execute one command and stream its live output
    Run {
        /// Command to execute
        command: String,
    },
    /// Execute several commands in order over one shell session
    Script {
        /// Commands, executed strictly in the order given
        commands: Vec<String>,
    },
    /// Upload a single file
    PutFile {
        /// Local source path
        local: PathBuf,
        /// Remote target path
        remote: String,
    },
    /// Download a single file
    GetFile {
        /// Remote source path
        remote: String,
        /// Local target path
        local: PathBuf,
    },
    /// Upload a directory tree
    PutDir {
        /// Local source directory
        local: PathBuf,
        /// Remote target directory
        remote: String,
    },
    /// Download a directory tree
    GetDir {
        /// Remote source directory
        remote: String,
        /// Local target directory
        local: PathBuf,
    },
}

impl Args {
    /// Build the server descriptor from the optional descriptor file plus
    /// CLI overrides, normalize it, and validate it.
    pub fn descriptor(&self) -> Result<ServerDescriptor> {
        let mut descriptor = match &self.server {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str(&raw).map_err(|e| {
                    SshDeployError::config(format!(
                        "invalid server file {}: {e}",
                        path.display()
                    ))
                })?
            }
            None => ServerDescriptor::default(),
        };

        if let Some(host) = &self.host {
            descriptor.host = host.clone();
        }
        if let Some(port) = self.port {
            descriptor.port = port;
        }
        if let Some(user) = &self.user {
            descriptor.username = Some(user.clone());
        }
        if let Some(password) = &self.password {
            descriptor.password = Some(password.clone());
        }
        if let Some(key) = &self.key {
            descriptor.private_key = Some(std::fs::read_to_string(key)?);
        }

        descriptor.normalize();
        validate_descriptor(&descriptor)?;
        Ok(descriptor)
    }
}

/// Validate a fully assembled descriptor, collecting every problem
fn validate_descriptor(descriptor: &ServerDescriptor) -> Result<()> {
    let mut errors = Vec::new();

    if descriptor.host.is_empty() {
        errors.push("Missing host (--host or server file)".to_string());
    }

    if descriptor.username.is_none() {
        errors.push("Missing username (--user or server file)".to_string());
    }

    if descriptor.password.is_none() && descriptor.private_key.is_none() {
        errors.push("Must provide either --password or --key".to_string());
    }

    if !errors.is_empty() {
        return Err(SshDeployError::Config(format!(
            "Configuration error:\n{}",
            errors.join("\n")
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_complete_descriptor() {
        let descriptor = ServerDescriptor::new("h")
            .with_username("u")
            .with_password("p");
        assert!(validate_descriptor(&descriptor).is_ok());
    }

    #[test]
    fn test_validate_missing_host() {
        let mut descriptor = ServerDescriptor::new("")
            .with_username("u")
            .with_password("p");
        descriptor.normalize();
        let err = validate_descriptor(&descriptor).unwrap_err();
        assert!(err.to_string().contains("Missing host"));
    }

    #[test]
    fn test_validate_missing_credentials() {
        let descriptor = ServerDescriptor::new("h").with_username("u");
        let err = validate_descriptor(&descriptor).unwrap_err();
        assert!(err.to_string().contains("--password or --key"));
    }

    #[test]
    fn test_validate_alias_username_counts_after_normalize() {
        let mut descriptor = ServerDescriptor::new("h")
            .with_user_name("u")
            .with_password("p");
        descriptor.normalize();
        assert!(validate_descriptor(&descriptor).is_ok());
    }
}
