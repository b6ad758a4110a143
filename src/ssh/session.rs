//! SSH session lifecycle
//!
//! A [`Session`] is one authenticated transport connection, exclusively
//! owned by the operation that created it. Operations open their own
//! session, perform their protocol exchange, and always close it before
//! returning, success or failure.

use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::keys::{decode_secret_key, PrivateKeyWithHashAlg};
use russh::{Channel, Disconnect};
use russh_sftp::client::SftpSession;
use tokio::time::timeout;
use tracing::{debug, info};

use super::descriptor::ServerDescriptor;
use super::handler::ClientHandler;
use crate::config::CONNECTION_TIMEOUT_SECS;
use crate::error::{Result, SshDeployError};

/// One authenticated SSH connection
pub struct Session {
    handle: Handle<ClientHandler>,
    host: String,
    port: u16,
}

impl Session {
    /// Connect and authenticate against the described server.
    ///
    /// The descriptor is normalized on a private copy; the caller's value
    /// is never mutated. Connection establishment is bounded by
    /// [`CONNECTION_TIMEOUT_SECS`]. Failures here are fatal for the
    /// calling operation; nothing is retried.
    pub async fn open(server: &ServerDescriptor) -> Result<Self> {
        let mut server = server.clone();
        server.normalize();

        debug!("connecting to {}:{}", server.host, server.port);

        let config = Arc::new(client::Config::default());
        let connect_result = timeout(
            Duration::from_secs(CONNECTION_TIMEOUT_SECS),
            client::connect(
                config,
                (server.host.as_str(), server.port),
                ClientHandler::new(),
            ),
        )
        .await;

        let mut handle = match connect_result {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(SshDeployError::connection(e.to_string())),
            Err(_) => return Err(SshDeployError::Timeout(CONNECTION_TIMEOUT_SECS * 1000)),
        };

        authenticate(&mut handle, &server).await?;

        info!(
            "connected to {}@{}:{}",
            server.username.as_deref().unwrap_or_default(),
            server.host,
            server.port
        );

        Ok(Self {
            handle,
            host: server.host,
            port: server.port,
        })
    }

    /// Open a new session channel
    pub async fn open_channel(&self) -> Result<Channel<client::Msg>> {
        self.handle
            .channel_open_session()
            .await
            .map_err(|e| SshDeployError::connection(format!("failed to open channel: {e}")))
    }

    /// Open an interactive shell channel with a pty
    pub async fn open_shell(&self, cols: u32, rows: u32) -> Result<Channel<client::Msg>> {
        let channel = self.open_channel().await?;

        channel
            .request_pty(true, "xterm", cols, rows, 0, 0, &[])
            .await
            .map_err(|e| SshDeployError::connection(format!("failed to request pty: {e}")))?;

        channel
            .request_shell(true)
            .await
            .map_err(|e| SshDeployError::connection(format!("failed to request shell: {e}")))?;

        Ok(channel)
    }

    /// Open the SFTP subsystem over a fresh channel
    pub async fn open_sftp(&self) -> Result<SftpSession> {
        let channel = self.open_channel().await?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| SshDeployError::sftp(format!("failed to request sftp subsystem: {e}")))?;

        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SshDeployError::sftp(e.to_string()))
    }

    /// Disconnect. Transport teardown is always best-effort; the session
    /// is unusable afterwards either way.
    pub async fn close(&self) {
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "")
            .await;
        debug!("session to {}:{} closed", self.host, self.port);
    }
}

/// Authenticate with the server, trying password first, then private key
async fn authenticate(handle: &mut Handle<ClientHandler>, server: &ServerDescriptor) -> Result<()> {
    let username = server
        .username
        .as_deref()
        .ok_or_else(|| SshDeployError::auth("no username in server descriptor"))?;

    if let Some(password) = &server.password {
        debug!("attempting password authentication for user '{username}'");
        let outcome = handle
            .authenticate_password(username, password)
            .await
            .map_err(|e| SshDeployError::auth(e.to_string()))?;

        return match outcome {
            client::AuthResult::Success => Ok(()),
            client::AuthResult::Failure { .. } => {
                Err(SshDeployError::auth("password authentication rejected"))
            }
        };
    }

    if let Some(key_content) = &server.private_key {
        debug!("attempting key authentication for user '{username}'");
        let key = decode_secret_key(key_content, server.key_passphrase.as_deref())
            .map_err(|e| SshDeployError::SshKey(format!("failed to parse private key: {e}")))?;

        let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);
        let outcome = handle
            .authenticate_publickey(username, key_with_alg)
            .await
            .map_err(|e| SshDeployError::auth(e.to_string()))?;

        return match outcome {
            client::AuthResult::Success => Ok(()),
            client::AuthResult::Failure { .. } => {
                Err(SshDeployError::auth("key authentication rejected"))
            }
        };
    }

    Err(SshDeployError::auth(
        "no authentication method available (require password or private_key)",
    ))
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}
