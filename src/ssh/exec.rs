//! One-shot command execution with buffered output
//!
//! Provides [`exec`], which runs a single command over a fresh session,
//! buffers stdout and stderr until the channel closes, and completes any
//! sudo password challenge that a pty-allocated command raises.

use russh::ChannelMsg;
use tracing::{debug, error};

use super::descriptor::ServerDescriptor;
use super::session::Session;
use super::sudo::{SudoChallenge, SudoPoll};
use crate::error::{Result, SshDeployError};

/// Output from a buffered command execution
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// False only when a sudo password challenge was rejected
    pub success: bool,

    /// Standard output from the command (combined output under a pty)
    pub stdout: String,

    /// Standard error from the command
    pub stderr: String,

    /// Exit status reported by the remote process, when the server sent one.
    /// Not folded into `success`; callers needing exit-status fidelity
    /// check this field themselves.
    pub exit_code: Option<u32>,
}

/// A pty is allocated only when the command asks for privilege escalation
/// and the descriptor carries a password to answer the challenge with.
pub(crate) fn needs_pty(command: &str, server: &ServerDescriptor) -> bool {
    command.starts_with("sudo") && server.password.is_some()
}

/// Execute a command to completion over its own session.
///
/// Output is accumulated without bound; very chatty commands trade memory
/// for simplicity. Channel acquisition failures are fatal for the call and
/// are never retried.
pub async fn exec(server: &ServerDescriptor, command: &str) -> Result<ExecOutput> {
    let session = Session::open(server).await?;
    let result = exec_over(&session, server, command).await;
    session.close().await;
    result
}

async fn exec_over(
    session: &Session,
    server: &ServerDescriptor,
    command: &str,
) -> Result<ExecOutput> {
    let pty = needs_pty(command, server);
    let mut channel = session.open_channel().await?;

    if pty {
        channel
            .request_pty(true, "xterm", 80, 24, 0, 0, &[])
            .await
            .map_err(|e| SshDeployError::connection(format!("failed to request pty: {e}")))?;
    }

    debug!(%command, pty, "executing");

    channel
        .exec(true, command)
        .await
        .map_err(|e| SshDeployError::connection(format!("failed to exec command: {e}")))?;

    let mut challenge = pty.then(SudoChallenge::new);
    let mut output = ExecOutput::default();
    let mut sudo_failed = false;

    loop {
        let msg = channel.wait().await;
        let Some(msg) = msg else { break };
        match msg {
            ChannelMsg::Data { data } => {
                if let Some(challenge) = challenge.as_mut() {
                    match challenge.observe_data(&data) {
                        SudoPoll::SendPassword => {
                            if let Some(password) = &server.password {
                                channel
                                    .data(format!("{password}\n").as_bytes())
                                    .await
                                    .map_err(|e| {
                                        SshDeployError::connection(format!(
                                            "failed to send password: {e}"
                                        ))
                                    })?;
                            }
                        }
                        SudoPoll::Resolved(outcome) => sudo_failed = outcome.failed,
                        SudoPoll::Pass => {}
                    }
                }
                output.stdout.push_str(&String::from_utf8_lossy(&data));
            }
            ChannelMsg::ExtendedData { data, ext } => {
                // ext == 1 is stderr
                if ext == 1 {
                    let text = String::from_utf8_lossy(&data);
                    error!("STDERR: {}", text.trim_end());
                    output.stderr.push_str(&text);
                } else {
                    output.stdout.push_str(&String::from_utf8_lossy(&data));
                }
            }
            ChannelMsg::ExitStatus { exit_status } => {
                output.exit_code = Some(exit_status);
            }
            ChannelMsg::Close | ChannelMsg::Eof => break,
            _ => {}
        }
    }

    if let Some(challenge) = challenge.as_mut() {
        if let Some(outcome) = challenge.observe_close() {
            sudo_failed = outcome.failed;
        }
    }

    output.success = !sudo_failed;

    debug!(
        "command completed: success={}, exit_code={:?}, stdout_len={}, stderr_len={}",
        output.success,
        output.exit_code,
        output.stdout.len(),
        output.stderr.len()
    );

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pty_for_sudo_with_password() {
        let server = ServerDescriptor::new("h")
            .with_username("u")
            .with_password("p");
        assert!(needs_pty("sudo apt update", &server));
    }

    #[test]
    fn test_no_pty_for_sudo_without_password() {
        let server = ServerDescriptor::new("h")
            .with_username("u")
            .with_private_key("key material");
        assert!(!needs_pty("sudo apt update", &server));
    }

    #[test]
    fn test_no_pty_for_plain_command_with_password() {
        let server = ServerDescriptor::new("h")
            .with_username("u")
            .with_password("p");
        assert!(!needs_pty("ls -la", &server));
    }

    #[test]
    fn test_no_pty_for_sudo_mentioned_later() {
        let server = ServerDescriptor::new("h")
            .with_username("u")
            .with_password("p");
        assert!(!needs_pty("echo sudo", &server));
    }

    #[test]
    fn test_exec_output_default() {
        let output = ExecOutput::default();
        assert!(!output.success);
        assert!(output.stdout.is_empty());
        assert!(output.exit_code.is_none());
    }
}
