//! Interactive command execution with a live output stream
//!
//! [`run`] sets up exactly like [`exec`](super::exec::exec) but hands the
//! caller a live [`InteractiveCommand`] instead of buffering; for an
//! escalated command the sudo challenge is driven to its outcome first.
//!
//! While the channel is open, a Ctrl+C watcher scoped to this one call
//! forwards host interrupts to the remote process. The remote side is
//! poked through two mechanisms because neither works everywhere: the
//! protocol-level SIGINT, and the raw ETX byte written onto the channel.
//! Each is guarded independently so one failing does not prevent the
//! other. The watcher is torn down with the channel, whether or not an
//! interrupt ever fired.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Sig};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::descriptor::ServerDescriptor;
use super::exec::needs_pty;
use super::session::Session;
use super::sudo::{SudoChallenge, SudoPoll};
use crate::error::{Result, SshDeployError};

/// End-of-text control byte, the Ctrl+C a terminal would send
const ETX: u8 = 0x03;

/// One chunk of live output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// Something that can receive a forwarded interrupt
#[async_trait]
pub(crate) trait InterruptTarget: Send {
    /// Protocol-level interrupt signal to the remote process
    async fn send_break_signal(&mut self) -> Result<()>;
    /// Raw ETX byte written directly onto the channel
    async fn write_interrupt_byte(&mut self) -> Result<()>;
    /// Tear the connection down
    async fn terminate(&mut self);
}

/// Forward one host interrupt to the target. Both mechanisms are
/// attempted, each guarded so a failure in one does not prevent the
/// other, then the target is terminated. Repeated calls are inert.
pub(crate) async fn forward_interrupt<T: InterruptTarget>(fired: &mut bool, target: &mut T) {
    if *fired {
        return;
    }
    *fired = true;

    if let Err(e) = target.send_break_signal().await {
        warn!("protocol interrupt failed: {e}");
    }
    if let Err(e) = target.write_interrupt_byte().await {
        warn!("interrupt byte write failed: {e}");
    }
    target.terminate().await;
}

/// Scoped Ctrl+C watcher; the task is aborted on disarm or drop so no
/// process-wide listener outlives the channel it was registered for.
struct InterruptWatcher {
    notify: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl InterruptWatcher {
    fn spawn() -> Self {
        let notify = Arc::new(Notify::new());
        let task = tokio::spawn({
            let notify = Arc::clone(&notify);
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    notify.notify_one();
                }
            }
        });
        Self {
            notify,
            task: Some(task),
        }
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }

    fn disarm(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for InterruptWatcher {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// A live remote command: its channel, its session, and the interrupt
/// plumbing scoped to both
pub struct InteractiveCommand {
    channel: Channel<Msg>,
    session: Option<Session>,
    pending: VecDeque<OutputEvent>,
    watcher: InterruptWatcher,
    interrupted: bool,
    closed: bool,
    success: bool,
}

/// Execute a command and return the live stream once it is ready (or once
/// the sudo challenge settled, for the escalated case).
pub async fn run(server: &ServerDescriptor, command: &str) -> Result<InteractiveCommand> {
    let session = Session::open(server).await?;

    let pty = needs_pty(command, server);
    let setup = async {
        let channel = session.open_channel().await?;
        if pty {
            channel
                .request_pty(true, "xterm", 80, 24, 0, 0, &[])
                .await
                .map_err(|e| SshDeployError::connection(format!("failed to request pty: {e}")))?;
        }
        channel
            .exec(true, command)
            .await
            .map_err(|e| SshDeployError::connection(format!("failed to exec command: {e}")))?;
        Ok::<_, SshDeployError>(channel)
    }
    .await;

    let channel = match setup {
        Ok(channel) => channel,
        Err(e) => {
            session.close().await;
            return Err(e);
        }
    };

    debug!(%command, pty, "running interactively");

    let mut running = InteractiveCommand {
        channel,
        session: Some(session),
        pending: VecDeque::new(),
        watcher: InterruptWatcher::spawn(),
        interrupted: false,
        closed: false,
        success: true,
    };

    if pty {
        let password = server.password.clone().unwrap_or_default();
        if let Err(e) = running.complete_sudo_challenge(&password).await {
            running.shutdown().await;
            return Err(e);
        }
    }

    Ok(running)
}

impl InteractiveCommand {
    /// Whether the sudo challenge (when one applied) was accepted
    pub fn success(&self) -> bool {
        self.success
    }

    /// Drive the channel until the sudo challenge settles, queueing every
    /// chunk so the caller still sees the full stream afterwards.
    async fn complete_sudo_challenge(&mut self, password: &str) -> Result<()> {
        let mut challenge = SudoChallenge::new();

        while !self.closed && !challenge.is_resolved() {
            let msg = self.channel.wait().await;
            match msg {
                Some(ChannelMsg::Data { data }) => {
                    match challenge.observe_data(&data) {
                        SudoPoll::SendPassword => {
                            self.channel
                                .data(format!("{password}\n").as_bytes())
                                .await
                                .map_err(|e| {
                                    SshDeployError::connection(format!(
                                        "failed to send password: {e}"
                                    ))
                                })?;
                        }
                        SudoPoll::Resolved(outcome) => self.success = !outcome.failed,
                        SudoPoll::Pass => {}
                    }
                    self.pending.push_back(OutputEvent::Stdout(data.to_vec()));
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        error!("STDERR: {}", String::from_utf8_lossy(&data).trim_end());
                        self.pending.push_back(OutputEvent::Stderr(data.to_vec()));
                    } else {
                        self.pending.push_back(OutputEvent::Stdout(data.to_vec()));
                    }
                }
                Some(ChannelMsg::Close) | Some(ChannelMsg::Eof) | None => {
                    if let Some(outcome) = challenge.observe_close() {
                        self.success = !outcome.failed;
                    }
                    self.shutdown().await;
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    /// Next output chunk, or `None` once the channel has closed (the
    /// session is torn down before `None` is returned). A host interrupt
    /// arriving while waiting here is forwarded to the remote process.
    pub async fn next_output(&mut self) -> Option<OutputEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        if self.closed {
            return None;
        }

        loop {
            let step = tokio::select! {
                _ = self.watcher.notified() => None,
                msg = self.channel.wait() => Some(msg),
            };
            let msg = match step {
                None => {
                    debug!("host interrupt received, forwarding");
                    self.interrupt().await;
                    return None;
                }
                Some(msg) => msg,
            };
            match msg {
                Some(ChannelMsg::Data { data }) => {
                    return Some(OutputEvent::Stdout(data.to_vec()));
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        error!("STDERR: {}", String::from_utf8_lossy(&data).trim_end());
                        return Some(OutputEvent::Stderr(data.to_vec()));
                    }
                    return Some(OutputEvent::Stdout(data.to_vec()));
                }
                Some(ChannelMsg::Close) | Some(ChannelMsg::Eof) | None => {
                    self.shutdown().await;
                    return None;
                }
                Some(_) => {}
            }
        }
    }

    /// Write raw bytes to the remote process's input
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.channel
            .data(data)
            .await
            .map_err(|e| SshDeployError::connection(format!("failed to write to channel: {e}")))
    }

    /// Forward an interrupt to the remote process and tear the session
    /// down. Safe to call again after the channel closed; later calls do
    /// nothing.
    pub async fn interrupt(&mut self) {
        let mut fired = self.interrupted;
        forward_interrupt(&mut fired, self).await;
        self.interrupted = fired;
    }

    /// Close the channel and the session
    pub async fn close(mut self) {
        let _ = self.channel.eof().await;
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.watcher.disarm();
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }
}

#[async_trait]
impl InterruptTarget for InteractiveCommand {
    async fn send_break_signal(&mut self) -> Result<()> {
        self.channel
            .signal(Sig::INT)
            .await
            .map_err(|e| SshDeployError::connection(e.to_string()))
    }

    async fn write_interrupt_byte(&mut self) -> Result<()> {
        self.channel
            .data(&[ETX][..])
            .await
            .map_err(|e| SshDeployError::connection(e.to_string()))
    }

    async fn terminate(&mut self) {
        self.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MockTarget {
        signals: usize,
        bytes: usize,
        terminations: usize,
        fail_signal: bool,
        fail_byte: bool,
    }

    #[async_trait]
    impl InterruptTarget for MockTarget {
        async fn send_break_signal(&mut self) -> Result<()> {
            self.signals += 1;
            if self.fail_signal {
                return Err(SshDeployError::connection("signal not supported"));
            }
            Ok(())
        }

        async fn write_interrupt_byte(&mut self) -> Result<()> {
            self.bytes += 1;
            if self.fail_byte {
                return Err(SshDeployError::connection("channel gone"));
            }
            Ok(())
        }

        async fn terminate(&mut self) {
            self.terminations += 1;
        }
    }

    #[tokio::test]
    async fn test_interrupt_attempts_both_mechanisms_and_terminates() {
        let mut target = MockTarget::default();
        let mut fired = false;
        forward_interrupt(&mut fired, &mut target).await;

        assert_eq!(target.signals, 1);
        assert_eq!(target.bytes, 1);
        assert_eq!(target.terminations, 1);
        assert!(fired);
    }

    #[tokio::test]
    async fn test_signal_failure_does_not_stop_byte_write() {
        let mut target = MockTarget {
            fail_signal: true,
            ..MockTarget::default()
        };
        let mut fired = false;
        forward_interrupt(&mut fired, &mut target).await;

        assert_eq!(target.bytes, 1);
        assert_eq!(target.terminations, 1);
    }

    #[tokio::test]
    async fn test_byte_failure_still_terminates() {
        let mut target = MockTarget {
            fail_byte: true,
            ..MockTarget::default()
        };
        let mut fired = false;
        forward_interrupt(&mut fired, &mut target).await;

        assert_eq!(target.signals, 1);
        assert_eq!(target.terminations, 1);
    }

    #[tokio::test]
    async fn test_second_interrupt_is_inert() {
        let mut target = MockTarget::default();
        let mut fired = false;
        forward_interrupt(&mut fired, &mut target).await;
        forward_interrupt(&mut fired, &mut target).await;

        assert_eq!(target.signals, 1);
        assert_eq!(target.bytes, 1);
        assert_eq!(target.terminations, 1);
    }

    #[tokio::test]
    async fn test_watcher_disarm_is_idempotent() {
        let mut watcher = InterruptWatcher::spawn();
        watcher.disarm();
        watcher.disarm();
        assert!(watcher.task.is_none());
    }
}
