//! Sudo password challenge detection
//!
//! When a command is executed under a pty because it needs privilege
//! escalation, the remote side interleaves a password prompt with the
//! command's own output. [`SudoChallenge`] watches that output, tells the
//! caller when to write the secret, and settles on exactly one outcome.
//!
//! The detector is a pass-through filter: it inspects each chunk but never
//! withholds it. Callers that want the raw output keep consuming it
//! themselves.

/// Output pattern announcing the password prompt
pub const SUDO_PROMPT: &str = "[sudo] password";

/// Output pattern announcing a rejected password
pub const SUDO_FAILURE: &str = "Sorry, try again";

/// Challenge progress. `Resolved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SudoState {
    /// Watching for the password prompt
    AwaitingPrompt,
    /// Password written; the next chunk decides the outcome
    Authenticating,
    /// Outcome settled; all further input is ignored
    Resolved,
}

/// Final result of the challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SudoOutcome {
    /// True when the remote side rejected the password
    pub failed: bool,
}

/// What the caller should do after feeding a chunk to the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SudoPoll {
    /// Nothing to do, keep streaming
    Pass,
    /// The prompt was seen; write the secret followed by a newline
    SendPassword,
    /// The challenge settled; reported at most once
    Resolved(SudoOutcome),
}

/// Detects and completes a sudo password challenge over a live stream
#[derive(Debug)]
pub struct SudoChallenge {
    state: SudoState,
    // accumulated only for prompt matching, cleared on transition
    buffer: String,
}

impl SudoChallenge {
    pub fn new() -> Self {
        Self {
            state: SudoState::AwaitingPrompt,
            buffer: String::new(),
        }
    }

    /// Feed one output chunk. At most one `SendPassword` and at most one
    /// `Resolved` are ever returned over the life of the challenge.
    pub fn observe_data(&mut self, data: &[u8]) -> SudoPoll {
        match self.state {
            SudoState::AwaitingPrompt => {
                self.buffer.push_str(&String::from_utf8_lossy(data));
                if self.buffer.contains(SUDO_PROMPT) {
                    self.state = SudoState::Authenticating;
                    self.buffer.clear();
                    SudoPoll::SendPassword
                } else {
                    SudoPoll::Pass
                }
            }
            SudoState::Authenticating => {
                let failed = String::from_utf8_lossy(data).contains(SUDO_FAILURE);
                self.state = SudoState::Resolved;
                SudoPoll::Resolved(SudoOutcome { failed })
            }
            SudoState::Resolved => SudoPoll::Pass,
        }
    }

    /// The stream ended. A challenge that never saw failure text settles
    /// as success; an already settled challenge yields nothing.
    pub fn observe_close(&mut self) -> Option<SudoOutcome> {
        if self.state == SudoState::Resolved {
            return None;
        }
        self.state = SudoState::Resolved;
        Some(SudoOutcome { failed: false })
    }

    pub fn is_resolved(&self) -> bool {
        self.state == SudoState::Resolved
    }
}

impl Default for SudoChallenge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_then_failure_text_fails() {
        let mut challenge = SudoChallenge::new();
        assert_eq!(
            challenge.observe_data(b"[sudo] password for x:"),
            SudoPoll::SendPassword
        );
        assert_eq!(
            challenge.observe_data(b"Sorry, try again."),
            SudoPoll::Resolved(SudoOutcome { failed: true })
        );
        assert!(challenge.is_resolved());
    }

    #[test]
    fn test_prompt_then_stream_end_succeeds() {
        let mut challenge = SudoChallenge::new();
        assert_eq!(
            challenge.observe_data(b"[sudo] password for x:"),
            SudoPoll::SendPassword
        );
        assert_eq!(
            challenge.observe_close(),
            Some(SudoOutcome { failed: false })
        );
    }

    #[test]
    fn test_prompt_then_ordinary_output_succeeds() {
        let mut challenge = SudoChallenge::new();
        challenge.observe_data(b"[sudo] password for x:");
        assert_eq!(
            challenge.observe_data(b"total 4\ndrwxr-xr-x"),
            SudoPoll::Resolved(SudoOutcome { failed: false })
        );
    }

    #[test]
    fn test_outcome_reported_at_most_once() {
        let mut challenge = SudoChallenge::new();
        challenge.observe_data(b"[sudo] password for x:");
        challenge.observe_data(b"Sorry, try again.");
        // terminal state: further data and close both yield nothing
        assert_eq!(challenge.observe_data(b"more output"), SudoPoll::Pass);
        assert_eq!(challenge.observe_close(), None);
    }

    #[test]
    fn test_password_requested_once_for_split_prompt() {
        let mut challenge = SudoChallenge::new();
        assert_eq!(challenge.observe_data(b"[sudo] pass"), SudoPoll::Pass);
        assert_eq!(
            challenge.observe_data(b"word for deploy:"),
            SudoPoll::SendPassword
        );
    }

    #[test]
    fn test_ordinary_output_before_prompt_passes_through() {
        let mut challenge = SudoChallenge::new();
        assert_eq!(challenge.observe_data(b"motd banner\n"), SudoPoll::Pass);
        assert!(!challenge.is_resolved());
    }

    #[test]
    fn test_close_without_prompt_settles_as_success() {
        let mut challenge = SudoChallenge::new();
        assert_eq!(
            challenge.observe_close(),
            Some(SudoOutcome { failed: false })
        );
        assert_eq!(challenge.observe_close(), None);
    }
}
