//! Sequential multi-command scripting over one persistent shell session
//!
//! [`run_sequence`] drives an ordered list of commands through a single
//! pty shell, one command completing before the next is sent. Each raw
//! response is cleaned of its echo and prompt artifacts before being
//! handed to the per-command callback; the full raw transcript is
//! returned once, at session end.

use std::time::Duration;

use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tracing::{debug, error};

use super::descriptor::ServerDescriptor;
use super::session::Session;
use super::sudo::SUDO_PROMPT;
use crate::config::SHELL_IDLE_TIMEOUT_MS;
use crate::error::Result;

/// Lifecycle chatter surfaced by the shell outside command responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ShellNotice {
    /// Boolean sentinel marking connected/ready/closed transitions
    Sentinel,
    /// Free-form text such as a login banner
    Text(String),
}

/// Sentinels are dropped; text is trimmed and surfaced only when
/// something remains.
pub(crate) fn filter_notice(notice: &ShellNotice) -> Option<String> {
    match notice {
        ShellNotice::Sentinel => None,
        ShellNotice::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
    }
}

fn log_notice(notice: ShellNotice) {
    if let Some(text) = filter_notice(&notice) {
        debug!("{text}");
    }
}

/// Strip a raw shell response of its command echo (first line) and
/// trailing prompt artifact (last line), trim, and terminate with exactly
/// one newline. Responses with no content or no matching command pass
/// through untouched.
pub(crate) fn clean_response(command: &str, response: &str) -> String {
    if command.is_empty() || response.is_empty() {
        return response.to_string();
    }
    let mut lines: Vec<&str> = response.split('\n').collect();
    if !lines.is_empty() {
        lines.remove(0);
    }
    lines.pop();
    format!("{}\n", lines.join("\n").trim())
}

/// A shell prompt marks the end of one command's output. The last line of
/// the accumulated buffer decides; trailing whitespace is insignificant.
pub(crate) fn ends_with_prompt(buffer: &str) -> bool {
    let last = buffer.lines().last().unwrap_or("").trim_end();
    last.ends_with('$') || last.ends_with('#')
}

struct Collected {
    text: String,
    closed: bool,
}

/// Execute commands strictly in order over one shell session.
///
/// The command list is copied up front; the caller's slice is never
/// consumed. `on_command` receives `(command, cleaned_response,
/// descriptor)` after each command completes. Sudo password prompts
/// raised mid-session are answered from the descriptor's password. The
/// return value is the complete raw session transcript, produced exactly
/// once whether the session ran to completion or ended early.
pub async fn run_sequence<F>(
    server: &ServerDescriptor,
    commands: &[String],
    mut on_command: F,
) -> Result<String>
where
    F: FnMut(&str, &str, &ServerDescriptor),
{
    let queue: Vec<String> = commands.to_vec();
    let session = Session::open(server).await?;
    let result = drive_shell(&session, server, &queue, &mut on_command).await;
    session.close().await;
    result
}

async fn drive_shell<F>(
    session: &Session,
    server: &ServerDescriptor,
    commands: &[String],
    on_command: &mut F,
) -> Result<String>
where
    F: FnMut(&str, &str, &ServerDescriptor),
{
    let mut channel = session.open_shell(80, 24).await?;
    log_notice(ShellNotice::Sentinel); // connected

    let mut transcript = String::new();

    // consume the banner and the first prompt before sending anything
    let first = collect_until_prompt(&mut channel, server, &mut transcript).await;
    log_notice(ShellNotice::Text(first.text));
    log_notice(ShellNotice::Sentinel); // ready
    let mut session_closed = first.closed;

    for command in commands {
        if session_closed {
            error!(%command, "shell session ended before command could run");
            break;
        }

        debug!(%command, "sending");
        if channel
            .data(format!("{command}\n").as_bytes())
            .await
            .is_err()
        {
            session_closed = true;
            error!(%command, "failed to write command to shell");
            break;
        }

        let collected = collect_until_prompt(&mut channel, server, &mut transcript).await;
        session_closed = collected.closed;

        let cleaned = clean_response(command, &collected.text);
        on_command(command, &cleaned, server);
    }

    if !session_closed {
        let _ = channel.data(&b"exit\n"[..]).await;
        drain_to_close(&mut channel, &mut transcript).await;
    }
    log_notice(ShellNotice::Sentinel); // closed

    Ok(transcript)
}

/// Accumulate output until the next shell prompt. Also answers at most
/// one sudo password prompt from the descriptor while collecting. An
/// idle timeout, a write failure, or the channel closing all end the
/// session; the text gathered so far is still returned.
async fn collect_until_prompt(
    channel: &mut Channel<Msg>,
    server: &ServerDescriptor,
    transcript: &mut String,
) -> Collected {
    let idle = Duration::from_millis(SHELL_IDLE_TIMEOUT_MS);
    let mut buffer = String::new();
    let mut password_sent = false;

    loop {
        let Ok(msg) = tokio::time::timeout(idle, channel.wait()).await else {
            error!("shell idle for {SHELL_IDLE_TIMEOUT_MS}ms, ending session");
            return Collected {
                text: buffer,
                closed: true,
            };
        };

        match msg {
            Some(ChannelMsg::Data { data }) => {
                let text = String::from_utf8_lossy(&data);
                buffer.push_str(&text);
                transcript.push_str(&text);

                if !password_sent && buffer.contains(SUDO_PROMPT) {
                    if let Some(password) = &server.password {
                        debug!("answering sudo prompt");
                        if channel
                            .data(format!("{password}\n").as_bytes())
                            .await
                            .is_err()
                        {
                            return Collected {
                                text: buffer,
                                closed: true,
                            };
                        }
                        password_sent = true;
                    }
                }

                if ends_with_prompt(&buffer) {
                    return Collected {
                        text: buffer,
                        closed: false,
                    };
                }
            }
            Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                let text = String::from_utf8_lossy(&data);
                error!("STDERR: {}", text.trim_end());
                transcript.push_str(&text);
            }
            Some(ChannelMsg::Close) | Some(ChannelMsg::Eof) | None => {
                return Collected {
                    text: buffer,
                    closed: true,
                };
            }
            Some(_) => {}
        }
    }
}

/// Read whatever the shell still has to say after `exit`, then stop at
/// channel close (or after one idle period, whichever comes first).
async fn drain_to_close(channel: &mut Channel<Msg>, transcript: &mut String) {
    let idle = Duration::from_millis(SHELL_IDLE_TIMEOUT_MS);
    loop {
        let Ok(msg) = tokio::time::timeout(idle, channel.wait()).await else {
            return;
        };
        match msg {
            Some(ChannelMsg::Data { data }) => {
                transcript.push_str(&String::from_utf8_lossy(&data));
            }
            Some(ChannelMsg::ExtendedData { data, .. }) => {
                transcript.push_str(&String::from_utf8_lossy(&data));
            }
            Some(ChannelMsg::Close) | Some(ChannelMsg::Eof) | None => return,
            Some(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_response_strips_echo_and_prompt() {
        assert_eq!(clean_response("echo A", "echo A\nA\n$ "), "A\n");
        assert_eq!(clean_response("echo B", "echo B\nB\n$ "), "B\n");
    }

    #[test]
    fn test_clean_response_multiline_body() {
        let raw = "ls\nfile1\nfile2\n$ ";
        assert_eq!(clean_response("ls", raw), "file1\nfile2\n");
    }

    #[test]
    fn test_clean_response_trims_carriage_returns() {
        assert_eq!(clean_response("echo A", "echo A\r\nA\r\n$ "), "A\n");
    }

    #[test]
    fn test_clean_response_empty_passes_through() {
        assert_eq!(clean_response("echo A", ""), "");
    }

    #[test]
    fn test_clean_response_unknown_command_passes_through() {
        assert_eq!(clean_response("", "spontaneous output\n"), "spontaneous output\n");
    }

    #[test]
    fn test_clean_response_echo_only() {
        // nothing between echo and prompt collapses to a bare newline
        assert_eq!(clean_response("true", "true\n$ "), "\n");
    }

    #[test]
    fn test_prompt_detection() {
        assert!(ends_with_prompt("deploy@web1:~$ "));
        assert!(ends_with_prompt("echo A\nA\n$ "));
        assert!(ends_with_prompt("root@web1:~# "));
        assert!(!ends_with_prompt("echo A\nA"));
        assert!(!ends_with_prompt("[sudo] password for deploy: "));
        assert!(!ends_with_prompt(""));
    }

    #[test]
    fn test_filter_notice_drops_sentinels() {
        assert_eq!(filter_notice(&ShellNotice::Sentinel), None);
    }

    #[test]
    fn test_filter_notice_trims_text() {
        assert_eq!(
            filter_notice(&ShellNotice::Text("  motd  \n".to_string())),
            Some("motd".to_string())
        );
        assert_eq!(filter_notice(&ShellNotice::Text("   ".to_string())), None);
    }

    #[test]
    fn test_cleaned_sequence_matches_expected_order() {
        // the cleaning pipeline applied to a simulated two-command session
        let exchanges = [
            ("echo A", "echo A\nA\n$ "),
            ("echo B", "echo B\nB\n$ "),
        ];
        let cleaned: Vec<String> = exchanges
            .iter()
            .map(|(command, raw)| clean_response(command, raw))
            .collect();
        assert_eq!(cleaned, vec!["A\n".to_string(), "B\n".to_string()]);
    }
}
