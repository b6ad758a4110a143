//! ssh-deploy - remote command execution and file deployment over SSH
//!
//! This crate runs commands and deploys files on remote Linux systems over
//! SSH, with four execution styles over one session abstraction:
//!
//! - [`exec`] - run one command to completion and buffer its output,
//!   completing a sudo password challenge when the command needs one
//! - [`run`] - run one command and stream its live output, forwarding
//!   host Ctrl+C to the remote process while the channel is open
//! - [`run_sequence`] - drive an ordered list of commands through one
//!   persistent shell session, cleaning each response of echo artifacts
//! - [`put_dir`] / [`get_dir`] - replay a directory tree onto the other
//!   side over SFTP with bounded concurrency, plus [`put_file`] /
//!   [`get_file`] for single files
//!
//! Every operation opens its own session and closes it before returning;
//! there is no connection pooling. Server parameters come from a
//! [`ServerDescriptor`], which also deserializes from the JSON layout
//! older tooling used (including its `userName` spelling).
//!
//! # Example
//!
//! ```no_run
//! use ssh_deploy::{exec, ServerDescriptor};
//!
//! # async fn demo() -> ssh_deploy::Result<()> {
//! let server = ServerDescriptor::new("192.168.1.100")
//!     .with_username("admin")
//!     .with_password("secret");
//!
//! let output = exec(&server, "sudo apt-get update").await?;
//! if output.success {
//!     println!("{}", output.stdout);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod sftp;
pub mod ssh;

// Re-exports for convenience
pub use error::{Result, SshDeployError};
pub use sftp::{
    get_dir, get_file, put_dir, put_file, ItemOutcome, TransferPlan, TransferReport,
};
pub use ssh::{
    exec, run, run_sequence, ExecOutput, InteractiveCommand, OutputEvent, ServerDescriptor,
    Session,
};
