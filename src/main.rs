//! ssh-deploy - entry point
//!
//! Parses CLI arguments, assembles the server descriptor, and dispatches
//! to one of the public operations. Logging goes to stderr so remote
//! output on stdout stays clean for piping.

use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use ssh_deploy::config::{Args, Operation};
use ssh_deploy::error::Result;
use ssh_deploy::{
    exec, get_dir, get_file, put_dir, put_file, run, run_sequence, OutputEvent, TransferReport,
};

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let server = args.descriptor()?;

    match args.operation {
        Operation::Exec { command } => {
            let output = exec(&server, &command).await?;
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
            if !output.success {
                error!("sudo authentication rejected");
                std::process::exit(1);
            }
            if let Some(code) = output.exit_code {
                if code != 0 {
                    std::process::exit(code as i32);
                }
            }
        }
        Operation::Run { command } => {
            let mut running = run(&server, &command).await?;
            if !running.success() {
                error!("sudo authentication rejected");
            }
            let mut stdout = tokio::io::stdout();
            let mut stderr = tokio::io::stderr();
            while let Some(event) = running.next_output().await {
                match event {
                    OutputEvent::Stdout(data) => {
                        stdout.write_all(&data).await?;
                        stdout.flush().await?;
                    }
                    OutputEvent::Stderr(data) => {
                        stderr.write_all(&data).await?;
                        stderr.flush().await?;
                    }
                }
            }
        }
        Operation::Script { commands } => {
            let transcript = run_sequence(&server, &commands, |command, response, _server| {
                info!("{command}: {}", response.trim_end());
            })
            .await?;
            print!("{transcript}");
        }
        Operation::PutFile { local, remote } => {
            put_file(&server, &remote, &local).await?;
            info!("uploaded {} to {remote}", local.display());
        }
        Operation::GetFile { remote, local } => {
            get_file(&server, &remote, &local).await?;
            info!("downloaded {remote} to {}", local.display());
        }
        Operation::PutDir { local, remote } => {
            let report = put_dir(&server, &remote, &local).await?;
            summarize(&report);
        }
        Operation::GetDir { remote, local } => {
            let report = get_dir(&server, &remote, &local).await?;
            summarize(&report);
        }
    }

    Ok(())
}

fn summarize(report: &TransferReport) {
    info!(
        "{} directories, {} files, {} failures",
        report.dirs.len(),
        report.files.len(),
        report.failed()
    );
    for item in report.dirs.iter().chain(report.files.iter()) {
        if let Some(err) = &item.error {
            error!("{}: {err}", item.path);
        }
    }
}
