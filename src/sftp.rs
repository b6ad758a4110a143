//! File deployment over the SFTP subsystem
//!
//! Single-file transfers plus recursive directory upload/download. The
//! directory pipelines scan one side, replay the tree onto the other, and
//! keep going when individual items fail: directory creation and file
//! transfer problems are logged and recorded in the returned
//! [`TransferReport`], never fatal to the batch. Only connection-level
//! failures abort a call.
//!
//! Batches run with a fixed concurrency ceiling of
//! [`TRANSFER_CONCURRENCY`] so many small files overlap their I/O latency
//! without flooding the remote server. All directory creations settle
//! before the first file transfer starts.

use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh_sftp::client::SftpSession;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::config::TRANSFER_CONCURRENCY;
use crate::error::{Result, SshDeployError};
use crate::ssh::{ServerDescriptor, Session};

/// The local or remote entries a directory pipeline will replay, as
/// relative paths rooted at the scanned base. The scan promises nothing
/// about parent/child ordering; consumers tolerate children arriving
/// before their parents.
#[derive(Debug, Default, Clone)]
pub struct TransferPlan {
    pub dirs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
}

impl TransferPlan {
    /// Enumerate a local tree
    pub fn scan(local_base: &Path) -> Result<Self> {
        if !local_base.is_dir() {
            return Err(SshDeployError::invalid_params(format!(
                "{} is not a directory",
                local_base.display()
            )));
        }

        let mut plan = TransferPlan::default();
        for entry in WalkDir::new(local_base).min_depth(1) {
            let entry = entry.map_err(|e| SshDeployError::Io(e.into()))?;
            let rel = entry
                .path()
                .strip_prefix(local_base)
                .map_err(|e| SshDeployError::invalid_params(e.to_string()))?
                .to_path_buf();
            if entry.file_type().is_dir() {
                plan.dirs.push(rel);
            } else {
                plan.files.push(rel);
            }
        }
        Ok(plan)
    }
}

/// Result of one directory creation or file transfer within a batch
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    /// The target path the item was mapped to
    pub path: String,
    /// The failure, when the item did not go through
    pub error: Option<String>,
}

/// Per-item outcomes of a directory pipeline
#[derive(Debug, Default, Clone)]
pub struct TransferReport {
    /// Directory creations, base directory first
    pub dirs: Vec<ItemOutcome>,
    /// File transfers
    pub files: Vec<ItemOutcome>,
    /// Error from the best-effort removal of the target base before
    /// re-population ("does not exist yet" is the expected case)
    pub cleanup_error: Option<String>,
}

impl TransferReport {
    /// Count of items that did not go through
    pub fn failed(&self) -> usize {
        self.dirs
            .iter()
            .chain(self.files.iter())
            .filter(|item| item.error.is_some())
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }
}

/// Map a relative path under the remote base, normalizing separators so
/// plans scanned on Windows still produce forward-slash remote paths
pub(crate) fn remote_join(base: &str, rel: &Path) -> String {
    let rel = rel.to_string_lossy().replace('\\', "/");
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        rel.trim_start_matches('/')
    )
}

/// Upload a single file
pub async fn put_file(server: &ServerDescriptor, remote_path: &str, local_path: &Path) -> Result<()> {
    debug!("{} to {}", local_path.display(), remote_path);
    let session = Session::open(server).await?;
    let result = async {
        let sftp = session.open_sftp().await?;
        let data = tokio::fs::read(local_path).await?;
        sftp.write(remote_path, &data)
            .await
            .map_err(|e| SshDeployError::sftp(e.to_string()))
    }
    .await;
    session.close().await;
    result
}

/// Download a single file
pub async fn get_file(server: &ServerDescriptor, remote_path: &str, local_path: &Path) -> Result<()> {
    debug!("{} to {}", remote_path, local_path.display());
    let session = Session::open(server).await?;
    let result = async {
        let sftp = session.open_sftp().await?;
        let data = sftp
            .read(remote_path)
            .await
            .map_err(|e| SshDeployError::sftp(e.to_string()))?;
        tokio::fs::write(local_path, data).await?;
        Ok(())
    }
    .await;
    session.close().await;
    result
}

/// Upload a directory tree under a remote base path.
///
/// The remote base is removed best-effort first (a clean target before
/// re-population), then recreated along with every scanned directory, then
/// every file is pushed. Per-item failures are recorded in the report and
/// never abort the batch.
pub async fn put_dir(
    server: &ServerDescriptor,
    remote_base: &str,
    local_base: &Path,
) -> Result<TransferReport> {
    info!("from {} to {}", local_base.display(), remote_base);
    let plan = TransferPlan::scan(local_base)?;

    let session = Session::open(server).await?;
    let result = put_dir_over(&session, remote_base, local_base, plan).await;
    session.close().await;
    result
}

async fn put_dir_over(
    session: &Session,
    remote_base: &str,
    local_base: &Path,
    plan: TransferPlan,
) -> Result<TransferReport> {
    let sftp = Arc::new(session.open_sftp().await?);

    debug!("rmdir {remote_base}");
    let cleanup_error = match sftp.remove_dir(remote_base).await {
        Ok(()) => None,
        Err(e) => {
            error!("rmdir {remote_base}: {e}");
            Some(e.to_string())
        }
    };

    let mut report = TransferReport {
        cleanup_error,
        ..TransferReport::default()
    };

    // base first, so the batched creations have somewhere to land
    report
        .dirs
        .push(make_remote_dir(&sftp, remote_base.to_string()).await);

    let dir_tasks: Vec<_> = plan
        .dirs
        .iter()
        .map(|rel| {
            let sftp = Arc::clone(&sftp);
            let to = remote_join(remote_base, rel);
            async move { make_remote_dir(&sftp, to).await }
        })
        .collect();
    report.dirs.extend(run_limited(dir_tasks).await);

    let file_tasks: Vec<_> = plan
        .files
        .iter()
        .map(|rel| {
            let sftp = Arc::clone(&sftp);
            let from = local_base.join(rel);
            let to = remote_join(remote_base, rel);
            async move { push_file(&sftp, from, to).await }
        })
        .collect();
    report.files.extend(run_limited(file_tasks).await);

    Ok(report)
}

/// Download a directory tree under a local base path.
///
/// The mirror of [`put_dir`]: the remote tree is enumerated over SFTP,
/// the local base is removed best-effort, local directories are created
/// (tolerating any scan order), and files are pulled with the same
/// concurrency ceiling and the same per-item tolerance.
pub async fn get_dir(
    server: &ServerDescriptor,
    remote_base: &str,
    local_base: &Path,
) -> Result<TransferReport> {
    info!("from {} to {}", remote_base, local_base.display());
    let session = Session::open(server).await?;
    let result = get_dir_over(&session, remote_base, local_base).await;
    session.close().await;
    result
}

async fn get_dir_over(
    session: &Session,
    remote_base: &str,
    local_base: &Path,
) -> Result<TransferReport> {
    let sftp = Arc::new(session.open_sftp().await?);
    let plan = scan_remote(&sftp, remote_base).await?;

    debug!("rmdir {}", local_base.display());
    let cleanup_error = match tokio::fs::remove_dir(local_base).await {
        Ok(()) => None,
        Err(e) => {
            error!("rmdir {}: {e}", local_base.display());
            Some(e.to_string())
        }
    };

    let mut report = TransferReport {
        cleanup_error,
        ..TransferReport::default()
    };

    report
        .dirs
        .push(make_local_dir(local_base.to_path_buf()).await);

    let dir_tasks: Vec<_> = plan
        .dirs
        .iter()
        .map(|rel| {
            let to = local_base.join(rel);
            async move { make_local_dir(to).await }
        })
        .collect();
    report.dirs.extend(run_limited(dir_tasks).await);

    let file_tasks: Vec<_> = plan
        .files
        .iter()
        .map(|rel| {
            let sftp = Arc::clone(&sftp);
            let from = remote_join(remote_base, rel);
            let to = local_base.join(rel);
            async move { pull_file(&sftp, from, to).await }
        })
        .collect();
    report.files.extend(run_limited(file_tasks).await);

    Ok(report)
}

/// Enumerate a remote tree breadth-first. Enumeration failure is fatal
/// for the call; the tolerant phase starts once the plan exists.
async fn scan_remote(sftp: &SftpSession, remote_base: &str) -> Result<TransferPlan> {
    let mut plan = TransferPlan::default();
    let mut queue: VecDeque<String> = VecDeque::from([String::new()]);

    while let Some(rel) = queue.pop_front() {
        let remote = if rel.is_empty() {
            remote_base.to_string()
        } else {
            remote_join(remote_base, Path::new(&rel))
        };
        let entries = sftp
            .read_dir(&remote)
            .await
            .map_err(|e| SshDeployError::sftp(format!("failed to list {remote}: {e}")))?;

        for entry in entries {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let child = if rel.is_empty() {
                name.clone()
            } else {
                format!("{rel}/{name}")
            };
            if entry.file_type().is_dir() {
                plan.dirs.push(PathBuf::from(&child));
                queue.push_back(child);
            } else {
                plan.files.push(PathBuf::from(child));
            }
        }
    }

    Ok(plan)
}

async fn make_remote_dir(sftp: &SftpSession, to: String) -> ItemOutcome {
    info!("mkdir {to}");
    match sftp.create_dir(&to).await {
        Ok(()) => ItemOutcome {
            path: to,
            error: None,
        },
        Err(e) => {
            // pre-existing directories land here; tolerated
            error!("mkdir {to}: {e}");
            ItemOutcome {
                path: to,
                error: Some(e.to_string()),
            }
        }
    }
}

async fn make_local_dir(to: PathBuf) -> ItemOutcome {
    info!("mkdir {}", to.display());
    let path = to.display().to_string();
    match tokio::fs::create_dir_all(&to).await {
        Ok(()) => ItemOutcome { path, error: None },
        Err(e) => {
            error!("mkdir {path}: {e}");
            ItemOutcome {
                path,
                error: Some(e.to_string()),
            }
        }
    }
}

async fn push_file(sftp: &SftpSession, from: PathBuf, to: String) -> ItemOutcome {
    info!("put {} {}", from.display(), to);
    let result = async {
        let data = tokio::fs::read(&from).await.map_err(|e| e.to_string())?;
        sftp.write(&to, &data).await.map_err(|e| e.to_string())
    }
    .await;
    match result {
        Ok(()) => ItemOutcome {
            path: to,
            error: None,
        },
        Err(e) => {
            error!("put {to}: {e}");
            ItemOutcome {
                path: to,
                error: Some(e),
            }
        }
    }
}

async fn pull_file(sftp: &SftpSession, from: String, to: PathBuf) -> ItemOutcome {
    info!("get {} {}", from, to.display());
    let result = async {
        let data = sftp.read(&from).await.map_err(|e| e.to_string())?;
        tokio::fs::write(&to, data).await.map_err(|e| e.to_string())
    }
    .await;
    match result {
        Ok(()) => ItemOutcome {
            path: from,
            error: None,
        },
        Err(e) => {
            error!("get {from}: {e}");
            ItemOutcome {
                path: from,
                error: Some(e),
            }
        }
    }
}

/// Run a batch with at most [`TRANSFER_CONCURRENCY`] items in flight.
/// Every item is attempted; completion order is not the submission order.
async fn run_limited<F>(tasks: Vec<F>) -> Vec<ItemOutcome>
where
    F: Future<Output = ItemOutcome> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(TRANSFER_CONCURRENCY));
    let mut set = JoinSet::new();

    for task in tasks {
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            task.await
        });
    }

    let mut outcomes = Vec::with_capacity(set.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => error!("transfer task failed to run: {e}"),
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;

    fn sample_tree() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("a/b")).expect("mkdir");
        fs::write(tmp.path().join("a/f.txt"), b"f").expect("write");
        fs::write(tmp.path().join("a/b/g.txt"), b"g").expect("write");
        tmp
    }

    #[test]
    fn test_scan_separates_dirs_and_files() {
        let tmp = sample_tree();
        let plan = TransferPlan::scan(tmp.path()).expect("scan");

        let dirs: HashSet<PathBuf> = plan.dirs.into_iter().collect();
        let files: HashSet<PathBuf> = plan.files.into_iter().collect();
        assert_eq!(
            dirs,
            HashSet::from([PathBuf::from("a"), PathBuf::from("a/b")])
        );
        assert_eq!(
            files,
            HashSet::from([PathBuf::from("a/f.txt"), PathBuf::from("a/b/g.txt")])
        );
    }

    #[test]
    fn test_scan_rejects_missing_base() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let missing = tmp.path().join("nope");
        assert!(TransferPlan::scan(&missing).is_err());
    }

    #[test]
    fn test_remote_mapping_for_sample_tree() {
        let tmp = sample_tree();
        let plan = TransferPlan::scan(tmp.path()).expect("scan");

        let mut created: HashSet<String> = HashSet::from(["/deploy".to_string()]);
        created.extend(plan.dirs.iter().map(|rel| remote_join("/deploy", rel)));
        assert_eq!(
            created,
            HashSet::from([
                "/deploy".to_string(),
                "/deploy/a".to_string(),
                "/deploy/a/b".to_string(),
            ])
        );

        let transferred: HashSet<String> = plan
            .files
            .iter()
            .map(|rel| remote_join("/deploy", rel))
            .collect();
        assert_eq!(
            transferred,
            HashSet::from([
                "/deploy/a/f.txt".to_string(),
                "/deploy/a/b/g.txt".to_string(),
            ])
        );
    }

    #[test]
    fn test_remote_join_normalizes_backslashes() {
        assert_eq!(remote_join("/deploy", Path::new("a\\b\\c.txt")), "/deploy/a/b/c.txt");
        assert_eq!(remote_join("/deploy/", Path::new("a/f.txt")), "/deploy/a/f.txt");
    }

    #[test]
    fn test_report_counts_failures() {
        let report = TransferReport {
            dirs: vec![
                ItemOutcome {
                    path: "/deploy".into(),
                    error: None,
                },
                ItemOutcome {
                    path: "/deploy/a".into(),
                    error: Some("Permission denied".into()),
                },
            ],
            files: vec![ItemOutcome {
                path: "/deploy/a/f.txt".into(),
                error: None,
            }],
            cleanup_error: Some("No such file".into()),
        };
        assert_eq!(report.failed(), 1);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_run_limited_attempts_every_item_despite_failures() {
        let tasks: Vec<_> = (0..10)
            .map(|i| async move {
                ItemOutcome {
                    path: format!("item-{i}"),
                    error: (i % 2 == 0).then(|| "simulated failure".to_string()),
                }
            })
            .collect();

        let outcomes = run_limited(tasks).await;
        assert_eq!(outcomes.len(), 10);
        assert_eq!(outcomes.iter().filter(|o| o.error.is_some()).count(), 5);
    }

    #[tokio::test]
    async fn test_run_limited_empty_batch() {
        let outcomes = run_limited(Vec::<std::future::Ready<ItemOutcome>>::new()).await;
        assert!(outcomes.is_empty());
    }
}
