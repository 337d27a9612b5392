use std::ffi::OsString;
use std::path::{Path, PathBuf};

use discovery::{Snapshot, TargetGroup};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::encode;

/// Writes static configs to `path` for `file_sd`.
pub struct FileOutput {
    path: PathBuf,
    last: Option<Vec<u8>>,
}

impl FileOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileOutput {
            path: path.into(),
            last: None,
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the file atomically, readers see either the old or the new
    /// content. Returns `false` when the content didn't change since the
    /// last write.
    pub async fn write(&mut self, groups: &[TargetGroup]) -> std::io::Result<bool> {
        let data = encode(groups).map_err(std::io::Error::other)?;
        if self.last.as_ref() == Some(&data) {
            return Ok(false);
        }

        let tmp = temp_path(&self.path);
        tokio::fs::write(&tmp, &data).await?;
        if let Err(err) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err);
        }

        self.last = Some(data);

        Ok(true)
    }
}

/// The temporary file lives beside the target, so renaming never crosses
/// filesystems.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_else(|| "targets.json".as_ref()));
    name.push(".tmp");

    path.with_file_name(name)
}

/// Writes every published snapshot until `shutdown` is cancelled or the
/// publisher is gone.
pub async fn run(
    mut output: FileOutput,
    mut snapshots: watch::Receiver<Snapshot>,
    shutdown: CancellationToken,
) {
    loop {
        let groups = snapshots.borrow_and_update().clone();
        if let Some(groups) = groups {
            match output.write(&groups).await {
                Ok(true) => info!(
                    message = "targets written",
                    path = ?output.path(),
                    targets = groups.iter().map(TargetGroup::len).sum::<usize>()
                ),
                Ok(false) => debug!(message = "targets unchanged", path = ?output.path()),
                Err(err) => error!(
                    message = "write targets failed",
                    path = ?output.path(),
                    %err
                ),
            }
        }

        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,
            result = snapshots.changed() => if result.is_err() {
                break;
            }
        }
    }

    debug!(message = "file output finished", path = ?output.path());
}
