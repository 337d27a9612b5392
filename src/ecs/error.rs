use std::future::Future;

use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration, {0}")]
    Config(String),

    #[error("{action} failed, {source}")]
    Transport {
        action: &'static str,
        source: crate::Error,
    },

    #[error("refresh cancelled")]
    Cancelled,

    #[error("encode instance ids failed, {0}")]
    Encode(#[from] serde_json::Error),
}

impl Error {
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Awaits `fut` unless `cancel` fires first, transport failures are tagged
/// with `action`.
pub(super) async fn cancellable<T, F>(
    cancel: &CancellationToken,
    action: &'static str,
    fut: F,
) -> Result<T, Error>
where
    F: Future<Output = crate::Result<T>>,
{
    tokio::select! {
        biased;

        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result.map_err(|source| Error::Transport { action, source }),
    }
}
