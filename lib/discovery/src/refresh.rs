use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Discoverer, TargetGroup};

/// The latest published target groups. `None` until the first refresh
/// succeeds.
pub type Snapshot = Option<Vec<TargetGroup>>;

/// `run` drives a [`Discoverer`] periodically and publishes every successful
/// refresh to `publisher`.
///
/// Refreshes never overlap, a slow cycle delays the next tick instead. A
/// failed or timed out cycle leaves the last published snapshot untouched.
/// Returns when `shutdown` is cancelled or all receivers are dropped.
pub async fn run<D>(
    mut discoverer: D,
    interval: Duration,
    timeout: Option<Duration>,
    shutdown: CancellationToken,
    publisher: watch::Sender<Snapshot>,
) where
    D: Discoverer,
{
    let name = discoverer.name().to_string();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let cancel = shutdown.child_token();
        let result = match timeout {
            Some(timeout) => {
                let deadline = tokio::time::sleep(timeout);
                let refresh = discoverer.refresh(&cancel);
                tokio::pin!(deadline, refresh);

                loop {
                    tokio::select! {
                        result = &mut refresh => break result,
                        // the refresh observes the cancellation and returns
                        // on its own, keep polling it until then.
                        _ = &mut deadline, if !cancel.is_cancelled() => {
                            warn!(message = "refresh timed out", discoverer = %name, ?timeout);

                            cancel.cancel();
                        }
                    }
                }
            }
            None => discoverer.refresh(&cancel).await,
        };

        match result {
            Ok(groups) => {
                let targets = groups.iter().map(TargetGroup::len).sum::<usize>();
                debug!(
                    message = "refresh finished",
                    discoverer = %name,
                    groups = groups.len(),
                    targets
                );

                if publisher.send(Some(groups)).is_err() {
                    info!(
                        message = "all receivers dropped, stop refreshing",
                        discoverer = %name
                    );
                    break;
                }
            }
            Err(err) => {
                if shutdown.is_cancelled() {
                    break;
                }

                warn!(message = "error while refreshing targets", discoverer = %name, %err);
            }
        }
    }

    debug!(message = "refresh routine finished", discoverer = %name);
}
