use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use pin_project_lite::pin_project;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Why the process should stop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SignalTo {
    /// Finish the refresh in flight, then stop.
    Shutdown,
    /// Stop immediately.
    Quit,
}

/// A closed signal stream yields `Ready(None)`, which is not a signal.
#[inline]
fn received(poll: Poll<Option<()>>) -> bool {
    matches!(poll, Poll::Ready(Some(())))
}

pin_project! {
    pub struct Signals {
        #[pin]
        sigint: Signal,
        #[pin]
        sigterm: Signal,
        #[pin]
        sigquit: Signal,
    }
}

impl Stream for Signals {
    type Item = SignalTo;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if received(this.sigint.poll_recv(cx)) {
            info!(message = "Signal received", signal = "SIGINT");
            return Poll::Ready(Some(SignalTo::Shutdown));
        }

        if received(this.sigterm.poll_recv(cx)) {
            info!(message = "Signal received", signal = "SIGTERM");
            return Poll::Ready(Some(SignalTo::Shutdown));
        }

        if received(this.sigquit.poll_recv(cx)) {
            info!(message = "Signal received", signal = "SIGQUIT");
            return Poll::Ready(Some(SignalTo::Quit));
        }

        Poll::Pending
    }
}

/// Signals from OS/user
pub fn os_signals() -> std::io::Result<Signals> {
    Ok(Signals {
        sigint: signal(SignalKind::interrupt())?,
        sigterm: signal(SignalKind::terminate())?,
        sigquit: signal(SignalKind::quit())?,
    })
}

/// Cancels `token` on the first signal of `stream` and returns it.
///
/// Resolves to `None` without cancelling when the stream ends.
pub async fn cancel_on<S>(stream: S, token: CancellationToken) -> Option<SignalTo>
where
    S: Stream<Item = SignalTo>,
{
    let mut stream = std::pin::pin!(stream);

    let signal = stream.next().await?;
    token.cancel();

    Some(signal)
}
