use bytes::Bytes;
use discovery::Snapshot;
use http::{Method, Request, Response, StatusCode, header};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::encode;

fn handle(req: &Request<Incoming>, snapshots: &watch::Receiver<Snapshot>) -> Response<Full<Bytes>> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/") => {
            let groups = snapshots.borrow().clone().unwrap_or_default();

            match encode(&groups) {
                Ok(body) => Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Full::new(Bytes::from(body)))
                    .expect("Response build failed"),
                Err(err) => {
                    error!(message = "encode targets failed", %err);

                    Response::builder()
                        .status(StatusCode::INTERNAL_SERVER_ERROR)
                        .body(Full::default())
                        .expect("Response build failed")
                }
            }
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::default())
            .expect("Response build failed"),
    }
}

/// Serves the latest snapshot for `http_sd` until `shutdown` is cancelled.
///
/// Until the first refresh succeeds an empty list is served. In flight
/// connections are shut down gracefully.
pub async fn serve(
    listener: TcpListener,
    snapshots: watch::Receiver<Snapshot>,
    shutdown: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,
            result = listener.accept() => match result {
                Ok(conn) => conn,
                Err(err) => {
                    error!(
                        message = "accept new connection failed",
                        %err
                    );

                    continue;
                }
            }
        };

        let snapshots = snapshots.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let resp = handle(&req, &snapshots);
                async move { Ok::<_, hyper::Error>(resp) }
            });
            let conn = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service);
            tokio::pin!(conn);

            let mut closing = false;
            loop {
                tokio::select! {
                    result = conn.as_mut() => {
                        if let Err(err) = result {
                            trace!(
                                message = "failed to serve http connection",
                                %peer,
                                %err
                            );
                        }

                        break
                    }
                    _ = shutdown.cancelled(), if !closing => {
                        closing = true;
                        conn.as_mut().graceful_shutdown();
                    }
                }
            }
        });
    }

    info!(message = "http server shutdown successful");
}
