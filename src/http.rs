use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{ACCEPT_ENCODING, HeaderValue, USER_AGENT};
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{ConfigBuilderExt, HttpsConnector};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use rustls::ClientConfig;
use thiserror::Error;
use tracing::Instrument;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Failed to load native root certificates: {0}")]
    NativeCerts(std::io::Error),
    #[error("Failed to make HTTP(S) request: {0}")]
    CallRequest(#[from] hyper_util::client::legacy::Error),
    #[error("Failed to reading response: {0}")]
    ReadIncoming(#[from] hyper::Error),
    #[error("Failed to build HTTP request: {0}")]
    BuildRequest(#[from] http::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// A HTTP(S) client which reads whole responses.
#[derive(Clone)]
pub struct HttpClient {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    user_agent: HeaderValue,
    timeout: Duration,
}

impl HttpClient {
    pub fn new() -> Result<HttpClient, HttpError> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);

        let config = ClientConfig::builder()
            .with_native_roots()
            .map_err(HttpError::NativeCerts)?
            .with_no_client_auth();
        let https = HttpsConnector::from((http, config));

        let client = Client::builder(TokioExecutor::new()).build(https);
        let user_agent = HeaderValue::from_static(concat!("ecs-sd/", env!("CARGO_PKG_VERSION")));

        Ok(HttpClient {
            client,
            user_agent,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Bounds every request, reading the body included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn send(
        &self,
        mut req: Request<Full<Bytes>>,
    ) -> BoxFuture<'static, Result<Response<Bytes>, HttpError>> {
        let span = info_span!("http", method = %req.method(), uri = %req.uri().path());

        if !req.headers().contains_key(USER_AGENT) {
            req.headers_mut().insert(USER_AGENT, self.user_agent.clone());
        }
        if !req.headers().contains_key(ACCEPT_ENCODING) {
            req.headers_mut()
                .insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        }

        let timeout = self.timeout;
        let resp = self.client.request(req);

        let fut = async move {
            let before = std::time::Instant::now();

            let read = async move {
                let resp = resp.await?;
                let (parts, incoming) = resp.into_parts();
                let body = incoming.collect().await?.to_bytes();

                Ok::<_, HttpError>(Response::from_parts(parts, body))
            };

            let resp = tokio::time::timeout(timeout, read)
                .await
                .map_err(|_| HttpError::Timeout(timeout))??;

            debug!(
                message = "HTTP response received",
                status = %resp.status(),
                size = resp.body().len(),
                elapsed = ?before.elapsed(),
            );

            Ok(resp)
        }
        .instrument(span);

        Box::pin(fut)
    }
}
