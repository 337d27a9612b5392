//! An in-memory `InstanceLister` with scriptable failures, an in-process
//! HTTP server, and fixtures.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::ecs::{
    DescribeInstances, Instance, InstanceLister, InstancePage, IpAddressSet, ListTagResources,
    TagResourcePage, VpcAttributes,
};

pub fn trace_init() {
    let levels = std::env::var("TEST_LOG").unwrap_or_else(|_| "warn".into());

    crate::trace::init(false, &levels);
}

/// Serves every connection with `handler` on a random local port.
pub async fn start_server<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<Full<Bytes>>, http::Error>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _peer)) = listener.accept().await else {
                break;
            };

            let handler = handler.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| handler(req));
                if let Err(err) = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!(message = "serve test connection failed", %err);
                }
            });
        }
    });

    addr
}

/// A running VPC instance with a private address.
pub fn instance(id: &str) -> Instance {
    Instance {
        instance_id: id.to_string(),
        region_id: "cn-hangzhou".to_string(),
        zone_id: "cn-hangzhou-g".to_string(),
        status: "Running".to_string(),
        instance_network_type: "vpc".to_string(),
        vpc_attributes: VpcAttributes {
            private_ip_address: IpAddressSet {
                ip_address: vec!["172.16.0.1".to_string()],
            },
            vpc_id: "vpc-bp1opxu1zkhn00gzv****".to_string(),
            vswitch_id: "vsw-bp1s5fnvk4gn2tws0****".to_string(),
        },
        ..Default::default()
    }
}

#[derive(Default)]
struct State {
    instances: Vec<Instance>,
    /// Left out of plain scans, still found by id
    hidden: HashSet<String>,

    total_count_override: Option<usize>,
    ignore_page_size: bool,
    repeat_first_on_pages: bool,
    fail_scan_page: Option<usize>,
    fail_ids: HashSet<String>,
    cancel_on_id_request: Option<CancellationToken>,

    tag_pages: VecDeque<crate::Result<TagResourcePage>>,

    describe_calls: Vec<DescribeInstances>,
    tag_calls: Vec<ListTagResources>,
}

/// Serves `DescribeInstances` from a list of instances and
/// `ListTagResources` from scripted pages. Every request is recorded.
#[derive(Default)]
pub struct MockLister {
    state: Mutex<State>,
}

impl MockLister {
    pub fn with_instances(instances: impl IntoIterator<Item = Instance>) -> Self {
        let lister = MockLister::default();
        lister.set_instances(instances);
        lister
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Report `count` as `TotalCount` no matter how many instances match.
    pub fn total_count_override(self, count: usize) -> Self {
        self.state().total_count_override = Some(count);
        self
    }

    /// Return everything from the requested page on, instead of one page.
    pub fn ignore_page_size(self) -> Self {
        self.state().ignore_page_size = true;
        self
    }

    /// Every scan page after the first starts with the first instance again.
    pub fn repeat_first_on_pages(self) -> Self {
        self.state().repeat_first_on_pages = true;
        self
    }

    pub fn fail_describe_page(self, page: usize) -> Self {
        self.fail_scan_page(page);
        self
    }

    /// Queue a page of the tag index. Once the queue is drained the index
    /// returns empty pages.
    pub fn tag_page(self, ids: &[&str], next_token: Option<&str>) -> Self {
        self.state().tag_pages.push_back(Ok(TagResourcePage {
            resource_ids: ids.iter().map(ToString::to_string).collect(),
            next_token: next_token.map(ToString::to_string),
        }));
        self
    }

    pub fn tag_error(self, msg: &str) -> Self {
        self.state().tag_pages.push_back(Err(msg.to_string().into()));
        self
    }

    pub fn set_instances(&self, instances: impl IntoIterator<Item = Instance>) {
        let mut state = self.state();
        state.instances = instances.into_iter().collect();
        state.hidden.clear();
    }

    pub fn hide_from_scan<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        self.state()
            .hidden
            .extend(ids.into_iter().map(ToString::to_string));
    }

    /// Plain scans fail on `page`.
    pub fn fail_scan_page(&self, page: usize) {
        self.state().fail_scan_page = Some(page);
    }

    /// Requests filtered by any of `ids` fail.
    pub fn fail_ids<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        self.state()
            .fail_ids
            .extend(ids.into_iter().map(ToString::to_string));
    }

    /// The next request filtered by ids cancels `token` and never completes.
    pub fn cancel_on_id_request(&self, token: CancellationToken) {
        self.state().cancel_on_id_request = Some(token);
    }

    /// Clears every scripted failure.
    pub fn recover(&self) {
        let mut state = self.state();
        state.fail_scan_page = None;
        state.fail_ids.clear();
        state.cancel_on_id_request = None;
    }

    pub fn clear_calls(&self) {
        let mut state = self.state();
        state.describe_calls.clear();
        state.tag_calls.clear();
    }

    pub fn describe_calls(&self) -> Vec<DescribeInstances> {
        self.state().describe_calls.clone()
    }

    pub fn tag_calls(&self) -> Vec<ListTagResources> {
        self.state().tag_calls.clone()
    }

    fn describe(&self, req: &DescribeInstances) -> Result<InstancePage, Option<CancellationToken>> {
        let mut state = self.state();
        state.describe_calls.push(req.clone());

        let matched = match &req.instance_ids {
            Some(encoded) => {
                let ids = serde_json::from_str::<Vec<String>>(encoded).unwrap();
                if let Some(token) = state.cancel_on_id_request.take() {
                    return Err(Some(token));
                }
                if ids.iter().any(|id| state.fail_ids.contains(id)) {
                    return Err(None);
                }

                state
                    .instances
                    .iter()
                    .filter(|instance| ids.contains(&instance.instance_id))
                    .cloned()
                    .collect::<Vec<_>>()
            }
            None => {
                if state.fail_scan_page == Some(req.page_number) {
                    return Err(None);
                }

                state
                    .instances
                    .iter()
                    .filter(|instance| !state.hidden.contains(&instance.instance_id))
                    .cloned()
                    .collect::<Vec<_>>()
            }
        };

        let total_count = state.total_count_override.unwrap_or(matched.len());
        let start = (req.page_number - 1) * req.page_size;
        let mut instances = if state.ignore_page_size {
            matched.iter().skip(start).cloned().collect::<Vec<_>>()
        } else {
            matched
                .iter()
                .skip(start)
                .take(req.page_size)
                .cloned()
                .collect::<Vec<_>>()
        };

        if state.repeat_first_on_pages
            && req.instance_ids.is_none()
            && req.page_number > 1
            && !instances.is_empty()
        {
            instances.insert(0, matched[0].clone());
        }

        Ok(InstancePage {
            instances,
            total_count,
        })
    }
}

#[async_trait::async_trait]
impl InstanceLister for MockLister {
    async fn describe_instances(&self, req: &DescribeInstances) -> crate::Result<InstancePage> {
        match self.describe(req) {
            Ok(page) => Ok(page),
            Err(Some(token)) => {
                token.cancel();
                std::future::pending().await
            }
            Err(None) => Err(format!("mock DescribeInstances failed, page {}", req.page_number).into()),
        }
    }

    async fn list_tag_resources(&self, req: &ListTagResources) -> crate::Result<TagResourcePage> {
        let mut state = self.state();
        state.tag_calls.push(req.clone());

        state.tag_pages.pop_front().unwrap_or_else(|| Ok(TagResourcePage::default()))
    }
}
