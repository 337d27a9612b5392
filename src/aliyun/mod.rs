//! A minimal client of the Alibaba Cloud RPC style API.

pub mod credentials;
mod signer;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use http::{Request, StatusCode};
use http_body_util::Full;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::ecs::{
    DescribeInstances, Instance, InstanceLister, InstancePage, ListTagResources, TagResourcePage,
};
use crate::http::{HttpClient, HttpError};
use credentials::{CredentialError, CredentialProvider};

const ECS_VERSION: &str = "2014-05-26";

/// The public ECS endpoint of `region_id`.
pub fn ecs_endpoint(region_id: &str) -> String {
    format!("https://ecs.{region_id}.aliyuncs.com")
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{code}: {message}, status: {status}, request id: {request_id}")]
    Service {
        status: StatusCode,
        code: String,
        message: String,
        request_id: String,
    },

    #[error("unexpected status {status}, {body}")]
    UnexpectedStatus { status: StatusCode, body: String },

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("decode response failed, {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ServiceError {
    request_id: String,
    code: String,
    message: String,
}

/// Calls `action` with a signed `GET` request and decodes the response.
pub(crate) async fn invoke<T: DeserializeOwned>(
    http: &HttpClient,
    endpoint: &str,
    version: &str,
    action: &str,
    mut params: BTreeMap<String, String>,
    credentials: &credentials::Credentials,
) -> Result<T, ApiError> {
    params.insert("Action".to_string(), action.to_string());

    let nonce = format!("{:032x}", rand::random::<u128>());
    let query = signer::signed_query(params, version, credentials, &nonce, Utc::now());
    let req = Request::get(format!("{}/?{query}", endpoint.trim_end_matches('/')))
        .body(Full::default())
        .map_err(HttpError::from)?;

    let resp = http.send(req).await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.into_body();

        return Err(match serde_json::from_slice::<ServiceError>(&body) {
            Ok(err) if !err.code.is_empty() => ApiError::Service {
                status,
                code: err.code,
                message: err.message,
                request_id: err.request_id,
            },
            _ => ApiError::UnexpectedStatus {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            },
        });
    }

    serde_json::from_slice(resp.body()).map_err(Into::into)
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DescribeInstancesResponse {
    total_count: usize,
    instances: InstanceSet,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InstanceSet {
    instance: Vec<Instance>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ListTagResourcesResponse {
    next_token: Option<String>,
    tag_resources: TagResourceSet,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct TagResourceSet {
    tag_resource: Vec<TagResource>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct TagResource {
    resource_id: String,
}

/// Lists ECS instances of one region.
pub struct Client {
    http: HttpClient,
    endpoint: String,
    credentials: Arc<CredentialProvider>,
}

impl Client {
    pub fn new(http: HttpClient, endpoint: String, credentials: Arc<CredentialProvider>) -> Self {
        Client {
            http,
            endpoint,
            credentials,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        params: BTreeMap<String, String>,
    ) -> Result<T, ApiError> {
        let credentials = self.credentials.credentials().await?;

        invoke(
            &self.http,
            &self.endpoint,
            ECS_VERSION,
            action,
            params,
            &credentials,
        )
        .await
    }
}

fn describe_instances_params(req: &DescribeInstances) -> BTreeMap<String, String> {
    let mut params = BTreeMap::from([
        ("RegionId".to_string(), req.region_id.clone()),
        ("PageNumber".to_string(), req.page_number.to_string()),
        ("PageSize".to_string(), req.page_size.to_string()),
    ]);
    if let Some(ids) = &req.instance_ids {
        params.insert("InstanceIds".to_string(), ids.clone());
    }

    params
}

fn list_tag_resources_params(req: &ListTagResources) -> BTreeMap<String, String> {
    let mut params = BTreeMap::from([
        ("RegionId".to_string(), req.region_id.clone()),
        ("ResourceType".to_string(), req.resource_type.to_string()),
    ]);
    if let Some(token) = &req.next_token {
        params.insert("NextToken".to_string(), token.clone());
    }

    // both indexes are 1-based
    for (n, filter) in req.tag_filters.iter().enumerate() {
        let n = n + 1;
        params.insert(format!("TagFilter.{n}.TagKey"), filter.key.clone());
        for (m, value) in filter.values.iter().enumerate() {
            params.insert(format!("TagFilter.{n}.TagValues.{}", m + 1), value.clone());
        }
    }

    params
}

#[async_trait::async_trait]
impl InstanceLister for Client {
    async fn describe_instances(&self, req: &DescribeInstances) -> crate::Result<InstancePage> {
        let resp: DescribeInstancesResponse = self
            .call("DescribeInstances", describe_instances_params(req))
            .await?;

        Ok(InstancePage {
            instances: resp.instances.instance,
            total_count: resp.total_count,
        })
    }

    async fn list_tag_resources(&self, req: &ListTagResources) -> crate::Result<TagResourcePage> {
        let resp: ListTagResourcesResponse = self
            .call("ListTagResources", list_tag_resources_params(req))
            .await?;

        Ok(TagResourcePage {
            resource_ids: resp
                .tag_resources
                .tag_resource
                .into_iter()
                .map(|resource| resource.resource_id)
                .collect(),
            next_token: resp.next_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::Response;
    use hyper::body::Incoming;
    use pretty_assertions::assert_eq;

    use super::credentials::{Credentials, Strategy};
    use super::*;
    use crate::ecs::{RESOURCE_TYPE_INSTANCE, TagFilter};
    use crate::testing::start_server;

    fn query_params(req: &Request<Incoming>) -> BTreeMap<String, String> {
        url::form_urlencoded::parse(req.uri().query().unwrap_or_default().as_bytes())
            .into_owned()
            .collect()
    }

    /// Recomputes the signature the way the server does.
    fn verify_signature(mut params: BTreeMap<String, String>, secret: &str) -> bool {
        let Some(signature) = params.remove("Signature") else {
            return false;
        };

        let data = signer::string_to_sign("GET", &signer::canonical_query(&params));
        signer::sign(secret, &data) == signature
    }

    fn client(addr: std::net::SocketAddr) -> Client {
        let http = HttpClient::new().unwrap();
        let provider = CredentialProvider::new(
            Strategy::Static(Credentials::new("testid", "testsecret")),
            http.clone(),
        );

        Client::new(http, format!("http://{addr}"), Arc::new(provider))
    }

    #[test]
    fn tag_filter_params() {
        let params = list_tag_resources_params(&ListTagResources {
            region_id: "cn-hangzhou".to_string(),
            resource_type: RESOURCE_TYPE_INSTANCE,
            tag_filters: vec![
                TagFilter {
                    key: "env".to_string(),
                    values: vec!["prod".to_string(), "staging".to_string()],
                },
                TagFilter {
                    key: "team".to_string(),
                    values: vec!["sre".to_string()],
                },
            ],
            next_token: Some("caeba0bbb2be03f84eb48b699f0a****".to_string()),
        });

        let want = [
            ("NextToken", "caeba0bbb2be03f84eb48b699f0a****"),
            ("RegionId", "cn-hangzhou"),
            ("ResourceType", "instance"),
            ("TagFilter.1.TagKey", "env"),
            ("TagFilter.1.TagValues.1", "prod"),
            ("TagFilter.1.TagValues.2", "staging"),
            ("TagFilter.2.TagKey", "team"),
            ("TagFilter.2.TagValues.1", "sre"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<BTreeMap<_, _>>();

        assert_eq!(params, want);
    }

    #[test]
    fn first_tag_request_has_no_token() {
        let params = list_tag_resources_params(&ListTagResources {
            region_id: "cn-hangzhou".to_string(),
            resource_type: RESOURCE_TYPE_INSTANCE,
            tag_filters: vec![],
            next_token: None,
        });

        assert!(!params.contains_key("NextToken"));
    }

    #[tokio::test]
    async fn describe_instances() {
        let addr = start_server(|req: Request<Incoming>| {
            let params = query_params(&req);

            async move {
                if !verify_signature(params.clone(), "testsecret") {
                    return Response::builder()
                        .status(StatusCode::BAD_REQUEST)
                        .body(Full::new(Bytes::from_static(
                            br#"{"RequestId": "r-1", "Code": "SignatureDoesNotMatch", "Message": "signature mismatch"}"#,
                        )));
                }

                assert_eq!(params["Action"], "DescribeInstances");
                assert_eq!(params["Version"], "2014-05-26");
                assert_eq!(params["Format"], "JSON");
                assert_eq!(params["RegionId"], "cn-hangzhou");
                assert_eq!(params["PageNumber"], "2");
                assert_eq!(params["PageSize"], "50");
                assert_eq!(params["InstanceIds"], r#"["i-1","i-2"]"#);
                assert!(!params.contains_key("SecurityToken"));

                Response::builder().body(Full::new(Bytes::from_static(
                    br#"{
    "RequestId": "473469C7-AA6F-4DC5-B3DB-A3DC0DE3****",
    "TotalCount": 120,
    "PageNumber": 2,
    "PageSize": 50,
    "Instances": {
        "Instance": [
            {
                "InstanceId": "i-1",
                "RegionId": "cn-hangzhou",
                "ZoneId": "cn-hangzhou-g",
                "Status": "Running",
                "InstanceNetworkType": "vpc",
                "VpcAttributes": { "PrivateIpAddress": { "IpAddress": ["172.16.0.1"] } }
            },
            { "InstanceId": "i-2" }
        ]
    }
}"#,
                )))
            }
        })
        .await;

        let page = client(addr)
            .describe_instances(&DescribeInstances {
                region_id: "cn-hangzhou".to_string(),
                page_number: 2,
                page_size: 50,
                instance_ids: Some(r#"["i-1","i-2"]"#.to_string()),
            })
            .await
            .unwrap();

        assert_eq!(page.total_count, 120);
        assert_eq!(page.instances.len(), 2);
        assert_eq!(
            page.instances[0].vpc_attributes.private_ip_address.first(),
            Some("172.16.0.1")
        );
        assert_eq!(page.instances[1].instance_id, "i-2");
    }

    #[tokio::test]
    async fn list_tag_resources() {
        let addr = start_server(|req: Request<Incoming>| {
            let params = query_params(&req);

            async move {
                assert!(verify_signature(params.clone(), "testsecret"));
                assert_eq!(params["Action"], "ListTagResources");
                assert_eq!(params["TagFilter.1.TagValues.1"], "prod");

                Response::builder().body(Full::new(Bytes::from_static(
                    br#"{
    "RequestId": "DE65F6B7-7566-4802-9007-96F2494AC512",
    "NextToken": "ICM=",
    "TagResources": {
        "TagResource": [
            { "ResourceType": "instance", "TagValue": "prod", "ResourceId": "i-1", "TagKey": "env" },
            { "ResourceType": "instance", "TagValue": "prod", "ResourceId": "i-2", "TagKey": "env" }
        ]
    }
}"#,
                )))
            }
        })
        .await;

        let page = client(addr)
            .list_tag_resources(&ListTagResources {
                region_id: "cn-hangzhou".to_string(),
                resource_type: RESOURCE_TYPE_INSTANCE,
                tag_filters: vec![TagFilter {
                    key: "env".to_string(),
                    values: vec!["prod".to_string()],
                }],
                next_token: None,
            })
            .await
            .unwrap();

        assert_eq!(page.resource_ids, vec!["i-1", "i-2"]);
        assert_eq!(page.next_token.as_deref(), Some("ICM="));
    }

    #[tokio::test]
    async fn service_error() {
        let addr = start_server(|_req: Request<Incoming>| async move {
            Response::builder()
                .status(StatusCode::FORBIDDEN)
                .body(Full::new(Bytes::from_static(
                    br#"{"RequestId": "7708A2B7-3E4B", "HostId": "ecs.aliyuncs.com", "Code": "Forbidden.RAM", "Message": "User not authorized to operate on the specified resource."}"#,
                )))
        })
        .await;

        let err = client(addr)
            .call::<DescribeInstancesResponse>("DescribeInstances", BTreeMap::new())
            .await
            .err()
            .unwrap();

        match err {
            ApiError::Service {
                status,
                code,
                request_id,
                ..
            } => {
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(code, "Forbidden.RAM");
                assert_eq!(request_id, "7708A2B7-3E4B");
            }
            err => panic!("unexpected error {err}"),
        }
    }

    #[tokio::test]
    async fn unexpected_status() {
        let addr = start_server(|_req: Request<Incoming>| async move {
            Response::builder()
                .status(StatusCode::BAD_GATEWAY)
                .body(Full::new(Bytes::from_static(b"bad gateway")))
        })
        .await;

        let err = client(addr)
            .call::<DescribeInstancesResponse>("DescribeInstances", BTreeMap::new())
            .await
            .err()
            .unwrap();

        assert!(
            matches!(&err, ApiError::UnexpectedStatus { status, body } if *status == StatusCode::BAD_GATEWAY && body == "bad gateway"),
            "{err}"
        );
    }
}
