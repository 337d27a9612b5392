use serde::{Deserialize, Serialize};

use super::model::Instance;

/// The `ResourceType` asked from the tag index.
pub const RESOURCE_TYPE_INSTANCE: &str = "instance";

/// The token the tag index hands out when there is nothing left to read.
const EMPTY_MARKER: &str = "ICM=";

/// Selects instances carrying tag `key` with any of `values`. Filters are
/// conjunctive across keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TagFilter {
    pub key: String,

    #[serde(default)]
    pub values: Vec<String>,
}

/// Parameters of one `DescribeInstances` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescribeInstances {
    pub region_id: String,
    /// 1-based page number
    pub page_number: usize,
    pub page_size: usize,
    /// A JSON encoded array of instance ids, restricts the listing to them.
    pub instance_ids: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstancePage {
    pub instances: Vec<Instance>,
    /// How many instances match the request in total, across all pages.
    pub total_count: usize,
}

/// Parameters of one `ListTagResources` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListTagResources {
    pub region_id: String,
    pub resource_type: &'static str,
    pub tag_filters: Vec<TagFilter>,
    pub next_token: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagResourcePage {
    pub resource_ids: Vec<String>,
    pub next_token: Option<String>,
}

/// Position in the tag index walk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cursor {
    /// No request issued yet.
    Initial,
    /// More pages can be read with this token.
    Active(String),
    /// No more pages.
    Exhausted,
}

impl Cursor {
    /// Interprets the continuation token of a tag index response.
    pub fn from_token(token: Option<&str>) -> Cursor {
        match token {
            None | Some("") | Some(EMPTY_MARKER) => Cursor::Exhausted,
            Some(token) => Cursor::Active(token.to_string()),
        }
    }

    /// The token to send with the next request, `None` for the first one.
    pub fn token(&self) -> Option<&str> {
        match self {
            Cursor::Active(token) => Some(token),
            Cursor::Initial | Cursor::Exhausted => None,
        }
    }
}

/// The capability to enumerate instances of a region.
///
/// Implementations do not retry, a failed call is reported as is.
#[async_trait::async_trait]
pub trait InstanceLister: Send + Sync {
    async fn describe_instances(&self, req: &DescribeInstances) -> crate::Result<InstancePage>;

    async fn list_tag_resources(&self, req: &ListTagResources) -> crate::Result<TagResourcePage>;
}
