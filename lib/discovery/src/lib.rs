mod label;
mod refresh;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use label::{ADDRESS_LABEL, META_LABEL_PREFIX, sanitize_label_name};
pub use refresh::{Snapshot, run};

/// A set of labels identifies a single target.
pub type LabelSet = BTreeMap<String, String>;

/// TargetGroup is a set of targets with a common tags
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct TargetGroup {
    /// `targets` is a list of targets identified by a label set. Each target
    /// is uniquely identifiable in the group by its `address` label
    pub targets: Vec<LabelSet>,

    /// `labels` is a set of labels that is common across all targets in the group
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: LabelSet,

    /// An identifier that describes a group of targets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl TargetGroup {
    pub fn new(source: impl Into<String>) -> Self {
        TargetGroup {
            targets: vec![],
            labels: Default::default(),
            source: Some(source.into()),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Returns the value of `name` for every target which carries it, in
    /// target order.
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.targets
            .iter()
            .filter_map(move |target| target.get(name).map(String::as_str))
    }
}

/// Discoverer provides information about target groups. It maintains a set of
/// sources from which TargetGroup can originate.
///
/// `Discoverer` does not know if an actual change happened. It does guarantee
/// that it sends the new TargetGroup whenever a refresh succeeds.
///
/// `refresh` takes `&mut self`, so only one refresh can be in flight for a
/// discoverer at any time.
#[async_trait::async_trait]
pub trait Discoverer: Send {
    type Error: std::fmt::Display + Send;

    /// The name used in logs.
    fn name(&self) -> &str;

    /// Run one refresh cycle. Implementations must return promptly once
    /// `cancel` is cancelled, and must not expose partial results.
    async fn refresh(&mut self, cancel: &CancellationToken) -> Result<Vec<TargetGroup>, Self::Error>;
}
