//! Discovery of Alibaba Cloud ECS instances.
//!
//! One refresh enumerates the instances of a region, either with a plain
//! paginated scan or by walking the tag index when tag filters are
//! configured, and converts them to scrape targets. A paginated scan can
//! skip instances while the membership changes between pages, so the
//! instances found by the previous refresh are looked up again by id and
//! merged back in.

mod error;
mod lister;
mod merge;
mod model;
mod pager;
mod targets;
mod walker;

use std::sync::Arc;

use discovery::{Discoverer, TargetGroup};
use tokio_util::sync::CancellationToken;

pub use error::Error;
pub use lister::{
    Cursor, DescribeInstances, InstanceLister, InstancePage, ListTagResources,
    RESOURCE_TYPE_INSTANCE, TagFilter, TagResourcePage,
};
pub use merge::{merge_append, merge_by_id};
pub use model::{EipAddress, Instance, IpAddressSet, Tag, Tags, VpcAttributes};
pub use pager::{Pager, page_size};
pub use targets::{INSTANCE_ID_LABEL, TargetBuilder, Targets};
pub use walker::TagWalker;

/// The most records a single `DescribeInstances` call returns, and the most
/// instance ids it accepts as a filter.
pub const MAX_PAGE_SIZE: usize = 50;

/// What to discover and how to label it.
#[derive(Clone, Debug, PartialEq)]
pub struct Options {
    pub region_id: String,

    /// Filters are conjunctive across keys, when present the tag index is
    /// walked instead of scanning the whole region.
    pub tag_filters: Vec<TagFilter>,

    /// Caps the number of instances a refresh enumerates, `<= 0` means
    /// unbounded.
    pub limit: i64,

    /// Port of the scrape address.
    pub port: u16,

    /// Attached to every target as `__meta_ecs_user_id`.
    pub user_id: Option<String>,

    /// Deduplicate the tag walk by instance id. The plain scan is always
    /// deduplicated when it is merged with the recheck, the tag index may
    /// still hand out the same instance on more than one page.
    pub dedup_scan: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            region_id: String::new(),
            tag_filters: vec![],
            limit: 0,
            port: 80,
            user_id: None,
            dedup_scan: false,
        }
    }
}

/// Counters of one refresh.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshStats {
    /// Instances returned by the scan or the tag walk
    pub scanned: usize,
    /// Instances found again by id from the previous refresh
    pub rechecked: usize,
    pub targets: usize,
    /// Instances dropped for having no address
    pub no_address: usize,
}

pub struct EcsDiscovery {
    lister: Arc<dyn InstanceLister>,
    options: Options,
    builder: TargetBuilder,

    /// Targets of the last successful refresh, the ids are looked up again
    /// on the next one.
    cache: TargetGroup,
    stats: RefreshStats,
}

impl EcsDiscovery {
    pub fn new(lister: Arc<dyn InstanceLister>, options: Options) -> Self {
        let builder = TargetBuilder::new(options.port, options.user_id.clone());
        let cache = TargetGroup::new(options.region_id.clone());

        EcsDiscovery {
            lister,
            options,
            builder,
            cache,
            stats: RefreshStats::default(),
        }
    }

    /// Counters of the last successful refresh.
    #[inline]
    pub fn stats(&self) -> RefreshStats {
        self.stats
    }

    /// Runs one refresh cycle.
    ///
    /// Any failure on the enumeration path aborts the cycle, the previous
    /// result is kept as is for the next one. Failures while looking up the
    /// previous instances again are logged and skipped.
    pub async fn refresh(&mut self, cancel: &CancellationToken) -> Result<TargetGroup, Error> {
        let lister = self.lister.as_ref();
        let region_id = self.options.region_id.as_str();
        let mut stats = RefreshStats::default();

        let instances = if self.options.tag_filters.is_empty() {
            let scanned = Pager::new(lister, region_id)
                .fetch(None, self.options.limit, cancel)
                .await?;
            stats.scanned = scanned.len();

            let rechecked = self.recheck(cancel).await?;
            stats.rechecked = rechecked.len();

            merge_by_id(scanned, rechecked)
        } else {
            let instances = TagWalker::new(
                lister,
                region_id,
                &self.options.tag_filters,
                self.options.limit,
            )
            .walk(cancel)
            .await?;
            stats.scanned = instances.len();

            if self.options.dedup_scan {
                merge_by_id(instances, vec![])
            } else {
                instances
            }
        };

        let Targets {
            targets,
            no_address,
        } = self.builder.build(&instances);
        stats.targets = targets.len();
        stats.no_address = no_address;

        debug!(
            message = "ecs refresh finished",
            region = region_id,
            scanned = stats.scanned,
            rechecked = stats.rechecked,
            targets = stats.targets,
            no_address = stats.no_address,
        );

        let group = TargetGroup {
            targets,
            labels: Default::default(),
            source: Some(region_id.to_string()),
        };

        self.cache = group.clone();
        self.stats = stats;

        Ok(group)
    }

    /// Looks up the instances of the last successful refresh by id.
    async fn recheck(&self, cancel: &CancellationToken) -> Result<Vec<Instance>, Error> {
        let ids = self.cache.values(INSTANCE_ID_LABEL).collect::<Vec<_>>();
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let pager = Pager::new(self.lister.as_ref(), &self.options.region_id);
        let mut instances = Vec::with_capacity(ids.len());
        for batch in ids.chunks(MAX_PAGE_SIZE) {
            let encoded = serde_json::to_string(batch)?;

            match pager.fetch(Some(encoded), 0, cancel).await {
                Ok(found) => instances = merge_append(instances, found),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    error!(
                        message = "recheck cached instances failed",
                        count = batch.len(),
                        %err
                    );
                }
            }
        }

        Ok(instances)
    }
}

#[async_trait::async_trait]
impl Discoverer for EcsDiscovery {
    type Error = Error;

    fn name(&self) -> &str {
        "ecs"
    }

    async fn refresh(&mut self, cancel: &CancellationToken) -> Result<Vec<TargetGroup>, Error> {
        EcsDiscovery::refresh(self, cancel).await.map(|group| vec![group])
    }
}
