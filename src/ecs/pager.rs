use tokio_util::sync::CancellationToken;

use super::MAX_PAGE_SIZE;
use super::error::{Error, cancellable};
use super::lister::{DescribeInstances, InstanceLister};
use super::model::Instance;

/// Page size for a configured limit, `limit <= 0` means unbounded.
#[inline]
pub fn page_size(limit: i64) -> usize {
    if limit <= 0 {
        MAX_PAGE_SIZE
    } else {
        (limit as usize).min(MAX_PAGE_SIZE)
    }
}

/// Drives page by page retrieval of `DescribeInstances`.
pub struct Pager<'a> {
    lister: &'a dyn InstanceLister,
    region_id: &'a str,
}

impl<'a> Pager<'a> {
    pub fn new(lister: &'a dyn InstanceLister, region_id: &'a str) -> Self {
        Pager { lister, region_id }
    }

    /// Fetches instances until the effective limit is reached or the
    /// provider runs out of records.
    ///
    /// The effective limit is `limit` when positive, the `TotalCount`
    /// reported by the first page otherwise. Pages are fetched sequentially
    /// and the last one is truncated so no more than the effective limit is
    /// returned.
    pub async fn fetch(
        &self,
        instance_ids: Option<String>,
        limit: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Instance>, Error> {
        let page_size = page_size(limit);
        let mut req = DescribeInstances {
            region_id: self.region_id.to_string(),
            page_number: 1,
            page_size,
            instance_ids,
        };

        let first = cancellable(
            cancel,
            "DescribeInstances",
            self.lister.describe_instances(&req),
        )
        .await?;
        let effective = if limit > 0 {
            limit as usize
        } else {
            first.total_count
        };

        let mut instances = first.instances;
        instances.truncate(effective);

        while instances.len() < effective {
            req.page_number += 1;

            debug!(
                message = "fetch next instance page",
                page = req.page_number,
                fetched = instances.len(),
                limit = effective
            );

            let page = cancellable(
                cancel,
                "DescribeInstances",
                self.lister.describe_instances(&req),
            )
            .await?;
            if page.instances.is_empty() {
                // the provider reports more than it actually returns,
                // e.g. instances released while paging.
                debug!(
                    message = "empty instance page, stop paging",
                    page = req.page_number,
                    fetched = instances.len(),
                    limit = effective
                );
                break;
            }

            let remaining = effective - instances.len();
            instances.extend(page.instances.into_iter().take(remaining));
        }

        Ok(instances)
    }
}
