use tokio_util::sync::CancellationToken;

use super::error::{Error, cancellable};
use super::lister::{
    Cursor, InstanceLister, ListTagResources, RESOURCE_TYPE_INSTANCE, TagFilter,
};
use super::merge::merge_append;
use super::model::Instance;
use super::pager::Pager;
use super::MAX_PAGE_SIZE;

/// Resolves tag filters to instances.
///
/// The tag index is walked page by page with its continuation cursor, every
/// page of instance ids is resolved to full instance records through an id
/// filtered `DescribeInstances`.
pub struct TagWalker<'a> {
    lister: &'a dyn InstanceLister,
    region_id: &'a str,
    filters: &'a [TagFilter],
    limit: i64,
}

impl<'a> TagWalker<'a> {
    pub fn new(
        lister: &'a dyn InstanceLister,
        region_id: &'a str,
        filters: &'a [TagFilter],
        limit: i64,
    ) -> Self {
        TagWalker {
            lister,
            region_id,
            filters,
            limit,
        }
    }

    /// Walks the whole index. `limit` applies to the walk as a whole, once
    /// it is reached no further calls are issued.
    pub async fn walk(&self, cancel: &CancellationToken) -> Result<Vec<Instance>, Error> {
        if let Some(filter) = self.filters.iter().find(|filter| filter.values.is_empty()) {
            return Err(Error::Config(format!(
                "values of tag filter {:?} cannot be empty",
                filter.key
            )));
        }

        let pager = Pager::new(self.lister, self.region_id);
        let mut cursor = Cursor::Initial;
        let mut instances = Vec::new();

        'walk: loop {
            let req = ListTagResources {
                region_id: self.region_id.to_string(),
                resource_type: RESOURCE_TYPE_INSTANCE,
                tag_filters: self.filters.to_vec(),
                next_token: cursor.token().map(ToString::to_string),
            };

            let page = cancellable(
                cancel,
                "ListTagResources",
                self.lister.list_tag_resources(&req),
            )
            .await?;
            if page.resource_ids.is_empty() {
                debug!(message = "tag index returned no resources", cursor = ?cursor);
                break;
            }

            debug!(
                message = "resolve tagged instances",
                count = page.resource_ids.len(),
                fetched = instances.len()
            );

            for batch in page.resource_ids.chunks(MAX_PAGE_SIZE) {
                let remaining = if self.limit > 0 {
                    let remaining = self.limit - instances.len() as i64;
                    if remaining <= 0 {
                        break 'walk;
                    }

                    // no need to page past the ids of this batch
                    remaining.min(batch.len() as i64)
                } else {
                    0
                };

                let ids = serde_json::to_string(batch)?;
                let found = pager.fetch(Some(ids), remaining, cancel).await?;
                instances = merge_append(instances, found);
            }

            if self.limit > 0 && instances.len() as i64 >= self.limit {
                break;
            }

            let next = Cursor::from_token(page.next_token.as_deref());
            match &next {
                Cursor::Exhausted => break,
                Cursor::Active(token) if cursor.token() == Some(token.as_str()) => {
                    warn!(
                        message = "tag index returned an unchanged cursor, stop walking",
                        %token
                    );
                    break;
                }
                _ => cursor = next,
            }
        }

        Ok(instances)
    }
}
