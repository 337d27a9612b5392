#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use ecs_sd::ecs::{
    DescribeInstances, Instance, InstanceLister, InstancePage, IpAddressSet, ListTagResources,
    TagResourcePage, VpcAttributes,
};

/// A running VPC instance addressed by `private_ip`.
pub fn vpc_instance(id: &str, private_ip: &str) -> Instance {
    Instance {
        instance_id: id.to_string(),
        region_id: "cn-hangzhou".to_string(),
        zone_id: "cn-hangzhou-h".to_string(),
        status: "Running".to_string(),
        instance_network_type: "vpc".to_string(),
        vpc_attributes: VpcAttributes {
            private_ip_address: IpAddressSet {
                ip_address: vec![private_ip.to_string()],
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

#[derive(Default)]
struct State {
    instances: Vec<Instance>,
    hidden: HashSet<String>,
    total_count: Option<usize>,
    tag_pages: VecDeque<TagResourcePage>,
    describe_calls: Vec<DescribeInstances>,
    tag_calls: usize,
}

/// Serves a fixed instance inventory.
#[derive(Default)]
pub struct Inventory {
    state: Mutex<State>,
}

impl Inventory {
    pub fn new(instances: impl IntoIterator<Item = Instance>) -> Self {
        let inventory = Inventory::default();
        inventory.replace(instances);
        inventory
    }

    /// Replaces the inventory, hidden instances become visible again.
    pub fn replace(&self, instances: impl IntoIterator<Item = Instance>) {
        let mut state = self.state.lock().unwrap();
        state.instances = instances.into_iter().collect();
        state.hidden.clear();
    }

    /// Plain scans skip `id`, id filtered lookups still find it.
    pub fn hide_from_scan(&self, id: &str) {
        self.state.lock().unwrap().hidden.insert(id.to_string());
    }

    /// Reports `total` as `TotalCount` regardless of the inventory.
    pub fn total_count(&self, total: usize) {
        self.state.lock().unwrap().total_count = Some(total);
    }

    pub fn push_tag_page(&self, ids: &[&str], next_token: Option<&str>) {
        self.state.lock().unwrap().tag_pages.push_back(TagResourcePage {
            resource_ids: ids.iter().map(ToString::to_string).collect(),
            next_token: next_token.map(ToString::to_string),
        });
    }

    pub fn describe_calls(&self) -> Vec<DescribeInstances> {
        self.state.lock().unwrap().describe_calls.clone()
    }

    pub fn tag_calls(&self) -> usize {
        self.state.lock().unwrap().tag_calls
    }

    pub fn clear_calls(&self) {
        let mut state = self.state.lock().unwrap();
        state.describe_calls.clear();
        state.tag_calls = 0;
    }
}

#[async_trait::async_trait]
impl InstanceLister for Inventory {
    async fn describe_instances(&self, req: &DescribeInstances) -> ecs_sd::Result<InstancePage> {
        let mut state = self.state.lock().unwrap();
        state.describe_calls.push(req.clone());

        let matched = match &req.instance_ids {
            Some(ids) => {
                let ids: Vec<String> = serde_json::from_str(ids)?;
                state
                    .instances
                    .iter()
                    .filter(|instance| ids.contains(&instance.instance_id))
                    .cloned()
                    .collect::<Vec<_>>()
            }
            None => state
                .instances
                .iter()
                .filter(|instance| !state.hidden.contains(&instance.instance_id))
                .cloned()
                .collect::<Vec<_>>(),
        };

        let total_count = match (&req.instance_ids, state.total_count) {
            (None, Some(total)) => total,
            _ => matched.len(),
        };
        let instances = matched
            .into_iter()
            .skip((req.page_number - 1) * req.page_size)
            .take(req.page_size)
            .collect();

        Ok(InstancePage {
            instances,
            total_count,
        })
    }

    async fn list_tag_resources(&self, _req: &ListTagResources) -> ecs_sd::Result<TagResourcePage> {
        let mut state = self.state.lock().unwrap();
        state.tag_calls += 1;

        Ok(state.tag_pages.pop_front().unwrap_or_default())
    }
}
