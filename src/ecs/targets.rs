use discovery::{ADDRESS_LABEL, LabelSet, sanitize_label_name};

use super::model::Instance;

const ECS_LABEL_INSTANCE_ID: &str = "__meta_ecs_instance_id";
const ECS_LABEL_REGION_ID: &str = "__meta_ecs_region_id";
const ECS_LABEL_STATUS: &str = "__meta_ecs_status";
const ECS_LABEL_ZONE_ID: &str = "__meta_ecs_zone_id";
const ECS_LABEL_NETWORK_TYPE: &str = "__meta_ecs_network_type";
const ECS_LABEL_USER_ID: &str = "__meta_ecs_user_id";

// classic network
const ECS_LABEL_PUBLIC_IP: &str = "__meta_ecs_public_ip";
const ECS_LABEL_INNER_IP: &str = "__meta_ecs_inner_ip";
// vpc network
const ECS_LABEL_EIP: &str = "__meta_ecs_eip";
const ECS_LABEL_PRIVATE_IP: &str = "__meta_ecs_private_ip";

const ECS_LABEL_TAG_PREFIX: &str = "__meta_ecs_tag_";

/// The label carrying the instance id of every built target.
pub const INSTANCE_ID_LABEL: &str = ECS_LABEL_INSTANCE_ID;

/// Address families in evaluation order. Every family found is recorded
/// under its own label, and the scrape address is taken from the last one
/// found, so a VPC private IP always wins over the others.
const ADDRESS_PRIORITY: [(&str, fn(&Instance) -> Option<&str>); 4] = [
    (ECS_LABEL_PUBLIC_IP, |instance| instance.public_ip_address.first()),
    (ECS_LABEL_INNER_IP, |instance| instance.inner_ip_address.first()),
    (ECS_LABEL_EIP, |instance| {
        Some(instance.eip_address.ip_address.as_str()).filter(|addr| !addr.is_empty())
    }),
    (ECS_LABEL_PRIVATE_IP, |instance| {
        instance.vpc_attributes.private_ip_address.first()
    }),
];

/// Result of converting instances to targets.
#[derive(Debug, Default, PartialEq)]
pub struct Targets {
    pub targets: Vec<LabelSet>,
    /// Instances dropped because none of their address families has a value
    pub no_address: usize,
}

/// Converts instances to label sets.
pub struct TargetBuilder {
    port: u16,
    user_id: Option<String>,
}

impl TargetBuilder {
    pub fn new(port: u16, user_id: Option<String>) -> Self {
        TargetBuilder {
            port,
            user_id: user_id.filter(|id| !id.is_empty()),
        }
    }

    pub fn build(&self, instances: &[Instance]) -> Targets {
        let mut result = Targets::default();

        for instance in instances {
            match self.build_one(instance) {
                Some(labels) => result.targets.push(labels),
                None => {
                    debug!(
                        message = "instance has no address",
                        instance_id = %instance.instance_id,
                        status = %instance.status,
                        network_type = %instance.instance_network_type
                    );

                    result.no_address += 1;
                }
            }
        }

        result
    }

    fn build_one(&self, instance: &Instance) -> Option<LabelSet> {
        let mut labels = LabelSet::from([
            (
                ECS_LABEL_INSTANCE_ID.to_string(),
                instance.instance_id.clone(),
            ),
            (ECS_LABEL_REGION_ID.to_string(), instance.region_id.clone()),
            (ECS_LABEL_STATUS.to_string(), instance.status.clone()),
            (ECS_LABEL_ZONE_ID.to_string(), instance.zone_id.clone()),
            (
                ECS_LABEL_NETWORK_TYPE.to_string(),
                instance.instance_network_type.clone(),
            ),
        ]);

        if let Some(user_id) = &self.user_id {
            labels.insert(ECS_LABEL_USER_ID.to_string(), user_id.clone());
        }

        let mut address = None;
        for (label, extract) in ADDRESS_PRIORITY {
            if let Some(ip) = extract(instance) {
                labels.insert(label.to_string(), ip.to_string());
                address = Some(ip);
            }
        }

        labels.insert(
            ADDRESS_LABEL.to_string(),
            join_host_port(address?, self.port),
        );

        // the API returns tags in a stable order, so when two keys sanitize
        // to the same name the later tag wins.
        for tag in &instance.tags.tag {
            let (Some(key), Some(value)) = (&tag.tag_key, &tag.tag_value) else {
                continue;
            };

            labels.insert(
                format!("{ECS_LABEL_TAG_PREFIX}{}", sanitize_label_name(key)),
                value.clone(),
            );
        }

        Some(labels)
    }
}

/// Combines host and port into `host:port`, IPv6 hosts are bracketed.
fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
