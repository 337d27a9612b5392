use serde::Deserialize;

/// One ECS instance, as returned by `DescribeInstances`.
///
/// Only the fields discovery cares about are decoded, everything else in
/// the response is ignored.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Instance {
    pub instance_id: String,
    pub region_id: String,
    pub zone_id: String,
    pub status: String,
    pub instance_network_type: String,

    /// Classic network public address
    pub public_ip_address: IpAddressSet,
    /// Classic network private address
    pub inner_ip_address: IpAddressSet,
    /// Elastic IP bound to a VPC instance
    pub eip_address: EipAddress,
    pub vpc_attributes: VpcAttributes,

    pub tags: Tags,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IpAddressSet {
    pub ip_address: Vec<String>,
}

impl IpAddressSet {
    #[inline]
    pub fn first(&self) -> Option<&str> {
        self.ip_address
            .first()
            .map(String::as_str)
            .filter(|addr| !addr.is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EipAddress {
    pub ip_address: String,
    pub allocation_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VpcAttributes {
    pub private_ip_address: IpAddressSet,
    pub vpc_id: String,
    #[serde(rename = "VSwitchId")]
    pub vswitch_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Tags {
    pub tag: Vec<Tag>,
}

/// Both fields are optional on the wire, a tag missing either one is
/// ignored when building labels.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Tag {
    pub tag_key: Option<String>,
    pub tag_value: Option<String>,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Tag {
            tag_key: Some(key.into()),
            tag_value: Some(value.into()),
        }
    }
}
