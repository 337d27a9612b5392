//! Publishes discovered targets to scrapers.
//!
//! Both outputs use the Prometheus static config layout, a list of
//! `{"targets": [...], "labels": {...}}` objects, which `file_sd` reads
//! from disk and `http_sd` fetches over HTTP.

mod file;
mod server;

use discovery::{ADDRESS_LABEL, LabelSet, TargetGroup};
use serde::{Deserialize, Serialize};

pub use file::{FileOutput, run as run_file};
pub use server::serve;

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct StaticConfig {
    pub targets: Vec<String>,
    pub labels: LabelSet,
}

/// Converts every target into its own static config, the address goes to
/// `targets` and the remaining labels, group labels included, to `labels`.
///
/// Target labels win over group labels, targets without an address are
/// skipped.
pub fn static_configs(groups: &[TargetGroup]) -> Vec<StaticConfig> {
    groups
        .iter()
        .flat_map(|group| {
            group.targets.iter().filter_map(|target| {
                let address = target.get(ADDRESS_LABEL)?;

                let mut labels = group.labels.clone();
                labels.extend(
                    target
                        .iter()
                        .filter(|(name, _)| name.as_str() != ADDRESS_LABEL)
                        .map(|(name, value)| (name.clone(), value.clone())),
                );

                Some(StaticConfig {
                    targets: vec![address.clone()],
                    labels,
                })
            })
        })
        .collect()
}

/// Encodes `groups` as pretty printed static configs.
pub fn encode(groups: &[TargetGroup]) -> Result<Vec<u8>, serde_json::Error> {
    let mut data = serde_json::to_vec_pretty(&static_configs(groups))?;
    data.push(b'\n');

    Ok(data)
}
