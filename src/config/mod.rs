mod env;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aliyun::credentials::CredentialConfig;
use crate::ecs::{Options, TagFilter};
pub use env::interpolate;

/// Prefix of the environment variables overriding configured values.
const ENV_PREFIX: &str = "PROMETHEUS_DS_ECS_";

/// STS accepts session durations within this range, in seconds.
const SESSION_EXPIRATION_RANGE: std::ops::RangeInclusive<u64> = 900..=43200;

const fn default_port() -> u16 {
    80
}

const fn default_refresh_interval() -> Duration {
    Duration::from_secs(60)
}

/// Writes target groups to a file in the `file_sd` format.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileOutputConfig {
    pub path: PathBuf,
}

/// Serves target groups in the `http_sd` format.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HttpOutputConfig {
    pub address: SocketAddr,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutputsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileOutputConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpOutputConfig>,
}

/// Discovers ECS instances of one region.
///
/// ```yaml
/// region_id: cn-hangzhou
/// port: 9100
/// refresh_interval: 1m
/// tag_filters:
///   - key: env
///     values: [prod, staging]
/// access_key: ${ECS_ACCESS_KEY}
/// access_key_secret: ${ECS_ACCESS_KEY_SECRET}
/// outputs:
///   file:
///     path: /etc/prometheus/ecs.json
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The region to discover, `PROMETHEUS_DS_ECS_REGION_ID` overrides it.
    #[serde(default)]
    pub region_id: String,

    /// The port of every scrape address.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Attached to every target as `__meta_ecs_user_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default = "default_refresh_interval", with = "humanize::duration::serde")]
    pub refresh_interval: Duration,

    /// Bounds every refresh, a refresh which takes longer is abandoned and
    /// the previous targets are kept.
    #[serde(default, with = "humanize::duration::serde_option")]
    pub refresh_timeout: Option<Duration>,

    /// The most instances one refresh returns, `0` means unbounded.
    #[serde(default)]
    pub limit: i64,

    /// Only instances carrying these tags are discovered. Filters are
    /// conjunctive, an instance matches a filter with any of its values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag_filters: Vec<TagFilter>,

    /// Drop duplicated instances returned by the tag index.
    #[serde(default)]
    pub dedup_scan: bool,

    /// ECS API endpoint, `https://ecs.<region_id>.aliyuncs.com` by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    // Authentication, the first complete set of the following wins
    //
    // 1. access key pair, role_arn and role_session_name (policy is optional)
    // 2. access key pair and sts_token
    // 3. access key pair
    // 4. role_name
    // 5. the RAM role attached to the instance this runs on
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub access_key_secret: String,
    #[serde(default)]
    pub sts_token: String,
    #[serde(default)]
    pub role_arn: String,
    #[serde(default)]
    pub role_session_name: String,
    #[serde(default)]
    pub policy: String,
    #[serde(default)]
    pub role_name: String,
    /// Lifetime of assumed role sessions in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_expiration: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sts_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_endpoint: Option<String>,

    // RSA key pair credentials are rejected by `validate`, they are only
    // accepted here to report that instead of an unknown field.
    #[serde(default, skip_serializing)]
    public_key_id: String,
    #[serde(default, skip_serializing)]
    private_key: String,

    #[serde(default)]
    pub outputs: OutputsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            region_id: String::new(),
            port: default_port(),
            user_id: None,
            refresh_interval: default_refresh_interval(),
            refresh_timeout: None,
            limit: 0,
            tag_filters: vec![],
            dedup_scan: false,
            endpoint: None,
            access_key: String::new(),
            access_key_secret: String::new(),
            sts_token: String::new(),
            role_arn: String::new(),
            role_session_name: String::new(),
            policy: String::new(),
            role_name: String::new(),
            session_expiration: None,
            sts_endpoint: None,
            metadata_endpoint: None,
            public_key_id: String::new(),
            private_key: String::new(),
            outputs: OutputsConfig::default(),
        }
    }
}

impl Config {
    /// Reads, interpolates, overrides with environment variables and
    /// validates the config file at `path`.
    pub fn load(path: &Path) -> Result<Config, Vec<String>> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| vec![format!("read {path:?} failed, {err}")])?;

        Config::parse(&content, |name| std::env::var(name).ok())
    }

    /// Like [`Config::load`] but reads environment variables from `lookup`.
    pub fn parse<F>(content: &str, lookup: F) -> Result<Config, Vec<String>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let content = interpolate(content, &lookup)?;
        let mut config = serde_yaml::from_str::<Config>(&content)
            .map_err(|err| vec![format!("deserialize config failed, {err}")])?;

        config.apply_env(&lookup);
        config.validate()?;

        Ok(config)
    }

    /// Non-empty `PROMETHEUS_DS_ECS_*` variables replace configured values.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}")).filter(|v| !v.is_empty());

        for (suffix, field) in [
            ("REGION_ID", &mut self.region_id),
            ("AK", &mut self.access_key),
            ("SK", &mut self.access_key_secret),
            ("STS_TOKEN", &mut self.sts_token),
            ("ROLE_ARN", &mut self.role_arn),
            ("ROLE_SESSION_NAME", &mut self.role_session_name),
            ("POLICY", &mut self.policy),
            ("ROLE_NAME", &mut self.role_name),
        ] {
            if let Some(value) = var(suffix) {
                *field = value;
            }
        }

        if let Some(value) = var("SESSION_EXPIRATION") {
            match value.parse::<u64>() {
                Ok(secs) => self.session_expiration = Some(secs),
                Err(err) => {
                    warn!(
                        message = "ignore invalid session expiration from environment",
                        %value,
                        %err
                    );
                }
            }
        }
    }

    /// Collects every problem instead of stopping at the first one.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errs = Vec::new();

        if self.region_id.is_empty() {
            errs.push(format!(
                "region_id is required, set it in the config or with {ENV_PREFIX}REGION_ID"
            ));
        }

        if !self.public_key_id.is_empty() || !self.private_key.is_empty() {
            errs.push(
                "RSA key pair credentials are not supported, remove public_key_id and private_key"
                    .to_string(),
            );
        }

        if self.port == 0 {
            errs.push("port cannot be 0".to_string());
        }

        if self.refresh_interval.is_zero() {
            errs.push("refresh_interval must be positive".to_string());
        }

        if let Some(timeout) = self.refresh_timeout {
            if timeout.is_zero() {
                errs.push("refresh_timeout must be positive".to_string());
            }
        }

        for (index, filter) in self.tag_filters.iter().enumerate() {
            if filter.key.is_empty() {
                errs.push(format!("tag_filters[{index}]: key cannot be empty"));
            }
            if filter.values.is_empty() {
                errs.push(format!(
                    "tag_filters[{index}]: values of {:?} cannot be empty",
                    filter.key
                ));
            }
        }

        if let Some(secs) = self.session_expiration {
            if !SESSION_EXPIRATION_RANGE.contains(&secs) {
                errs.push(format!(
                    "session_expiration must be within {}..={} seconds, got {secs}",
                    SESSION_EXPIRATION_RANGE.start(),
                    SESSION_EXPIRATION_RANGE.end()
                ));
            }
        }

        if let Some(file) = &self.outputs.file {
            if file.path.as_os_str().is_empty() {
                errs.push("outputs.file.path cannot be empty".to_string());
            }
        }

        if errs.is_empty() { Ok(()) } else { Err(errs) }
    }

    pub fn options(&self) -> Options {
        Options {
            region_id: self.region_id.clone(),
            tag_filters: self.tag_filters.clone(),
            limit: self.limit,
            port: self.port,
            user_id: self.user_id.clone().filter(|id| !id.is_empty()),
            dedup_scan: self.dedup_scan,
        }
    }

    pub fn credentials(&self) -> CredentialConfig {
        CredentialConfig {
            access_key: self.access_key.clone(),
            access_key_secret: self.access_key_secret.clone(),
            sts_token: self.sts_token.clone(),
            role_arn: self.role_arn.clone(),
            role_session_name: self.role_session_name.clone(),
            policy: self.policy.clone(),
            role_name: self.role_name.clone(),
            session_expiration: self.session_expiration.map(Duration::from_secs),
        }
    }
}
