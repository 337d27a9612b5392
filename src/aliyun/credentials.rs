use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{Request, StatusCode};
use http_body_util::Full;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;

use super::{ApiError, invoke};
use crate::http::{HttpClient, HttpError};

pub const DEFAULT_STS_ENDPOINT: &str = "https://sts.aliyuncs.com";
pub const DEFAULT_METADATA_ENDPOINT: &str = "http://100.100.100.200";

const STS_VERSION: &str = "2015-04-01";
const SECURITY_CREDENTIALS_PATH: &str = "/latest/meta-data/ram/security-credentials/";

/// The default lifetime of assumed role credentials.
pub const DEFAULT_SESSION_EXPIRATION: Duration = Duration::from_secs(3600);

/// Temporary credentials are renewed this many seconds before they expire.
const EXPIRY_DELTA_SECS: i64 = 180;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("assume role {role_arn} failed, {source}")]
    AssumeRole {
        role_arn: String,
        source: Box<ApiError>,
    },

    #[error("request metadata service failed, {0}")]
    Metadata(#[from] HttpError),

    #[error("metadata service responds {status} for {path}")]
    MetadataStatus { status: StatusCode, path: String },

    #[error("credentials of RAM role {role_name} are not ready, code {code:?}")]
    NotReady { role_name: String, code: String },

    #[error("decode credentials failed, {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid credential expiration {0:?}")]
    Expiration(String),

    #[error("cannot init client, need auth config, {0}")]
    NeedAuthConfig(String),
}

/// A key pair, with a security token when temporary.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub security_token: Option<String>,
    /// `None` for long term access keys
    pub expiration: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"**REDACTED**")
            .field(
                "security_token",
                &self.security_token.as_ref().map(|_| "**REDACTED**"),
            )
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, access_key_secret: impl Into<String>) -> Self {
        Credentials {
            access_key_id: access_key_id.into(),
            access_key_secret: access_key_secret.into(),
            security_token: None,
            expiration: None,
        }
    }

    fn expires_soon(&self, now: DateTime<Utc>) -> bool {
        match self.expiration {
            Some(expiration) => expiration - now <= chrono::Duration::seconds(EXPIRY_DELTA_SECS),
            None => false,
        }
    }
}

/// Authentication settings, empty strings count as absent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CredentialConfig {
    pub access_key: String,
    pub access_key_secret: String,
    pub sts_token: String,
    pub role_arn: String,
    pub role_session_name: String,
    pub policy: String,
    pub role_name: String,
    pub session_expiration: Option<Duration>,
}

/// How credentials are obtained, chosen from the configured fields.
#[derive(Clone, Debug, PartialEq)]
pub enum Strategy {
    AssumeRole {
        credentials: Credentials,
        role_arn: String,
        role_session_name: String,
        policy: Option<String>,
        duration: Duration,
    },
    /// Credentials used as configured, long term or not.
    Static(Credentials),
    /// Credentials of the RAM role attached to the instance this process
    /// runs on, the role is looked up when not named.
    RamRole(Option<String>),
}

impl Strategy {
    /// The first strategy whose fields are all configured wins.
    pub fn resolve(config: &CredentialConfig) -> Strategy {
        let has_key_pair = !config.access_key.is_empty() && !config.access_key_secret.is_empty();
        let key_pair = || Credentials::new(&config.access_key, &config.access_key_secret);

        if has_key_pair && !config.role_arn.is_empty() && !config.role_session_name.is_empty() {
            return Strategy::AssumeRole {
                credentials: key_pair(),
                role_arn: config.role_arn.clone(),
                role_session_name: config.role_session_name.clone(),
                policy: Some(config.policy.clone()).filter(|policy| !policy.is_empty()),
                duration: config
                    .session_expiration
                    .unwrap_or(DEFAULT_SESSION_EXPIRATION),
            };
        }

        if has_key_pair && !config.sts_token.is_empty() {
            return Strategy::Static(Credentials {
                security_token: Some(config.sts_token.clone()),
                ..key_pair()
            });
        }

        if has_key_pair {
            return Strategy::Static(key_pair());
        }

        if !config.role_name.is_empty() {
            return Strategy::RamRole(Some(config.role_name.clone()));
        }

        Strategy::RamRole(None)
    }

    fn name(&self) -> &'static str {
        match self {
            Strategy::AssumeRole { .. } => "assume_role",
            Strategy::Static(credentials) if credentials.security_token.is_some() => "sts_token",
            Strategy::Static(_) => "access_key",
            Strategy::RamRole(_) => "ram_role",
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleResponse {
    credentials: TemporaryCredentials,
}

/// Shared by STS and the metadata service.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TemporaryCredentials {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    access_key_id: String,
    #[serde(default)]
    access_key_secret: String,
    #[serde(default)]
    security_token: String,
    #[serde(default)]
    expiration: String,
}

impl TryFrom<TemporaryCredentials> for Credentials {
    type Error = CredentialError;

    fn try_from(temporary: TemporaryCredentials) -> Result<Self, Self::Error> {
        let expiration = DateTime::parse_from_rfc3339(&temporary.expiration)
            .map_err(|_err| CredentialError::Expiration(temporary.expiration.clone()))?
            .with_timezone(&Utc);

        Ok(Credentials {
            access_key_id: temporary.access_key_id,
            access_key_secret: temporary.access_key_secret,
            security_token: Some(temporary.security_token),
            expiration: Some(expiration),
        })
    }
}

/// Hands out valid credentials, temporary ones are cached until shortly
/// before they expire.
pub struct CredentialProvider {
    strategy: Strategy,
    http: HttpClient,
    sts_endpoint: String,
    metadata_endpoint: String,

    cached: Mutex<Option<Credentials>>,
}

impl CredentialProvider {
    pub fn new(strategy: Strategy, http: HttpClient) -> Self {
        info!(message = "credential strategy resolved", strategy = strategy.name());

        CredentialProvider {
            strategy,
            http,
            sts_endpoint: DEFAULT_STS_ENDPOINT.to_string(),
            metadata_endpoint: DEFAULT_METADATA_ENDPOINT.to_string(),
            cached: Mutex::new(None),
        }
    }

    pub fn with_sts_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.sts_endpoint = endpoint.into();
        self
    }

    pub fn with_metadata_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.metadata_endpoint = endpoint.into();
        self
    }

    pub async fn credentials(&self) -> Result<Credentials, CredentialError> {
        if let Strategy::Static(credentials) = &self.strategy {
            return Ok(credentials.clone());
        }

        // held while fetching, concurrent callers wait for the same renewal
        let mut cached = self.cached.lock().await;
        if let Some(credentials) = cached.as_ref() {
            if !credentials.expires_soon(Utc::now()) {
                return Ok(credentials.clone());
            }
        }

        let fresh = match &self.strategy {
            Strategy::AssumeRole {
                credentials,
                role_arn,
                role_session_name,
                policy,
                duration,
            } => {
                self.assume_role(credentials, role_arn, role_session_name, policy, *duration)
                    .await?
            }
            Strategy::RamRole(role_name) => {
                let role_name = match role_name {
                    Some(role_name) => role_name.clone(),
                    None => self.attached_role().await?,
                };

                self.role_credentials(&role_name).await?
            }
            Strategy::Static(credentials) => credentials.clone(),
        };

        debug!(
            message = "temporary credentials renewed",
            access_key_id = %fresh.access_key_id,
            expiration = ?fresh.expiration
        );

        *cached = Some(fresh.clone());

        Ok(fresh)
    }

    async fn assume_role(
        &self,
        credentials: &Credentials,
        role_arn: &str,
        role_session_name: &str,
        policy: &Option<String>,
        duration: Duration,
    ) -> Result<Credentials, CredentialError> {
        let mut params = BTreeMap::from([
            ("RoleArn".to_string(), role_arn.to_string()),
            ("RoleSessionName".to_string(), role_session_name.to_string()),
            (
                "DurationSeconds".to_string(),
                duration.as_secs().to_string(),
            ),
        ]);
        if let Some(policy) = policy {
            params.insert("Policy".to_string(), policy.clone());
        }

        let resp: AssumeRoleResponse = invoke(
            &self.http,
            &self.sts_endpoint,
            STS_VERSION,
            "AssumeRole",
            params,
            credentials,
        )
        .await
        .map_err(|err| CredentialError::AssumeRole {
            role_arn: role_arn.to_string(),
            source: Box::new(err),
        })?;

        resp.credentials.try_into()
    }

    async fn metadata(&self, path: &str) -> Result<Bytes, CredentialError> {
        let uri = format!("{}{}", self.metadata_endpoint.trim_end_matches('/'), path);
        let req = Request::get(uri)
            .body(Full::default())
            .map_err(HttpError::from)?;

        let resp = self.http.send(req).await?;
        if resp.status() != StatusCode::OK {
            return Err(CredentialError::MetadataStatus {
                status: resp.status(),
                path: path.to_string(),
            });
        }

        Ok(resp.into_body())
    }

    /// The name of the RAM role attached to this instance.
    async fn attached_role(&self) -> Result<String, CredentialError> {
        let body = self
            .metadata(SECURITY_CREDENTIALS_PATH)
            .await
            .map_err(|err| {
                CredentialError::NeedAuthConfig(format!("lookup attached RAM role failed, {err}"))
            })?;

        String::from_utf8_lossy(&body)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| {
                CredentialError::NeedAuthConfig("no RAM role attached to this instance".to_string())
            })
    }

    async fn role_credentials(&self, role_name: &str) -> Result<Credentials, CredentialError> {
        let body = self
            .metadata(&format!("{SECURITY_CREDENTIALS_PATH}{role_name}"))
            .await?;

        let temporary = serde_json::from_slice::<TemporaryCredentials>(&body)?;
        match temporary.code.as_deref() {
            None | Some("Success") => temporary.try_into(),
            Some(code) => Err(CredentialError::NotReady {
                role_name: role_name.to_string(),
                code: code.to_string(),
            }),
        }
    }
}
