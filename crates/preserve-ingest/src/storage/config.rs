use serde::{Deserialize, Serialize};
use std::env;

/// Connection settings for one S3-compatible provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct S3ProviderConfig {
    pub provider: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

impl std::fmt::Debug for S3ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ProviderConfig")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("path_style", &self.path_style)
            .finish_non_exhaustive()
    }
}

impl S3ProviderConfig {
    /// Read `{PREFIX}_S3_ENDPOINT`, `{PREFIX}_S3_REGION`,
    /// `{PREFIX}_S3_ACCESS_KEY`, `{PREFIX}_S3_SECRET_KEY` and
    /// `{PREFIX}_S3_PATH_STYLE`, where PREFIX is the upper-cased provider.
    ///
    /// Returns `None` when no access key is configured for the provider.
    pub fn from_env(provider: &str, default_region: &str) -> Option<Self> {
        let prefix = provider.to_uppercase();
        let var = |name: &str| env::var(format!("{}_S3_{}", prefix, name)).ok();

        Some(Self {
            provider: provider.to_string(),
            endpoint: var("ENDPOINT"),
            region: var("REGION").unwrap_or_else(|| default_region.to_string()),
            access_key: var("ACCESS_KEY")?,
            secret_key: var("SECRET_KEY").unwrap_or_default(),
            path_style: var("PATH_STYLE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        })
    }

    /// Same credentials against another region of the provider.
    pub fn in_region(&self, region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            ..self.clone()
        }
    }
}
