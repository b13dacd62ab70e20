//! Configuration management

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Ingest Configuration Constants
// ============================================================================

/// Default root for scan scratch directories.
pub const DEFAULT_SCRATCH_DIR: &str = "/tmp/preserve-ingest";

/// Default staging bucket.
pub const DEFAULT_STAGING_BUCKET: &str = "preserve.staging";

/// Default staging provider.
pub const DEFAULT_STAGING_PROVIDER: &str = "aws";

/// Default staging region.
pub const DEFAULT_STAGING_REGION: &str = "us-east-1";

/// Default page size when listing file records.
pub const DEFAULT_BATCH_SIZE: u64 = 100;

/// Largest object copied with a single server-side copy call (5 GiB).
pub const DEFAULT_MAX_SERVER_SIDE_COPY_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Leading bytes handed to the format engine.
pub const DEFAULT_FORMAT_SNIFF_BYTES: usize = 4096;

/// Attempts to read a just-written file record while merging manifests.
pub const DEFAULT_MANIFEST_LOOKUP_ATTEMPTS: u32 = 3;

/// Delay between manifest lookup attempts in milliseconds.
pub const DEFAULT_MANIFEST_LOOKUP_DELAY_MS: u64 = 500;

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// One bucket a storage tier replicates to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreservationTarget {
    /// Storage tier this target belongs to, e.g. `Standard`.
    pub option_name: String,
    pub provider: String,
    pub bucket: String,
    pub region: String,
    /// Host used to build storage URLs.
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl PreservationTarget {
    fn new(
        option_name: &str,
        provider: &str,
        bucket: &str,
        region: &str,
        host: &str,
        storage_class: Option<&str>,
        description: &str,
    ) -> Self {
        Self {
            option_name: option_name.to_string(),
            provider: provider.to_string(),
            bucket: bucket.to_string(),
            region: region.to_string(),
            host: host.to_string(),
            storage_class: storage_class.map(str::to_string),
            description: description.to_string(),
        }
    }
}

/// Built-in targets, used when no targets file is configured.
pub fn default_targets() -> Vec<PreservationTarget> {
    vec![
        PreservationTarget::new(
            "Standard",
            "aws",
            "preserve.preservation.va",
            "us-east-1",
            "s3.amazonaws.com",
            Some("STANDARD"),
            "Primary copy, Virginia",
        ),
        PreservationTarget::new(
            "Standard",
            "aws",
            "preserve.preservation.or",
            "us-west-2",
            "s3.us-west-2.amazonaws.com",
            Some("GLACIER"),
            "Replica, Oregon",
        ),
        PreservationTarget::new(
            "Glacier-VA",
            "aws",
            "preserve.glacier.va",
            "us-east-1",
            "s3.amazonaws.com",
            Some("GLACIER"),
            "Glacier only, Virginia",
        ),
        PreservationTarget::new(
            "Glacier-OR",
            "aws",
            "preserve.glacier.or",
            "us-west-2",
            "s3.us-west-2.amazonaws.com",
            Some("GLACIER"),
            "Glacier only, Oregon",
        ),
        PreservationTarget::new(
            "Glacier-Deep-OR",
            "aws",
            "preserve.glacier-deep.or",
            "us-west-2",
            "s3.us-west-2.amazonaws.com",
            Some("DEEP_ARCHIVE"),
            "Deep archive, Oregon",
        ),
        PreservationTarget::new(
            "Wasabi-VA",
            "wasabi",
            "preserve.wasabi.va",
            "us-east-1",
            "s3.us-east-1.wasabisys.com",
            None,
            "Wasabi, Virginia",
        ),
        PreservationTarget::new(
            "Wasabi-OR",
            "wasabi",
            "preserve.wasabi.or",
            "us-west-1",
            "s3.us-west-1.wasabisys.com",
            None,
            "Wasabi, Oregon",
        ),
    ]
}

#[derive(Debug, Deserialize)]
struct TargetsFile {
    targets: Vec<PreservationTarget>,
}

/// Read preservation targets from a TOML file of `[[targets]]` tables.
pub fn load_targets(path: &Path) -> anyhow::Result<Vec<PreservationTarget>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read targets file {}", path.display()))?;
    let file: TargetsFile = toml::from_str(&text)
        .with_context(|| format!("Failed to parse targets file {}", path.display()))?;
    Ok(file.targets)
}

/// Where staged copies live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingConfig {
    pub provider: String,
    pub bucket: String,
    pub region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL URL. Without one the in-memory store is used.
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Catalog base URL. Without one the in-memory catalog is used.
    pub url: Option<String>,
    pub api_user: String,
    pub api_key: String,
}

/// Ingest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub scratch_dir: PathBuf,
    pub staging: StagingConfig,
    pub batch_size: u64,
    pub max_server_side_copy_size: u64,
    pub format_sniff_bytes: usize,
    pub manifest_lookup_attempts: u32,
    pub manifest_lookup_delay: Duration,
    pub targets: Vec<PreservationTarget>,
    pub database: DatabaseConfig,
    pub catalog: CatalogConfig,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl IngestConfig {
    /// Load configuration from environment and defaults
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let targets = match std::env::var("PRESERVE_TARGETS_FILE") {
            Ok(path) => load_targets(Path::new(&path))?,
            Err(_) => default_targets(),
        };

        let config = IngestConfig {
            scratch_dir: PathBuf::from(env_string("PRESERVE_SCRATCH_DIR", DEFAULT_SCRATCH_DIR)),
            staging: StagingConfig {
                provider: env_string("PRESERVE_STAGING_PROVIDER", DEFAULT_STAGING_PROVIDER),
                bucket: env_string("PRESERVE_STAGING_BUCKET", DEFAULT_STAGING_BUCKET),
                region: env_string("PRESERVE_STAGING_REGION", DEFAULT_STAGING_REGION),
            },
            batch_size: env_or("PRESERVE_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            max_server_side_copy_size: env_or(
                "PRESERVE_MAX_SERVER_SIDE_COPY_SIZE",
                DEFAULT_MAX_SERVER_SIDE_COPY_SIZE,
            ),
            format_sniff_bytes: env_or("PRESERVE_FORMAT_SNIFF_BYTES", DEFAULT_FORMAT_SNIFF_BYTES),
            manifest_lookup_attempts: DEFAULT_MANIFEST_LOOKUP_ATTEMPTS,
            manifest_lookup_delay: Duration::from_millis(DEFAULT_MANIFEST_LOOKUP_DELAY_MS),
            targets,
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").ok(),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
            },
            catalog: CatalogConfig {
                url: std::env::var("PRESERVE_CATALOG_URL").ok(),
                api_user: env_string("PRESERVE_CATALOG_API_USER", ""),
                api_key: env_string("PRESERVE_CATALOG_API_KEY", ""),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.staging.bucket.is_empty() {
            anyhow::bail!("Staging bucket cannot be empty");
        }

        if self.batch_size == 0 {
            anyhow::bail!("Batch size must be greater than 0");
        }

        if self.format_sniff_bytes == 0 {
            anyhow::bail!("Format sniff size must be greater than 0");
        }

        if self.manifest_lookup_attempts == 0 {
            anyhow::bail!("Manifest lookup attempts must be greater than 0");
        }

        if self.targets.is_empty() {
            anyhow::bail!("At least one preservation target must be configured");
        }

        for target in &self.targets {
            if target.bucket.is_empty() || target.provider.is_empty() {
                anyhow::bail!(
                    "Preservation target for '{}' needs a provider and bucket",
                    target.option_name
                );
            }
        }

        if self.catalog.url.is_some() && self.catalog.api_key.is_empty() {
            tracing::warn!("Catalog URL configured without an API key");
        }

        Ok(())
    }

    /// Targets for a storage tier, in configuration order.
    pub fn targets_for(&self, storage_option: &str) -> Vec<&PreservationTarget> {
        self.targets
            .iter()
            .filter(|t| t.option_name == storage_option)
            .collect()
    }

    /// True when copying from staging to `target` can stay on the provider.
    pub fn is_same_region_as_staging(&self, target: &PreservationTarget) -> bool {
        target.provider == self.staging.provider && target.region == self.staging.region
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            staging: StagingConfig {
                provider: DEFAULT_STAGING_PROVIDER.to_string(),
                bucket: DEFAULT_STAGING_BUCKET.to_string(),
                region: DEFAULT_STAGING_REGION.to_string(),
            },
            batch_size: DEFAULT_BATCH_SIZE,
            max_server_side_copy_size: DEFAULT_MAX_SERVER_SIDE_COPY_SIZE,
            format_sniff_bytes: DEFAULT_FORMAT_SNIFF_BYTES,
            manifest_lookup_attempts: DEFAULT_MANIFEST_LOOKUP_ATTEMPTS,
            manifest_lookup_delay: Duration::from_millis(DEFAULT_MANIFEST_LOOKUP_DELAY_MS),
            targets: default_targets(),
            database: DatabaseConfig {
                url: None,
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            },
            catalog: CatalogConfig {
                url: None,
                api_user: String::new(),
                api_key: String::new(),
            },
        }
    }
}
