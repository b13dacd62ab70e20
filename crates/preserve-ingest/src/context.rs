//! Collaborators shared by every stage of one ingest

use crate::catalog::{Catalog, HttpCatalog, MemoryCatalog};
use crate::config::IngestConfig;
use crate::format::{FormatEngine, SignatureEngine};
use crate::storage::{ObjectStore, S3ObjectStore, S3ProviderConfig, StorageClients};
use crate::store::{MemoryMetadataStore, MetadataStore, PgMetadataStore};
use anyhow::Context;
use preserve_common::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

const AWS_PROVIDER: &str = "aws";

/// Stages receive their collaborators through this struct rather than
/// reaching for globals.
#[derive(Clone)]
pub struct IngestContext {
    pub config: Arc<IngestConfig>,
    pub store: Arc<dyn MetadataStore>,
    pub storage: StorageClients,
    pub catalog: Arc<dyn Catalog>,
    pub format_engine: Arc<dyn FormatEngine>,
}

impl IngestContext {
    pub fn new(
        config: IngestConfig,
        store: Arc<dyn MetadataStore>,
        storage: StorageClients,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            storage,
            catalog,
            format_engine: Arc::new(SignatureEngine::new()),
        }
    }

    pub fn with_format_engine(mut self, engine: Arc<dyn FormatEngine>) -> Self {
        self.format_engine = engine;
        self
    }

    /// Client for the staging bucket.
    pub fn staging_client(&self) -> Result<Arc<dyn ObjectStore>> {
        let staging = &self.config.staging;
        self.storage.client(&staging.provider, &staging.region)
    }

    /// Receiving buckets live with the staging provider.
    pub fn receiving_client(&self) -> Result<Arc<dyn ObjectStore>> {
        self.staging_client()
    }

    /// Build production collaborators from configuration.
    ///
    /// Without `DATABASE_URL` the metadata store is in memory, and without a
    /// catalog URL so is the catalog. Both fallbacks are logged.
    pub async fn from_config(config: IngestConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn MetadataStore> = match &config.database.url {
            Some(url) => Arc::new(
                PgMetadataStore::connect(url, config.database.max_connections)
                    .await
                    .context("Failed to connect to metadata store")?,
            ),
            None => {
                warn!("DATABASE_URL not set, using in-memory metadata store");
                Arc::new(MemoryMetadataStore::new())
            },
        };

        let catalog: Arc<dyn Catalog> = match &config.catalog.url {
            Some(url) => Arc::new(
                HttpCatalog::new(url, &config.catalog.api_user, &config.catalog.api_key)
                    .context("Failed to create catalog client")?,
            ),
            None => {
                warn!("PRESERVE_CATALOG_URL not set, using in-memory catalog");
                Arc::new(MemoryCatalog::new())
            },
        };

        let storage = storage_clients(&config).await?;
        Ok(Self::new(config, store, storage, catalog))
    }
}

/// One S3 client per provider and region that staging or any target uses.
/// AWS without `AWS_S3_ACCESS_KEY` falls back to the SDK credential chain.
async fn storage_clients(config: &IngestConfig) -> anyhow::Result<StorageClients> {
    let mut placements = BTreeSet::new();
    placements.insert((config.staging.provider.clone(), config.staging.region.clone()));
    for target in &config.targets {
        placements.insert((target.provider.clone(), target.region.clone()));
    }

    let mut clients = StorageClients::new();
    for (provider, region) in placements {
        let client = match S3ProviderConfig::from_env(&provider, &region) {
            Some(provider_config) => S3ObjectStore::new(&provider_config.in_region(region.clone())),
            None if provider == AWS_PROVIDER => S3ObjectStore::from_default_chain(&region).await,
            None => anyhow::bail!(
                "No credentials for storage provider '{}' (set {}_S3_ACCESS_KEY)",
                provider,
                provider.to_uppercase()
            ),
        };
        info!(provider = %provider, region = %region, "Registered storage client");
        clients.register(provider, region, Arc::new(client));
    }
    Ok(clients)
}
