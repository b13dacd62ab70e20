use super::{Catalog, CatalogChecksum, CatalogFile, CatalogObject, CatalogStorageRecord};
use crate::models::PremisEvent;
use async_trait::async_trait;
use preserve_common::{PreserveError, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

const API_USER_HEADER: &str = "X-Preserve-API-User";
const API_KEY_HEADER: &str = "X-Preserve-API-Key";

fn catalog_error<E: std::fmt::Display>(context: &str, err: E) -> PreserveError {
    PreserveError::Catalog(format!("{}: {}", context, err))
}

/// JSON-over-HTTP catalog client.
#[derive(Clone)]
pub struct HttpCatalog {
    client: Client,
    base_url: Url,
    api_user: String,
    api_key: String,
}

impl HttpCatalog {
    pub fn new(base_url: &str, api_user: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        // A trailing slash makes Url::join append instead of replacing the
        // last path segment.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| PreserveError::Config(format!("Invalid catalog URL {}: {}", base_url, e)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| catalog_error("Failed to build HTTP client", e))?;

        Ok(Self {
            client,
            base_url,
            api_user: api_user.into(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| catalog_error("Invalid catalog path", e))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(API_USER_HEADER, &self.api_user)
            .header(API_KEY_HEADER, &self.api_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.authorized(request)
            .send()
            .await
            .map_err(|e| catalog_error("Request failed", e))
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PreserveError::Catalog(format!(
                "Catalog returned {}: {}",
                status, body
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| catalog_error("Failed to decode catalog response", e))
    }

    /// GET that maps 404 to `None`.
    async fn get_optional<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>> {
        let response = self.send(self.client.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::decode(response).await.map(Some)
    }

    async fn get_list<T: DeserializeOwned>(&self, path: &str, file_identifier: &str) -> Result<Vec<T>> {
        let mut url = self.url(path)?;
        url.query_pairs_mut()
            .append_pair("file_identifier", file_identifier);
        Ok(self.get_optional(url).await?.unwrap_or_default())
    }

    fn escaped(identifier: &str) -> String {
        urlencoding::encode(identifier).into_owned()
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    #[instrument(skip(self))]
    async fn object_get(&self, identifier: &str) -> Result<Option<CatalogObject>> {
        let url = self.url(&format!("objects/show/{}", Self::escaped(identifier)))?;
        self.get_optional(url).await
    }

    #[instrument(skip(self, object), fields(identifier = %object.identifier))]
    async fn object_save(&self, object: &CatalogObject) -> Result<CatalogObject> {
        let request = match object.id {
            None => self.client.post(self.url("objects/create")?),
            Some(id) => self.client.put(self.url(&format!("objects/update/{}", id))?),
        };
        let response = self.send(request.json(object)).await?;
        Self::decode(response).await
    }

    #[instrument(skip(self))]
    async fn file_get(&self, identifier: &str) -> Result<Option<CatalogFile>> {
        let url = self.url(&format!("files/show/{}", Self::escaped(identifier)))?;
        self.get_optional(url).await
    }

    #[instrument(skip(self, file), fields(identifier = %file.identifier))]
    async fn file_save(&self, file: &CatalogFile) -> Result<CatalogFile> {
        let request = match file.id {
            None => self.client.post(self.url("files/create")?),
            Some(id) => self.client.put(self.url(&format!("files/update/{}", id))?),
        };
        let response = self.send(request.json(file)).await?;
        let saved: CatalogFile = Self::decode(response).await?;
        debug!(id = ?saved.id, "Catalog saved file");
        Ok(saved)
    }

    async fn checksums(&self, file_identifier: &str) -> Result<Vec<CatalogChecksum>> {
        self.get_list("checksums", file_identifier).await
    }

    async fn storage_records(&self, file_identifier: &str) -> Result<Vec<CatalogStorageRecord>> {
        self.get_list("storage_records", file_identifier).await
    }

    #[instrument(skip(self, event), fields(identifier = %event.identifier))]
    async fn event_save(&self, event: &PremisEvent) -> Result<PremisEvent> {
        let response = self
            .send(self.client.post(self.url("events/create")?).json(event))
            .await?;
        if response.status() == StatusCode::CONFLICT {
            // Already recorded under this identifier.
            let url = self.url(&format!("events/show/{}", Self::escaped(&event.identifier)))?;
            return self.get_optional(url).await?.ok_or_else(|| {
                PreserveError::Catalog(format!(
                    "Event {} reported as duplicate but not found",
                    event.identifier
                ))
            });
        }
        Self::decode(response).await
    }
}
