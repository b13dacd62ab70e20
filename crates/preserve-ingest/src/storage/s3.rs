use super::{config::S3ProviderConfig, ObjectInfo, ObjectReader, ObjectStore, PutOptions};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::ProvideErrorMetadata,
    operation::{get_object::GetObjectError, head_object::HeadObjectError},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart, StorageClass},
    Client,
};
use preserve_common::{PreserveError, Result};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument, warn};

/// Objects up to this size go up in a single put; larger ones are sent as
/// multipart uploads with parts of this size.
const PART_SIZE: u64 = 64 * 1024 * 1024;

/// Part size for server-side multipart copies.
const COMPOSE_PART_SIZE: u64 = 1024 * 1024 * 1024;

fn storage_error<E: std::fmt::Display>(context: &str, err: E) -> PreserveError {
    PreserveError::Storage(format!("{}: {}", context, err))
}

fn trim_etag(etag: Option<&str>) -> String {
    etag.unwrap_or_default().trim_matches('"').to_string()
}

/// S3-compatible object store (AWS, Wasabi, MinIO).
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    provider: String,
}

impl S3ObjectStore {
    pub fn new(config: &S3ProviderConfig) -> Self {
        debug!("Initializing object store client: {:?}", config);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "preserve-ingest",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(
            provider = %config.provider,
            region = %config.region,
            "Object store client initialized"
        );

        Self {
            client: Client::from_conf(builder.build()),
            provider: config.provider.clone(),
        }
    }

    /// Client for AWS without static keys. Credentials come from the SDK's
    /// default chain (environment, profile, instance or task role).
    pub async fn from_default_chain(region: &str) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        info!(region, "Object store client initialized from default credential chain");
        Self::from_sdk_config("aws", &sdk_config)
    }

    pub fn from_sdk_config(provider: impl Into<String>, sdk_config: &SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
            provider: provider.into(),
        }
    }

    pub fn region(&self) -> Option<&str> {
        self.client.config().region().map(|r| r.as_ref())
    }

    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        options: &PutOptions,
    ) -> Result<u64> {
        let written = body.len() as u64;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(written as i64)
            .set_content_type(options.content_type.clone())
            .set_metadata(Some(options.metadata.clone().into_iter().collect()))
            .set_storage_class(options.storage_class.as_deref().map(StorageClass::from))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| storage_error("put_object failed", e.into_service_error()))?;
        Ok(written)
    }

    async fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        first_part: Vec<u8>,
        reader: &mut ObjectReader,
        options: &PutOptions,
    ) -> Result<u64> {
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_content_type(options.content_type.clone())
            .set_metadata(Some(options.metadata.clone().into_iter().collect()))
            .set_storage_class(options.storage_class.as_deref().map(StorageClass::from))
            .send()
            .await
            .map_err(|e| storage_error("create_multipart_upload failed", e.into_service_error()))?;
        let upload_id = upload
            .upload_id()
            .ok_or_else(|| PreserveError::Storage("Multipart upload has no id".to_string()))?
            .to_string();

        match self
            .upload_parts(bucket, key, &upload_id, first_part, reader)
            .await
        {
            Ok((parts, written)) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| {
                        storage_error("complete_multipart_upload failed", e.into_service_error())
                    })?;
                Ok(written)
            },
            Err(err) => {
                self.abort(bucket, key, &upload_id).await;
                Err(err)
            },
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        first_part: Vec<u8>,
        reader: &mut ObjectReader,
    ) -> Result<(Vec<CompletedPart>, u64)> {
        let mut parts = Vec::new();
        let mut written = 0u64;
        let mut chunk = first_part;
        let mut part_number = 1;

        while !chunk.is_empty() {
            let len = chunk.len() as u64;
            let output = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .content_length(len as i64)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| storage_error("upload_part failed", e.into_service_error()))?;
            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .build(),
            );
            written += len;
            part_number += 1;
            chunk = read_chunk(reader, PART_SIZE).await?;
        }

        Ok((parts, written))
    }

    async fn abort(&self, bucket: &str, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!(bucket, key, error = %e, "Failed to abort multipart upload");
        }
    }
}

/// Read up to `limit` bytes, stopping early only at end of stream.
async fn read_chunk(reader: &mut ObjectReader, limit: u64) -> Result<Vec<u8>> {
    let mut chunk = Vec::new();
    reader.take(limit).read_to_end(&mut chunk).await?;
    Ok(chunk)
}

fn copy_source(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, urlencoding::encode(key))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn provider(&self) -> &str {
        &self.provider
    }

    #[instrument(skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.into_service_error() {
                GetObjectError::NoSuchKey(_) => PreserveError::NotFound(format!("{}/{}", bucket, key)),
                other => storage_error("get_object failed", other),
            })?;
        Ok(Box::pin(output.body.into_async_read()))
    }

    #[instrument(skip(self, reader, options))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        mut reader: ObjectReader,
        size: u64,
        options: &PutOptions,
    ) -> Result<u64> {
        let first = read_chunk(&mut reader, PART_SIZE).await?;
        let written = if (first.len() as u64) < PART_SIZE {
            self.put_single(bucket, key, first, options).await?
        } else {
            self.put_multipart(bucket, key, first, &mut reader, options)
                .await?
        };
        debug!(bucket, key, size, written, "Put complete");
        Ok(written)
    }

    #[instrument(skip(self))]
    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.into_service_error() {
                HeadObjectError::NotFound(_) => PreserveError::NotFound(format!("{}/{}", bucket, key)),
                other => storage_error("head_object failed", other),
            })?;

        Ok(ObjectInfo {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            etag: trim_etag(output.e_tag()),
            content_type: output.content_type().map(str::to_string),
            metadata: output.metadata().cloned().unwrap_or_default(),
        })
    }

    #[instrument(skip(self, options))]
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        options: &PutOptions,
    ) -> Result<()> {
        self.client
            .copy_object()
            .copy_source(copy_source(src_bucket, src_key))
            .bucket(dst_bucket)
            .key(dst_key)
            .metadata_directive(aws_sdk_s3::types::MetadataDirective::Replace)
            .set_content_type(options.content_type.clone())
            .set_metadata(Some(options.metadata.clone().into_iter().collect()))
            .set_storage_class(options.storage_class.as_deref().map(StorageClass::from))
            .send()
            .await
            .map_err(|e| {
                let err = e.into_service_error();
                if err.code() == Some("NoSuchKey") {
                    PreserveError::NotFound(format!("{}/{}", src_bucket, src_key))
                } else {
                    storage_error("copy_object failed", err)
                }
            })?;
        Ok(())
    }

    #[instrument(skip(self, options))]
    async fn compose(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        size: u64,
        options: &PutOptions,
    ) -> Result<()> {
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(dst_bucket)
            .key(dst_key)
            .set_content_type(options.content_type.clone())
            .set_metadata(Some(options.metadata.clone().into_iter().collect()))
            .set_storage_class(options.storage_class.as_deref().map(StorageClass::from))
            .send()
            .await
            .map_err(|e| storage_error("create_multipart_upload failed", e.into_service_error()))?;
        let upload_id = upload
            .upload_id()
            .ok_or_else(|| PreserveError::Storage("Multipart upload has no id".to_string()))?
            .to_string();

        let mut parts = Vec::new();
        let mut start = 0u64;
        let mut part_number = 1;
        while start < size {
            let end = (start + COMPOSE_PART_SIZE).min(size) - 1;
            let result = self
                .client
                .upload_part_copy()
                .copy_source(copy_source(src_bucket, src_key))
                .copy_source_range(format!("bytes={}-{}", start, end))
                .bucket(dst_bucket)
                .key(dst_key)
                .upload_id(&upload_id)
                .part_number(part_number)
                .send()
                .await;
            match result {
                Ok(output) => parts.push(
                    CompletedPart::builder()
                        .part_number(part_number)
                        .set_e_tag(
                            output
                                .copy_part_result()
                                .and_then(|r| r.e_tag())
                                .map(str::to_string),
                        )
                        .build(),
                ),
                Err(e) => {
                    self.abort(dst_bucket, dst_key, &upload_id).await;
                    return Err(storage_error("upload_part_copy failed", e.into_service_error()));
                },
            }
            start = end + 1;
            part_number += 1;
        }

        self.client
            .complete_multipart_upload()
            .bucket(dst_bucket)
            .key(dst_key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| storage_error("complete_multipart_upload failed", e.into_service_error()))?;

        info!(dst_bucket, dst_key, size, parts = part_number - 1, "Composed object");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| storage_error("delete_object failed", e.into_service_error()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| storage_error("list_objects_v2 failed", e.into_service_error()))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|o| o.key().map(str::to_string)),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string())
                },
                _ => break,
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_etag() {
        assert_eq!(trim_etag(Some("\"abc123\"")), "abc123");
        assert_eq!(trim_etag(None), "");
    }

    #[test]
    fn test_from_sdk_config_keeps_region() {
        let sdk_config = SdkConfig::builder()
            .region(Region::new("us-west-2"))
            .behavior_version(BehaviorVersion::latest())
            .build();
        let store = S3ObjectStore::from_sdk_config("aws", &sdk_config);
        assert_eq!(store.provider(), "aws");
        assert_eq!(store.region(), Some("us-west-2"));
    }

    #[test]
    fn test_copy_source_encodes_key() {
        assert_eq!(copy_source("staging", "12/a b"), "staging/12%2Fa%20b");
    }
}
