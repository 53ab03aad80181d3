//! `StorageApi` over the AWS S3 SDK, and the factory that builds
//! region-bound retrying clients from it.

use crate::errors::{SweepError, SweepResult};
use crate::services::api::{
    ApiError, ListPartsRequest, ListSessionsRequest, PartPage, PartSummary, SessionPage,
    SessionSummary, StorageApi,
};
use crate::services::client::RetryingClient;
use crate::services::registry::ClientFactory;
use crate::services::retry::RetryConfig;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::DateTime as SdkDateTime;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// Error codes that mean the addressed resource does not exist.
const NOT_FOUND_CODES: [&str; 3] = ["NoSuchBucket", "NoSuchUpload", "NoSuchKey"];

/// Connection settings shared by every regional client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Named credentials profile.
    pub profile: Option<String>,
    /// Custom endpoint (S3-compatible stores, LocalStack); enables path-style access.
    pub endpoint: Option<String>,
    /// Calls per second per client.
    pub rate_limit: f64,
    pub retry: RetryConfig,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            profile: None,
            endpoint: None,
            rate_limit: crate::services::rate_limit::DEFAULT_RATE_LIMIT,
            retry: RetryConfig::default(),
        }
    }
}

/// Build an SDK client bound to `region`.
///
/// SDK-level retries are disabled; [`RetryingClient`] owns the retry policy.
pub async fn create_s3_client(settings: &ClientSettings, region: &str) -> Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()));

    if let Some(endpoint) = &settings.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    if let Some(profile) = &settings.profile {
        loader = loader.profile_name(profile);
    }

    let sdk_config = loader.load().await;
    let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
        .retry_config(aws_sdk_s3::config::retry::RetryConfig::disabled());
    if settings.endpoint.is_some() {
        builder = builder.force_path_style(true);
    }
    Client::from_conf(builder.build())
}

pub struct S3Api {
    client: Client,
}

impl S3Api {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn to_chrono(value: &SdkDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

fn map_sdk_error<E, R>(err: SdkError<E, R>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
            return ApiError::transport(DisplayErrorContext(&err).to_string(), true);
        }
        SdkError::DispatchFailure(failure) => {
            let transient = failure.is_timeout() || failure.is_io();
            return ApiError::transport(DisplayErrorContext(&err).to_string(), transient);
        }
        _ => {}
    }

    let code = err.code().unwrap_or("Unknown").to_string();
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
    if NOT_FOUND_CODES.contains(&code.as_str()) {
        ApiError::not_found(code, message)
    } else {
        ApiError::service(code, message)
    }
}

#[async_trait]
impl StorageApi for S3Api {
    async fn list_buckets(&self) -> Result<Vec<String>, ApiError> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(output
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name().map(str::to_string))
            .collect())
    }

    async fn get_bucket_location(&self, bucket: &str) -> Result<Option<String>, ApiError> {
        let output = self
            .client
            .get_bucket_location()
            .bucket(bucket)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(output
            .location_constraint()
            .map(|constraint| constraint.as_str().to_string())
            .filter(|region| !region.is_empty()))
    }

    async fn list_upload_sessions(
        &self,
        request: &ListSessionsRequest,
    ) -> Result<SessionPage, ApiError> {
        let output = self
            .client
            .list_multipart_uploads()
            .bucket(&request.bucket)
            .set_key_marker(request.key_marker.clone())
            .set_upload_id_marker(request.upload_id_marker.clone())
            .set_max_uploads(request.max_uploads)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let sessions = output
            .uploads()
            .iter()
            .map(|upload| SessionSummary {
                key: upload.key().map(str::to_string),
                upload_id: upload.upload_id().map(str::to_string),
                initiated: upload.initiated().and_then(to_chrono),
                storage_class: upload.storage_class().map(|c| c.as_str().to_string()),
            })
            .collect();

        Ok(SessionPage {
            sessions,
            is_truncated: output.is_truncated().unwrap_or(false),
            next_key_marker: output.next_key_marker().map(str::to_string),
            next_upload_id_marker: output.next_upload_id_marker().map(str::to_string),
        })
    }

    async fn list_upload_parts(&self, request: &ListPartsRequest) -> Result<PartPage, ApiError> {
        let output = self
            .client
            .list_parts()
            .bucket(&request.bucket)
            .key(&request.key)
            .upload_id(&request.upload_id)
            .set_part_number_marker(request.part_number_marker.clone())
            .send()
            .await
            .map_err(map_sdk_error)?;

        Ok(PartPage {
            parts: output
                .parts()
                .iter()
                .map(|part| PartSummary {
                    part_number: part.part_number(),
                    size: part.size(),
                })
                .collect(),
            is_truncated: output.is_truncated().unwrap_or(false),
            next_part_number_marker: output.next_part_number_marker().map(str::to_string),
        })
    }

    async fn abort_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<(), ApiError> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }
}

/// Builds S3-backed retrying clients from shared settings.
#[derive(Debug, Clone)]
pub struct S3ClientFactory {
    settings: ClientSettings,
}

impl S3ClientFactory {
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ClientFactory for S3ClientFactory {
    async fn create(&self, region: &str) -> SweepResult<Arc<RetryingClient>> {
        if region.trim().is_empty() {
            return Err(SweepError::ClientInit {
                region: region.to_string(),
                reason: "region is empty".into(),
            });
        }
        let client = create_s3_client(&self.settings, region).await;
        debug!(region, rate_limit = self.settings.rate_limit, "built S3 client");
        Ok(Arc::new(RetryingClient::new(
            Arc::new(S3Api::new(client)),
            self.settings.rate_limit,
            self.settings.retry.clone(),
        )))
    }
}
