use std::sync::Arc;

use aws_config::meta::region::RegionProviderChain;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client as S3Client,
};

use crate::config::{AppConfig, StorageSettings};
use crate::storage::{ObjectStorage, S3Storage, UnconfiguredStorage};

pub async fn build_client(settings: &StorageSettings) -> S3Client {
    let region = Region::new(settings.region.clone());
    let region_provider = RegionProviderChain::first_try(Some(region))
        .or_default_provider()
        .or_else("us-east-1");

    let credentials = Credentials::new(
        settings.access_key_id.clone(),
        settings.secret_access_key.clone(),
        None,
        None,
        "static",
    );

    #[allow(deprecated)]
    let mut loader = aws_config::from_env()
        .region(region_provider)
        .credentials_provider(credentials);

    if let Some(endpoint) = &settings.endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }

    let base_config = loader.load().await;
    let s3_config = S3ConfigBuilder::from(&base_config)
        .force_path_style(true)
        .build();

    S3Client::from_conf(s3_config)
}

/// Resolves storage once for the lifetime of the process. Without a bucket
/// and a credential pair the returned storage rejects every operation.
pub async fn build_storage(config: &AppConfig) -> Arc<dyn ObjectStorage> {
    match config.storage_settings() {
        Some(settings) => {
            let client = build_client(&settings).await;
            Arc::new(S3Storage::new(client, settings.bucket))
        }
        None => {
            tracing::warn!(
                bucket_set = config.s3_bucket.is_some(),
                credentials_set = config.aws_access_key_id.is_some()
                    && config.aws_secret_access_key.is_some(),
                "object storage not configured; uploads and downloads will be rejected"
            );
            Arc::new(UnconfiguredStorage)
        }
    }
}
