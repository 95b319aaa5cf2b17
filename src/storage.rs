use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    presigning::PresigningConfig,
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use base64ct::{Base64, Encoding};
use bytes::Bytes;

use crate::config::S3Config;

/// Where panorama payloads live. The returned reference is what the file row stores.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str)
        -> anyhow::Result<String>;
    async fn delete_object(&self, reference: &str) -> anyhow::Result<()>;
    /// Turns a stored reference into something a browser can load.
    async fn public_url(&self, reference: &str) -> anyhow::Result<String>;
}

/// Encodes the payload into a `data:` URL; nothing leaves the row.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineStorage;

pub fn data_url(content_type: &str, body: &[u8]) -> String {
    format!("data:{};base64,{}", content_type, Base64::encode_string(body))
}

#[async_trait]
impl StorageClient for InlineStorage {
    async fn put_object(
        &self,
        _key: &str,
        body: Bytes,
        content_type: &str,
    ) -> anyhow::Result<String> {
        Ok(data_url(content_type, &body))
    }

    async fn delete_object(&self, _reference: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn public_url(&self, reference: &str) -> anyhow::Result<String> {
        Ok(reference.to_string())
    }
}

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    presign_ttl: std::time::Duration,
}

impl S3Storage {
    pub async fn new(cfg: &S3Config) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                &cfg.access_key,
                &cfg.secret_key,
                None,
                None,
                "static",
            ))
            .endpoint_url(&cfg.endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&cfg.endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: cfg.bucket.clone(),
            presign_ttl: std::time::Duration::from_secs(cfg.presign_ttl_seconds),
        })
    }
}

#[async_trait]
impl StorageClient for S3Storage {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> anyhow::Result<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .context("s3 put_object")?;
        Ok(key.to_string())
    }

    async fn delete_object(&self, reference: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(reference)
            .send()
            .await
            .context("s3 delete_object")?;
        Ok(())
    }

    async fn public_url(&self, reference: &str) -> anyhow::Result<String> {
        let req = self.client.get_object().bucket(&self.bucket).key(reference);
        let presigned = req
            .presigned(PresigningConfig::expires_in(self.presign_ttl)?)
            .await
            .context("s3 presign_get")?;
        Ok(presigned.uri().to_string())
    }
}

/// Object key for S3-style backends: `panoramas/<user>/<uuid>.<ext>`.
pub fn object_key(user_id: i64, content_type: &str) -> String {
    let ext = ext_from_mime(content_type).unwrap_or("bin");
    format!("panoramas/{}/{}.{}", user_id, uuid::Uuid::new_v4(), ext)
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        "image/gif" => Some("gif"),
        "image/avif" => Some("avif"),
        _ => None,
    }
}
