use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub presign_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Payload kept on the row as a `data:` URL.
    Inline,
    S3(S3Config),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// `None` runs against the in-process store.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub session_ttl_days: i64,
    pub storage: StorageConfig,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v.parse::<T>().with_context(|| format!("invalid {key}")),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        let max_connections = env_or("DATABASE_MAX_CONNECTIONS", 10u32)?;
        let session_ttl_days = env_or("SESSION_TTL_DAYS", 30i64)?;
        anyhow::ensure!(session_ttl_days > 0, "SESSION_TTL_DAYS must be positive");

        let backend = std::env::var("STORAGE_BACKEND").unwrap_or_else(|_| "inline".into());
        let storage = match backend.as_str() {
            "inline" => StorageConfig::Inline,
            "s3" => StorageConfig::S3(S3Config {
                endpoint: std::env::var("MINIO_ENDPOINT").context("MINIO_ENDPOINT")?,
                bucket: std::env::var("MINIO_BUCKET").context("MINIO_BUCKET")?,
                access_key: std::env::var("MINIO_ACCESS_KEY").context("MINIO_ACCESS_KEY")?,
                secret_key: std::env::var("MINIO_SECRET_KEY").context("MINIO_SECRET_KEY")?,
                region: std::env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".into()),
                presign_ttl_seconds: env_or("PRESIGN_TTL_SECONDS", 30 * 60u64)?,
            }),
            other => anyhow::bail!("invalid STORAGE_BACKEND {other:?}, expected inline or s3"),
        };

        Ok(Self {
            database_url,
            max_connections,
            session_ttl_days,
            storage,
        })
    }

    pub fn session_ttl(&self) -> time::Duration {
        time::Duration::days(self.session_ttl_days)
    }
}
