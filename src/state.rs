use std::sync::Arc;

use crate::auth::repo::AccountStore;
use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, StorageConfig};
use crate::db::PgStore;
use crate::memory::MemoryStore;
use crate::panoramas::repo::PanoramaStore;
use crate::storage::{InlineStorage, S3Storage, StorageClient};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub accounts: Arc<dyn AccountStore>,
    pub panoramas: Arc<dyn PanoramaStore>,
    pub storage: Arc<dyn StorageClient>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let (accounts, panoramas): (Arc<dyn AccountStore>, Arc<dyn PanoramaStore>) =
            match &config.database_url {
                Some(url) => {
                    let store = PgStore::connect(url, config.max_connections).await?;
                    store.migrate().await?;
                    let store = Arc::new(store);
                    (store.clone(), store)
                }
                None => {
                    tracing::warn!("DATABASE_URL not set; using in-memory store, data is lost on exit");
                    let store = Arc::new(MemoryStore::new());
                    (store.clone(), store)
                }
            };

        let storage: Arc<dyn StorageClient> = match &config.storage {
            StorageConfig::Inline => Arc::new(InlineStorage),
            StorageConfig::S3(s3) => Arc::new(S3Storage::new(s3).await?),
        };

        Ok(Self::from_parts(
            config,
            accounts,
            panoramas,
            storage,
            Arc::new(SystemClock),
        ))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        accounts: Arc<dyn AccountStore>,
        panoramas: Arc<dyn PanoramaStore>,
        storage: Arc<dyn StorageClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            accounts,
            panoramas,
            storage,
            clock,
        }
    }
}

/// Test state: memory store, inline storage and a hand-driven clock.
#[cfg(test)]
pub struct FakeState {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<crate::clock::ManualClock>,
}

#[cfg(test)]
impl AppState {
    pub fn fake() -> FakeState {
        let config = Arc::new(AppConfig {
            database_url: None,
            max_connections: 1,
            session_ttl_days: 30,
            storage: StorageConfig::Inline,
        });
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(crate::clock::ManualClock::new(
            time::macros::datetime!(2024-06-01 12:00 UTC),
        ));
        let state = Self::from_parts(
            config,
            store.clone(),
            store.clone(),
            Arc::new(InlineStorage),
            clock.clone(),
        );
        FakeState {
            state,
            store,
            clock,
        }
    }
}
