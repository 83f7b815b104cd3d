use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::{error, info};

use veilstat_core::{
    analytics::AnalyticsBackend,
    config::Config,
    error::QueryError,
    salt::{SaltManager, SaltStore},
};
use veilstat_duckdb::DuckDbBackend;
use veilstat_metadata::SiteConfigProvider;

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
pub struct AppState {
    /// The DuckDB backend, kept concrete for health checks and seeding.
    pub db: Arc<DuckDbBackend>,

    /// Event store and aggregation surface.
    pub analytics: Arc<dyn AnalyticsBackend>,

    /// Site metadata, declared properties and funnels.
    pub sites: Arc<dyn SiteConfigProvider>,

    /// Hands out the current salt. Backed by the shared salt store so every
    /// ingestion process converges on the same salt.
    pub salts: SaltManager,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    /// Positive "site is active" lookups with the instant they were cached.
    ///
    /// Entries expire after `config.site_cache_ttl()` so deactivating a site
    /// takes effect without a restart. Negative lookups are never cached.
    site_cache: Arc<RwLock<HashMap<String, Instant>>>,
}

impl AppState {
    /// Wire every seam to the same DuckDB backend.
    pub fn new(db: DuckDbBackend, config: Config) -> Self {
        let db = Arc::new(db);
        Self::with_providers(db.clone(), db.clone(), db.clone(), db, config)
    }

    pub fn with_providers(
        db: Arc<DuckDbBackend>,
        analytics: Arc<dyn AnalyticsBackend>,
        sites: Arc<dyn SiteConfigProvider>,
        salt_store: Arc<dyn SaltStore>,
        config: Config,
    ) -> Self {
        let salts = SaltManager::new(salt_store, config.salt_ttl());
        Self {
            db,
            analytics,
            sites,
            salts,
            config: Arc::new(config),
            site_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Return `true` if `site_id` exists and accepts events.
    ///
    /// Checks the in-process cache first; on a miss or an expired entry
    /// falls back to the site provider. Provider failures are returned, not
    /// folded into `false`, so the caller can answer 503 instead of 404.
    pub async fn is_active_site(&self, site_id: &str) -> anyhow::Result<bool> {
        let ttl = self.config.site_cache_ttl();
        {
            let cache = self.site_cache.read().await;
            if cache
                .get(site_id)
                .is_some_and(|cached_at| cached_at.elapsed() < ttl)
            {
                return Ok(true);
            }
        }

        let active = self.sites.is_active_site(site_id).await?;
        let mut cache = self.site_cache.write().await;
        if active {
            cache.insert(site_id.to_string(), Instant::now());
        } else {
            cache.remove(site_id);
        }
        Ok(active)
    }

    /// Resolve a site for a dashboard query; unknown sites are a 404, not an
    /// empty result.
    pub async fn require_site(&self, site_id: &str) -> Result<(), QueryError> {
        match self.sites.get_site(site_id).await? {
            Some(_) => Ok(()),
            None => Err(QueryError::UnknownSite(site_id.to_string())),
        }
    }

    /// Bound an aggregation future by `config.query_timeout()`.
    pub async fn run_query<T, F>(&self, query: F) -> Result<T, QueryError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let timeout = self.config.query_timeout();
        match tokio::time::timeout(timeout, query).await {
            Ok(result) => result.map_err(QueryError::Unavailable),
            Err(_) => Err(QueryError::Timeout(timeout.as_millis() as u64)),
        }
    }

    /// Background loop: replace an expired salt even when no traffic arrives.
    ///
    /// A failed check is logged but does not crash the loop; the next access
    /// path retries the rotation on its own.
    pub async fn run_salt_maintenance_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.salt_maintenance_interval());
        loop {
            ticker.tick().await;
            match self.salts.rotate_if_expired().await {
                Ok(true) => info!("Expired salt replaced by maintenance loop"),
                Ok(false) => {}
                Err(e) => error!(error = %e, "Salt maintenance failed"),
            }
        }
    }
}
