use async_trait::async_trait;
use serde::Serialize;
use veilstat_core::analytics::{Funnel, PropertyDefinition};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Site {
    pub id: String,
    pub name: String,
    pub domain: String,
    /// Inactive sites keep their data but reject new events.
    pub active: bool,
    pub created_at: String,
}

/// Read-only site configuration consumed by ingestion and aggregation.
///
/// Site, property and funnel management belongs to the dashboard layer; the
/// core only reads what it declared. Self-hosted mode uses the DuckDB
/// implementation.
#[async_trait]
pub trait SiteConfigProvider: Send + Sync + 'static {
    async fn get_site(&self, site_id: &str) -> anyhow::Result<Option<Site>>;

    async fn list_property_definitions(
        &self,
        site_id: &str,
    ) -> anyhow::Result<Vec<PropertyDefinition>>;

    async fn list_funnels(&self, site_id: &str) -> anyhow::Result<Vec<Funnel>>;

    async fn get_funnel(&self, site_id: &str, funnel_id: &str) -> anyhow::Result<Option<Funnel>>;

    /// `true` only for a site that exists and accepts events.
    async fn is_active_site(&self, site_id: &str) -> anyhow::Result<bool> {
        Ok(self.get_site(site_id).await?.is_some_and(|s| s.active))
    }
}
