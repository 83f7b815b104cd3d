use async_trait::async_trait;

use veilstat_core::analytics::{
    AnalyticsBackend, CountGrouping, CountsResult, Funnel, FunnelReport, PropertyAggregate,
    PropertyDefinition, StatsQuery,
};
use veilstat_core::event::Event;

use crate::queries::{counts, funnel_results, properties};
use crate::DuckDbBackend;

#[async_trait]
impl AnalyticsBackend for DuckDbBackend {
    async fn insert_event(&self, event: &Event) -> anyhow::Result<()> {
        DuckDbBackend::insert_event(self, event).await
    }

    async fn get_counts(
        &self,
        query: &StatsQuery,
        grouping: CountGrouping,
    ) -> anyhow::Result<CountsResult> {
        let query = query.clone();
        self.read(move |conn| counts::query_counts(conn, &query, grouping))
            .await
    }

    async fn get_property_aggregates(
        &self,
        query: &StatsQuery,
        definitions: &[PropertyDefinition],
    ) -> anyhow::Result<Vec<PropertyAggregate>> {
        let query = query.clone();
        let definitions = definitions.to_vec();
        self.read(move |conn| properties::query_property_aggregates(conn, &query, &definitions))
            .await
    }

    async fn get_funnel_report(
        &self,
        query: &StatsQuery,
        funnel: &Funnel,
    ) -> anyhow::Result<FunnelReport> {
        let query = query.clone();
        let funnel = funnel.clone();
        self.read(move |conn| funnel_results::query_funnel_report(conn, &query, &funnel))
            .await
    }

    async fn observed_property_keys(&self, site_id: &str) -> anyhow::Result<Vec<String>> {
        let site_id = site_id.to_string();
        self.read(move |conn| properties::query_observed_keys(conn, &site_id))
            .await
    }
}
