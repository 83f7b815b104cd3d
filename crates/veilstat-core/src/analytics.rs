//! Analytics backend abstraction.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::QueryError,
    event::{Event, EVENT_TYPE_CUSTOM, EVENT_TYPE_PAGEVIEW},
    ingest::is_valid_property_key,
};

/// Time window of a query. `Between` is half-open: `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TimeRange {
    #[default]
    AllTime,
    Between {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl TimeRange {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, QueryError> {
        if end <= start {
            return Err(QueryError::InvalidRange(
                "end must be after start".to_string(),
            ));
        }
        Ok(Self::Between { start, end })
    }

    /// Whole UTC days, `end_date` inclusive.
    pub fn from_dates(start_date: NaiveDate, end_date: NaiveDate) -> Result<Self, QueryError> {
        if end_date < start_date {
            return Err(QueryError::InvalidRange(
                "end_date must be on or after start_date".to_string(),
            ));
        }
        let start = start_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| QueryError::InvalidRange("invalid start_date".to_string()))?
            .and_utc();
        let end = (end_date + Duration::days(1))
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| QueryError::InvalidRange("invalid end_date".to_string()))?
            .and_utc();
        Self::between(start, end)
    }

    pub fn bounds(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match self {
            TimeRange::AllTime => None,
            TimeRange::Between { start, end } => Some((*start, *end)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyFilter {
    pub key: String,
    /// Compared against the property's string rendering.
    pub value: String,
}

/// Optional predicates applied uniformly to every query shape.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventFilter {
    pub event_type: Option<String>,
    pub path: Option<String>,
    pub event_name: Option<String>,
    pub property: Option<PropertyFilter>,
}

/// The single query shape accepted by every aggregation entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsQuery {
    pub site_id: String,
    pub range: TimeRange,
    pub filter: EventFilter,
}

impl StatsQuery {
    pub fn all_time(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            range: TimeRange::AllTime,
            filter: EventFilter::default(),
        }
    }

    /// Reject queries that could only ever produce a misleading result.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.site_id.trim().is_empty() {
            return Err(QueryError::InvalidQuery("site_id is required".to_string()));
        }
        if let Some((start, end)) = self.range.bounds() {
            if end <= start {
                return Err(QueryError::InvalidRange(
                    "end must be after start".to_string(),
                ));
            }
        }
        if let Some(ref event_type) = self.filter.event_type {
            if event_type != EVENT_TYPE_PAGEVIEW && event_type != EVENT_TYPE_CUSTOM {
                return Err(QueryError::InvalidQuery(format!(
                    "type must be one of: {EVENT_TYPE_PAGEVIEW}, {EVENT_TYPE_CUSTOM}"
                )));
            }
        }
        if let Some(ref property) = self.filter.property {
            if !is_valid_property_key(&property.key) {
                return Err(QueryError::InvalidQuery(format!(
                    "invalid property key: {}",
                    property.key
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CountGrouping {
    /// Pageviews grouped by path.
    #[default]
    Path,
    /// Custom events grouped by name.
    Event,
}

impl CountGrouping {
    pub fn parse(raw: Option<&str>) -> Result<Self, QueryError> {
        match raw.map(str::trim) {
            None | Some("") | Some("path") => Ok(Self::Path),
            Some("event") => Ok(Self::Event),
            Some(_) => Err(QueryError::InvalidQuery(
                "group must be one of: path, event".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRow {
    pub name: String,
    pub count: i64,
    pub visitors: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountsResult {
    pub grouping: CountGrouping,
    /// Ordered by `count` desc, then `name` asc.
    pub rows: Vec<CountRow>,
    pub total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyOperation {
    Sum,
    Average,
    Count,
}

impl PropertyOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyOperation::Sum => "sum",
            PropertyOperation::Average => "average",
            PropertyOperation::Count => "count",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "sum" => Some(Self::Sum),
            "average" => Some(Self::Average),
            "count" => Some(Self::Count),
            _ => None,
        }
    }
}

/// A property declared in site configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    pub operation: PropertyOperation,
}

/// Raw per-property tallies gathered from matching events.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PropertyTally {
    /// Events carrying the key at all.
    pub present: i64,
    /// Events whose value is numeric.
    pub numeric: i64,
    pub sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AggregateOutcome {
    /// The property never fired in range. Distinct from a value of zero.
    NoData,
    Value { value: f64, observations: i64 },
}

impl AggregateOutcome {
    pub fn from_tally(operation: PropertyOperation, tally: PropertyTally) -> Self {
        match operation {
            PropertyOperation::Count if tally.present > 0 => AggregateOutcome::Value {
                value: tally.present as f64,
                observations: tally.present,
            },
            PropertyOperation::Sum if tally.numeric > 0 => AggregateOutcome::Value {
                value: tally.sum,
                observations: tally.numeric,
            },
            PropertyOperation::Average if tally.numeric > 0 => AggregateOutcome::Value {
                value: tally.sum / tally.numeric as f64,
                observations: tally.numeric,
            },
            _ => AggregateOutcome::NoData,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            AggregateOutcome::NoData => None,
            AggregateOutcome::Value { value, .. } => Some(*value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyAggregate {
    pub name: String,
    pub operation: PropertyOperation,
    #[serde(flatten)]
    pub outcome: AggregateOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    PageView,
    Event,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchOperator {
    #[default]
    Equals,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelStep {
    pub step_order: u32,
    pub label: String,
    pub step_type: StepType,
    pub match_value: String,
    pub match_operator: MatchOperator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Funnel {
    pub id: String,
    pub site_id: String,
    pub name: String,
    pub steps: Vec<FunnelStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStepResult {
    pub step_order: u32,
    pub label: String,
    pub visitors: i64,
    pub drop_off_count: i64,
    pub drop_off_rate: f64,
    pub conversion_rate_from_start: f64,
    pub conversion_rate_from_previous: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelReport {
    pub funnel_id: String,
    pub name: String,
    pub total_visitors_entered: i64,
    pub final_conversion_rate: f64,
    pub steps: Vec<FunnelStepResult>,
}

fn ratio(numerator: i64, denominator: i64) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}

/// Turn per-step distinct-visitor counts into a report.
pub fn compute_funnel_report(funnel: &Funnel, step_counts: &[i64]) -> FunnelReport {
    let total_entered = step_counts.first().copied().unwrap_or(0);
    let mut steps = Vec::with_capacity(funnel.steps.len());

    for (idx, step) in funnel.steps.iter().enumerate() {
        let visitors = step_counts.get(idx).copied().unwrap_or(0);
        let next = step_counts.get(idx + 1).copied();
        let drop_off_count = next.map(|n| (visitors - n).max(0)).unwrap_or(0);
        let drop_off_rate = if next.is_some() {
            ratio(drop_off_count, visitors)
        } else {
            0.0
        };
        let conversion_rate_from_previous = match idx {
            0 if visitors > 0 => 1.0,
            0 => 0.0,
            _ => ratio(visitors, step_counts.get(idx - 1).copied().unwrap_or(0)),
        };

        steps.push(FunnelStepResult {
            step_order: step.step_order,
            label: step.label.clone(),
            visitors,
            drop_off_count,
            drop_off_rate,
            conversion_rate_from_start: ratio(visitors, total_entered),
            conversion_rate_from_previous,
        });
    }

    FunnelReport {
        funnel_id: funnel.id.clone(),
        name: funnel.name.clone(),
        total_visitors_entered: total_entered,
        final_conversion_rate: ratio(step_counts.last().copied().unwrap_or(0), total_entered),
        steps,
    }
}

/// Event store and aggregation surface.
///
/// Queries are read-only and must not block concurrent ingestion beyond the
/// store's own isolation guarantees.
#[async_trait::async_trait]
pub trait AnalyticsBackend: Send + Sync + 'static {
    async fn insert_event(&self, event: &Event) -> anyhow::Result<()>;

    async fn get_counts(
        &self,
        query: &StatsQuery,
        grouping: CountGrouping,
    ) -> anyhow::Result<CountsResult>;

    async fn get_property_aggregates(
        &self,
        query: &StatsQuery,
        definitions: &[PropertyDefinition],
    ) -> anyhow::Result<Vec<PropertyAggregate>>;

    async fn get_funnel_report(
        &self,
        query: &StatsQuery,
        funnel: &Funnel,
    ) -> anyhow::Result<FunnelReport>;

    /// Distinct property keys present in stored events for a site.
    async fn observed_property_keys(&self, site_id: &str) -> anyhow::Result<Vec<String>>;
}
