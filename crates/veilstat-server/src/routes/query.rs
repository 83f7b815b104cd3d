use chrono::NaiveDate;
use serde::Deserialize;

use veilstat_core::analytics::{EventFilter, PropertyFilter, StatsQuery, TimeRange};

use crate::error::AppError;

const MAX_FILTER_LEN: usize = 2048;

/// Query-string shape shared by every dashboard endpoint.
///
/// `start_date` and `end_date` are whole UTC days (`YYYY-MM-DD`, end
/// inclusive). Omitting both means all time.
#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub path: Option<String>,
    pub name: Option<String>,
    pub property_key: Option<String>,
    pub property_value: Option<String>,
}

impl StatsParams {
    pub fn into_query(self, site_id: &str) -> Result<StatsQuery, AppError> {
        let range = parse_range(self.start_date.as_deref(), self.end_date.as_deref())?;
        let property = match (
            normalize_optional_filter("property_key", self.property_key, 64)?,
            self.property_value,
        ) {
            (Some(key), Some(value)) => Some(PropertyFilter { key, value }),
            (None, None) => None,
            _ => {
                return Err(AppError::BadRequest(
                    "property_key and property_value must be given together".to_string(),
                ))
            }
        };

        let query = StatsQuery {
            site_id: site_id.to_string(),
            range,
            filter: EventFilter {
                event_type: normalize_optional_filter("type", self.event_type, 16)?,
                path: normalize_optional_filter("path", self.path, MAX_FILTER_LEN)?,
                event_name: normalize_optional_filter("name", self.name, MAX_FILTER_LEN)?,
                property,
            },
        };
        query.validate()?;
        Ok(query)
    }
}

pub(crate) fn parse_range(
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<TimeRange, AppError> {
    match (start_date, end_date) {
        (None, None) => Ok(TimeRange::AllTime),
        (Some(start), Some(end)) => {
            let start = parse_strict_date(start, "start_date")?;
            let end = parse_strict_date(end, "end_date")?;
            Ok(TimeRange::from_dates(start, end)?)
        }
        _ => Err(AppError::BadRequest(
            "start_date and end_date must be given together".to_string(),
        )),
    }
}

pub(crate) fn normalize_optional_filter(
    field: &str,
    value: Option<String>,
    max_len: usize,
) -> Result<Option<String>, AppError> {
    if let Some(raw) = value {
        let trimmed = raw.trim().to_string();
        if trimmed.is_empty() {
            return Err(AppError::BadRequest(format!(
                "{field} cannot be empty when provided"
            )));
        }
        if trimmed.len() > max_len {
            return Err(AppError::BadRequest(format!(
                "{field} is too long (max {max_len} characters)"
            )));
        }
        return Ok(Some(trimmed));
    }
    Ok(None)
}

fn parse_strict_date(raw: &str, field: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("{field} must be a YYYY-MM-DD date")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_dates_means_all_time() {
        let query = StatsParams::default().into_query("S1").expect("query");
        assert_eq!(query.range, TimeRange::AllTime);
    }

    #[test]
    fn half_open_date_pair_is_rejected() {
        let params = StatsParams {
            start_date: Some("2026-03-01".to_string()),
            ..Default::default()
        };
        assert!(params.into_query("S1").is_err());
    }

    #[test]
    fn inverted_dates_are_rejected() {
        let params = StatsParams {
            start_date: Some("2026-03-02".to_string()),
            end_date: Some("2026-03-01".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            params.into_query("S1"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn property_filter_needs_both_parts() {
        let params = StatsParams {
            property_key: Some("plan".to_string()),
            ..Default::default()
        };
        assert!(params.into_query("S1").is_err());

        let params = StatsParams {
            property_key: Some("plan".to_string()),
            property_value: Some("pro".to_string()),
            ..Default::default()
        };
        let query = params.into_query("S1").expect("query");
        assert_eq!(
            query.filter.property,
            Some(PropertyFilter {
                key: "plan".to_string(),
                value: "pro".to_string()
            })
        );
    }

    #[test]
    fn unknown_type_filter_is_rejected() {
        let params = StatsParams {
            event_type: Some("click".to_string()),
            ..Default::default()
        };
        assert!(params.into_query("S1").is_err());
    }
}
