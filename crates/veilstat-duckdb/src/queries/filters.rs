use veilstat_core::analytics::StatsQuery;

use crate::backend::format_ts;

pub(crate) type SqlParams = Vec<Box<dyn duckdb::types::ToSql>>;

pub(crate) const NUMERIC_JSON_TYPES: &str = "('BIGINT', 'UBIGINT', 'DOUBLE')";

/// Filter value as a number, when it reads as one. Numeric properties are
/// stored as doubles, so `3` must also match a stored `3.0`.
fn numeric_filter_value(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Append the time range and event filters of `query` for the `e.` alias.
///
/// The site id is expected to already be bound as `?1` by the caller.
pub(crate) fn append_event_filters(
    query: &StatsQuery,
    filter_sql: &mut String,
    params: &mut SqlParams,
    param_idx: &mut usize,
) {
    if let Some((start, end)) = query.range.bounds() {
        filter_sql.push_str(&format!(
            " AND e.created_at >= CAST(?{} AS TIMESTAMP) AND e.created_at < CAST(?{} AS TIMESTAMP)",
            *param_idx,
            *param_idx + 1
        ));
        params.push(Box::new(format_ts(start)));
        params.push(Box::new(format_ts(end)));
        *param_idx += 2;
    }

    let filter = &query.filter;
    if let Some(ref event_type) = filter.event_type {
        filter_sql.push_str(&format!(" AND e.event_type = ?{}", *param_idx));
        params.push(Box::new(event_type.clone()));
        *param_idx += 1;
    }
    if let Some(ref path) = filter.path {
        filter_sql.push_str(&format!(" AND e.path = ?{}", *param_idx));
        params.push(Box::new(path.clone()));
        *param_idx += 1;
    }
    if let Some(ref event_name) = filter.event_name {
        filter_sql.push_str(&format!(" AND e.event_name = ?{}", *param_idx));
        params.push(Box::new(event_name.clone()));
        *param_idx += 1;
    }
    if let Some(ref property) = filter.property {
        let path_idx = *param_idx;
        let value_idx = *param_idx + 1;
        params.push(Box::new(json_path(&property.key)));
        params.push(Box::new(property.value.clone()));
        *param_idx += 2;

        match numeric_filter_value(&property.value) {
            Some(number) => {
                filter_sql.push_str(&format!(
                    " AND (json_extract_string(e.properties, ?{path_idx}) = ?{value_idx} \
                     OR (json_type(e.properties, ?{path_idx}) IN {NUMERIC_JSON_TYPES} \
                     AND TRY_CAST(json_extract(e.properties, ?{path_idx}) AS DOUBLE) = ?{}))",
                    *param_idx
                ));
                params.push(Box::new(number));
                *param_idx += 1;
            }
            None => filter_sql.push_str(&format!(
                " AND json_extract_string(e.properties, ?{path_idx}) = ?{value_idx}"
            )),
        }
    }
}

/// JSON path for a top-level property. Keys are validated to
/// `[A-Za-z0-9_]` before they reach here.
pub(crate) fn json_path(key: &str) -> String {
    format!("$.{key}")
}
