use anyhow::Result;

use veilstat_core::analytics::{
    AggregateOutcome, PropertyAggregate, PropertyDefinition, PropertyTally, StatsQuery,
};

use super::filters::{append_event_filters, json_path, SqlParams, NUMERIC_JSON_TYPES};

/// Presence, numeric presence and numeric sum of one property over the
/// events matching `query`.
pub(crate) fn query_property_tally(
    conn: &duckdb::Connection,
    query: &StatsQuery,
    key: &str,
) -> Result<PropertyTally> {
    let mut params: SqlParams = vec![
        Box::new(query.site_id.clone()),
        Box::new(json_path(key)),
    ];
    let mut param_idx = 3;
    let mut filter_sql = String::new();
    append_event_filters(query, &mut filter_sql, &mut params, &mut param_idx);
    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let sql = format!(
        r#"
        WITH scoped AS (
            SELECT json_extract(e.properties, ?2) AS v
            FROM events e
            WHERE e.site_id = ?1
              AND e.properties IS NOT NULL
              {filter_sql}
        )
        SELECT
            COUNT(v) AS present,
            COUNT(*) FILTER (WHERE json_type(v) IN {NUMERIC_JSON_TYPES}) AS numeric,
            COALESCE(
                SUM(TRY_CAST(v AS DOUBLE)) FILTER (WHERE json_type(v) IN {NUMERIC_JSON_TYPES}),
                0
            ) AS total
        FROM scoped
        "#
    );

    let tally = conn
        .prepare(&sql)?
        .query_row(param_refs.as_slice(), |row| {
            Ok(PropertyTally {
                present: row.get(0)?,
                numeric: row.get(1)?,
                sum: row.get(2)?,
            })
        })?;
    Ok(tally)
}

pub(crate) fn query_property_aggregates(
    conn: &duckdb::Connection,
    query: &StatsQuery,
    definitions: &[PropertyDefinition],
) -> Result<Vec<PropertyAggregate>> {
    let mut aggregates = Vec::with_capacity(definitions.len());
    for def in definitions {
        let tally = query_property_tally(conn, query, &def.name)?;
        aggregates.push(PropertyAggregate {
            name: def.name.clone(),
            operation: def.operation,
            outcome: AggregateOutcome::from_tally(def.operation, tally),
        });
    }
    Ok(aggregates)
}

/// Distinct top-level property keys across a site's stored events.
pub(crate) fn query_observed_keys(conn: &duckdb::Connection, site_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT DISTINCT t.key
        FROM events e, UNNEST(json_keys(e.properties)) AS t(key)
        WHERE e.site_id = ?1
          AND e.properties IS NOT NULL
        ORDER BY t.key ASC
        "#,
    )?;
    let rows = stmt.query_map(duckdb::params![site_id], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
