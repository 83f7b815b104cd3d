use anyhow::Result;

use veilstat_core::analytics::{CountGrouping, CountRow, CountsResult, StatsQuery};
use veilstat_core::event::{EVENT_TYPE_CUSTOM, EVENT_TYPE_PAGEVIEW};

use super::filters::{append_event_filters, SqlParams};

/// Rows returned per grouping. `total` still covers every matching event.
pub const MAX_COUNT_ROWS: usize = 1000;

fn grouping_sql(grouping: CountGrouping) -> (&'static str, String) {
    match grouping {
        CountGrouping::Path => (
            "e.path",
            format!(" AND e.event_type = '{EVENT_TYPE_PAGEVIEW}'"),
        ),
        CountGrouping::Event => (
            "e.event_name",
            format!(" AND e.event_type = '{EVENT_TYPE_CUSTOM}' AND e.event_name IS NOT NULL"),
        ),
    }
}

pub(crate) fn query_counts(
    conn: &duckdb::Connection,
    query: &StatsQuery,
    grouping: CountGrouping,
) -> Result<CountsResult> {
    let (group_column, type_sql) = grouping_sql(grouping);

    let mut params: SqlParams = vec![Box::new(query.site_id.clone())];
    let mut param_idx = 2;
    let mut filter_sql = type_sql;
    append_event_filters(query, &mut filter_sql, &mut params, &mut param_idx);
    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let sql = format!(
        r#"
        SELECT
            {group_column} AS name,
            COUNT(*) AS count,
            COUNT(DISTINCT e.visitor_id) AS visitors
        FROM events e
        WHERE e.site_id = ?1
          {filter_sql}
        GROUP BY name
        ORDER BY count DESC, name ASC
        LIMIT {MAX_COUNT_ROWS}
        "#
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        Ok(CountRow {
            name: row.get(0)?,
            count: row.get(1)?,
            visitors: row.get(2)?,
        })
    })?;
    let rows = rows.collect::<Result<Vec<_>, _>>()?;

    let total_sql = format!(
        r#"
        SELECT COUNT(*)
        FROM events e
        WHERE e.site_id = ?1
          {filter_sql}
        "#
    );
    let total: i64 = conn
        .prepare(&total_sql)?
        .query_row(param_refs.as_slice(), |row| row.get(0))?;

    Ok(CountsResult {
        grouping,
        rows,
        total,
    })
}
