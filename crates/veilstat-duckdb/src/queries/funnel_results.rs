use anyhow::{anyhow, Result};

use veilstat_core::analytics::{
    compute_funnel_report, Funnel, FunnelReport, FunnelStep, MatchOperator, StatsQuery, StepType,
};

use super::filters::{append_event_filters, SqlParams};

fn step_condition_sql(step: &FunnelStep, param_idx: usize) -> String {
    match (&step.step_type, &step.match_operator) {
        (StepType::PageView, MatchOperator::Equals) => {
            format!("e.event_type = 'pageview' AND e.path = ?{}", param_idx)
        }
        (StepType::PageView, MatchOperator::Contains) => format!(
            "e.event_type = 'pageview' AND position(?{} in e.path) > 0",
            param_idx
        ),
        (StepType::Event, MatchOperator::Equals) => {
            format!("e.event_type = 'event' AND e.event_name = ?{}", param_idx)
        }
        (StepType::Event, MatchOperator::Contains) => format!(
            "e.event_type = 'event' AND position(?{} in e.event_name) > 0",
            param_idx
        ),
    }
}

/// One CTE per step. A visitor reaches step N when it matched step N-1 and
/// has a step-N event at or after its earliest step-(N-1) match.
pub(crate) fn build_funnel_query(
    steps: &[FunnelStep],
    filter_sql: &str,
    first_match_param_idx: usize,
) -> (String, usize) {
    let mut ctes = Vec::new();
    ctes.push(format!(
        r#"
        scoped_events AS (
            SELECT
                e.visitor_id,
                e.created_at,
                e.event_type,
                e.path,
                e.event_name
            FROM events e
            WHERE e.site_id = ?1
              {filter_sql}
        )
        "#
    ));

    let mut param_idx = first_match_param_idx;
    for (idx, step) in steps.iter().enumerate() {
        let step_num = idx + 1;
        let prev_step_num = idx;
        let condition = step_condition_sql(step, param_idx);
        param_idx += 1;

        let cte = if step_num == 1 {
            format!(
                r#"
                step_{step_num} AS (
                    SELECT e.visitor_id, MIN(e.created_at) AS matched_at
                    FROM scoped_events e
                    WHERE {condition}
                    GROUP BY e.visitor_id
                )
                "#
            )
        } else {
            format!(
                r#"
                step_{step_num} AS (
                    SELECT e.visitor_id, MIN(e.created_at) AS matched_at
                    FROM scoped_events e
                    JOIN step_{prev_step_num} prev ON prev.visitor_id = e.visitor_id
                    WHERE e.created_at >= prev.matched_at
                      AND {condition}
                    GROUP BY e.visitor_id
                )
                "#
            )
        };
        ctes.push(cte);
    }

    let count_columns: Vec<String> = (1..=steps.len())
        .map(|i| format!("(SELECT COUNT(*) FROM step_{i}) AS step_{i}_count"))
        .collect();
    let sql = format!(
        "WITH {}\nSELECT {}",
        ctes.join(","),
        count_columns.join(", ")
    );
    (sql, param_idx)
}

pub(crate) fn query_funnel_report(
    conn: &duckdb::Connection,
    query: &StatsQuery,
    funnel: &Funnel,
) -> Result<FunnelReport> {
    if funnel.steps.is_empty() {
        return Err(anyhow!("funnel {} has no steps", funnel.id));
    }

    let mut params: SqlParams = vec![Box::new(query.site_id.clone())];
    let mut param_idx = 2;
    let mut filter_sql = String::new();
    append_event_filters(query, &mut filter_sql, &mut params, &mut param_idx);

    let (sql, _next_param_idx) = build_funnel_query(&funnel.steps, &filter_sql, param_idx);
    for step in &funnel.steps {
        params.push(Box::new(step.match_value.clone()));
    }

    let step_count_len = funnel.steps.len();
    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let step_counts = conn
        .prepare(&sql)?
        .query_row(param_refs.as_slice(), |row| {
            let mut counts = Vec::with_capacity(step_count_len);
            for idx in 0..step_count_len {
                counts.push(row.get::<usize, i64>(idx)?);
            }
            Ok(counts)
        })?;

    Ok(compute_funnel_report(funnel, &step_counts))
}

#[cfg(test)]
mod tests {
    use veilstat_core::analytics::{FunnelStep, MatchOperator, StepType};

    use super::build_funnel_query;

    fn steps() -> Vec<FunnelStep> {
        vec![
            FunnelStep {
                step_order: 1,
                label: "Pricing".to_string(),
                step_type: StepType::PageView,
                match_value: "/pricing".to_string(),
                match_operator: MatchOperator::Equals,
            },
            FunnelStep {
                step_order: 2,
                label: "Signup".to_string(),
                step_type: StepType::Event,
                match_value: "signup".to_string(),
                match_operator: MatchOperator::Contains,
            },
        ]
    }

    #[test]
    fn funnel_query_chains_steps_by_visitor() {
        let (sql, next_idx) = build_funnel_query(&steps(), "", 2);
        assert!(sql.contains("step_1 AS"));
        assert!(sql.contains("JOIN step_1 prev ON prev.visitor_id = e.visitor_id"));
        assert!(sql.contains("e.created_at >= prev.matched_at"));
        assert!(sql.contains("e.path = ?2"));
        assert!(sql.contains("position(?3 in e.event_name) > 0"));
        assert!(sql.contains("step_2_count"));
        assert_eq!(next_idx, 4);
    }
}
