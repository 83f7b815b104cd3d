use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;

use veilstat_core::analytics::{
    Funnel, FunnelStep, MatchOperator, PropertyDefinition, PropertyOperation, StepType,
};
use veilstat_core::ingest::is_valid_property_key;
use veilstat_metadata::{Site, SiteConfigProvider};

use crate::DuckDbBackend;

const MAX_FUNNEL_STEPS: usize = 8;

/// One step of a funnel being created. `label` defaults to `match_value`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFunnelStep {
    pub step_type: StepType,
    pub match_value: String,
    #[serde(default)]
    pub match_operator: Option<MatchOperator>,
    #[serde(default)]
    pub label: Option<String>,
}

fn generate_funnel_id() -> String {
    let mut rng = rand::thread_rng();
    let chars: String = (0..21)
        .map(|_| {
            let idx = rng.gen_range(0..36);
            if idx < 10 {
                (b'0' + idx) as char
            } else {
                (b'a' + idx - 10) as char
            }
        })
        .collect();
    format!("fun_{}", chars)
}

fn step_type_to_str(step_type: &StepType) -> &'static str {
    match step_type {
        StepType::PageView => "page_view",
        StepType::Event => "event",
    }
}

fn step_type_from_str(raw: &str) -> Result<StepType> {
    match raw {
        "page_view" => Ok(StepType::PageView),
        "event" => Ok(StepType::Event),
        _ => Err(anyhow!("invalid step_type: {raw}")),
    }
}

fn match_op_to_str(op: &MatchOperator) -> &'static str {
    match op {
        MatchOperator::Equals => "equals",
        MatchOperator::Contains => "contains",
    }
}

fn match_op_from_str(raw: &str) -> Result<MatchOperator> {
    match raw {
        "equals" => Ok(MatchOperator::Equals),
        "contains" => Ok(MatchOperator::Contains),
        _ => Err(anyhow!("invalid match_operator: {raw}")),
    }
}

fn validate_steps(steps: &[CreateFunnelStep]) -> Result<()> {
    if !(1..=MAX_FUNNEL_STEPS).contains(&steps.len()) {
        return Err(anyhow!("validation_error:steps"));
    }
    for step in steps {
        if step.match_value.trim().is_empty() || step.match_value.len() > 500 {
            return Err(anyhow!("validation_error:match_value"));
        }
        if let Some(label) = &step.label {
            if label.trim().is_empty() || label.len() > 120 {
                return Err(anyhow!("validation_error:label"));
            }
        }
    }
    Ok(())
}

fn load_funnel_steps(conn: &duckdb::Connection, funnel_id: &str) -> Result<Vec<FunnelStep>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT step_order, step_type, match_value, match_operator, label
        FROM funnel_steps
        WHERE funnel_id = ?1
        ORDER BY step_order ASC
        "#,
    )?;
    let rows = stmt.query_map(duckdb::params![funnel_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut steps = Vec::new();
    for row in rows {
        let (step_order, step_type, match_value, match_operator, label) = row?;
        steps.push(FunnelStep {
            step_order: step_order as u32,
            label,
            step_type: step_type_from_str(&step_type)?,
            match_value,
            match_operator: match_op_from_str(&match_operator)?,
        });
    }
    Ok(steps)
}

impl DuckDbBackend {
    /// Register a site, or reactivate it if it already exists.
    pub async fn seed_site(&self, id: &str, domain: &str) -> Result<Site> {
        {
            let conn = self.conn.lock().await;
            conn.execute(
                r#"INSERT INTO sites (id, name, domain, active)
                   VALUES (?1, ?2, ?3, TRUE)
                   ON CONFLICT (id) DO UPDATE SET domain = excluded.domain, active = TRUE"#,
                duckdb::params![id, id, domain],
            )?;
        }
        self.get_site(id)
            .await?
            .ok_or_else(|| anyhow!("site {id} missing after insert"))
    }

    /// Returns `false` when no such site exists.
    pub async fn set_site_active(&self, id: &str, active: bool) -> Result<bool> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE sites SET active = ?1 WHERE id = ?2",
            duckdb::params![active, id],
        )?;
        Ok(updated > 0)
    }

    pub async fn get_site(&self, id: &str) -> Result<Option<Site>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, domain, active, CAST(created_at AS VARCHAR) FROM sites WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(duckdb::params![id], |row| {
            Ok(Site {
                id: row.get(0)?,
                name: row.get(1)?,
                domain: row.get(2)?,
                active: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Declare (or redeclare) a custom property for a site.
    pub async fn declare_property(
        &self,
        site_id: &str,
        name: &str,
        operation: PropertyOperation,
    ) -> Result<PropertyDefinition> {
        if !is_valid_property_key(name) {
            return Err(anyhow!("validation_error:name"));
        }
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO property_definitions (site_id, name, operation)
               VALUES (?1, ?2, ?3)
               ON CONFLICT (site_id, name) DO UPDATE SET operation = excluded.operation"#,
            duckdb::params![site_id, name, operation.as_str()],
        )?;
        Ok(PropertyDefinition {
            name: name.to_string(),
            operation,
        })
    }

    pub async fn list_property_definitions(&self, site_id: &str) -> Result<Vec<PropertyDefinition>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT name, operation FROM property_definitions
               WHERE site_id = ?1
               ORDER BY name ASC"#,
        )?;
        let rows = stmt.query_map(duckdb::params![site_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut definitions = Vec::new();
        for row in rows {
            let (name, operation) = row?;
            let operation = PropertyOperation::parse(&operation)
                .ok_or_else(|| anyhow!("invalid operation {operation:?} for property {name}"))?;
            definitions.push(PropertyDefinition { name, operation });
        }
        Ok(definitions)
    }

    pub async fn create_funnel(
        &self,
        site_id: &str,
        name: &str,
        steps: Vec<CreateFunnelStep>,
    ) -> Result<Funnel> {
        if name.trim().is_empty() || name.len() > 100 {
            return Err(anyhow!("validation_error:name"));
        }
        validate_steps(&steps)?;

        let funnel_id = generate_funnel_id();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO funnels (id, site_id, name) VALUES (?1, ?2, ?3)",
            duckdb::params![funnel_id, site_id, name.trim()],
        )?;

        let mut stored = Vec::with_capacity(steps.len());
        for (idx, step) in steps.into_iter().enumerate() {
            let step_order = idx as u32 + 1;
            let match_operator = step.match_operator.unwrap_or_default();
            let label = step.label.unwrap_or_else(|| step.match_value.clone());
            tx.execute(
                r#"INSERT INTO funnel_steps
                   (funnel_id, step_order, step_type, match_value, match_operator, label)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                duckdb::params![
                    funnel_id,
                    step_order as i64,
                    step_type_to_str(&step.step_type),
                    step.match_value,
                    match_op_to_str(&match_operator),
                    label,
                ],
            )?;
            stored.push(FunnelStep {
                step_order,
                label,
                step_type: step.step_type,
                match_value: step.match_value,
                match_operator,
            });
        }
        tx.commit()?;

        Ok(Funnel {
            id: funnel_id,
            site_id: site_id.to_string(),
            name: name.trim().to_string(),
            steps: stored,
        })
    }

    pub async fn list_funnels(&self, site_id: &str) -> Result<Vec<Funnel>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT id, name FROM funnels
               WHERE site_id = ?1
               ORDER BY created_at ASC, id ASC"#,
        )?;
        let rows = stmt.query_map(duckdb::params![site_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut funnels = Vec::new();
        for row in rows {
            let (id, name) = row?;
            let steps = load_funnel_steps(&conn, &id)?;
            funnels.push(Funnel {
                id,
                site_id: site_id.to_string(),
                name,
                steps,
            });
        }
        Ok(funnels)
    }

    pub async fn get_funnel(&self, site_id: &str, funnel_id: &str) -> Result<Option<Funnel>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT id, name FROM funnels WHERE id = ?1 AND site_id = ?2")?;
        let mut rows = stmt.query_map(duckdb::params![funnel_id, site_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let Some(row) = rows.next() else {
            return Ok(None);
        };
        let (id, name) = row?;
        let steps = load_funnel_steps(&conn, &id)?;
        Ok(Some(Funnel {
            id,
            site_id: site_id.to_string(),
            name,
            steps,
        }))
    }
}

#[async_trait]
impl SiteConfigProvider for DuckDbBackend {
    async fn get_site(&self, site_id: &str) -> Result<Option<Site>> {
        DuckDbBackend::get_site(self, site_id).await
    }

    async fn list_property_definitions(&self, site_id: &str) -> Result<Vec<PropertyDefinition>> {
        DuckDbBackend::list_property_definitions(self, site_id).await
    }

    async fn list_funnels(&self, site_id: &str) -> Result<Vec<Funnel>> {
        DuckDbBackend::list_funnels(self, site_id).await
    }

    async fn get_funnel(&self, site_id: &str, funnel_id: &str) -> Result<Option<Funnel>> {
        DuckDbBackend::get_funnel(self, site_id, funnel_id).await
    }
}
