/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// `memory_limit` comes from `Config.duckdb_memory_limit`
/// (env `VEILSTAT_DUCKDB_MEMORY`, default `"1GB"`). The DuckDB default of
/// 80% of system RAM is not acceptable for a server process.
///
/// Extension downloads are disabled: the `json` extension is compiled in,
/// and self-hosted deployments often have no egress.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;
SET autoinstall_known_extensions = false;

-- ===========================================
-- SALTS
-- ===========================================
-- One row per slot; only the 'current' slot is used. Rows are replaced
-- wholesale by a conditional UPDATE, never edited in place.
CREATE TABLE IF NOT EXISTS salts (
    slot            VARCHAR PRIMARY KEY,
    value           VARCHAR NOT NULL,              -- 32-byte random hex
    created_at      TIMESTAMP NOT NULL,
    expires_at      TIMESTAMP NOT NULL
);

-- ===========================================
-- SITES
-- ===========================================
CREATE TABLE IF NOT EXISTS sites (
    id              VARCHAR PRIMARY KEY,
    name            VARCHAR NOT NULL,
    domain          VARCHAR NOT NULL,
    active          BOOLEAN NOT NULL DEFAULT TRUE,
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- ===========================================
-- DECLARED CUSTOM PROPERTIES
-- ===========================================
CREATE TABLE IF NOT EXISTS property_definitions (
    site_id         VARCHAR NOT NULL,
    name            VARCHAR NOT NULL,
    operation       VARCHAR NOT NULL,              -- 'sum' | 'average' | 'count'
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (site_id, name)
);

-- ===========================================
-- FUNNELS
-- ===========================================
CREATE TABLE IF NOT EXISTS funnels (
    id              VARCHAR PRIMARY KEY,
    site_id         VARCHAR NOT NULL,
    name            VARCHAR NOT NULL,
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_funnels_site
    ON funnels(site_id);

CREATE TABLE IF NOT EXISTS funnel_steps (
    funnel_id       VARCHAR NOT NULL,
    step_order      INTEGER NOT NULL,
    step_type       VARCHAR NOT NULL,              -- 'page_view' | 'event'
    match_value     VARCHAR NOT NULL,
    match_operator  VARCHAR NOT NULL DEFAULT 'equals',
    label           VARCHAR NOT NULL,
    PRIMARY KEY (funnel_id, step_order)
);

-- ===========================================
-- EVENTS (append-only)
-- ===========================================
CREATE TABLE IF NOT EXISTS events (
    id              VARCHAR NOT NULL,              -- UUID v4
    site_id         VARCHAR NOT NULL,
    visitor_id      VARCHAR NOT NULL,              -- salted pseudo-identity, 16 hex chars
    event_type      VARCHAR NOT NULL,              -- 'pageview' | 'event'
    event_name      VARCHAR,
    path            VARCHAR NOT NULL,
    useragent       VARCHAR,
    properties      VARCHAR,                       -- JSON object of scalars (nullable)
    created_at      TIMESTAMP NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_site_time
    ON events(site_id, created_at);
CREATE INDEX IF NOT EXISTS idx_events_site_type_time
    ON events(site_id, event_type, created_at);
CREATE INDEX IF NOT EXISTS idx_events_site_visitor
    ON events(site_id, visitor_id, created_at);
"#
    )
}
