use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use veilstat_server::state::AppState;

/// `veilstat health`: liveness probe for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$VEILSTAT_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("VEILSTAT_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }
    // Structured JSON logging. Level controlled via RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("veilstat=info".parse()?),
        )
        .json()
        .init();

    let cfg = veilstat_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/veilstat.db", cfg.data_dir);
    let db = veilstat_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?;

    // Seed a default site so the server is usable out of the box.
    if let Err(e) = db.seed_site("site_default", "localhost").await {
        tracing::warn!(error = %e, "Failed to seed default site");
    } else {
        info!("Default site 'site_default' (localhost) ready");
    }

    if cfg.api_token.is_none() {
        info!("VEILSTAT_API_TOKEN not set: dashboard routes open, admin routes disabled");
    }

    let state = Arc::new(AppState::new(db, cfg.clone()));

    // Make sure a salt exists before the first event arrives.
    if let Err(e) = state.salts.current_salt().await {
        tracing::error!(error = %e, "Initial salt could not be established");
    }

    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            state.run_salt_maintenance_loop().await;
        });
    }

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = veilstat_server::app::build_app(Arc::clone(&state));

    info!(port = cfg.port, "Veilstat listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::signal::ctrl_c().await.ok();
    })
    .await?;

    Ok(())
}
