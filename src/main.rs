//! Tradegate binary.
//!
//! Starts the REST server over a freshly constructed `Core`.
//!
//! # Environment Variables
//!
//! - `ENV`: dev | paper | live
//! - `BROKER_HOST` / `BROKER_PORT` / `BROKER_CLIENT_ID`: brokerage gateway
//! - `READONLY_MODE`: fail broker writes locally
//! - `KILL_SWITCH_ENABLED` / `KILL_SWITCH_REASON`: force-activate the halt
//! - `AUTO_APPROVAL` / `AUTO_APPROVAL_MAX_NOTIONAL`: auto-approval policy
//! - `RISK_POLICY_PATH`: YAML risk policy document
//! - `DATABASE_URL`: data directory for persisted state
//! - `LOG_LEVEL`: tracing filter
//!
//! Exits 0 on normal shutdown, non-zero on unrecoverable init failure.

use std::process::ExitCode;
use std::sync::Arc;

use tradegate::config::Settings;
use tradegate::scheduler::{ExportJobConfig, ExportScheduler};
use tradegate::server::create_router;
use tradegate::telemetry::init_telemetry;
use tradegate::Core;

#[tokio::main]
async fn main() -> ExitCode {
    let _telemetry = init_telemetry();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::from(2);
        }
    };
    let http_addr = settings.http_addr.clone();
    tracing::info!(
        environment = %settings.environment,
        broker = %settings.broker_base_url(),
        read_only = settings.flags.read_only,
        "starting tradegate"
    );

    let core = match Core::build(settings) {
        Ok(core) => core,
        Err(e) => {
            tracing::error!(error = %e, "core initialization failed");
            return ExitCode::from(1);
        }
    };

    // Export jobs are optional: a missing file means no scheduled exports.
    let jobs_path = core.settings.data_dir.join("export_jobs.yml");
    let jobs: Vec<ExportJobConfig> = if jobs_path.exists() {
        match std::fs::read_to_string(&jobs_path)
            .map_err(|e| e.to_string())
            .and_then(|content| serde_yaml::from_str(&content).map_err(|e| e.to_string()))
        {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(path = %jobs_path.display(), error = %e, "malformed export jobs file");
                return ExitCode::from(1);
            }
        }
    } else {
        Vec::new()
    };
    let scheduler = Arc::new(ExportScheduler::new(
        Arc::clone(&core.broker),
        Arc::clone(&core.audit),
        core.settings.data_dir.join("exports"),
        jobs,
    ));
    if let Err(e) = scheduler.start().await {
        tracing::error!(error = %e, "export scheduler failed to start");
        return ExitCode::from(1);
    }

    let listener = match tokio::net::TcpListener::bind(&http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %http_addr, error = %e, "cannot bind HTTP listener");
            return ExitCode::from(1);
        }
    };
    tracing::info!(addr = %http_addr, "REST surface listening");

    let router = create_router(core);
    let serve = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = serve.await {
        tracing::error!(error = %e, "server error");
        let _ = scheduler.stop(false).await;
        return ExitCode::from(1);
    }

    if let Err(e) = scheduler.stop(true).await {
        tracing::warn!(error = %e, "scheduler shutdown reported an error");
    }
    tracing::info!("shutdown complete");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("cannot listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
