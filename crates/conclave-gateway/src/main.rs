use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{error, info};

use conclave_core::config::ConclaveConfig;
use conclave_memory::types::CleanupOptions;

use conclave_gateway::{app, shutdown, startup};

/// Cleanup cadence for the memory lifecycle job.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(24 * 3600);
/// Age past which low-importance memories become eviction candidates.
const MAINTENANCE_MAX_AGE_MS: i64 = 30 * 24 * 3600 * 1000;
const MAINTENANCE_MIN_IMPORTANCE: f32 = 0.3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conclave_gateway=info,conclave=info,tower_http=warn".into()),
        )
        .init();

    // Panics in spawned tasks are caught by the runtime; this hook makes
    // sure they land in the log with a backtrace instead of stderr noise.
    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        error!(panic = %info, backtrace = %backtrace, "panic captured");
    }));

    let config_path = std::env::var("CONCLAVE_CONFIG").ok();
    let config = match ConclaveConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration load failed");
            return fatal(e.into()).await;
        }
    };

    let listener = match startup::validate_boot(&config).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "startup validation failed");
            return fatal(e).await;
        }
    };
    let provider = startup::select_provider(&config)?;

    let state = app::build_state(config, provider).await?;
    spawn_maintenance(&state);

    let router = app::build_router(state.clone());
    let service = router.into_make_service_with_connect_info::<SocketAddr>();

    info!(
        bots = ?state.orchestrator.bot_names(),
        provider = %state.provider_name,
        "conclave gateway listening"
    );

    let signal_state = state.clone();
    axum::serve(listener, service)
        .with_graceful_shutdown(async move {
            shutdown::wait_for_signal().await;
            // Readiness flips immediately so the load balancer drains us
            // while in-flight requests finish.
            signal_state.ready.store(false, Ordering::Release);
        })
        .await?;

    shutdown::run_graceful(&state).await;
    Ok(())
}

/// Daily lifecycle pass: age + importance + per-user cap eviction.
fn spawn_maintenance(state: &std::sync::Arc<app::AppState>) {
    let state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
        ticker.tick().await; // immediate first tick is a no-op
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let options = CleanupOptions {
                        max_age_ms: Some(MAINTENANCE_MAX_AGE_MS),
                        min_importance: MAINTENANCE_MIN_IMPORTANCE,
                        max_per_user: Some(state.config.memory.max_vectors_per_user),
                    };
                    let report = state.memory.cleanup(&options);
                    if let Ok(report) = report.into_result() {
                        info!(removed = report.removed, kept = report.kept, "maintenance cleanup ran");
                    }
                }
            }
        }
    });
}

/// Fatal boot error: give the log appender a moment to flush, then exit
/// non-zero.
async fn fatal(e: anyhow::Error) -> anyhow::Result<()> {
    tokio::time::sleep(Duration::from_secs(1)).await;
    Err(e)
}
