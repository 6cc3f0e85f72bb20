#![forbid(unsafe_code)]

use std::{
    env,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use stride_adapter::{AdapterHealthResponse, AdapterRuntime, TrackerEnvConfig};
use stride_kernel_contracts::ledger::{CalendarDate, UserId};
use stride_os::ledger_client::{LedgerRangeQueryEnvelope, LedgerRangeResultEnvelope, LedgerUpsertEnvelope};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bind = env::var("STRIDE_HTTP_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let addr: SocketAddr = bind.parse()?;
    let worker_interval_ms = parse_worker_interval_ms_from_env();

    let mut runtime = AdapterRuntime::default_from_env();
    let tracker_config = TrackerEnvConfig::from_env();
    let worker_enabled = if let Some(config) = tracker_config {
        let user_id = UserId::new(config.user_id.clone())
            .map_err(|v| format!("invalid STRIDE_TRACKER_USER: {v:?}"))?;
        match runtime.start_tracking(user_id, local_today()?, config.motion_source(), now_ns()) {
            Ok(platform) => {
                println!(
                    "stride_adapter_http tracking session started (user={} platform={})",
                    config.user_id,
                    platform.as_str()
                );
                true
            }
            Err(err) => {
                eprintln!("stride_adapter_http tracking session failed to start: {err:?}");
                false
            }
        }
    } else {
        false
    };

    let runtime = Arc::new(Mutex::new(runtime));
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    if worker_enabled {
        let runtime_for_worker = runtime.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(worker_interval_ms));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => {
                        if let Ok(mut runtime) = runtime_for_worker.lock() {
                            runtime.stop_tracking();
                        }
                        break;
                    }
                }
                let today = match local_today() {
                    Ok(today) => today,
                    Err(err) => {
                        eprintln!("stride_adapter_http worker pass skipped: {err}");
                        continue;
                    }
                };
                // A pass still holding the lock coalesces this tick.
                match runtime_for_worker.try_lock() {
                    Ok(mut runtime) => {
                        runtime.run_reconcile_worker_pass(now_ns(), today);
                    }
                    Err(std::sync::TryLockError::WouldBlock) => {}
                    Err(std::sync::TryLockError::Poisoned(_)) => {
                        eprintln!("stride_adapter_http worker pass failed: runtime lock poisoned");
                        break;
                    }
                }
            }
        });
    }

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/ledger/upsert", post(ledger_upsert))
        .route("/v1/ledger/range", post(ledger_range))
        .with_state(runtime);

    println!(
        "stride_adapter_http listening on http://{addr} (worker_enabled={worker_enabled} interval_ms={worker_interval_ms})"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;
    Ok(())
}

fn parse_worker_interval_ms_from_env() -> u64 {
    env::var("STRIDE_RECONCILE_INTERVAL_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| (1_000..=3_600_000).contains(v))
        .unwrap_or(60_000)
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}

fn local_today() -> Result<CalendarDate, String> {
    CalendarDate::from_naive(chrono::Local::now().date_naive())
        .map_err(|v| format!("local date outside supported range: {v:?}"))
}

async fn healthz(
    State(runtime): State<Arc<Mutex<AdapterRuntime>>>,
) -> (StatusCode, Json<AdapterHealthResponse>) {
    let mut runtime = match runtime.lock() {
        Ok(runtime) => runtime,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AdapterHealthResponse {
                    status: "error".to_string(),
                    ledger_mode: "unknown".to_string(),
                    tracker: None,
                    rollups: None,
                    worker: Default::default(),
                    reason: Some("adapter runtime lock poisoned".to_string()),
                }),
            );
        }
    };
    (StatusCode::OK, Json(runtime.health_report()))
}

async fn ledger_upsert(
    State(runtime): State<Arc<Mutex<AdapterRuntime>>>,
    Json(envelope): Json<LedgerUpsertEnvelope>,
) -> (StatusCode, Json<serde_json::Value>) {
    let mut runtime = match runtime.lock() {
        Ok(runtime) => runtime,
        Err(_) => return lock_poisoned(),
    };
    match runtime.handle_ledger_upsert(envelope, now_ns()) {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ok" })),
        ),
        Err(err) => {
            let code = if err.transient {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::BAD_REQUEST
            };
            (
                code,
                Json(serde_json::json!({ "status": "error", "reason": err.message })),
            )
        }
    }
}

async fn ledger_range(
    State(runtime): State<Arc<Mutex<AdapterRuntime>>>,
    Json(envelope): Json<LedgerRangeQueryEnvelope>,
) -> (StatusCode, Json<serde_json::Value>) {
    let mut runtime = match runtime.lock() {
        Ok(runtime) => runtime,
        Err(_) => return lock_poisoned(),
    };
    match runtime.handle_ledger_range(envelope) {
        Ok(result) => match serde_json::to_value::<LedgerRangeResultEnvelope>(result) {
            Ok(value) => (StatusCode::OK, Json(value)),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "status": "error", "reason": err.to_string() })),
            ),
        },
        Err(err) => {
            let code = if err.transient {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::BAD_REQUEST
            };
            (
                code,
                Json(serde_json::json!({ "status": "error", "reason": err.message })),
            )
        }
    }
}

fn lock_poisoned() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "status": "error", "reason": "adapter runtime lock poisoned" })),
    )
}
