use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use zakazi::engine::{Engine, SweepOptions};
use zakazi::limits::DEFAULT_RETENTION_DAYS;
use zakazi::notify::NotifyHub;
use zakazi::{reaper, wire};

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = env_parse("ZAKAZI_METRICS_PORT");
    zakazi::observability::init(metrics_port);

    let port = std::env::var("ZAKAZI_PORT").unwrap_or_else(|_| "5433".into());
    let bind = std::env::var("ZAKAZI_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("ZAKAZI_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let password = std::env::var("ZAKAZI_PASSWORD").unwrap_or_else(|_| "zakazi".into());
    let max_connections: usize = env_parse("ZAKAZI_MAX_CONNECTIONS").unwrap_or(256);
    let compact_threshold: u64 = env_parse("ZAKAZI_COMPACT_THRESHOLD").unwrap_or(1000);
    let retention_days: u32 = env_parse("ZAKAZI_RETENTION_DAYS").unwrap_or(DEFAULT_RETENTION_DAYS);
    let sweep_interval_secs: u64 = env_parse("ZAKAZI_SWEEP_INTERVAL_SECS").unwrap_or(60);
    let sweep_dry_run = std::env::var("ZAKAZI_SWEEP_DRY_RUN").is_ok_and(|v| v == "1");

    let tls_cert = std::env::var("ZAKAZI_TLS_CERT").ok();
    let tls_key = std::env::var("ZAKAZI_TLS_KEY").ok();
    let tls_acceptor = zakazi::tls::load_tls_acceptor(tls_cert.as_deref(), tls_key.as_deref())?;

    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("zakazi.wal");

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(&wal_path, retention_days, notify)?);

    let reaper_engine = engine.clone();
    tokio::spawn(async move {
        reaper::run_reaper(
            reaper_engine,
            Duration::from_secs(sweep_interval_secs),
            SweepOptions {
                dry_run: sweep_dry_run,
                ..SweepOptions::default()
            },
        )
        .await;
    });
    let compactor_engine = engine.clone();
    tokio::spawn(async move {
        reaper::run_compactor(compactor_engine, compact_threshold).await;
    });

    let semaphore = Arc::new(Semaphore::new(max_connections));
    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("zakazi listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  retention: {retention_days} days");
    info!("  max_connections: {max_connections}");
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(zakazi::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(zakazi::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(zakazi::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();
                let pw = password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, engine, pw, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(zakazi::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    info!("zakazi stopped");
    Ok(())
}
