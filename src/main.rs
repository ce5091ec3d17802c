use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use centerbook::config::{server_setting, EngineConfig};
use centerbook::engine::{Engine, InMemoryStore};
use centerbook::forward::{self, LogSink};
use centerbook::wire;

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let env = |key: &str| std::env::var(key).ok();
    let metrics_port: Option<u16> = server_setting("CENTERBOOK_METRICS_PORT", env);
    centerbook::observability::init(metrics_port);

    let port: u16 = server_setting("CENTERBOOK_PORT", env).unwrap_or(5433);
    let bind = std::env::var("CENTERBOOK_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let password = std::env::var("CENTERBOOK_PASSWORD").unwrap_or_else(|_| "centerbook".into());
    let max_connections: usize = server_setting("CENTERBOOK_MAX_CONNECTIONS", env).unwrap_or(256);

    let config = EngineConfig::from_env()?;
    let forward_interval = config.forward_interval;
    let forward_timeout = config.forward_timeout;
    info!(
        "workday {}-{}, buffer {} min, pending occupies: {}",
        config.workday.open,
        config.workday.close,
        config.buffer_minutes,
        config.occupancy.occupies(centerbook::model::BookingStatus::Pending)
    );

    let engine = Arc::new(Engine::new(Arc::new(InMemoryStore::new()), config));
    tokio::spawn(forward::run_forwarder(
        engine.clone(),
        Arc::new(LogSink),
        forward_interval,
        forward_timeout,
    ));

    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("centerbook listening on {addr}");
    info!("  max_connections: {max_connections}");
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Stop accepting on SIGTERM/ctrl-c, then drain in-flight connections.
    let shutdown = shutdown_signal();
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
                        metrics::counter!(centerbook::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(centerbook::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(centerbook::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();
                let pw = password.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, engine, pw).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(centerbook::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
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
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("centerbook stopped");
    Ok(())
}
