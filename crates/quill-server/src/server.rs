use std::{net::SocketAddr, sync::Arc, time::Duration};

use color_eyre::Result;
use quill_ratelimit::FallbackRateLimitStore;
use tokio::{net::TcpListener, signal::ctrl_c, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{routes::build_router, storage::Services};

/// How often stale in-process windows are dropped.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub async fn serve(services: Services, addr: SocketAddr) -> Result<()> {
    let sweeper = spawn_window_sweeper(services.rate_limits.clone(), SWEEP_INTERVAL);
    let app = build_router(services.state);

    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "quill listening");

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    sweeper.abort();
    info!("server stopped");
    Ok(served?)
}

/// Periodically evict expired windows from the in-process counters.
pub fn spawn_window_sweeper(store: Arc<FallbackRateLimitStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.local().evict_expired() {
                Ok(0) => {}
                Ok(evicted) => debug!(evicted, "evicted expired rate limit windows"),
                Err(err) => warn!(error = %err, "rate limit window sweep failed"),
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("received Ctrl+C, shutting down"),
            Err(err) => {
                error!(error = %err, "failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(err) => {
                error!(error = %err, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
