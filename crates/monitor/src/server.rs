use axum::Router;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::{routes::create_routes, AppState, Result};

/// Monitoring HTTP server. Binds eagerly so callers can learn the
/// effective address before serving (port 0 in tests).
pub struct MonitorServer {
    listener: TcpListener,
    app: Router,
}

impl MonitorServer {
    pub async fn bind(addr: SocketAddr, state: AppState) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let app = create_routes(state)
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(Duration::from_secs(10)));

        Ok(Self { listener, app })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(self) -> Result<()> {
        info!(addr = %self.listener.local_addr()?, "monitoring api listening");
        axum::serve(self.listener, self.app).await?;
        Ok(())
    }
}
