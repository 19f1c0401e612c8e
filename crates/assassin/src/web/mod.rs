//! Web layer module
//!
//! The administrative HTTP surface: CRUD over task definitions, listings of
//! execution records and a health check. Handlers are thin and talk to the
//! repositories directly; the scheduler picks changes up on its next
//! reconciliation pass.

use anyhow::{Result, anyhow};
use axum::{
    Router,
    routing::get,
};
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::WebConfig;
use crate::database::Database;
use crate::database::repositories::{ExecuteTaskSeaOrmRepository, TaskSeaOrmRepository};
use crate::drain::DrainHandle;
use crate::trigger::TriggerCompiler;

pub mod handlers;
pub mod responses;

pub use responses::{ApiResponse, ErrorBody, Page};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub tasks: TaskSeaOrmRepository,
    pub executions: ExecuteTaskSeaOrmRepository,
    pub compiler: TriggerCompiler,
    pub drain: DrainHandle,
    pub default_page_size: u64,
}

impl AppState {
    pub fn new(
        database: Database,
        compiler: TriggerCompiler,
        drain: DrainHandle,
        default_page_size: u64,
    ) -> Self {
        let connection = database.connection();
        Self {
            tasks: TaskSeaOrmRepository::new(connection.clone()),
            executions: ExecuteTaskSeaOrmRepository::new(connection),
            database,
            compiler,
            drain,
            default_page_size,
        }
    }
}

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(config: &WebConfig, state: AppState) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
        Ok(Self {
            app: Self::router(state),
            addr,
        })
    }

    /// Create the router with all routes and middleware
    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(handlers::health::health_check))
            .nest("/assassin", Self::admin_routes())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    fn admin_routes() -> Router<AppState> {
        Router::new()
            .route("/tasks", get(handlers::tasks::list_tasks))
            .route(
                "/task",
                get(handlers::tasks::get_task)
                    .post(handlers::tasks::create_task)
                    .put(handlers::tasks::update_task),
            )
            .route("/sub_tasks", get(handlers::tasks::list_sub_tasks))
    }

    /// Serve until `cancellation_token` fires, reporting bind success or
    /// failure through `ready_signal`
    pub async fn serve_with_cancellation(
        self,
        ready_signal: oneshot::Sender<Result<()>>,
        cancellation_token: CancellationToken,
    ) -> Result<()> {
        let listener = match tokio::net::TcpListener::bind(&self.addr).await {
            Ok(listener) => listener,
            Err(bind_error) => {
                let message = format!("Failed to bind to {}: {}", self.addr, bind_error);
                let _ = ready_signal.send(Err(anyhow!("{}", message)));
                return Err(anyhow!(message));
            }
        };
        let _ = ready_signal.send(Ok(()));

        let shutdown_signal = async move {
            cancellation_token.cancelled().await;
            info!("Web server received cancellation signal, shutting down gracefully");
        };

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal)
            .await?;
        Ok(())
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}
