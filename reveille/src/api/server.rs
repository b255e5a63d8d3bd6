//! API server setup and shared handler state.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

use super::v0;
use crate::error::Error;
use crate::hub::Hub;
use crate::scheduler::SchedulerHandle;
use crate::sequencer::{DispatchError, Sequencer};
use crate::status::StatusReporter;
use crate::store::{AlarmStore, StoreError};
use crate::tracing::prelude::*;

#[derive(OpenApi)]
#[openapi(info(
    title = "Reveille API",
    description = "Control and status of the wake-up alarm service"
))]
struct ApiDoc;

/// Handles to the running service, cloned into every handler.
#[derive(Clone)]
pub struct SharedState {
    pub store: Arc<AlarmStore>,
    pub sequencer: Sequencer,
    pub scheduler: SchedulerHandle,
    pub status: StatusReporter,
    pub hub: Arc<dyn Hub>,
}

/// Build the full application router.
pub fn router(state: SharedState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .nest("/api/v0", v0::routes())
        .split_for_parts();

    router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `listen` until `running` is cancelled.
pub async fn serve(
    listen: SocketAddr,
    state: SharedState,
    running: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding API listener on {listen}"))?;
    info!(address = %listener.local_addr()?, "API server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { running.cancelled().await })
        .await
        .context("API server")?;

    debug!("API server stopped");
    Ok(())
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Error::Store(StoreError::Invalid(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Dispatch(DispatchError::NotFound(_)) => StatusCode::NOT_FOUND,
            Error::Dispatch(DispatchError::Busy { .. }) | Error::Conflict(_) => {
                StatusCode::CONFLICT
            }
            Error::Scheduler(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Hub(_) => StatusCode::BAD_GATEWAY,
            Error::Store(_) | Error::Config(_) | Error::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!(error = %self, "API request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
