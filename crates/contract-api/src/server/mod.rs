use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::Method;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use contract_kernel::{Catalog, CatalogError, CityModel, CitySession, GoalRegistry};
use contracts::{
    ApiError, Command, CommandPayload, CommandResult, ContractEvent, ContractEventType,
    ContractView, ErrorCode, SessionConfig, SessionStatus, SCHEMA_VERSION_V1,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    default_sqlite_path, ContractApi, PersistedCommandEntry, PersistedSessionSummary,
    PersistenceError,
};

const DEFAULT_PAGE_SIZE: usize = 500;
const MAX_PAGE_SIZE: usize = 5000;

include!("error.rs");
include!("state.rs");
include!("routes/sessions.rs");
include!("routes/contracts.rs");
include!("util.rs");

pub async fn serve(addr: SocketAddr) -> Result<(), ServerError> {
    let state = AppState::new();
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "contract api listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/sessions", post(create_session).get(list_sessions))
        .route("/api/v1/sessions/{session_id}/resume", post(resume_session))
        .route("/api/v1/sessions/{session_id}/status", get(get_status))
        .route("/api/v1/sessions/{session_id}/save", post(save_session))
        .route(
            "/api/v1/sessions/{session_id}/commands",
            post(submit_command).get(get_commands),
        )
        .route("/api/v1/sessions/{session_id}/events", get(get_events))
        .route(
            "/api/v1/sessions/{session_id}/contracts/active",
            get(get_active_contracts),
        )
        .route(
            "/api/v1/sessions/{session_id}/contracts/available",
            get(get_available_contracts),
        )
        .route(
            "/api/v1/sessions/{session_id}/contracts/almost_available",
            get(get_almost_available_contracts),
        )
        .route(
            "/api/v1/sessions/{session_id}/contracts/{contract_id}/accept",
            post(accept_contract),
        )
        .route(
            "/api/v1/sessions/{session_id}/contracts/{contract_id}/cancel",
            post(cancel_contract),
        )
        .route(
            "/api/v1/sessions/{session_id}/contracts/{contract_id}/next_action",
            get(get_next_action),
        )
        .layer(middleware::from_fn(cors_middleware))
        .with_state(state)
}

async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}
