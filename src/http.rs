//! HTTP surface: routing, handlers and error responses.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use derive_more::derive::From;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::{api, metrics, ticket};

pub type SharedAppState = Arc<AppState>;

pub struct AppState {
    pub writer: ticket::Writer,
    pub metrics: metrics::Aggregator,
}

pub fn router(state: SharedAppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/tickets", post(create_ticket))
        .route("/api/v1/dashboard/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn failure(
    status: StatusCode,
    error: impl ToString,
    stage: Option<ticket::Stage>,
) -> Response {
    let body = api::Failure {
        error: error.to_string(),
        stage: stage.map(|s| s.to_string()),
    };
    (status, Json(body)).into_response()
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn create_ticket(
    State(state): State<SharedAppState>,
    payload: Result<Json<api::NewTicket>, JsonRejection>,
) -> Result<(StatusCode, Json<api::ticket::Created>), CreateTicketError> {
    let Json(payload) = payload?;
    let input = ticket::NewTicket::try_from(payload)
        .map_err(ticket::Error::from)?;
    let customer_name = input.customer.name.clone();

    let ticket = state.writer.create(input).await?;

    Ok((
        StatusCode::CREATED,
        Json(api::ticket::Created {
            ticket_id: ticket.id,
            customer_name,
            status: ticket.status,
            subtotal: ticket.subtotal,
            total_discount: ticket.total_discount,
            total_cost: ticket.total_cost,
        }),
    ))
}

#[derive(Debug, From)]
pub enum CreateTicketError {
    #[from]
    Payload(JsonRejection),
    #[from]
    Ticket(ticket::Error),
}

impl IntoResponse for CreateTicketError {
    fn into_response(self) -> Response {
        use ticket::Error as E;

        let e = match self {
            Self::Payload(e) => {
                return failure(StatusCode::BAD_REQUEST, e.body_text(), None)
            }
            Self::Ticket(e) => e,
        };

        let status = match &e {
            E::Validation(_) => StatusCode::BAD_REQUEST,
            E::Conflict { .. } => StatusCode::CONFLICT,
            E::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            E::Persistence { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        match &e {
            E::Validation(_) => {}
            E::Conflict { source, .. } | E::Persistence { source, .. } => {
                error!(error = %e, cause = %source, "ticket not created");
            }
            E::Timeout(_) => warn!(error = %e, "ticket not created"),
        }
        failure(status, &e, e.stage())
    }
}

async fn get_metrics(
    State(state): State<SharedAppState>,
) -> Result<Json<api::Metrics>, GetMetricsError> {
    Ok(Json(state.metrics.collect().await?.into()))
}

#[derive(Debug, From)]
pub struct GetMetricsError(metrics::Error);

impl IntoResponse for GetMetricsError {
    fn into_response(self) -> Response {
        use metrics::Error as E;

        let Self(e) = self;
        error!(error = %e, "dashboard metrics unavailable");
        match &e {
            E::Timeout(_) => failure(StatusCode::GATEWAY_TIMEOUT, &e, None),
            E::Query { metric, .. } | E::Incomplete(metric) => failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to compute {metric}"),
                None,
            ),
            E::Task(_) => failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to compute metrics",
                None,
            ),
        }
    }
}
