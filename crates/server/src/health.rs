use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use reimburse_db::{connection::ping, DbPool};
use reimburse_workflow::SettlementIntake;
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    intake: SettlementIntake,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueCheck {
    pub status: &'static str,
    pub queue_len: usize,
    pub capacity: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub settlement: QueueCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, intake: SettlementIntake) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, intake })
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    db_pool: DbPool,
    intake: SettlementIntake,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(event_name = "system.health.start", bind_address = %address, "health endpoint started");

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(db_pool, intake)).await {
            error!(
                event_name = "system.health.error",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

/// Ready while the database answers and the settlement worker still accepts
/// jobs. A full queue is reported but does not degrade readiness.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let settlement = queue_check(&state.intake);
    let ready = database.status == "ready" && settlement.status != "stopped";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        settlement,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match ping(pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

fn queue_check(intake: &SettlementIntake) -> QueueCheck {
    let queue_len = intake.queue_len();
    let capacity = intake.capacity();
    let status = if intake.is_closed() {
        "stopped"
    } else if queue_len >= capacity {
        "saturated"
    } else {
        "ready"
    };
    QueueCheck { status, queue_len, capacity }
}
