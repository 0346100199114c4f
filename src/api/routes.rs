//! API route handlers.
//!
//! All endpoints return JSON. Errors use `{ "error": CODE, "message": ... }`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

use crate::engine::retry::RetryItem;
use crate::engine::RoundScheduler;
use crate::ledger::LedgerEntry;
use crate::types::{GameError, HistoryEntry, Outcome, Round, RoundStatus, Wager};

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct ApiState {
    pub scheduler: Arc<RoundScheduler>,
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(scheduler: Arc<RoundScheduler>) -> Self {
        Self {
            scheduler,
            started_at: Utc::now(),
        }
    }
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("participant_id must not be empty")]
    InvalidParticipant,

    #[error(transparent)]
    Game(#[from] GameError),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidParticipant => "INVALID_PARTICIPANT",
            ApiError::Game(e) => e.code(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidParticipant => StatusCode::BAD_REQUEST,
            ApiError::Game(GameError::NoActiveRound) => StatusCode::CONFLICT,
            ApiError::Game(GameError::InvalidStake(_) | GameError::InvalidOutcome(_)) => StatusCode::BAD_REQUEST,
            ApiError::Game(GameError::InsufficientFunds { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Game(GameError::LedgerUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Body of `POST /api/wagers`. Fields default so that missing values are
/// reported with the game's own error codes.
#[derive(Debug, Deserialize)]
pub struct PlaceWagerRequest {
    #[serde(default)]
    pub participant_id: String,
    #[serde(default)]
    pub outcome: String,
    /// Number or decimal string.
    #[serde(default)]
    pub stake: Value,
}

#[derive(Debug, Serialize)]
pub struct RoundView {
    pub number: u64,
    pub status: RoundStatus,
    pub opened_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub seconds_remaining: i64,
}

impl RoundView {
    fn at(round: &Round, now: DateTime<Utc>) -> Self {
        Self {
            number: round.number,
            status: round.status,
            opened_at: round.opened_at,
            closes_at: round.closes_at,
            seconds_remaining: round.time_remaining(now).num_seconds(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RoundResponse {
    pub round: Option<RoundView>,
    pub next_round_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub participant_id: String,
    pub balance: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub pending: Vec<RetryItem>,
    pub escalated: Vec<RetryItem>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: i64,
    pub current_round: Option<u64>,
}

/// Parse a stake given as a JSON number or a decimal string.
pub fn parse_stake(value: &Value) -> Result<Decimal, GameError> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        Value::Null => return Err(GameError::InvalidStake("stake is required".into())),
        other => return Err(GameError::InvalidStake(format!("expected a number, got {other}"))),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| GameError::InvalidStake(format!("'{text}' is not a number")))
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        current_round: state.scheduler.current_round().map(|r| r.number),
    })
}

/// GET /api/round
pub async fn get_round(State(state): State<AppState>) -> Json<RoundResponse> {
    let now = Utc::now();
    Json(RoundResponse {
        round: state.scheduler.current_round().map(|r| RoundView::at(&r, now)),
        next_round_at: state.scheduler.next_round_at(),
    })
}

/// POST /api/wagers
pub async fn place_wager(
    State(state): State<AppState>,
    Json(req): Json<PlaceWagerRequest>,
) -> Result<(StatusCode, Json<Wager>), ApiError> {
    let participant = req.participant_id.trim();
    if participant.is_empty() {
        return Err(ApiError::InvalidParticipant);
    }

    let stake = parse_stake(&req.stake);
    let outcome = Outcome::from_str(&req.outcome);
    let (stake, outcome) = match (stake, outcome) {
        (Ok(stake), Ok(outcome)) => (stake, outcome),
        // Keep the game's check order: a closed window beats bad input.
        (stake, outcome) => {
            if state.scheduler.current_round().is_none() {
                return Err(GameError::NoActiveRound.into());
            }
            stake?;
            return Err(outcome.err().unwrap_or(GameError::InvalidOutcome(req.outcome)).into());
        }
    };

    let wager = state.scheduler.place_wager(participant, outcome, stake)?;
    Ok((StatusCode::CREATED, Json(wager)))
}

/// GET /api/balance/:participant
pub async fn get_balance(
    State(state): State<AppState>,
    Path(participant): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.scheduler.balance(&participant)?;
    Ok(Json(BalanceResponse {
        participant_id: participant,
        balance,
    }))
}

/// GET /api/rounds?limit=n
pub async fn get_rounds(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<HistoryEntry>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT);
    Json(state.scheduler.recent_rounds(limit))
}

/// GET /api/participants/:participant/wagers
pub async fn get_wagers(State(state): State<AppState>, Path(participant): Path<String>) -> Json<Vec<Wager>> {
    Json(state.scheduler.wagers_for(&participant))
}

/// GET /api/participants/:participant/entries
pub async fn get_entries(
    State(state): State<AppState>,
    Path(participant): Path<String>,
) -> Json<Vec<LedgerEntry>> {
    Json(state.scheduler.ledger_entries(&participant))
}

/// GET /api/settlement/alerts
pub async fn get_alerts(State(state): State<AppState>) -> Json<AlertsResponse> {
    Json(AlertsResponse {
        pending: state.scheduler.pending_retries(),
        escalated: state.scheduler.settlement_alerts(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
