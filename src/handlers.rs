/// HTTP 핸들러
/// 얇은 계층: 역직렬화 + 로깅 후 엔진/원장에 위임한다.
/// 도메인 오류는 ServiceError 의 IntoResponse 로 일관되게 내려간다.
// region:    --- Imports
use crate::auction::engine::{
    AuctionEngine, ConfigureAutoBidCommand, PlaceBidCommand, SettleTrigger,
};
use crate::auction::model::NewAuction;
use crate::auction::store::{PgAuctionStore, SettleOutcome};
use crate::database::DatabaseManager;
use crate::error::ServiceError;
use crate::escrow::ledger::{
    DepositCommand, EscrowLedger, MilestoneCommand, RefundCommand, ReleaseCommand,
};
use crate::escrow::model::Actor;
use crate::escrow::store::PgEscrowStore;
use crate::gateway::registry::RoomRegistry;
use crate::query;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

// endregion: --- Imports

// region:    --- App State

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseManager>,
    pub engine: Arc<AuctionEngine<PgAuctionStore>>,
    pub escrow: Arc<EscrowLedger<PgEscrowStore>>,
    pub registry: Arc<RoomRegistry>,
}

// endregion: --- App State

// region:    --- Auction Handlers

/// 경매 등록
pub async fn handle_create_auction(
    State(state): State<AppState>,
    Json(new): Json<NewAuction>,
) -> Result<impl IntoResponse, ServiceError> {
    info!("{:<12} --> 경매 등록 요청: {:?}", "Command", new);
    let auction = state.engine.create_auction(new).await?;
    Ok((StatusCode::CREATED, Json(auction)))
}

/// 진행 중 경매 목록
pub async fn handle_list_auctions(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let auctions = query::handlers::get_active_auctions(&state.db).await?;
    Ok(Json(auctions))
}

/// 경매 현재 상태 조회
pub async fn handle_get_auction(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    let snapshot = state.engine.snapshot(auction_id).await?;
    Ok(Json(snapshot))
}

/// 입찰 이력 조회
pub async fn handle_get_bids(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    let bids = query::handlers::get_bid_history(&state.db, auction_id).await?;
    Ok(Json(bids))
}

/// 입찰 요청 처리
pub async fn handle_bid(
    State(state): State<AppState>,
    Json(cmd): Json<PlaceBidCommand>,
) -> Result<impl IntoResponse, ServiceError> {
    info!("{:<12} --> 입찰 요청 처리 시작: {:?}", "Command", cmd);
    let receipt = state.engine.place_bid(cmd).await?;
    Ok(Json(json!({
        "message": "입찰이 성공적으로 처리되었습니다.",
        "bid_id": receipt.bid_id,
        "accepted_amount": receipt.accepted_amount,
        "end_time": receipt.end_time,
        "extended": receipt.extended
    })))
}

/// 자동 입찰 설정
pub async fn handle_auto_bid(
    State(state): State<AppState>,
    Json(cmd): Json<ConfigureAutoBidCommand>,
) -> Result<impl IntoResponse, ServiceError> {
    info!("{:<12} --> 자동 입찰 설정 요청: {:?}", "Command", cmd);
    let rule = state.engine.configure_auto_bid(cmd).await?;
    Ok(Json(rule))
}

#[derive(Debug, Deserialize)]
pub struct EndAuctionRequest {
    pub actor_id: i64,
    #[serde(default)]
    pub is_admin: bool,
}

/// 경매 수동 종료 (판매자 또는 관리자)
pub async fn handle_end_auction(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
    Json(req): Json<EndAuctionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    info!(
        "{:<12} --> 경매 수동 종료 요청 id: {}, actor: {}",
        "Command", auction_id, req.actor_id
    );
    let outcome = state
        .engine
        .settle_auction(
            auction_id,
            SettleTrigger::Manual {
                actor_id: req.actor_id,
                is_admin: req.is_admin,
            },
        )
        .await?;
    let body = match outcome {
        SettleOutcome::Completed {
            winner_id,
            final_price,
            ..
        } => json!({
            "status": "COMPLETED",
            "winner_id": winner_id,
            "final_price": final_price
        }),
        SettleOutcome::Failed => json!({ "status": "FAILED" }),
        SettleOutcome::AlreadySettled => json!({ "status": "ALREADY_SETTLED" }),
        SettleOutcome::NotDue => json!({ "status": "ACTIVE" }),
    };
    Ok(Json(body))
}

// endregion: --- Auction Handlers

// region:    --- Session Handlers

#[derive(Debug, Deserialize)]
pub struct RegisterSessionRequest {
    pub user_id: i64,
    pub token: String,
}

/// 세션 등록. 인증 자체는 상위 계정 서비스 몫이고 여기서는 토큰만 보관한다.
pub async fn handle_register_session(
    State(state): State<AppState>,
    Json(req): Json<RegisterSessionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    info!("{:<12} --> 세션 등록 요청 user: {}", "Command", req.user_id);
    if req.user_id <= 0 || req.token.is_empty() {
        return Err(ServiceError::validation("사용자 식별자와 토큰이 필요합니다."));
    }
    query::handlers::register_session(&state.db, req.user_id, &req.token).await?;
    Ok(StatusCode::CREATED)
}

// endregion: --- Session Handlers

// region:    --- Escrow Handlers

/// 에스크로 입금
pub async fn handle_escrow_deposit(
    State(state): State<AppState>,
    Json(cmd): Json<DepositCommand>,
) -> Result<impl IntoResponse, ServiceError> {
    let account = state.escrow.deposit(cmd).await?;
    Ok(Json(account))
}

/// 에스크로 지급
pub async fn handle_escrow_release(
    State(state): State<AppState>,
    Json(cmd): Json<ReleaseCommand>,
) -> Result<impl IntoResponse, ServiceError> {
    let account = state.escrow.release(cmd).await?;
    Ok(Json(account))
}

/// 에스크로 환불
pub async fn handle_escrow_refund(
    State(state): State<AppState>,
    Json(cmd): Json<RefundCommand>,
) -> Result<impl IntoResponse, ServiceError> {
    let account = state.escrow.refund(cmd).await?;
    Ok(Json(account))
}

/// 마일스톤 지급
pub async fn handle_escrow_milestone(
    State(state): State<AppState>,
    Json(cmd): Json<MilestoneCommand>,
) -> Result<impl IntoResponse, ServiceError> {
    let account = state.escrow.milestone_payment(cmd).await?;
    Ok(Json(account))
}

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub order_id: i64,
    pub trigger_condition: String,
    pub amount: i64,
    pub actor: Actor,
}

/// 지급 일정 등록 (관리자)
pub async fn handle_create_schedule(
    State(state): State<AppState>,
    Json(req): Json<CreateScheduleRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let schedule = state
        .escrow
        .create_schedule(req.order_id, &req.trigger_condition, req.amount, req.actor)
        .await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

/// 에스크로 명세 조회
pub async fn handle_escrow_statement(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    let statement = state.escrow.statement(order_id).await?;
    Ok(Json(statement))
}

// endregion: --- Escrow Handlers
