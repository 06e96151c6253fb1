// region:    --- Imports
use super::queries;
use crate::auction::model::{Auction, Bid};
use crate::database::DatabaseManager;
use sqlx::Error as SqlxError;
use sqlx::Row;
use tracing::info;

// endregion: --- Imports

// region:    --- Query Handlers

/// 세션 토큰 검증
pub async fn validate_session(
    db_manager: &DatabaseManager,
    user_id: i64,
    token: &str,
) -> Result<bool, SqlxError> {
    info!("{:<12} --> 세션 검증 user: {}", "Query", user_id);
    let token = token.to_string();
    db_manager
        .transaction(|tx| {
            Box::pin(async move {
                let row = sqlx::query(queries::GET_SESSION_TOKEN)
                    .bind(user_id)
                    .fetch_optional(&mut **tx)
                    .await?;

                Ok(row.map(|r| r.get::<String, _>("token") == token).unwrap_or(false))
            })
        })
        .await
}

/// 세션 등록 (재로그인 시 토큰 갱신)
pub async fn register_session(
    db_manager: &DatabaseManager,
    user_id: i64,
    token: &str,
) -> Result<(), SqlxError> {
    info!("{:<12} --> 세션 등록 user: {}", "Query", user_id);
    let token = token.to_string();
    db_manager
        .transaction(|tx| {
            Box::pin(async move {
                sqlx::query(queries::UPSERT_SESSION)
                    .bind(user_id)
                    .bind(token)
                    .execute(&mut **tx)
                    .await?;
                Ok(())
            })
        })
        .await
}

/// 하트비트 수신 시각 갱신
pub async fn touch_session(db_manager: &DatabaseManager, user_id: i64) -> Result<(), SqlxError> {
    db_manager
        .transaction(|tx| {
            Box::pin(async move {
                sqlx::query(queries::TOUCH_SESSION)
                    .bind(user_id)
                    .execute(&mut **tx)
                    .await?;
                Ok(())
            })
        })
        .await
}

/// 입찰 이력 조회
pub async fn get_bid_history(
    db_manager: &DatabaseManager,
    auction_id: i64,
) -> Result<Vec<Bid>, SqlxError> {
    info!("{:<12} --> 입찰 이력 조회 id: {}", "Query", auction_id);
    db_manager
        .transaction(|tx| {
            Box::pin(async move {
                sqlx::query_as::<_, Bid>(queries::GET_BID_HISTORY)
                    .bind(auction_id)
                    .fetch_all(&mut **tx)
                    .await
            })
        })
        .await
}

/// 진행 중 경매 목록 조회
pub async fn get_active_auctions(db_manager: &DatabaseManager) -> Result<Vec<Auction>, SqlxError> {
    info!("{:<12} --> 진행 중 경매 목록 조회", "Query");
    db_manager
        .transaction(|tx| {
            Box::pin(async move {
                sqlx::query_as::<_, Auction>(queries::GET_ACTIVE_AUCTIONS)
                    .fetch_all(&mut **tx)
                    .await
            })
        })
        .await
}

// endregion: --- Query Handlers
