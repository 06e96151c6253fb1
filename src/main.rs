// region:    --- Imports
use agrobid_service::auction::engine::{AuctionEngine, SettlementHook};
use agrobid_service::auction::events::event_channel;
use agrobid_service::auction::store::PgAuctionStore;
use agrobid_service::database::DatabaseManager;
use agrobid_service::escrow::ledger::{EscrowLedger, LogNotifier};
use agrobid_service::escrow::store::PgEscrowStore;
use agrobid_service::gateway;
use agrobid_service::gateway::registry::RoomRegistry;
use agrobid_service::handlers::{self, AppState};
use agrobid_service::scheduler::AuctionClock;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

// endregion: --- Imports

// region:    --- Main
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // logging 초기화
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .without_time()
        .with_target(false)
        .init();

    // DatabaseManager 생성
    let db_manager = Arc::new(DatabaseManager::new().await);

    // 데이터베이스 초기화
    if let Err(e) = db_manager.initialize_database().await {
        error!("{:<12} --> 데이터베이스 초기화 실패: {:?}", "Main", e);
        return Err(e.into());
    }
    info!("{:<12} --> 데이터베이스 초기화 성공", "Main");

    // 스토어 / 원장 / 엔진 구성
    let auction_store = Arc::new(PgAuctionStore::new(db_manager.get_pool()));
    let escrow_store = Arc::new(PgEscrowStore::new(db_manager.get_pool()));
    let escrow = Arc::new(EscrowLedger::new(
        Arc::clone(&escrow_store),
        escrow_store,
        Arc::new(LogNotifier),
    ));
    let (event_tx, event_rx) = event_channel();
    let engine = Arc::new(AuctionEngine::new(
        auction_store,
        Arc::clone(&escrow) as Arc<dyn SettlementHook>,
        event_tx,
    ));
    let registry = Arc::new(RoomRegistry::new());

    // 이벤트 펌프: 엔진 이벤트 -> 방 브로드캐스트
    gateway::spawn_event_pump(event_rx, Arc::clone(&registry));

    // 경매 시계: 카운트다운 송출 + 마감 정산
    AuctionClock::new(Arc::clone(&engine), Arc::clone(&registry)).start();

    // 테스트 페이지를 위한 cors 설정
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = AppState {
        db: db_manager,
        engine,
        escrow,
        registry,
    };

    // 라우터 설정
    let routes_all = Router::new()
        .route(
            "/auctions",
            post(handlers::handle_create_auction).get(handlers::handle_list_auctions),
        )
        .route("/auctions/:id", get(handlers::handle_get_auction))
        .route("/auctions/:id/bids", get(handlers::handle_get_bids))
        .route("/auctions/:id/end", post(handlers::handle_end_auction))
        .route("/bid", post(handlers::handle_bid))
        .route("/auto-bid", post(handlers::handle_auto_bid))
        .route("/sessions", post(handlers::handle_register_session))
        .route("/escrow/deposit", post(handlers::handle_escrow_deposit))
        .route("/escrow/release", post(handlers::handle_escrow_release))
        .route("/escrow/refund", post(handlers::handle_escrow_refund))
        .route("/escrow/milestone", post(handlers::handle_escrow_milestone))
        .route("/escrow/schedules", post(handlers::handle_create_schedule))
        .route("/escrow/:order_id", get(handlers::handle_escrow_statement))
        .route("/ws", get(gateway::ws_handler))
        .layer(cors)
        .with_state(state);

    // 서버 시작
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("{:<12} --> 서버 시작: {}", "Main", bind_addr);
    axum::serve(listener, routes_all).await?;

    Ok(())
}
// endregion: --- Main
