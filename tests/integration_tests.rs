use agrobid_service::auction::engine::{
    AuctionEngine, ConfigureAutoBidCommand, PlaceBidCommand, SettlementHook, SettleTrigger,
};
use agrobid_service::auction::events::{event_channel, AuctionEvent, EventReceiver};
use agrobid_service::auction::model::NewAuction;
use agrobid_service::auction::store::{MemoryAuctionStore, SettleOutcome};
use agrobid_service::escrow::ledger::{
    DepositCommand, EscrowLedger, LogNotifier, ReleaseCommand,
};
use agrobid_service::escrow::model::{Actor, Role, ESCROW_RELEASED};
use agrobid_service::escrow::store::{EscrowStore, MemoryEscrowStore};
use chrono::{Duration, Utc};
use std::sync::Arc;

/// 트레이싱 초기화
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .without_time()
        .with_target(false)
        .with_test_writer()
        .try_init();
}

struct TestApp {
    engine: AuctionEngine<MemoryAuctionStore>,
    ledger: Arc<EscrowLedger<MemoryEscrowStore>>,
    events: EventReceiver,
}

/// 인메모리 스토어로 엔진 -> 정산 훅 -> 에스크로 전체를 배선한다.
fn setup() -> TestApp {
    init_tracing();
    let escrow_store = Arc::new(MemoryEscrowStore::new());
    let ledger = Arc::new(EscrowLedger::new(
        Arc::clone(&escrow_store),
        escrow_store,
        Arc::new(LogNotifier),
    ));
    let (tx, rx) = event_channel();
    let engine = AuctionEngine::new(
        Arc::new(MemoryAuctionStore::new()),
        Arc::clone(&ledger) as Arc<dyn SettlementHook>,
        tx,
    );
    TestApp {
        engine,
        ledger,
        events: rx,
    }
}

fn open_auction(seller_id: i64) -> NewAuction {
    let now = Utc::now();
    NewAuction {
        product_id: 77,
        seller_id,
        auction_type: "OPEN".to_string(),
        start_price: 1000,
        bid_increment: 100,
        reserve_price: None,
        start_time: now - Duration::minutes(1),
        end_time: now + Duration::hours(1),
        max_extensions: 3,
        extension_window_secs: 120,
    }
}

/// 입찰 -> 자동 입찰 연쇄 -> 수동 종료 -> 주문/에스크로 생성 -> 입금/지급 전체 흐름
#[tokio::test]
async fn test_full_auction_to_escrow_flow() {
    let mut app = setup();
    let seller = 20;
    let auction = app.engine.create_auction(open_auction(seller)).await.unwrap();

    // 자동 입찰 규칙: 입찰자 6, 최대 1500
    app.engine
        .configure_auto_bid(ConfigureAutoBidCommand {
            auction_id: auction.id,
            bidder_id: 6,
            max_amount: 1500,
            increment_step: 100,
        })
        .await
        .unwrap();

    // 수동 입찰 1000 -> 자동 입찰 1100 연쇄
    let receipt = app
        .engine
        .place_bid(PlaceBidCommand {
            auction_id: auction.id,
            bidder_id: 5,
            amount: 1000,
            quantity: 1,
        })
        .await
        .unwrap();
    assert_eq!(receipt.accepted_amount, 1000);

    let snapshot = app.engine.snapshot(auction.id).await.unwrap();
    assert_eq!(snapshot.current_bid, 1100);

    // 판매자 수동 종료 -> 자동 입찰자 낙찰
    let outcome = app
        .engine
        .settle_auction(
            auction.id,
            SettleTrigger::Manual {
                actor_id: seller,
                is_admin: false,
            },
        )
        .await
        .unwrap();
    match outcome {
        SettleOutcome::Completed {
            winner_id,
            final_price,
            ..
        } => assert_eq!((winner_id, final_price), (6, 1100)),
        other => panic!("unexpected outcome: {:?}", other),
    }

    // 이벤트 순서: 수동 수락 -> 자동 수락 -> 종료
    let mut kinds = Vec::new();
    while let Ok(event) = app.events.try_recv() {
        kinds.push(match event {
            AuctionEvent::BidAccepted { bidder_id, .. } => format!("bid:{}", bidder_id),
            AuctionEvent::AuctionExtended { .. } => "extended".to_string(),
            AuctionEvent::AuctionEnded { .. } => "ended".to_string(),
        });
    }
    assert_eq!(kinds, vec!["bid:5", "bid:6", "ended"]);

    // 정산 훅이 만든 주문으로 에스크로를 진행한다
    let order = app
        .ledger
        .store()
        .fetch_order(1)
        .await
        .unwrap()
        .expect("정산 훅이 주문을 만들어야 한다");
    assert_eq!((order.buyer_id, order.seller_id, order.total_amount), (6, seller, 1100));

    app.ledger
        .deposit(DepositCommand {
            order_id: order.id,
            amount: 1100,
            payer_id: 6,
            payment_ref: "pg-20260829-001".to_string(),
        })
        .await
        .unwrap();
    let account = app
        .ledger
        .release(ReleaseCommand {
            order_id: order.id,
            amount: None,
            reason: None,
            actor: Actor {
                id: 6,
                role: Role::Buyer,
            },
        })
        .await
        .unwrap();
    assert_eq!((account.balance, account.status.as_str()), (0, ESCROW_RELEASED));

    // 원장 라인 합계가 잔액과 일치한다
    let statement = app.ledger.statement(order.id).await.unwrap();
    assert_eq!(statement.transactions.len(), 2);
}

/// 유찰 경매는 주문을 만들지 않는다
#[tokio::test]
async fn test_failed_auction_creates_no_order() {
    let app = setup();
    let auction = app.engine.create_auction(open_auction(20)).await.unwrap();

    let outcome = app
        .engine
        .settle_auction(
            auction.id,
            SettleTrigger::Manual {
                actor_id: 20,
                is_admin: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome, SettleOutcome::Failed);
    assert!(app.ledger.store().fetch_order(1).await.unwrap().is_none());
}
