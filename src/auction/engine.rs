/// 경매 엔진
/// 1. 입찰 수락 (낙관적 조건부 갱신 + 제한된 재시도)
/// 2. 자동 입찰(프록시) 연쇄 해소
/// 3. 마감 임박 입찰 자동 연장
/// 4. 정산 (낙찰/유찰 전이, 항등 보장)
// region:    --- Imports
use crate::auction::events::{AuctionEvent, EventSender};
use crate::auction::model::{
    Auction, AuctionSnapshot, AutoBid, NewAuction, AUCTION_ACTIVE, AUCTION_COMPLETED,
    AUCTION_FAILED, TYPE_OPEN, TYPE_RESERVE,
};
use crate::auction::store::{AcceptOutcome, AuctionStore, BidAcceptance, SettleOutcome};
use crate::error::{
    ServiceError, CODE_ALREADY_ENDED, CODE_BELOW_RESERVE, CODE_LOW_BID, CODE_NOT_FOUND,
    CODE_NOT_STARTED, CODE_UNAUTHORIZED,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

// endregion: --- Imports

// region:    --- Commands

/// 입찰 명령
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlaceBidCommand {
    pub auction_id: i64,
    pub bidder_id: i64,
    pub amount: i64,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

/// 자동 입찰 규칙 설정 명령 ((경매, 입찰자) 단위 upsert)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConfigureAutoBidCommand {
    pub auction_id: i64,
    pub bidder_id: i64,
    pub max_amount: i64,
    pub increment_step: i64,
}

/// 입찰 수락 결과
#[derive(Debug, Serialize)]
pub struct BidReceipt {
    pub bid_id: i64,
    pub accepted_amount: i64,
    pub end_time: DateTime<Utc>,
    pub extended: bool,
}

/// 정산 트리거. 시계 트리거는 종료 시각 도래를 전제로 하고,
/// 수동 종료는 판매자 본인 또는 관리자만 가능하다.
#[derive(Debug, Clone, Copy)]
pub enum SettleTrigger {
    Expired,
    Manual { actor_id: i64, is_admin: bool },
}

// 낙관적 갱신 재시도 한도. 초과 시 비즈니스 거절이 아닌 일시 오류로 반환한다.
const MAX_RETRIES: u32 = 5;

// 프록시 입찰 수량 (규칙에는 수량 개념이 없다)
const PROXY_QUANTITY: i32 = 1;

// endregion: --- Commands

// region:    --- Settlement Hook

/// 낙찰 확정 시 호출되는 정산 훅.
/// 에스크로 원장이 구현하며, 낙찰자 주문과 대기 상태 에스크로 계정을 만든다.
#[async_trait]
pub trait SettlementHook: Send + Sync {
    async fn order_created(
        &self,
        auction_id: i64,
        product_id: i64,
        winner_id: i64,
        seller_id: i64,
        final_price: i64,
    ) -> Result<i64, ServiceError>;
}

// endregion: --- Settlement Hook

// region:    --- Auction Engine

pub struct AuctionEngine<S: AuctionStore> {
    store: Arc<S>,
    settlement: Arc<dyn SettlementHook>,
    events: EventSender,
}

impl<S: AuctionStore> AuctionEngine<S> {
    pub fn new(store: Arc<S>, settlement: Arc<dyn SettlementHook>, events: EventSender) -> Self {
        Self {
            store,
            settlement,
            events,
        }
    }

    /// 경매 생성 (판매자 액션)
    pub async fn create_auction(&self, new: NewAuction) -> Result<Auction, ServiceError> {
        if new.start_price <= 0 || new.bid_increment <= 0 {
            return Err(ServiceError::validation(
                "시작가와 입찰 단위는 0보다 커야 합니다.",
            ));
        }
        if new.end_time <= new.start_time {
            return Err(ServiceError::validation(
                "종료 시각은 시작 시각 이후여야 합니다.",
            ));
        }
        match new.auction_type.as_str() {
            TYPE_OPEN => {}
            TYPE_RESERVE => {
                if new.reserve_price.is_none() {
                    return Err(ServiceError::validation(
                        "유보가 경매에는 유보 가격이 필요합니다.",
                    ));
                }
            }
            _ => {
                return Err(ServiceError::validation("지원하지 않는 경매 유형입니다."));
            }
        }
        let auction = self.store.create_auction(new).await?;
        info!("{:<12} --> 경매 생성 id: {}", "Engine", auction.id);
        Ok(auction)
    }

    /// 입찰 처리. 수락 직후 같은 호출 안에서 프록시 연쇄를 해소하고,
    /// 모든 이벤트는 연쇄가 끝난 뒤 발행 순서대로 방에 전달된다.
    pub async fn place_bid(&self, cmd: PlaceBidCommand) -> Result<BidReceipt, ServiceError> {
        info!("{:<12} --> 입찰 요청 처리 시작: {:?}", "Engine", cmd);
        if cmd.bidder_id <= 0 {
            return Err(ServiceError::validation("입찰자 식별자가 잘못되었습니다."));
        }
        if cmd.amount <= 0 || cmd.quantity <= 0 {
            return Err(ServiceError::validation(
                "입찰 금액과 수량은 0보다 커야 합니다.",
            ));
        }

        let mut pending: Vec<AuctionEvent> = Vec::new();
        let receipt = self
            .try_place(
                cmd.auction_id,
                cmd.bidder_id,
                cmd.amount,
                cmd.quantity,
                false,
                None,
                &mut pending,
            )
            .await?;

        // 프록시 입찰은 방 알림 전에 정리되어야 이벤트 순서가 결정적이다
        if let Err(e) = self
            .resolve_auto_bids(
                cmd.auction_id,
                receipt.accepted_amount,
                cmd.bidder_id,
                &mut pending,
            )
            .await
        {
            error!("{:<12} --> 프록시 연쇄 처리 오류: {:?}", "Engine", e);
        }

        self.publish(pending);
        Ok(receipt)
    }

    /// 자동 입찰 연쇄 해소.
    /// 후보 규칙은 호출당 한 번만 조회하며, 각 규칙은 연쇄당 최대 한 번 입찰한다.
    /// 매 단계 현재가가 엄격히 증가하므로 연쇄는 항상 종료된다.
    pub async fn resolve_auto_bids(
        &self,
        auction_id: i64,
        mut current: i64,
        exclude_bidder: i64,
        pending: &mut Vec<AuctionEvent>,
    ) -> Result<i64, ServiceError> {
        let rules = self.store.active_auto_bids(auction_id, exclude_bidder).await?;
        for rule in rules {
            // max 내림차순 정렬이므로 남은 후보 중 현재가를 넘을 수 있는 규칙이 없다
            if rule.max_amount <= current {
                break;
            }
            let next = current + rule.increment_step;
            if next > rule.max_amount {
                continue;
            }
            match self
                .try_place(
                    auction_id,
                    rule.bidder_id,
                    next,
                    PROXY_QUANTITY,
                    true,
                    Some(rule.id),
                    pending,
                )
                .await
            {
                Ok(receipt) => current = receipt.accepted_amount,
                // 최소가/유보가 미달 또는 경합 소진 시 해당 규칙만 건너뛴다
                Err(ServiceError::Rule { code, .. }) => {
                    info!(
                        "{:<12} --> 프록시 규칙 건너뜀 rule: {}, code: {}",
                        "Engine", rule.id, code
                    );
                }
                Err(ServiceError::Conflict) => {
                    warn!("{:<12} --> 프록시 규칙 경합 소진 rule: {}", "Engine", rule.id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(current)
    }

    /// 정산. status='ACTIVE' 가드가 걸린 전이이므로 시계와 수동 종료,
    /// 연장 입찰이 경합해도 최대 한 번만 적용된다.
    pub async fn settle_auction(
        &self,
        auction_id: i64,
        trigger: SettleTrigger,
    ) -> Result<SettleOutcome, ServiceError> {
        let now = Utc::now();
        let force = if let SettleTrigger::Manual { actor_id, is_admin } = trigger {
            let auction = self
                .store
                .fetch_auction(auction_id)
                .await?
                .ok_or_else(|| ServiceError::rule(CODE_NOT_FOUND, "경매를 찾을 수 없습니다."))?;
            if !is_admin && auction.seller_id != actor_id {
                return Err(ServiceError::rule(
                    CODE_UNAUTHORIZED,
                    "판매자 또는 관리자만 경매를 종료할 수 있습니다.",
                ));
            }
            true
        } else {
            false
        };

        let outcome = self.store.settle(auction_id, now, force).await?;
        match &outcome {
            SettleOutcome::Completed {
                winner_id,
                final_price,
                seller_id,
                product_id,
            } => {
                info!(
                    "{:<12} --> 낙찰 auction: {}, winner: {}, price: {}",
                    "Engine", auction_id, winner_id, final_price
                );
                // 전이는 이미 확정되었다. 주문 생성 실패는 운영 재처리 대상이다.
                if let Err(e) = self
                    .settlement
                    .order_created(auction_id, *product_id, *winner_id, *seller_id, *final_price)
                    .await
                {
                    error!("{:<12} --> 낙찰 주문 생성 실패: {:?}", "Engine", e);
                }
                self.publish(vec![AuctionEvent::AuctionEnded {
                    auction_id,
                    status: AUCTION_COMPLETED.to_string(),
                    winner_id: Some(*winner_id),
                    final_price: Some(*final_price),
                    timestamp: now,
                }]);
            }
            SettleOutcome::Failed => {
                info!("{:<12} --> 유찰 auction: {}", "Engine", auction_id);
                self.publish(vec![AuctionEvent::AuctionEnded {
                    auction_id,
                    status: AUCTION_FAILED.to_string(),
                    winner_id: None,
                    final_price: None,
                    timestamp: now,
                }]);
            }
            SettleOutcome::AlreadySettled | SettleOutcome::NotDue => {}
        }
        Ok(outcome)
    }

    /// 자동 입찰 규칙 설정 (upsert). 규칙은 다음 입찰 연쇄부터 참여한다.
    pub async fn configure_auto_bid(
        &self,
        cmd: ConfigureAutoBidCommand,
    ) -> Result<AutoBid, ServiceError> {
        info!("{:<12} --> 자동 입찰 설정: {:?}", "Engine", cmd);
        if cmd.bidder_id <= 0 {
            return Err(ServiceError::validation("입찰자 식별자가 잘못되었습니다."));
        }
        if cmd.max_amount <= 0 || cmd.increment_step <= 0 {
            return Err(ServiceError::validation(
                "최대 금액과 증가 단위는 0보다 커야 합니다.",
            ));
        }

        let auction = self
            .store
            .fetch_auction(cmd.auction_id)
            .await?
            .ok_or_else(|| ServiceError::rule(CODE_NOT_FOUND, "경매를 찾을 수 없습니다."))?;
        let now = Utc::now();
        if auction.status != AUCTION_ACTIVE || now >= auction.end_time {
            return Err(ServiceError::rule(
                CODE_ALREADY_ENDED,
                "경매가 이미 종료되었습니다.",
            ));
        }
        if cmd.max_amount < auction.minimum_bid() {
            return Err(ServiceError::rule(
                CODE_LOW_BID,
                format!(
                    "자동 입찰 한도는 최소 입찰 금액({}) 이상이어야 합니다.",
                    auction.minimum_bid()
                ),
            ));
        }
        if let (true, Some(reserve)) = (auction.is_reserve(), auction.reserve_price) {
            if cmd.max_amount < reserve {
                return Err(ServiceError::rule(
                    CODE_BELOW_RESERVE,
                    "자동 입찰 한도가 유보 가격보다 낮습니다.",
                ));
            }
        }

        self.store
            .upsert_auto_bid(
                cmd.auction_id,
                cmd.bidder_id,
                cmd.max_amount,
                cmd.increment_step,
            )
            .await
    }

    /// 경매 스냅샷 조회 (현재가, 남은 시간, 최근 입찰)
    pub async fn snapshot(&self, auction_id: i64) -> Result<AuctionSnapshot, ServiceError> {
        let auction = self
            .store
            .fetch_auction(auction_id)
            .await?
            .ok_or_else(|| ServiceError::rule(CODE_NOT_FOUND, "경매를 찾을 수 없습니다."))?;
        let recent = self.store.recent_bids(auction_id, 10).await?;
        Ok(AuctionSnapshot::from_parts(&auction, recent, Utc::now()))
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// 단일 입찰 수락: 읽기 -> 검증 -> 조건부 갱신, 충돌 시 한도 내 재시도
    async fn try_place(
        &self,
        auction_id: i64,
        bidder_id: i64,
        amount: i64,
        quantity: i32,
        is_proxy: bool,
        rule_id: Option<i64>,
        pending: &mut Vec<AuctionEvent>,
    ) -> Result<BidReceipt, ServiceError> {
        let mut retries = 0;
        while retries < MAX_RETRIES {
            let auction = self.store.fetch_auction(auction_id).await?.ok_or_else(|| {
                ServiceError::rule(CODE_NOT_FOUND, "경매를 찾을 수 없거나 이미 종료되었습니다.")
            })?;
            let now = Utc::now();
            Self::validate_bid(&auction, amount, now)?;

            let new_end_time = auction.extension_on_bid(now);
            let outcome = self
                .store
                .accept_bid(BidAcceptance {
                    auction_id,
                    bidder_id,
                    amount,
                    quantity,
                    is_proxy,
                    rule_id,
                    expected_current: auction.current_bid,
                    new_end_time,
                    timestamp: now,
                })
                .await?;

            match outcome {
                AcceptOutcome::Accepted {
                    bid_id,
                    end_time,
                    extended,
                } => {
                    pending.push(AuctionEvent::BidAccepted {
                        auction_id,
                        bidder_id,
                        amount,
                        quantity,
                        is_proxy,
                        extended,
                        end_time,
                        timestamp: now,
                    });
                    if extended {
                        pending.push(AuctionEvent::AuctionExtended {
                            auction_id,
                            end_time,
                            extension_count: auction.extension_count + 1,
                            timestamp: now,
                        });
                    }
                    return Ok(BidReceipt {
                        bid_id,
                        accepted_amount: amount,
                        end_time,
                        extended,
                    });
                }
                AcceptOutcome::Conflict => {
                    warn!(
                        "{:<12} --> 낙관적 갱신 충돌, 재검증 후 재시도 auction: {}",
                        "Engine", auction_id
                    );
                    retries += 1;
                }
            }
        }
        Err(ServiceError::Conflict)
    }

    /// 입찰 검증 순서: 상태/시각 -> 최소가 -> 유보가
    fn validate_bid(auction: &Auction, amount: i64, now: DateTime<Utc>) -> Result<(), ServiceError> {
        if auction.status != AUCTION_ACTIVE {
            return Err(ServiceError::rule(
                CODE_ALREADY_ENDED,
                "경매가 이미 종료되었습니다.",
            ));
        }
        if now < auction.start_time {
            return Err(ServiceError::rule(
                CODE_NOT_STARTED,
                "경매가 아직 시작되지 않았습니다.",
            ));
        }
        if now >= auction.end_time {
            return Err(ServiceError::rule(
                CODE_ALREADY_ENDED,
                "경매가 이미 종료되었습니다.",
            ));
        }
        let minimum = auction.minimum_bid();
        if amount < minimum {
            return Err(ServiceError::rule(
                CODE_LOW_BID,
                format!("최소 입찰 금액은 {} 입니다.", minimum),
            ));
        }
        if auction.is_reserve() {
            if let Some(reserve) = auction.reserve_price {
                // 유보가 경매는 입찰 시점에 거절한다
                if amount < reserve {
                    return Err(ServiceError::rule(
                        CODE_BELOW_RESERVE,
                        "입찰 금액이 유보 가격보다 낮습니다.",
                    ));
                }
            }
        }
        Ok(())
    }

    fn publish(&self, events: Vec<AuctionEvent>) {
        for event in events {
            // 게이트웨이가 내려가 있어도 엔진은 막히지 않는다
            let _ = self.events.send(event);
        }
    }
}

// endregion: --- Auction Engine

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::events::{event_channel, EventReceiver};
    use crate::auction::store::MemoryAuctionStore;
    use crate::error::{CODE_LOW_BID, CODE_UNAUTHORIZED};
    use chrono::Duration;
    use std::sync::Mutex;

    struct RecordingHook {
        orders: Mutex<Vec<(i64, i64, i64)>>,
    }

    impl RecordingHook {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                orders: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SettlementHook for RecordingHook {
        async fn order_created(
            &self,
            auction_id: i64,
            _product_id: i64,
            winner_id: i64,
            _seller_id: i64,
            final_price: i64,
        ) -> Result<i64, ServiceError> {
            self.orders
                .lock()
                .unwrap()
                .push((auction_id, winner_id, final_price));
            Ok(1)
        }
    }

    fn test_engine() -> (
        AuctionEngine<MemoryAuctionStore>,
        EventReceiver,
        Arc<RecordingHook>,
    ) {
        let (tx, rx) = event_channel();
        let hook = RecordingHook::new();
        let engine = AuctionEngine::new(Arc::new(MemoryAuctionStore::new()), hook.clone(), tx);
        (engine, rx, hook)
    }

    fn open_auction(start_price: i64, bid_increment: i64) -> NewAuction {
        let now = Utc::now();
        NewAuction {
            product_id: 7,
            seller_id: 42,
            auction_type: TYPE_OPEN.to_string(),
            start_price,
            bid_increment,
            reserve_price: None,
            start_time: now - Duration::minutes(5),
            end_time: now + Duration::hours(1),
            max_extensions: 3,
            extension_window_secs: 120,
        }
    }

    fn bid(auction_id: i64, bidder_id: i64, amount: i64) -> PlaceBidCommand {
        PlaceBidCommand {
            auction_id,
            bidder_id,
            amount,
            quantity: 1,
        }
    }

    #[tokio::test]
    async fn test_minimum_bid_scenario() {
        let (engine, _rx, _) = test_engine();
        let auction = engine.create_auction(open_auction(100, 10)).await.unwrap();

        // 시작가 미만 거절
        let err = engine.place_bid(bid(auction.id, 1, 80)).await.unwrap_err();
        assert_eq!(err.code(), Some(CODE_LOW_BID));

        // 시작가와 같은 금액은 수락
        let receipt = engine.place_bid(bid(auction.id, 1, 100)).await.unwrap();
        assert_eq!(receipt.accepted_amount, 100);

        // 최소가(110) 미만 거절, 현재가는 유지
        let err = engine.place_bid(bid(auction.id, 2, 105)).await.unwrap_err();
        assert_eq!(err.code(), Some(CODE_LOW_BID));
        let state = engine.store().fetch_auction(auction.id).await.unwrap().unwrap();
        assert_eq!(state.current_bid, 100);

        let receipt = engine.place_bid(bid(auction.id, 2, 150)).await.unwrap();
        assert_eq!(receipt.accepted_amount, 150);
        let state = engine.store().fetch_auction(auction.id).await.unwrap().unwrap();
        assert_eq!(state.current_bid, 150);
    }

    #[tokio::test]
    async fn test_reserve_auction_rejects_below_reserve() {
        let (engine, _rx, _) = test_engine();
        let mut new = open_auction(100, 10);
        new.auction_type = TYPE_RESERVE.to_string();
        new.reserve_price = Some(500);
        let auction = engine.create_auction(new).await.unwrap();

        let err = engine.place_bid(bid(auction.id, 1, 200)).await.unwrap_err();
        assert_eq!(err.code(), Some(crate::error::CODE_BELOW_RESERVE));

        let receipt = engine.place_bid(bid(auction.id, 1, 500)).await.unwrap();
        assert_eq!(receipt.accepted_amount, 500);
    }

    #[tokio::test]
    async fn test_not_started_and_ended_rejections() {
        let (engine, _rx, _) = test_engine();
        let now = Utc::now();

        let mut new = open_auction(100, 10);
        new.start_time = now + Duration::minutes(10);
        let scheduled = engine.create_auction(new).await.unwrap();
        let err = engine.place_bid(bid(scheduled.id, 1, 100)).await.unwrap_err();
        assert_eq!(err.code(), Some(crate::error::CODE_NOT_STARTED));

        let mut new = open_auction(100, 10);
        new.end_time = now - Duration::seconds(1);
        let ended = engine.create_auction(new).await.unwrap();
        let err = engine.place_bid(bid(ended.id, 1, 100)).await.unwrap_err();
        assert_eq!(err.code(), Some(crate::error::CODE_ALREADY_ENDED));
    }

    #[tokio::test]
    async fn test_late_bid_extends_by_exactly_one_window() {
        let (engine, _rx, _) = test_engine();
        let now = Utc::now();
        let mut new = open_auction(100, 10);
        new.end_time = now + Duration::seconds(60);
        new.extension_window_secs = 120;
        let auction = engine.create_auction(new).await.unwrap();
        let original_end = auction.end_time;

        // 마감 임박 입찰은 기존 종료 시각에 정확히 창 크기만큼 더한다
        let r1 = engine.place_bid(bid(auction.id, 1, 100)).await.unwrap();
        assert!(r1.extended);
        assert_eq!(r1.end_time, original_end + Duration::seconds(120));

        // 연장 직후에는 남은 시간이 창 밖이므로 바로 이어진 입찰은 연장하지 않는다
        let r2 = engine.place_bid(bid(auction.id, 2, 110)).await.unwrap();
        assert!(!r2.extended);
        assert_eq!(r2.end_time, r1.end_time);

        let state = engine.store().fetch_auction(auction.id).await.unwrap().unwrap();
        assert_eq!(state.extension_count, 1);
    }

    #[tokio::test]
    async fn test_extension_stops_after_max_extensions() {
        let (engine, _rx, _) = test_engine();
        let now = Utc::now();
        let mut new = open_auction(100, 10);
        new.end_time = now + Duration::seconds(1);
        new.extension_window_secs = 5;
        new.max_extensions = 1;
        let auction = engine.create_auction(new).await.unwrap();

        let r1 = engine.place_bid(bid(auction.id, 1, 100)).await.unwrap();
        assert!(r1.extended);

        // 남은 시간이 다시 창 안으로 들어올 때까지 대기
        tokio::time::sleep(std::time::Duration::from_millis(1200)).await;

        // 창 안이지만 연장 한도를 소진했으므로 연장 없이 수락된다
        let r2 = engine.place_bid(bid(auction.id, 2, 110)).await.unwrap();
        assert!(!r2.extended);
        assert_eq!(r2.end_time, r1.end_time);
    }

    #[tokio::test]
    async fn test_auto_bid_cascade_and_event_order() {
        let (engine, mut rx, _) = test_engine();
        let auction = engine.create_auction(open_auction(100, 10)).await.unwrap();

        engine
            .configure_auto_bid(ConfigureAutoBidCommand {
                auction_id: auction.id,
                bidder_id: 2,
                max_amount: 200,
                increment_step: 10,
            })
            .await
            .unwrap();
        engine
            .configure_auto_bid(ConfigureAutoBidCommand {
                auction_id: auction.id,
                bidder_id: 3,
                max_amount: 150,
                increment_step: 10,
            })
            .await
            .unwrap();

        engine.place_bid(bid(auction.id, 1, 100)).await.unwrap();

        // max 가 큰 규칙부터, 규칙당 한 번씩: 2번이 110, 3번이 120
        let state = engine.store().fetch_auction(auction.id).await.unwrap().unwrap();
        assert_eq!(state.current_bid, 120);

        match rx.try_recv().unwrap() {
            AuctionEvent::BidAccepted {
                bidder_id, amount, is_proxy, ..
            } => {
                assert_eq!((bidder_id, amount, is_proxy), (1, 100, false));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.try_recv().unwrap() {
            AuctionEvent::BidAccepted {
                bidder_id, amount, is_proxy, ..
            } => {
                assert_eq!((bidder_id, amount, is_proxy), (2, 110, true));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.try_recv().unwrap() {
            AuctionEvent::BidAccepted {
                bidder_id, amount, is_proxy, ..
            } => {
                assert_eq!((bidder_id, amount, is_proxy), (3, 120, true));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_auto_bid_never_exceeds_rule_max() {
        let (engine, _rx, _) = test_engine();
        let auction = engine.create_auction(open_auction(100, 10)).await.unwrap();

        engine
            .configure_auto_bid(ConfigureAutoBidCommand {
                auction_id: auction.id,
                bidder_id: 2,
                max_amount: 105,
                increment_step: 10,
            })
            .await
            .unwrap();

        engine.place_bid(bid(auction.id, 1, 100)).await.unwrap();

        // 다음 호가(110)가 한도(105)를 넘으므로 프록시 입찰 없음
        let state = engine.store().fetch_auction(auction.id).await.unwrap().unwrap();
        assert_eq!(state.current_bid, 100);
        let bids = engine.store().recent_bids(auction.id, 10).await.unwrap();
        assert!(bids.iter().all(|b| !b.is_proxy));
    }

    #[tokio::test]
    async fn test_configure_auto_bid_is_upsert() {
        let (engine, _rx, _) = test_engine();
        let auction = engine.create_auction(open_auction(100, 10)).await.unwrap();

        let first = engine
            .configure_auto_bid(ConfigureAutoBidCommand {
                auction_id: auction.id,
                bidder_id: 2,
                max_amount: 300,
                increment_step: 10,
            })
            .await
            .unwrap();
        let second = engine
            .configure_auto_bid(ConfigureAutoBidCommand {
                auction_id: auction.id,
                bidder_id: 2,
                max_amount: 500,
                increment_step: 20,
            })
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.max_amount, 500);
        assert_eq!(second.increment_step, 20);
    }

    #[tokio::test]
    async fn test_settlement_is_idempotent_and_notifies_once() {
        let (engine, _rx, hook) = test_engine();
        let now = Utc::now();
        let mut new = open_auction(100, 10);
        new.end_time = now + Duration::seconds(30);
        // 연장 없이 바로 만료시키기 위한 설정
        new.extension_window_secs = 1;
        let auction = engine.create_auction(new).await.unwrap();

        engine.place_bid(bid(auction.id, 5, 100)).await.unwrap();

        // 판매자 수동 종료 (강제 정산)
        let outcome = engine
            .settle_auction(
                auction.id,
                SettleTrigger::Manual {
                    actor_id: 42,
                    is_admin: false,
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, SettleOutcome::Completed { winner_id: 5, final_price: 100, .. }));

        // 두 번째 정산은 항등
        let outcome = engine
            .settle_auction(auction.id, SettleTrigger::Expired)
            .await
            .unwrap();
        assert_eq!(outcome, SettleOutcome::AlreadySettled);

        assert_eq!(hook.orders.lock().unwrap().as_slice(), &[(auction.id, 5, 100)]);
    }

    #[tokio::test]
    async fn test_settlement_without_bids_fails_auction() {
        let (engine, _rx, hook) = test_engine();
        let mut new = open_auction(100, 10);
        new.end_time = Utc::now() - Duration::seconds(1);
        let auction = engine.create_auction(new).await.unwrap();

        let outcome = engine
            .settle_auction(auction.id, SettleTrigger::Expired)
            .await
            .unwrap();
        assert_eq!(outcome, SettleOutcome::Failed);
        let state = engine.store().fetch_auction(auction.id).await.unwrap().unwrap();
        assert_eq!(state.status, AUCTION_FAILED);
        assert!(hook.orders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manual_settlement_requires_seller_or_admin() {
        let (engine, _rx, _) = test_engine();
        let auction = engine.create_auction(open_auction(100, 10)).await.unwrap();

        let err = engine
            .settle_auction(
                auction.id,
                SettleTrigger::Manual {
                    actor_id: 999,
                    is_admin: false,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(CODE_UNAUTHORIZED));

        // 관리자는 종료 시각 전에도 강제 정산 가능
        let outcome = engine
            .settle_auction(
                auction.id,
                SettleTrigger::Manual {
                    actor_id: 999,
                    is_admin: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, SettleOutcome::Failed);
    }

    #[tokio::test]
    async fn test_settlement_voids_bids_placed_after_end_time() {
        let (engine, _rx, _) = test_engine();
        let now = Utc::now();
        let mut new = open_auction(100, 10);
        new.end_time = now - Duration::seconds(10);
        let auction = engine.create_auction(new).await.unwrap();

        // 저장소에 직접 넣어 종료 전/후 입찰 경합을 재현한다
        let store = engine.store();
        store
            .accept_bid(BidAcceptance {
                auction_id: auction.id,
                bidder_id: 1,
                amount: 100,
                quantity: 1,
                is_proxy: false,
                rule_id: None,
                expected_current: 0,
                new_end_time: None,
                timestamp: now - Duration::seconds(30),
            })
            .await
            .unwrap();
        store
            .accept_bid(BidAcceptance {
                auction_id: auction.id,
                bidder_id: 2,
                amount: 110,
                quantity: 1,
                is_proxy: false,
                rule_id: None,
                expected_current: 100,
                new_end_time: None,
                timestamp: now - Duration::seconds(5),
            })
            .await
            .unwrap();

        let outcome = engine
            .settle_auction(auction.id, SettleTrigger::Expired)
            .await
            .unwrap();
        // 종료 이후 들어온 110 입찰은 무효, 100 입찰이 낙찰
        assert!(matches!(outcome, SettleOutcome::Completed { winner_id: 1, final_price: 100, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_bids_have_single_winner() {
        let (engine, _rx, _) = test_engine();
        let auction = engine.create_auction(open_auction(100, 10)).await.unwrap();
        engine.place_bid(bid(auction.id, 1, 100)).await.unwrap();

        let engine = Arc::new(engine);
        let e1 = Arc::clone(&engine);
        let e2 = Arc::clone(&engine);
        let id = auction.id;
        let t1 = tokio::spawn(async move { e1.place_bid(bid(id, 2, 120)).await });
        let t2 = tokio::spawn(async move { e2.place_bid(bid(id, 3, 125)).await });
        let r1 = t1.await.unwrap();
        let r2 = t2.await.unwrap();

        // 120이 먼저 적용되면 새 최소가(130)에 125가 미달하므로
        // 정확히 하나만 수락되어야 한다. 둘 다 최고가가 되는 일은 없다.
        let state = engine.store().fetch_auction(id).await.unwrap().unwrap();
        match (&r1, &r2) {
            (Ok(a), Err(e)) => {
                assert_eq!(state.current_bid, a.accepted_amount);
                assert_eq!(e.code(), Some(CODE_LOW_BID));
            }
            (Err(e), Ok(b)) => {
                assert_eq!(state.current_bid, b.accepted_amount);
                assert_eq!(e.code(), Some(CODE_LOW_BID));
            }
            other => panic!("정확히 하나의 입찰만 수락되어야 한다: {:?}", other),
        }

        // 수락된 입찰 금액은 서로 달라야 하며 최대값이 현재가와 일치해야 한다
        let bids = engine.store().recent_bids(id, 10).await.unwrap();
        let mut amounts: Vec<i64> = bids.iter().map(|b| b.amount).collect();
        amounts.sort_unstable();
        let deduped = {
            let mut d = amounts.clone();
            d.dedup();
            d
        };
        assert_eq!(amounts, deduped, "수락된 입찰 금액이 중복되면 안 된다");
        assert_eq!(amounts.last().copied(), Some(state.current_bid));
    }
}

// endregion: --- Tests
