/// 경매 집계에 대한 저장소 계층
/// 입찰 수락과 정산은 조건부 갱신(낙관적 동시성 제어)으로만 적용된다.
/// `PgAuctionStore` 가 실제 구현이며, `MemoryAuctionStore` 는
/// 테스트와 로컬 환경을 위한 동일 의미의 인메모리 구현이다.
// region:    --- Imports
use crate::auction::model::{
    Auction, AutoBid, Bid, NewAuction, AUCTION_ACTIVE, AUCTION_COMPLETED, AUCTION_FAILED,
    BID_ACTIVE, BID_REJECTED,
};
use crate::error::{ServiceError, CODE_NOT_FOUND};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// endregion: --- Imports

// region:    --- Store Contract

/// 입찰 수락 요청. `expected_current` 가 저장 시점의 현재가와 다르면
/// 수락은 적용되지 않고 `Conflict` 가 반환된다.
#[derive(Debug, Clone)]
pub struct BidAcceptance {
    pub auction_id: i64,
    pub bidder_id: i64,
    pub amount: i64,
    pub quantity: i32,
    pub is_proxy: bool,
    /// 프록시 입찰인 경우 해당 규칙 id (누적 횟수 증가)
    pub rule_id: Option<i64>,
    /// 읽기 시점의 현재 최고가 (CAS 가드)
    pub expected_current: i64,
    /// 연장이 함께 적용되는 경우 새 종료 시각
    pub new_end_time: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub enum AcceptOutcome {
    Accepted {
        bid_id: i64,
        end_time: DateTime<Utc>,
        extended: bool,
    },
    /// 읽은 이후 다른 입찰이 먼저 적용됨. 호출자가 재검증 후 재시도한다.
    Conflict,
}

#[derive(Debug, PartialEq)]
pub enum SettleOutcome {
    Completed {
        winner_id: i64,
        final_price: i64,
        seller_id: i64,
        product_id: i64,
    },
    Failed,
    /// 이미 종결 상태. 두 번째 정산 호출은 항등이다.
    AlreadySettled,
    /// 연장 등으로 종료 시각이 아직 도래하지 않음 (시계 트리거 전용)
    NotDue,
}

#[async_trait]
pub trait AuctionStore: Send + Sync {
    async fn create_auction(&self, new: NewAuction) -> Result<Auction, ServiceError>;
    async fn fetch_auction(&self, auction_id: i64) -> Result<Option<Auction>, ServiceError>;
    /// 입찰 행 삽입 + 현재가/종료시각 갱신을 하나의 원자 연산으로 적용
    async fn accept_bid(&self, acceptance: BidAcceptance) -> Result<AcceptOutcome, ServiceError>;
    /// 트리거 입찰자를 제외한 활성 규칙을 max DESC, 생성순 ASC 로 조회
    async fn active_auto_bids(
        &self,
        auction_id: i64,
        exclude_bidder: i64,
    ) -> Result<Vec<AutoBid>, ServiceError>;
    async fn upsert_auto_bid(
        &self,
        auction_id: i64,
        bidder_id: i64,
        max_amount: i64,
        increment_step: i64,
    ) -> Result<AutoBid, ServiceError>;
    /// status='ACTIVE' 가드가 걸린 종결 전이. 종료 이후 입찰은 같은
    /// 트랜잭션 안에서 REJECTED 로 전환된다.
    async fn settle(
        &self,
        auction_id: i64,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<SettleOutcome, ServiceError>;
    async fn expired_auctions(&self, now: DateTime<Utc>) -> Result<Vec<i64>, ServiceError>;
    async fn recent_bids(&self, auction_id: i64, limit: i64) -> Result<Vec<Bid>, ServiceError>;
}

// endregion: --- Store Contract

// region:    --- Postgres Store

pub struct PgAuctionStore {
    pool: Arc<PgPool>,
}

impl PgAuctionStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuctionStore for PgAuctionStore {
    async fn create_auction(&self, new: NewAuction) -> Result<Auction, ServiceError> {
        let auction = sqlx::query_as::<_, Auction>(
            "INSERT INTO auctions (product_id, seller_id, auction_type, start_price, \
             bid_increment, reserve_price, start_time, end_time, max_extensions, \
             extension_window_secs, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'ACTIVE') \
             RETURNING *",
        )
        .bind(new.product_id)
        .bind(new.seller_id)
        .bind(&new.auction_type)
        .bind(new.start_price)
        .bind(new.bid_increment)
        .bind(new.reserve_price)
        .bind(new.start_time)
        .bind(new.end_time)
        .bind(new.max_extensions)
        .bind(new.extension_window_secs)
        .fetch_one(&*self.pool)
        .await?;
        Ok(auction)
    }

    async fn fetch_auction(&self, auction_id: i64) -> Result<Option<Auction>, ServiceError> {
        let auction = sqlx::query_as::<_, Auction>("SELECT * FROM auctions WHERE id = $1")
            .bind(auction_id)
            .fetch_optional(&*self.pool)
            .await?;
        Ok(auction)
    }

    async fn accept_bid(&self, a: BidAcceptance) -> Result<AcceptOutcome, ServiceError> {
        let mut tx = self.pool.begin().await?;

        // 읽기 시점 이후 현재가가 변하지 않았을 때만 갱신된다.
        let extended = a.new_end_time.is_some();
        let updated = sqlx::query_scalar::<_, DateTime<Utc>>(
            "UPDATE auctions \
             SET current_bid = $1, \
                 end_time = COALESCE($2, end_time), \
                 extension_count = extension_count + $3 \
             WHERE id = $4 AND status = 'ACTIVE' AND current_bid = $5 \
             RETURNING end_time",
        )
        .bind(a.amount)
        .bind(a.new_end_time)
        .bind(if extended { 1i32 } else { 0i32 })
        .bind(a.auction_id)
        .bind(a.expected_current)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(end_time) = updated else {
            tx.rollback().await?;
            return Ok(AcceptOutcome::Conflict);
        };

        let bid_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO bids (auction_id, bidder_id, amount, quantity, is_proxy, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, 'ACTIVE', $6) \
             RETURNING id",
        )
        .bind(a.auction_id)
        .bind(a.bidder_id)
        .bind(a.amount)
        .bind(a.quantity)
        .bind(a.is_proxy)
        .bind(a.timestamp)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(rule_id) = a.rule_id {
            sqlx::query("UPDATE auto_bids SET bids_placed = bids_placed + 1 WHERE id = $1")
                .bind(rule_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(AcceptOutcome::Accepted {
            bid_id,
            end_time,
            extended,
        })
    }

    async fn active_auto_bids(
        &self,
        auction_id: i64,
        exclude_bidder: i64,
    ) -> Result<Vec<AutoBid>, ServiceError> {
        let rules = sqlx::query_as::<_, AutoBid>(
            "SELECT * FROM auto_bids \
             WHERE auction_id = $1 AND bidder_id != $2 AND active \
             ORDER BY max_amount DESC, created_at ASC",
        )
        .bind(auction_id)
        .bind(exclude_bidder)
        .fetch_all(&*self.pool)
        .await?;
        Ok(rules)
    }

    async fn upsert_auto_bid(
        &self,
        auction_id: i64,
        bidder_id: i64,
        max_amount: i64,
        increment_step: i64,
    ) -> Result<AutoBid, ServiceError> {
        let rule = sqlx::query_as::<_, AutoBid>(
            "INSERT INTO auto_bids (auction_id, bidder_id, max_amount, increment_step, active) \
             VALUES ($1, $2, $3, $4, TRUE) \
             ON CONFLICT (auction_id, bidder_id) \
             DO UPDATE SET max_amount = $3, increment_step = $4, active = TRUE \
             RETURNING *",
        )
        .bind(auction_id)
        .bind(bidder_id)
        .bind(max_amount)
        .bind(increment_step)
        .fetch_one(&*self.pool)
        .await?;
        Ok(rule)
    }

    async fn settle(
        &self,
        auction_id: i64,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<SettleOutcome, ServiceError> {
        let mut tx = self.pool.begin().await?;

        let auction =
            sqlx::query_as::<_, Auction>("SELECT * FROM auctions WHERE id = $1 FOR UPDATE")
                .bind(auction_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| {
                    ServiceError::rule(CODE_NOT_FOUND, "경매를 찾을 수 없습니다.")
                })?;

        if auction.status != AUCTION_ACTIVE {
            tx.rollback().await?;
            return Ok(SettleOutcome::AlreadySettled);
        }
        if !force && auction.end_time > now {
            // 정산과 경합한 입찰이 종료 시각을 연장한 경우
            tx.rollback().await?;
            return Ok(SettleOutcome::NotDue);
        }

        // 종료 시각 이후 제출된 입찰 무효화 (경합 정리)
        sqlx::query(
            "UPDATE bids SET status = 'REJECTED' \
             WHERE auction_id = $1 AND status = 'ACTIVE' AND created_at > $2",
        )
        .bind(auction_id)
        .bind(auction.end_time)
        .execute(&mut *tx)
        .await?;

        let top = sqlx::query_as::<_, Bid>(
            "SELECT * FROM bids \
             WHERE auction_id = $1 AND status = 'ACTIVE' \
             ORDER BY amount DESC, created_at ASC \
             LIMIT 1",
        )
        .bind(auction_id)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match top {
            Some(bid) => {
                sqlx::query(
                    "UPDATE auctions SET status = 'COMPLETED', winner_id = $1, final_price = $2 \
                     WHERE id = $3",
                )
                .bind(bid.bidder_id)
                .bind(bid.amount)
                .bind(auction_id)
                .execute(&mut *tx)
                .await?;
                SettleOutcome::Completed {
                    winner_id: bid.bidder_id,
                    final_price: bid.amount,
                    seller_id: auction.seller_id,
                    product_id: auction.product_id,
                }
            }
            None => {
                sqlx::query("UPDATE auctions SET status = 'FAILED' WHERE id = $1")
                    .bind(auction_id)
                    .execute(&mut *tx)
                    .await?;
                SettleOutcome::Failed
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn expired_auctions(&self, now: DateTime<Utc>) -> Result<Vec<i64>, ServiceError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM auctions WHERE status = 'ACTIVE' AND end_time <= $1",
        )
        .bind(now)
        .fetch_all(&*self.pool)
        .await?;
        Ok(ids)
    }

    async fn recent_bids(&self, auction_id: i64, limit: i64) -> Result<Vec<Bid>, ServiceError> {
        let bids = sqlx::query_as::<_, Bid>(
            "SELECT * FROM bids \
             WHERE auction_id = $1 AND status = 'ACTIVE' \
             ORDER BY created_at DESC \
             LIMIT $2",
        )
        .bind(auction_id)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;
        Ok(bids)
    }
}

// endregion: --- Postgres Store

// region:    --- Memory Store

/// 인메모리 구현. Postgres 구현과 동일한 조건부 갱신 의미를 가지며
/// 단위 테스트와 로컬 개발에서 사용한다.
#[derive(Default)]
pub struct MemoryAuctionStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    auctions: HashMap<i64, Auction>,
    bids: Vec<Bid>,
    auto_bids: Vec<AutoBid>,
    next_auction_id: i64,
    next_bid_id: i64,
    next_rule_id: i64,
}

impl MemoryAuctionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // 락 보유 중 패닉은 테스트 실패로만 이어진다
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AuctionStore for MemoryAuctionStore {
    async fn create_auction(&self, new: NewAuction) -> Result<Auction, ServiceError> {
        let mut inner = self.lock();
        inner.next_auction_id += 1;
        let auction = Auction {
            id: inner.next_auction_id,
            product_id: new.product_id,
            seller_id: new.seller_id,
            auction_type: new.auction_type,
            start_price: new.start_price,
            current_bid: 0,
            bid_increment: new.bid_increment,
            reserve_price: new.reserve_price,
            start_time: new.start_time,
            end_time: new.end_time,
            extension_count: 0,
            max_extensions: new.max_extensions,
            extension_window_secs: new.extension_window_secs,
            status: AUCTION_ACTIVE.to_string(),
            winner_id: None,
            final_price: None,
            created_at: Utc::now(),
        };
        inner.auctions.insert(auction.id, auction.clone());
        Ok(auction)
    }

    async fn fetch_auction(&self, auction_id: i64) -> Result<Option<Auction>, ServiceError> {
        Ok(self.lock().auctions.get(&auction_id).cloned())
    }

    async fn accept_bid(&self, a: BidAcceptance) -> Result<AcceptOutcome, ServiceError> {
        let mut inner = self.lock();
        inner.next_bid_id += 1;
        let bid_id = inner.next_bid_id;

        let Some(auction) = inner.auctions.get_mut(&a.auction_id) else {
            return Err(ServiceError::rule(CODE_NOT_FOUND, "경매를 찾을 수 없습니다."));
        };
        if auction.status != AUCTION_ACTIVE || auction.current_bid != a.expected_current {
            return Ok(AcceptOutcome::Conflict);
        }

        auction.current_bid = a.amount;
        let extended = if let Some(end) = a.new_end_time {
            auction.end_time = end;
            auction.extension_count += 1;
            true
        } else {
            false
        };
        let end_time = auction.end_time;

        inner.bids.push(Bid {
            id: bid_id,
            auction_id: a.auction_id,
            bidder_id: a.bidder_id,
            amount: a.amount,
            quantity: a.quantity,
            is_proxy: a.is_proxy,
            status: BID_ACTIVE.to_string(),
            created_at: a.timestamp,
        });
        if let Some(rule_id) = a.rule_id {
            if let Some(rule) = inner.auto_bids.iter_mut().find(|r| r.id == rule_id) {
                rule.bids_placed += 1;
            }
        }

        Ok(AcceptOutcome::Accepted {
            bid_id,
            end_time,
            extended,
        })
    }

    async fn active_auto_bids(
        &self,
        auction_id: i64,
        exclude_bidder: i64,
    ) -> Result<Vec<AutoBid>, ServiceError> {
        let inner = self.lock();
        let mut rules: Vec<AutoBid> = inner
            .auto_bids
            .iter()
            .filter(|r| r.auction_id == auction_id && r.bidder_id != exclude_bidder && r.active)
            .cloned()
            .collect();
        rules.sort_by(|a, b| {
            b.max_amount
                .cmp(&a.max_amount)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(rules)
    }

    async fn upsert_auto_bid(
        &self,
        auction_id: i64,
        bidder_id: i64,
        max_amount: i64,
        increment_step: i64,
    ) -> Result<AutoBid, ServiceError> {
        let mut inner = self.lock();
        if let Some(rule) = inner
            .auto_bids
            .iter_mut()
            .find(|r| r.auction_id == auction_id && r.bidder_id == bidder_id)
        {
            rule.max_amount = max_amount;
            rule.increment_step = increment_step;
            rule.active = true;
            return Ok(rule.clone());
        }
        inner.next_rule_id += 1;
        let rule = AutoBid {
            id: inner.next_rule_id,
            auction_id,
            bidder_id,
            max_amount,
            increment_step,
            active: true,
            bids_placed: 0,
            created_at: Utc::now(),
        };
        inner.auto_bids.push(rule.clone());
        Ok(rule)
    }

    async fn settle(
        &self,
        auction_id: i64,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<SettleOutcome, ServiceError> {
        let mut inner = self.lock();
        let inner = &mut *inner;
        let Some(auction) = inner.auctions.get_mut(&auction_id) else {
            return Err(ServiceError::rule(CODE_NOT_FOUND, "경매를 찾을 수 없습니다."));
        };
        if auction.status != AUCTION_ACTIVE {
            return Ok(SettleOutcome::AlreadySettled);
        }
        if !force && auction.end_time > now {
            return Ok(SettleOutcome::NotDue);
        }

        for bid in inner
            .bids
            .iter_mut()
            .filter(|b| b.auction_id == auction_id && b.status == BID_ACTIVE)
        {
            if bid.created_at > auction.end_time {
                bid.status = BID_REJECTED.to_string();
            }
        }

        let top = inner
            .bids
            .iter()
            .filter(|b| b.auction_id == auction_id && b.status == BID_ACTIVE)
            .max_by(|a, b| {
                a.amount
                    .cmp(&b.amount)
                    .then(b.created_at.cmp(&a.created_at))
            })
            .cloned();

        match top {
            Some(bid) => {
                auction.status = AUCTION_COMPLETED.to_string();
                auction.winner_id = Some(bid.bidder_id);
                auction.final_price = Some(bid.amount);
                Ok(SettleOutcome::Completed {
                    winner_id: bid.bidder_id,
                    final_price: bid.amount,
                    seller_id: auction.seller_id,
                    product_id: auction.product_id,
                })
            }
            None => {
                auction.status = AUCTION_FAILED.to_string();
                Ok(SettleOutcome::Failed)
            }
        }
    }

    async fn expired_auctions(&self, now: DateTime<Utc>) -> Result<Vec<i64>, ServiceError> {
        Ok(self
            .lock()
            .auctions
            .values()
            .filter(|a| a.status == AUCTION_ACTIVE && a.end_time <= now)
            .map(|a| a.id)
            .collect())
    }

    async fn recent_bids(&self, auction_id: i64, limit: i64) -> Result<Vec<Bid>, ServiceError> {
        let inner = self.lock();
        let mut bids: Vec<Bid> = inner
            .bids
            .iter()
            .filter(|b| b.auction_id == auction_id && b.status == BID_ACTIVE)
            .cloned()
            .collect();
        bids.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        bids.truncate(limit as usize);
        Ok(bids)
    }
}

// endregion: --- Memory Store
