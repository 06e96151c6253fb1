use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// region:    --- Status Constants
// 경매 상태. ACTIVE 를 벗어나면 종결 상태이며 다시 열리지 않는다.
pub const AUCTION_ACTIVE: &str = "ACTIVE";
pub const AUCTION_COMPLETED: &str = "COMPLETED";
pub const AUCTION_FAILED: &str = "FAILED";

// 경매 유형
pub const TYPE_OPEN: &str = "OPEN";
pub const TYPE_RESERVE: &str = "RESERVE";

// 입찰 상태. 정산 시 종료 이후 입찰만 REJECTED 로 전환된다.
pub const BID_ACTIVE: &str = "ACTIVE";
pub const BID_REJECTED: &str = "REJECTED";
// endregion: --- Status Constants

// region:    --- Models

/// 경매 모델
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Auction {
    pub id: i64,
    pub product_id: i64,
    pub seller_id: i64,
    pub auction_type: String,
    pub start_price: i64,
    /// 현재 최고 입찰가 캐시. 0 이면 아직 입찰 없음
    pub current_bid: i64,
    pub bid_increment: i64,
    pub reserve_price: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub extension_count: i32,
    pub max_extensions: i32,
    pub extension_window_secs: i64,
    pub status: String,
    pub winner_id: Option<i64>,
    pub final_price: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Auction {
    /// 최소 수락 가능 입찰가: max(현재가 + 증가 단위, 시작가)
    pub fn minimum_bid(&self) -> i64 {
        (self.current_bid + self.bid_increment).max(self.start_price)
    }

    pub fn is_reserve(&self) -> bool {
        self.auction_type == TYPE_RESERVE
    }

    pub fn extension_window(&self) -> Duration {
        Duration::seconds(self.extension_window_secs)
    }

    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.end_time - now).num_seconds().max(0)
    }

    /// 마감 임박 입찰에 대한 연장 여부 판단
    /// 연장 시 종료 시각은 기존 종료 시각 기준으로 창 크기만큼 늘어난다.
    pub fn extension_on_bid(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.end_time - now <= self.extension_window()
            && self.extension_count < self.max_extensions
        {
            Some(self.end_time + self.extension_window())
        } else {
            None
        }
    }
}

/// 입찰 모델 (불변 기록)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Bid {
    pub id: i64,
    pub auction_id: i64,
    pub bidder_id: i64,
    pub amount: i64,
    pub quantity: i32,
    pub is_proxy: bool,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// 자동 입찰 규칙 모델. (경매, 입찰자) 당 하나만 활성화된다.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AutoBid {
    pub id: i64,
    pub auction_id: i64,
    pub bidder_id: i64,
    pub max_amount: i64,
    pub increment_step: i64,
    pub active: bool,
    pub bids_placed: i32,
    pub created_at: DateTime<Utc>,
}

/// 경매 생성 입력 (판매자 액션)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuction {
    pub product_id: i64,
    pub seller_id: i64,
    pub auction_type: String,
    pub start_price: i64,
    pub bid_increment: i64,
    pub reserve_price: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub max_extensions: i32,
    pub extension_window_secs: i64,
}

/// 경매 스냅샷 (입장 응답 및 상태 조회용)
#[derive(Debug, Clone, Serialize)]
pub struct AuctionSnapshot {
    pub auction_id: i64,
    pub status: String,
    pub auction_type: String,
    pub start_price: i64,
    pub current_bid: i64,
    pub bid_increment: i64,
    pub minimum_bid: i64,
    pub end_time: DateTime<Utc>,
    pub seconds_remaining: i64,
    pub extension_count: i32,
    pub recent_bids: Vec<Bid>,
}

impl AuctionSnapshot {
    pub fn from_parts(auction: &Auction, recent_bids: Vec<Bid>, now: DateTime<Utc>) -> Self {
        Self {
            auction_id: auction.id,
            status: auction.status.clone(),
            auction_type: auction.auction_type.clone(),
            start_price: auction.start_price,
            current_bid: auction.current_bid,
            bid_increment: auction.bid_increment,
            minimum_bid: auction.minimum_bid(),
            end_time: auction.end_time,
            seconds_remaining: auction.seconds_remaining(now),
            extension_count: auction.extension_count,
            recent_bids,
        }
    }
}

// endregion: --- Models
