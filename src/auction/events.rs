use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// 엔진이 브로드캐스트 게이트웨이로 내보내는 이벤트
/// 같은 경매에 대한 이벤트는 발행 순서 그대로 방 전체에 전달된다.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AuctionEvent {
    // 입찰 수락 (수동/프록시 공통)
    BidAccepted {
        auction_id: i64,
        bidder_id: i64,
        amount: i64,
        quantity: i32,
        is_proxy: bool,
        extended: bool,
        end_time: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    // 마감 임박 입찰로 인한 연장
    AuctionExtended {
        auction_id: i64,
        end_time: DateTime<Utc>,
        extension_count: i32,
        timestamp: DateTime<Utc>,
    },
    // 정산 완료 (낙찰 또는 유찰)
    AuctionEnded {
        auction_id: i64,
        status: String,
        winner_id: Option<i64>,
        final_price: Option<i64>,
        timestamp: DateTime<Utc>,
    },
}

impl AuctionEvent {
    pub fn auction_id(&self) -> i64 {
        match self {
            Self::BidAccepted { auction_id, .. }
            | Self::AuctionExtended { auction_id, .. }
            | Self::AuctionEnded { auction_id, .. } => *auction_id,
        }
    }
}

/// 엔진에서 게이트웨이로 가는 인프로세스 이벤트 버스.
/// 엔진 입장에서는 보내고 잊는다 (전달 책임은 게이트웨이 소유).
pub type EventSender = mpsc::UnboundedSender<AuctionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<AuctionEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
