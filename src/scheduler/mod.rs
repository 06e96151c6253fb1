/// 경매 시계
/// 1초 틱마다 두 가지 일을 한다.
/// 1. 참여자가 있는 방에 남은 시간을 송출하고 임계 통과 시 경고를 1회 보낸다.
/// 2. 마감된 경매를 찾아 정산을 건다.
/// 틱 작업은 인라인으로 기다리므로 같은 경매에 대한 정산이 겹치지 않는다.
// region:    --- Imports
use crate::auction::engine::{AuctionEngine, SettleTrigger};
use crate::auction::store::AuctionStore;
use crate::gateway::registry::RoomRegistry;
use crate::gateway::{Frame, OutboundPayload};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

// endregion: --- Imports

// region:    --- Auction Clock

/// 경고 임계값 (초). 내림차순이어야 한다.
const WARNING_THRESHOLDS: [i64; 2] = [300, 60];

/// 임계 통과 판정: 직전 틱에는 임계 위, 이번 틱에는 임계 이하일 때만 참.
/// 연장으로 남은 시간이 다시 늘어나면 같은 임계가 재무장된다.
fn warning_crossed(prev: Option<i64>, current: i64, threshold: i64) -> bool {
    match prev {
        Some(prev) => prev > threshold && current <= threshold,
        None => false,
    }
}

pub struct AuctionClock<S: AuctionStore> {
    engine: Arc<AuctionEngine<S>>,
    registry: Arc<RoomRegistry>,
    prev_remaining: HashMap<i64, i64>,
}

impl<S: AuctionStore + 'static> AuctionClock<S> {
    pub fn new(engine: Arc<AuctionEngine<S>>, registry: Arc<RoomRegistry>) -> Self {
        Self {
            engine,
            registry,
            prev_remaining: HashMap::new(),
        }
    }

    pub fn start(mut self) {
        tokio::spawn(async move {
            info!("{:<12} --> 경매 시계 시작", "Clock");
            let mut interval = interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                self.broadcast_countdowns().await;
                self.settle_expired().await;
            }
        });
    }

    /// 참여자가 있는 방에만 카운트다운을 송출한다.
    async fn broadcast_countdowns(&mut self) {
        let now = Utc::now();
        let rooms = self.registry.rooms_with_members();
        self.prev_remaining.retain(|id, _| rooms.contains(id));

        for auction_id in rooms {
            let auction = match self.engine.store().fetch_auction(auction_id).await {
                Ok(Some(auction)) => auction,
                Ok(None) => continue,
                Err(err) => {
                    error!("{:<12} --> 경매 조회 실패 id: {}, {:?}", "Clock", auction_id, err);
                    continue;
                }
            };
            let remaining = auction.seconds_remaining(now);
            let prev = self.prev_remaining.insert(auction_id, remaining);

            self.registry.broadcast(
                auction_id,
                &Frame::now(OutboundPayload::CountdownUpdate {
                    auction_id,
                    seconds_remaining: remaining,
                    participants: self.registry.participants(auction_id),
                }),
            );

            for threshold in WARNING_THRESHOLDS {
                if warning_crossed(prev, remaining, threshold) {
                    self.registry.broadcast(
                        auction_id,
                        &Frame::now(OutboundPayload::AuctionWarning {
                            auction_id,
                            seconds_remaining: remaining,
                        }),
                    );
                }
            }
        }
    }

    /// 마감된 경매 정산. 실패는 다음 틱에 재시도된다.
    async fn settle_expired(&self) {
        let now = Utc::now();
        let expired = match self.engine.store().expired_auctions(now).await {
            Ok(expired) => expired,
            Err(err) => {
                error!("{:<12} --> 마감 경매 조회 실패: {:?}", "Clock", err);
                return;
            }
        };
        for auction_id in expired {
            info!("{:<12} --> 경매 마감 감지 id: {}", "Clock", auction_id);
            if let Err(err) = self
                .engine
                .settle_auction(auction_id, SettleTrigger::Expired)
                .await
            {
                error!("{:<12} --> 정산 실패 id: {}, {:?}", "Clock", auction_id, err);
            }
        }
    }
}

// endregion: --- Auction Clock

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_crossed_is_edge_triggered() {
        // 첫 관측에는 경고하지 않는다
        assert!(!warning_crossed(None, 50, 60));
        // 임계 통과 순간만 참
        assert!(warning_crossed(Some(61), 60, 60));
        assert!(warning_crossed(Some(63), 59, 60));
        // 임계 아래에 머무는 동안 반복 경고 없음
        assert!(!warning_crossed(Some(60), 59, 60));
        assert!(!warning_crossed(Some(59), 58, 60));
        // 연장으로 다시 올라가면 재무장
        assert!(!warning_crossed(Some(59), 180, 60));
        assert!(warning_crossed(Some(180), 55, 60));
    }

    #[test]
    fn test_warning_thresholds_both_fire_independently() {
        assert!(warning_crossed(Some(301), 300, 300));
        assert!(!warning_crossed(Some(301), 300, 60));
        assert!(warning_crossed(Some(90), 42, 60));
    }
}

// endregion: --- Tests
