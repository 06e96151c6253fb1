/// 경매 방 레지스트리
/// 연결 -> 참여 방 매핑을 단일 프로세스 메모리에 유지한다.
/// 쓰기 잠금은 짧게 잡고, 전송은 try_send 로 절대 블로킹하지 않는다.
// region:    --- Imports
use crate::gateway::Frame;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::warn;

// endregion: --- Imports

type Room = HashMap<u64, mpsc::Sender<Frame>>;

#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<i64, Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn rooms(&self) -> std::sync::RwLockReadGuard<'_, HashMap<i64, Room>> {
        self.rooms.read().unwrap_or_else(|e| e.into_inner())
    }

    fn rooms_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<i64, Room>> {
        self.rooms.write().unwrap_or_else(|e| e.into_inner())
    }

    /// 방 참여. 해당 방의 현재 인원 수를 돌려준다.
    pub fn join(&self, auction_id: i64, conn_id: u64, tx: mpsc::Sender<Frame>) -> usize {
        let mut rooms = self.rooms_mut();
        let room = rooms.entry(auction_id).or_default();
        room.insert(conn_id, tx);
        room.len()
    }

    /// 방 퇴장. 퇴장 후 남은 인원 수를 돌려준다. 빈 방은 제거한다.
    pub fn leave(&self, auction_id: i64, conn_id: u64) -> usize {
        let mut rooms = self.rooms_mut();
        let Some(room) = rooms.get_mut(&auction_id) else {
            return 0;
        };
        room.remove(&conn_id);
        let remaining = room.len();
        if remaining == 0 {
            rooms.remove(&auction_id);
        }
        remaining
    }

    /// 연결 종료 처리: 모든 방에서 제거하고 (방, 남은 인원) 목록을 돌려준다.
    pub fn drop_connection(&self, conn_id: u64) -> Vec<(i64, usize)> {
        let mut rooms = self.rooms_mut();
        let mut left = Vec::new();
        rooms.retain(|&auction_id, room| {
            if room.remove(&conn_id).is_some() {
                left.push((auction_id, room.len()));
            }
            !room.is_empty()
        });
        left
    }

    /// 방 전체에 프레임을 전파한다. 밀린 연결은 프레임을 잃고,
    /// 닫힌 연결은 방에서 제거한다.
    pub fn broadcast(&self, auction_id: i64, frame: &Frame) {
        let mut dead = Vec::new();
        {
            let rooms = self.rooms();
            let Some(room) = rooms.get(&auction_id) else {
                return;
            };
            for (&conn_id, tx) in room.iter() {
                match tx.try_send(frame.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(
                            "{:<12} --> 송신 버퍼 포화, 프레임 유실 conn: {}",
                            "Gateway", conn_id
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        dead.push(conn_id);
                    }
                }
            }
        }
        for conn_id in dead {
            self.leave(auction_id, conn_id);
        }
    }

    /// 인원이 있는 방 목록 (카운트다운 송출 대상)
    pub fn rooms_with_members(&self) -> Vec<i64> {
        self.rooms().keys().copied().collect()
    }

    pub fn participants(&self, auction_id: i64) -> usize {
        self.rooms().get(&auction_id).map_or(0, |r| r.len())
    }
}

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Frame, OutboundPayload};
    use chrono::Utc;

    fn frame() -> Frame {
        Frame {
            payload: OutboundPayload::HeartbeatAck,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_join_leave_counts() {
        let registry = RoomRegistry::new();
        let (tx1, _rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);

        assert_eq!(registry.join(1, 100, tx1), 1);
        assert_eq!(registry.join(1, 200, tx2), 2);
        assert_eq!(registry.participants(1), 2);

        assert_eq!(registry.leave(1, 100), 1);
        assert_eq!(registry.leave(1, 200), 0);
        // 빈 방은 제거
        assert!(registry.rooms_with_members().is_empty());
    }

    #[test]
    fn test_drop_connection_leaves_all_rooms() {
        let registry = RoomRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let (other, _rx2) = mpsc::channel(4);
        registry.join(1, 100, tx.clone());
        registry.join(2, 100, tx);
        registry.join(1, 200, other);

        let mut left = registry.drop_connection(100);
        left.sort();
        assert_eq!(left, vec![(1, 1), (2, 0)]);
        assert_eq!(registry.participants(1), 1);
        assert_eq!(registry.participants(2), 0);
    }

    #[tokio::test]
    async fn test_broadcast_delivers_and_prunes_closed() {
        let registry = RoomRegistry::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, rx2) = mpsc::channel(4);
        registry.join(1, 100, tx1);
        registry.join(1, 200, tx2);
        drop(rx2); // 닫힌 연결

        registry.broadcast(1, &frame());
        assert!(rx1.try_recv().is_ok());
        assert_eq!(registry.participants(1), 1);
    }
}

// endregion: --- Tests
