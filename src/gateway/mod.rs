/// WebSocket 게이트웨이
/// 1. 연결당 1 읽기 루프 + 1 쓰기 태스크 (mpsc 로 분리)
/// 2. 인증 -> 방 참여 -> 입찰/조회 상태 기계
/// 3. 엔진 이벤트 펌프가 수락 이벤트를 방 단위로 전파
pub mod registry;

// region:    --- Imports
use crate::auction::engine::PlaceBidCommand;
use crate::auction::events::{AuctionEvent, EventReceiver};
use crate::auction::model::{AuctionSnapshot, AUCTION_ACTIVE};
use crate::error::{CODE_INVALID_STATUS, CODE_UNAUTHORIZED};
use crate::handlers::AppState;
use crate::query;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use registry::RoomRegistry;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

// endregion: --- Imports

// region:    --- Frames

fn default_quantity() -> i32 {
    1
}

/// 클라이언트 -> 서버 프레임
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Authenticate {
        user_id: i64,
        session_token: String,
    },
    JoinAuction {
        auction_id: i64,
    },
    LeaveAuction {
        auction_id: i64,
    },
    PlaceBid {
        auction_id: i64,
        amount: i64,
        #[serde(default = "default_quantity")]
        quantity: i32,
    },
    Heartbeat,
    GetAuctionStatus {
        auction_id: i64,
    },
}

/// 서버 -> 클라이언트 페이로드
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundPayload {
    AuthSuccess {
        user_id: i64,
    },
    Error {
        code: String,
        message: String,
    },
    AuctionSnapshot(AuctionSnapshot),
    BidReceipt {
        bid_id: i64,
        accepted_amount: i64,
        end_time: DateTime<Utc>,
        extended: bool,
    },
    BidAccepted {
        auction_id: i64,
        bidder_id: i64,
        amount: i64,
        quantity: i32,
        is_proxy: bool,
        extended: bool,
        end_time: DateTime<Utc>,
    },
    AuctionExtended {
        auction_id: i64,
        end_time: DateTime<Utc>,
        extension_count: i32,
    },
    AuctionEnded {
        auction_id: i64,
        status: String,
        winner_id: Option<i64>,
        final_price: Option<i64>,
    },
    CountdownUpdate {
        auction_id: i64,
        seconds_remaining: i64,
        participants: usize,
    },
    AuctionWarning {
        auction_id: i64,
        seconds_remaining: i64,
    },
    UserJoined {
        auction_id: i64,
        user_id: i64,
        participants: usize,
    },
    UserLeft {
        auction_id: i64,
        user_id: i64,
        participants: usize,
    },
    HeartbeatAck,
}

/// 송신 프레임: 페이로드 + 서버 시각
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    #[serde(flatten)]
    pub payload: OutboundPayload,
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    pub fn now(payload: OutboundPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }

    fn at(payload: OutboundPayload, timestamp: DateTime<Utc>) -> Self {
        Self { payload, timestamp }
    }
}

// endregion: --- Frames

// region:    --- WebSocket Handler

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// 연결당 송신 버퍼 크기. 초과분은 유실된다.
const SEND_BUFFER: usize = 64;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    info!("{:<12} --> 연결 수립 conn: {}", "Gateway", conn_id);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Frame>(SEND_BUFFER);

    // 쓰기 전담 태스크. 직렬화 실패는 프레임 단위로 건너뛴다.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut user_id: Option<i64> = None;

    while let Some(Ok(msg)) = ws_rx.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let frame = match serde_json::from_str::<InboundFrame>(&text) {
            Ok(frame) => frame,
            Err(err) => {
                send(&tx, error_payload("BAD_FRAME", &err.to_string())).await;
                continue;
            }
        };
        handle_frame(&state, &tx, conn_id, &mut user_id, frame).await;
    }

    // 연결 종료: 모든 방에서 퇴장 처리 후 남은 인원에게 알린다.
    let left = state.registry.drop_connection(conn_id);
    if let Some(user_id) = user_id {
        for (auction_id, participants) in left {
            state.registry.broadcast(
                auction_id,
                &Frame::now(OutboundPayload::UserLeft {
                    auction_id,
                    user_id,
                    participants,
                }),
            );
        }
    }
    writer.abort();
    info!("{:<12} --> 연결 종료 conn: {}", "Gateway", conn_id);
}

async fn handle_frame(
    state: &AppState,
    tx: &mpsc::Sender<Frame>,
    conn_id: u64,
    user_id: &mut Option<i64>,
    frame: InboundFrame,
) {
    match frame {
        InboundFrame::Authenticate {
            user_id: claimed,
            session_token,
        } => {
            let valid = query::handlers::validate_session(&state.db, claimed, &session_token)
                .await
                .unwrap_or(false);
            if valid {
                *user_id = Some(claimed);
                send(tx, OutboundPayload::AuthSuccess { user_id: claimed }).await;
            } else {
                // 인증 실패는 거절 프레임만 보내고 연결은 유지한다.
                warn!("{:<12} --> 인증 실패 user: {}", "Gateway", claimed);
                send(tx, error_payload(CODE_UNAUTHORIZED, "세션 인증에 실패했습니다.")).await;
            }
        }
        InboundFrame::JoinAuction { auction_id } => {
            let Some(user) = *user_id else {
                send(tx, error_payload(CODE_UNAUTHORIZED, "인증이 필요합니다.")).await;
                return;
            };
            match state.engine.snapshot(auction_id).await {
                Ok(snapshot) if snapshot.status == AUCTION_ACTIVE => {
                    let participants = state.registry.join(auction_id, conn_id, tx.clone());
                    send(tx, OutboundPayload::AuctionSnapshot(snapshot)).await;
                    state.registry.broadcast(
                        auction_id,
                        &Frame::now(OutboundPayload::UserJoined {
                            auction_id,
                            user_id: user,
                            participants,
                        }),
                    );
                }
                Ok(_) => {
                    send(
                        tx,
                        error_payload(CODE_INVALID_STATUS, "진행 중인 경매가 아닙니다."),
                    )
                    .await;
                }
                Err(err) => send(tx, error_from(err)).await,
            }
        }
        InboundFrame::LeaveAuction { auction_id } => {
            let participants = state.registry.leave(auction_id, conn_id);
            if let Some(user) = *user_id {
                state.registry.broadcast(
                    auction_id,
                    &Frame::now(OutboundPayload::UserLeft {
                        auction_id,
                        user_id: user,
                        participants,
                    }),
                );
            }
        }
        InboundFrame::PlaceBid {
            auction_id,
            amount,
            quantity,
        } => {
            let Some(user) = *user_id else {
                send(tx, error_payload(CODE_UNAUTHORIZED, "인증이 필요합니다.")).await;
                return;
            };
            let cmd = PlaceBidCommand {
                auction_id,
                bidder_id: user,
                amount,
                quantity,
            };
            match state.engine.place_bid(cmd).await {
                Ok(receipt) => {
                    send(
                        tx,
                        OutboundPayload::BidReceipt {
                            bid_id: receipt.bid_id,
                            accepted_amount: receipt.accepted_amount,
                            end_time: receipt.end_time,
                            extended: receipt.extended,
                        },
                    )
                    .await;
                }
                Err(err) => send(tx, error_from(err)).await,
            }
        }
        InboundFrame::Heartbeat => {
            if let Some(user) = *user_id {
                if let Err(err) = query::handlers::touch_session(&state.db, user).await {
                    warn!("{:<12} --> 세션 갱신 실패: {:?}", "Gateway", err);
                }
            }
            send(tx, OutboundPayload::HeartbeatAck).await;
        }
        InboundFrame::GetAuctionStatus { auction_id } => {
            match state.engine.snapshot(auction_id).await {
                Ok(snapshot) => send(tx, OutboundPayload::AuctionSnapshot(snapshot)).await,
                Err(err) => send(tx, error_from(err)).await,
            }
        }
    }
}

async fn send(tx: &mpsc::Sender<Frame>, payload: OutboundPayload) {
    let _ = tx.send(Frame::now(payload)).await;
}

fn error_payload(code: &str, message: &str) -> OutboundPayload {
    OutboundPayload::Error {
        code: code.to_string(),
        message: message.to_string(),
    }
}

fn error_from(err: crate::error::ServiceError) -> OutboundPayload {
    use crate::error::ServiceError;
    let code = match &err {
        ServiceError::Validation { .. } => "INVALID_REQUEST",
        ServiceError::Rule { code, .. } => code,
        ServiceError::Conflict => "RETRY",
        ServiceError::Store(_) => "STORE_ERROR",
    };
    OutboundPayload::Error {
        code: code.to_string(),
        message: err.to_string(),
    }
}

// endregion: --- WebSocket Handler

// region:    --- Event Pump

/// 엔진 이벤트를 방 구독자에게 전파한다.
/// 수락 순서가 곧 전파 순서다.
pub fn spawn_event_pump(mut events: EventReceiver, registry: Arc<RoomRegistry>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let auction_id = event.auction_id();
            let frame = match event {
                AuctionEvent::BidAccepted {
                    auction_id,
                    bidder_id,
                    amount,
                    quantity,
                    is_proxy,
                    extended,
                    end_time,
                    timestamp,
                } => Frame::at(
                    OutboundPayload::BidAccepted {
                        auction_id,
                        bidder_id,
                        amount,
                        quantity,
                        is_proxy,
                        extended,
                        end_time,
                    },
                    timestamp,
                ),
                AuctionEvent::AuctionExtended {
                    auction_id,
                    end_time,
                    extension_count,
                    timestamp,
                } => Frame::at(
                    OutboundPayload::AuctionExtended {
                        auction_id,
                        end_time,
                        extension_count,
                    },
                    timestamp,
                ),
                AuctionEvent::AuctionEnded {
                    auction_id,
                    status,
                    winner_id,
                    final_price,
                    timestamp,
                } => Frame::at(
                    OutboundPayload::AuctionEnded {
                        auction_id,
                        status,
                        winner_id,
                        final_price,
                    },
                    timestamp,
                ),
            };
            registry.broadcast(auction_id, &frame);
        }
        info!("{:<12} --> 이벤트 펌프 종료", "Gateway");
    });
}

// endregion: --- Event Pump

// region:    --- Tests


// endregion: --- Tests
