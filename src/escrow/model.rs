use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// region:    --- Status Constants
// 에스크로 계정 상태. 잔액 전이에서 파생된다.
pub const ESCROW_PENDING: &str = "PENDING";
pub const ESCROW_FUNDED: &str = "FUNDED";
pub const ESCROW_PARTIALLY_RELEASED: &str = "PARTIALLY_RELEASED";
pub const ESCROW_RELEASED: &str = "RELEASED";
pub const ESCROW_PARTIALLY_REFUNDED: &str = "PARTIALLY_REFUNDED";
pub const ESCROW_REFUNDED: &str = "REFUNDED";

// 원장 라인 유형
pub const TXN_DEPOSIT: &str = "DEPOSIT";
pub const TXN_RELEASE: &str = "RELEASE";
pub const TXN_REFUND: &str = "REFUND";

// 마일스톤 지급 일정 상태
pub const SCHEDULE_PENDING: &str = "PENDING";
pub const SCHEDULE_PAID: &str = "PAID";

// 주문 이행 단계 (외부 추적 협력자가 갱신)
pub const FULFILLMENT_CREATED: &str = "CREATED";
pub const FULFILLMENT_CONFIRMED: &str = "CONFIRMED";
pub const FULFILLMENT_SHIPPED: &str = "SHIPPED";
pub const FULFILLMENT_DELIVERED: &str = "DELIVERED";
pub const FULFILLMENT_QUALITY_APPROVED: &str = "QUALITY_APPROVED";

// 마일스톤 트리거 조건
pub const TRIGGER_ORDER_CONFIRMED: &str = "ORDER_CONFIRMED";
pub const TRIGGER_SHIPPED: &str = "SHIPPED";
pub const TRIGGER_DELIVERED: &str = "DELIVERED";
pub const TRIGGER_QUALITY_APPROVED: &str = "QUALITY_APPROVED";
// endregion: --- Status Constants

// region:    --- Stage Ordering

/// 이행 단계 서열. 트리거 조건은 해당 단계 이상에 도달하면 충족된다.
pub fn stage_rank(stage: &str) -> i32 {
    match stage {
        FULFILLMENT_CREATED => 0,
        FULFILLMENT_CONFIRMED => 1,
        FULFILLMENT_SHIPPED => 2,
        FULFILLMENT_DELIVERED => 3,
        FULFILLMENT_QUALITY_APPROVED => 4,
        _ => -1,
    }
}

/// 트리거 조건이 요구하는 최소 이행 단계
pub fn required_stage(trigger: &str) -> Option<&'static str> {
    match trigger {
        TRIGGER_ORDER_CONFIRMED => Some(FULFILLMENT_CONFIRMED),
        TRIGGER_SHIPPED => Some(FULFILLMENT_SHIPPED),
        TRIGGER_DELIVERED => Some(FULFILLMENT_DELIVERED),
        TRIGGER_QUALITY_APPROVED => Some(FULFILLMENT_QUALITY_APPROVED),
        _ => None,
    }
}

// endregion: --- Stage Ordering

// region:    --- Models

/// 주문 모델. 낙찰 정산 훅이 생성한다.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: i64,
    pub auction_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub total_amount: i64,
    pub fulfillment_status: String,
    pub created_at: DateTime<Utc>,
}

/// 에스크로 계정. 주문당 하나이며 잔액은 음수가 될 수 없다.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EscrowAccount {
    pub id: i64,
    pub order_id: i64,
    pub balance: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// 원장 라인 (추가 전용).
/// 계정의 입금 합계 - (지급 + 환불 합계)는 항상 잔액과 같다.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EscrowTransaction {
    pub id: i64,
    pub account_id: i64,
    pub txn_type: String,
    pub amount: i64,
    pub payment_ref: Option<String>,
    pub actor_id: i64,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 마일스톤 지급 일정
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PaymentSchedule {
    pub id: i64,
    pub order_id: i64,
    pub trigger_condition: String,
    pub amount: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// 감사용 명세 (계정 + 원장 라인)
#[derive(Debug, Clone, Serialize)]
pub struct EscrowStatement {
    pub account: EscrowAccount,
    pub transactions: Vec<EscrowTransaction>,
}

/// 호출자 신원. 인증은 외부 협력자가 끝낸 상태로 전달된다.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Buyer,
    Seller,
    Admin,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Actor {
    pub id: i64,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// endregion: --- Models
