/// 에스크로 원장
/// 1. 입금 (주문 총액 정확 일치 정책)
/// 2. 지급 / 환불 (역할 검증 + 잔액 가드)
/// 3. 마일스톤 지급 (이행 조건 평가, 이중 지급 방지)
/// 모든 공개 연산은 집계 기준으로 전부 적용되거나 전부 거절된다.
// region:    --- Imports
use crate::auction::engine::SettlementHook;
use crate::error::{
    ServiceError, CODE_ALREADY_PAID, CODE_AMOUNT_MISMATCH, CODE_CONDITIONS_NOT_MET,
    CODE_NOT_FOUND, CODE_UNAUTHORIZED,
};
use crate::escrow::model::{
    required_stage, stage_rank, Actor, EscrowAccount, EscrowStatement, Order, PaymentSchedule,
    Role, SCHEDULE_PENDING,
};
use crate::escrow::store::{EscrowStore, MemoryEscrowStore, PgEscrowStore, WithdrawKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

// endregion: --- Imports

// region:    --- Collaborator Seams

/// 알림 전달 추상화. 실제 채널(SMS/이메일)은 외부 협력자이며
/// 코어는 로그 기반 구현만 가진다.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: i64, message: &str);
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: i64, message: &str) {
        info!("{:<12} --> 알림 user: {}, {}", "Notify", user_id, message);
    }
}

/// 주문 이행 단계 조회. 공급망 추적 협력자의 코어 측 관문이다.
#[async_trait]
pub trait FulfillmentTracker: Send + Sync {
    async fn stage(&self, order_id: i64) -> Result<String, ServiceError>;
}

#[async_trait]
impl FulfillmentTracker for PgEscrowStore {
    async fn stage(&self, order_id: i64) -> Result<String, ServiceError> {
        let order = self
            .fetch_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::rule(CODE_NOT_FOUND, "주문을 찾을 수 없습니다."))?;
        Ok(order.fulfillment_status)
    }
}

#[async_trait]
impl FulfillmentTracker for MemoryEscrowStore {
    async fn stage(&self, order_id: i64) -> Result<String, ServiceError> {
        let order = self
            .fetch_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::rule(CODE_NOT_FOUND, "주문을 찾을 수 없습니다."))?;
        Ok(order.fulfillment_status)
    }
}

// endregion: --- Collaborator Seams

// region:    --- Commands

/// 입금 명령. 결제 확인은 외부 게이트웨이가 끝냈고 참조만 전달된다.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DepositCommand {
    pub order_id: i64,
    pub amount: i64,
    pub payer_id: i64,
    pub payment_ref: String,
}

/// 지급 명령. `amount` 가 없으면 잔액 전액 지급
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReleaseCommand {
    pub order_id: i64,
    pub amount: Option<i64>,
    pub reason: Option<String>,
    pub actor: Actor,
}

/// 환불 명령 (관리자 전용)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RefundCommand {
    pub order_id: i64,
    pub amount: Option<i64>,
    pub reason: Option<String>,
    pub actor: Actor,
}

/// 마일스톤 지급 명령
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MilestoneCommand {
    pub schedule_id: i64,
    pub actor: Actor,
}

// endregion: --- Commands

// region:    --- Escrow Ledger

pub struct EscrowLedger<S: EscrowStore> {
    store: Arc<S>,
    tracker: Arc<dyn FulfillmentTracker>,
    notifier: Arc<dyn Notifier>,
}

impl<S: EscrowStore> EscrowLedger<S> {
    pub fn new(
        store: Arc<S>,
        tracker: Arc<dyn FulfillmentTracker>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            tracker,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// 입금: 주문 총액과 정확히 일치해야 하며 부분 입금은 거절된다.
    pub async fn deposit(&self, cmd: DepositCommand) -> Result<EscrowAccount, ServiceError> {
        info!("{:<12} --> 입금 요청: {:?}", "Escrow", cmd);
        let order = self.fetch_order(cmd.order_id).await?;
        if cmd.payer_id != order.buyer_id {
            return Err(ServiceError::rule(
                CODE_UNAUTHORIZED,
                "주문의 구매자만 입금할 수 있습니다.",
            ));
        }
        if cmd.amount != order.total_amount {
            return Err(ServiceError::rule(
                CODE_AMOUNT_MISMATCH,
                format!("입금액은 주문 총액({})과 같아야 합니다.", order.total_amount),
            ));
        }

        let account = self
            .store
            .deposit(cmd.order_id, cmd.amount, cmd.payer_id, &cmd.payment_ref)
            .await?;
        self.notifier
            .notify(order.seller_id, "에스크로 입금이 완료되었습니다.")
            .await;
        Ok(account)
    }

    /// 지급: 구매자 본인 또는 관리자
    pub async fn release(&self, cmd: ReleaseCommand) -> Result<EscrowAccount, ServiceError> {
        info!("{:<12} --> 지급 요청: {:?}", "Escrow", cmd);
        let order = self.fetch_order(cmd.order_id).await?;
        self.authorize_buyer_or_admin(&cmd.actor, &order)?;

        let reason = cmd.reason.as_deref().unwrap_or("구매자 지급 승인");
        let account = self
            .store
            .withdraw(
                cmd.order_id,
                WithdrawKind::Release,
                cmd.amount,
                cmd.actor.id,
                reason,
            )
            .await?;
        self.notifier
            .notify(order.seller_id, "에스크로 대금이 지급되었습니다.")
            .await;
        Ok(account)
    }

    /// 환불: 관리자 전용, 구매자에게 돌아간다
    pub async fn refund(&self, cmd: RefundCommand) -> Result<EscrowAccount, ServiceError> {
        info!("{:<12} --> 환불 요청: {:?}", "Escrow", cmd);
        if !cmd.actor.is_admin() {
            return Err(ServiceError::rule(
                CODE_UNAUTHORIZED,
                "관리자만 환불할 수 있습니다.",
            ));
        }
        let order = self.fetch_order(cmd.order_id).await?;

        let reason = cmd.reason.as_deref().unwrap_or("관리자 환불");
        let account = self
            .store
            .withdraw(
                cmd.order_id,
                WithdrawKind::Refund,
                cmd.amount,
                cmd.actor.id,
                reason,
            )
            .await?;
        self.notifier
            .notify(order.buyer_id, "에스크로 환불이 처리되었습니다.")
            .await;
        Ok(account)
    }

    /// 마일스톤 지급. 조건 미충족이면 부수 효과 없이 거절되고,
    /// PENDING -> PAID 전이와 지급이 한 트랜잭션이므로 이중 지급이 없다.
    pub async fn milestone_payment(
        &self,
        cmd: MilestoneCommand,
    ) -> Result<EscrowAccount, ServiceError> {
        info!("{:<12} --> 마일스톤 지급 요청: {:?}", "Escrow", cmd);
        let schedule = self
            .store
            .fetch_schedule(cmd.schedule_id)
            .await?
            .ok_or_else(|| ServiceError::rule(CODE_NOT_FOUND, "지급 일정을 찾을 수 없습니다."))?;
        if schedule.status != SCHEDULE_PENDING {
            return Err(ServiceError::rule(
                CODE_ALREADY_PAID,
                "이미 지급이 완료된 일정입니다.",
            ));
        }

        let order = self.fetch_order(schedule.order_id).await?;
        self.authorize_buyer_or_admin(&cmd.actor, &order)?;

        let required = required_stage(&schedule.trigger_condition).ok_or_else(|| {
            ServiceError::validation("알 수 없는 지급 트리거 조건입니다.")
        })?;
        let current = self.tracker.stage(order.id).await?;
        if stage_rank(&current) < stage_rank(required) {
            return Err(ServiceError::rule(
                CODE_CONDITIONS_NOT_MET,
                format!("지급 조건({})이 아직 충족되지 않았습니다.", required),
            ));
        }

        let account = self.store.pay_schedule(cmd.schedule_id, cmd.actor.id).await?;
        self.notifier
            .notify(order.seller_id, "마일스톤 대금이 지급되었습니다.")
            .await;
        Ok(account)
    }

    /// 지급 일정 등록 (관리자 전용)
    pub async fn create_schedule(
        &self,
        order_id: i64,
        trigger_condition: &str,
        amount: i64,
        actor: Actor,
    ) -> Result<PaymentSchedule, ServiceError> {
        if !actor.is_admin() {
            return Err(ServiceError::rule(
                CODE_UNAUTHORIZED,
                "관리자만 지급 일정을 등록할 수 있습니다.",
            ));
        }
        if amount <= 0 {
            return Err(ServiceError::validation("지급 금액은 0보다 커야 합니다."));
        }
        if required_stage(trigger_condition).is_none() {
            return Err(ServiceError::validation("알 수 없는 지급 트리거 조건입니다."));
        }
        self.fetch_order(order_id).await?;
        self.store
            .create_schedule(order_id, trigger_condition, amount)
            .await
    }

    /// 감사용 명세: 계정 + 원장 라인
    pub async fn statement(&self, order_id: i64) -> Result<EscrowStatement, ServiceError> {
        let account = self
            .store
            .fetch_account(order_id)
            .await?
            .ok_or_else(|| ServiceError::rule(CODE_NOT_FOUND, "에스크로 계정을 찾을 수 없습니다."))?;
        let transactions = self.store.transactions(order_id).await?;
        Ok(EscrowStatement {
            account,
            transactions,
        })
    }

    async fn fetch_order(&self, order_id: i64) -> Result<Order, ServiceError> {
        self.store
            .fetch_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::rule(CODE_NOT_FOUND, "주문을 찾을 수 없습니다."))
    }

    fn authorize_buyer_or_admin(&self, actor: &Actor, order: &Order) -> Result<(), ServiceError> {
        let permitted = actor.is_admin() || (actor.role == Role::Buyer && actor.id == order.buyer_id);
        if !permitted {
            return Err(ServiceError::rule(
                CODE_UNAUTHORIZED,
                "주문의 구매자 또는 관리자만 가능합니다.",
            ));
        }
        Ok(())
    }
}

/// 낙찰 정산 훅: 낙찰자 주문과 대기 상태 에스크로 계정을 만든다.
#[async_trait]
impl<S: EscrowStore> SettlementHook for EscrowLedger<S> {
    async fn order_created(
        &self,
        auction_id: i64,
        _product_id: i64,
        winner_id: i64,
        seller_id: i64,
        final_price: i64,
    ) -> Result<i64, ServiceError> {
        let order = self
            .store
            .create_order_with_account(auction_id, winner_id, seller_id, final_price)
            .await?;
        info!(
            "{:<12} --> 낙찰 주문 생성 order: {}, auction: {}",
            "Escrow", order.id, auction_id
        );
        self.notifier
            .notify(winner_id, "낙찰되었습니다. 에스크로 입금을 진행해주세요.")
            .await;
        Ok(order.id)
    }
}

// endregion: --- Escrow Ledger

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{
        CODE_INSUFFICIENT_BALANCE, CODE_INVALID_STATUS,
    };
    use crate::escrow::model::{
        ESCROW_FUNDED, ESCROW_PARTIALLY_REFUNDED, ESCROW_PARTIALLY_RELEASED, ESCROW_RELEASED,
        FULFILLMENT_CONFIRMED, FULFILLMENT_SHIPPED, SCHEDULE_PAID, TRIGGER_SHIPPED, TXN_DEPOSIT,
        TXN_REFUND, TXN_RELEASE,
    };

    const ADMIN: Actor = Actor {
        id: 900,
        role: Role::Admin,
    };

    fn buyer(id: i64) -> Actor {
        Actor {
            id,
            role: Role::Buyer,
        }
    }

    fn test_ledger() -> EscrowLedger<MemoryEscrowStore> {
        let store = Arc::new(MemoryEscrowStore::new());
        EscrowLedger::new(store.clone(), store, Arc::new(LogNotifier))
    }

    /// 주문(총액 500, 구매자 10, 판매자 20) 생성 헬퍼
    async fn funded_order(ledger: &EscrowLedger<MemoryEscrowStore>) -> Order {
        let order = ledger
            .store()
            .create_order_with_account(1, 10, 20, 500)
            .await
            .unwrap();
        ledger
            .deposit(DepositCommand {
                order_id: order.id,
                amount: 500,
                payer_id: 10,
                payment_ref: "pay-001".to_string(),
            })
            .await
            .unwrap();
        order
    }

    #[tokio::test]
    async fn test_deposit_release_status_walk() {
        let ledger = test_ledger();
        let order = funded_order(&ledger).await;

        let account = ledger.store().fetch_account(order.id).await.unwrap().unwrap();
        assert_eq!((account.balance, account.status.as_str()), (500, ESCROW_FUNDED));

        let account = ledger
            .release(ReleaseCommand {
                order_id: order.id,
                amount: Some(300),
                reason: None,
                actor: buyer(10),
            })
            .await
            .unwrap();
        assert_eq!(
            (account.balance, account.status.as_str()),
            (200, ESCROW_PARTIALLY_RELEASED)
        );

        // 금액 생략 = 잔액 전액
        let account = ledger
            .release(ReleaseCommand {
                order_id: order.id,
                amount: None,
                reason: None,
                actor: buyer(10),
            })
            .await
            .unwrap();
        assert_eq!((account.balance, account.status.as_str()), (0, ESCROW_RELEASED));
    }

    #[tokio::test]
    async fn test_deposit_requires_exact_amount_and_buyer() {
        let ledger = test_ledger();
        let order = ledger
            .store()
            .create_order_with_account(1, 10, 20, 500)
            .await
            .unwrap();

        // 부분 입금 거절
        let err = ledger
            .deposit(DepositCommand {
                order_id: order.id,
                amount: 300,
                payer_id: 10,
                payment_ref: "pay-001".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(CODE_AMOUNT_MISMATCH));

        // 구매자가 아닌 입금 거절
        let err = ledger
            .deposit(DepositCommand {
                order_id: order.id,
                amount: 500,
                payer_id: 77,
                payment_ref: "pay-001".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(CODE_UNAUTHORIZED));

        // 부수 효과 없음
        let account = ledger.store().fetch_account(order.id).await.unwrap().unwrap();
        assert_eq!(account.balance, 0);
    }

    #[tokio::test]
    async fn test_double_deposit_rejected() {
        let ledger = test_ledger();
        let order = funded_order(&ledger).await;

        let err = ledger
            .deposit(DepositCommand {
                order_id: order.id,
                amount: 500,
                payer_id: 10,
                payment_ref: "pay-002".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(CODE_INVALID_STATUS));
    }

    #[tokio::test]
    async fn test_release_guards() {
        let ledger = test_ledger();
        let order = funded_order(&ledger).await;

        // 잔액 초과 지급 거절
        let err = ledger
            .release(ReleaseCommand {
                order_id: order.id,
                amount: Some(600),
                reason: None,
                actor: buyer(10),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(CODE_INSUFFICIENT_BALANCE));

        // 다른 구매자 거절
        let err = ledger
            .release(ReleaseCommand {
                order_id: order.id,
                amount: Some(100),
                reason: None,
                actor: buyer(77),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(CODE_UNAUTHORIZED));

        // 입금 전 지급 거절
        let empty = ledger
            .store()
            .create_order_with_account(2, 11, 21, 300)
            .await
            .unwrap();
        let err = ledger
            .release(ReleaseCommand {
                order_id: empty.id,
                amount: None,
                reason: None,
                actor: buyer(11),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(CODE_INVALID_STATUS));
    }

    #[tokio::test]
    async fn test_refund_is_admin_only() {
        let ledger = test_ledger();
        let order = funded_order(&ledger).await;

        let err = ledger
            .refund(RefundCommand {
                order_id: order.id,
                amount: Some(100),
                reason: None,
                actor: buyer(10),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(CODE_UNAUTHORIZED));

        let account = ledger
            .refund(RefundCommand {
                order_id: order.id,
                amount: Some(100),
                reason: Some("품질 하자".to_string()),
                actor: ADMIN,
            })
            .await
            .unwrap();
        assert_eq!(
            (account.balance, account.status.as_str()),
            (400, ESCROW_PARTIALLY_REFUNDED)
        );
    }

    #[tokio::test]
    async fn test_release_rejected_once_refund_has_started() {
        let ledger = test_ledger();
        let order = funded_order(&ledger).await;

        let account = ledger
            .refund(RefundCommand {
                order_id: order.id,
                amount: Some(100),
                reason: None,
                actor: ADMIN,
            })
            .await
            .unwrap();
        assert_eq!(account.status, ESCROW_PARTIALLY_REFUNDED);

        // 환불이 시작된 계정에는 지급이 불가능하다 (부수 효과 없음)
        let err = ledger
            .release(ReleaseCommand {
                order_id: order.id,
                amount: Some(100),
                reason: None,
                actor: buyer(10),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(CODE_INVALID_STATUS));
        let account = ledger.store().fetch_account(order.id).await.unwrap().unwrap();
        assert_eq!(
            (account.balance, account.status.as_str()),
            (400, ESCROW_PARTIALLY_REFUNDED)
        );

        // 남은 잔액 환불은 계속 가능하다
        let account = ledger
            .refund(RefundCommand {
                order_id: order.id,
                amount: None,
                reason: None,
                actor: ADMIN,
            })
            .await
            .unwrap();
        assert_eq!(
            (account.balance, account.status.as_str()),
            (0, crate::escrow::model::ESCROW_REFUNDED)
        );
    }

    #[tokio::test]
    async fn test_ledger_lines_always_reconcile_with_balance() {
        let ledger = test_ledger();
        let order = funded_order(&ledger).await;

        ledger
            .release(ReleaseCommand {
                order_id: order.id,
                amount: Some(150),
                reason: None,
                actor: buyer(10),
            })
            .await
            .unwrap();
        ledger
            .refund(RefundCommand {
                order_id: order.id,
                amount: Some(50),
                reason: None,
                actor: ADMIN,
            })
            .await
            .unwrap();

        let statement = ledger.statement(order.id).await.unwrap();
        let deposits: i64 = statement
            .transactions
            .iter()
            .filter(|t| t.txn_type == TXN_DEPOSIT)
            .map(|t| t.amount)
            .sum();
        let outflow: i64 = statement
            .transactions
            .iter()
            .filter(|t| t.txn_type == TXN_RELEASE || t.txn_type == TXN_REFUND)
            .map(|t| t.amount)
            .sum();
        assert_eq!(statement.account.balance, deposits - outflow);
        assert_eq!(statement.account.balance, 300);
    }

    #[tokio::test]
    async fn test_milestone_payment_waits_for_condition_then_pays_once() {
        let ledger = test_ledger();
        let order = funded_order(&ledger).await;
        let schedule = ledger
            .create_schedule(order.id, TRIGGER_SHIPPED, 200, ADMIN)
            .await
            .unwrap();

        // 아직 CONFIRMED 단계: 부수 효과 없이 거절
        ledger
            .store()
            .set_fulfillment(order.id, FULFILLMENT_CONFIRMED)
            .await
            .unwrap();
        let err = ledger
            .milestone_payment(MilestoneCommand {
                schedule_id: schedule.id,
                actor: ADMIN,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(CODE_CONDITIONS_NOT_MET));
        let account = ledger.store().fetch_account(order.id).await.unwrap().unwrap();
        assert_eq!(account.balance, 500);

        // 출하 후 지급
        ledger
            .store()
            .set_fulfillment(order.id, FULFILLMENT_SHIPPED)
            .await
            .unwrap();
        let account = ledger
            .milestone_payment(MilestoneCommand {
                schedule_id: schedule.id,
                actor: ADMIN,
            })
            .await
            .unwrap();
        assert_eq!(account.balance, 300);
        let paid = ledger
            .store()
            .fetch_schedule(schedule.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paid.status, SCHEDULE_PAID);

        // 두 번째 호출은 이중 지급 없이 거절
        let err = ledger
            .milestone_payment(MilestoneCommand {
                schedule_id: schedule.id,
                actor: ADMIN,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(CODE_ALREADY_PAID));
        let account = ledger.store().fetch_account(order.id).await.unwrap().unwrap();
        assert_eq!(account.balance, 300);
    }

    #[tokio::test]
    async fn test_settlement_hook_creates_order_and_pending_account() {
        let ledger = test_ledger();
        let order_id = ledger.order_created(9, 7, 55, 66, 1234).await.unwrap();

        let order = ledger.store().fetch_order(order_id).await.unwrap().unwrap();
        assert_eq!((order.buyer_id, order.seller_id, order.total_amount), (55, 66, 1234));
        let account = ledger.store().fetch_account(order_id).await.unwrap().unwrap();
        assert_eq!(account.balance, 0);
        assert_eq!(account.status, crate::escrow::model::ESCROW_PENDING);
    }
}

// endregion: --- Tests
