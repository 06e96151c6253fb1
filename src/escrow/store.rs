/// 에스크로 집계 저장소
/// 모든 변경은 원장 라인 추가와 잔액/상태 갱신을 한 트랜잭션으로 묶는다.
/// 잔액/상태 가드는 저장소 계층이, 역할/금액 정책은 원장(ledger)이 맡는다.
// region:    --- Imports
use crate::error::{
    ServiceError, CODE_ALREADY_PAID, CODE_INSUFFICIENT_BALANCE, CODE_INVALID_STATUS,
    CODE_NOT_FOUND,
};
use crate::escrow::model::{
    EscrowAccount, EscrowTransaction, Order, PaymentSchedule, ESCROW_FUNDED,
    ESCROW_PARTIALLY_REFUNDED, ESCROW_PARTIALLY_RELEASED, ESCROW_PENDING, ESCROW_REFUNDED,
    ESCROW_RELEASED, FULFILLMENT_CREATED, SCHEDULE_PAID, SCHEDULE_PENDING, TXN_DEPOSIT,
    TXN_REFUND, TXN_RELEASE,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// endregion: --- Imports

// region:    --- Store Contract

/// 출금 방향. 지급은 판매자에게, 환불은 구매자에게 간다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawKind {
    Release,
    Refund,
}

impl WithdrawKind {
    fn txn_type(self) -> &'static str {
        match self {
            Self::Release => TXN_RELEASE,
            Self::Refund => TXN_REFUND,
        }
    }

    /// 잔액 도달 상태: 0 이면 완료형, 아니면 부분형
    fn status_for(self, balance: i64) -> &'static str {
        match (self, balance) {
            (Self::Release, 0) => ESCROW_RELEASED,
            (Self::Release, _) => ESCROW_PARTIALLY_RELEASED,
            (Self::Refund, 0) => ESCROW_REFUNDED,
            (Self::Refund, _) => ESCROW_PARTIALLY_REFUNDED,
        }
    }

    /// 출금이 허용되는 계정 상태.
    /// 지급은 환불이 시작된 계정에서는 불가능하다. 환불은 관리자 개입이므로
    /// 부분 지급 이후에도 남은 잔액에 대해 허용된다.
    fn allowed_from(self, status: &str) -> bool {
        match self {
            Self::Release => matches!(status, ESCROW_FUNDED | ESCROW_PARTIALLY_RELEASED),
            Self::Refund => matches!(
                status,
                ESCROW_FUNDED | ESCROW_PARTIALLY_RELEASED | ESCROW_PARTIALLY_REFUNDED
            ),
        }
    }
}

#[async_trait]
pub trait EscrowStore: Send + Sync {
    /// 낙찰 정산: 주문과 대기 상태 에스크로 계정을 함께 생성
    async fn create_order_with_account(
        &self,
        auction_id: i64,
        buyer_id: i64,
        seller_id: i64,
        total_amount: i64,
    ) -> Result<Order, ServiceError>;
    async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, ServiceError>;
    async fn fetch_account(&self, order_id: i64) -> Result<Option<EscrowAccount>, ServiceError>;
    /// 입금. PENDING 상태에서만 허용되며 FUNDED 로 전이한다.
    async fn deposit(
        &self,
        order_id: i64,
        amount: i64,
        actor_id: i64,
        payment_ref: &str,
    ) -> Result<EscrowAccount, ServiceError>;
    /// 지급/환불. `amount` 가 없으면 잔액 전액.
    async fn withdraw(
        &self,
        order_id: i64,
        kind: WithdrawKind,
        amount: Option<i64>,
        actor_id: i64,
        reason: &str,
    ) -> Result<EscrowAccount, ServiceError>;
    async fn fetch_schedule(
        &self,
        schedule_id: i64,
    ) -> Result<Option<PaymentSchedule>, ServiceError>;
    async fn create_schedule(
        &self,
        order_id: i64,
        trigger_condition: &str,
        amount: i64,
    ) -> Result<PaymentSchedule, ServiceError>;
    /// 일정의 PENDING -> PAID 전이와 해당 금액의 지급을 한 트랜잭션으로 적용.
    /// 이미 PAID 면 ALREADY_PAID 로 거절한다 (이중 지급 방지).
    async fn pay_schedule(
        &self,
        schedule_id: i64,
        actor_id: i64,
    ) -> Result<EscrowAccount, ServiceError>;
    async fn transactions(&self, order_id: i64)
        -> Result<Vec<EscrowTransaction>, ServiceError>;
    /// 이행 단계 갱신 (외부 추적 협력자 대역)
    async fn set_fulfillment(&self, order_id: i64, stage: &str) -> Result<(), ServiceError>;
}

// endregion: --- Store Contract

// region:    --- Postgres Store

pub struct PgEscrowStore {
    pool: Arc<PgPool>,
}

impl PgEscrowStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// 트랜잭션 내부 출금 공통 처리 (withdraw / pay_schedule 에서 공유)
    async fn withdraw_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        order_id: i64,
        kind: WithdrawKind,
        amount: Option<i64>,
        actor_id: i64,
        reason: &str,
    ) -> Result<EscrowAccount, ServiceError> {
        let account = sqlx::query_as::<_, EscrowAccount>(
            "SELECT * FROM escrow_accounts WHERE order_id = $1 FOR UPDATE",
        )
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| ServiceError::rule(CODE_NOT_FOUND, "에스크로 계정을 찾을 수 없습니다."))?;

        if !kind.allowed_from(&account.status) {
            return Err(ServiceError::rule(
                CODE_INVALID_STATUS,
                "출금할 수 없는 에스크로 상태입니다.",
            ));
        }
        let amount = amount.unwrap_or(account.balance);
        if amount <= 0 {
            return Err(ServiceError::validation("출금 금액은 0보다 커야 합니다."));
        }
        if amount > account.balance {
            return Err(ServiceError::rule(
                CODE_INSUFFICIENT_BALANCE,
                "에스크로 잔액이 부족합니다.",
            ));
        }

        let new_balance = account.balance - amount;
        let updated = sqlx::query_as::<_, EscrowAccount>(
            "UPDATE escrow_accounts SET balance = $1, status = $2 WHERE id = $3 RETURNING *",
        )
        .bind(new_balance)
        .bind(kind.status_for(new_balance))
        .bind(account.id)
        .fetch_one(&mut **tx)
        .await?;

        sqlx::query(
            "INSERT INTO escrow_transactions (account_id, txn_type, amount, actor_id, reason) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(account.id)
        .bind(kind.txn_type())
        .bind(amount)
        .bind(actor_id)
        .bind(reason)
        .execute(&mut **tx)
        .await?;

        Ok(updated)
    }
}

#[async_trait]
impl EscrowStore for PgEscrowStore {
    async fn create_order_with_account(
        &self,
        auction_id: i64,
        buyer_id: i64,
        seller_id: i64,
        total_amount: i64,
    ) -> Result<Order, ServiceError> {
        let mut tx = self.pool.begin().await?;
        let order = sqlx::query_as::<_, Order>(
            "INSERT INTO orders (auction_id, buyer_id, seller_id, total_amount, fulfillment_status) \
             VALUES ($1, $2, $3, $4, 'CREATED') \
             RETURNING *",
        )
        .bind(auction_id)
        .bind(buyer_id)
        .bind(seller_id)
        .bind(total_amount)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO escrow_accounts (order_id, balance, status) VALUES ($1, 0, 'PENDING')",
        )
        .bind(order.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(order)
    }

    async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, ServiceError> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&*self.pool)
            .await?;
        Ok(order)
    }

    async fn fetch_account(&self, order_id: i64) -> Result<Option<EscrowAccount>, ServiceError> {
        let account = sqlx::query_as::<_, EscrowAccount>(
            "SELECT * FROM escrow_accounts WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&*self.pool)
        .await?;
        Ok(account)
    }

    async fn deposit(
        &self,
        order_id: i64,
        amount: i64,
        actor_id: i64,
        payment_ref: &str,
    ) -> Result<EscrowAccount, ServiceError> {
        let mut tx = self.pool.begin().await?;

        let account = sqlx::query_as::<_, EscrowAccount>(
            "SELECT * FROM escrow_accounts WHERE order_id = $1 FOR UPDATE",
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ServiceError::rule(CODE_NOT_FOUND, "에스크로 계정을 찾을 수 없습니다."))?;

        if account.status != ESCROW_PENDING {
            return Err(ServiceError::rule(
                CODE_INVALID_STATUS,
                "이미 입금이 완료된 에스크로 계정입니다.",
            ));
        }

        let updated = sqlx::query_as::<_, EscrowAccount>(
            "UPDATE escrow_accounts SET balance = balance + $1, status = 'FUNDED' \
             WHERE id = $2 RETURNING *",
        )
        .bind(amount)
        .bind(account.id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO escrow_transactions (account_id, txn_type, amount, payment_ref, actor_id) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(account.id)
        .bind(TXN_DEPOSIT)
        .bind(amount)
        .bind(payment_ref)
        .bind(actor_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn withdraw(
        &self,
        order_id: i64,
        kind: WithdrawKind,
        amount: Option<i64>,
        actor_id: i64,
        reason: &str,
    ) -> Result<EscrowAccount, ServiceError> {
        let mut tx = self.pool.begin().await?;
        let updated =
            Self::withdraw_in_tx(&mut tx, order_id, kind, amount, actor_id, reason).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn fetch_schedule(
        &self,
        schedule_id: i64,
    ) -> Result<Option<PaymentSchedule>, ServiceError> {
        let schedule =
            sqlx::query_as::<_, PaymentSchedule>("SELECT * FROM payment_schedules WHERE id = $1")
                .bind(schedule_id)
                .fetch_optional(&*self.pool)
                .await?;
        Ok(schedule)
    }

    async fn create_schedule(
        &self,
        order_id: i64,
        trigger_condition: &str,
        amount: i64,
    ) -> Result<PaymentSchedule, ServiceError> {
        let schedule = sqlx::query_as::<_, PaymentSchedule>(
            "INSERT INTO payment_schedules (order_id, trigger_condition, amount, status) \
             VALUES ($1, $2, $3, 'PENDING') \
             RETURNING *",
        )
        .bind(order_id)
        .bind(trigger_condition)
        .bind(amount)
        .fetch_one(&*self.pool)
        .await?;
        Ok(schedule)
    }

    async fn pay_schedule(
        &self,
        schedule_id: i64,
        actor_id: i64,
    ) -> Result<EscrowAccount, ServiceError> {
        let mut tx = self.pool.begin().await?;

        // 조건부 전이. 이미 PAID 면 아무 행도 갱신되지 않는다.
        let flipped = sqlx::query_as::<_, PaymentSchedule>(
            "UPDATE payment_schedules SET status = 'PAID' \
             WHERE id = $1 AND status = 'PENDING' \
             RETURNING *",
        )
        .bind(schedule_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            ServiceError::rule(CODE_ALREADY_PAID, "이미 지급이 완료된 일정입니다.")
        })?;

        // 지급 실패 시 전체 롤백으로 PAID 전이도 함께 취소된다
        let updated = Self::withdraw_in_tx(
            &mut tx,
            flipped.order_id,
            WithdrawKind::Release,
            Some(flipped.amount),
            actor_id,
            "마일스톤 지급",
        )
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn transactions(
        &self,
        order_id: i64,
    ) -> Result<Vec<EscrowTransaction>, ServiceError> {
        let txns = sqlx::query_as::<_, EscrowTransaction>(
            "SELECT t.* FROM escrow_transactions t \
             JOIN escrow_accounts a ON a.id = t.account_id \
             WHERE a.order_id = $1 \
             ORDER BY t.created_at ASC, t.id ASC",
        )
        .bind(order_id)
        .fetch_all(&*self.pool)
        .await?;
        Ok(txns)
    }

    async fn set_fulfillment(&self, order_id: i64, stage: &str) -> Result<(), ServiceError> {
        sqlx::query("UPDATE orders SET fulfillment_status = $1 WHERE id = $2")
            .bind(stage)
            .bind(order_id)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }
}

// endregion: --- Postgres Store

// region:    --- Memory Store

/// 인메모리 구현 (단위 테스트 및 로컬 개발용)
#[derive(Default)]
pub struct MemoryEscrowStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    orders: HashMap<i64, Order>,
    accounts: HashMap<i64, EscrowAccount>,
    transactions: Vec<EscrowTransaction>,
    schedules: HashMap<i64, PaymentSchedule>,
    next_order_id: i64,
    next_account_id: i64,
    next_txn_id: i64,
    next_schedule_id: i64,
}

impl MemoryEscrowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MemoryInner {
    fn account_by_order(&mut self, order_id: i64) -> Result<&mut EscrowAccount, ServiceError> {
        self.accounts
            .values_mut()
            .find(|a| a.order_id == order_id)
            .ok_or_else(|| ServiceError::rule(CODE_NOT_FOUND, "에스크로 계정을 찾을 수 없습니다."))
    }

    fn apply_withdraw(
        &mut self,
        order_id: i64,
        kind: WithdrawKind,
        amount: Option<i64>,
        actor_id: i64,
        reason: &str,
    ) -> Result<EscrowAccount, ServiceError> {
        self.next_txn_id += 1;
        let txn_id = self.next_txn_id;

        let account = self.account_by_order(order_id)?;
        if !kind.allowed_from(&account.status) {
            return Err(ServiceError::rule(
                CODE_INVALID_STATUS,
                "출금할 수 없는 에스크로 상태입니다.",
            ));
        }
        let amount = amount.unwrap_or(account.balance);
        if amount <= 0 {
            return Err(ServiceError::validation("출금 금액은 0보다 커야 합니다."));
        }
        if amount > account.balance {
            return Err(ServiceError::rule(
                CODE_INSUFFICIENT_BALANCE,
                "에스크로 잔액이 부족합니다.",
            ));
        }

        account.balance -= amount;
        account.status = kind.status_for(account.balance).to_string();
        let snapshot = account.clone();
        let account_id = snapshot.id;

        self.transactions.push(EscrowTransaction {
            id: txn_id,
            account_id,
            txn_type: kind.txn_type().to_string(),
            amount,
            payment_ref: None,
            actor_id,
            reason: Some(reason.to_string()),
            created_at: Utc::now(),
        });
        Ok(snapshot)
    }
}

#[async_trait]
impl EscrowStore for MemoryEscrowStore {
    async fn create_order_with_account(
        &self,
        auction_id: i64,
        buyer_id: i64,
        seller_id: i64,
        total_amount: i64,
    ) -> Result<Order, ServiceError> {
        let mut inner = self.lock();
        inner.next_order_id += 1;
        inner.next_account_id += 1;
        let order = Order {
            id: inner.next_order_id,
            auction_id,
            buyer_id,
            seller_id,
            total_amount,
            fulfillment_status: FULFILLMENT_CREATED.to_string(),
            created_at: Utc::now(),
        };
        let account = EscrowAccount {
            id: inner.next_account_id,
            order_id: order.id,
            balance: 0,
            status: ESCROW_PENDING.to_string(),
            created_at: Utc::now(),
        };
        inner.orders.insert(order.id, order.clone());
        inner.accounts.insert(account.id, account);
        Ok(order)
    }

    async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, ServiceError> {
        Ok(self.lock().orders.get(&order_id).cloned())
    }

    async fn fetch_account(&self, order_id: i64) -> Result<Option<EscrowAccount>, ServiceError> {
        Ok(self
            .lock()
            .accounts
            .values()
            .find(|a| a.order_id == order_id)
            .cloned())
    }

    async fn deposit(
        &self,
        order_id: i64,
        amount: i64,
        actor_id: i64,
        payment_ref: &str,
    ) -> Result<EscrowAccount, ServiceError> {
        let mut inner = self.lock();
        inner.next_txn_id += 1;
        let txn_id = inner.next_txn_id;

        let account = inner.account_by_order(order_id)?;
        if account.status != ESCROW_PENDING {
            return Err(ServiceError::rule(
                CODE_INVALID_STATUS,
                "이미 입금이 완료된 에스크로 계정입니다.",
            ));
        }
        account.balance += amount;
        account.status = ESCROW_FUNDED.to_string();
        let snapshot = account.clone();
        let account_id = snapshot.id;

        inner.transactions.push(EscrowTransaction {
            id: txn_id,
            account_id,
            txn_type: TXN_DEPOSIT.to_string(),
            amount,
            payment_ref: Some(payment_ref.to_string()),
            actor_id,
            reason: None,
            created_at: Utc::now(),
        });
        Ok(snapshot)
    }

    async fn withdraw(
        &self,
        order_id: i64,
        kind: WithdrawKind,
        amount: Option<i64>,
        actor_id: i64,
        reason: &str,
    ) -> Result<EscrowAccount, ServiceError> {
        self.lock()
            .apply_withdraw(order_id, kind, amount, actor_id, reason)
    }

    async fn fetch_schedule(
        &self,
        schedule_id: i64,
    ) -> Result<Option<PaymentSchedule>, ServiceError> {
        Ok(self.lock().schedules.get(&schedule_id).cloned())
    }

    async fn create_schedule(
        &self,
        order_id: i64,
        trigger_condition: &str,
        amount: i64,
    ) -> Result<PaymentSchedule, ServiceError> {
        let mut inner = self.lock();
        inner.next_schedule_id += 1;
        let schedule = PaymentSchedule {
            id: inner.next_schedule_id,
            order_id,
            trigger_condition: trigger_condition.to_string(),
            amount,
            status: SCHEDULE_PENDING.to_string(),
            created_at: Utc::now(),
        };
        inner.schedules.insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    async fn pay_schedule(
        &self,
        schedule_id: i64,
        actor_id: i64,
    ) -> Result<EscrowAccount, ServiceError> {
        let mut inner = self.lock();

        let (order_id, amount) = {
            let schedule = inner.schedules.get(&schedule_id).ok_or_else(|| {
                ServiceError::rule(CODE_NOT_FOUND, "지급 일정을 찾을 수 없습니다.")
            })?;
            if schedule.status != SCHEDULE_PENDING {
                return Err(ServiceError::rule(
                    CODE_ALREADY_PAID,
                    "이미 지급이 완료된 일정입니다.",
                ));
            }
            (schedule.order_id, schedule.amount)
        };

        // 지급이 거절되면 일정도 PENDING 으로 남는다 (원자성)
        let updated = inner.apply_withdraw(
            order_id,
            WithdrawKind::Release,
            Some(amount),
            actor_id,
            "마일스톤 지급",
        )?;
        if let Some(schedule) = inner.schedules.get_mut(&schedule_id) {
            schedule.status = SCHEDULE_PAID.to_string();
        }
        Ok(updated)
    }

    async fn transactions(
        &self,
        order_id: i64,
    ) -> Result<Vec<EscrowTransaction>, ServiceError> {
        let inner = self.lock();
        let account_id = inner
            .accounts
            .values()
            .find(|a| a.order_id == order_id)
            .map(|a| a.id);
        Ok(inner
            .transactions
            .iter()
            .filter(|t| Some(t.account_id) == account_id)
            .cloned()
            .collect())
    }

    async fn set_fulfillment(&self, order_id: i64, stage: &str) -> Result<(), ServiceError> {
        let mut inner = self.lock();
        let order = inner
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| ServiceError::rule(CODE_NOT_FOUND, "주문을 찾을 수 없습니다."))?;
        order.fulfillment_status = stage.to_string();
        Ok(())
    }
}

// endregion: --- Memory Store
