/// 원장 저장소 (Ledger Store)
/// 경매/입찰/자동입찰/에스크로 테이블에 대한 풀 관리와
/// 다중 구문 트랜잭션 실행을 담당한다.
// region:    --- Imports
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;

// endregion: --- Imports

// region:    --- Database Manager
pub struct DatabaseManager {
    pool: Arc<PgPool>,
}

impl DatabaseManager {
    /// 데이터베이스 매니저 생성 (DATABASE_URL 환경 변수 필수)
    pub async fn new() -> Self {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(&database_url)
            .await
            .expect("Failed to create pool");
        Self {
            pool: Arc::new(pool),
        }
    }

    /// 데이터베이스 풀 가져오기
    pub fn get_pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }

    /// 트랜잭션 실행
    /// 집계(경매, 에스크로 계정) 단위의 모든 변경은 이 헬퍼 안에서
    /// 전부 적용되거나 전부 롤백된다.
    pub async fn transaction<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: for<'c> FnOnce(
            &'c mut sqlx::Transaction<'_, sqlx::Postgres>,
        ) -> Pin<Box<dyn Future<Output = Result<R, E>> + Send + 'c>>,
        E: From<sqlx::Error>,
    {
        let mut tx = self.pool.begin().await?;
        let result = f(&mut tx).await;
        match result {
            Ok(r) => {
                tx.commit().await?;
                Ok(r)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    /// 스키마 초기화 (기존 테이블 제거 후 재생성)
    pub async fn initialize_database(&self) -> Result<(), sqlx::Error> {
        self.execute_multi_query(include_str!("../sql/00-recreate-db.sql"))
            .await?;
        self.execute_multi_query(include_str!("../sql/01-create-schema.sql"))
            .await?;
        info!("{:<12} --> 스키마 초기화 완료", "Database");
        Ok(())
    }

    /// 세미콜론으로 구분된 여러 쿼리 실행
    async fn execute_multi_query(&self, sql: &str) -> Result<(), sqlx::Error> {
        for query in sql.split(';') {
            let query = query.trim();
            if !query.is_empty() {
                sqlx::query(query).execute(&*self.pool).await?;
            }
        }
        Ok(())
    }
}
// endregion: --- Database Manager
