/// 서비스 공통 오류 타입
/// 1. 입력 검증 실패 (Validation)
/// 2. 비즈니스 규칙 위반 (Rule)
/// 3. 낙관적 업데이트 경합 소진 (Conflict)
/// 4. 저장소 장애 (Store)
// region:    --- Imports
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

// endregion: --- Imports

// region:    --- Error Codes
pub const CODE_NOT_FOUND: &str = "NOT_FOUND";
pub const CODE_NOT_STARTED: &str = "NOT_STARTED";
pub const CODE_ALREADY_ENDED: &str = "ALREADY_ENDED";
pub const CODE_LOW_BID: &str = "LOW_BID";
pub const CODE_BELOW_RESERVE: &str = "BELOW_RESERVE";
pub const CODE_INVALID_STATUS: &str = "INVALID_STATUS";
pub const CODE_UNAUTHORIZED: &str = "UNAUTHORIZED";
pub const CODE_AMOUNT_MISMATCH: &str = "AMOUNT_MISMATCH";
pub const CODE_INSUFFICIENT_BALANCE: &str = "INSUFFICIENT_BALANCE";
pub const CODE_ALREADY_PAID: &str = "ALREADY_PAID";
pub const CODE_CONDITIONS_NOT_MET: &str = "CONDITIONS_NOT_MET";
// endregion: --- Error Codes

// region:    --- ServiceError
#[derive(Debug, Error)]
pub enum ServiceError {
    /// 요청 형식이 잘못된 경우
    #[error("{message}")]
    Validation { message: String },

    /// 비즈니스 규칙 위반. 사용자에게 그대로 노출 가능
    #[error("{message}")]
    Rule {
        code: &'static str,
        message: String,
    },

    /// 낙관적 업데이트 충돌로 재시도 한도를 초과
    #[error("동시 요청이 많아 처리하지 못했습니다. 다시 시도해주세요.")]
    Conflict,

    /// 저장소 오류. 내부 정보는 응답에 노출하지 않는다
    #[error("저장소 오류: {0}")]
    Store(String),
}

impl ServiceError {
    pub fn rule(code: &'static str, message: impl Into<String>) -> Self {
        Self::Rule {
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// 비즈니스 규칙 코드 조회 (테스트 및 핸들러 분기용)
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Rule { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(e.to_string())
    }
}

/// HTTP 응답 매핑
/// 규칙 위반/검증 실패 -> 400, 경합 소진 -> 409, 저장소 오류 -> 500
impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation { message } => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": message, "code": "INVALID_REQUEST"})),
            )
                .into_response(),
            Self::Rule { code, message } => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": message, "code": code})),
            )
                .into_response(),
            Self::Conflict => (
                StatusCode::CONFLICT,
                Json(serde_json::json!({
                    "error": "동시 요청이 많아 처리하지 못했습니다. 다시 시도해주세요.",
                    "code": "RETRY"
                })),
            )
                .into_response(),
            Self::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "일시적인 오류가 발생했습니다. 다시 시도해주세요.",
                    "code": "STORE_ERROR"
                })),
            )
                .into_response(),
        }
    }
}
// endregion: --- ServiceError
