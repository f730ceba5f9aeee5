//! 정책 관리 에러 타입
//!
//! [`PolicyManagerError`]는 정책 변환, 커널 테이블 갱신, 영속화 과정의 에러를 표현합니다.
//! `From<PolicyManagerError> for MicrosegError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use microseg_core::error::{DataplaneError, MicrosegError, PolicyError, StorageError};

/// 정책 관리 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum PolicyManagerError {
    /// 정책 필드 형식 오류 (주소, 프로토콜, 액션 등)
    #[error("invalid policy field '{field}': {reason}")]
    InvalidField {
        /// 문제가 된 필드명
        field: &'static str,
        /// 실패 사유
        reason: String,
    },

    /// 와일드카드 슬롯 부족
    #[error("wildcard policy table is full (max {capacity} entries)")]
    WildcardTableFull {
        /// 전체 슬롯 수
        capacity: u32,
    },

    /// 커널 테이블 조회/갱신 실패
    #[error("policy table error: {0}")]
    Table(#[from] DataplaneError),

    /// 룰을 찾을 수 없음
    #[error("policy not found: rule_id={0}")]
    NotFound(u32),

    /// 영속 저장소 에러
    #[error("policy storage error: {0}")]
    Storage(#[from] StorageError),

    /// 저장소 없이 복원 요청
    #[error("no policy storage configured")]
    StorageNotConfigured,
}

impl PolicyManagerError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

impl From<PolicyManagerError> for MicrosegError {
    fn from(err: PolicyManagerError) -> Self {
        match err {
            PolicyManagerError::InvalidField { field, reason } => {
                MicrosegError::Policy(PolicyError::InvalidPolicy(format!("{field}: {reason}")))
            }
            PolicyManagerError::WildcardTableFull { capacity } => {
                MicrosegError::Policy(PolicyError::TableFull { capacity })
            }
            PolicyManagerError::Table(e) => MicrosegError::Dataplane(e),
            PolicyManagerError::NotFound(rule_id) => {
                MicrosegError::Policy(PolicyError::NotFound(rule_id))
            }
            PolicyManagerError::Storage(e) => MicrosegError::Storage(e),
            PolicyManagerError::StorageNotConfigured => MicrosegError::Storage(StorageError::Io(
                "no policy storage configured".to_owned(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_field_display() {
        let err = PolicyManagerError::invalid("src_ip", "not an IPv4 address");
        assert_eq!(
            err.to_string(),
            "invalid policy field 'src_ip': not an IPv4 address"
        );
    }

    #[test]
    fn table_full_display() {
        let err = PolicyManagerError::WildcardTableFull { capacity: 1000 };
        assert!(err.to_string().contains("1000"));
    }

    #[test]
    fn converts_to_microseg_error() {
        let err: MicrosegError = PolicyManagerError::WildcardTableFull { capacity: 1000 }.into();
        assert!(matches!(
            err,
            MicrosegError::Policy(PolicyError::TableFull { capacity: 1000 })
        ));

        let err: MicrosegError = PolicyManagerError::NotFound(7).into();
        assert!(matches!(err, MicrosegError::Policy(PolicyError::NotFound(7))));

        let err: MicrosegError =
            PolicyManagerError::Table(DataplaneError::Map("busy".to_owned())).into();
        assert!(matches!(err, MicrosegError::Dataplane(DataplaneError::Map(_))));
    }

    #[test]
    fn storage_error_converts_via_question_mark() {
        fn fails() -> Result<(), PolicyManagerError> {
            Err(StorageError::Closed)?
        }
        assert!(matches!(
            fails(),
            Err(PolicyManagerError::Storage(StorageError::Closed))
        ));
    }
}
