//! microseg 공통 크레이트
//!
//! 제어 평면의 모든 크레이트가 공유하는 도메인 타입, 에러, 설정, 메트릭 이름을 정의합니다.
//!
//! ```text
//! microseg-daemon
//!   ├── microseg-policy    (정책 변환, 테이블, 영속화)
//!   ├── microseg-dataplane (어태치, 통계, 플로우 이벤트)
//!   └── microseg-core      (이 크레이트)
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, DataplaneError, MicrosegError, PolicyError, StorageError};

// 설정
pub use config::MicrosegConfig;

// 도메인 타입
pub use types::{FlowEvent, FlowEventDetails, Policy, Statistics};
