#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//! - [`attach`]: TC 분류기 어태치 상태 머신 (TCX 우선, clsact + netlink 폴백)
//! - [`dataplane`]: DataPlane: 어태치된 분류기와 커널 테이블의 단일 핸들
//! - [`flow`]: 플로우 이벤트 디코딩 + 취소 가능한 모니터 루프
//! - [`stats`]: PerCpuArray 통계 합산 및 처리량 계산
//! - [`tables`]: 정책/세션/통계 테이블 trait + 메모리 구현
//! - [`session`]: 세션 엔트리 스냅샷
//! - [`memory`]: 커널 없이 동작하는 백엔드 (테스트, dry-run)
//! - `kernel`: aya 기반 백엔드 (Linux 전용)
//!
//! # 공유 타입
//! 커널/유저스페이스 공유 타입은 [`microseg_ebpf_common`] 크레이트에 정의되어 있습니다.

pub mod attach;
pub mod dataplane;
pub mod flow;
#[cfg(target_os = "linux")]
pub mod kernel;
pub mod memory;
pub mod session;
pub mod stats;
pub mod tables;

// --- 주요 타입 re-export ---

// 데이터 평면
pub use attach::{AttachState, AttachmentManager, TcBackend};
pub use dataplane::{DataPlane, DataPlaneBuilder};

// 백엔드
#[cfg(target_os = "linux")]
pub use kernel::AyaBackend;
pub use memory::{FailurePlan, MemoryBackend};

// 플로우 이벤트
#[cfg(target_os = "linux")]
pub use flow::RingBufStream;
pub use flow::{ChannelStream, FlowEventStream, FlowMonitor, MonitorSummary, decode_flow_event};

// 통계 / 세션
pub use session::{Session, SessionState, TcpState};
pub use stats::{Rates, StatsReader, TrafficRates};

// 테이블
pub use tables::{
    ExactPolicyTable, KernelTables, SessionTable, SharedExactTable, SharedSessionTable,
    SharedStatsTable, SharedWildcardTable, StatsTable, WildcardPolicyTable,
};

// 공유 타입 (커널/유저스페이스 공통)
pub use microseg_ebpf_common;
