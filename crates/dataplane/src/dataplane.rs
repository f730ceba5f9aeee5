//! 데이터 평면: 어태치된 분류기와 커널 테이블의 단일 소유 핸들
//!
//! [`DataPlane`]은 빌더 패턴([`DataPlaneBuilder`])으로 생성하며, 생성 시
//! 어태치 시퀀스를 실행하고 정책/세션/통계 테이블 핸들을 확보합니다.
//!
//! # 아키텍처
//! ```text
//! ┌──────────────────┐    ┌──────────────────────┐
//! │ TC classifier    │───▶│ FLOW_EVENTS RingBuf  │──▶ FlowMonitor (task)
//! │ (kernel)         │    └──────────────────────┘
//! │                  │◀── POLICY_MAP / WILDCARD_POLICY_MAP ◀── PolicyManager
//! │                  │──▶ STATS_MAP ──▶ StatsReader ──▶ Statistics
//! └──────────────────┘──▶ SESSION_MAP ──▶ sessions()
//! ```
//!
//! # 사용 예시
//! ```ignore
//! let mut dataplane = DataPlane::builder()
//!     .interface("eth0")
//!     .backend(AyaBackend::new("target/bpfel-unknown-none/release/microseg-ebpf"))
//!     .build()?;
//!
//! if let Some((monitor, cancel)) = dataplane.flow_monitor() {
//!     tokio::spawn(monitor.run(cancel));
//! }
//! let stats = dataplane.statistics();
//! dataplane.close()?;
//! ```

use microseg_core::config::DataplaneConfig;
use microseg_core::error::DataplaneError;
use microseg_core::types::Statistics;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::attach::{AttachState, AttachmentManager, TcBackend};
use crate::flow::FlowMonitor;
use crate::session::Session;
use crate::stats::StatsReader;
use crate::tables::{
    KernelTables, SharedExactTable, SharedSessionTable, SharedWildcardTable, lock,
};

/// 어태치된 데이터 평면
pub struct DataPlane<B: TcBackend> {
    manager: AttachmentManager<B>,
    tables: KernelTables,
    stats: StatsReader,
    stream: Option<B::Stream>,
}

/// 데이터 평면 빌더
pub struct DataPlaneBuilder<B> {
    interface: Option<String>,
    backend: Option<B>,
}

impl<B: TcBackend> DataPlaneBuilder<B> {
    fn new() -> Self {
        Self {
            interface: None,
            backend: None,
        }
    }

    /// 설정에서 인터페이스를 가져옵니다.
    pub fn config(self, config: &DataplaneConfig) -> Self {
        self.interface(&config.interface)
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn backend(mut self, backend: B) -> Self {
        self.backend = Some(backend);
        self
    }

    /// 어태치 시퀀스를 실행하고 테이블 핸들을 확보합니다.
    ///
    /// # 에러
    /// - 인터페이스/백엔드 누락 시 `InterfaceNotFound` / `ProgramLoadFailed`
    /// - 어태치 단계 실패 시 [`AttachmentManager::attach`]의 에러
    /// - 테이블 확보 실패 시 `Map` (이미 어태치된 경로는 정리됨)
    pub fn build(self) -> Result<DataPlane<B>, DataplaneError> {
        let interface = self
            .interface
            .ok_or_else(|| DataplaneError::InterfaceNotFound("<unset>".to_owned()))?;
        let backend = self
            .backend
            .ok_or_else(|| DataplaneError::ProgramLoadFailed("backend is required".to_owned()))?;

        let (mut manager, stream) = AttachmentManager::attach(backend, &interface)?;

        let tables = match manager.backend_mut().tables() {
            Ok(tables) => tables,
            Err(e) => {
                if let Err(teardown) = manager.close() {
                    warn!(error = %teardown, "teardown after table failure also failed");
                }
                return Err(e);
            }
        };

        Ok(DataPlane {
            manager,
            stats: StatsReader::new(tables.stats.clone()),
            tables,
            stream: Some(stream),
        })
    }
}

impl<B: TcBackend> DataPlane<B> {
    pub fn builder() -> DataPlaneBuilder<B> {
        DataPlaneBuilder::new()
    }

    /// 현재 통계 스냅샷 (실패하지 않음)
    pub fn statistics(&self) -> Statistics {
        self.stats.read()
    }

    pub fn stats_reader(&self) -> StatsReader {
        self.stats.clone()
    }

    pub fn policy_table(&self) -> SharedExactTable {
        self.tables.exact.clone()
    }

    pub fn wildcard_table(&self) -> SharedWildcardTable {
        self.tables.wildcard.clone()
    }

    pub fn session_table(&self) -> SharedSessionTable {
        self.tables.sessions.clone()
    }

    /// 네 가지 테이블 핸들 묶음
    pub fn tables(&self) -> KernelTables {
        self.tables.clone()
    }

    /// 현재 세션 목록
    pub fn sessions(&self) -> Result<Vec<Session>, DataplaneError> {
        let entries = lock(&self.tables.sessions)?.entries()?;
        Ok(entries
            .iter()
            .map(|(key, value)| Session::from_entry(key, value))
            .collect())
    }

    /// 이벤트 스트림을 꺼냅니다. 두 번째 호출부터는 `None`.
    pub fn take_event_stream(&mut self) -> Option<B::Stream> {
        self.stream.take()
    }

    /// 이벤트 스트림으로 모니터를 만들고 `close()` 시 취소되는 토큰과 함께 반환합니다.
    pub fn flow_monitor(&mut self) -> Option<(FlowMonitor<B::Stream>, CancellationToken)> {
        let stream = self.take_event_stream()?;
        Some((FlowMonitor::new(stream), self.manager.reader_token()))
    }

    pub fn attach_mode(&self) -> AttachState {
        self.manager.state()
    }

    pub fn interface(&self) -> &str {
        self.manager.interface()
    }

    pub fn backend(&self) -> &B {
        self.manager.backend()
    }

    /// 이벤트 리더 중지, 해제, 언로드 (멱등)
    pub fn close(&mut self) -> Result<(), DataplaneError> {
        self.stream = None;
        self.manager.close()
    }
}
