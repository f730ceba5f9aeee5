//! 메모리 백엔드: 커널 없이 어태치 시퀀스와 테이블을 구동
//!
//! 테스트와 데몬의 `--dry-run` 모드에서 사용합니다. 각 커널 단계 호출은
//! 호출 로그에 기록되며 [`FailurePlan`]으로 특정 단계를 실패시킬 수 있습니다.

use std::sync::{Arc, Mutex};

use microseg_core::error::DataplaneError;
use tokio::sync::mpsc;

use crate::attach::TcBackend;
use crate::flow::ChannelStream;
use crate::tables::{
    KernelTables, MemoryExactTable, MemorySessionTable, MemoryStatsTable, MemoryWildcardTable,
};

/// 이벤트 채널 버퍼 크기
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// 실패시킬 커널 단계
#[derive(Debug, Clone, Copy, Default)]
pub struct FailurePlan {
    pub load: bool,
    pub tcx: bool,
    pub clsact: bool,
    pub stale_filter: bool,
    pub netlink: bool,
    pub stream: bool,
    pub tables: bool,
    pub detach: bool,
    pub unload: bool,
}

/// 호출된 단계 이름 로그
pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

/// 메모리 기반 [`TcBackend`]
pub struct MemoryBackend {
    interfaces: Vec<String>,
    plan: FailurePlan,
    calls: CallLog,
    exact: Arc<Mutex<MemoryExactTable>>,
    wildcard: Arc<Mutex<MemoryWildcardTable>>,
    stats: Arc<Mutex<MemoryStatsTable>>,
    sessions: Arc<Mutex<MemorySessionTable>>,
    events_tx: Option<mpsc::Sender<Result<Vec<u8>, DataplaneError>>>,
    events_rx: Option<mpsc::Receiver<Result<Vec<u8>, DataplaneError>>>,
}

impl MemoryBackend {
    /// `lo` 인터페이스만 알고 있는 백엔드를 생성합니다.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            interfaces: vec!["lo".to_owned()],
            plan: FailurePlan::default(),
            calls: Arc::new(Mutex::new(Vec::new())),
            exact: Arc::new(Mutex::new(MemoryExactTable::new())),
            wildcard: Arc::new(Mutex::new(MemoryWildcardTable::new())),
            stats: Arc::new(Mutex::new(MemoryStatsTable::new(1))),
            sessions: Arc::new(Mutex::new(MemorySessionTable::new())),
            events_tx: Some(tx),
            events_rx: Some(rx),
        }
    }

    /// 해석 가능한 인터페이스 목록을 지정합니다.
    pub fn with_interfaces<I, S>(mut self, interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interfaces = interfaces.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_failures(mut self, plan: FailurePlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_wildcard_table(mut self, table: MemoryWildcardTable) -> Self {
        self.wildcard = Arc::new(Mutex::new(table));
        self
    }

    pub fn with_stats_table(mut self, table: MemoryStatsTable) -> Self {
        self.stats = Arc::new(Mutex::new(table));
        self
    }

    pub fn call_log(&self) -> CallLog {
        Arc::clone(&self.calls)
    }

    /// 커널이 쓴 것처럼 플로우 이벤트 레코드를 넣을 송신자
    ///
    /// 프로그램이 언로드되면 `None`을 반환합니다.
    pub fn event_sender(&self) -> Option<mpsc::Sender<Result<Vec<u8>, DataplaneError>>> {
        self.events_tx.clone()
    }

    pub fn exact_handle(&self) -> Arc<Mutex<MemoryExactTable>> {
        Arc::clone(&self.exact)
    }

    pub fn wildcard_handle(&self) -> Arc<Mutex<MemoryWildcardTable>> {
        Arc::clone(&self.wildcard)
    }

    pub fn stats_handle(&self) -> Arc<Mutex<MemoryStatsTable>> {
        Arc::clone(&self.stats)
    }

    pub fn session_handle(&self) -> Arc<Mutex<MemorySessionTable>> {
        Arc::clone(&self.sessions)
    }

    fn record(&self, call: &'static str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn injected(step: &str) -> String {
    format!("injected {step} failure")
}

impl TcBackend for MemoryBackend {
    type Stream = ChannelStream;

    fn resolve_interface(&self, interface: &str) -> Result<u32, DataplaneError> {
        self.record("resolve");
        self.interfaces
            .iter()
            .position(|name| name == interface)
            .map(|pos| pos as u32 + 1)
            .ok_or_else(|| DataplaneError::InterfaceNotFound(interface.to_owned()))
    }

    fn load_program(&mut self) -> Result<(), DataplaneError> {
        self.record("load");
        if self.plan.load {
            return Err(DataplaneError::ProgramLoadFailed(injected("load")));
        }
        Ok(())
    }

    fn attach_tcx(&mut self, interface: &str) -> Result<(), DataplaneError> {
        self.record("attach_tcx");
        if self.plan.tcx {
            return Err(DataplaneError::AttachFailed {
                interface: interface.to_owned(),
                reason: injected("tcx"),
            });
        }
        Ok(())
    }

    fn ensure_clsact(&mut self, interface: &str) -> Result<(), DataplaneError> {
        self.record("ensure_clsact");
        if self.plan.clsact {
            return Err(DataplaneError::AttachFailed {
                interface: interface.to_owned(),
                reason: injected("clsact"),
            });
        }
        Ok(())
    }

    fn remove_stale_filter(&mut self, interface: &str) -> Result<(), DataplaneError> {
        self.record("remove_stale_filter");
        if self.plan.stale_filter {
            return Err(DataplaneError::AttachFailed {
                interface: interface.to_owned(),
                reason: injected("filter removal"),
            });
        }
        Ok(())
    }

    fn attach_netlink(&mut self, interface: &str) -> Result<(), DataplaneError> {
        self.record("attach_netlink");
        if self.plan.netlink {
            return Err(DataplaneError::AttachFailed {
                interface: interface.to_owned(),
                reason: injected("netlink"),
            });
        }
        Ok(())
    }

    fn open_event_stream(&mut self) -> Result<ChannelStream, DataplaneError> {
        self.record("open_stream");
        if self.plan.stream {
            return Err(DataplaneError::EventStreamOpenFailed(injected("stream")));
        }
        self.events_rx
            .take()
            .map(ChannelStream::new)
            .ok_or_else(|| DataplaneError::EventStreamOpenFailed("stream already taken".to_owned()))
    }

    fn tables(&mut self) -> Result<KernelTables, DataplaneError> {
        self.record("tables");
        if self.plan.tables {
            return Err(DataplaneError::Map(injected("map lookup")));
        }
        Ok(KernelTables {
            exact: self.exact.clone(),
            wildcard: self.wildcard.clone(),
            stats: self.stats.clone(),
            sessions: self.sessions.clone(),
        })
    }

    fn detach(&mut self) -> Result<(), DataplaneError> {
        self.record("detach");
        if self.plan.detach {
            return Err(DataplaneError::Map(injected("detach")));
        }
        Ok(())
    }

    fn unload_program(&mut self) -> Result<(), DataplaneError> {
        self.record("unload");
        // 송신자를 놓아 열린 스트림이 닫힘을 관찰할 수 있게 함
        self.events_tx = None;
        if self.plan.unload {
            return Err(DataplaneError::Map(injected("unload")));
        }
        Ok(())
    }
}
