//! 어태치 관리: TC 분류기 로드/어태치/해제 상태 머신
//!
//! 커널 조작은 [`TcBackend`] trait 뒤에 있어 실제 커널([`crate::kernel::AyaBackend`])과
//! 메모리 백엔드([`crate::memory::MemoryBackend`])를 같은 시퀀스로 구동합니다.
//!
//! # 어태치 시퀀스
//! ```text
//! resolve_interface ──▶ load_program ──▶ attach_tcx ──ok──▶ AttachedPrimary
//!        │                   │               │
//!  InterfaceNotFound  ProgramLoadFailed     err (warn!)
//!                                            ▼
//!                     ensure_clsact ─▶ remove_stale_filter ─▶ attach_netlink ──ok──▶ AttachedLegacy
//!                                            │ err
//!                                            ▼
//!                                  unload_program, AttachFailed
//!
//! AttachedPrimary | AttachedLegacy ──▶ open_event_stream
//!                                           │ err
//!                                           ▼
//!                          detach, unload_program, EventStreamOpenFailed
//! ```

use std::fmt;

use microseg_core::error::DataplaneError;
use microseg_core::metrics as m;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::flow::FlowEventStream;
use crate::tables::KernelTables;

/// TC 분류기 커널 조작 추상화
///
/// 각 메서드는 하나의 커널 단계에 대응하며, 실패 시 원인 문자열을 담은
/// [`DataplaneError`]를 반환합니다. 단계 순서와 실패 처리는
/// [`AttachmentManager`]가 책임집니다.
pub trait TcBackend: Send {
    /// 플로우 이벤트 스트림 타입
    type Stream: FlowEventStream + 'static;

    /// 인터페이스 이름을 인덱스로 변환합니다.
    fn resolve_interface(&self, interface: &str) -> Result<u32, DataplaneError>;

    /// eBPF 오브젝트를 로드하고 분류기 프로그램을 검증기에 올립니다.
    fn load_program(&mut self) -> Result<(), DataplaneError>;

    /// TCX 링크로 ingress에 어태치합니다.
    fn attach_tcx(&mut self, interface: &str) -> Result<(), DataplaneError>;

    /// clsact qdisc를 보장합니다. 이미 존재하면 성공입니다.
    fn ensure_clsact(&mut self, interface: &str) -> Result<(), DataplaneError>;

    /// 같은 이름으로 남아 있는 이전 필터를 제거합니다. 없으면 성공입니다.
    fn remove_stale_filter(&mut self, interface: &str) -> Result<(), DataplaneError>;

    /// netlink 분류기(direct-action)로 ingress에 어태치합니다.
    fn attach_netlink(&mut self, interface: &str) -> Result<(), DataplaneError>;

    /// 플로우 이벤트 스트림을 엽니다.
    fn open_event_stream(&mut self) -> Result<Self::Stream, DataplaneError>;

    /// 정책/세션/통계 테이블 핸들을 가져옵니다.
    fn tables(&mut self) -> Result<KernelTables, DataplaneError>;

    /// 성공한 어태치 경로를 해제합니다.
    fn detach(&mut self) -> Result<(), DataplaneError>;

    /// 프로그램을 언로드합니다.
    fn unload_program(&mut self) -> Result<(), DataplaneError>;
}

/// 어태치 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    Detached,
    /// TCX 링크로 어태치됨
    AttachedPrimary,
    /// clsact + netlink 분류기로 어태치됨
    AttachedLegacy,
}

impl AttachState {
    /// 메트릭 레이블 값
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Detached => "detached",
            Self::AttachedPrimary => "tcx",
            Self::AttachedLegacy => "legacy",
        }
    }

    pub fn is_attached(&self) -> bool {
        !matches!(self, Self::Detached)
    }
}

impl fmt::Display for AttachState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mode())
    }
}

/// 어태치 수명 관리자
///
/// 성공적으로 생성된 관리자는 항상 어태치된 상태이며, [`close()`](Self::close)
/// 또는 drop 시 이벤트 리더 중지, 해제, 언로드 순으로 정리합니다.
pub struct AttachmentManager<B: TcBackend> {
    backend: B,
    interface: String,
    ifindex: u32,
    state: AttachState,
    reader_cancel: CancellationToken,
    closed: bool,
}

impl<B: TcBackend> AttachmentManager<B> {
    /// 어태치 시퀀스를 실행하고 관리자와 이벤트 스트림을 반환합니다.
    ///
    /// 실패 시 이미 획득한 커널 리소스는 모두 반환된 뒤 에러가 전파됩니다.
    pub fn attach(mut backend: B, interface: &str) -> Result<(Self, B::Stream), DataplaneError> {
        let ifindex = backend.resolve_interface(interface)?;
        debug!(interface, ifindex, "interface resolved");

        backend.load_program()?;

        let state = match backend.attach_tcx(interface) {
            Ok(()) => AttachState::AttachedPrimary,
            Err(primary) => {
                warn!(
                    interface,
                    error = %primary,
                    "tcx attach failed, falling back to clsact + netlink classifier"
                );
                match attach_legacy(&mut backend, interface) {
                    Ok(()) => AttachState::AttachedLegacy,
                    Err(legacy) => {
                        if let Err(e) = backend.unload_program() {
                            warn!(error = %e, "unload after failed attach also failed");
                        }
                        return Err(DataplaneError::AttachFailed {
                            interface: interface.to_owned(),
                            reason: format!("tcx: {primary}; legacy: {legacy}"),
                        });
                    }
                }
            }
        };

        let stream = match backend.open_event_stream() {
            Ok(stream) => stream,
            Err(e) => {
                if let Err(detach) = backend.detach() {
                    warn!(error = %detach, "detach after stream failure also failed");
                }
                if let Err(unload) = backend.unload_program() {
                    warn!(error = %unload, "unload after stream failure also failed");
                }
                return Err(match e {
                    DataplaneError::EventStreamOpenFailed(_) => e,
                    other => DataplaneError::EventStreamOpenFailed(other.to_string()),
                });
            }
        };

        metrics::gauge!(m::DATAPLANE_ATTACHED, m::LABEL_ATTACH_MODE => state.mode()).set(1.0);
        info!(interface, ifindex, mode = %state, "classifier attached");

        Ok((
            Self {
                backend,
                interface: interface.to_owned(),
                ifindex,
                state,
                reader_cancel: CancellationToken::new(),
                closed: false,
            },
            stream,
        ))
    }

    pub fn state(&self) -> AttachState {
        self.state
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    /// 이벤트 리더 태스크용 취소 토큰
    ///
    /// `close()`가 호출되면 취소됩니다.
    pub fn reader_token(&self) -> CancellationToken {
        self.reader_cancel.child_token()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 이벤트 리더 중지, 해제, 언로드를 수행합니다.
    ///
    /// 여러 번 호출해도 안전합니다. 한 단계가 실패해도 나머지 단계는
    /// 계속 실행되며 실패 내역은 [`DataplaneError::Teardown`]으로 모아 반환합니다.
    pub fn close(&mut self) -> Result<(), DataplaneError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.reader_cancel.cancel();

        let mut failures = Vec::new();
        if self.state.is_attached() {
            let mode = self.state.mode();
            if let Err(e) = self.backend.detach() {
                failures.push(format!("detach: {e}"));
            }
            metrics::gauge!(m::DATAPLANE_ATTACHED, m::LABEL_ATTACH_MODE => mode).set(0.0);
            self.state = AttachState::Detached;
        }
        if let Err(e) = self.backend.unload_program() {
            failures.push(format!("unload: {e}"));
        }

        if failures.is_empty() {
            info!(interface = %self.interface, "classifier detached");
            Ok(())
        } else {
            warn!(interface = %self.interface, failures = ?failures, "teardown incomplete");
            Err(DataplaneError::Teardown(failures))
        }
    }
}

impl<B: TcBackend> Drop for AttachmentManager<B> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!(error = %e, "teardown on drop failed");
            }
        }
    }
}

fn attach_legacy<B: TcBackend>(backend: &mut B, interface: &str) -> Result<(), DataplaneError> {
    backend.ensure_clsact(interface)?;
    backend.remove_stale_filter(interface)?;
    backend.attach_netlink(interface)
}
