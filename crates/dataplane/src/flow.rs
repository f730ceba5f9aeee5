//! 플로우 이벤트: RingBuf 레코드 디코딩 및 모니터 루프
//!
//! 커널은 거부(deny) 또는 로그(log) 액션으로 새 세션이 만들어질 때
//! `FLOW_EVENTS` 링 버퍼에 레코드를 씁니다.
//!
//! ```text
//! FLOW_EVENTS (RingBuf) ──next_record──▶ decode_flow_event ──▶ FlowEvent
//!                                              │                  │
//!                                        < 32 bytes          info! 로그
//!                                        warn! + drop        mpsc 탭 (선택)
//! ```
//!
//! 레코드 레이아웃 (리틀 엔디언):
//! ```text
//! [0:4)  src_ip     [4:8)  dst_ip
//! [8:10) src_port   [10:12) dst_port   [12] protocol
//! [16:24) timestamp [24:32) packets    [32:40) bytes
//! [40] action       [41] event_type    (44바이트 이상일 때)
//! ```

use std::future::Future;
use std::net::Ipv4Addr;

use bytes::Buf;
use microseg_core::error::DataplaneError;
use microseg_core::metrics as m;
use microseg_core::types::{FlowEvent, FlowEventDetails};
use microseg_ebpf_common::{ACTION_ALLOW, ACTION_DENY, ACTION_LOG, FlowEventRecord};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 디코딩에 필요한 최소 레코드 길이
pub const MIN_RECORD_LEN: usize = 32;

/// 원시 레코드를 [`FlowEvent`]로 디코딩합니다.
///
/// 32바이트 미만이면 에러를 반환합니다. 44바이트 이상이면 트레일러도 디코딩합니다.
pub fn decode_flow_event(record: &[u8]) -> Result<FlowEvent, DataplaneError> {
    if record.len() < MIN_RECORD_LEN {
        return Err(DataplaneError::Decode(format!(
            "flow event too short: {} bytes (min {MIN_RECORD_LEN})",
            record.len()
        )));
    }

    let mut buf = record;
    let src_ip = Ipv4Addr::from(buf.get_u32_le().to_le_bytes());
    let dst_ip = Ipv4Addr::from(buf.get_u32_le().to_le_bytes());
    let src_port = buf.get_u16_le();
    let dst_port = buf.get_u16_le();
    let protocol = buf.get_u8();

    let details = if record.len() >= FlowEventRecord::SIZE {
        let mut trailer = &record[16..];
        Some(FlowEventDetails {
            timestamp_ns: trailer.get_u64_le(),
            packets: trailer.get_u64_le(),
            bytes: trailer.get_u64_le(),
            action: trailer.get_u8(),
            event_type: trailer.get_u8(),
        })
    } else {
        None
    };

    Ok(FlowEvent {
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        protocol,
        details,
    })
}

/// 플로우 이벤트 레코드 소스
///
/// `Ok(None)`은 스트림이 닫혔음을 뜻하며 모니터 루프는 정상 종료합니다.
/// `Err`는 일시적 실패로 간주되어 로그 후 계속 읽습니다.
pub trait FlowEventStream: Send {
    fn next_record(
        &mut self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, DataplaneError>> + Send;
}

/// mpsc 채널 기반 스트림 (메모리 백엔드, 테스트)
///
/// 모든 송신자가 드롭되면 닫힌 것으로 처리합니다.
pub struct ChannelStream {
    rx: mpsc::Receiver<Result<Vec<u8>, DataplaneError>>,
}

impl ChannelStream {
    pub fn new(rx: mpsc::Receiver<Result<Vec<u8>, DataplaneError>>) -> Self {
        Self { rx }
    }
}

impl FlowEventStream for ChannelStream {
    async fn next_record(&mut self) -> Result<Option<Vec<u8>>, DataplaneError> {
        match self.rx.recv().await {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

/// 모니터 종료 시 요약
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorSummary {
    /// 디코딩에 성공한 이벤트 수
    pub received: u64,
    /// 디코딩 실패로 버린 레코드 수
    pub malformed: u64,
    /// 스트림 읽기 에러 수
    pub stream_errors: u64,
}

/// 플로우 이벤트 모니터
///
/// 스트림이 닫히거나 취소 토큰이 취소될 때까지 레코드를 읽고 로그로 남깁니다.
/// 정책 결정에는 관여하지 않습니다.
pub struct FlowMonitor<S> {
    stream: S,
    tap: Option<mpsc::Sender<FlowEvent>>,
}

impl<S: FlowEventStream> FlowMonitor<S> {
    pub fn new(stream: S) -> Self {
        Self { stream, tap: None }
    }

    /// 디코딩된 이벤트를 받아 볼 채널을 연결합니다.
    ///
    /// 채널이 가득 차면 이벤트는 버려집니다.
    pub fn with_tap(mut self, tx: mpsc::Sender<FlowEvent>) -> Self {
        self.tap = Some(tx);
        self
    }

    /// 모니터 루프를 실행합니다.
    pub async fn run(mut self, cancel: CancellationToken) -> MonitorSummary {
        let mut summary = MonitorSummary::default();
        info!("flow event monitor started");

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("flow event monitor cancelled");
                    break;
                }
                next = self.stream.next_record() => next,
            };

            match next {
                Ok(Some(record)) => self.handle_record(&record, &mut summary),
                Ok(None) => {
                    info!("flow event stream closed");
                    break;
                }
                Err(e) => {
                    summary.stream_errors += 1;
                    error!(error = %e, "flow event read failed");
                }
            }
        }

        info!(
            received = summary.received,
            malformed = summary.malformed,
            stream_errors = summary.stream_errors,
            "flow event monitor stopped"
        );
        summary
    }

    fn handle_record(&self, record: &[u8], summary: &mut MonitorSummary) {
        let event = match decode_flow_event(record) {
            Ok(event) => event,
            Err(e) => {
                summary.malformed += 1;
                metrics::counter!(m::FLOW_EVENTS_DROPPED_TOTAL).increment(1);
                warn!(len = record.len(), error = %e, "dropping malformed flow event");
                return;
            }
        };
        summary.received += 1;

        let action = event.details.map(|d| action_name(d.action));
        metrics::counter!(m::FLOW_EVENTS_TOTAL, m::LABEL_ACTION => action.unwrap_or("unknown"))
            .increment(1);
        info!(
            src = %event.src_ip,
            src_port = event.src_port_host(),
            dst = %event.dst_ip,
            dst_port = event.dst_port_host(),
            protocol = event.protocol,
            action = action.unwrap_or("-"),
            "flow event"
        );

        if let Some(tap) = &self.tap {
            if tap.try_send(event).is_err() {
                metrics::counter!(m::FLOW_EVENTS_DROPPED_TOTAL).increment(1);
                debug!("flow event tap full, dropping event");
            }
        }
    }
}

fn action_name(action: u8) -> &'static str {
    match action {
        ACTION_ALLOW => "allow",
        ACTION_DENY => "deny",
        ACTION_LOG => "log",
        _ => "unknown",
    }
}

// =============================================================================
// RingBuf 스트림 (Linux)
// =============================================================================

#[cfg(target_os = "linux")]
pub use ring::RingBufStream;

#[cfg(target_os = "linux")]
mod ring {
    use std::collections::VecDeque;

    use aya::maps::{MapData, RingBuf};
    use tokio::io::Interest;
    use tokio::io::unix::AsyncFd;
    use tracing::error;

    use super::FlowEventStream;
    use microseg_core::error::DataplaneError;

    /// `FLOW_EVENTS` RingBuf 리더
    ///
    /// epoll 기반 `AsyncFd`로 준비 알림을 받고, 한 번 깨어날 때 가능한
    /// 모든 레코드를 내부 큐로 옮깁니다.
    pub struct RingBufStream {
        fd: AsyncFd<RingBuf<MapData>>,
        pending: VecDeque<Vec<u8>>,
    }

    impl RingBufStream {
        pub fn new(ring_buf: RingBuf<MapData>) -> Result<Self, DataplaneError> {
            let fd = AsyncFd::with_interest(ring_buf, Interest::READABLE)
                .map_err(|e| DataplaneError::EventStreamOpenFailed(e.to_string()))?;
            Ok(Self {
                fd,
                pending: VecDeque::new(),
            })
        }
    }

    impl FlowEventStream for RingBufStream {
        async fn next_record(&mut self) -> Result<Option<Vec<u8>>, DataplaneError> {
            loop {
                if let Some(record) = self.pending.pop_front() {
                    return Ok(Some(record));
                }

                // 준비 대기 자체가 실패하면 fd를 더 쓸 수 없으므로 닫힌 것으로 처리
                let mut guard = match self.fd.readable_mut().await {
                    Ok(guard) => guard,
                    Err(e) => {
                        error!(error = %e, "ring buffer readiness failed");
                        return Ok(None);
                    }
                };

                let ring_buf = guard.get_inner_mut();
                while let Some(item) = ring_buf.next() {
                    self.pending.push_back(item.to_vec());
                }
                guard.clear_ready();
            }
        }
    }
}
