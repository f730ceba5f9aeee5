//! 통계 수집: PerCpuArray 기반 패킷/세션/정책 카운터
//!
//! [`StatsReader`]는 `STATS_MAP`의 8개 인덱스를 CPU 전체에 대해 합산하여
//! [`Statistics`] 스냅샷을 만듭니다. [`TrafficRates`]는 연속된 두 스냅샷의
//! 차이로 초당 처리량을 계산합니다.
//!
//! # 데이터 흐름
//! ```text
//! STATS_MAP (kernel) ──read──▶ Statistics ──update──▶ TrafficRates
//!  [idx][cpu] u64              (CPU별 값 합산)         (pps 계산)
//! ```

use std::time::Instant;

use microseg_core::metrics as m;
use microseg_core::types::Statistics;
use microseg_ebpf_common::{
    STATS_ACTIVE_SESSIONS, STATS_ALLOWED_PACKETS, STATS_CLOSED_SESSIONS, STATS_DENIED_PACKETS,
    STATS_NEW_SESSIONS, STATS_POLICY_HITS, STATS_POLICY_MISSES, STATS_TOTAL_PACKETS,
};
use serde::Serialize;
use tracing::debug;

use crate::tables::{SharedStatsTable, lock};

/// per-CPU 통계 합산기
///
/// 조회 실패는 에러로 전파하지 않고 해당 카운터를 0으로 보고합니다.
#[derive(Clone)]
pub struct StatsReader {
    table: SharedStatsTable,
}

impl StatsReader {
    pub fn new(table: SharedStatsTable) -> Self {
        Self { table }
    }

    /// 현재 통계 스냅샷을 읽습니다. 실패하지 않습니다.
    pub fn read(&self) -> Statistics {
        Statistics {
            total_packets: self.sum(STATS_TOTAL_PACKETS),
            allowed_packets: self.sum(STATS_ALLOWED_PACKETS),
            denied_packets: self.sum(STATS_DENIED_PACKETS),
            new_sessions: self.sum(STATS_NEW_SESSIONS),
            closed_sessions: self.sum(STATS_CLOSED_SESSIONS),
            active_sessions: self.sum(STATS_ACTIVE_SESSIONS),
            policy_hits: self.sum(STATS_POLICY_HITS),
            policy_misses: self.sum(STATS_POLICY_MISSES),
        }
    }

    /// 스냅샷을 읽고 Prometheus 메트릭으로도 기록합니다.
    pub fn read_and_publish(&self) -> Statistics {
        let stats = self.read();
        publish(&stats);
        stats
    }

    fn sum(&self, index: u32) -> u64 {
        let values = lock(&self.table).and_then(|table| table.per_cpu(index));
        match values {
            Ok(per_cpu) => per_cpu.iter().fold(0u64, |acc, v| acc.saturating_add(*v)),
            Err(e) => {
                debug!(index, error = %e, "stats lookup failed, reporting zero");
                0
            }
        }
    }
}

/// 스냅샷을 전역 메트릭 레코더에 기록합니다.
///
/// 커널 카운터는 이미 누적값이므로 `absolute`로 설정합니다.
pub fn publish(stats: &Statistics) {
    metrics::counter!(m::PACKETS_TOTAL).absolute(stats.total_packets);
    metrics::counter!(m::PACKETS_ALLOWED_TOTAL).absolute(stats.allowed_packets);
    metrics::counter!(m::PACKETS_DENIED_TOTAL).absolute(stats.denied_packets);
    metrics::counter!(m::SESSIONS_NEW_TOTAL).absolute(stats.new_sessions);
    metrics::counter!(m::SESSIONS_CLOSED_TOTAL).absolute(stats.closed_sessions);
    metrics::gauge!(m::SESSIONS_ACTIVE).set(stats.active_sessions as f64);
    metrics::counter!(m::POLICY_HITS_TOTAL).absolute(stats.policy_hits);
    metrics::counter!(m::POLICY_MISSES_TOTAL).absolute(stats.policy_misses);
}

/// 초당 처리량
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Rates {
    /// 초당 전체 패킷
    pub packets_per_sec: f64,
    /// 초당 차단 패킷
    pub denied_per_sec: f64,
    /// 초당 새 세션
    pub sessions_per_sec: f64,
}

/// 연속 스냅샷 기반 처리량 계산기
///
/// 첫 번째 `update()`는 기준점만 저장하고 0을 반환합니다.
#[derive(Debug, Default)]
pub struct TrafficRates {
    prev: Option<(Statistics, Instant)>,
    current: Rates,
}

impl TrafficRates {
    pub fn new() -> Self {
        Self::default()
    }

    /// 새 스냅샷으로 처리량을 갱신합니다.
    pub fn update(&mut self, stats: Statistics) -> Rates {
        self.update_at(stats, Instant::now())
    }

    fn update_at(&mut self, stats: Statistics, now: Instant) -> Rates {
        if let Some((prev, last)) = self.prev {
            let elapsed = now.duration_since(last).as_secs_f64();
            if elapsed > 0.0 {
                self.current = Rates {
                    packets_per_sec: per_sec(stats.total_packets, prev.total_packets, elapsed),
                    denied_per_sec: per_sec(stats.denied_packets, prev.denied_packets, elapsed),
                    sessions_per_sec: per_sec(stats.new_sessions, prev.new_sessions, elapsed),
                };
            }
        }
        self.prev = Some((stats, now));
        self.current
    }

    /// 마지막으로 계산된 처리량
    pub fn current(&self) -> Rates {
        self.current
    }
}

// 카운터가 줄어든 경우(맵 재생성 등)는 0으로 취급
#[allow(clippy::cast_precision_loss)]
fn per_sec(current: u64, prev: u64, elapsed_secs: f64) -> f64 {
    current.saturating_sub(prev) as f64 / elapsed_secs
}
