//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `microseg_`
//! - 접미어: `_total` (counter), 없음 (gauge)
//!
//! 커널 카운터는 이미 누적값이므로 `counter!(..).absolute(v)`로 기록합니다.

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 어태치 경로 레이블 키 (tcx, legacy)
pub const LABEL_ATTACH_MODE: &str = "mode";

/// 정책 액션 레이블 키 (allow, deny, log)
pub const LABEL_ACTION: &str = "action";

// ─── 데이터 평면 메트릭 ─────────────────────────────────────────────

/// 처리된 전체 패킷 수 (counter)
pub const PACKETS_TOTAL: &str = "microseg_packets_total";

/// 허용된 패킷 수 (counter)
pub const PACKETS_ALLOWED_TOTAL: &str = "microseg_packets_allowed_total";

/// 차단된 패킷 수 (counter)
pub const PACKETS_DENIED_TOTAL: &str = "microseg_packets_denied_total";

/// 생성된 세션 수 (counter)
pub const SESSIONS_NEW_TOTAL: &str = "microseg_sessions_new_total";

/// 종료된 세션 수 (counter)
pub const SESSIONS_CLOSED_TOTAL: &str = "microseg_sessions_closed_total";

/// 활성 세션 수 (gauge)
pub const SESSIONS_ACTIVE: &str = "microseg_sessions_active";

/// 정책 적중 수 (counter)
pub const POLICY_HITS_TOTAL: &str = "microseg_policy_hits_total";

/// 정책 미적중 수 (counter)
pub const POLICY_MISSES_TOTAL: &str = "microseg_policy_misses_total";

/// 수신한 플로우 이벤트 수 (counter, label: action)
pub const FLOW_EVENTS_TOTAL: &str = "microseg_flow_events_total";

/// 디코딩 실패 또는 배압으로 버려진 플로우 이벤트 수 (counter)
pub const FLOW_EVENTS_DROPPED_TOTAL: &str = "microseg_flow_events_dropped_total";

/// 데이터 평면 어태치 상태 (gauge, label: mode, 1 = attached)
pub const DATAPLANE_ATTACHED: &str = "microseg_dataplane_attached";

// ─── 정책 메트릭 ────────────────────────────────────────────────────

/// 영속 저장소에서 복원된 정책 수 (gauge)
pub const POLICIES_LOADED: &str = "microseg_policies_loaded";

/// 적용 실패한 정책 수 (counter)
pub const POLICY_APPLY_FAILURES_TOTAL: &str = "microseg_policy_apply_failures_total";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(PACKETS_TOTAL, "Total packets seen by the TC classifier");
    describe_counter!(PACKETS_ALLOWED_TOTAL, "Packets passed by policy decision");
    describe_counter!(PACKETS_DENIED_TOTAL, "Packets dropped by policy decision");
    describe_counter!(SESSIONS_NEW_TOTAL, "Sessions created in the session table");
    describe_counter!(SESSIONS_CLOSED_TOTAL, "Sessions marked closed");
    describe_gauge!(SESSIONS_ACTIVE, "Currently active sessions");
    describe_counter!(POLICY_HITS_TOTAL, "Policy lookups that matched a rule");
    describe_counter!(POLICY_MISSES_TOTAL, "Policy lookups that matched no rule");
    describe_counter!(FLOW_EVENTS_TOTAL, "Flow events read from the ring buffer");
    describe_counter!(
        FLOW_EVENTS_DROPPED_TOTAL,
        "Flow events discarded because they were malformed or the consumer lagged"
    );
    describe_gauge!(
        DATAPLANE_ATTACHED,
        "Whether the classifier is attached (1) and by which path"
    );
    describe_gauge!(POLICIES_LOADED, "Policies restored from persistent storage");
    describe_counter!(
        POLICY_APPLY_FAILURES_TOTAL,
        "Policies that could not be written to the kernel tables"
    );
}
