//! eBPF 커널/유저스페이스 공유 타입
//!
//! 이 크레이트는 `#![no_std]` 환경에서 사용 가능한 공통 타입을 정의합니다.
//! TC 분류기 프로그램과 유저스페이스 제어 평면이 동일한 메모리 레이아웃
//! (`#[repr(C)]`)을 사용하도록 보장합니다.
//!
//! # 맵 타입 선택 근거
//! - **LruHashMap** (`SESSION_MAP`): 5-tuple 세션 캐시, 가득 차면 오래된 세션부터 자동 축출
//! - **HashMap** (`POLICY_MAP`): 정확 일치 정책, O(1) 조회, 유저스페이스에서 동적 업데이트
//! - **Array** (`WILDCARD_POLICY_MAP`): 와일드카드 정책, 고정 슬롯, 커널에서 선형 탐색
//! - **PerCpuArray** (`STATS_MAP`): 패킷/세션 카운터, CPU별 독립 카운터, 락 프리
//! - **RingBuf** (`FLOW_EVENTS`): 플로우 이벤트 전달, 단일 리더
//!
//! 모든 다중 바이트 필드는 리틀 엔디언 호스트(`bpfel`)를 전제로 합니다.

#![no_std]

pub mod codec;

pub use codec::CodecError;

// =============================================================================
// 프로그램/맵 이름 상수
// =============================================================================

/// TC 분류기 프로그램 이름 (ELF 섹션 심볼)
pub const PROGRAM_NAME: &str = "tc_microsegment_filter";
/// 세션 LruHashMap 맵 이름
pub const SESSION_MAP: &str = "SESSION_MAP";
/// 정확 일치 정책 HashMap 맵 이름
pub const POLICY_MAP: &str = "POLICY_MAP";
/// 와일드카드 정책 Array 맵 이름
pub const WILDCARD_POLICY_MAP: &str = "WILDCARD_POLICY_MAP";
/// 통계 PerCpuArray 맵 이름
pub const STATS_MAP: &str = "STATS_MAP";
/// 플로우 이벤트 RingBuf 맵 이름
pub const FLOW_EVENTS: &str = "FLOW_EVENTS";

// =============================================================================
// 맵 용량
// =============================================================================

/// 세션 테이블 최대 엔트리 수
pub const MAX_ENTRIES_SESSION: u32 = 100_000;
/// 정확 일치 정책 최대 엔트리 수
pub const MAX_ENTRIES_POLICY: u32 = 10_000;
/// 와일드카드 정책 슬롯 수
pub const MAX_ENTRIES_WILDCARD_POLICY: u32 = 1_000;
/// 플로우 이벤트 링 버퍼 크기 (바이트)
pub const FLOW_EVENTS_SIZE: u32 = 256 * 1024;

// =============================================================================
// 프로토콜 상수
// =============================================================================

/// 모든 프로토콜 (와일드카드)
pub const PROTO_ANY: u8 = 0;
/// ICMP 프로토콜 번호
pub const PROTO_ICMP: u8 = 1;
/// TCP 프로토콜 번호
pub const PROTO_TCP: u8 = 6;
/// UDP 프로토콜 번호
pub const PROTO_UDP: u8 = 17;

// =============================================================================
// 정책 액션
// =============================================================================

/// 패킷 허용
pub const ACTION_ALLOW: u8 = 0;
/// 패킷 차단 (TC_ACT_SHOT)
pub const ACTION_DENY: u8 = 1;
/// 허용 + 플로우 이벤트 전송
pub const ACTION_LOG: u8 = 2;

// =============================================================================
// 플로우 이벤트 타입
// =============================================================================

/// 새 세션
pub const EVENT_NEW: u8 = 0;
/// 세션 갱신
pub const EVENT_UPDATE: u8 = 1;
/// 세션 종료
pub const EVENT_CLOSE: u8 = 2;

// =============================================================================
// 세션/TCP 상태
// =============================================================================

pub const SESSION_STATE_NEW: u8 = 0;
pub const SESSION_STATE_ESTABLISHED: u8 = 1;
pub const SESSION_STATE_CLOSING: u8 = 2;
pub const SESSION_STATE_CLOSED: u8 = 3;

pub const TCP_STATE_CLOSED: u8 = 0;
pub const TCP_STATE_SYN_SENT: u8 = 1;
pub const TCP_STATE_SYN_RECV: u8 = 2;
pub const TCP_STATE_ESTABLISHED: u8 = 3;
pub const TCP_STATE_FIN_WAIT1: u8 = 4;
pub const TCP_STATE_FIN_WAIT2: u8 = 5;
pub const TCP_STATE_CLOSE_WAIT: u8 = 6;
pub const TCP_STATE_CLOSING: u8 = 7;
pub const TCP_STATE_LAST_ACK: u8 = 8;
pub const TCP_STATE_TIME_WAIT: u8 = 9;

// =============================================================================
// Stats 맵 인덱스 (PerCpuArray)
// =============================================================================

/// 전체 패킷 수
pub const STATS_TOTAL_PACKETS: u32 = 0;
/// 허용된 패킷 수
pub const STATS_ALLOWED_PACKETS: u32 = 1;
/// 차단된 패킷 수
pub const STATS_DENIED_PACKETS: u32 = 2;
/// 새 세션 수
pub const STATS_NEW_SESSIONS: u32 = 3;
/// 종료된 세션 수
pub const STATS_CLOSED_SESSIONS: u32 = 4;
/// 활성 세션 수
pub const STATS_ACTIVE_SESSIONS: u32 = 5;
/// 정책 적중 수
pub const STATS_POLICY_HITS: u32 = 6;
/// 정책 미적중 수
pub const STATS_POLICY_MISSES: u32 = 7;
/// PerCpuArray 최대 엔트리 수
pub const STATS_MAX: u32 = 8;

// =============================================================================
// 공유 데이터 구조
// =============================================================================

/// 5-tuple 플로우 키
///
/// 세션 맵과 정확 일치 정책 맵이 같은 키 레이아웃을 공유합니다.
/// 커널은 패킷 헤더의 바이트를 그대로 복사하므로 주소와 포트는
/// 네트워크 바이트 오더 그대로 저장됩니다.
///
/// # 메모리 레이아웃 (16 바이트)
/// ```text
/// offset  field       size
/// 0       src_ip      4
/// 4       dst_ip      4
/// 8       src_port    2
/// 10      dst_port    2
/// 12      protocol    1
/// 13      _pad        3
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FlowKey {
    /// 출발지 IPv4 주소 (옥텟 순서 그대로, LE u32)
    pub src_ip: u32,
    /// 목적지 IPv4 주소
    pub dst_ip: u32,
    /// 출발지 포트 (네트워크 바이트 오더)
    pub src_port: u16,
    /// 목적지 포트 (네트워크 바이트 오더)
    pub dst_port: u16,
    /// IP 프로토콜 번호
    pub protocol: u8,
    /// 정렬용 패딩 (항상 0)
    pub _pad: [u8; 3],
}

// SAFETY: FlowKey는 #[repr(C)]이며 모든 필드가 Plain Old Data입니다.
// 패딩은 명시적 필드로 정의되어 있어 초기화되지 않은 바이트가 없습니다.
#[cfg(feature = "user")]
unsafe impl aya::Pod for FlowKey {}

/// 정확 일치 정책 값
///
/// # 메모리 레이아웃 (16 바이트)
/// ```text
/// offset  field        size
/// 0       action       1
/// 1       log_enabled  1
/// 2       priority     2
/// 4       rule_id      4
/// 8       hit_count    8
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExactPolicyValue {
    /// 정책 액션 (ACTION_ALLOW, ACTION_DENY, ACTION_LOG)
    pub action: u8,
    /// 로그 활성화 여부 (0/1)
    pub log_enabled: u8,
    /// 우선순위
    pub priority: u16,
    /// 룰 ID
    pub rule_id: u32,
    /// 적중 횟수 (커널이 관리)
    pub hit_count: u64,
}

// SAFETY: ExactPolicyValue는 #[repr(C)]이며 모든 필드가 Plain Old Data입니다.
#[cfg(feature = "user")]
unsafe impl aya::Pod for ExactPolicyValue {}

/// 와일드카드 정책 슬롯
///
/// 주소 마스크는 주소와 같은 옥텟 순서로 저장되므로 커널은
/// `(ip & mask) == (rule_ip & mask)` 비교만 수행하면 됩니다.
/// 포트/프로토콜 0은 "모두 일치"를 의미합니다. `rule_id == 0`이면 빈 슬롯입니다.
///
/// # 메모리 레이아웃 (32 바이트)
/// ```text
/// offset  field        size
/// 0       src_ip       4
/// 4       src_ip_mask  4
/// 8       dst_ip       4
/// 12      dst_ip_mask  4
/// 16      src_port     2
/// 18      dst_port     2
/// 20      protocol     1
/// 21      action       1
/// 22      log_enabled  1
/// 23      _pad1        1
/// 24      priority     2
/// 26      _pad2        2
/// 28      rule_id      4
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WildcardPolicyEntry {
    pub src_ip: u32,
    pub src_ip_mask: u32,
    pub dst_ip: u32,
    pub dst_ip_mask: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub action: u8,
    pub log_enabled: u8,
    pub _pad1: u8,
    /// 우선순위 (높을수록 우선)
    pub priority: u16,
    pub _pad2: u16,
    /// 룰 ID (0 = 빈 슬롯)
    pub rule_id: u32,
}

// SAFETY: WildcardPolicyEntry는 #[repr(C)]이며 모든 필드가 Plain Old Data입니다.
#[cfg(feature = "user")]
unsafe impl aya::Pod for WildcardPolicyEntry {}

/// 세션 값 (커널 전용 쓰기, 유저스페이스 읽기 전용)
///
/// # 메모리 레이아웃 (56 바이트)
/// ```text
/// offset  field              size
/// 0       created_ts         8
/// 8       last_seen_ts       8
/// 16      packets_to_server  8
/// 24      packets_to_client  8
/// 32      bytes_to_server    8
/// 40      bytes_to_client    8
/// 48      state              1
/// 49      tcp_state          1
/// 50      policy_action      1
/// 51      flags              1
/// 52      _pad               4
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionValue {
    /// 세션 생성 시각 (ns, 부팅 기준)
    pub created_ts: u64,
    /// 마지막 패킷 시각
    pub last_seen_ts: u64,
    pub packets_to_server: u64,
    pub packets_to_client: u64,
    pub bytes_to_server: u64,
    pub bytes_to_client: u64,
    /// 세션 상태 (SESSION_STATE_*)
    pub state: u8,
    /// TCP 상태 (TCP_STATE_*)
    pub tcp_state: u8,
    /// 세션 생성 시 결정된 정책 액션
    pub policy_action: u8,
    pub flags: u8,
    pub _pad: u32,
}

// SAFETY: SessionValue는 #[repr(C)]이며 모든 필드가 Plain Old Data입니다.
#[cfg(feature = "user")]
unsafe impl aya::Pod for SessionValue {}

/// 플로우 이벤트 레코드
///
/// `RingBuf`를 통해 커널 → 유저스페이스로 전달됩니다.
/// C 쪽과 동일하게 packed 레이아웃을 사용하므로 필드 참조 대신 값 복사로 접근해야 합니다.
///
/// # 메모리 레이아웃 (44 바이트, packed)
/// ```text
/// offset  field       size
/// 0       key         16
/// 16      timestamp   8
/// 24      packets     8
/// 32      bytes       8
/// 40      action      1
/// 41      event_type  1
/// 42      _pad        2
/// ```
#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct FlowEventRecord {
    pub key: FlowKey,
    /// 이벤트 시각 (ns)
    pub timestamp: u64,
    pub packets: u64,
    pub bytes: u64,
    pub action: u8,
    /// 이벤트 타입 (EVENT_NEW, EVENT_UPDATE, EVENT_CLOSE)
    pub event_type: u8,
    pub _pad: u16,
}

impl FlowKey {
    /// 제로 초기화된 플로우 키를 생성합니다.
    pub const fn zeroed() -> Self {
        Self {
            src_ip: 0,
            dst_ip: 0,
            src_port: 0,
            dst_port: 0,
            protocol: 0,
            _pad: [0; 3],
        }
    }
}

impl WildcardPolicyEntry {
    /// 빈 슬롯(`rule_id == 0`)을 생성합니다.
    pub const fn zeroed() -> Self {
        Self {
            src_ip: 0,
            src_ip_mask: 0,
            dst_ip: 0,
            dst_ip_mask: 0,
            src_port: 0,
            dst_port: 0,
            protocol: 0,
            action: 0,
            log_enabled: 0,
            _pad1: 0,
            priority: 0,
            _pad2: 0,
            rule_id: 0,
        }
    }

    /// 빈 슬롯 여부
    pub const fn is_empty(&self) -> bool {
        self.rule_id == 0
    }

    /// 플로우 키가 이 슬롯의 조건과 일치하는지 검사합니다.
    ///
    /// 커널 프로그램의 선형 탐색과 유저스페이스 테스트가 같은 판정을 사용합니다.
    pub const fn matches(&self, key: &FlowKey) -> bool {
        !self.is_empty()
            && (key.src_ip & self.src_ip_mask) == (self.src_ip & self.src_ip_mask)
            && (key.dst_ip & self.dst_ip_mask) == (self.dst_ip & self.dst_ip_mask)
            && (self.src_port == 0 || self.src_port == key.src_port)
            && (self.dst_port == 0 || self.dst_port == key.dst_port)
            && (self.protocol == PROTO_ANY || self.protocol == key.protocol)
    }
}

impl SessionValue {
    /// 제로 초기화된 세션 값을 생성합니다.
    pub const fn zeroed() -> Self {
        Self {
            created_ts: 0,
            last_seen_ts: 0,
            packets_to_server: 0,
            packets_to_client: 0,
            bytes_to_server: 0,
            bytes_to_client: 0,
            state: SESSION_STATE_NEW,
            tcp_state: TCP_STATE_CLOSED,
            policy_action: ACTION_ALLOW,
            flags: 0,
            _pad: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn layout_sizes_match_kernel() {
        assert_eq!(size_of::<FlowKey>(), 16);
        assert_eq!(size_of::<ExactPolicyValue>(), 16);
        assert_eq!(size_of::<WildcardPolicyEntry>(), 32);
        assert_eq!(size_of::<SessionValue>(), 56);
        assert_eq!(size_of::<FlowEventRecord>(), 44);
    }

    #[test]
    fn zeroed_wildcard_slot_is_empty() {
        assert!(WildcardPolicyEntry::zeroed().is_empty());
    }

    #[test]
    fn empty_slot_never_matches() {
        let slot = WildcardPolicyEntry::zeroed();
        assert!(!slot.matches(&FlowKey::zeroed()));
    }

    #[test]
    fn match_any_slot_matches_everything() {
        let slot = WildcardPolicyEntry {
            rule_id: 1,
            ..WildcardPolicyEntry::zeroed()
        };
        let key = FlowKey {
            src_ip: u32::from_le_bytes([10, 0, 0, 1]),
            dst_ip: u32::from_le_bytes([10, 0, 0, 2]),
            src_port: 1234u16.swap_bytes(),
            dst_port: 80u16.swap_bytes(),
            protocol: PROTO_TCP,
            _pad: [0; 3],
        };
        assert!(slot.matches(&key));
    }

    #[test]
    fn subnet_mask_limits_match() {
        // 10.0.0.0/8 -> 임의 목적지, TCP
        let slot = WildcardPolicyEntry {
            src_ip: u32::from_le_bytes([10, 0, 0, 0]),
            src_ip_mask: u32::from_le_bytes([255, 0, 0, 0]),
            protocol: PROTO_TCP,
            rule_id: 7,
            ..WildcardPolicyEntry::zeroed()
        };
        let mut key = FlowKey {
            src_ip: u32::from_le_bytes([10, 9, 8, 7]),
            protocol: PROTO_TCP,
            ..FlowKey::zeroed()
        };
        assert!(slot.matches(&key));

        key.src_ip = u32::from_le_bytes([11, 9, 8, 7]);
        assert!(!slot.matches(&key));

        key.src_ip = u32::from_le_bytes([10, 9, 8, 7]);
        key.protocol = PROTO_UDP;
        assert!(!slot.matches(&key));
    }
}
