//! 도메인 타입: 제어 평면 전역에서 사용되는 공통 타입
//!
//! 커널 바이너리 레이아웃과 무관한 사용자 관점의 표현입니다.
//! 레이아웃 변환은 `microseg-policy`(정책)와 `microseg-dataplane`(통계, 이벤트)이 담당합니다.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// 사용자 관점 정책
///
/// 주소는 `"10.0.0.1"` 같은 단일 주소 또는 `"10.0.0.0/24"` 같은 CIDR 문자열입니다.
/// 포트 0은 "모든 포트"를 뜻합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// 룰 ID (0은 빈 와일드카드 슬롯과 구분할 수 없으므로 사용하지 않음)
    pub rule_id: u32,
    /// 출발지 주소 또는 CIDR
    pub src_ip: String,
    /// 목적지 주소 또는 CIDR
    pub dst_ip: String,
    /// 출발지 포트 (0 = any)
    #[serde(default)]
    pub src_port: u16,
    /// 목적지 포트 (0 = any)
    #[serde(default)]
    pub dst_port: u16,
    /// tcp, udp, icmp, any
    pub protocol: String,
    /// allow, deny, log
    pub action: String,
    /// 우선순위 (높을수록 우선)
    #[serde(default)]
    pub priority: u16,
}

impl Policy {
    /// 모든 트래픽을 허용하는 정책을 생성합니다.
    pub fn allow_all(rule_id: u32) -> Self {
        Self {
            rule_id,
            src_ip: "0.0.0.0/0".to_owned(),
            dst_ip: "0.0.0.0/0".to_owned(),
            src_port: 0,
            dst_port: 0,
            protocol: "any".to_owned(),
            action: "allow".to_owned(),
            priority: 0,
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}:{} -> {}:{} proto={} action={} prio={}",
            self.rule_id,
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port,
            self.protocol,
            self.action,
            self.priority,
        )
    }
}

/// 통계 스냅샷
///
/// 커널의 8개 per-CPU 카운터를 CPU 전체에 대해 합산한 값입니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_packets: u64,
    pub allowed_packets: u64,
    pub denied_packets: u64,
    pub new_sessions: u64,
    pub closed_sessions: u64,
    pub active_sessions: u64,
    pub policy_hits: u64,
    pub policy_misses: u64,
}

impl Statistics {
    /// 허용 비율 (%). 전체 패킷이 0이면 0.0
    pub fn allow_rate(&self) -> f64 {
        percentage(self.allowed_packets, self.total_packets)
    }

    /// 차단 비율 (%). 전체 패킷이 0이면 0.0
    pub fn deny_rate(&self) -> f64 {
        percentage(self.denied_packets, self.total_packets)
    }

    /// 정책 적중률 (%). 조회가 없었으면 0.0
    pub fn hit_rate(&self) -> f64 {
        percentage(
            self.policy_hits,
            self.policy_hits.saturating_add(self.policy_misses),
        )
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "packets total={} allowed={} denied={} | sessions new={} closed={} active={} | policy hits={} misses={}",
            self.total_packets,
            self.allowed_packets,
            self.denied_packets,
            self.new_sessions,
            self.closed_sessions,
            self.active_sessions,
            self.policy_hits,
            self.policy_misses,
        )
    }
}

/// 디코딩된 플로우 이벤트
///
/// `src_port`/`dst_port`는 레코드에서 리틀 엔디언으로 읽은 값 그대로이며
/// 네트워크 바이트 오더 포트를 담고 있습니다. 사람이 읽는 포트는
/// [`FlowEvent::src_port_host`]/[`FlowEvent::dst_port_host`]를 사용합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEvent {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    /// 레코드가 44바이트 이상일 때만 존재
    pub details: Option<FlowEventDetails>,
}

/// 플로우 이벤트 트레일러 (타임스탬프, 카운터, 액션)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEventDetails {
    /// 커널 단조 시각 (ns)
    pub timestamp_ns: u64,
    pub packets: u64,
    pub bytes: u64,
    pub action: u8,
    pub event_type: u8,
}

impl FlowEvent {
    /// 호스트 바이트 오더 출발지 포트
    pub fn src_port_host(&self) -> u16 {
        self.src_port.swap_bytes()
    }

    /// 호스트 바이트 오더 목적지 포트
    pub fn dst_port_host(&self) -> u16 {
        self.dst_port.swap_bytes()
    }
}

impl fmt::Display for FlowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto={}",
            self.src_ip,
            self.src_port_host(),
            self.dst_ip,
            self.dst_port_host(),
            self.protocol,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_are_zero_without_traffic() {
        let stats = Statistics::default();
        assert_eq!(stats.allow_rate(), 0.0);
        assert_eq!(stats.deny_rate(), 0.0);
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn rates_are_percentages() {
        let stats = Statistics {
            total_packets: 200,
            allowed_packets: 150,
            denied_packets: 50,
            policy_hits: 3,
            policy_misses: 1,
            ..Default::default()
        };
        assert!((stats.allow_rate() - 75.0).abs() < f64::EPSILON);
        assert!((stats.deny_rate() - 25.0).abs() < f64::EPSILON);
        assert!((stats.hit_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn hit_rate_does_not_overflow() {
        let stats = Statistics {
            policy_hits: u64::MAX,
            policy_misses: u64::MAX,
            ..Default::default()
        };
        assert!(stats.hit_rate() <= 100.0);
    }

    #[test]
    fn allow_all_is_wildcard_shaped() {
        let p = Policy::allow_all(1);
        assert_eq!(p.rule_id, 1);
        assert_eq!(p.src_ip, "0.0.0.0/0");
        assert_eq!(p.protocol, "any");
        assert_eq!(p.action, "allow");
    }

    #[test]
    fn policy_json_defaults_ports_and_priority() {
        let json = r#"{"rule_id":5,"src_ip":"10.0.0.1","dst_ip":"10.0.0.2","protocol":"tcp","action":"deny"}"#;
        let p: Policy = serde_json::from_str(json).unwrap();
        assert_eq!(p.src_port, 0);
        assert_eq!(p.dst_port, 0);
        assert_eq!(p.priority, 0);
        assert_eq!(p.action, "deny");
    }

    #[test]
    fn flow_event_display_uses_host_ports() {
        let event = FlowEvent {
            src_ip: Ipv4Addr::new(10, 0, 0, 1),
            dst_ip: Ipv4Addr::new(10, 0, 0, 2),
            src_port: 0x3930, // 12345 network order
            dst_port: 0x5000, // 80 network order
            protocol: 6,
            details: None,
        };
        assert_eq!(event.src_port_host(), 12345);
        assert_eq!(event.to_string(), "10.0.0.1:12345 -> 10.0.0.2:80 proto=6");
    }
}
