//! 정책 변환: 사용자 정책과 커널 테이블 레코드 간 변환
//!
//! ```text
//!                      classify
//! Policy ──────────────────┬─────────────────────┐
//!                          ▼                     ▼
//!                   TableKind::Exact      TableKind::Wildcard
//!                          │                     │
//!                      to_exact              to_wildcard
//!                          ▼                     ▼
//!          (FlowKey, ExactPolicyValue)   WildcardPolicyEntry
//!                          │                     │
//!                     from_exact            from_wildcard
//!                          └──────────┬──────────┘
//!                                     ▼
//!                                  Policy
//! ```
//!
//! 정확 일치 테이블은 주소의 prefix를 무시합니다 (`10.0.0.0/24`는 `10.0.0.0` 단일 주소로 취급).
//! 와일드카드 테이블은 prefix를 마스크로 저장합니다.

use std::net::Ipv4Addr;

use microseg_core::types::Policy;
use microseg_ebpf_common::codec::{
    addr_to_u32, host_to_network_port, mask_from_prefix, network_to_host_port, prefix_from_mask,
    u32_to_addr,
};
use microseg_ebpf_common::{
    ACTION_ALLOW, ACTION_DENY, ACTION_LOG, ExactPolicyValue, FlowKey, PROTO_ANY, PROTO_ICMP,
    PROTO_TCP, PROTO_UDP, WildcardPolicyEntry,
};

use crate::error::PolicyManagerError;

/// 모든 IPv4 주소
pub const ANY_IPV4: &str = "0.0.0.0/0";
/// 모든 IPv6 주소 (IPv4 전용 데이터 평면에서는 모든 IPv4로 취급)
pub const ANY_IPV6: &str = "::/0";

/// 정책이 들어갈 테이블
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// 5-tuple 정확 일치 HashMap
    Exact,
    /// 마스크/와일드카드 슬롯 배열
    Wildcard,
}

/// 정책을 어느 테이블에 넣을지 결정합니다.
///
/// 출발지 포트가 0이거나, 주소 중 하나가 전체 대역이거나, 프로토콜이
/// `any`이면 와일드카드입니다. 그 외 CIDR은 정확 일치로 분류됩니다.
pub fn classify(policy: &Policy) -> TableKind {
    let any_addr = |addr: &str| addr == ANY_IPV4 || addr == ANY_IPV6;
    if policy.src_port == 0
        || any_addr(&policy.src_ip)
        || any_addr(&policy.dst_ip)
        || policy.protocol.eq_ignore_ascii_case("any")
    {
        TableKind::Wildcard
    } else {
        TableKind::Exact
    }
}

/// 주소 또는 CIDR을 (주소, prefix)로 파싱합니다. 단일 주소는 /32입니다.
pub fn parse_cidr(field: &'static str, value: &str) -> Result<(Ipv4Addr, u8), PolicyManagerError> {
    let value = value.trim();
    if value == ANY_IPV6 {
        return Ok((Ipv4Addr::UNSPECIFIED, 0));
    }

    let (addr, prefix) = match value.split_once('/') {
        Some((addr, prefix)) => {
            let prefix: u8 = prefix
                .parse()
                .map_err(|_| PolicyManagerError::invalid(field, format!("bad prefix in '{value}'")))?;
            if prefix > 32 {
                return Err(PolicyManagerError::invalid(
                    field,
                    format!("prefix /{prefix} exceeds 32"),
                ));
            }
            (addr, prefix)
        }
        None => (value, 32),
    };

    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| PolicyManagerError::invalid(field, format!("'{value}' is not an IPv4 address")))?;
    Ok((addr, prefix))
}

/// 프로토콜 이름을 번호로 변환합니다 (대소문자 무시, 빈 문자열은 any).
pub fn parse_protocol(protocol: &str) -> Result<u8, PolicyManagerError> {
    match protocol.to_ascii_lowercase().as_str() {
        "tcp" => Ok(PROTO_TCP),
        "udp" => Ok(PROTO_UDP),
        "icmp" => Ok(PROTO_ICMP),
        "any" | "" => Ok(PROTO_ANY),
        _ => Err(PolicyManagerError::invalid(
            "protocol",
            format!("unknown protocol '{protocol}'"),
        )),
    }
}

/// 액션 이름을 코드로 변환합니다 (대소문자 무시).
pub fn parse_action(action: &str) -> Result<u8, PolicyManagerError> {
    match action.to_ascii_lowercase().as_str() {
        "allow" => Ok(ACTION_ALLOW),
        "deny" => Ok(ACTION_DENY),
        "log" => Ok(ACTION_LOG),
        _ => Err(PolicyManagerError::invalid(
            "action",
            format!("unknown action '{action}'"),
        )),
    }
}

/// 알 수 없는 번호는 숫자 그대로 표시합니다.
pub fn protocol_name(protocol: u8) -> String {
    match protocol {
        PROTO_TCP => "tcp".to_owned(),
        PROTO_UDP => "udp".to_owned(),
        PROTO_ICMP => "icmp".to_owned(),
        PROTO_ANY => "any".to_owned(),
        other => other.to_string(),
    }
}

pub fn action_name(action: u8) -> String {
    match action {
        ACTION_ALLOW => "allow".to_owned(),
        ACTION_DENY => "deny".to_owned(),
        ACTION_LOG => "log".to_owned(),
        other => other.to_string(),
    }
}

/// 정책의 5-tuple로 정확 일치 키를 만듭니다. 액션은 검사하지 않습니다.
pub fn flow_key(policy: &Policy) -> Result<FlowKey, PolicyManagerError> {
    let (src, _) = parse_cidr("src_ip", &policy.src_ip)?;
    let (dst, _) = parse_cidr("dst_ip", &policy.dst_ip)?;
    Ok(FlowKey {
        src_ip: addr_to_u32(src),
        dst_ip: addr_to_u32(dst),
        src_port: host_to_network_port(policy.src_port),
        dst_port: host_to_network_port(policy.dst_port),
        protocol: parse_protocol(&policy.protocol)?,
        _pad: [0; 3],
    })
}

/// 정확 일치 테이블 레코드로 변환합니다.
pub fn to_exact(policy: &Policy) -> Result<(FlowKey, ExactPolicyValue), PolicyManagerError> {
    let key = flow_key(policy)?;
    let action = parse_action(&policy.action)?;
    let value = ExactPolicyValue {
        action,
        log_enabled: u8::from(action == ACTION_LOG),
        priority: policy.priority,
        rule_id: policy.rule_id,
        hit_count: 0,
    };
    Ok((key, value))
}

/// 와일드카드 슬롯 레코드로 변환합니다.
///
/// 룰 ID 0은 빈 슬롯 표식과 겹치므로 거부합니다.
pub fn to_wildcard(policy: &Policy) -> Result<WildcardPolicyEntry, PolicyManagerError> {
    if policy.rule_id == 0 {
        return Err(PolicyManagerError::invalid(
            "rule_id",
            "rule id 0 marks an empty wildcard slot",
        ));
    }
    let (src, src_prefix) = parse_cidr("src_ip", &policy.src_ip)?;
    let (dst, dst_prefix) = parse_cidr("dst_ip", &policy.dst_ip)?;
    let protocol = parse_protocol(&policy.protocol)?;
    let action = parse_action(&policy.action)?;

    Ok(WildcardPolicyEntry {
        src_ip: addr_to_u32(src),
        src_ip_mask: mask_from_prefix(src_prefix),
        dst_ip: addr_to_u32(dst),
        dst_ip_mask: mask_from_prefix(dst_prefix),
        src_port: host_to_network_port(policy.src_port),
        dst_port: host_to_network_port(policy.dst_port),
        protocol,
        action,
        log_enabled: u8::from(action == ACTION_LOG),
        priority: policy.priority,
        rule_id: policy.rule_id,
        ..WildcardPolicyEntry::zeroed()
    })
}

/// 정확 일치 레코드에서 정책을 복원합니다. 주소는 단일 주소로 표시됩니다.
pub fn from_exact(key: &FlowKey, value: &ExactPolicyValue) -> Policy {
    Policy {
        rule_id: value.rule_id,
        src_ip: u32_to_addr(key.src_ip).to_string(),
        dst_ip: u32_to_addr(key.dst_ip).to_string(),
        src_port: network_to_host_port(key.src_port),
        dst_port: network_to_host_port(key.dst_port),
        protocol: protocol_name(key.protocol),
        action: action_name(value.action),
        priority: value.priority,
    }
}

/// 와일드카드 슬롯에서 정책을 복원합니다. /32가 아니면 `addr/prefix`로 표시됩니다.
pub fn from_wildcard(entry: &WildcardPolicyEntry) -> Policy {
    Policy {
        rule_id: entry.rule_id,
        src_ip: render_cidr(entry.src_ip, entry.src_ip_mask),
        dst_ip: render_cidr(entry.dst_ip, entry.dst_ip_mask),
        src_port: network_to_host_port(entry.src_port),
        dst_port: network_to_host_port(entry.dst_port),
        protocol: protocol_name(entry.protocol),
        action: action_name(entry.action),
        priority: entry.priority,
    }
}

fn render_cidr(addr: u32, mask: u32) -> String {
    let prefix = prefix_from_mask(mask);
    let addr = u32_to_addr(addr);
    if prefix == 32 {
        addr.to_string()
    } else {
        format!("{addr}/{prefix}")
    }
}
