//! 바이너리 코덱: 커널 맵 레이아웃 ↔ 바이트 시퀀스 변환
//!
//! 각 레이아웃은 고정 크기 바이트 배열로 직렬화되며, 필드 순서와 패딩은
//! [`crate`] 문서의 레이아웃 표와 정확히 일치합니다. 모든 정수는 리틀 엔디언입니다.
//!
//! 역직렬화는 입력이 레이아웃 크기보다 짧으면 [`CodecError::SizeMismatch`]로 실패하고,
//! 초과분은 무시합니다.
//!
//! 주소/포트 헬퍼:
//! ```text
//! 10.0.0.1  --addr_to_u32-->  u32::from_le_bytes([10, 0, 0, 1])
//! 80        --host_to_network_port-->  0x5000
//! /24       --mask_from_prefix-->  u32::from_le_bytes([255, 255, 255, 0])
//! ```

use core::fmt;
use core::net::Ipv4Addr;

use crate::{ExactPolicyValue, FlowEventRecord, FlowKey, SessionValue, WildcardPolicyEntry};

/// 코덱 에러
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// 입력 길이가 레이아웃 크기보다 짧음
    SizeMismatch { expected: usize, actual: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeMismatch { expected, actual } => {
                write!(f, "size mismatch: expected {expected} bytes, got {actual}")
            }
        }
    }
}

impl core::error::Error for CodecError {}

// =============================================================================
// 주소/포트 변환
// =============================================================================

/// 호스트 바이트 오더 포트를 네트워크 바이트 오더로 변환합니다 (16비트 바이트 스왑).
pub const fn host_to_network_port(port: u16) -> u16 {
    port.swap_bytes()
}

/// 네트워크 바이트 오더 포트를 호스트 바이트 오더로 변환합니다.
pub const fn network_to_host_port(port: u16) -> u16 {
    port.swap_bytes()
}

/// IPv4 주소를 맵 표현(옥텟을 리틀 엔디언으로 읽은 u32)으로 변환합니다.
pub const fn addr_to_u32(addr: Ipv4Addr) -> u32 {
    u32::from_le_bytes(addr.octets())
}

/// 맵 표현을 IPv4 주소로 되돌립니다.
pub const fn u32_to_addr(raw: u32) -> Ipv4Addr {
    let o = raw.to_le_bytes();
    Ipv4Addr::new(o[0], o[1], o[2], o[3])
}

/// 프리픽스 길이를 주소와 같은 옥텟 순서의 마스크로 변환합니다.
///
/// 32를 넘는 값은 32로 취급합니다.
pub const fn mask_from_prefix(prefix: u8) -> u32 {
    let prefix = if prefix > 32 { 32 } else { prefix };
    let network_order = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    };
    u32::from_le_bytes(network_order.to_be_bytes())
}

/// 마스크를 프리픽스 길이로 변환합니다. (연속 마스크 가정)
pub const fn prefix_from_mask(mask: u32) -> u8 {
    u32::from_be_bytes(mask.to_le_bytes()).leading_ones() as u8
}

// =============================================================================
// 바이트 읽기/쓰기 헬퍼
// =============================================================================

fn check_len(bytes: &[u8], expected: usize) -> Result<(), CodecError> {
    if bytes.len() < expected {
        return Err(CodecError::SizeMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn get_u16(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([b[off], b[off + 1]])
}

fn get_u32(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

fn get_u64(b: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[off..off + 8]);
    u64::from_le_bytes(raw)
}

fn put(out: &mut [u8], off: usize, src: &[u8]) {
    out[off..off + src.len()].copy_from_slice(src);
}

// =============================================================================
// 레이아웃별 코덱
// =============================================================================

impl FlowKey {
    /// 직렬화 크기
    pub const SIZE: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        put(&mut out, 0, &self.src_ip.to_le_bytes());
        put(&mut out, 4, &self.dst_ip.to_le_bytes());
        put(&mut out, 8, &self.src_port.to_le_bytes());
        put(&mut out, 10, &self.dst_port.to_le_bytes());
        out[12] = self.protocol;
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        check_len(bytes, Self::SIZE)?;
        Ok(Self {
            src_ip: get_u32(bytes, 0),
            dst_ip: get_u32(bytes, 4),
            src_port: get_u16(bytes, 8),
            dst_port: get_u16(bytes, 10),
            protocol: bytes[12],
            _pad: [0; 3],
        })
    }
}

impl ExactPolicyValue {
    /// 직렬화 크기
    pub const SIZE: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.action;
        out[1] = self.log_enabled;
        put(&mut out, 2, &self.priority.to_le_bytes());
        put(&mut out, 4, &self.rule_id.to_le_bytes());
        put(&mut out, 8, &self.hit_count.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        check_len(bytes, Self::SIZE)?;
        Ok(Self {
            action: bytes[0],
            log_enabled: bytes[1],
            priority: get_u16(bytes, 2),
            rule_id: get_u32(bytes, 4),
            hit_count: get_u64(bytes, 8),
        })
    }
}

impl WildcardPolicyEntry {
    /// 직렬화 크기
    pub const SIZE: usize = 32;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        put(&mut out, 0, &self.src_ip.to_le_bytes());
        put(&mut out, 4, &self.src_ip_mask.to_le_bytes());
        put(&mut out, 8, &self.dst_ip.to_le_bytes());
        put(&mut out, 12, &self.dst_ip_mask.to_le_bytes());
        put(&mut out, 16, &self.src_port.to_le_bytes());
        put(&mut out, 18, &self.dst_port.to_le_bytes());
        out[20] = self.protocol;
        out[21] = self.action;
        out[22] = self.log_enabled;
        put(&mut out, 24, &self.priority.to_le_bytes());
        put(&mut out, 28, &self.rule_id.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        check_len(bytes, Self::SIZE)?;
        Ok(Self {
            src_ip: get_u32(bytes, 0),
            src_ip_mask: get_u32(bytes, 4),
            dst_ip: get_u32(bytes, 8),
            dst_ip_mask: get_u32(bytes, 12),
            src_port: get_u16(bytes, 16),
            dst_port: get_u16(bytes, 18),
            protocol: bytes[20],
            action: bytes[21],
            log_enabled: bytes[22],
            _pad1: 0,
            priority: get_u16(bytes, 24),
            _pad2: 0,
            rule_id: get_u32(bytes, 28),
        })
    }
}

impl SessionValue {
    /// 직렬화 크기
    pub const SIZE: usize = 56;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        put(&mut out, 0, &self.created_ts.to_le_bytes());
        put(&mut out, 8, &self.last_seen_ts.to_le_bytes());
        put(&mut out, 16, &self.packets_to_server.to_le_bytes());
        put(&mut out, 24, &self.packets_to_client.to_le_bytes());
        put(&mut out, 32, &self.bytes_to_server.to_le_bytes());
        put(&mut out, 40, &self.bytes_to_client.to_le_bytes());
        out[48] = self.state;
        out[49] = self.tcp_state;
        out[50] = self.policy_action;
        out[51] = self.flags;
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        check_len(bytes, Self::SIZE)?;
        Ok(Self {
            created_ts: get_u64(bytes, 0),
            last_seen_ts: get_u64(bytes, 8),
            packets_to_server: get_u64(bytes, 16),
            packets_to_client: get_u64(bytes, 24),
            bytes_to_server: get_u64(bytes, 32),
            bytes_to_client: get_u64(bytes, 40),
            state: bytes[48],
            tcp_state: bytes[49],
            policy_action: bytes[50],
            flags: bytes[51],
            _pad: 0,
        })
    }
}

impl FlowEventRecord {
    /// 직렬화 크기 (packed)
    pub const SIZE: usize = 44;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        // packed 구조체이므로 필드를 먼저 복사한 뒤 사용
        let key = self.key;
        let (timestamp, packets, bytes) = (self.timestamp, self.packets, self.bytes);
        put(&mut out, 0, &key.to_bytes());
        put(&mut out, 16, &timestamp.to_le_bytes());
        put(&mut out, 24, &packets.to_le_bytes());
        put(&mut out, 32, &bytes.to_le_bytes());
        out[40] = self.action;
        out[41] = self.event_type;
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        check_len(bytes, Self::SIZE)?;
        Ok(Self {
            key: FlowKey::from_bytes(bytes)?,
            timestamp: get_u64(bytes, 16),
            packets: get_u64(bytes, 24),
            bytes: get_u64(bytes, 32),
            action: bytes[40],
            event_type: bytes[41],
            _pad: 0,
        })
    }
}

/// 통계 카운터(u64) 직렬화
pub fn encode_counter(value: u64) -> [u8; 8] {
    value.to_le_bytes()
}

/// 통계 카운터(u64) 역직렬화
pub fn decode_counter(bytes: &[u8]) -> Result<u64, CodecError> {
    check_len(bytes, 8)?;
    Ok(get_u64(bytes, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ACTION_DENY, PROTO_TCP};

    fn sample_key() -> FlowKey {
        FlowKey {
            src_ip: addr_to_u32(Ipv4Addr::new(10, 0, 0, 1)),
            dst_ip: addr_to_u32(Ipv4Addr::new(10, 0, 0, 2)),
            src_port: host_to_network_port(443),
            dst_port: host_to_network_port(8080),
            protocol: PROTO_TCP,
            _pad: [0; 3],
        }
    }

    #[test]
    fn port_swap_is_involution() {
        for port in [0u16, 1, 80, 255, 256, 8080, 65535] {
            assert_eq!(network_to_host_port(host_to_network_port(port)), port);
        }
        assert_eq!(host_to_network_port(80), 0x5000);
    }

    #[test]
    fn addr_roundtrip_boundaries() {
        for addr in [
            Ipv4Addr::new(0, 0, 0, 0),
            Ipv4Addr::new(255, 255, 255, 255),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(192, 168, 1, 254),
        ] {
            assert_eq!(u32_to_addr(addr_to_u32(addr)), addr);
        }
    }

    #[test]
    fn addr_is_octets_little_endian() {
        let raw = addr_to_u32(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(raw.to_le_bytes(), [10, 0, 0, 1]);
    }

    #[test]
    fn mask_from_prefix_edges() {
        assert_eq!(mask_from_prefix(0), 0);
        assert_eq!(mask_from_prefix(32), u32::MAX);
        assert_eq!(mask_from_prefix(40), u32::MAX);
        assert_eq!(mask_from_prefix(24).to_le_bytes(), [255, 255, 255, 0]);
        assert_eq!(mask_from_prefix(12).to_le_bytes(), [255, 240, 0, 0]);
    }

    #[test]
    fn prefix_from_mask_inverts_mask_from_prefix() {
        for prefix in 0..=32u8 {
            assert_eq!(prefix_from_mask(mask_from_prefix(prefix)), prefix);
        }
    }

    #[test]
    fn flow_key_byte_order() {
        let bytes = sample_key().to_bytes();
        assert_eq!(&bytes[0..4], &[10, 0, 0, 1]);
        assert_eq!(&bytes[4..8], &[10, 0, 0, 2]);
        // 443 = 0x01BB, 네트워크 오더로 메모리에 01 BB
        assert_eq!(&bytes[8..10], &[0x01, 0xBB]);
        assert_eq!(bytes[12], PROTO_TCP);
        assert_eq!(&bytes[13..16], &[0, 0, 0]);
    }

    #[test]
    fn flow_key_decode() {
        let key = sample_key();
        assert!(FlowKey::from_bytes(&key.to_bytes()).unwrap() == key);
    }

    #[test]
    fn exact_value_layout() {
        let value = ExactPolicyValue {
            action: ACTION_DENY,
            log_enabled: 0,
            priority: 0x0102,
            rule_id: 42,
            hit_count: 7,
        };
        let bytes = value.to_bytes();
        assert_eq!(bytes[0], ACTION_DENY);
        assert_eq!(&bytes[2..4], &[0x02, 0x01]);
        assert_eq!(&bytes[4..8], &42u32.to_le_bytes());
        assert!(ExactPolicyValue::from_bytes(&bytes).unwrap() == value);
    }

    #[test]
    fn wildcard_rule_id_at_offset_28() {
        let entry = WildcardPolicyEntry {
            rule_id: 0xAABBCCDD,
            priority: 5,
            ..WildcardPolicyEntry::zeroed()
        };
        let bytes = entry.to_bytes();
        assert_eq!(&bytes[28..32], &0xAABBCCDDu32.to_le_bytes());
        assert_eq!(&bytes[24..26], &5u16.to_le_bytes());
        assert!(WildcardPolicyEntry::from_bytes(&bytes).unwrap() == entry);
    }

    #[test]
    fn session_value_flags_offsets() {
        let session = SessionValue {
            packets_to_server: 3,
            state: 1,
            tcp_state: 3,
            policy_action: 2,
            ..SessionValue::zeroed()
        };
        let bytes = session.to_bytes();
        assert_eq!(&bytes[48..52], &[1, 3, 2, 0]);
        assert!(SessionValue::from_bytes(&bytes).unwrap() == session);
    }

    #[test]
    fn flow_event_record_trailer() {
        let record = FlowEventRecord {
            key: sample_key(),
            timestamp: 1_000,
            packets: 1,
            bytes: 60,
            action: ACTION_DENY,
            event_type: 0,
            _pad: 0,
        };
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), 44);
        let decoded = FlowEventRecord::from_bytes(&bytes).unwrap();
        let (ts, b, action) = (decoded.timestamp, decoded.bytes, decoded.action);
        assert_eq!(ts, 1_000);
        assert_eq!(b, 60);
        assert_eq!(action, ACTION_DENY);
    }

    #[test]
    fn short_input_is_size_mismatch() {
        assert!(matches!(
            FlowKey::from_bytes(&[0u8; 15]),
            Err(CodecError::SizeMismatch {
                expected: 16,
                actual: 15
            })
        ));
        assert!(SessionValue::from_bytes(&[0u8; 55]).is_err());
        assert!(WildcardPolicyEntry::from_bytes(&[]).is_err());
        assert!(decode_counter(&[1, 2, 3]).is_err());
    }

    #[test]
    fn counter_codec() {
        assert_eq!(decode_counter(&encode_counter(u64::MAX)).unwrap(), u64::MAX);
    }
}
