//! 세션 스냅샷: `SESSION_MAP` 엔트리를 읽기 좋은 형태로 변환

use std::fmt;
use std::net::Ipv4Addr;

use microseg_ebpf_common::codec::{network_to_host_port, u32_to_addr};
use microseg_ebpf_common::{
    FlowKey, SESSION_STATE_CLOSED, SESSION_STATE_CLOSING, SESSION_STATE_ESTABLISHED,
    SESSION_STATE_NEW, SessionValue, TCP_STATE_CLOSE_WAIT, TCP_STATE_CLOSED, TCP_STATE_CLOSING,
    TCP_STATE_ESTABLISHED, TCP_STATE_FIN_WAIT1, TCP_STATE_FIN_WAIT2, TCP_STATE_LAST_ACK,
    TCP_STATE_SYN_RECV, TCP_STATE_SYN_SENT, TCP_STATE_TIME_WAIT,
};
use serde::Serialize;

/// 세션 수명 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    New,
    Established,
    Closing,
    Closed,
    Unknown(u8),
}

impl From<u8> for SessionState {
    fn from(raw: u8) -> Self {
        match raw {
            SESSION_STATE_NEW => Self::New,
            SESSION_STATE_ESTABLISHED => Self::Established,
            SESSION_STATE_CLOSING => Self::Closing,
            SESSION_STATE_CLOSED => Self::Closed,
            other => Self::Unknown(other),
        }
    }
}

/// TCP 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TcpState {
    Closed,
    SynSent,
    SynRecv,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
    Unknown(u8),
}

impl From<u8> for TcpState {
    fn from(raw: u8) -> Self {
        match raw {
            TCP_STATE_CLOSED => Self::Closed,
            TCP_STATE_SYN_SENT => Self::SynSent,
            TCP_STATE_SYN_RECV => Self::SynRecv,
            TCP_STATE_ESTABLISHED => Self::Established,
            TCP_STATE_FIN_WAIT1 => Self::FinWait1,
            TCP_STATE_FIN_WAIT2 => Self::FinWait2,
            TCP_STATE_CLOSE_WAIT => Self::CloseWait,
            TCP_STATE_CLOSING => Self::Closing,
            TCP_STATE_LAST_ACK => Self::LastAck,
            TCP_STATE_TIME_WAIT => Self::TimeWait,
            other => Self::Unknown(other),
        }
    }
}

/// 세션 스냅샷 (호스트 바이트 오더)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Session {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub created_ns: u64,
    pub last_seen_ns: u64,
    pub packets_to_server: u64,
    pub packets_to_client: u64,
    pub bytes_to_server: u64,
    pub bytes_to_client: u64,
    pub state: SessionState,
    pub tcp_state: TcpState,
    /// 세션 생성 시 결정된 정책 액션 코드
    pub policy_action: u8,
}

impl Session {
    pub fn from_entry(key: &FlowKey, value: &SessionValue) -> Self {
        Self {
            src_ip: u32_to_addr(key.src_ip),
            dst_ip: u32_to_addr(key.dst_ip),
            src_port: network_to_host_port(key.src_port),
            dst_port: network_to_host_port(key.dst_port),
            protocol: key.protocol,
            created_ns: value.created_ts,
            last_seen_ns: value.last_seen_ts,
            packets_to_server: value.packets_to_server,
            packets_to_client: value.packets_to_client,
            bytes_to_server: value.bytes_to_server,
            bytes_to_client: value.bytes_to_client,
            state: SessionState::from(value.state),
            tcp_state: TcpState::from(value.tcp_state),
            policy_action: value.policy_action,
        }
    }

    pub fn total_packets(&self) -> u64 {
        self.packets_to_server.saturating_add(self.packets_to_client)
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_to_server.saturating_add(self.bytes_to_client)
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto={} state={:?} packets={} bytes={}",
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port,
            self.protocol,
            self.state,
            self.total_packets(),
            self.total_bytes()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microseg_ebpf_common::{ACTION_DENY, PROTO_TCP};

    #[test]
    fn entry_is_converted_to_host_order() {
        let key = FlowKey {
            src_ip: u32::from_le_bytes([192, 168, 1, 10]),
            dst_ip: u32::from_le_bytes([192, 168, 1, 20]),
            src_port: 40000u16.swap_bytes(),
            dst_port: 443u16.swap_bytes(),
            protocol: PROTO_TCP,
            _pad: [0; 3],
        };
        let value = SessionValue {
            packets_to_server: 3,
            packets_to_client: 2,
            bytes_to_server: 300,
            bytes_to_client: 1200,
            state: SESSION_STATE_ESTABLISHED,
            tcp_state: TCP_STATE_ESTABLISHED,
            policy_action: ACTION_DENY,
            ..SessionValue::zeroed()
        };

        let session = Session::from_entry(&key, &value);
        assert_eq!(session.src_ip, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(session.dst_port, 443);
        assert_eq!(session.state, SessionState::Established);
        assert_eq!(session.tcp_state, TcpState::Established);
        assert_eq!(session.total_packets(), 5);
        assert_eq!(session.total_bytes(), 1500);
        assert!(session.to_string().contains("192.168.1.10:40000"));
    }

    #[test]
    fn unknown_state_codes_are_kept() {
        assert_eq!(SessionState::from(42), SessionState::Unknown(42));
        assert_eq!(TcpState::from(TCP_STATE_TIME_WAIT), TcpState::TimeWait);
        assert_eq!(TcpState::from(200), TcpState::Unknown(200));
    }
}
