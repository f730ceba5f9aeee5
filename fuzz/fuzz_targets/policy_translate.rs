#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use microseg_core::types::Policy;
use microseg_policy::translate::{self, TableKind};

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzPolicy {
    rule_id: u32,
    src_ip: FuzzAddr,
    dst_ip: FuzzAddr,
    src_port: u16,
    dst_port: u16,
    protocol: FuzzProtocol,
    action: FuzzAction,
    priority: u16,
}

#[derive(Arbitrary, Debug)]
enum FuzzAddr {
    Any,
    AnyV6,
    Cidr([u8; 4], u8),
    Raw(String),
}

#[derive(Arbitrary, Debug)]
enum FuzzProtocol {
    Tcp,
    Udp,
    Icmp,
    Any,
    Raw(String),
}

#[derive(Arbitrary, Debug)]
enum FuzzAction {
    Allow,
    Deny,
    Log,
    Raw(String),
}

impl FuzzAddr {
    fn render(&self) -> String {
        match self {
            FuzzAddr::Any => "0.0.0.0/0".to_owned(),
            FuzzAddr::AnyV6 => "::/0".to_owned(),
            FuzzAddr::Cidr([a, b, c, d], prefix) => format!("{a}.{b}.{c}.{d}/{}", prefix % 40),
            FuzzAddr::Raw(s) => s.clone(),
        }
    }
}

impl FuzzProtocol {
    fn render(&self) -> String {
        match self {
            FuzzProtocol::Tcp => "tcp".to_owned(),
            FuzzProtocol::Udp => "UDP".to_owned(),
            FuzzProtocol::Icmp => "icmp".to_owned(),
            FuzzProtocol::Any => "any".to_owned(),
            FuzzProtocol::Raw(s) => s.clone(),
        }
    }
}

impl FuzzAction {
    fn render(&self) -> String {
        match self {
            FuzzAction::Allow => "allow".to_owned(),
            FuzzAction::Deny => "deny".to_owned(),
            FuzzAction::Log => "log".to_owned(),
            FuzzAction::Raw(s) => s.clone(),
        }
    }
}

fuzz_target!(|input: FuzzPolicy| {
    let policy = Policy {
        rule_id: input.rule_id,
        src_ip: input.src_ip.render(),
        dst_ip: input.dst_ip.render(),
        src_port: input.src_port,
        dst_port: input.dst_port,
        protocol: input.protocol.render(),
        action: input.action.render(),
        priority: input.priority,
    };

    match translate::classify(&policy) {
        TableKind::Exact => {
            if let Ok((key, value)) = translate::to_exact(&policy) {
                let back = translate::from_exact(&key, &value);
                assert_eq!(back.rule_id, policy.rule_id);
                assert_eq!(back.dst_port, policy.dst_port);
                assert_eq!(translate::to_exact(&back).ok(), Some((key, value)));
            }
        }
        TableKind::Wildcard => {
            // 복원한 정책은 같은 슬롯 레코드로 다시 변환되어야 함
            if let Ok(entry) = translate::to_wildcard(&policy) {
                let back = translate::from_wildcard(&entry);
                assert_eq!(translate::to_wildcard(&back).ok(), Some(entry));
            }
        }
    }
});
