#![no_std]
#![no_main]

//! TC ingress 마이크로세그멘테이션 분류기
//!
//! ```text
//! packet ─▶ FlowKey ─▶ SESSION_MAP hit? ──yes──▶ 캐시된 액션
//!                          │ no
//!                          ▼
//!                     POLICY_MAP (정확 일치)
//!                          │ miss
//!                          ▼
//!                WILDCARD_POLICY_MAP 선형 탐색 (우선순위 최대)
//!                          │
//!                          ▼
//!              세션 생성 + deny/log 이벤트 ─▶ FLOW_EVENTS
//! ```
//!
//! 일치하는 정책이 없으면 허용합니다. IPv4가 아닌 패킷은 통계 없이 통과합니다.

use aya_ebpf::{
    bindings::{BPF_NOEXIST, TC_ACT_OK, TC_ACT_SHOT},
    helpers::bpf_ktime_get_ns,
    macros::{classifier, map},
    maps::{Array, HashMap, LruHashMap, PerCpuArray, RingBuf},
    programs::TcContext,
};
use aya_log_ebpf::debug;
use core::mem;
use microseg_ebpf_common::{
    ACTION_ALLOW, ACTION_DENY, ACTION_LOG, EVENT_NEW, ExactPolicyValue, FLOW_EVENTS_SIZE,
    FlowEventRecord, FlowKey, MAX_ENTRIES_POLICY, MAX_ENTRIES_SESSION,
    MAX_ENTRIES_WILDCARD_POLICY, PROTO_TCP, PROTO_UDP, STATS_ALLOWED_PACKETS,
    STATS_DENIED_PACKETS, STATS_MAX, STATS_NEW_SESSIONS, STATS_POLICY_HITS, STATS_POLICY_MISSES,
    STATS_TOTAL_PACKETS, SessionValue, WildcardPolicyEntry,
};
use network_types::{eth::EthHdr, ip::Ipv4Hdr, tcp::TcpHdr, udp::UdpHdr};

const ETH_P_IP: u16 = 0x0800;

// =============================================================================
// 맵
// =============================================================================

#[map]
static SESSION_MAP: LruHashMap<FlowKey, SessionValue> =
    LruHashMap::with_max_entries(MAX_ENTRIES_SESSION, 0);

#[map]
static POLICY_MAP: HashMap<FlowKey, ExactPolicyValue> =
    HashMap::with_max_entries(MAX_ENTRIES_POLICY, 0);

#[map]
static WILDCARD_POLICY_MAP: Array<WildcardPolicyEntry> =
    Array::with_max_entries(MAX_ENTRIES_WILDCARD_POLICY, 0);

#[map]
static STATS_MAP: PerCpuArray<u64> = PerCpuArray::with_max_entries(STATS_MAX, 0);

#[map]
static FLOW_EVENTS: RingBuf = RingBuf::with_byte_size(FLOW_EVENTS_SIZE, 0);

// =============================================================================
// 진입점
// =============================================================================

#[classifier]
pub fn tc_microsegment_filter(ctx: TcContext) -> i32 {
    match try_filter(&ctx) {
        Ok(ret) => ret,
        // 파싱할 수 없는 패킷은 통과
        Err(()) => TC_ACT_OK,
    }
}

fn try_filter(ctx: &TcContext) -> Result<i32, ()> {
    let Some(key) = flow_key(ctx)? else {
        return Ok(TC_ACT_OK);
    };
    increment(STATS_TOTAL_PACKETS);

    let len = u64::from(ctx.len());

    if let Some(session) = SESSION_MAP.get_ptr_mut(&key) {
        let action = unsafe {
            (*session).last_seen_ts = bpf_ktime_get_ns();
            (*session).packets_to_server += 1;
            (*session).bytes_to_server += len;
            (*session).policy_action
        };
        return Ok(enforce(action));
    }

    let action = lookup_action(ctx, &key);
    create_session(&key, action, len);
    Ok(enforce(action))
}

// =============================================================================
// 파싱
// =============================================================================

#[inline(always)]
unsafe fn ptr_at<T>(ctx: &TcContext, offset: usize) -> Result<*const T, ()> {
    let start = ctx.data();
    let end = ctx.data_end();
    if start + offset + mem::size_of::<T>() > end {
        return Err(());
    }
    Ok((start + offset) as *const T)
}

/// IPv4 패킷이면 플로우 키를 만듭니다. 주소와 포트는 헤더 바이트 그대로 담깁니다.
#[inline(always)]
fn flow_key(ctx: &TcContext) -> Result<Option<FlowKey>, ()> {
    let eth: *const EthHdr = unsafe { ptr_at(ctx, 0)? };
    if u16::from_be(unsafe { (*eth).ether_type }) != ETH_P_IP {
        return Ok(None);
    }

    let ip: *const Ipv4Hdr = unsafe { ptr_at(ctx, EthHdr::LEN)? };
    let protocol = unsafe { (*ip).proto } as u8;
    let l4 = EthHdr::LEN + usize::from(unsafe { (*ip).ihl() });

    let (src_port, dst_port) = match protocol {
        PROTO_TCP => {
            let tcp: *const TcpHdr = unsafe { ptr_at(ctx, l4)? };
            unsafe { ((*tcp).source, (*tcp).dest) }
        }
        PROTO_UDP => {
            let udp: *const UdpHdr = unsafe { ptr_at(ctx, l4)? };
            unsafe { ((*udp).src, (*udp).dst) }
        }
        _ => ([0; 2], [0; 2]),
    };

    Ok(Some(FlowKey {
        src_ip: u32::from_le_bytes(unsafe { (*ip).src_addr }),
        dst_ip: u32::from_le_bytes(unsafe { (*ip).dst_addr }),
        src_port: u16::from_le_bytes(src_port),
        dst_port: u16::from_le_bytes(dst_port),
        protocol,
        _pad: [0; 3],
    }))
}

// =============================================================================
// 정책 조회
// =============================================================================

/// 정확 일치 → 와일드카드 순으로 액션을 정합니다.
#[inline(always)]
fn lookup_action(ctx: &TcContext, key: &FlowKey) -> u8 {
    if let Some(policy) = POLICY_MAP.get_ptr_mut(key) {
        increment(STATS_POLICY_HITS);
        unsafe {
            (*policy).hit_count += 1;
            if (*policy).log_enabled != 0 {
                debug!(ctx, "exact policy {} matched", (*policy).rule_id);
            }
            return (*policy).action;
        }
    }

    match best_wildcard(key) {
        Some(entry) => {
            increment(STATS_POLICY_HITS);
            if entry.log_enabled != 0 {
                debug!(ctx, "wildcard policy {} matched", entry.rule_id);
            }
            entry.action
        }
        None => {
            increment(STATS_POLICY_MISSES);
            ACTION_ALLOW
        }
    }
}

/// 일치하는 슬롯 중 우선순위가 가장 높은 것. 동률이면 앞 슬롯이 이깁니다.
#[inline(always)]
fn best_wildcard(key: &FlowKey) -> Option<WildcardPolicyEntry> {
    let mut best: Option<WildcardPolicyEntry> = None;
    for index in 0..MAX_ENTRIES_WILDCARD_POLICY {
        let Some(entry) = WILDCARD_POLICY_MAP.get(index) else {
            break;
        };
        if !entry.matches(key) {
            continue;
        }
        match best {
            Some(current) if current.priority >= entry.priority => {}
            _ => best = Some(*entry),
        }
    }
    best
}

// =============================================================================
// 세션 / 이벤트
// =============================================================================

#[inline(always)]
fn create_session(key: &FlowKey, action: u8, len: u64) {
    let now = unsafe { bpf_ktime_get_ns() };
    let session = SessionValue {
        created_ts: now,
        last_seen_ts: now,
        packets_to_server: 1,
        bytes_to_server: len,
        policy_action: action,
        ..SessionValue::zeroed()
    };

    // 다른 CPU가 먼저 만들었으면 카운트/이벤트 없이 넘어감
    if SESSION_MAP
        .insert(key, &session, u64::from(BPF_NOEXIST))
        .is_err()
    {
        return;
    }
    increment(STATS_NEW_SESSIONS);

    if action == ACTION_DENY || action == ACTION_LOG {
        emit_event(key, action, now, len);
    }
}

/// 링 버퍼가 가득 차면 이벤트는 버려집니다.
#[inline(always)]
fn emit_event(key: &FlowKey, action: u8, timestamp: u64, len: u64) {
    if let Some(mut entry) = FLOW_EVENTS.reserve::<FlowEventRecord>(0) {
        entry.write(FlowEventRecord {
            key: *key,
            timestamp,
            packets: 1,
            bytes: len,
            action,
            event_type: EVENT_NEW,
            _pad: 0,
        });
        entry.submit(0);
    }
}

#[inline(always)]
fn enforce(action: u8) -> i32 {
    if action == ACTION_DENY {
        increment(STATS_DENIED_PACKETS);
        TC_ACT_SHOT
    } else {
        increment(STATS_ALLOWED_PACKETS);
        TC_ACT_OK
    }
}

#[inline(always)]
fn increment(index: u32) {
    if let Some(counter) = STATS_MAP.get_ptr_mut(index) {
        unsafe { *counter += 1 };
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
