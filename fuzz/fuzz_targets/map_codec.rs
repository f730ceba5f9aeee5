#![no_main]

use libfuzzer_sys::fuzz_target;
use microseg_ebpf_common::codec::decode_counter;
use microseg_ebpf_common::{ExactPolicyValue, FlowKey, SessionValue, WildcardPolicyEntry};

fuzz_target!(|data: &[u8]| {
    // 디코딩에 성공한 값은 같은 바이트로 다시 인코딩되어야 함 (패딩 제외)
    if let Ok(key) = FlowKey::from_bytes(data) {
        assert_eq!(FlowKey::from_bytes(&key.to_bytes()).ok(), Some(key));
    }
    if let Ok(value) = ExactPolicyValue::from_bytes(data) {
        assert_eq!(value.to_bytes()[..8], data[..8]);
    }
    if let Ok(entry) = WildcardPolicyEntry::from_bytes(data) {
        assert_eq!(WildcardPolicyEntry::from_bytes(&entry.to_bytes()).ok(), Some(entry));
    }
    if let Ok(session) = SessionValue::from_bytes(data) {
        assert_eq!(session.to_bytes()[..48], data[..48]);
    }
    let _ = decode_counter(data);
});
