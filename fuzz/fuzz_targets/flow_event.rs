#![no_main]

use libfuzzer_sys::fuzz_target;
use microseg_dataplane::decode_flow_event;
use microseg_dataplane::flow::MIN_RECORD_LEN;
use microseg_ebpf_common::FlowEventRecord;

fuzz_target!(|data: &[u8]| {
    // 짧은 레코드는 에러, 그 외에는 패닉 없이 디코딩되어야 함
    match decode_flow_event(data) {
        Ok(event) => {
            assert!(data.len() >= MIN_RECORD_LEN);
            assert_eq!(event.details.is_some(), data.len() >= FlowEventRecord::SIZE);
        }
        Err(_) => assert!(data.len() < MIN_RECORD_LEN),
    }
});
