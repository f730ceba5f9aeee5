//! 정책 관리 통합 테스트: 메모리 백엔드 데이터 평면 위에서 정책 적용/복원 검증

use microseg_core::types::Policy;
use microseg_dataplane::microseg_ebpf_common::{ACTION_DENY, MAX_ENTRIES_WILDCARD_POLICY};
use microseg_dataplane::tables::WildcardPolicyTable;
use microseg_dataplane::{DataPlane, MemoryBackend};
use microseg_policy::{
    MemoryStorage, Placement, PolicyManager, PolicyManagerError, Storage, TableKind,
    TomlFileStorage, classify,
};

fn plane() -> DataPlane<MemoryBackend> {
    DataPlane::builder()
        .interface("lo")
        .backend(MemoryBackend::new())
        .build()
        .unwrap()
}

fn web_allow() -> Policy {
    Policy {
        rule_id: 1,
        src_ip: "192.168.1.100".to_owned(),
        dst_ip: "10.0.0.1".to_owned(),
        src_port: 12345,
        dst_port: 80,
        protocol: "tcp".to_owned(),
        action: "allow".to_owned(),
        priority: 0,
    }
}

fn https_deny_from_anywhere() -> Policy {
    Policy {
        rule_id: 2,
        src_ip: "0.0.0.0/0".to_owned(),
        dst_ip: "10.0.0.1".to_owned(),
        src_port: 0,
        dst_port: 443,
        protocol: "tcp".to_owned(),
        action: "deny".to_owned(),
        priority: 0,
    }
}

#[tokio::test]
async fn concrete_policy_is_listed_from_exact_table() {
    let plane = plane();
    let manager = PolicyManager::<MemoryStorage>::from_kernel_tables(&plane.tables(), None);

    manager.add_policy(&web_allow()).await.unwrap();

    let listed = manager.list_policies().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].rule_id, 1);
    assert_eq!(listed[0].src_ip, "192.168.1.100");
    assert_eq!(listed[0].dst_port, 80);
    assert_eq!(listed[0].action, "allow");
}

#[tokio::test]
async fn unset_source_port_routes_to_wildcard() {
    let mut policy = web_allow();
    policy.src_port = 0;
    assert_eq!(classify(&policy), TableKind::Wildcard);

    let plane = plane();
    let manager = PolicyManager::<MemoryStorage>::from_kernel_tables(&plane.tables(), None);
    manager.add_policy(&policy).await.unwrap();

    assert!(manager.list_policies().unwrap().is_empty());
    assert_eq!(manager.get_policy(1).unwrap(), Some(policy));
}

#[tokio::test]
async fn unrestricted_source_lands_in_first_wildcard_slot() {
    let plane = plane();
    let manager = PolicyManager::<MemoryStorage>::from_kernel_tables(&plane.tables(), None);

    manager.add_policy(&https_deny_from_anywhere()).await.unwrap();

    let slot = plane.backend().wildcard_handle().lock().unwrap().get(0).unwrap();
    let rule_id = slot.rule_id;
    let action = slot.action;
    assert_eq!(rule_id, 2);
    assert_eq!(action, ACTION_DENY);

    // 정확 일치 목록에는 보이지 않음
    assert!(manager.list_policies().unwrap().is_empty());
    assert_eq!(manager.list_all_policies().unwrap().len(), 1);
}

#[tokio::test]
async fn placement_reports_table_choice() {
    let plane = plane();
    let manager = PolicyManager::<MemoryStorage>::from_kernel_tables(&plane.tables(), None);

    assert!(matches!(
        manager.tables().insert(&web_allow()).unwrap(),
        Placement::Exact(_)
    ));
    assert!(matches!(
        manager.tables().insert(&https_deny_from_anywhere()).unwrap(),
        Placement::Wildcard(_)
    ));
}

#[tokio::test]
async fn wildcard_capacity_is_enforced_through_manager() {
    let plane = plane();
    let manager = PolicyManager::<MemoryStorage>::from_kernel_tables(&plane.tables(), None);

    for rule_id in 1..=MAX_ENTRIES_WILDCARD_POLICY {
        let mut policy = https_deny_from_anywhere();
        policy.rule_id = rule_id;
        manager.add_policy(&policy).await.unwrap();
    }

    let mut overflow = https_deny_from_anywhere();
    overflow.rule_id = MAX_ENTRIES_WILDCARD_POLICY + 1;
    assert!(matches!(
        manager.add_policy(&overflow).await,
        Err(PolicyManagerError::WildcardTableFull { .. })
    ));

    // 기존 룰 갱신은 여전히 가능
    let mut update = https_deny_from_anywhere();
    update.rule_id = 7;
    update.action = "log".to_owned();
    manager.add_policy(&update).await.unwrap();
    assert_eq!(manager.get_policy(7).unwrap().unwrap().action, "log");
}

#[tokio::test]
async fn policies_survive_restart_via_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policies.toml");

    {
        let plane = plane();
        let storage = TomlFileStorage::open(&path).await.unwrap();
        let manager = PolicyManager::from_kernel_tables(&plane.tables(), Some(storage));
        manager.add_policy(&web_allow()).await.unwrap();
        manager.add_policy(&https_deny_from_anywhere()).await.unwrap();
        manager.close().await.unwrap();
    }

    let plane = plane();
    let storage = TomlFileStorage::open(&path).await.unwrap();
    let manager = PolicyManager::from_kernel_tables(&plane.tables(), Some(storage));

    let report = manager.load_persisted().await.unwrap();
    assert_eq!(report.restored, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(manager.get_policy(1).unwrap(), Some(web_allow()));
    assert_eq!(manager.get_policy(2).unwrap(), Some(https_deny_from_anywhere()));
}

#[tokio::test]
async fn remove_by_rule_id_forgets_persisted_copy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policies.toml");

    let plane = plane();
    let storage = TomlFileStorage::open(&path).await.unwrap();
    let manager = PolicyManager::from_kernel_tables(&plane.tables(), Some(storage));
    manager.add_policy(&https_deny_from_anywhere()).await.unwrap();
    manager.remove_policy(2).await.unwrap();

    assert!(manager.get_policy(2).unwrap().is_none());
    let remaining = manager.storage().unwrap().load_policies().await.unwrap();
    assert!(remaining.is_empty());
}
