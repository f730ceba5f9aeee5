//! 정책 관리자: 커널 테이블 갱신과 영속화를 조율
//!
//! 커널 테이블이 기준(source of truth)이며 저장소 기록은 best-effort입니다.
//! 저장소 실패는 `warn!`으로 남기고 호출은 성공으로 처리합니다.
//!
//! # 조회/삭제 범위
//! - [`PolicyManager::list_policies`], [`PolicyManager::delete_policy`]: 정확 일치 테이블만
//! - [`PolicyManager::list_all_policies`], [`PolicyManager::remove_policy`],
//!   [`PolicyManager::get_policy`]: 두 테이블 모두

use microseg_core::metrics as m;
use microseg_core::types::Policy;
use microseg_dataplane::tables::KernelTables;
use tracing::{debug, info, warn};

use crate::error::PolicyManagerError;
use crate::storage::{Storage, TomlFileStorage};
use crate::store::{Placement, PolicyTables};
use crate::translate;

/// 저장소 복원 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// 커널 테이블에 적용된 정책 수
    pub restored: usize,
    /// 적용에 실패한 정책 수
    pub failed: usize,
}

impl RestoreReport {
    pub fn total(&self) -> usize {
        self.restored + self.failed
    }
}

/// 정책 관리자
pub struct PolicyManager<S: Storage = TomlFileStorage> {
    tables: PolicyTables,
    storage: Option<S>,
}

impl<S: Storage> PolicyManager<S> {
    /// 영속화 없이 생성합니다.
    pub fn new(tables: PolicyTables) -> Self {
        Self {
            tables,
            storage: None,
        }
    }

    /// 저장소와 함께 생성합니다.
    pub fn with_storage(tables: PolicyTables, storage: S) -> Self {
        Self {
            tables,
            storage: Some(storage),
        }
    }

    /// 데이터 평면의 테이블 핸들로 생성합니다.
    pub fn from_kernel_tables(tables: &KernelTables, storage: Option<S>) -> Self {
        Self {
            tables: PolicyTables::new(tables.exact.clone(), tables.wildcard.clone()),
            storage,
        }
    }

    pub fn tables(&self) -> &PolicyTables {
        &self.tables
    }

    pub fn storage(&self) -> Option<&S> {
        self.storage.as_ref()
    }

    /// 정책을 커널 테이블에 적용하고 저장소에 기록합니다.
    pub async fn add_policy(&self, policy: &Policy) -> Result<(), PolicyManagerError> {
        self.apply(policy)?;

        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save_policy(policy).await {
                warn!(rule_id = policy.rule_id, error = %e, "failed to persist policy");
            }
        }
        Ok(())
    }

    /// 정책의 5-tuple 키로 정확 일치 테이블에서 제거합니다.
    ///
    /// 와일드카드 테이블은 검사하지 않으며, 키가 없어도 성공으로 처리합니다.
    /// 와일드카드로 배치된 정책은 이 호출로 지워지지 않습니다. 룰 ID 기준
    /// 삭제는 [`remove_policy`](Self::remove_policy)를 사용합니다.
    pub async fn delete_policy(&self, policy: &Policy) -> Result<(), PolicyManagerError> {
        let key = translate::flow_key(policy)?;
        if !self.tables.exact().remove(&key)? {
            debug!(rule_id = policy.rule_id, "no exact entry for policy key");
            return Ok(());
        }
        info!(policy = %policy, "policy deleted");

        self.forget(policy.rule_id).await;
        Ok(())
    }

    /// 정확 일치 테이블의 정책 목록
    pub fn list_policies(&self) -> Result<Vec<Policy>, PolicyManagerError> {
        self.tables.exact().list()
    }

    /// 두 테이블의 정책 목록
    pub fn list_all_policies(&self) -> Result<Vec<Policy>, PolicyManagerError> {
        self.tables.list_all()
    }

    /// 룰 ID로 정책을 찾습니다.
    pub fn get_policy(&self, rule_id: u32) -> Result<Option<Policy>, PolicyManagerError> {
        self.tables.get(rule_id)
    }

    /// 룰 ID로 두 테이블에서 정책을 제거합니다.
    pub async fn remove_policy(&self, rule_id: u32) -> Result<(), PolicyManagerError> {
        if !self.tables.remove_rule(rule_id)? {
            return Err(PolicyManagerError::NotFound(rule_id));
        }
        info!(rule_id, "policy removed");

        self.forget(rule_id).await;
        Ok(())
    }

    /// 저장소의 정책을 커널 테이블에 다시 적용합니다.
    ///
    /// 개별 정책 실패는 건너뛰고 집계합니다. 저장소가 없거나 읽기 자체가
    /// 실패한 경우에만 에러를 반환합니다.
    pub async fn load_persisted(&self) -> Result<RestoreReport, PolicyManagerError> {
        let storage = self
            .storage
            .as_ref()
            .ok_or(PolicyManagerError::StorageNotConfigured)?;
        let policies = storage.load_policies().await?;

        let mut report = RestoreReport::default();
        for policy in &policies {
            match self.apply(policy) {
                Ok(_) => report.restored += 1,
                Err(e) => {
                    warn!(rule_id = policy.rule_id, error = %e, "failed to restore policy");
                    report.failed += 1;
                }
            }
        }

        metrics::gauge!(m::POLICIES_LOADED).set(report.restored as f64);
        info!(
            "restored {}/{} policies from storage",
            report.restored,
            report.total()
        );
        Ok(report)
    }

    /// 저장소를 닫습니다.
    pub async fn close(&self) -> Result<(), PolicyManagerError> {
        if let Some(storage) = &self.storage {
            storage.close().await?;
        }
        Ok(())
    }

    fn apply(&self, policy: &Policy) -> Result<Placement, PolicyManagerError> {
        self.tables.insert(policy).inspect_err(|_| {
            metrics::counter!(m::POLICY_APPLY_FAILURES_TOTAL).increment(1);
        })
    }

    async fn forget(&self, rule_id: u32) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.delete_policy(rule_id).await {
                warn!(rule_id, error = %e, "failed to delete policy from storage");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::storage::MemoryStorage;
    use microseg_dataplane::tables::{MemoryExactTable, MemoryWildcardTable};

    type Manager = PolicyManager<MemoryStorage>;

    fn tables() -> PolicyTables {
        PolicyTables::new(
            Arc::new(Mutex::new(MemoryExactTable::new())),
            Arc::new(Mutex::new(MemoryWildcardTable::new())),
        )
    }

    fn exact(rule_id: u32) -> Policy {
        Policy {
            rule_id,
            src_ip: "192.168.1.10".to_owned(),
            dst_ip: "192.168.1.20".to_owned(),
            src_port: 50000,
            dst_port: 22,
            protocol: "tcp".to_owned(),
            action: "deny".to_owned(),
            priority: 100,
        }
    }

    fn wildcard(rule_id: u32) -> Policy {
        Policy {
            rule_id,
            src_ip: "0.0.0.0/0".to_owned(),
            dst_ip: "10.0.0.0/24".to_owned(),
            src_port: 0,
            dst_port: 53,
            protocol: "udp".to_owned(),
            action: "log".to_owned(),
            priority: 10,
        }
    }

    #[tokio::test]
    async fn add_persists_after_kernel_insert() {
        let manager = Manager::with_storage(tables(), MemoryStorage::new());
        manager.add_policy(&exact(1)).await.unwrap();

        assert_eq!(manager.list_policies().unwrap(), vec![exact(1)]);
        assert!(manager.storage().unwrap().contains(1).await);
    }

    #[tokio::test]
    async fn invalid_policy_is_not_persisted() {
        let manager = Manager::with_storage(tables(), MemoryStorage::new());
        let mut bad = exact(1);
        bad.src_ip = "not-an-ip".to_owned();

        assert!(manager.add_policy(&bad).await.is_err());
        assert_eq!(manager.storage().unwrap().len().await, 0);
    }

    #[tokio::test]
    async fn storage_failure_does_not_fail_add() {
        let storage = MemoryStorage::new();
        storage.set_fail_writes(true);
        let manager = Manager::with_storage(tables(), storage);

        manager.add_policy(&exact(1)).await.unwrap();
        assert_eq!(manager.list_policies().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_policies_covers_exact_table_only() {
        let manager = Manager::new(tables());
        manager.add_policy(&exact(1)).await.unwrap();
        manager.add_policy(&wildcard(2)).await.unwrap();

        let listed = manager.list_policies().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].rule_id, 1);
        assert_eq!(manager.list_all_policies().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_policy_of_wildcard_rule_reports_success_without_removing() {
        let manager = Manager::with_storage(tables(), MemoryStorage::new());
        manager.add_policy(&wildcard(2)).await.unwrap();

        manager.delete_policy(&wildcard(2)).await.unwrap();
        assert!(manager.get_policy(2).unwrap().is_some());
        assert!(manager.storage().unwrap().contains(2).await);

        manager.remove_policy(2).await.unwrap();
        assert!(manager.get_policy(2).unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_from_storage() {
        let manager = Manager::with_storage(tables(), MemoryStorage::new());
        manager.add_policy(&exact(1)).await.unwrap();
        manager.delete_policy(&exact(1)).await.unwrap();

        assert!(manager.list_policies().unwrap().is_empty());
        assert!(!manager.storage().unwrap().contains(1).await);
    }

    #[tokio::test]
    async fn remove_unknown_rule_is_not_found() {
        let manager = Manager::new(tables());
        assert!(matches!(
            manager.remove_policy(99).await,
            Err(PolicyManagerError::NotFound(99))
        ));
    }

    #[tokio::test]
    async fn load_persisted_without_storage_fails() {
        let manager = Manager::new(tables());
        assert!(matches!(
            manager.load_persisted().await,
            Err(PolicyManagerError::StorageNotConfigured)
        ));
    }

    #[tokio::test]
    async fn load_persisted_counts_failures_and_continues() {
        let mut broken = exact(3);
        broken.action = "reject".to_owned();
        let storage = MemoryStorage::with_policies([exact(1), wildcard(2), broken]);
        let manager = Manager::with_storage(tables(), storage);

        let report = manager.load_persisted().await.unwrap();
        assert_eq!(report, RestoreReport { restored: 2, failed: 1 });
        assert_eq!(manager.list_all_policies().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn load_persisted_propagates_storage_failure() {
        let storage = MemoryStorage::new();
        storage.close().await.unwrap();
        let manager = Manager::with_storage(tables(), storage);

        assert!(matches!(
            manager.load_persisted().await,
            Err(PolicyManagerError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn list_aborts_on_iteration_failure() {
        let exact_table = Arc::new(Mutex::new(MemoryExactTable::new()));
        let manager = Manager::new(PolicyTables::new(
            exact_table.clone(),
            Arc::new(Mutex::new(MemoryWildcardTable::new())),
        ));
        manager.add_policy(&exact(1)).await.unwrap();

        exact_table.lock().unwrap().set_iteration_failure(true);
        assert!(matches!(
            manager.list_policies(),
            Err(PolicyManagerError::Table(_))
        ));
    }
}
