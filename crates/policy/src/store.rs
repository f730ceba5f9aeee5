//! 정책 테이블 저장소: 정확 일치 HashMap과 와일드카드 슬롯 배열
//!
//! [`ExactStore`]는 5-tuple 키로 upsert/삭제/순회를, [`WildcardStore`]는
//! 고정 슬롯 배열의 선형 탐색을 담당합니다. [`PolicyTables`]는 두 저장소를
//! 묶어 분류([`classify`](crate::translate::classify))에 따라 라우팅합니다.
//!
//! 와일드카드 슬롯 번호는 [`SlotIndex`]로만 노출되며 외부에서 만들 수 없습니다.

use std::fmt;

use microseg_core::types::Policy;
use microseg_dataplane::tables::{SharedExactTable, SharedWildcardTable, lock};
use microseg_ebpf_common::{ExactPolicyValue, FlowKey, WildcardPolicyEntry};
use tracing::{debug, info};

use crate::error::PolicyManagerError;
use crate::translate::{self, TableKind};

/// 와일드카드 슬롯 번호 (불투명 핸들)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotIndex(u32);

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// 정책이 저장된 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Exact(FlowKey),
    Wildcard(SlotIndex),
}

// =============================================================================
// 정확 일치 저장소
// =============================================================================

/// `POLICY_MAP` 저장소
#[derive(Clone)]
pub struct ExactStore {
    table: SharedExactTable,
}

impl ExactStore {
    pub fn new(table: SharedExactTable) -> Self {
        Self { table }
    }

    /// 키에 값을 기록합니다 (upsert).
    pub fn upsert(&self, key: FlowKey, value: ExactPolicyValue) -> Result<(), PolicyManagerError> {
        lock(&self.table)?.insert(key, value)?;
        Ok(())
    }

    /// 키를 제거합니다. 없었으면 `Ok(false)`.
    pub fn remove(&self, key: &FlowKey) -> Result<bool, PolicyManagerError> {
        Ok(lock(&self.table)?.remove(key)?)
    }

    /// 전체 엔트리를 정책으로 복원합니다. 순회 에러 시 부분 결과 없이 실패합니다.
    pub fn list(&self) -> Result<Vec<Policy>, PolicyManagerError> {
        let entries = lock(&self.table)?.entries()?;
        Ok(entries
            .iter()
            .map(|(key, value)| translate::from_exact(key, value))
            .collect())
    }

    /// 룰 ID로 엔트리를 찾습니다.
    pub fn find(
        &self,
        rule_id: u32,
    ) -> Result<Option<(FlowKey, ExactPolicyValue)>, PolicyManagerError> {
        let entries = lock(&self.table)?.entries()?;
        Ok(entries.into_iter().find(|(_, value)| value.rule_id == rule_id))
    }
}

// =============================================================================
// 와일드카드 저장소
// =============================================================================

/// `WILDCARD_POLICY_MAP` 저장소
#[derive(Clone)]
pub struct WildcardStore {
    table: SharedWildcardTable,
}

impl WildcardStore {
    pub fn new(table: SharedWildcardTable) -> Self {
        Self { table }
    }

    pub fn capacity(&self) -> Result<u32, PolicyManagerError> {
        Ok(lock(&self.table)?.capacity())
    }

    /// 엔트리를 슬롯에 기록합니다.
    ///
    /// 같은 룰 ID가 이미 있으면 그 슬롯을 덮어쓰고, 없으면 첫 번째 빈 슬롯을
    /// 사용합니다. 조회에 실패한 슬롯은 빈 슬롯으로 취급합니다. 전체 탐색은
    /// 하나의 잠금 구간에서 수행되어 동시 삽입이 같은 슬롯을 차지하지 않습니다.
    pub fn insert(&self, entry: WildcardPolicyEntry) -> Result<SlotIndex, PolicyManagerError> {
        let mut table = lock(&self.table)?;
        let capacity = table.capacity();

        let mut first_free = None;
        let mut existing = None;
        for index in 0..capacity {
            match table.get(index) {
                Ok(slot) if slot.rule_id == entry.rule_id => {
                    existing = Some(index);
                    break;
                }
                Ok(slot) if slot.is_empty() => {
                    first_free.get_or_insert(index);
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(index, error = %e, "wildcard slot lookup failed, treating as free");
                    first_free.get_or_insert(index);
                }
            }
        }

        let index = existing
            .or(first_free)
            .ok_or(PolicyManagerError::WildcardTableFull { capacity })?;
        table.set(index, entry)?;

        if existing.is_some() {
            info!(slot = index, rule_id = entry.rule_id, "wildcard policy updated");
        } else {
            info!(slot = index, rule_id = entry.rule_id, "wildcard policy added");
        }
        Ok(SlotIndex(index))
    }

    /// 룰 ID가 있는 슬롯을 찾습니다.
    pub fn find(
        &self,
        rule_id: u32,
    ) -> Result<Option<(SlotIndex, WildcardPolicyEntry)>, PolicyManagerError> {
        if rule_id == 0 {
            return Ok(None);
        }
        let table = lock(&self.table)?;
        for index in 0..table.capacity() {
            let slot = table.get(index)?;
            if slot.rule_id == rule_id {
                return Ok(Some((SlotIndex(index), slot)));
            }
        }
        Ok(None)
    }

    /// 슬롯을 비웁니다.
    pub fn clear(&self, slot: SlotIndex) -> Result<(), PolicyManagerError> {
        lock(&self.table)?.set(slot.0, WildcardPolicyEntry::zeroed())?;
        Ok(())
    }

    /// 비어 있지 않은 슬롯을 정책으로 복원합니다. 조회 에러 시 부분 결과 없이 실패합니다.
    pub fn list(&self) -> Result<Vec<Policy>, PolicyManagerError> {
        let table = lock(&self.table)?;
        let mut policies = Vec::new();
        for index in 0..table.capacity() {
            let slot = table.get(index)?;
            if !slot.is_empty() {
                policies.push(translate::from_wildcard(&slot));
            }
        }
        Ok(policies)
    }
}

// =============================================================================
// 통합 저장소
// =============================================================================

/// 두 정책 테이블의 통합 뷰
#[derive(Clone)]
pub struct PolicyTables {
    exact: ExactStore,
    wildcard: WildcardStore,
}

impl PolicyTables {
    pub fn new(exact: SharedExactTable, wildcard: SharedWildcardTable) -> Self {
        Self {
            exact: ExactStore::new(exact),
            wildcard: WildcardStore::new(wildcard),
        }
    }

    pub fn exact(&self) -> &ExactStore {
        &self.exact
    }

    pub fn wildcard(&self) -> &WildcardStore {
        &self.wildcard
    }

    /// 분류에 따라 변환 후 해당 테이블에 기록합니다.
    pub fn insert(&self, policy: &Policy) -> Result<Placement, PolicyManagerError> {
        match translate::classify(policy) {
            TableKind::Exact => {
                let (key, value) = translate::to_exact(policy)?;
                self.exact.upsert(key, value)?;
                info!(policy = %policy, "exact policy added");
                Ok(Placement::Exact(key))
            }
            TableKind::Wildcard => {
                let entry = translate::to_wildcard(policy)?;
                self.wildcard.insert(entry).map(Placement::Wildcard)
            }
        }
    }

    /// 두 테이블의 모든 정책 (정확 일치 먼저)
    pub fn list_all(&self) -> Result<Vec<Policy>, PolicyManagerError> {
        let mut policies = self.exact.list()?;
        policies.extend(self.wildcard.list()?);
        Ok(policies)
    }

    /// 룰 ID로 두 테이블에서 정책을 찾습니다.
    pub fn get(&self, rule_id: u32) -> Result<Option<Policy>, PolicyManagerError> {
        if let Some((key, value)) = self.exact.find(rule_id)? {
            return Ok(Some(translate::from_exact(&key, &value)));
        }
        Ok(self
            .wildcard
            .find(rule_id)?
            .map(|(_, entry)| translate::from_wildcard(&entry)))
    }

    /// 룰 ID로 두 테이블에서 정책을 제거합니다. 하나라도 제거했으면 `Ok(true)`.
    pub fn remove_rule(&self, rule_id: u32) -> Result<bool, PolicyManagerError> {
        let mut removed = false;
        if let Some((key, _)) = self.exact.find(rule_id)? {
            removed |= self.exact.remove(&key)?;
        }
        if let Some((slot, _)) = self.wildcard.find(rule_id)? {
            self.wildcard.clear(slot)?;
            removed = true;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use microseg_dataplane::tables::{MemoryExactTable, MemoryWildcardTable};
    use microseg_ebpf_common::MAX_ENTRIES_WILDCARD_POLICY;

    fn tables_with(wildcard: MemoryWildcardTable) -> PolicyTables {
        PolicyTables::new(
            Arc::new(Mutex::new(MemoryExactTable::new())),
            Arc::new(Mutex::new(wildcard)),
        )
    }

    fn wildcard_policy(rule_id: u32) -> Policy {
        Policy {
            rule_id,
            src_ip: "10.0.0.0/8".to_owned(),
            dst_ip: "0.0.0.0/0".to_owned(),
            src_port: 0,
            dst_port: 443,
            protocol: "tcp".to_owned(),
            action: "deny".to_owned(),
            priority: 5,
        }
    }

    fn exact_policy(rule_id: u32, dst_port: u16) -> Policy {
        Policy {
            rule_id,
            src_ip: "10.0.0.1".to_owned(),
            dst_ip: "10.0.0.2".to_owned(),
            src_port: 1234,
            dst_port,
            protocol: "tcp".to_owned(),
            action: "allow".to_owned(),
            priority: 1,
        }
    }

    #[test]
    fn wildcard_reinsert_is_idempotent() {
        let tables = tables_with(MemoryWildcardTable::new());
        let first = tables.insert(&wildcard_policy(7)).unwrap();
        let second = tables.insert(&wildcard_policy(7)).unwrap();

        assert_eq!(first, second);
        assert_eq!(tables.wildcard().list().unwrap().len(), 1);
    }

    #[test]
    fn wildcard_update_reuses_slot_even_after_earlier_gap() {
        let tables = tables_with(MemoryWildcardTable::new());
        tables.insert(&wildcard_policy(1)).unwrap();
        let slot = tables.insert(&wildcard_policy(2)).unwrap();
        tables.remove_rule(1).unwrap();

        let mut updated = wildcard_policy(2);
        updated.action = "allow".to_owned();
        assert_eq!(tables.insert(&updated).unwrap(), slot);

        let listed = tables.wildcard().list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].action, "allow");
    }

    #[test]
    fn wildcard_capacity_boundary() {
        let tables = tables_with(MemoryWildcardTable::new());
        for rule_id in 1..=MAX_ENTRIES_WILDCARD_POLICY {
            tables.insert(&wildcard_policy(rule_id)).unwrap();
        }

        let err = tables
            .insert(&wildcard_policy(MAX_ENTRIES_WILDCARD_POLICY + 1))
            .unwrap_err();
        assert!(matches!(
            err,
            PolicyManagerError::WildcardTableFull { capacity: 1000 }
        ));

        // 이미 있는 룰은 가득 찬 상태에서도 갱신 가능
        tables.insert(&wildcard_policy(500)).unwrap();
    }

    #[test]
    fn failed_slot_lookup_counts_as_free_on_insert() {
        let mut wildcard = MemoryWildcardTable::with_capacity(2);
        wildcard.fail_slot(0);
        let tables = tables_with(wildcard);

        let slot = tables.insert(&wildcard_policy(3)).unwrap();
        assert_eq!(slot, Placement::Wildcard(SlotIndex(0)));
    }

    #[test]
    fn failed_slot_lookup_aborts_listing() {
        let mut wildcard = MemoryWildcardTable::with_capacity(4);
        wildcard.fail_slot(3);
        let tables = tables_with(wildcard);
        assert!(tables.wildcard().list().is_err());
    }

    #[test]
    fn exact_insert_is_keyed_upsert() {
        let tables = tables_with(MemoryWildcardTable::new());
        tables.insert(&exact_policy(1, 80)).unwrap();
        tables.insert(&exact_policy(2, 80)).unwrap();
        tables.insert(&exact_policy(3, 443)).unwrap();

        let listed = tables.exact().list().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|p| p.rule_id == 2));
        assert!(!listed.iter().any(|p| p.rule_id == 1));
    }

    #[test]
    fn get_and_remove_span_both_tables() {
        let tables = tables_with(MemoryWildcardTable::new());
        tables.insert(&exact_policy(10, 80)).unwrap();
        tables.insert(&wildcard_policy(20)).unwrap();

        assert_eq!(tables.get(10).unwrap().unwrap().dst_port, 80);
        assert_eq!(tables.get(20).unwrap().unwrap().src_ip, "10.0.0.0/8");
        assert!(tables.get(30).unwrap().is_none());
        assert_eq!(tables.list_all().unwrap().len(), 2);

        assert!(tables.remove_rule(20).unwrap());
        assert!(tables.remove_rule(10).unwrap());
        assert!(!tables.remove_rule(10).unwrap());
        assert!(tables.list_all().unwrap().is_empty());
    }

    #[test]
    fn invalid_policy_touches_no_table() {
        let tables = tables_with(MemoryWildcardTable::new());
        let mut bad = wildcard_policy(1);
        bad.protocol = "gre".to_owned();

        assert!(tables.insert(&bad).is_err());
        assert!(tables.list_all().unwrap().is_empty());
    }
}
