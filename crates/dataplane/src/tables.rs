//! 커널 테이블 추상화: 정책/세션/통계 맵 접근 trait
//!
//! 커널 맵은 aya 핸들([`crate::kernel`])로, 테스트와 dry-run 모드는
//! 메모리 구현으로 같은 trait을 구현합니다.
//!
//! ```text
//!                 ┌───────────────────────┐
//!  PolicyManager ─▶ ExactPolicyTable      │── POLICY_MAP (HashMap)
//!                 │ WildcardPolicyTable   │── WILDCARD_POLICY_MAP (Array)
//!  StatsReader ───▶ StatsTable            │── STATS_MAP (PerCpuArray)
//!  DataPlane ─────▶ SessionTable          │── SESSION_MAP (LruHashMap)
//!                 └───────────────────────┘
//! ```
//!
//! aya 맵 API가 `&mut self`를 요구하므로 핸들은 `Arc<Mutex<dyn ..>>`로 공유합니다.
//! 잠금 구간은 단일 시스템 콜 수준으로 짧게 유지해야 합니다.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use microseg_core::error::DataplaneError;
use microseg_ebpf_common::{
    ExactPolicyValue, FlowKey, MAX_ENTRIES_POLICY, MAX_ENTRIES_WILDCARD_POLICY, SessionValue,
    STATS_MAX, WildcardPolicyEntry,
};

/// 정확 일치 정책 테이블 (5-tuple 키)
pub trait ExactPolicyTable: Send {
    /// 키에 값을 기록합니다 (upsert).
    fn insert(&mut self, key: FlowKey, value: ExactPolicyValue) -> Result<(), DataplaneError>;

    /// 키를 제거합니다. 키가 없었으면 `Ok(false)`.
    fn remove(&mut self, key: &FlowKey) -> Result<bool, DataplaneError>;

    /// 키로 조회합니다.
    fn get(&self, key: &FlowKey) -> Result<Option<ExactPolicyValue>, DataplaneError>;

    /// 전체 엔트리를 순회합니다. 순회 중 에러가 나면 부분 결과 없이 실패합니다.
    fn entries(&self) -> Result<Vec<(FlowKey, ExactPolicyValue)>, DataplaneError>;
}

/// 와일드카드 정책 테이블 (고정 슬롯 배열)
pub trait WildcardPolicyTable: Send {
    /// 슬롯 수
    fn capacity(&self) -> u32;

    /// 슬롯을 읽습니다.
    fn get(&self, index: u32) -> Result<WildcardPolicyEntry, DataplaneError>;

    /// 슬롯을 기록합니다.
    fn set(&mut self, index: u32, entry: WildcardPolicyEntry) -> Result<(), DataplaneError>;
}

/// per-CPU 통계 카운터 테이블
pub trait StatsTable: Send {
    /// 인덱스의 CPU별 값을 읽습니다.
    fn per_cpu(&self, index: u32) -> Result<Vec<u64>, DataplaneError>;
}

/// 세션 테이블 (읽기 전용)
pub trait SessionTable: Send {
    /// 전체 세션을 순회합니다.
    fn entries(&self) -> Result<Vec<(FlowKey, SessionValue)>, DataplaneError>;
}

pub type SharedExactTable = Arc<Mutex<dyn ExactPolicyTable>>;
pub type SharedWildcardTable = Arc<Mutex<dyn WildcardPolicyTable>>;
pub type SharedStatsTable = Arc<Mutex<dyn StatsTable>>;
pub type SharedSessionTable = Arc<Mutex<dyn SessionTable>>;

/// 로드된 프로그램의 네 가지 테이블 핸들
#[derive(Clone)]
pub struct KernelTables {
    pub exact: SharedExactTable,
    pub wildcard: SharedWildcardTable,
    pub stats: SharedStatsTable,
    pub sessions: SharedSessionTable,
}

/// 공유 핸들을 잠급니다. 오염된 잠금은 맵 에러로 변환합니다.
pub fn lock<T: ?Sized>(handle: &Mutex<T>) -> Result<MutexGuard<'_, T>, DataplaneError> {
    handle
        .lock()
        .map_err(|_| DataplaneError::Map("table lock poisoned".to_owned()))
}

// =============================================================================
// 메모리 구현
// =============================================================================

/// 메모리 기반 정확 일치 테이블
///
/// 커널 HashMap과 같이 용량 초과 시 새 키 삽입이 실패합니다.
#[derive(Debug)]
pub struct MemoryExactTable {
    entries: HashMap<FlowKey, ExactPolicyValue>,
    capacity: usize,
    fail_iteration: bool,
}

impl MemoryExactTable {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ENTRIES_POLICY as usize)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            fail_iteration: false,
        }
    }

    /// 이후 `entries()` 호출이 실패하도록 설정합니다.
    pub fn set_iteration_failure(&mut self, fail: bool) {
        self.fail_iteration = fail;
    }

    /// 커널이 적중 카운트를 올린 것처럼 기록합니다.
    pub fn bump_hit_count(&mut self, key: &FlowKey, by: u64) {
        if let Some(value) = self.entries.get_mut(key) {
            value.hit_count = value.hit_count.saturating_add(by);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryExactTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ExactPolicyTable for MemoryExactTable {
    fn insert(&mut self, key: FlowKey, value: ExactPolicyValue) -> Result<(), DataplaneError> {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            return Err(DataplaneError::Map(format!(
                "policy map full ({} entries)",
                self.capacity
            )));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &FlowKey) -> Result<bool, DataplaneError> {
        Ok(self.entries.remove(key).is_some())
    }

    fn get(&self, key: &FlowKey) -> Result<Option<ExactPolicyValue>, DataplaneError> {
        Ok(self.entries.get(key).copied())
    }

    fn entries(&self) -> Result<Vec<(FlowKey, ExactPolicyValue)>, DataplaneError> {
        if self.fail_iteration {
            return Err(DataplaneError::Map("policy map iteration failed".to_owned()));
        }
        Ok(self.entries.iter().map(|(k, v)| (*k, *v)).collect())
    }
}

/// 메모리 기반 와일드카드 슬롯 배열
#[derive(Debug)]
pub struct MemoryWildcardTable {
    slots: Vec<WildcardPolicyEntry>,
    failing_slots: HashSet<u32>,
}

impl MemoryWildcardTable {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ENTRIES_WILDCARD_POLICY)
    }

    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            slots: vec![WildcardPolicyEntry::zeroed(); capacity as usize],
            failing_slots: HashSet::new(),
        }
    }

    /// 해당 슬롯 조회가 실패하도록 설정합니다.
    pub fn fail_slot(&mut self, index: u32) {
        self.failing_slots.insert(index);
    }

    /// 비어 있지 않은 슬롯 수
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_empty()).count()
    }
}

impl Default for MemoryWildcardTable {
    fn default() -> Self {
        Self::new()
    }
}

impl WildcardPolicyTable for MemoryWildcardTable {
    fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    fn get(&self, index: u32) -> Result<WildcardPolicyEntry, DataplaneError> {
        if self.failing_slots.contains(&index) {
            return Err(DataplaneError::Map(format!("wildcard slot {index} lookup failed")));
        }
        self.slots
            .get(index as usize)
            .copied()
            .ok_or_else(|| DataplaneError::Map(format!("wildcard slot {index} out of bounds")))
    }

    fn set(&mut self, index: u32, entry: WildcardPolicyEntry) -> Result<(), DataplaneError> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or_else(|| DataplaneError::Map(format!("wildcard slot {index} out of bounds")))?;
        *slot = entry;
        Ok(())
    }
}

/// 메모리 기반 per-CPU 카운터
#[derive(Debug)]
pub struct MemoryStatsTable {
    values: Vec<Vec<u64>>,
    missing: HashSet<u32>,
}

impl MemoryStatsTable {
    /// `cpus`개 CPU, 모든 카운터 0으로 생성합니다.
    pub fn new(cpus: usize) -> Self {
        Self {
            values: vec![vec![0; cpus]; STATS_MAX as usize],
            missing: HashSet::new(),
        }
    }

    /// 인덱스의 CPU별 값을 설정합니다.
    pub fn set(&mut self, index: u32, per_cpu: Vec<u64>) {
        if let Some(slot) = self.values.get_mut(index as usize) {
            *slot = per_cpu;
        }
    }

    /// 해당 인덱스 조회가 실패하도록 설정합니다.
    pub fn mark_missing(&mut self, index: u32) {
        self.missing.insert(index);
    }
}

impl StatsTable for MemoryStatsTable {
    fn per_cpu(&self, index: u32) -> Result<Vec<u64>, DataplaneError> {
        if self.missing.contains(&index) {
            return Err(DataplaneError::Map(format!("stats index {index} not found")));
        }
        self.values
            .get(index as usize)
            .cloned()
            .ok_or_else(|| DataplaneError::Map(format!("stats index {index} out of bounds")))
    }
}

/// 메모리 기반 세션 테이블
#[derive(Debug, Default)]
pub struct MemorySessionTable {
    entries: HashMap<FlowKey, SessionValue>,
}

impl MemorySessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 커널이 세션을 만든 것처럼 기록합니다.
    pub fn insert(&mut self, key: FlowKey, value: SessionValue) {
        self.entries.insert(key, value);
    }
}

impl SessionTable for MemorySessionTable {
    fn entries(&self) -> Result<Vec<(FlowKey, SessionValue)>, DataplaneError> {
        Ok(self.entries.iter().map(|(k, v)| (*k, *v)).collect())
    }
}
