//! 정책 영속화: 재시작 시 커널 테이블을 복원하기 위한 저장소
//!
//! [`Storage`] trait은 저장소 구현을 추상화합니다.
//!
//! # 구현
//! - [`MemoryStorage`]: 프로세스 메모리 (테스트, 영속화 비활성)
//! - [`TomlFileStorage`]: `[[policies]]` 배열을 담은 TOML 파일
//!
//! # 파일 형식
//! ```toml
//! [[policies]]
//! rule_id = 10
//! src_ip = "10.0.0.0/8"
//! dst_ip = "0.0.0.0/0"
//! dst_port = 443
//! protocol = "tcp"
//! action = "deny"
//! priority = 100
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use microseg_core::error::StorageError;
use microseg_core::types::Policy;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// 정책 영속 저장소
///
/// 모든 메서드는 `Send` future를 반환하므로 tokio 태스크 간에 공유할 수 있습니다.
pub trait Storage: Send + Sync + 'static {
    /// 정책을 저장합니다. 같은 룰 ID가 있으면 덮어씁니다.
    fn save_policy(&self, policy: &Policy) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// 룰 ID로 정책을 삭제합니다. 없으면 [`StorageError::NotFound`].
    fn delete_policy(&self, rule_id: u32) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// 저장된 모든 정책을 우선순위 내림차순, 룰 ID 오름차순으로 반환합니다.
    fn load_policies(&self) -> impl Future<Output = Result<Vec<Policy>, StorageError>> + Send;

    /// 저장소를 닫습니다. 이후 호출은 [`StorageError::Closed`]를 반환합니다.
    fn close(&self) -> impl Future<Output = Result<(), StorageError>> + Send;
}

fn sorted(policies: impl IntoIterator<Item = Policy>) -> Vec<Policy> {
    let mut policies: Vec<Policy> = policies.into_iter().collect();
    policies.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.rule_id.cmp(&b.rule_id))
    });
    policies
}

// =============================================================================
// 메모리 저장소
// =============================================================================

/// 메모리 기반 저장소
#[derive(Debug, Default)]
pub struct MemoryStorage {
    policies: Mutex<BTreeMap<u32, Policy>>,
    closed: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 정책으로 초기화합니다.
    pub fn with_policies(policies: impl IntoIterator<Item = Policy>) -> Self {
        Self {
            policies: Mutex::new(policies.into_iter().map(|p| (p.rule_id, p)).collect()),
            ..Self::default()
        }
    }

    /// 이후 저장/삭제가 I/O 에러로 실패하도록 설정합니다.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.policies.lock().await.len()
    }

    pub async fn contains(&self, rule_id: u32) -> bool {
        self.policies.lock().await.contains_key(&rule_id)
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io("injected write failure".to_owned()));
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    async fn save_policy(&self, policy: &Policy) -> Result<(), StorageError> {
        self.check_writable()?;
        self.policies
            .lock()
            .await
            .insert(policy.rule_id, policy.clone());
        Ok(())
    }

    async fn delete_policy(&self, rule_id: u32) -> Result<(), StorageError> {
        self.check_writable()?;
        self.policies
            .lock()
            .await
            .remove(&rule_id)
            .map(|_| ())
            .ok_or(StorageError::NotFound(rule_id))
    }

    async fn load_policies(&self) -> Result<Vec<Policy>, StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(sorted(self.policies.lock().await.values().cloned()))
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// TOML 파일 저장소
// =============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct PolicyDocument {
    #[serde(default)]
    policies: Vec<Policy>,
}

/// TOML 파일 저장소
///
/// 열 때 파일 전체를 읽어 캐시하고, 변경마다 임시 파일에 쓴 뒤 rename으로
/// 교체합니다. 쓰기 도중 중단되어도 이전 내용이 남습니다.
#[derive(Debug)]
pub struct TomlFileStorage {
    path: PathBuf,
    // None = 닫힘
    policies: Mutex<Option<BTreeMap<u32, Policy>>>,
}

impl TomlFileStorage {
    /// 파일을 열어 정책을 읽습니다. 파일이 없으면 빈 저장소로 시작합니다.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let policies = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let doc: PolicyDocument = toml::from_str(&content).map_err(|e| {
                    StorageError::Serialization(format!("{}: {e}", path.display()))
                })?;
                doc.policies.into_iter().map(|p| (p.rule_id, p)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "policy file not found, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(StorageError::Io(format!("{}: {e}", path.display()))),
        };

        info!(path = %path.display(), count = policies.len(), "policy storage opened");
        Ok(Self {
            path,
            policies: Mutex::new(Some(policies)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, policies: &BTreeMap<u32, Policy>) -> Result<(), StorageError> {
        let doc = PolicyDocument {
            policies: sorted(policies.values().cloned()),
        };
        let content =
            toml::to_string_pretty(&doc).map_err(|e| StorageError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StorageError::Io(format!("{}: {e}", parent.display())))?;
            }
        }

        let tmp = self.path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| StorageError::Io(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StorageError::Io(format!("{}: {e}", self.path.display())))
    }
}

impl Storage for TomlFileStorage {
    async fn save_policy(&self, policy: &Policy) -> Result<(), StorageError> {
        let mut guard = self.policies.lock().await;
        let policies = guard.as_mut().ok_or(StorageError::Closed)?;

        let previous = policies.insert(policy.rule_id, policy.clone());
        if let Err(e) = self.persist(policies).await {
            // 파일과 캐시가 어긋나지 않도록 되돌림
            match previous {
                Some(old) => policies.insert(old.rule_id, old),
                None => policies.remove(&policy.rule_id),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn delete_policy(&self, rule_id: u32) -> Result<(), StorageError> {
        let mut guard = self.policies.lock().await;
        let policies = guard.as_mut().ok_or(StorageError::Closed)?;

        let removed = policies
            .remove(&rule_id)
            .ok_or(StorageError::NotFound(rule_id))?;
        if let Err(e) = self.persist(policies).await {
            policies.insert(rule_id, removed);
            return Err(e);
        }
        Ok(())
    }

    async fn load_policies(&self) -> Result<Vec<Policy>, StorageError> {
        let guard = self.policies.lock().await;
        let policies = guard.as_ref().ok_or(StorageError::Closed)?;
        Ok(sorted(policies.values().cloned()))
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.policies.lock().await.take();
        Ok(())
    }
}
