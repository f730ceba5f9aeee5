//! aya 기반 커널 백엔드 (Linux 전용)
//!
//! eBPF 오브젝트 파일을 로드하고 `tc_microsegment_filter` 분류기를 ingress에
//! 어태치합니다. 커널 맵은 `take_map`으로 소유권을 가져와 [`crate::tables`]의
//! trait 구현으로 감쌉니다.

use std::ffi::CString;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use aya::Ebpf;
use aya::maps::{Array, HashMap, Map, MapData, MapError, PerCpuArray, RingBuf};
use aya::programs::links::LinkOrder;
use aya::programs::tc::{self, NlOptions, SchedClassifierLinkId, TcAttachOptions};
use aya::programs::{SchedClassifier, TcAttachType};
use microseg_core::error::DataplaneError;
use microseg_ebpf_common::{
    ExactPolicyValue, FLOW_EVENTS, FlowKey, POLICY_MAP, PROGRAM_NAME, SESSION_MAP, STATS_MAP,
    SessionValue, WILDCARD_POLICY_MAP, WildcardPolicyEntry,
};
use tracing::{debug, info, warn};

use crate::attach::TcBackend;
use crate::flow::RingBufStream;
use crate::tables::{
    ExactPolicyTable, KernelTables, SessionTable, StatsTable, WildcardPolicyTable,
};

/// 레거시 netlink 분류기 우선순위/핸들
const NETLINK_PRIORITY: u16 = 1;
const NETLINK_HANDLE: u32 = 1;

/// 실제 커널에 대한 [`TcBackend`]
pub struct AyaBackend {
    program_path: PathBuf,
    ebpf: Option<Ebpf>,
    link: Option<SchedClassifierLinkId>,
}

impl AyaBackend {
    pub fn new(program_path: impl Into<PathBuf>) -> Self {
        Self {
            program_path: program_path.into(),
            ebpf: None,
            link: None,
        }
    }

    fn ebpf_mut(&mut self) -> Result<&mut Ebpf, DataplaneError> {
        self.ebpf
            .as_mut()
            .ok_or_else(|| DataplaneError::ProgramLoadFailed("program not loaded".to_owned()))
    }

    fn classifier(&mut self) -> Result<&mut SchedClassifier, DataplaneError> {
        self.ebpf_mut()?
            .program_mut(PROGRAM_NAME)
            .ok_or_else(|| {
                DataplaneError::ProgramLoadFailed(format!("program {PROGRAM_NAME} not found"))
            })?
            .try_into()
            .map_err(|e| {
                DataplaneError::ProgramLoadFailed(format!("{PROGRAM_NAME} has wrong type: {e}"))
            })
    }

    fn take_map(&mut self, name: &str) -> Result<Map, DataplaneError> {
        self.ebpf_mut()?
            .take_map(name)
            .ok_or_else(|| DataplaneError::Map(format!("map {name} not found")))
    }

    fn attach(
        &mut self,
        interface: &str,
        options: TcAttachOptions,
    ) -> Result<(), DataplaneError> {
        let link = self
            .classifier()?
            .attach_with_options(interface, TcAttachType::Ingress, options)
            .map_err(|e| DataplaneError::AttachFailed {
                interface: interface.to_owned(),
                reason: e.to_string(),
            })?;
        self.link = Some(link);
        Ok(())
    }
}

fn attach_error(interface: &str, step: &str, e: impl std::fmt::Display) -> DataplaneError {
    DataplaneError::AttachFailed {
        interface: interface.to_owned(),
        reason: format!("{step}: {e}"),
    }
}

fn map_error(name: &str, e: impl std::fmt::Display) -> DataplaneError {
    DataplaneError::Map(format!("{name}: {e}"))
}

impl TcBackend for AyaBackend {
    type Stream = RingBufStream;

    fn resolve_interface(&self, interface: &str) -> Result<u32, DataplaneError> {
        let name = CString::new(interface)
            .map_err(|_| DataplaneError::InterfaceNotFound(interface.to_owned()))?;
        // SAFETY: name은 NUL 종료된 유효한 C 문자열이며 호출 동안 살아 있습니다.
        let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
        if index == 0 {
            return Err(DataplaneError::InterfaceNotFound(interface.to_owned()));
        }
        Ok(index)
    }

    fn load_program(&mut self) -> Result<(), DataplaneError> {
        let mut ebpf = Ebpf::load_file(&self.program_path).map_err(|e| {
            DataplaneError::ProgramLoadFailed(format!("{}: {e}", self.program_path.display()))
        })?;

        if let Err(e) = aya_log::EbpfLogger::init(&mut ebpf) {
            // 커널 프로그램에 로그 호출이 없으면 실패하므로 무시
            debug!(error = %e, "eBPF logger not initialised");
        }

        self.ebpf = Some(ebpf);
        self.classifier()?
            .load()
            .map_err(|e| DataplaneError::ProgramLoadFailed(e.to_string()))?;
        info!(path = %self.program_path.display(), "classifier program loaded");
        Ok(())
    }

    fn attach_tcx(&mut self, interface: &str) -> Result<(), DataplaneError> {
        self.attach(interface, TcAttachOptions::TcxOrder(LinkOrder::default()))
    }

    fn ensure_clsact(&mut self, interface: &str) -> Result<(), DataplaneError> {
        match tc::qdisc_add_clsact(interface) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(interface, "clsact qdisc already present");
                Ok(())
            }
            Err(e) => Err(attach_error(interface, "clsact", e)),
        }
    }

    fn remove_stale_filter(&mut self, interface: &str) -> Result<(), DataplaneError> {
        match tc::qdisc_detach_program(interface, TcAttachType::Ingress, PROGRAM_NAME) {
            Ok(()) => {
                warn!(interface, "removed stale classifier filter");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(attach_error(interface, "stale filter removal", e)),
        }
    }

    fn attach_netlink(&mut self, interface: &str) -> Result<(), DataplaneError> {
        self.attach(
            interface,
            TcAttachOptions::Netlink(NlOptions {
                priority: NETLINK_PRIORITY,
                handle: NETLINK_HANDLE,
            }),
        )
    }

    fn open_event_stream(&mut self) -> Result<RingBufStream, DataplaneError> {
        let map = self
            .take_map(FLOW_EVENTS)
            .map_err(|e| DataplaneError::EventStreamOpenFailed(e.to_string()))?;
        let ring_buf = RingBuf::try_from(map)
            .map_err(|e| DataplaneError::EventStreamOpenFailed(format!("{FLOW_EVENTS}: {e}")))?;
        RingBufStream::new(ring_buf)
    }

    fn tables(&mut self) -> Result<KernelTables, DataplaneError> {
        let exact = HashMap::try_from(self.take_map(POLICY_MAP)?)
            .map_err(|e| map_error(POLICY_MAP, e))?;
        let wildcard = Array::try_from(self.take_map(WILDCARD_POLICY_MAP)?)
            .map_err(|e| map_error(WILDCARD_POLICY_MAP, e))?;
        let stats = PerCpuArray::try_from(self.take_map(STATS_MAP)?)
            .map_err(|e| map_error(STATS_MAP, e))?;
        let sessions = HashMap::try_from(self.take_map(SESSION_MAP)?)
            .map_err(|e| map_error(SESSION_MAP, e))?;

        Ok(KernelTables {
            exact: Arc::new(Mutex::new(AyaExactTable { map: exact })),
            wildcard: Arc::new(Mutex::new(AyaWildcardTable { map: wildcard })),
            stats: Arc::new(Mutex::new(AyaStatsTable { map: stats })),
            sessions: Arc::new(Mutex::new(AyaSessionTable { map: sessions })),
        })
    }

    fn detach(&mut self) -> Result<(), DataplaneError> {
        let Some(link) = self.link.take() else {
            return Ok(());
        };
        self.classifier()?
            .detach(link)
            .map_err(|e| DataplaneError::Map(format!("detach {PROGRAM_NAME}: {e}")))
    }

    fn unload_program(&mut self) -> Result<(), DataplaneError> {
        if self.ebpf.is_none() {
            return Ok(());
        }
        let result = self
            .classifier()
            .and_then(|program| {
                program
                    .unload()
                    .map_err(|e| DataplaneError::Map(format!("unload {PROGRAM_NAME}: {e}")))
            });
        self.ebpf = None;
        result
    }
}

// =============================================================================
// 테이블 구현
// =============================================================================

/// `POLICY_MAP` (HashMap)
pub struct AyaExactTable {
    map: HashMap<MapData, FlowKey, ExactPolicyValue>,
}

impl ExactPolicyTable for AyaExactTable {
    fn insert(&mut self, key: FlowKey, value: ExactPolicyValue) -> Result<(), DataplaneError> {
        self.map
            .insert(key, value, 0)
            .map_err(|e| map_error(POLICY_MAP, e))
    }

    fn remove(&mut self, key: &FlowKey) -> Result<bool, DataplaneError> {
        // 삭제 syscall은 ENOENT를 구분하지 않으므로 먼저 조회
        if self.get(key)?.is_none() {
            return Ok(false);
        }
        self.map.remove(key).map_err(|e| map_error(POLICY_MAP, e))?;
        Ok(true)
    }

    fn get(&self, key: &FlowKey) -> Result<Option<ExactPolicyValue>, DataplaneError> {
        match self.map.get(key, 0) {
            Ok(value) => Ok(Some(value)),
            Err(MapError::KeyNotFound) => Ok(None),
            Err(e) => Err(map_error(POLICY_MAP, e)),
        }
    }

    fn entries(&self) -> Result<Vec<(FlowKey, ExactPolicyValue)>, DataplaneError> {
        self.map
            .iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_error(POLICY_MAP, e))
    }
}

/// `WILDCARD_POLICY_MAP` (Array)
pub struct AyaWildcardTable {
    map: Array<MapData, WildcardPolicyEntry>,
}

impl WildcardPolicyTable for AyaWildcardTable {
    fn capacity(&self) -> u32 {
        self.map.len()
    }

    fn get(&self, index: u32) -> Result<WildcardPolicyEntry, DataplaneError> {
        self.map
            .get(&index, 0)
            .map_err(|e| map_error(WILDCARD_POLICY_MAP, e))
    }

    fn set(&mut self, index: u32, entry: WildcardPolicyEntry) -> Result<(), DataplaneError> {
        self.map
            .set(index, entry, 0)
            .map_err(|e| map_error(WILDCARD_POLICY_MAP, e))
    }
}

/// `STATS_MAP` (PerCpuArray)
pub struct AyaStatsTable {
    map: PerCpuArray<MapData, u64>,
}

impl StatsTable for AyaStatsTable {
    fn per_cpu(&self, index: u32) -> Result<Vec<u64>, DataplaneError> {
        let values = self
            .map
            .get(&index, 0)
            .map_err(|e| map_error(STATS_MAP, e))?;
        Ok(values.iter().copied().collect())
    }
}

/// `SESSION_MAP` (LruHashMap)
pub struct AyaSessionTable {
    map: HashMap<MapData, FlowKey, SessionValue>,
}

impl SessionTable for AyaSessionTable {
    fn entries(&self) -> Result<Vec<(FlowKey, SessionValue)>, DataplaneError> {
        self.map
            .iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_error(SESSION_MAP, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_resolves() {
        let backend = AyaBackend::new("/nonexistent");
        assert!(backend.resolve_interface("lo").unwrap() > 0);
    }

    #[test]
    fn unknown_interface_is_not_found() {
        let backend = AyaBackend::new("/nonexistent");
        assert!(matches!(
            backend.resolve_interface("microseg-nope0"),
            Err(DataplaneError::InterfaceNotFound(_))
        ));
        assert!(backend.resolve_interface("bad\0name").is_err());
    }

    #[test]
    fn missing_object_file_fails_load() {
        let mut backend = AyaBackend::new("/nonexistent/microseg-ebpf");
        assert!(matches!(
            backend.load_program(),
            Err(DataplaneError::ProgramLoadFailed(_))
        ));
    }

    #[test]
    fn teardown_before_load_is_noop() {
        let mut backend = AyaBackend::new("/nonexistent");
        backend.detach().unwrap();
        backend.unload_program().unwrap();
    }
}
