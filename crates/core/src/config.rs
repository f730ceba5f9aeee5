//! 설정 관리: microseg.toml 파싱 및 런타임 설정
//!
//! [`MicrosegConfig`]는 에이전트 전체 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`MICROSEG_DATAPLANE_INTERFACE=eth0` 형식)
//! 3. 설정 파일 (`microseg.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), microseg_core::error::MicrosegError> {
//! use microseg_core::config::MicrosegConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = MicrosegConfig::load("microseg.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = MicrosegConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, MicrosegError};

/// microseg 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MicrosegConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 데이터 평면 설정
    #[serde(default)]
    pub dataplane: DataplaneConfig,
    /// 정책 영속화 설정
    #[serde(default)]
    pub storage: StorageConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl MicrosegConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, MicrosegError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, MicrosegError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MicrosegError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                MicrosegError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, MicrosegError> {
        toml::from_str(toml_str).map_err(|e| {
            MicrosegError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `MICROSEG_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "MICROSEG_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "MICROSEG_GENERAL_LOG_FORMAT");

        // Dataplane
        override_string(
            &mut self.dataplane.interface,
            "MICROSEG_DATAPLANE_INTERFACE",
        );
        override_string(
            &mut self.dataplane.program_path,
            "MICROSEG_DATAPLANE_PROGRAM_PATH",
        );
        override_u64(
            &mut self.dataplane.stats_interval_secs,
            "MICROSEG_DATAPLANE_STATS_INTERVAL_SECS",
        );
        override_bool(
            &mut self.dataplane.install_default_policy,
            "MICROSEG_DATAPLANE_INSTALL_DEFAULT_POLICY",
        );

        // Storage
        override_bool(&mut self.storage.enabled, "MICROSEG_STORAGE_ENABLED");
        override_string(&mut self.storage.path, "MICROSEG_STORAGE_PATH");

        // Metrics
        override_bool(&mut self.metrics.enabled, "MICROSEG_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "MICROSEG_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "MICROSEG_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), MicrosegError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.dataplane.interface.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "dataplane.interface".to_owned(),
                reason: "interface must not be empty".to_owned(),
            }
            .into());
        }

        if self.dataplane.program_path.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "dataplane.program_path".to_owned(),
                reason: "program path must not be empty".to_owned(),
            }
            .into());
        }

        if self.dataplane.stats_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "dataplane.stats_interval_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        if self.storage.enabled && self.storage.path.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage.path".to_owned(),
                reason: "path must not be empty when storage is enabled".to_owned(),
            }
            .into());
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "metrics.port".to_owned(),
                reason: "port must not be 0 when metrics are enabled".to_owned(),
            }
            .into());
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// 데이터 평면 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataplaneConfig {
    /// TC 분류기를 붙일 네트워크 인터페이스
    pub interface: String,
    /// 컴파일된 eBPF 오브젝트 경로
    pub program_path: String,
    /// 통계 출력 주기 (초)
    pub stats_interval_secs: u64,
    /// 시작 시 기본 allow-all 와일드카드 정책(rule 1) 설치 여부
    pub install_default_policy: bool,
}

impl Default for DataplaneConfig {
    fn default() -> Self {
        Self {
            interface: "lo".to_owned(),
            program_path: "target/bpfel-unknown-none/release/microseg-ebpf".to_owned(),
            stats_interval_secs: 5,
            install_default_policy: true,
        }
    }
}

/// 정책 영속화 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 정책 파일 경로 (TOML)
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/var/lib/microseg/policies.toml".to_owned(),
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_has_sane_values() {
        let config = MicrosegConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.dataplane.interface, "lo");
        assert_eq!(config.dataplane.stats_interval_secs, 5);
        assert!(config.dataplane.install_default_policy);
        assert!(!config.storage.enabled);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn default_config_passes_validation() {
        MicrosegConfig::default().validate().unwrap();
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = MicrosegConfig::parse("").unwrap();
        assert_eq!(config.general.log_format, "pretty");
        assert_eq!(config.metrics.port, 9100);
    }

    #[test]
    fn partial_toml_merges_with_defaults() {
        let toml = r#"
[dataplane]
interface = "veth-a"

[storage]
enabled = true
"#;
        let config = MicrosegConfig::parse(toml).unwrap();
        assert_eq!(config.dataplane.interface, "veth-a");
        assert_eq!(config.dataplane.stats_interval_secs, 5);
        assert!(config.storage.enabled);
        assert_eq!(config.storage.path, "/var/lib/microseg/policies.toml");
    }

    #[test]
    fn invalid_toml_returns_parse_failed() {
        let err = MicrosegConfig::parse("dataplane = [[[").unwrap_err();
        assert!(matches!(
            err,
            MicrosegError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = MicrosegConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_empty_interface() {
        let mut config = MicrosegConfig::default();
        config.dataplane.interface = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dataplane.interface"));
    }

    #[test]
    fn validate_rejects_zero_stats_interval() {
        let mut config = MicrosegConfig::default();
        config.dataplane.stats_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_storage_path_only_when_enabled() {
        let mut config = MicrosegConfig::default();
        config.storage.path = String::new();
        config.validate().unwrap();

        config.storage.enabled = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("storage.path"));
    }

    #[test]
    fn validate_rejects_zero_metrics_port_when_enabled() {
        let mut config = MicrosegConfig::default();
        config.metrics.enabled = true;
        config.metrics.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn env_overrides_apply_per_section() {
        // SAFETY: serial 테스트로 환경변수 조작이 다른 테스트와 겹치지 않습니다.
        unsafe {
            std::env::set_var("MICROSEG_DATAPLANE_INTERFACE", "eth9");
            std::env::set_var("MICROSEG_METRICS_PORT", "9200");
            std::env::set_var("MICROSEG_STORAGE_ENABLED", "true");
        }
        let mut config = MicrosegConfig::default();
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("MICROSEG_DATAPLANE_INTERFACE");
            std::env::remove_var("MICROSEG_METRICS_PORT");
            std::env::remove_var("MICROSEG_STORAGE_ENABLED");
        }
        assert_eq!(config.dataplane.interface, "eth9");
        assert_eq!(config.metrics.port, 9200);
        assert!(config.storage.enabled);
    }

    #[test]
    #[serial]
    fn env_override_invalid_number_keeps_original() {
        // SAFETY: serial 테스트로 환경변수 조작이 다른 테스트와 겹치지 않습니다.
        unsafe { std::env::set_var("TEST_MICROSEG_U64_BAD", "five") };
        let mut val = 5u64;
        override_u64(&mut val, "TEST_MICROSEG_U64_BAD");
        unsafe { std::env::remove_var("TEST_MICROSEG_U64_BAD") };
        assert_eq!(val, 5);
    }

    #[test]
    fn env_override_missing_var_keeps_original() {
        let mut val = "original".to_owned();
        override_string(&mut val, "TEST_MICROSEG_NONEXISTENT_12345");
        assert_eq!(val, "original");
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = MicrosegConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = MicrosegConfig::parse(&toml_str).unwrap();
        assert_eq!(config.dataplane.program_path, parsed.dataplane.program_path);
        assert_eq!(config.storage.path, parsed.storage.path);
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = MicrosegConfig::from_file("/nonexistent/path/microseg.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MicrosegError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
