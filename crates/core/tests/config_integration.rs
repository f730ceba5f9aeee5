//! microseg.toml 통합 설정 테스트
//!
//! - microseg.toml.example 파싱 테스트
//! - 부분 설정 로딩 테스트
//! - 환경변수 우선순위 테스트
//! - 빈 파일 / 잘못된 형식 에러 테스트

use microseg_core::config::MicrosegConfig;
use microseg_core::error::{ConfigError, MicrosegError};
use serial_test::serial;

// =============================================================================
// microseg.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_successfully() {
    let content = include_str!("../../../microseg.toml.example");
    let config = MicrosegConfig::parse(content).expect("example config should parse");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.log_format, "pretty");
    assert_eq!(config.dataplane.interface, "lo");
    assert_eq!(config.dataplane.stats_interval_secs, 5);
    assert!(config.dataplane.install_default_policy);
}

#[test]
fn example_config_passes_validation() {
    let content = include_str!("../../../microseg.toml.example");
    let config = MicrosegConfig::parse(content).expect("should parse");
    config
        .validate()
        .expect("example config should pass validation");
}

#[test]
fn example_config_matches_defaults() {
    let content = include_str!("../../../microseg.toml.example");
    let parsed = MicrosegConfig::parse(content).expect("should parse");
    let defaults = MicrosegConfig::default();

    assert_eq!(parsed.dataplane.program_path, defaults.dataplane.program_path);
    assert_eq!(parsed.storage.path, defaults.storage.path);
    assert_eq!(parsed.metrics.listen_addr, defaults.metrics.listen_addr);
    assert_eq!(parsed.metrics.port, defaults.metrics.port);
}

// =============================================================================
// 파일 로딩 + 환경변수 우선순위
// =============================================================================

#[tokio::test]
#[serial]
async fn load_applies_env_over_file() {
    let dir = std::env::temp_dir().join(format!("microseg-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("microseg.toml");
    std::fs::write(&path, "[dataplane]\ninterface = \"veth-file\"\n").unwrap();

    // SAFETY: serial 테스트로 환경변수 조작이 다른 테스트와 겹치지 않습니다.
    unsafe { std::env::set_var("MICROSEG_DATAPLANE_INTERFACE", "veth-env") };
    let config = MicrosegConfig::load(&path).await;
    unsafe { std::env::remove_var("MICROSEG_DATAPLANE_INTERFACE") };
    std::fs::remove_dir_all(&dir).ok();

    assert_eq!(config.unwrap().dataplane.interface, "veth-env");
}

#[tokio::test]
#[serial]
async fn load_rejects_invalid_env_value() {
    let dir = std::env::temp_dir().join(format!("microseg-config-bad-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("microseg.toml");
    std::fs::write(&path, "").unwrap();

    // SAFETY: serial 테스트로 환경변수 조작이 다른 테스트와 겹치지 않습니다.
    unsafe { std::env::set_var("MICROSEG_GENERAL_LOG_FORMAT", "xml") };
    let result = MicrosegConfig::load(&path).await;
    unsafe { std::env::remove_var("MICROSEG_GENERAL_LOG_FORMAT") };
    std::fs::remove_dir_all(&dir).ok();

    assert!(matches!(
        result,
        Err(MicrosegError::Config(ConfigError::InvalidValue { .. }))
    ));
}

// =============================================================================
// 에러 케이스
// =============================================================================

#[test]
fn wrong_type_is_parse_error() {
    let result = MicrosegConfig::parse("[dataplane]\nstats_interval_secs = \"five\"\n");
    assert!(matches!(
        result,
        Err(MicrosegError::Config(ConfigError::ParseFailed { .. }))
    ));
}

#[test]
fn unknown_sections_are_ignored() {
    let config = MicrosegConfig::parse("[api]\nport = 8080\n").expect("should parse");
    assert_eq!(config.dataplane.interface, "lo");
}
