//! 에러 타입: 도메인별 에러 정의

/// microseg 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum MicrosegError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 데이터 평면(eBPF) 에러
    #[error("dataplane error: {0}")]
    Dataplane(#[from] DataplaneError),

    /// 정책 처리 에러
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    /// 스토리지 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 데이터 평면 에러
///
/// 어태치 단계별 실패는 각각 별도 변형으로 구분되어 호출자가
/// 어떤 단계에서 실패했는지 판단할 수 있습니다.
#[derive(Debug, thiserror::Error)]
pub enum DataplaneError {
    /// 인터페이스 이름을 인덱스로 변환할 수 없음
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    /// eBPF 오브젝트 로드/검증 실패
    #[error("program load failed: {0}")]
    ProgramLoadFailed(String),

    /// TCX/레거시 경로 모두 어태치 실패
    #[error("attach failed on '{interface}': {reason}")]
    AttachFailed { interface: String, reason: String },

    /// 플로우 이벤트 링 버퍼 열기 실패
    #[error("event stream open failed: {0}")]
    EventStreamOpenFailed(String),

    /// 맵 조회/갱신/순회 실패
    #[error("map error: {0}")]
    Map(String),

    /// 레코드 디코딩 실패
    #[error("decode error: {0}")]
    Decode(String),

    /// 이벤트 스트림 읽기 실패
    #[error("event stream error: {0}")]
    EventStream(String),

    /// 정리 단계 중 하나 이상 실패 (모든 단계는 실행됨)
    #[error("teardown failed: {}", .0.join("; "))]
    Teardown(Vec<String>),
}

/// 정책 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// 정책 필드 형식 오류
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// 와일드카드 테이블 슬롯 부족
    #[error("wildcard policy table full (max {capacity})")]
    TableFull { capacity: u32 },

    /// 커널 테이블 접근 실패
    #[error("policy table error: {0}")]
    Table(String),

    /// 룰을 찾을 수 없음
    #[error("policy not found: rule_id={0}")]
    NotFound(u32),
}

/// 스토리지 에러
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 저장된 정책이 없음
    #[error("policy not found in storage: rule_id={0}")]
    NotFound(u32),

    /// 읽기/쓰기 실패
    #[error("storage io failed: {0}")]
    Io(String),

    /// 직렬화/역직렬화 실패
    #[error("storage serialization failed: {0}")]
    Serialization(String),

    /// 이미 닫힌 스토리지
    #[error("storage closed")]
    Closed,
}
