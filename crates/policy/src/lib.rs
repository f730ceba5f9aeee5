#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//! - [`error`]: 도메인 에러 (`PolicyManagerError`)
//! - [`translate`]: 정책 분류 및 커널 레코드 변환
//! - [`store`]: 정확 일치 / 와일드카드 테이블 저장소 (`PolicyTables`)
//! - [`storage`]: 영속 저장소 (`Storage` trait, `TomlFileStorage`, `MemoryStorage`)
//! - [`manager`]: 정책 관리자 (`PolicyManager`)

pub mod error;
pub mod manager;
pub mod storage;
pub mod store;
pub mod translate;

// --- Public API Re-exports ---

// 관리자
pub use manager::{PolicyManager, RestoreReport};

// 에러
pub use error::PolicyManagerError;

// 테이블 저장소
pub use store::{ExactStore, Placement, PolicyTables, SlotIndex, WildcardStore};

// 영속화
pub use storage::{MemoryStorage, Storage, TomlFileStorage};

// 변환
pub use translate::{TableKind, classify};
