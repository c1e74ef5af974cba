//! # Nav Data
//!
//! 외부 NAV 공시 데이터 수집과 PostgreSQL 영속화를 담당합니다.
//!
//! - `provider`: AMFI 공시 포털 HTTP 클라이언트 (재시도, rate limit,
//!   idempotent 요청 병합, 텍스트 파싱)
//! - `storage`: sqlx 기반 저장소 모듈 (작업, 가격, 스킴, 스케줄러)
//! - `store`: nav-core의 `JobStore`/`SchedulerStore` trait 구현

pub mod provider;
pub mod storage;
pub mod store;

pub use provider::AmfiClient;
pub use store::{PgJobStore, PgSchedulerStore};
