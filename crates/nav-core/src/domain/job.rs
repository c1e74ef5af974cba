//! 다운로드 작업 타입 및 상태 머신.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::nav::Environment;

/// 다운로드 작업 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "utoipa-support", derive(utoipa::ToSchema))]
pub enum JobType {
    /// 일일 전체 스냅샷 다운로드
    Daily,
    /// 기간 지정 백필 다운로드
    Historical,
    /// 주간 다운로드 (일일 스냅샷 재사용)
    Weekly,
}

impl JobType {
    /// 문자열로 변환.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Historical => "historical",
            Self::Weekly => "weekly",
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "historical" => Ok(Self::Historical),
            "weekly" => Ok(Self::Weekly),
            _ => Err(format!("알 수 없는 작업 유형: {}", s)),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 다운로드 작업 상태.
///
/// 상태 전이는 단방향입니다:
///
/// ```text
/// Pending ──> Running ──> {Completed, CompletedWithErrors, Failed, Cancelled}
/// ```
///
/// 종결 상태에 도달한 작업은 다시 전이하지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "utoipa-support", derive(utoipa::ToSchema))]
pub enum JobStatus {
    /// 생성됨, 실행 대기
    Pending,
    /// 실행 중
    Running,
    /// 정상 완료
    Completed,
    /// 완료했으나 일부 스킴/청크에서 오류 발생
    CompletedWithErrors,
    /// 실패
    Failed,
    /// 취소됨
    Cancelled,
}

impl JobStatus {
    /// 문자열로 변환.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// 종결 상태 여부.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Failed | Self::Cancelled
        )
    }

    /// 해당 상태로의 전이가 허용되는지 확인합니다.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            Self::Pending => matches!(
                next,
                Self::Running | Self::Failed | Self::Cancelled
            ),
            Self::Running => next.is_terminal(),
            // 종결 상태에서는 어떤 전이도 불가
            _ => false,
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "completed_with_errors" => Ok(Self::CompletedWithErrors),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("알 수 없는 작업 상태: {}", s)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 스킴 단위 오류 기록.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa-support", derive(utoipa::ToSchema))]
pub struct SchemeError {
    /// 스킴 코드
    pub scheme_code: String,
    /// 오류 메시지
    pub message: String,
}

/// 작업 결과 요약.
///
/// 작업 종결 시 `result_summary` 컬럼에 JSON으로 직렬화되어 저장됩니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa-support", derive(utoipa::ToSchema))]
pub struct ResultSummary {
    /// 대상 레코드 총 수
    pub total_records: usize,
    /// 신규 삽입 수
    pub inserted: usize,
    /// 갱신 수
    pub updated: usize,
    /// 실패 수
    pub failed: usize,
    /// 스킴 단위 오류 목록
    pub scheme_errors: Vec<SchemeError>,
    /// 소요 시간 (밀리초)
    pub elapsed_ms: u64,
}

impl ResultSummary {
    /// 청크 결과들을 부모 요약으로 합산합니다.
    pub fn merge(&mut self, other: &ResultSummary) {
        self.total_records += other.total_records;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.failed += other.failed;
        self.scheme_errors.extend(other.scheme_errors.iter().cloned());
        self.elapsed_ms += other.elapsed_ms;
    }

    /// 요약을 구조화 로그로 출력합니다.
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            total = self.total_records,
            inserted = self.inserted,
            updated = self.updated,
            failed = self.failed,
            scheme_errors = self.scheme_errors.len(),
            elapsed = format!("{:.1}s", self.elapsed_ms as f64 / 1000.0),
            "다운로드 완료"
        );
    }
}

/// 다운로드 작업 레코드.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa-support", derive(utoipa::ToSchema))]
pub struct DownloadJob {
    /// 작업 id
    pub id: Uuid,
    /// 테넌트 id
    pub tenant_id: Uuid,
    /// 트리거한 사용자 (스케줄 실행이면 None)
    pub user_id: Option<Uuid>,
    /// 실행 환경
    pub environment: Environment,
    /// 작업 유형
    pub job_type: JobType,
    /// 대상 스킴 코드 (빈 목록 = 전체)
    pub scheme_codes: Vec<String>,
    /// 현재 상태
    pub status: JobStatus,
    /// 조회 시작일 (historical 전용)
    pub start_date: Option<NaiveDate>,
    /// 조회 종료일 (historical 전용)
    pub end_date: Option<NaiveDate>,
    /// 부모 작업 id (청크 작업 전용)
    pub parent_job_id: Option<Uuid>,
    /// 청크 순번 (1부터, 청크 작업 전용)
    pub chunk_number: Option<i32>,
    /// 전체 청크 수 (부모/청크 작업 전용)
    pub total_chunks: Option<i32>,
    /// 결과 요약
    pub result_summary: Option<ResultSummary>,
    /// 실패 상세
    pub error_details: Option<String>,
    /// 생성 시각
    pub created_at: DateTime<Utc>,
    /// 실행 시작 시각
    pub started_at: Option<DateTime<Utc>>,
    /// 종결 시각
    pub completed_at: Option<DateTime<Utc>>,
}

/// 새 작업 생성 입력.
#[derive(Debug, Clone)]
pub struct NewDownloadJob {
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub environment: Environment,
    pub job_type: JobType,
    pub scheme_codes: Vec<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub parent_job_id: Option<Uuid>,
    pub chunk_number: Option<i32>,
    pub total_chunks: Option<i32>,
}

impl NewDownloadJob {
    /// 기간 없는 단순 작업 생성 입력.
    pub fn simple(
        tenant_id: Uuid,
        user_id: Option<Uuid>,
        environment: Environment,
        job_type: JobType,
        scheme_codes: Vec<String>,
    ) -> Self {
        Self {
            tenant_id,
            user_id,
            environment,
            job_type,
            scheme_codes,
            start_date: None,
            end_date: None,
            parent_job_id: None,
            chunk_number: None,
            total_chunks: None,
        }
    }
}

/// 작업 갱신 입력.
///
/// `None` 필드는 기존 값을 유지합니다.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub result_summary: Option<ResultSummary>,
    pub error_details: Option<String>,
}

impl JobUpdate {
    /// 상태만 바꾸는 갱신.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// 요약과 함께 종결하는 갱신.
    pub fn terminal(status: JobStatus, summary: ResultSummary) -> Self {
        Self {
            status: Some(status),
            result_summary: Some(summary),
            error_details: None,
        }
    }

    /// 실패로 종결하는 갱신.
    pub fn failed(error_details: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            result_summary: None,
            error_details: Some(error_details.into()),
        }
    }
}

/// 작업 목록 조회 필터.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub tenant_id: Option<Uuid>,
    pub environment: Option<Environment>,
    pub job_type: Option<JobType>,
    pub status: Option<JobStatus>,
    /// 이 부모의 청크 작업만 조회
    pub parent_job_id: Option<Uuid>,
    pub limit: Option<i64>,
}
