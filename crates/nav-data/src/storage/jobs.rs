//! 다운로드 작업 저장소.

use chrono::{DateTime, NaiveDate, Utc};
use nav_core::{
    DownloadJob, Environment, JobFilter, JobStatus, JobType, JobUpdate, NewDownloadJob,
    ResultSummary,
};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// download_jobs 테이블 row.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub environment: String,
    pub job_type: String,
    pub scheme_codes: Vec<String>,
    pub status: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub parent_job_id: Option<Uuid>,
    pub chunk_number: Option<i32>,
    pub total_chunks: Option<i32>,
    pub result_summary: Option<String>,
    pub error_details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRow {
    /// 도메인 타입으로 변환.
    pub fn into_domain(self) -> Result<DownloadJob, String> {
        let result_summary = match self.result_summary {
            Some(raw) => Some(
                serde_json::from_str::<ResultSummary>(&raw)
                    .map_err(|e| format!("result_summary 역직렬화 실패: {}", e))?,
            ),
            None => None,
        };

        Ok(DownloadJob {
            id: self.id,
            tenant_id: self.tenant_id,
            user_id: self.user_id,
            environment: self.environment.parse::<Environment>()?,
            job_type: self.job_type.parse::<JobType>()?,
            scheme_codes: self.scheme_codes,
            status: self.status.parse::<JobStatus>()?,
            start_date: self.start_date,
            end_date: self.end_date,
            parent_job_id: self.parent_job_id,
            chunk_number: self.chunk_number,
            total_chunks: self.total_chunks,
            result_summary,
            error_details: self.error_details,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

/// 다운로드 작업 저장소.
pub struct NavJobRepository;

impl NavJobRepository {
    /// 새 작업 생성 (상태 pending).
    pub async fn create(pool: &PgPool, new_job: &NewDownloadJob) -> Result<JobRow, sqlx::Error> {
        sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO download_jobs (
                id, tenant_id, user_id, environment, job_type, scheme_codes,
                status, start_date, end_date, parent_job_id, chunk_number, total_chunks
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_job.tenant_id)
        .bind(new_job.user_id)
        .bind(new_job.environment.as_str())
        .bind(new_job.job_type.as_str())
        .bind(&new_job.scheme_codes)
        .bind(new_job.start_date)
        .bind(new_job.end_date)
        .bind(new_job.parent_job_id)
        .bind(new_job.chunk_number)
        .bind(new_job.total_chunks)
        .fetch_one(pool)
        .await
    }

    /// 작업 갱신.
    ///
    /// WHERE 절이 종결 상태를 배제하므로 종결된 작업은 다시 전이하지
    /// 않습니다. 그 경우 None을 반환하며, 호출측은 기존 row를 조회해
    /// 그대로 돌려줍니다.
    pub async fn update(
        pool: &PgPool,
        job_id: Uuid,
        update: &JobUpdate,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let status = update.status.map(|s| s.as_str().to_string());
        let result_summary = update
            .result_summary
            .as_ref()
            .and_then(|s| serde_json::to_string(s).ok());

        sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE download_jobs
            SET status = COALESCE($2, status),
                result_summary = COALESCE($3, result_summary),
                error_details = COALESCE($4, error_details),
                started_at = CASE
                    WHEN $2 = 'running' AND started_at IS NULL THEN NOW()
                    ELSE started_at
                END,
                completed_at = CASE
                    WHEN $2 IN ('completed', 'completed_with_errors', 'failed', 'cancelled')
                         AND completed_at IS NULL THEN NOW()
                    ELSE completed_at
                END
            WHERE id = $1
              AND status NOT IN ('completed', 'completed_with_errors', 'failed', 'cancelled')
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(status)
        .bind(result_summary)
        .bind(update.error_details.clone())
        .fetch_optional(pool)
        .await
    }

    /// 단건 조회.
    pub async fn get(pool: &PgPool, job_id: Uuid) -> Result<Option<JobRow>, sqlx::Error> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM download_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    /// 필터 조건으로 목록 조회.
    ///
    /// 청크 작업은 chunk_number 순으로, 그 외에는 최신순으로 정렬합니다.
    pub async fn list(pool: &PgPool, filter: &JobFilter) -> Result<Vec<JobRow>, sqlx::Error> {
        sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM download_jobs
            WHERE ($1::uuid IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR environment = $2)
              AND ($3::text IS NULL OR job_type = $3)
              AND ($4::text IS NULL OR status = $4)
              AND ($5::uuid IS NULL OR parent_job_id = $5)
            ORDER BY
                CASE WHEN $5::uuid IS NOT NULL THEN chunk_number END ASC,
                created_at DESC
            LIMIT $6
            "#,
        )
        .bind(filter.tenant_id)
        .bind(filter.environment.map(|e| e.as_str().to_string()))
        .bind(filter.job_type.map(|t| t.as_str().to_string()))
        .bind(filter.status.map(|s| s.as_str().to_string()))
        .bind(filter.parent_job_id)
        .bind(filter.limit.unwrap_or(100))
        .fetch_all(pool)
        .await
    }
}
