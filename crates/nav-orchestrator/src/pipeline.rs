//! 감독되는 다운로드 실행 파이프라인.
//!
//! 트리거 호출이 반환된 뒤 분리된 태스크에서 실행됩니다. 실행 경로
//! 전체가 에러 경계로 감싸여 있어, 어떤 에러도 트리거 호출자에게
//! 전파되지 않고 항상 종결 상태로 영속화됩니다.
//!
//! 취소는 협조적입니다: 단계 사이 체크포인트에서만 관측되며, 이미
//! 시작된 외부 조회는 끝까지 진행되지만 그 결과는 버려집니다.

use std::sync::Arc;
use std::time::Instant;

use nav_core::{
    DownloadJob, FetchOptions, JobStatus, JobStore, JobUpdate, NavDataProvider, NavError,
    NavResult, ResultSummary,
};

use crate::locks::DownloadLockTable;
use crate::progress::{ChunkError, ProgressTracker};

/// 파이프라인 실행에 필요한 의존성 묶음.
#[derive(Clone)]
pub(crate) struct JobContext {
    pub store: Arc<dyn JobStore>,
    pub provider: Arc<dyn NavDataProvider>,
    pub locks: Arc<DownloadLockTable>,
    pub progress: Arc<ProgressTracker>,
}

/// 단일 작업 실행 결과.
enum JobOutcome {
    /// 정상 진행 완료 (요약 포함)
    Finished(ResultSummary),
    /// 체크포인트에서 취소 관측, 결과 폐기
    Cancelled,
}

/// 단일 작업을 분리 태스크로 실행합니다.
pub(crate) fn spawn_single(ctx: JobContext, job: DownloadJob) {
    tokio::spawn(async move {
        run_single(ctx, job).await;
    });
}

/// 부모/청크 작업을 분리 태스크로 실행합니다.
pub(crate) fn spawn_sequential(ctx: JobContext, parent: DownloadJob, children: Vec<DownloadJob>) {
    tokio::spawn(async move {
        run_sequential(ctx, parent, children).await;
    });
}

/// 단일 작업 실행 + 에러 경계.
async fn run_single(ctx: JobContext, job: DownloadJob) {
    let job_id = job.id;
    let outcome = execute_job(&ctx, &job, true).await;
    finalize_job(&ctx, &job, outcome).await;

    ctx.locks.release_job(job_id);
    ctx.progress.clone().schedule_cleanup(job_id);
}

/// 부모 작업의 청크들을 순차 실행 + 에러 경계.
///
/// 청크 하나의 실패는 기록 후 다음 청크로 계속 진행합니다. 부모가
/// failed로 끝나는 경우는 오케스트레이션 자체(부모 row 갱신 등)가
/// 실패했을 때뿐입니다.
async fn run_sequential(ctx: JobContext, parent: DownloadJob, children: Vec<DownloadJob>) {
    let parent_id = parent.id;

    match execute_sequential(&ctx, &parent, &children).await {
        Ok(SequentialOutcome::Finished {
            summary,
            chunk_errors,
        }) => {
            let status = if chunk_errors.is_empty() {
                JobStatus::Completed
            } else {
                JobStatus::CompletedWithErrors
            };

            summary.log_summary("historical 백필");
            if let Err(e) = ctx
                .store
                .update_job(parent_id, JobUpdate::terminal(status, summary))
                .await
            {
                tracing::error!(job_id = %parent_id, error = %e, "부모 작업 종결 기록 실패");
            }

            // 전체 범위가 처리된 스킴은 이후 요청에서 단락(short-circuit)된다
            if let Err(e) = ctx
                .store
                .mark_backfill_complete(parent.tenant_id, parent.environment, &parent.scheme_codes)
                .await
            {
                tracing::error!(job_id = %parent_id, error = %e, "백필 플래그 기록 실패");
            }

            ctx.progress.mark_terminal(parent_id, status);
            ctx.progress.sequential_terminal(parent_id, status);
        }
        Ok(SequentialOutcome::Cancelled) => {
            tracing::info!(job_id = %parent_id, "부모 작업 취소 관측, 남은 청크 중단");
            ctx.progress.sequential_terminal(parent_id, JobStatus::Cancelled);
        }
        Err(e) => {
            tracing::error!(job_id = %parent_id, error = %e, "청크 오케스트레이션 실패");
            let _ = ctx
                .store
                .update_job(parent_id, JobUpdate::failed(e.to_string()))
                .await;
            ctx.progress.mark_terminal(parent_id, JobStatus::Failed);
            ctx.progress.sequential_terminal(parent_id, JobStatus::Failed);
        }
    }

    ctx.locks.release_job(parent_id);
    ctx.progress.clone().schedule_cleanup(parent_id);
}

/// 청크 순차 실행 결과.
enum SequentialOutcome {
    Finished {
        summary: ResultSummary,
        chunk_errors: Vec<ChunkError>,
    },
    Cancelled,
}

async fn execute_sequential(
    ctx: &JobContext,
    parent: &DownloadJob,
    children: &[DownloadJob],
) -> NavResult<SequentialOutcome> {
    let started = Instant::now();

    ctx.store
        .update_job(parent.id, JobUpdate::status(JobStatus::Running))
        .await?;

    let total = children.len();
    let mut summary = ResultSummary::default();
    let mut chunk_errors: Vec<ChunkError> = Vec::new();

    for (idx, child) in children.iter().enumerate() {
        // 체크포인트: 다음 청크 시작 전에만 취소를 관측한다
        if ctx.progress.is_cancel_requested(parent.id) {
            cancel_remaining_chunks(ctx, &children[idx..]).await;
            return Ok(SequentialOutcome::Cancelled);
        }

        let chunk_number = child.chunk_number.unwrap_or(idx as i32 + 1);
        let percentage = ((idx * 100) / total.max(1)) as u8;
        ctx.progress.update(
            parent.id,
            percentage,
            &format!("청크 {}/{} 실행", chunk_number, total),
            idx,
            total,
        );

        ctx.progress.start_job(child.id);
        match execute_job(ctx, child, false).await {
            Ok(JobOutcome::Finished(child_summary)) => {
                let status = if child_summary.scheme_errors.is_empty() {
                    JobStatus::Completed
                } else {
                    JobStatus::CompletedWithErrors
                };
                let _ = ctx
                    .store
                    .update_job(child.id, JobUpdate::terminal(status, child_summary.clone()))
                    .await;
                ctx.progress.mark_terminal(child.id, status);

                summary.merge(&child_summary);
                ctx.progress.chunk_finished(parent.id);
            }
            Ok(JobOutcome::Cancelled) => {
                if ctx.progress.is_cancel_requested(parent.id) {
                    cancel_remaining_chunks(ctx, &children[idx + 1..]).await;
                    return Ok(SequentialOutcome::Cancelled);
                }
                // 개별 청크만 취소된 경우: 부모는 계속 진행
                ctx.progress.chunk_finished(parent.id);
            }
            Err(e) => {
                // 청크 실패는 부모를 중단시키지 않는다. 기록 후 다음 청크로.
                tracing::warn!(
                    job_id = %child.id,
                    chunk = chunk_number,
                    error = %e,
                    "청크 실행 실패, 다음 청크 계속"
                );
                let _ = ctx
                    .store
                    .update_job(child.id, JobUpdate::failed(e.to_string()))
                    .await;
                ctx.progress.mark_terminal(child.id, JobStatus::Failed);

                ctx.progress
                    .chunk_failed(parent.id, chunk_number, e.to_string());
                ctx.progress.chunk_finished(parent.id);
                chunk_errors.push(ChunkError {
                    chunk_number,
                    message: e.to_string(),
                });
            }
        }
    }

    summary.elapsed_ms = started.elapsed().as_millis() as u64;
    Ok(SequentialOutcome::Finished {
        summary,
        chunk_errors,
    })
}

/// 취소 관측 시 남은 pending 청크들을 취소 상태로 기록합니다.
async fn cancel_remaining_chunks(ctx: &JobContext, remaining: &[DownloadJob]) {
    for child in remaining {
        let _ = ctx
            .store
            .update_job(child.id, JobUpdate::status(JobStatus::Cancelled))
            .await;
        ctx.progress.request_cancel(child.id);
    }
}

/// 단일 작업(또는 청크)의 7단계 파이프라인.
///
/// `mark_backfill`은 단일 historical 작업에서만 true입니다. 청크는
/// 부모가 전체 완료 시점에 일괄로 플래그를 세웁니다.
async fn execute_job(
    ctx: &JobContext,
    job: &DownloadJob,
    mark_backfill: bool,
) -> NavResult<JobOutcome> {
    let started = Instant::now();

    // 1. 실행 상태 전이
    ctx.store
        .update_job(job.id, JobUpdate::status(JobStatus::Running))
        .await?;

    if ctx.progress.is_cancel_requested(job.id) {
        return Ok(JobOutcome::Cancelled);
    }

    // 2. 작업 유형에 맞는 외부 조회
    ctx.progress.update(job.id, 10, "외부 데이터 조회", 0, 0);
    let snapshot = fetch_for_job(ctx, job).await?;

    // 체크포인트: 조회는 이미 끝났고, 취소면 결과를 버린다
    if ctx.progress.is_cancel_requested(job.id) {
        tracing::info!(job_id = %job.id, "취소 관측, 조회 결과 폐기");
        return Ok(JobOutcome::Cancelled);
    }

    // 3. 대상 스킴 필터링
    ctx.progress
        .update(job.id, 40, "대상 스킴 필터링", 0, snapshot.records.len());
    let records = snapshot.filter_schemes(&job.scheme_codes);

    if ctx.progress.is_cancel_requested(job.id) {
        return Ok(JobOutcome::Cancelled);
    }

    // 4. 가격 테이블 upsert
    ctx.progress
        .update(job.id, 60, "가격 저장", 0, records.len());
    let stats = ctx
        .store
        .upsert_nav_prices(job.tenant_id, job.environment, &records)
        .await?;
    ctx.progress
        .update(job.id, 90, "결과 요약", stats.total(), records.len());
    ctx.progress.add_scheme_errors(job.id, &stats.errors);

    // 5. 결과 요약
    let summary = ResultSummary {
        total_records: records.len(),
        inserted: stats.inserted,
        updated: stats.updated,
        failed: stats.failed,
        scheme_errors: stats.errors,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };

    // 6. historical 완료 시 백필 플래그
    if mark_backfill && job.job_type == nav_core::JobType::Historical {
        ctx.store
            .mark_backfill_complete(job.tenant_id, job.environment, &job.scheme_codes)
            .await?;
    }

    Ok(JobOutcome::Finished(summary))
}

/// 작업 유형별 외부 조회.
///
/// daily/weekly는 일일 전체 스냅샷을 재사용하고, historical은 작업의
/// 날짜 구간을 조회합니다.
async fn fetch_for_job(ctx: &JobContext, job: &DownloadJob) -> NavResult<nav_core::NavSnapshot> {
    use nav_core::JobType;

    let snapshot = match job.job_type {
        JobType::Daily | JobType::Weekly => {
            ctx.provider.fetch_daily(&FetchOptions::default()).await?
        }
        JobType::Historical => {
            let (start, end) = match (job.start_date, job.end_date) {
                (Some(start), Some(end)) => (start, end),
                _ => {
                    return Err(NavError::Internal(format!(
                        "historical 작업에 날짜 구간이 없습니다: {}",
                        job.id
                    )))
                }
            };
            ctx.provider
                .fetch_historical(start, end, &FetchOptions::default())
                .await?
        }
    };

    Ok(snapshot)
}

/// 단일 작업 종결 처리 (에러 경계의 마지막 단계).
async fn finalize_job(ctx: &JobContext, job: &DownloadJob, outcome: NavResult<JobOutcome>) {
    let job_id = job.id;

    match outcome {
        Ok(JobOutcome::Finished(summary)) => {
            let status = if summary.scheme_errors.is_empty() {
                JobStatus::Completed
            } else {
                JobStatus::CompletedWithErrors
            };
            summary.log_summary(job.job_type.as_str());

            if let Err(e) = ctx
                .store
                .update_job(job_id, JobUpdate::terminal(status, summary))
                .await
            {
                tracing::error!(job_id = %job_id, error = %e, "작업 종결 기록 실패");
            }
            ctx.progress.mark_terminal(job_id, status);
        }
        Ok(JobOutcome::Cancelled) => {
            // 작업 row는 취소 호출이 이미 cancelled로 전이시켰다
            tracing::info!(job_id = %job_id, "작업 취소로 종료");
        }
        Err(e) => {
            // 에러 경계: 비동기 실행 중의 모든 에러는 여기서 잡혀
            // failed 종결 상태로 영속화된다. 호출자에게 전파되지 않는다.
            tracing::error!(
                job_id = %job_id,
                job_type = %job.job_type,
                tenant_id = %job.tenant_id,
                error = %e,
                "다운로드 실행 실패"
            );
            if let Err(update_err) = ctx
                .store
                .update_job(job_id, JobUpdate::failed(e.to_string()))
                .await
            {
                tracing::error!(job_id = %job_id, error = %update_err, "실패 상태 기록마저 실패");
            }
            ctx.progress.mark_terminal(job_id, JobStatus::Failed);
        }
    }
}

