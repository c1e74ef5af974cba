//! 진행 상태 추적.
//!
//! 작업별 진행 스냅샷과 부모 작업의 청크 단위 진행을 메모리에서
//! 관리합니다. 영속되지 않으며, 종결 후 일정 지연이 지나면 정리됩니다.
//! 폴링(`get`)이 진행 관측의 단일 소스입니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nav_core::{JobStatus, SchemeError};
use serde::Serialize;
use uuid::Uuid;

/// 작업 진행 스냅샷.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    /// 작업 id
    pub job_id: Uuid,
    /// 현재 상태
    pub status: JobStatus,
    /// 진행률 (0~100, 실행 중에는 단조 증가)
    pub percentage: u8,
    /// 현재 단계 설명
    pub current_step: String,
    /// 처리한 레코드 수
    pub processed: usize,
    /// 전체 레코드 수
    pub total: usize,
    /// 스킴 단위 오류
    pub scheme_errors: Vec<SchemeError>,
    /// 시작 시각
    pub started_at: DateTime<Utc>,
    /// 마지막 갱신 시각
    pub updated_at: DateTime<Utc>,
    /// 예상 완료 시각
    pub estimated_completion: Option<DateTime<Utc>>,
}

/// 청크 오류 기록.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkError {
    /// 청크 순번
    pub chunk_number: i32,
    /// 오류 메시지
    pub message: String,
}

/// 부모 작업의 청크 단위 진행.
#[derive(Debug, Clone, Serialize)]
pub struct SequentialProgress {
    /// 부모 작업 id
    pub parent_job_id: Uuid,
    /// 전체 청크 수
    pub total_chunks: usize,
    /// 완료된 청크 수
    pub completed_chunks: usize,
    /// 청크 오류 목록
    pub chunk_errors: Vec<ChunkError>,
    /// 전체 상태
    pub status: JobStatus,
    /// 시작 시각
    pub started_at: DateTime<Utc>,
    /// 마지막 갱신 시각
    pub updated_at: DateTime<Utc>,
    /// 예상 완료 시각 (완료된 청크당 평균 시간으로 외삽)
    pub estimated_completion: Option<DateTime<Utc>>,
}

/// 진행 상태 추적기.
///
/// 생성자 주입으로 소유되는 프로세스 로컬 상태입니다. 잠금 구간에서
/// await하지 않으므로 std Mutex로 보호합니다.
pub struct ProgressTracker {
    snapshots: Mutex<HashMap<Uuid, ProgressSnapshot>>,
    sequential: Mutex<HashMap<Uuid, SequentialProgress>>,
    cleanup_delay: Duration,
}

impl ProgressTracker {
    /// 새 추적기 생성.
    ///
    /// `cleanup_delay`는 종결 후 스냅샷을 메모리에서 제거하기까지의 지연입니다.
    pub fn new(cleanup_delay: Duration) -> Self {
        Self {
            snapshots: Mutex::new(HashMap::new()),
            sequential: Mutex::new(HashMap::new()),
            cleanup_delay,
        }
    }

    /// 작업 진행 추적 시작.
    ///
    /// 이미 취소 표시된 작업의 스냅샷은 덮어쓰지 않습니다.
    pub fn start_job(&self, job_id: Uuid) {
        let now = Utc::now();
        let mut snapshots = self.snapshots.lock().expect("진행 테이블 mutex poisoned");
        if let Some(existing) = snapshots.get(&job_id) {
            if existing.status.is_terminal() {
                return;
            }
        }
        snapshots.insert(
            job_id,
            ProgressSnapshot {
                job_id,
                status: JobStatus::Running,
                percentage: 0,
                current_step: "대기".to_string(),
                processed: 0,
                total: 0,
                scheme_errors: Vec::new(),
                started_at: now,
                updated_at: now,
                estimated_completion: None,
            },
        );
    }

    /// 진행 갱신.
    ///
    /// 실행 중에는 진행률이 역행하지 않습니다 (낮은 값은 무시).
    /// 취소가 요청된 작업의 상태는 덮어쓰지 않습니다.
    pub fn update(&self, job_id: Uuid, percentage: u8, step: &str, processed: usize, total: usize) {
        let mut snapshots = self.snapshots.lock().expect("진행 테이블 mutex poisoned");
        if let Some(snapshot) = snapshots.get_mut(&job_id) {
            if snapshot.status.is_terminal() {
                return;
            }
            let now = Utc::now();
            snapshot.percentage = snapshot.percentage.max(percentage.min(100));
            snapshot.current_step = step.to_string();
            snapshot.processed = processed;
            snapshot.total = total;
            snapshot.updated_at = now;

            if snapshot.percentage > 0 && snapshot.percentage < 100 {
                let elapsed = now - snapshot.started_at;
                let total_estimate = elapsed * (100 / snapshot.percentage as i32).max(1);
                snapshot.estimated_completion = Some(snapshot.started_at + total_estimate);
            }
        }
    }

    /// 스킴 오류 추가.
    pub fn add_scheme_errors(&self, job_id: Uuid, errors: &[SchemeError]) {
        if errors.is_empty() {
            return;
        }
        let mut snapshots = self.snapshots.lock().expect("진행 테이블 mutex poisoned");
        if let Some(snapshot) = snapshots.get_mut(&job_id) {
            snapshot.scheme_errors.extend(errors.iter().cloned());
            snapshot.updated_at = Utc::now();
        }
    }

    /// 종결 상태 기록.
    ///
    /// 이미 취소로 표시된 스냅샷은 다른 종결 상태로 덮지 않습니다.
    pub fn mark_terminal(&self, job_id: Uuid, status: JobStatus) {
        let mut snapshots = self.snapshots.lock().expect("진행 테이블 mutex poisoned");
        if let Some(snapshot) = snapshots.get_mut(&job_id) {
            if snapshot.status.is_terminal() {
                return;
            }
            snapshot.status = status;
            if matches!(status, JobStatus::Completed | JobStatus::CompletedWithErrors) {
                snapshot.percentage = 100;
            }
            snapshot.updated_at = Utc::now();
            snapshot.estimated_completion = None;
        }
    }

    /// 취소 요청 표시.
    ///
    /// 파이프라인은 체크포인트마다 이 플래그를 확인합니다. 진행 중이던
    /// 외부 조회는 중단되지 않고, 다음 체크포인트에서 결과가 버려집니다.
    pub fn request_cancel(&self, job_id: Uuid) {
        {
            let now = Utc::now();
            let mut snapshots = self.snapshots.lock().expect("진행 테이블 mutex poisoned");
            match snapshots.get_mut(&job_id) {
                Some(snapshot) => {
                    if !snapshot.status.is_terminal() {
                        snapshot.status = JobStatus::Cancelled;
                        snapshot.current_step = "취소됨".to_string();
                        snapshot.updated_at = now;
                        snapshot.estimated_completion = None;
                    }
                }
                // 아직 실행이 시작되지 않은 작업(대기 중 청크 등)도
                // 취소 플래그가 남아야 한다
                None => {
                    snapshots.insert(
                        job_id,
                        ProgressSnapshot {
                            job_id,
                            status: JobStatus::Cancelled,
                            percentage: 0,
                            current_step: "취소됨".to_string(),
                            processed: 0,
                            total: 0,
                            scheme_errors: Vec::new(),
                            started_at: now,
                            updated_at: now,
                            estimated_completion: None,
                        },
                    );
                }
            }
        }
        let mut sequential = self.sequential.lock().expect("진행 테이블 mutex poisoned");
        if let Some(progress) = sequential.get_mut(&job_id) {
            if !progress.status.is_terminal() {
                progress.status = JobStatus::Cancelled;
                progress.updated_at = Utc::now();
                progress.estimated_completion = None;
            }
        }
    }

    /// 취소 요청 여부.
    pub fn is_cancel_requested(&self, job_id: Uuid) -> bool {
        let snapshots = self.snapshots.lock().expect("진행 테이블 mutex poisoned");
        snapshots
            .get(&job_id)
            .map(|s| s.status == JobStatus::Cancelled)
            .unwrap_or(false)
    }

    /// 스냅샷 조회.
    pub fn get(&self, job_id: Uuid) -> Option<ProgressSnapshot> {
        let snapshots = self.snapshots.lock().expect("진행 테이블 mutex poisoned");
        snapshots.get(&job_id).cloned()
    }

    /// 종결되지 않은 모든 스냅샷.
    pub fn active(&self) -> Vec<ProgressSnapshot> {
        let snapshots = self.snapshots.lock().expect("진행 테이블 mutex poisoned");
        let mut active: Vec<ProgressSnapshot> = snapshots
            .values()
            .filter(|s| !s.status.is_terminal())
            .cloned()
            .collect();
        active.sort_by_key(|s| s.started_at);
        active
    }

    /// 청크 단위 진행 추적 시작.
    pub fn start_sequential(&self, parent_job_id: Uuid, total_chunks: usize) {
        let now = Utc::now();
        let mut sequential = self.sequential.lock().expect("진행 테이블 mutex poisoned");
        sequential.insert(
            parent_job_id,
            SequentialProgress {
                parent_job_id,
                total_chunks,
                completed_chunks: 0,
                chunk_errors: Vec::new(),
                status: JobStatus::Running,
                started_at: now,
                updated_at: now,
                estimated_completion: None,
            },
        );
    }

    /// 청크 완료 기록 (성공/실패 공통).
    ///
    /// 완료된 청크당 평균 소요 시간으로 남은 시간을 외삽합니다.
    pub fn chunk_finished(&self, parent_job_id: Uuid) {
        let mut sequential = self.sequential.lock().expect("진행 테이블 mutex poisoned");
        if let Some(progress) = sequential.get_mut(&parent_job_id) {
            let now = Utc::now();
            progress.completed_chunks += 1;
            progress.updated_at = now;

            let remaining = progress.total_chunks.saturating_sub(progress.completed_chunks);
            if remaining > 0 && progress.completed_chunks > 0 {
                let elapsed = now - progress.started_at;
                let per_chunk = elapsed / progress.completed_chunks as i32;
                progress.estimated_completion = Some(now + per_chunk * remaining as i32);
            } else {
                progress.estimated_completion = None;
            }
        }
    }

    /// 청크 오류 기록.
    pub fn chunk_failed(&self, parent_job_id: Uuid, chunk_number: i32, message: String) {
        let mut sequential = self.sequential.lock().expect("진행 테이블 mutex poisoned");
        if let Some(progress) = sequential.get_mut(&parent_job_id) {
            progress.chunk_errors.push(ChunkError {
                chunk_number,
                message,
            });
            progress.updated_at = Utc::now();
        }
    }

    /// 청크 단위 진행 종결.
    pub fn sequential_terminal(&self, parent_job_id: Uuid, status: JobStatus) {
        let mut sequential = self.sequential.lock().expect("진행 테이블 mutex poisoned");
        if let Some(progress) = sequential.get_mut(&parent_job_id) {
            if !progress.status.is_terminal() {
                progress.status = status;
                progress.updated_at = Utc::now();
                progress.estimated_completion = None;
            }
        }
    }

    /// 청크 단위 진행 조회.
    pub fn get_sequential(&self, parent_job_id: Uuid) -> Option<SequentialProgress> {
        let sequential = self.sequential.lock().expect("진행 테이블 mutex poisoned");
        sequential.get(&parent_job_id).cloned()
    }

    /// 종결된 작업의 스냅샷을 지연 후 제거하는 태스크를 띄웁니다.
    ///
    /// 종결되지 않은 스냅샷은 제거하지 않습니다.
    pub fn schedule_cleanup(self: Arc<Self>, job_id: Uuid) {
        let delay = self.cleanup_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let mut snapshots = self.snapshots.lock().expect("진행 테이블 mutex poisoned");
            if snapshots
                .get(&job_id)
                .map(|s| s.status.is_terminal())
                .unwrap_or(false)
            {
                snapshots.remove(&job_id);
            }
            drop(snapshots);

            let mut sequential = self.sequential.lock().expect("진행 테이블 mutex poisoned");
            if sequential
                .get(&job_id)
                .map(|s| s.status.is_terminal())
                .unwrap_or(false)
            {
                sequential.remove(&job_id);
            }
        });
    }
}
