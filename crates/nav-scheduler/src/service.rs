//! 스케줄러 서비스.
//!
//! (테넌트, 사용자, 환경) identity별 설정 CRUD와 타이머 생애주기를
//! 관리합니다. identity당 타이머는 항상 최대 하나입니다: 저장 시 기존
//! 타이머를 먼저 중지한 뒤 새 타이머를 시작합니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{NaiveTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use nav_core::{
    Environment, ExecutionStatus, NavError, NavResult, NewSchedulerConfig, ScheduleExecution,
    ScheduleType, SchedulerConfig, SchedulerSettings, SchedulerStore, TriggerSource,
};

use crate::cron_util;
use crate::workflow::{WorkflowPayload, WorkflowTrigger};

/// 타이머 identity 키.
type TimerKey = (Uuid, Environment, Uuid);

/// 활성 타이머 핸들.
struct TimerHandle {
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// 설정 저장 입력.
#[derive(Debug, Clone)]
pub struct SaveConfigInput {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub environment: Environment,
    pub schedule_type: ScheduleType,
    /// custom 유형에서 필수, daily/weekly에서는 무시
    pub cron_expression: Option<String>,
    /// daily/weekly 유형의 선호 실행 시각
    pub preferred_time: Option<NaiveTime>,
    /// IANA 타임존 (없으면 기본값 사용)
    pub timezone: Option<String>,
    /// 테넌트별 워크플로우 webhook URL
    pub webhook_url: Option<String>,
    pub enabled: bool,
}

/// 스케줄러 상태 응답.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    /// 현재 설정
    pub config: SchedulerConfig,
    /// 타이머 활성 여부 (프로세스 로컬)
    pub timer_active: bool,
    /// 최근 실행 이력
    pub recent_executions: Vec<ScheduleExecution>,
}

/// 스케줄러 서비스.
///
/// Arc 필드로 구성되어 저렴하게 복제되며, 타이머 태스크가 자신의 복제본을
/// 들고 실행됩니다.
#[derive(Clone)]
pub struct SchedulerService {
    store: Arc<dyn SchedulerStore>,
    workflow: Arc<dyn WorkflowTrigger>,
    settings: SchedulerSettings,
    timers: Arc<Mutex<HashMap<TimerKey, TimerHandle>>>,
}

impl SchedulerService {
    /// 새 서비스 생성.
    pub fn new(
        store: Arc<dyn SchedulerStore>,
        workflow: Arc<dyn WorkflowTrigger>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            workflow,
            settings,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 설정 저장.
    ///
    /// cron 표현식과 타임존을 동기적으로 검증하고, 다음 실행 시각을
    /// 계산해 저장합니다. identity의 기존 타이머는 항상 중지된 뒤
    /// (enabled면) 새 타이머가 시작됩니다.
    pub async fn save_config(&self, input: SaveConfigInput) -> NavResult<SchedulerConfig> {
        let timezone = input
            .timezone
            .clone()
            .unwrap_or_else(|| self.settings.default_timezone.clone());
        cron_util::parse_timezone(&timezone)?;

        let cron_expression = cron_util::resolve_cron_expression(
            input.schedule_type,
            input.preferred_time,
            input.cron_expression.as_deref(),
        )?;
        let next_execution_at = cron_util::next_fire(&cron_expression, &timezone, Utc::now())?;

        let config = self
            .store
            .upsert_config(NewSchedulerConfig {
                tenant_id: input.tenant_id,
                user_id: input.user_id,
                environment: input.environment,
                schedule_type: input.schedule_type,
                cron_expression,
                preferred_time: input.preferred_time,
                timezone,
                webhook_url: input.webhook_url,
                enabled: input.enabled,
                next_execution_at,
            })
            .await?;

        // identity당 타이머는 최대 하나: 기존 타이머를 먼저 내린다
        self.stop_timer(&config.timer_key());
        if config.enabled {
            self.start_timer(config.clone());
        }

        tracing::info!(
            config_id = %config.id,
            tenant_id = %config.tenant_id,
            cron = %config.cron_expression,
            enabled = config.enabled,
            next_execution_at = ?config.next_execution_at,
            "스케줄 설정 저장"
        );
        Ok(config)
    }

    /// 설정 조회.
    pub async fn get_config(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        environment: Environment,
    ) -> NavResult<Option<SchedulerConfig>> {
        self.store.get_config(tenant_id, user_id, environment).await
    }

    /// 설정 삭제. 활성 타이머도 함께 중지됩니다.
    pub async fn delete_config(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        environment: Environment,
    ) -> NavResult<bool> {
        let deleted = self
            .store
            .delete_config(tenant_id, user_id, environment)
            .await?;
        self.stop_timer(&(tenant_id, environment, user_id));

        if deleted {
            tracing::info!(tenant_id = %tenant_id, user_id = %user_id, "스케줄 설정 삭제");
        }
        Ok(deleted)
    }

    /// 상태 조회 (설정 + 타이머 활성 여부 + 최근 이력).
    pub async fn get_status(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        environment: Environment,
    ) -> NavResult<SchedulerStatus> {
        let config = self
            .store
            .get_config(tenant_id, user_id, environment)
            .await?
            .ok_or_else(|| {
                NavError::NotFound("스케줄 설정이 존재하지 않습니다".to_string())
            })?;

        let timer_active = {
            let timers = self.timers.lock().expect("타이머 테이블 mutex poisoned");
            timers.contains_key(&config.timer_key())
        };
        let recent_executions = self.store.recent_executions(config.id, 20).await?;

        Ok(SchedulerStatus {
            config,
            timer_active,
            recent_executions,
        })
    }

    /// 수동 트리거.
    pub async fn manual_trigger(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        environment: Environment,
    ) -> NavResult<ScheduleExecution> {
        let config = self
            .store
            .get_config(tenant_id, user_id, environment)
            .await?
            .ok_or_else(|| {
                NavError::NotFound("스케줄 설정이 존재하지 않습니다".to_string())
            })?;

        self.execute(config.id, TriggerSource::Manual).await
    }

    /// 스케줄 실행 (fire).
    ///
    /// 실행 이력 row를 만들고 외부 워크플로우를 호출한 뒤, 결과와
    /// 소요 시간을 기록합니다. 실패는 failure_count만 증가시키며
    /// 스케줄은 활성 상태로 유지됩니다.
    pub async fn execute(
        &self,
        config_id: Uuid,
        trigger_source: TriggerSource,
    ) -> NavResult<ScheduleExecution> {
        let started = Instant::now();

        let config = self
            .store
            .get_config_by_id(config_id)
            .await?
            .ok_or_else(|| NavError::NotFound(format!("스케줄 설정 없음: {}", config_id)))?;

        if !config.enabled {
            self.store
                .record_skipped(config_id, trigger_source, "설정이 비활성화됨")
                .await?;
            return Err(NavError::Conflict(
                "비활성화된 스케줄은 실행할 수 없습니다".to_string(),
            ));
        }

        let execution = self.store.insert_execution(config_id, trigger_source).await?;
        let next_execution_at =
            cron_util::next_fire(&config.cron_expression, &config.timezone, Utc::now())
                .ok()
                .flatten();

        let result = self.fire_workflow(&config, trigger_source).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        match result {
            Ok(external_execution_id) => {
                self.store
                    .complete_execution(
                        execution.id,
                        ExecutionStatus::Success,
                        Some(external_execution_id.clone()),
                        None,
                        duration_ms,
                    )
                    .await?;
                self.store
                    .record_fire_result(config_id, true, next_execution_at)
                    .await?;

                tracing::info!(
                    config_id = %config_id,
                    execution_id = %execution.id,
                    external_execution_id = %external_execution_id,
                    trigger_source = trigger_source.as_str(),
                    "스케줄 실행 성공"
                );

                Ok(ScheduleExecution {
                    status: ExecutionStatus::Success,
                    external_execution_id: Some(external_execution_id),
                    duration_ms: Some(duration_ms),
                    ..execution
                })
            }
            Err(e) => {
                self.store
                    .complete_execution(
                        execution.id,
                        ExecutionStatus::Failed,
                        None,
                        Some(e.to_string()),
                        duration_ms,
                    )
                    .await?;
                // 실패해도 스케줄은 비활성화하지 않는다
                self.store
                    .record_fire_result(config_id, false, next_execution_at)
                    .await?;

                tracing::error!(
                    config_id = %config_id,
                    execution_id = %execution.id,
                    error = %e,
                    "스케줄 실행 실패"
                );
                Err(e)
            }
        }
    }

    /// 워크플로우 호출 준비 및 실행.
    async fn fire_workflow(
        &self,
        config: &SchedulerConfig,
        trigger_source: TriggerSource,
    ) -> NavResult<String> {
        let webhook_url = config.webhook_url.clone().ok_or_else(|| {
            NavError::Config(format!(
                "테넌트 webhook URL이 설정되지 않았습니다: {}",
                config.tenant_id
            ))
        })?;

        let payload = WorkflowPayload {
            tenant_id: config.tenant_id,
            user_id: config.user_id,
            is_live: config.environment.is_live(),
            schedule_type: config.schedule_type,
            trigger_source,
            api_callback_url: format!(
                "{}/api/v1/downloads/callback",
                self.settings.callback_base_url.trim_end_matches('/')
            ),
            scheduler_config_id: config.id,
        };

        self.workflow.trigger(&webhook_url, &payload).await
    }

    /// 프로세스 시작 시 활성화된 모든 설정의 타이머를 복원합니다.
    ///
    /// 설정 하나의 활성화 실패는 로그만 남기고 나머지 설정은 계속
    /// 처리합니다.
    pub async fn initialize_all(&self) -> NavResult<usize> {
        let configs = self.store.list_enabled_configs().await?;
        let mut activated = 0;

        for config in configs {
            // 잘못된 cron/타임존이 저장돼 있어도 다른 설정을 막지 않는다
            if let Err(e) =
                cron_util::next_fire(&config.cron_expression, &config.timezone, Utc::now())
            {
                tracing::error!(
                    config_id = %config.id,
                    cron = %config.cron_expression,
                    error = %e,
                    "스케줄 활성화 실패, 건너뜀"
                );
                continue;
            }

            self.stop_timer(&config.timer_key());
            self.start_timer(config);
            activated += 1;
        }

        tracing::info!(activated = activated, "스케줄러 초기화 완료");
        Ok(activated)
    }

    /// 모든 타이머를 중지합니다 (프로세스 종료 시).
    ///
    /// 이미 중지된 타이머가 있어도 안전하며, 여러 번 호출해도 됩니다.
    pub fn shutdown_all(&self) {
        let handles: Vec<TimerHandle> = {
            let mut timers = self.timers.lock().expect("타이머 테이블 mutex poisoned");
            timers.drain().map(|(_, handle)| handle).collect()
        };

        let count = handles.len();
        for handle in handles {
            handle.token.cancel();
            handle.handle.abort();
        }

        if count > 0 {
            tracing::info!(stopped = count, "스케줄러 타이머 전체 중지");
        }
    }

    /// 활성 타이머 수 (관측/테스트용).
    pub fn active_timer_count(&self) -> usize {
        let timers = self.timers.lock().expect("타이머 테이블 mutex poisoned");
        timers.len()
    }

    /// identity의 타이머 시작.
    fn start_timer(&self, config: SchedulerConfig) {
        let key = config.timer_key();
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_timer(self.clone(), config, token.clone()));

        let mut timers = self.timers.lock().expect("타이머 테이블 mutex poisoned");
        if let Some(previous) = timers.insert(key, TimerHandle { token, handle }) {
            previous.token.cancel();
            previous.handle.abort();
        }
    }

    /// identity의 타이머 중지.
    fn stop_timer(&self, key: &TimerKey) {
        let mut timers = self.timers.lock().expect("타이머 테이블 mutex poisoned");
        if let Some(handle) = timers.remove(key) {
            handle.token.cancel();
            handle.handle.abort();
        }
    }
}

/// 타이머 루프.
///
/// 매 반복마다 cron에서 다음 실행 시각을 계산해 그때까지 잠들고,
/// 깨어나면 fire합니다. 취소 토큰으로 중지됩니다. fire 실패는 루프를
/// 멈추지 않습니다.
async fn run_timer(service: SchedulerService, config: SchedulerConfig, token: CancellationToken) {
    loop {
        let next = match cron_util::next_fire(&config.cron_expression, &config.timezone, Utc::now())
        {
            Ok(Some(next)) => next,
            Ok(None) => {
                tracing::warn!(config_id = %config.id, "다음 실행 시각이 없어 타이머 종료");
                break;
            }
            Err(e) => {
                tracing::error!(config_id = %config.id, error = %e, "cron 계산 실패, 타이머 종료");
                break;
            }
        };

        let delay = (next - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);

        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!(config_id = %config.id, "타이머 취소");
                break;
            }
            _ = tokio::time::sleep(delay) => {
                if let Err(e) = service.execute(config.id, TriggerSource::Scheduled).await {
                    // 실패는 이력에 기록되었고, 다음 주기는 계속된다
                    tracing::warn!(config_id = %config.id, error = %e, "예약 실행 실패");
                }
            }
        }
    }
}
