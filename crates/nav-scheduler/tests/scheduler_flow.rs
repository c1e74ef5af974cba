//! 스케줄러 서비스 통합 테스트.
//!
//! 인메모리 저장소와 모의 워크플로우 트리거를 주입해 설정 저장 →
//! 타이머 관리 → fire → 이력 기록 흐름을 검증합니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use nav_core::{
    Environment, ExecutionStatus, FetchErrorKind, FetchFailure, NavError, NavResult,
    NewSchedulerConfig, ScheduleExecution, ScheduleType, SchedulerConfig, SchedulerSettings,
    SchedulerStore, TriggerSource,
};
use nav_scheduler::{SaveConfigInput, SchedulerService, WorkflowPayload, WorkflowTrigger};

// =============================================================================
// 테스트 더블
// =============================================================================

#[derive(Default)]
struct MemorySchedulerStore {
    configs: Mutex<HashMap<Uuid, SchedulerConfig>>,
    executions: Mutex<Vec<ScheduleExecution>>,
}

impl MemorySchedulerStore {
    fn execution_statuses(&self) -> Vec<ExecutionStatus> {
        self.executions
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.status)
            .collect()
    }

    fn config_snapshot(&self, config_id: Uuid) -> SchedulerConfig {
        self.configs
            .lock()
            .unwrap()
            .get(&config_id)
            .cloned()
            .expect("설정 없음")
    }
}

#[async_trait]
impl SchedulerStore for MemorySchedulerStore {
    async fn upsert_config(&self, new_config: NewSchedulerConfig) -> NavResult<SchedulerConfig> {
        let mut configs = self.configs.lock().unwrap();
        let existing = configs
            .values()
            .find(|c| {
                c.tenant_id == new_config.tenant_id
                    && c.user_id == new_config.user_id
                    && c.environment == new_config.environment
            })
            .cloned();

        let config = match existing {
            Some(mut config) => {
                config.schedule_type = new_config.schedule_type;
                config.cron_expression = new_config.cron_expression;
                config.preferred_time = new_config.preferred_time;
                config.timezone = new_config.timezone;
                config.webhook_url = new_config.webhook_url;
                config.enabled = new_config.enabled;
                config.next_execution_at = new_config.next_execution_at;
                config.updated_at = Utc::now();
                config
            }
            None => SchedulerConfig {
                id: Uuid::new_v4(),
                tenant_id: new_config.tenant_id,
                user_id: new_config.user_id,
                environment: new_config.environment,
                schedule_type: new_config.schedule_type,
                cron_expression: new_config.cron_expression,
                preferred_time: new_config.preferred_time,
                timezone: new_config.timezone,
                webhook_url: new_config.webhook_url,
                enabled: new_config.enabled,
                next_execution_at: new_config.next_execution_at,
                last_executed_at: None,
                execution_count: 0,
                failure_count: 0,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        };

        configs.insert(config.id, config.clone());
        Ok(config)
    }

    async fn get_config(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        environment: Environment,
    ) -> NavResult<Option<SchedulerConfig>> {
        Ok(self
            .configs
            .lock()
            .unwrap()
            .values()
            .find(|c| {
                c.tenant_id == tenant_id && c.user_id == user_id && c.environment == environment
            })
            .cloned())
    }

    async fn get_config_by_id(&self, config_id: Uuid) -> NavResult<Option<SchedulerConfig>> {
        Ok(self.configs.lock().unwrap().get(&config_id).cloned())
    }

    async fn delete_config(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        environment: Environment,
    ) -> NavResult<bool> {
        let mut configs = self.configs.lock().unwrap();
        let id = configs
            .values()
            .find(|c| {
                c.tenant_id == tenant_id && c.user_id == user_id && c.environment == environment
            })
            .map(|c| c.id);
        Ok(match id {
            Some(id) => configs.remove(&id).is_some(),
            None => false,
        })
    }

    async fn list_enabled_configs(&self) -> NavResult<Vec<SchedulerConfig>> {
        Ok(self
            .configs
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.enabled)
            .cloned()
            .collect())
    }

    async fn insert_execution(
        &self,
        config_id: Uuid,
        trigger_source: TriggerSource,
    ) -> NavResult<ScheduleExecution> {
        let execution = ScheduleExecution {
            id: Uuid::new_v4(),
            config_id,
            executed_at: Utc::now(),
            status: ExecutionStatus::Running,
            trigger_source,
            external_execution_id: None,
            error_message: None,
            duration_ms: None,
        };
        self.executions.lock().unwrap().push(execution.clone());
        Ok(execution)
    }

    async fn complete_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        external_execution_id: Option<String>,
        error_message: Option<String>,
        duration_ms: i64,
    ) -> NavResult<()> {
        let mut executions = self.executions.lock().unwrap();
        if let Some(execution) = executions.iter_mut().find(|e| e.id == execution_id) {
            execution.status = status;
            execution.external_execution_id = external_execution_id;
            execution.error_message = error_message;
            execution.duration_ms = Some(duration_ms);
        }
        Ok(())
    }

    async fn record_skipped(
        &self,
        config_id: Uuid,
        trigger_source: TriggerSource,
        reason: &str,
    ) -> NavResult<()> {
        self.executions.lock().unwrap().push(ScheduleExecution {
            id: Uuid::new_v4(),
            config_id,
            executed_at: Utc::now(),
            status: ExecutionStatus::Skipped,
            trigger_source,
            external_execution_id: None,
            error_message: Some(reason.to_string()),
            duration_ms: None,
        });
        Ok(())
    }

    async fn record_fire_result(
        &self,
        config_id: Uuid,
        success: bool,
        next_execution_at: Option<DateTime<Utc>>,
    ) -> NavResult<()> {
        let mut configs = self.configs.lock().unwrap();
        if let Some(config) = configs.get_mut(&config_id) {
            config.last_executed_at = Some(Utc::now());
            config.next_execution_at = next_execution_at;
            config.execution_count += 1;
            if !success {
                config.failure_count += 1;
            }
        }
        Ok(())
    }

    async fn recent_executions(
        &self,
        config_id: Uuid,
        limit: i64,
    ) -> NavResult<Vec<ScheduleExecution>> {
        let executions = self.executions.lock().unwrap();
        Ok(executions
            .iter()
            .filter(|e| e.config_id == config_id)
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find_execution_by_external_id(
        &self,
        external_execution_id: &str,
    ) -> NavResult<Option<ScheduleExecution>> {
        Ok(self
            .executions
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.external_execution_id.as_deref() == Some(external_execution_id))
            .cloned())
    }
}

/// 모의 워크플로우 트리거.
#[derive(Default)]
struct MockWorkflow {
    calls: Mutex<Vec<(String, WorkflowPayload)>>,
    counter: AtomicUsize,
    fail: AtomicBool,
}

#[async_trait]
impl WorkflowTrigger for MockWorkflow {
    async fn trigger(&self, webhook_url: &str, payload: &WorkflowPayload) -> NavResult<String> {
        self.calls
            .lock()
            .unwrap()
            .push((webhook_url.to_string(), payload.clone()));

        if self.fail.load(Ordering::SeqCst) {
            return Err(NavError::ExternalFetch(FetchFailure::new(
                FetchErrorKind::Http,
                "workflow",
                "HTTP 500",
            )));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("wf-{}", n))
    }
}

// =============================================================================
// 헬퍼
// =============================================================================

fn build_service(
    store: Arc<MemorySchedulerStore>,
    workflow: Arc<MockWorkflow>,
) -> SchedulerService {
    SchedulerService::new(store, workflow, SchedulerSettings::default())
}

fn daily_input(tenant_id: Uuid, user_id: Uuid) -> SaveConfigInput {
    SaveConfigInput {
        tenant_id,
        user_id,
        environment: Environment::Live,
        schedule_type: ScheduleType::Daily,
        cron_expression: None,
        preferred_time: None,
        timezone: None,
        webhook_url: Some("http://workflow.example.com/hook".to_string()),
        enabled: true,
    }
}

// =============================================================================
// 시나리오
// =============================================================================

#[tokio::test]
async fn test_save_config_computes_next_execution_and_starts_timer() {
    let store = Arc::new(MemorySchedulerStore::default());
    let service = build_service(store.clone(), Arc::new(MockWorkflow::default()));

    let config = service
        .save_config(daily_input(Uuid::new_v4(), Uuid::new_v4()))
        .await
        .unwrap();

    assert!(config.next_execution_at.is_some());
    assert!(config.next_execution_at.unwrap() > Utc::now());
    assert_eq!(service.active_timer_count(), 1);

    service.shutdown_all();
}

#[tokio::test]
async fn test_invalid_custom_cron_is_rejected_synchronously() {
    let store = Arc::new(MemorySchedulerStore::default());
    let service = build_service(store.clone(), Arc::new(MockWorkflow::default()));

    let mut input = daily_input(Uuid::new_v4(), Uuid::new_v4());
    input.schedule_type = ScheduleType::Custom;
    input.cron_expression = Some("99 99 * * *".to_string());

    let result = service.save_config(input).await;
    assert!(matches!(result, Err(NavError::Validation(_))));
    // 잘못된 설정은 타이머를 만들지 않는다
    assert_eq!(service.active_timer_count(), 0);
}

#[tokio::test]
async fn test_resave_keeps_single_timer_per_identity() {
    let store = Arc::new(MemorySchedulerStore::default());
    let service = build_service(store.clone(), Arc::new(MockWorkflow::default()));

    let tenant_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    let first = service
        .save_config(daily_input(tenant_id, user_id))
        .await
        .unwrap();
    let second = service
        .save_config(daily_input(tenant_id, user_id))
        .await
        .unwrap();

    // identity당 설정도 타이머도 하나
    assert_eq!(first.id, second.id);
    assert_eq!(service.active_timer_count(), 1);

    // 비활성화로 재저장하면 타이머가 내려간다
    let mut disabled = daily_input(tenant_id, user_id);
    disabled.enabled = false;
    service.save_config(disabled).await.unwrap();
    assert_eq!(service.active_timer_count(), 0);

    service.shutdown_all();
}

#[tokio::test]
async fn test_delete_config_stops_timer() {
    let store = Arc::new(MemorySchedulerStore::default());
    let service = build_service(store.clone(), Arc::new(MockWorkflow::default()));

    let tenant_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    service
        .save_config(daily_input(tenant_id, user_id))
        .await
        .unwrap();
    assert_eq!(service.active_timer_count(), 1);

    let deleted = service
        .delete_config(tenant_id, user_id, Environment::Live)
        .await
        .unwrap();
    assert!(deleted);
    assert_eq!(service.active_timer_count(), 0);

    // 없는 설정 삭제는 false
    let missing = service
        .delete_config(tenant_id, user_id, Environment::Live)
        .await
        .unwrap();
    assert!(!missing);
}

#[tokio::test]
async fn test_manual_trigger_records_success_and_counters() {
    let store = Arc::new(MemorySchedulerStore::default());
    let workflow = Arc::new(MockWorkflow::default());
    let service = build_service(store.clone(), workflow.clone());

    let tenant_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let config = service
        .save_config(daily_input(tenant_id, user_id))
        .await
        .unwrap();

    let execution = service
        .manual_trigger(tenant_id, user_id, Environment::Live)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.external_execution_id.as_deref(), Some("wf-0"));
    assert_eq!(execution.trigger_source, TriggerSource::Manual);

    // 페이로드 계약 확인
    let calls = workflow.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let (url, payload) = &calls[0];
    assert_eq!(url, "http://workflow.example.com/hook");
    assert_eq!(payload.tenant_id, tenant_id);
    assert!(payload.is_live);
    assert_eq!(payload.scheduler_config_id, config.id);
    assert!(payload.api_callback_url.ends_with("/api/v1/downloads/callback"));
    drop(calls);

    let updated = store.config_snapshot(config.id);
    assert_eq!(updated.execution_count, 1);
    assert_eq!(updated.failure_count, 0);
    assert!(updated.last_executed_at.is_some());

    service.shutdown_all();
}

#[tokio::test]
async fn test_failed_execution_increments_counter_but_keeps_schedule() {
    let store = Arc::new(MemorySchedulerStore::default());
    let workflow = Arc::new(MockWorkflow::default());
    workflow.fail.store(true, Ordering::SeqCst);
    let service = build_service(store.clone(), workflow.clone());

    let tenant_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let config = service
        .save_config(daily_input(tenant_id, user_id))
        .await
        .unwrap();

    let result = service
        .manual_trigger(tenant_id, user_id, Environment::Live)
        .await;
    assert!(result.is_err());

    let statuses = store.execution_statuses();
    assert_eq!(statuses, vec![ExecutionStatus::Failed]);

    // 실패해도 스케줄은 비활성화되지 않고 타이머도 유지된다
    let updated = store.config_snapshot(config.id);
    assert_eq!(updated.execution_count, 1);
    assert_eq!(updated.failure_count, 1);
    assert!(updated.enabled);
    assert_eq!(service.active_timer_count(), 1);

    service.shutdown_all();
}

#[tokio::test]
async fn test_disabled_config_fire_records_skipped() {
    let store = Arc::new(MemorySchedulerStore::default());
    let service = build_service(store.clone(), Arc::new(MockWorkflow::default()));

    let mut input = daily_input(Uuid::new_v4(), Uuid::new_v4());
    input.enabled = false;
    let config = service.save_config(input).await.unwrap();

    let result = service.execute(config.id, TriggerSource::Scheduled).await;
    assert!(matches!(result, Err(NavError::Conflict(_))));
    assert_eq!(store.execution_statuses(), vec![ExecutionStatus::Skipped]);
}

#[tokio::test]
async fn test_initialize_all_skips_broken_config() {
    let store = Arc::new(MemorySchedulerStore::default());
    let service = build_service(store.clone(), Arc::new(MockWorkflow::default()));

    // 정상 설정 하나
    store
        .upsert_config(NewSchedulerConfig {
            tenant_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            environment: Environment::Live,
            schedule_type: ScheduleType::Daily,
            cron_expression: "0 9 * * *".to_string(),
            preferred_time: None,
            timezone: "Asia/Seoul".to_string(),
            webhook_url: None,
            enabled: true,
            next_execution_at: None,
        })
        .await
        .unwrap();

    // 저장 당시엔 검증을 통과했지만 지금은 깨진 설정 (타임존 오타 가정)
    store
        .upsert_config(NewSchedulerConfig {
            tenant_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            environment: Environment::Live,
            schedule_type: ScheduleType::Custom,
            cron_expression: "0 9 * * *".to_string(),
            preferred_time: None,
            timezone: "Seoul/Asia".to_string(),
            webhook_url: None,
            enabled: true,
            next_execution_at: None,
        })
        .await
        .unwrap();

    let activated = service.initialize_all().await.unwrap();

    // 깨진 설정은 건너뛰고 나머지는 활성화된다
    assert_eq!(activated, 1);
    assert_eq!(service.active_timer_count(), 1);

    service.shutdown_all();
}

#[tokio::test]
async fn test_shutdown_all_is_idempotent() {
    let store = Arc::new(MemorySchedulerStore::default());
    let service = build_service(store.clone(), Arc::new(MockWorkflow::default()));

    service
        .save_config(daily_input(Uuid::new_v4(), Uuid::new_v4()))
        .await
        .unwrap();
    service
        .save_config(daily_input(Uuid::new_v4(), Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(service.active_timer_count(), 2);

    service.shutdown_all();
    assert_eq!(service.active_timer_count(), 0);
    // 두 번째 호출도 안전
    service.shutdown_all();
    assert_eq!(service.active_timer_count(), 0);
}

#[tokio::test]
async fn test_missing_webhook_url_is_recorded_as_failure() {
    let store = Arc::new(MemorySchedulerStore::default());
    let service = build_service(store.clone(), Arc::new(MockWorkflow::default()));

    let tenant_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let mut input = daily_input(tenant_id, user_id);
    input.webhook_url = None;
    let config = service.save_config(input).await.unwrap();

    let result = service
        .manual_trigger(tenant_id, user_id, Environment::Live)
        .await;
    assert!(result.is_err());

    assert_eq!(store.execution_statuses(), vec![ExecutionStatus::Failed]);
    let updated = store.config_snapshot(config.id);
    assert_eq!(updated.failure_count, 1);

    service.shutdown_all();
}
