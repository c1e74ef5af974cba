//! 외부 워크플로우 트리거.
//!
//! 스케줄 fire 시 실제 처리는 외부 자동화 시스템에 위임됩니다. 이 모듈은
//! 테넌트별 webhook URL로 JSON 페이로드를 POST하고 실행 id를 돌려받는
//! 계약만을 다룹니다. 비 2xx 응답이나 형식이 다른 본문은 실패입니다.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use nav_core::{FetchErrorKind, FetchFailure, NavResult, ScheduleType, TriggerSource};

/// 워크플로우 호출 페이로드.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowPayload {
    /// 테넌트 id
    pub tenant_id: Uuid,
    /// 사용자 id
    pub user_id: Uuid,
    /// 운영 환경 여부
    pub is_live: bool,
    /// 스케줄 유형
    pub schedule_type: ScheduleType,
    /// 트리거 출처 (scheduled | manual)
    pub trigger_source: TriggerSource,
    /// 결과 콜백 URL (deprecated 경로, 폴링이 기준)
    pub api_callback_url: String,
    /// 스케줄러 설정 id
    pub scheduler_config_id: Uuid,
}

/// 워크플로우 응답.
#[derive(Debug, Deserialize)]
struct WorkflowResponse {
    #[serde(rename = "executionId")]
    execution_id: String,
}

/// 외부 워크플로우 트리거 trait.
///
/// 성공 시 외부 실행 id를 반환합니다.
#[async_trait]
pub trait WorkflowTrigger: Send + Sync {
    /// webhook 호출.
    async fn trigger(&self, webhook_url: &str, payload: &WorkflowPayload) -> NavResult<String>;
}

/// reqwest 기반 워크플로우 클라이언트.
pub struct HttpWorkflowClient {
    client: reqwest::Client,
}

impl HttpWorkflowClient {
    /// 새 클라이언트 생성.
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl WorkflowTrigger for HttpWorkflowClient {
    async fn trigger(&self, webhook_url: &str, payload: &WorkflowPayload) -> NavResult<String> {
        tracing::debug!(
            webhook_url = webhook_url,
            tenant_id = %payload.tenant_id,
            trigger_source = payload.trigger_source.as_str(),
            "워크플로우 트리거 호출"
        );

        let response = self
            .client
            .post(webhook_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    FetchErrorKind::Timeout
                } else {
                    FetchErrorKind::Network
                };
                FetchFailure::new(kind, "workflow", e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::new(
                FetchErrorKind::Http,
                "workflow",
                format!("HTTP {}", status.as_u16()),
            )
            .into());
        }

        let parsed: WorkflowResponse = response.json().await.map_err(|e| {
            FetchFailure::new(
                FetchErrorKind::Parse,
                "workflow",
                format!("응답 형식 오류: {}", e),
            )
        })?;

        Ok(parsed.execution_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_field_names_match_contract() {
        let payload = WorkflowPayload {
            tenant_id: Uuid::nil(),
            user_id: Uuid::nil(),
            is_live: true,
            schedule_type: ScheduleType::Daily,
            trigger_source: TriggerSource::Manual,
            api_callback_url: "http://localhost:3000/api/v1/downloads/callback".to_string(),
            scheduler_config_id: Uuid::nil(),
        };

        let value = serde_json::to_value(&payload).unwrap();
        let object = value.as_object().unwrap();

        for key in [
            "tenant_id",
            "user_id",
            "is_live",
            "schedule_type",
            "trigger_source",
            "api_callback_url",
            "scheduler_config_id",
        ] {
            assert!(object.contains_key(key), "누락된 필드: {}", key);
        }
        assert_eq!(object["schedule_type"], "daily");
        assert_eq!(object["trigger_source"], "manual");
    }

    #[test]
    fn test_response_parses_execution_id() {
        let parsed: WorkflowResponse =
            serde_json::from_str(r#"{"executionId": "wf-12345"}"#).unwrap();
        assert_eq!(parsed.execution_id, "wf-12345");

        // 형식이 다른 본문은 실패
        assert!(serde_json::from_str::<WorkflowResponse>(r#"{"id": "x"}"#).is_err());
    }
}
