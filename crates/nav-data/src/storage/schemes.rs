//! 스킴 정보 저장소.
//!
//! 테넌트가 추적하는 스킴 목록과 과거 데이터 백필 완료 플래그를
//! 관리합니다.

use std::collections::HashMap;

use nav_core::Environment;
use sqlx::PgPool;
use uuid::Uuid;

/// 스킴 정보 저장소.
pub struct SchemeRepository;

impl SchemeRepository {
    /// 추적 중인(활성) 스킴 코드 목록.
    pub async fn tracked_codes(
        pool: &PgPool,
        tenant_id: Uuid,
        environment: Environment,
    ) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT scheme_code FROM scheme_info
            WHERE tenant_id = $1 AND environment = $2 AND is_active = true
            ORDER BY scheme_code
            "#,
        )
        .bind(tenant_id)
        .bind(environment.as_str())
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(|(code,)| code).collect())
    }

    /// 백필 완료 여부를 스킴별로 반환합니다.
    ///
    /// 등록되지 않은 스킴은 미완료로 취급합니다.
    pub async fn backfill_completed(
        pool: &PgPool,
        tenant_id: Uuid,
        environment: Environment,
        scheme_codes: &[String],
    ) -> Result<HashMap<String, bool>, sqlx::Error> {
        let rows: Vec<(String, bool)> = sqlx::query_as(
            r#"
            SELECT scheme_code, historical_synced FROM scheme_info
            WHERE tenant_id = $1 AND environment = $2 AND scheme_code = ANY($3)
            "#,
        )
        .bind(tenant_id)
        .bind(environment.as_str())
        .bind(scheme_codes)
        .fetch_all(pool)
        .await?;

        let synced: HashMap<String, bool> = rows.into_iter().collect();

        Ok(scheme_codes
            .iter()
            .map(|code| (code.clone(), synced.get(code).copied().unwrap_or(false)))
            .collect())
    }

    /// 스킴들의 백필 완료 플래그를 설정합니다.
    ///
    /// 등록되지 않은 스킴은 코드만으로 등록한 뒤 플래그를 세웁니다.
    pub async fn mark_backfill_complete(
        pool: &PgPool,
        tenant_id: Uuid,
        environment: Environment,
        scheme_codes: &[String],
    ) -> Result<(), sqlx::Error> {
        for code in scheme_codes {
            sqlx::query(
                r#"
                INSERT INTO scheme_info (
                    tenant_id, environment, scheme_code, scheme_name,
                    is_active, historical_synced
                )
                VALUES ($1, $2, $3, $3, true, true)
                ON CONFLICT (tenant_id, environment, scheme_code)
                DO UPDATE SET historical_synced = true, updated_at = NOW()
                "#,
            )
            .bind(tenant_id)
            .bind(environment.as_str())
            .bind(code)
            .execute(pool)
            .await?;
        }

        Ok(())
    }
}
