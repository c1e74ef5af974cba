//! NAV 가격 저장소.
//!
//! (테넌트, 스킴, 기준일, 환경)을 고유 키로 하는 가격 테이블에 대한
//! upsert와 존재 여부 조회를 제공합니다.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use nav_core::{Environment, NavRecord, SchemeError, UpsertStats};
use sqlx::PgPool;
use uuid::Uuid;

/// NAV 가격 저장소.
pub struct NavPriceRepository;

impl NavPriceRepository {
    /// 레코드 하나를 upsert 합니다.
    ///
    /// 반환값은 신규 삽입 여부입니다 (false면 갱신).
    pub async fn upsert(
        pool: &PgPool,
        tenant_id: Uuid,
        environment: Environment,
        record: &NavRecord,
    ) -> Result<bool, sqlx::Error> {
        // xmax = 0 이면 이 트랜잭션에서 새로 삽입된 row
        sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO nav_prices (
                tenant_id, environment, scheme_code, scheme_name,
                isin_growth, isin_div_reinvestment, nav, nav_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tenant_id, scheme_code, nav_date, environment)
            DO UPDATE SET
                nav = EXCLUDED.nav,
                scheme_name = EXCLUDED.scheme_name,
                isin_growth = COALESCE(EXCLUDED.isin_growth, nav_prices.isin_growth),
                isin_div_reinvestment =
                    COALESCE(EXCLUDED.isin_div_reinvestment, nav_prices.isin_div_reinvestment),
                updated_at = NOW()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(tenant_id)
        .bind(environment.as_str())
        .bind(&record.scheme_code)
        .bind(&record.scheme_name)
        .bind(&record.isin_growth)
        .bind(&record.isin_div_reinvestment)
        .bind(record.nav)
        .bind(record.date)
        .fetch_one(pool)
        .await
    }

    /// 레코드 배치를 upsert 하고 레코드 단위 통계를 집계합니다.
    ///
    /// 개별 레코드 실패는 스킴 오류로 기록하고 다음 레코드로 진행합니다.
    pub async fn upsert_batch(
        pool: &PgPool,
        tenant_id: Uuid,
        environment: Environment,
        records: &[NavRecord],
    ) -> UpsertStats {
        let mut stats = UpsertStats::default();

        for record in records {
            match Self::upsert(pool, tenant_id, environment, record).await {
                Ok(true) => stats.inserted += 1,
                Ok(false) => stats.updated += 1,
                Err(e) => {
                    stats.failed += 1;
                    stats.errors.push(SchemeError {
                        scheme_code: record.scheme_code.clone(),
                        message: e.to_string(),
                    });
                    tracing::warn!(
                        scheme_code = %record.scheme_code,
                        nav_date = %record.date,
                        error = %e,
                        "NAV upsert 실패"
                    );
                }
            }
        }

        stats
    }

    /// 지정 날짜의 가격 존재 여부를 스킴별로 반환합니다.
    pub async fn exists_for_date(
        pool: &PgPool,
        tenant_id: Uuid,
        environment: Environment,
        scheme_codes: &[String],
        date: NaiveDate,
    ) -> Result<HashMap<String, bool>, sqlx::Error> {
        let existing: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT scheme_code FROM nav_prices
            WHERE tenant_id = $1
              AND environment = $2
              AND nav_date = $3
              AND scheme_code = ANY($4)
            "#,
        )
        .bind(tenant_id)
        .bind(environment.as_str())
        .bind(date)
        .bind(scheme_codes)
        .fetch_all(pool)
        .await?;

        let existing: HashSet<String> = existing.into_iter().map(|(code,)| code).collect();

        Ok(scheme_codes
            .iter()
            .map(|code| (code.clone(), existing.contains(code)))
            .collect())
    }
}
