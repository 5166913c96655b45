use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::RegistryStore;
use crate::models::credential::{Category, CredentialRecord, CredentialStatus};
use crate::models::mapping::{FunctionMapping, NewMapping};
use crate::models::rate_limit::RateLimit;
use crate::models::usage::UsageLogEntry;

const CREDENTIAL_COLUMNS: &str = "id, service_name, category, sealed_key, key_fingerprint, base_url, \
     is_active, status, validation_errors, last_validated, created_at, updated_at";

const RATE_LIMIT_COLUMNS: &str =
    "id, service_name, requests_used, request_limit, reset_date, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for PgStore {
    // -- Credential Operations --

    async fn get_credential(&self, id: Uuid) -> anyhow::Result<Option<CredentialRecord>> {
        let row = sqlx::query_as::<_, CredentialRow>(&format!(
            "SELECT {} FROM credentials WHERE id = $1",
            CREDENTIAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_credential(
        &self,
        service_name: &str,
        category: Category,
    ) -> anyhow::Result<Option<CredentialRecord>> {
        let row = sqlx::query_as::<_, CredentialRow>(&format!(
            "SELECT {} FROM credentials WHERE lower(service_name) = lower($1) AND category = $2",
            CREDENTIAL_COLUMNS
        ))
        .bind(service_name)
        .bind(category.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn save_credential(&self, cred: &CredentialRecord) -> anyhow::Result<CredentialRecord> {
        let row = sqlx::query_as::<_, CredentialRow>(&format!(
            r#"INSERT INTO credentials (id, service_name, category, sealed_key, key_fingerprint, base_url,
                                        is_active, status, validation_errors, last_validated, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
               ON CONFLICT (lower(service_name), category) DO UPDATE
                 SET sealed_key = EXCLUDED.sealed_key,
                     key_fingerprint = EXCLUDED.key_fingerprint,
                     base_url = EXCLUDED.base_url,
                     is_active = EXCLUDED.is_active,
                     status = EXCLUDED.status,
                     validation_errors = EXCLUDED.validation_errors,
                     last_validated = EXCLUDED.last_validated,
                     updated_at = EXCLUDED.updated_at
               RETURNING {}"#,
            CREDENTIAL_COLUMNS
        ))
        .bind(cred.id)
        .bind(&cred.service_name)
        .bind(cred.category.as_str())
        .bind(&cred.sealed_key)
        .bind(&cred.key_fingerprint)
        .bind(&cred.base_url)
        .bind(cred.is_active)
        .bind(cred.status.as_str())
        .bind(&cred.validation_errors)
        .bind(cred.last_validated)
        .bind(cred.created_at)
        .bind(cred.updated_at)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn set_credential_active(&self, id: Uuid, is_active: bool) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"UPDATE credentials
               SET is_active = $2,
                   status = CASE
                       WHEN cardinality(validation_errors) > 0 THEN 'invalid'
                       WHEN $2 THEN 'active'
                       ELSE 'disabled'
                   END,
                   updated_at = NOW()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(is_active)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_credential(&self, id: Uuid) -> anyhow::Result<bool> {
        // category_primaries rows go with it (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM credentials WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_credentials(&self) -> anyhow::Result<Vec<CredentialRecord>> {
        let rows = sqlx::query_as::<_, CredentialRow>(&format!(
            "SELECT {} FROM credentials ORDER BY category ASC, lower(service_name) ASC",
            CREDENTIAL_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn credentials_for_service(&self, service_name: &str) -> anyhow::Result<Vec<CredentialRecord>> {
        let rows = sqlx::query_as::<_, CredentialRow>(&format!(
            "SELECT {} FROM credentials WHERE lower(service_name) = lower($1)",
            CREDENTIAL_COLUMNS
        ))
        .bind(service_name)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn set_primary(&self, credential_id: Uuid, category: Category) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Lock the target row so a concurrent delete cannot orphan the pointer.
        let exists = sqlx::query_scalar::<_, Uuid>("SELECT id FROM credentials WHERE id = $1 FOR UPDATE")
            .bind(credential_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"INSERT INTO category_primaries (category, credential_id, updated_at)
               VALUES ($1, $2, NOW())
               ON CONFLICT (category) DO UPDATE
                 SET credential_id = EXCLUDED.credential_id,
                     updated_at = NOW()"#,
        )
        .bind(category.as_str())
        .bind(credential_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE credentials SET updated_at = NOW() WHERE id = $1")
            .bind(credential_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn primaries(&self) -> anyhow::Result<HashMap<Category, Uuid>> {
        let rows = sqlx::query_as::<_, (String, Uuid)>(
            "SELECT category, credential_id FROM category_primaries",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut primaries = HashMap::new();
        for (category, id) in rows {
            let category: Category = category.parse().map_err(anyhow::Error::msg)?;
            primaries.insert(category, id);
        }
        Ok(primaries)
    }

    // -- Function Mapping Operations --

    async fn get_mapping(&self, function_name: &str) -> anyhow::Result<Option<FunctionMapping>> {
        let row = sqlx::query_as::<_, FunctionMapping>(
            r#"SELECT id, function_name, preferred_service, fallback_service, description, updated_at
               FROM function_mappings WHERE function_name = $1"#,
        )
        .bind(function_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn upsert_mapping(&self, mapping: &NewMapping) -> anyhow::Result<FunctionMapping> {
        let row = sqlx::query_as::<_, FunctionMapping>(
            r#"INSERT INTO function_mappings (function_name, preferred_service, fallback_service, description)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (function_name) DO UPDATE
                 SET preferred_service = EXCLUDED.preferred_service,
                     fallback_service = EXCLUDED.fallback_service,
                     description = EXCLUDED.description,
                     updated_at = NOW()
               RETURNING id, function_name, preferred_service, fallback_service, description, updated_at"#,
        )
        .bind(&mapping.function_name)
        .bind(&mapping.preferred_service)
        .bind(&mapping.fallback_service)
        .bind(&mapping.description)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_mapping(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM function_mappings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_mappings(&self) -> anyhow::Result<Vec<FunctionMapping>> {
        let rows = sqlx::query_as::<_, FunctionMapping>(
            r#"SELECT id, function_name, preferred_service, fallback_service, description, updated_at
               FROM function_mappings ORDER BY function_name ASC"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -- Rate Limit Operations --

    async fn get_rate_limit(&self, service_name: &str) -> anyhow::Result<Option<RateLimit>> {
        let row = sqlx::query_as::<_, RateLimit>(&format!(
            "SELECT {} FROM rate_limits WHERE lower(service_name) = lower($1)",
            RATE_LIMIT_COLUMNS
        ))
        .bind(service_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn upsert_rate_limit(
        &self,
        service_name: &str,
        request_limit: i64,
        reset_date: NaiveDate,
    ) -> anyhow::Result<RateLimit> {
        let row = sqlx::query_as::<_, RateLimit>(&format!(
            r#"INSERT INTO rate_limits (service_name, request_limit, reset_date)
               VALUES ($1, $2, $3)
               ON CONFLICT (lower(service_name)) DO UPDATE
                 SET request_limit = EXCLUDED.request_limit,
                     reset_date = EXCLUDED.reset_date,
                     updated_at = NOW()
               RETURNING {}"#,
            RATE_LIMIT_COLUMNS
        ))
        .bind(service_name)
        .bind(request_limit)
        .bind(reset_date)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn increment_rate_limit(&self, service_name: &str, count: i64) -> anyhow::Result<Option<RateLimit>> {
        let row = sqlx::query_as::<_, RateLimit>(&format!(
            r#"UPDATE rate_limits
               SET requests_used = CASE
                       WHEN requests_used > 9223372036854775807 - $2 THEN 9223372036854775807
                       ELSE requests_used + $2
                   END,
                   updated_at = NOW()
               WHERE lower(service_name) = lower($1)
               RETURNING {}"#,
            RATE_LIMIT_COLUMNS
        ))
        .bind(service_name)
        .bind(count)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn reset_rate_limit(
        &self,
        service_name: &str,
        next_reset: NaiveDate,
    ) -> anyhow::Result<Option<RateLimit>> {
        let row = sqlx::query_as::<_, RateLimit>(&format!(
            r#"UPDATE rate_limits
               SET requests_used = 0, reset_date = $2, updated_at = NOW()
               WHERE lower(service_name) = lower($1)
               RETURNING {}"#,
            RATE_LIMIT_COLUMNS
        ))
        .bind(service_name)
        .bind(next_reset)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_rate_limits(&self) -> anyhow::Result<Vec<RateLimit>> {
        let rows = sqlx::query_as::<_, RateLimit>(&format!(
            "SELECT {} FROM rate_limits ORDER BY service_name ASC",
            RATE_LIMIT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -- Usage Log Operations --

    async fn insert_usage_log(&self, entry: &UsageLogEntry) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO usage_logs (id, service_name, category, function_name, success,
                                       error_message, response_time_ms, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(entry.id)
        .bind(&entry.service_name)
        .bind(&entry.category)
        .bind(&entry.function_name)
        .bind(entry.success)
        .bind(&entry.error_message)
        .bind(entry.response_time_ms)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_usage_logs(&self, since: Option<DateTime<Utc>>) -> anyhow::Result<Vec<UsageLogEntry>> {
        let rows = sqlx::query_as::<_, UsageLogEntry>(
            r#"SELECT id, service_name, category, function_name, success, error_message,
                      response_time_ms, created_at
               FROM usage_logs
               WHERE $1::timestamptz IS NULL OR created_at >= $1
               ORDER BY created_at ASC"#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    service_name: String,
    category: String,
    sealed_key: String,
    key_fingerprint: String,
    base_url: Option<String>,
    is_active: bool,
    status: String,
    validation_errors: Vec<String>,
    last_validated: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CredentialRow> for CredentialRecord {
    type Error = anyhow::Error;

    fn try_from(row: CredentialRow) -> anyhow::Result<Self> {
        Ok(CredentialRecord {
            id: row.id,
            service_name: row.service_name,
            category: row.category.parse().map_err(anyhow::Error::msg)?,
            sealed_key: row.sealed_key,
            key_fingerprint: row.key_fingerprint,
            base_url: row.base_url,
            is_active: row.is_active,
            status: CredentialStatus::parse(&row.status),
            validation_errors: row.validation_errors,
            last_validated: row.last_validated,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
