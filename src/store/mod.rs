pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::credential::{Category, CredentialRecord};
use crate::models::mapping::{FunctionMapping, NewMapping};
use crate::models::rate_limit::RateLimit;
use crate::models::usage::UsageLogEntry;

/// Persistence for the four registry tables plus the category → primary pointer.
/// Implementations: `PgStore` (PostgreSQL), `MemoryStore` (single-lock, in-process).
#[async_trait]
pub trait RegistryStore: Send + Sync {
    // -- Credentials --

    async fn get_credential(&self, id: Uuid) -> anyhow::Result<Option<CredentialRecord>>;

    async fn find_credential(
        &self,
        service_name: &str,
        category: Category,
    ) -> anyhow::Result<Option<CredentialRecord>>;

    /// Insert or replace the credential keyed by (service_name, category).
    /// Returns the stored row; `id` and `created_at` are kept on replace.
    async fn save_credential(&self, cred: &CredentialRecord) -> anyhow::Result<CredentialRecord>;

    /// Returns false when the id does not exist.
    async fn set_credential_active(&self, id: Uuid, is_active: bool) -> anyhow::Result<bool>;

    /// Deletes the credential and any primary pointer to it.
    async fn delete_credential(&self, id: Uuid) -> anyhow::Result<bool>;

    async fn list_credentials(&self) -> anyhow::Result<Vec<CredentialRecord>>;

    /// All credentials whose service name matches case-insensitively.
    async fn credentials_for_service(&self, service_name: &str) -> anyhow::Result<Vec<CredentialRecord>>;

    /// Atomically point `category` at `credential_id`. Returns false when the
    /// credential does not exist.
    async fn set_primary(&self, credential_id: Uuid, category: Category) -> anyhow::Result<bool>;

    async fn primaries(&self) -> anyhow::Result<HashMap<Category, Uuid>>;

    // -- Function mappings --

    async fn get_mapping(&self, function_name: &str) -> anyhow::Result<Option<FunctionMapping>>;

    async fn upsert_mapping(&self, mapping: &NewMapping) -> anyhow::Result<FunctionMapping>;

    async fn delete_mapping(&self, id: Uuid) -> anyhow::Result<bool>;

    async fn list_mappings(&self) -> anyhow::Result<Vec<FunctionMapping>>;

    // -- Rate limits --

    async fn get_rate_limit(&self, service_name: &str) -> anyhow::Result<Option<RateLimit>>;

    async fn upsert_rate_limit(
        &self,
        service_name: &str,
        request_limit: i64,
        reset_date: NaiveDate,
    ) -> anyhow::Result<RateLimit>;

    /// Adds `count` to requests_used. Returns None when the service has no limit row.
    async fn increment_rate_limit(&self, service_name: &str, count: i64) -> anyhow::Result<Option<RateLimit>>;

    /// Zeroes requests_used and sets the next reset date.
    async fn reset_rate_limit(
        &self,
        service_name: &str,
        next_reset: NaiveDate,
    ) -> anyhow::Result<Option<RateLimit>>;

    async fn list_rate_limits(&self) -> anyhow::Result<Vec<RateLimit>>;

    // -- Usage logs --

    async fn insert_usage_log(&self, entry: &UsageLogEntry) -> anyhow::Result<()>;

    async fn list_usage_logs(&self, since: Option<DateTime<Utc>>) -> anyhow::Result<Vec<UsageLogEntry>>;
}
