//! In-process store. Every operation takes the single state lock, so
//! multi-row changes such as primary reassignment are observed atomically.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::RegistryStore;
use crate::models::credential::{Category, CredentialRecord, CredentialStatus};
use crate::models::mapping::{FunctionMapping, NewMapping};
use crate::models::rate_limit::RateLimit;
use crate::models::usage::UsageLogEntry;

#[derive(Default)]
struct State {
    credentials: HashMap<Uuid, CredentialRecord>,
    primaries: HashMap<Category, Uuid>,
    mappings: HashMap<Uuid, FunctionMapping>,
    /// Keyed by lowercased service name.
    rate_limits: HashMap<String, RateLimit>,
    usage_logs: Vec<UsageLogEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn same_service(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn get_credential(&self, id: Uuid) -> anyhow::Result<Option<CredentialRecord>> {
        Ok(self.state.read().await.credentials.get(&id).cloned())
    }

    async fn find_credential(
        &self,
        service_name: &str,
        category: Category,
    ) -> anyhow::Result<Option<CredentialRecord>> {
        let state = self.state.read().await;
        Ok(state
            .credentials
            .values()
            .find(|c| c.category == category && same_service(&c.service_name, service_name))
            .cloned())
    }

    async fn save_credential(&self, cred: &CredentialRecord) -> anyhow::Result<CredentialRecord> {
        let mut state = self.state.write().await;
        let existing = state
            .credentials
            .values()
            .find(|c| c.category == cred.category && same_service(&c.service_name, &cred.service_name))
            .map(|c| (c.id, c.created_at));

        let mut stored = cred.clone();
        if let Some((id, created_at)) = existing {
            stored.id = id;
            stored.created_at = created_at;
        }
        state.credentials.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn set_credential_active(&self, id: Uuid, is_active: bool) -> anyhow::Result<bool> {
        let mut state = self.state.write().await;
        match state.credentials.get_mut(&id) {
            Some(cred) => {
                cred.is_active = is_active;
                cred.status = CredentialStatus::derive(&cred.validation_errors, is_active);
                cred.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_credential(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut state = self.state.write().await;
        let removed = state.credentials.remove(&id).is_some();
        state.primaries.retain(|_, primary| *primary != id);
        Ok(removed)
    }

    async fn list_credentials(&self) -> anyhow::Result<Vec<CredentialRecord>> {
        let state = self.state.read().await;
        let mut creds: Vec<_> = state.credentials.values().cloned().collect();
        creds.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then_with(|| a.service_name.to_lowercase().cmp(&b.service_name.to_lowercase()))
        });
        Ok(creds)
    }

    async fn credentials_for_service(&self, service_name: &str) -> anyhow::Result<Vec<CredentialRecord>> {
        let state = self.state.read().await;
        Ok(state
            .credentials
            .values()
            .filter(|c| same_service(&c.service_name, service_name))
            .cloned()
            .collect())
    }

    async fn set_primary(&self, credential_id: Uuid, category: Category) -> anyhow::Result<bool> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        match state.credentials.get_mut(&credential_id) {
            Some(cred) => {
                cred.updated_at = Utc::now();
                state.primaries.insert(category, credential_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn primaries(&self) -> anyhow::Result<HashMap<Category, Uuid>> {
        Ok(self.state.read().await.primaries.clone())
    }

    async fn get_mapping(&self, function_name: &str) -> anyhow::Result<Option<FunctionMapping>> {
        let state = self.state.read().await;
        Ok(state
            .mappings
            .values()
            .find(|m| m.function_name == function_name)
            .cloned())
    }

    async fn upsert_mapping(&self, mapping: &NewMapping) -> anyhow::Result<FunctionMapping> {
        let mut state = self.state.write().await;
        let id = state
            .mappings
            .values()
            .find(|m| m.function_name == mapping.function_name)
            .map(|m| m.id)
            .unwrap_or_else(Uuid::new_v4);

        let row = FunctionMapping {
            id,
            function_name: mapping.function_name.clone(),
            preferred_service: mapping.preferred_service.clone(),
            fallback_service: mapping.fallback_service.clone(),
            description: mapping.description.clone(),
            updated_at: Utc::now(),
        };
        state.mappings.insert(id, row.clone());
        Ok(row)
    }

    async fn delete_mapping(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.state.write().await.mappings.remove(&id).is_some())
    }

    async fn list_mappings(&self) -> anyhow::Result<Vec<FunctionMapping>> {
        let state = self.state.read().await;
        let mut rows: Vec<_> = state.mappings.values().cloned().collect();
        rows.sort_by(|a, b| a.function_name.cmp(&b.function_name));
        Ok(rows)
    }

    async fn get_rate_limit(&self, service_name: &str) -> anyhow::Result<Option<RateLimit>> {
        let state = self.state.read().await;
        Ok(state.rate_limits.get(&service_name.to_lowercase()).cloned())
    }

    async fn upsert_rate_limit(
        &self,
        service_name: &str,
        request_limit: i64,
        reset_date: NaiveDate,
    ) -> anyhow::Result<RateLimit> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let row = state
            .rate_limits
            .entry(service_name.to_lowercase())
            .and_modify(|r| {
                r.request_limit = request_limit;
                r.reset_date = reset_date;
                r.updated_at = now;
            })
            .or_insert_with(|| RateLimit {
                id: Uuid::new_v4(),
                service_name: service_name.to_string(),
                requests_used: 0,
                request_limit,
                reset_date,
                created_at: now,
                updated_at: now,
            });
        Ok(row.clone())
    }

    async fn increment_rate_limit(&self, service_name: &str, count: i64) -> anyhow::Result<Option<RateLimit>> {
        let mut state = self.state.write().await;
        Ok(state
            .rate_limits
            .get_mut(&service_name.to_lowercase())
            .map(|r| {
                r.requests_used = r.requests_used.saturating_add(count);
                r.updated_at = Utc::now();
                r.clone()
            }))
    }

    async fn reset_rate_limit(
        &self,
        service_name: &str,
        next_reset: NaiveDate,
    ) -> anyhow::Result<Option<RateLimit>> {
        let mut state = self.state.write().await;
        Ok(state
            .rate_limits
            .get_mut(&service_name.to_lowercase())
            .map(|r| {
                r.requests_used = 0;
                r.reset_date = next_reset;
                r.updated_at = Utc::now();
                r.clone()
            }))
    }

    async fn list_rate_limits(&self) -> anyhow::Result<Vec<RateLimit>> {
        let state = self.state.read().await;
        let mut rows: Vec<_> = state.rate_limits.values().cloned().collect();
        rows.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        Ok(rows)
    }

    async fn insert_usage_log(&self, entry: &UsageLogEntry) -> anyhow::Result<()> {
        self.state.write().await.usage_logs.push(entry.clone());
        Ok(())
    }

    async fn list_usage_logs(&self, since: Option<DateTime<Utc>>) -> anyhow::Result<Vec<UsageLogEntry>> {
        let state = self.state.read().await;
        Ok(state
            .usage_logs
            .iter()
            .filter(|e| since.map_or(true, |s| e.created_at >= s))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(service: &str, category: Category) -> CredentialRecord {
        let now = Utc::now();
        CredentialRecord {
            id: Uuid::new_v4(),
            service_name: service.into(),
            category,
            sealed_key: "{}".into(),
            key_fingerprint: "abc".into(),
            base_url: None,
            is_active: true,
            status: CredentialStatus::Active,
            validation_errors: vec![],
            last_validated: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_save_credential_replaces_by_service_and_category() {
        let store = MemoryStore::new();
        let first = store
            .save_credential(&record("OpenAI", Category::TextGeneration))
            .await
            .unwrap();
        let mut second = record("openai", Category::TextGeneration);
        second.key_fingerprint = "def".into();
        let saved = store.save_credential(&second).await.unwrap();

        assert_eq!(saved.id, first.id);
        assert_eq!(saved.created_at, first.created_at);
        let all = store.list_credentials().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key_fingerprint, "def");
    }

    #[tokio::test]
    async fn test_delete_clears_primary_pointer() {
        let store = MemoryStore::new();
        let cred = store
            .save_credential(&record("OpenAI", Category::TextGeneration))
            .await
            .unwrap();
        assert!(store.set_primary(cred.id, Category::TextGeneration).await.unwrap());
        assert!(store.delete_credential(cred.id).await.unwrap());
        assert!(store.primaries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_primary_unknown_id() {
        let store = MemoryStore::new();
        assert!(!store.set_primary(Uuid::new_v4(), Category::Research).await.unwrap());
    }

    #[tokio::test]
    async fn test_rate_limit_lookup_is_case_insensitive() {
        let store = MemoryStore::new();
        let today = Utc::now().date_naive();
        store.upsert_rate_limit("ElevenLabs", 100, today).await.unwrap();
        let row = store.increment_rate_limit("elevenlabs", 3).await.unwrap().unwrap();
        assert_eq!(row.requests_used, 3);
        assert_eq!(row.service_name, "ElevenLabs");
        assert!(store.increment_rate_limit("Unknown", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_increment_saturates_instead_of_wrapping() {
        let store = MemoryStore::new();
        let today = Utc::now().date_naive();
        store.upsert_rate_limit("OpenAI", 10, today).await.unwrap();
        store.increment_rate_limit("OpenAI", i64::MAX).await.unwrap();
        let row = store.increment_rate_limit("OpenAI", i64::MAX).await.unwrap().unwrap();
        assert_eq!(row.requests_used, i64::MAX);
        assert!(row.is_exhausted());
    }
}
