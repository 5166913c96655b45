use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};

use crate::errors::AppError;
use crate::models::rate_limit::{RateLimit, RateLimitStatus};
use crate::store::RegistryStore;

/// Largest `count` a single `record_usage` call accepts.
pub const MAX_USAGE_INCREMENT: i64 = 1_000_000;

/// Upper bound for the reset period.
const MAX_PERIOD_DAYS: i64 = 3650;

/// Per-service request counters against a limit that resets on a date.
#[derive(Clone)]
pub struct RateLimitLedger {
    store: Arc<dyn RegistryStore>,
    period_days: i64,
    enforce: bool,
}

impl RateLimitLedger {
    pub fn new(store: Arc<dyn RegistryStore>, period_days: i64, enforce: bool) -> Self {
        Self {
            store,
            period_days: period_days.clamp(1, MAX_PERIOD_DAYS),
            enforce,
        }
    }

    fn next_reset(&self, today: NaiveDate) -> NaiveDate {
        today + Duration::days(self.period_days)
    }

    /// Adds `count` requests. Going past the limit is recorded as-is.
    pub async fn record_usage(&self, service_name: &str, count: i64) -> Result<(), AppError> {
        if count <= 0 {
            return Err(AppError::InvalidInput("count must be greater than 0".into()));
        }
        if count > MAX_USAGE_INCREMENT {
            return Err(AppError::InvalidInput(format!(
                "count must be at most {}",
                MAX_USAGE_INCREMENT
            )));
        }
        match self.store.increment_rate_limit(service_name, count).await? {
            Some(row) => {
                if row.status().near_limit {
                    tracing::warn!(
                        service = %row.service_name,
                        used = row.requests_used,
                        limit = row.request_limit,
                        "service is near its rate limit"
                    );
                }
            }
            None => {
                tracing::debug!(service = %service_name, "no rate limit configured, usage not counted");
            }
        }
        Ok(())
    }

    /// Zeroes the counter and moves the reset date one period past today.
    /// Repeating it on the same day yields the same row.
    pub async fn reset(&self, service_name: &str) -> Result<RateLimitStatus, AppError> {
        let today = Utc::now().date_naive();
        let row = self
            .store
            .reset_rate_limit(service_name, self.next_reset(today))
            .await?
            .ok_or(AppError::NotFound("rate limit"))?;
        tracing::info!(service = %row.service_name, reset_date = %row.reset_date, "rate limit reset");
        Ok(row.status())
    }

    pub async fn configure(
        &self,
        service_name: &str,
        request_limit: i64,
        reset_date: Option<NaiveDate>,
    ) -> Result<RateLimitStatus, AppError> {
        let service_name = service_name.trim();
        if service_name.is_empty() {
            return Err(AppError::InvalidInput("service_name must not be empty".into()));
        }
        if request_limit <= 0 {
            return Err(AppError::InvalidInput("request_limit must be greater than 0".into()));
        }

        let reset_date = reset_date.unwrap_or_else(|| self.next_reset(Utc::now().date_naive()));
        let row = self
            .store
            .upsert_rate_limit(service_name, request_limit, reset_date)
            .await?;
        tracing::info!(
            service = %row.service_name,
            limit = row.request_limit,
            reset_date = %row.reset_date,
            "rate limit configured"
        );
        Ok(row.status())
    }

    pub async fn list(&self) -> Result<Vec<RateLimitStatus>, AppError> {
        Ok(self
            .store
            .list_rate_limits()
            .await?
            .iter()
            .map(RateLimit::status)
            .collect())
    }

    /// Dispatch precondition. Services without a limit row always pass.
    pub async fn check(&self, service_name: &str) -> Result<(), AppError> {
        if !self.enforce {
            return Ok(());
        }
        match self.store.get_rate_limit(service_name).await? {
            Some(row) if row.is_exhausted() => Err(AppError::RateLimitExceeded(row.service_name)),
            _ => Ok(()),
        }
    }

    /// Resets every limit whose reset date is on or before `today`.
    /// Returns the services that were rolled over.
    pub async fn rollover_due(&self, today: NaiveDate) -> Result<Vec<String>, AppError> {
        let mut rolled = Vec::new();
        for row in self.store.list_rate_limits().await? {
            if row.reset_date > today {
                continue;
            }
            if let Some(row) = self
                .store
                .reset_rate_limit(&row.service_name, self.next_reset(today))
                .await?
            {
                rolled.push(row.service_name);
            }
        }
        Ok(rolled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn ledger(enforce: bool) -> RateLimitLedger {
        RateLimitLedger::new(Arc::new(MemoryStore::new()), 30, enforce)
    }

    #[tokio::test]
    async fn test_record_usage_without_row_is_noop() {
        let l = ledger(true);
        l.record_usage("OpenAI", 1).await.unwrap();
        assert!(l.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_usage_allows_overflow() {
        let l = ledger(true);
        l.configure("OpenAI", 2, None).await.unwrap();
        l.record_usage("OpenAI", 1).await.unwrap();
        l.record_usage("openai", 2).await.unwrap();

        let rows = l.list().await.unwrap();
        assert_eq!(rows[0].requests_used, 3);
        assert!(rows[0].near_limit);
        assert!(rows[0].usage_percent > 100.0);
    }

    #[tokio::test]
    async fn test_record_usage_rejects_out_of_range_count() {
        let l = ledger(true);
        l.configure("OpenAI", 10, None).await.unwrap();
        for count in [0, -1, MAX_USAGE_INCREMENT + 1, i64::MAX] {
            assert!(matches!(
                l.record_usage("OpenAI", count).await,
                Err(AppError::InvalidInput(_))
            ));
        }
        l.record_usage("OpenAI", MAX_USAGE_INCREMENT).await.unwrap();
        assert_eq!(l.list().await.unwrap()[0].requests_used, MAX_USAGE_INCREMENT);
    }

    #[tokio::test]
    async fn test_reset_is_idempotent_within_a_day() {
        let l = ledger(true);
        l.configure("ElevenLabs", 100, None).await.unwrap();
        l.record_usage("ElevenLabs", 40).await.unwrap();

        let first = l.reset("ElevenLabs").await.unwrap();
        let second = l.reset("ElevenLabs").await.unwrap();
        assert_eq!(first.requests_used, 0);
        assert_eq!(second.requests_used, 0);
        assert_eq!(first.reset_date, second.reset_date);
        assert_eq!(first.reset_date, Utc::now().date_naive() + Duration::days(30));
    }

    #[tokio::test]
    async fn test_reset_unknown_service() {
        assert!(matches!(ledger(true).reset("Nope").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_configure_rejects_non_positive_limit() {
        let l = ledger(true);
        assert!(matches!(l.configure("OpenAI", 0, None).await, Err(AppError::InvalidInput(_))));
        assert!(matches!(l.configure("OpenAI", -5, None).await, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_check_enforcement() {
        let enforced = ledger(true);
        enforced.configure("OpenAI", 1, None).await.unwrap();
        enforced.check("OpenAI").await.unwrap();
        enforced.record_usage("OpenAI", 1).await.unwrap();
        assert!(matches!(
            enforced.check("OpenAI").await,
            Err(AppError::RateLimitExceeded(_))
        ));
        enforced.check("Unlimited").await.unwrap();

        let informational = ledger(false);
        informational.configure("OpenAI", 1, None).await.unwrap();
        informational.record_usage("OpenAI", 5).await.unwrap();
        informational.check("OpenAI").await.unwrap();
    }

    #[tokio::test]
    async fn test_rollover_due_only_resets_past_dates() {
        let l = ledger(true);
        let today = Utc::now().date_naive();
        l.configure("Due", 10, Some(today)).await.unwrap();
        l.configure("Later", 10, Some(today + Duration::days(3))).await.unwrap();
        l.record_usage("Due", 10).await.unwrap();
        l.record_usage("Later", 4).await.unwrap();

        let rolled = l.rollover_due(today).await.unwrap();
        assert_eq!(rolled, vec!["Due".to_string()]);

        let rows = l.list().await.unwrap();
        let due = rows.iter().find(|r| r.service_name == "Due").unwrap();
        let later = rows.iter().find(|r| r.service_name == "Later").unwrap();
        assert_eq!(due.requests_used, 0);
        assert_eq!(due.reset_date, today + Duration::days(30));
        assert_eq!(later.requests_used, 4);
    }
}
