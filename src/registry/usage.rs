use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::usage::{UsageLogEntry, UsageStats};
use crate::store::RegistryStore;

/// Category recorded when no credential was resolved for the attempt.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Fields of one dispatch outcome, before it gets an id and timestamp.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub service_name: String,
    pub category: String,
    pub function_name: Option<String>,
    pub success: bool,
    pub response_time_ms: i64,
    pub error_message: Option<String>,
}

/// Start of a look-back window of `days` days ending now.
pub fn window_start(days: i64) -> Result<DateTime<Utc>, AppError> {
    if days <= 0 {
        return Err(AppError::InvalidInput("days must be greater than 0".into()));
    }
    Duration::try_days(days)
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .ok_or_else(|| AppError::InvalidInput(format!("days is out of range: {}", days)))
}

#[derive(Clone)]
pub struct UsageLogger {
    store: Arc<dyn RegistryStore>,
}

impl UsageLogger {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self { store }
    }

    /// Appends one entry. A storage failure is traced and otherwise ignored:
    /// losing a log line must never fail the dispatch it describes.
    pub async fn record(&self, record: UsageRecord) {
        let entry = UsageLogEntry {
            id: Uuid::new_v4(),
            service_name: record.service_name,
            category: record.category,
            function_name: record.function_name,
            success: record.success,
            error_message: record.error_message,
            response_time_ms: record.response_time_ms.max(0),
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.insert_usage_log(&entry).await {
            tracing::error!(
                service = %entry.service_name,
                success = entry.success,
                "failed to write usage log: {}",
                e
            );
        }
    }

    pub async fn aggregate(&self, since: Option<DateTime<Utc>>) -> Result<UsageStats, AppError> {
        let entries = self.store.list_usage_logs(since).await?;
        Ok(UsageStats::from_entries(&entries))
    }

    pub async fn entries(&self, since: Option<DateTime<Utc>>) -> Result<Vec<UsageLogEntry>, AppError> {
        Ok(self.store.list_usage_logs(since).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn record(service: &str, success: bool, ms: i64) -> UsageRecord {
        UsageRecord {
            service_name: service.into(),
            category: "Text Generation".into(),
            function_name: Some("AI Text Generation".into()),
            success,
            response_time_ms: ms,
            error_message: (!success).then(|| "HTTP 500: boom".to_string()),
        }
    }

    #[test]
    fn test_window_start_bounds() {
        let week = window_start(7).unwrap();
        assert!(week < Utc::now() - Duration::days(6));
        for days in [0, -1, 200_000_000_000, i64::MAX] {
            assert!(matches!(window_start(days), Err(AppError::InvalidInput(_))), "{}", days);
        }
    }

    #[tokio::test]
    async fn test_record_and_aggregate() {
        let logger = UsageLogger::new(Arc::new(MemoryStore::new()));
        logger.record(record("OpenAI", true, 120)).await;
        logger.record(record("OpenAI", false, 80)).await;

        let stats = logger.aggregate(None).await.unwrap();
        let openai = &stats.by_service["OpenAI"];
        assert_eq!(openai.total, 2);
        assert_eq!(openai.failure, 1);
        assert_eq!(openai.avg_response_time_ms, 100.0);
    }

    #[tokio::test]
    async fn test_aggregate_since_filters() {
        let logger = UsageLogger::new(Arc::new(MemoryStore::new()));
        logger.record(record("OpenAI", true, 10)).await;
        let later = Utc::now() + chrono::Duration::hours(1);
        let stats = logger.aggregate(Some(later)).await.unwrap();
        assert!(stats.by_service.is_empty());
    }
}
