use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One dispatch outcome. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UsageLogEntry {
    pub id: Uuid,
    pub service_name: String,
    pub category: String,
    pub function_name: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub response_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total: i64,
    pub success: i64,
    pub failure: i64,
    pub avg_response_time_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub by_service: BTreeMap<String, UsageSummary>,
    pub by_category: BTreeMap<String, UsageSummary>,
}

impl UsageStats {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a UsageLogEntry>) -> Self {
        let mut by_service: BTreeMap<String, Accumulator> = BTreeMap::new();
        let mut by_category: BTreeMap<String, Accumulator> = BTreeMap::new();

        for entry in entries {
            by_service
                .entry(entry.service_name.clone())
                .or_default()
                .add(entry);
            by_category
                .entry(entry.category.clone())
                .or_default()
                .add(entry);
        }

        Self {
            by_service: by_service.into_iter().map(|(k, v)| (k, v.finish())).collect(),
            by_category: by_category.into_iter().map(|(k, v)| (k, v.finish())).collect(),
        }
    }
}

#[derive(Default)]
struct Accumulator {
    total: i64,
    success: i64,
    latency_sum: i64,
}

impl Accumulator {
    fn add(&mut self, entry: &UsageLogEntry) {
        self.total += 1;
        if entry.success {
            self.success += 1;
        }
        self.latency_sum += entry.response_time_ms;
    }

    fn finish(self) -> UsageSummary {
        UsageSummary {
            total: self.total,
            success: self.success,
            failure: self.total - self.success,
            avg_response_time_ms: if self.total == 0 {
                0.0
            } else {
                self.latency_sum as f64 / self.total as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(service: &str, category: &str, success: bool, ms: i64) -> UsageLogEntry {
        UsageLogEntry {
            id: Uuid::new_v4(),
            service_name: service.into(),
            category: category.into(),
            function_name: None,
            success,
            error_message: (!success).then(|| "boom".to_string()),
            response_time_ms: ms,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_aggregate_groups_by_service_and_category() {
        let entries = vec![
            entry("OpenAI", "Text Generation", true, 100),
            entry("OpenAI", "Text Generation", false, 300),
            entry("Anthropic", "Text Generation", true, 200),
            entry("ElevenLabs", "Voice Generation", true, 50),
        ];
        let stats = UsageStats::from_entries(&entries);

        let openai = &stats.by_service["OpenAI"];
        assert_eq!(openai.total, 2);
        assert_eq!(openai.success, 1);
        assert_eq!(openai.failure, 1);
        assert_eq!(openai.avg_response_time_ms, 200.0);

        let text = &stats.by_category["Text Generation"];
        assert_eq!(text.total, 3);
        assert_eq!(text.failure, 1);
        assert_eq!(stats.by_category["Voice Generation"].avg_response_time_ms, 50.0);
    }

    #[test]
    fn test_aggregate_empty() {
        let entries: Vec<UsageLogEntry> = Vec::new();
        let stats = UsageStats::from_entries(&entries);
        assert!(stats.by_service.is_empty());
        assert!(stats.by_category.is_empty());
    }
}
