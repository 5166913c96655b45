use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Usage above this share of the limit is flagged for operators.
pub const NEAR_LIMIT_PERCENT: f64 = 90.0;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RateLimit {
    pub id: Uuid,
    pub service_name: String,
    pub requests_used: i64,
    pub request_limit: i64,
    pub reset_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RateLimit {
    pub fn usage_percent(&self) -> f64 {
        if self.request_limit <= 0 {
            return 100.0;
        }
        self.requests_used as f64 / self.request_limit as f64 * 100.0
    }

    pub fn is_exhausted(&self) -> bool {
        self.requests_used >= self.request_limit
    }

    pub fn status(&self) -> RateLimitStatus {
        let usage_percent = self.usage_percent();
        RateLimitStatus {
            service_name: self.service_name.clone(),
            requests_used: self.requests_used,
            request_limit: self.request_limit,
            reset_date: self.reset_date,
            usage_percent,
            near_limit: usage_percent > NEAR_LIMIT_PERCENT,
            updated_at: self.updated_at,
        }
    }
}

/// Rate limit as shown to operators, with the derived alerting fields.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub service_name: String,
    pub requests_used: i64,
    pub request_limit: i64,
    pub reset_date: NaiveDate,
    pub usage_percent: f64,
    pub near_limit: bool,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(used: i64, max: i64) -> RateLimit {
        let now = Utc::now();
        RateLimit {
            id: Uuid::new_v4(),
            service_name: "OpenAI".into(),
            requests_used: used,
            request_limit: max,
            reset_date: now.date_naive(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_near_limit_threshold() {
        assert!(!limit(89, 100).status().near_limit);
        assert!(!limit(90, 100).status().near_limit);
        assert!(limit(91, 100).status().near_limit);
        assert!(limit(150, 100).status().near_limit);
    }

    #[test]
    fn test_exhausted_allows_overflow_reporting() {
        let l = limit(120, 100);
        assert!(l.is_exhausted());
        assert_eq!(l.usage_percent(), 120.0);
    }
}
