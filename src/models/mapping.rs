use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Routing rule from a logical function name to a preferred and optional fallback service.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FunctionMapping {
    pub id: Uuid,
    pub function_name: String,
    pub preferred_service: String,
    pub fallback_service: Option<String>,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl FunctionMapping {
    pub fn route(&self) -> Route {
        Route {
            preferred_service: self.preferred_service.clone(),
            fallback_service: self.fallback_service.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub preferred_service: String,
    pub fallback_service: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMapping {
    pub function_name: String,
    pub preferred_service: String,
    pub fallback_service: Option<String>,
    pub description: Option<String>,
}
