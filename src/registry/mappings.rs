use std::sync::Arc;

use uuid::Uuid;

use crate::errors::AppError;
use crate::models::mapping::{FunctionMapping, NewMapping, Route};
use crate::store::RegistryStore;

/// Routing rules from logical function names to services. There is no
/// implicit default: an unmapped function fails fast.
#[derive(Clone)]
pub struct FunctionMappingTable {
    store: Arc<dyn RegistryStore>,
}

impl FunctionMappingTable {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, function_name: &str) -> Result<Route, AppError> {
        self.store
            .get_mapping(function_name.trim())
            .await?
            .map(|m| m.route())
            .ok_or_else(|| AppError::MappingNotFound(function_name.to_string()))
    }

    pub async fn upsert(&self, mapping: NewMapping) -> Result<FunctionMapping, AppError> {
        let mapping = normalize(mapping)?;
        let saved = self.store.upsert_mapping(&mapping).await?;
        tracing::info!(
            function = %saved.function_name,
            preferred = %saved.preferred_service,
            fallback = ?saved.fallback_service,
            "function mapping saved"
        );
        Ok(saved)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        if !self.store.delete_mapping(id).await? {
            return Err(AppError::NotFound("function mapping"));
        }
        tracing::info!(mapping_id = %id, "function mapping deleted");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<FunctionMapping>, AppError> {
        Ok(self.store.list_mappings().await?)
    }
}

/// Trims every field, drops blank optionals, and rejects a fallback that
/// names the preferred service.
fn normalize(mapping: NewMapping) -> Result<NewMapping, AppError> {
    fn opt(v: Option<String>) -> Option<String> {
        v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
    }

    let function_name = mapping.function_name.trim().to_string();
    let preferred_service = mapping.preferred_service.trim().to_string();
    if function_name.is_empty() {
        return Err(AppError::InvalidInput("function_name must not be empty".into()));
    }
    if preferred_service.is_empty() {
        return Err(AppError::InvalidInput("preferred_service must not be empty".into()));
    }

    let fallback_service = opt(mapping.fallback_service);
    if let Some(fallback) = &fallback_service {
        if fallback.eq_ignore_ascii_case(&preferred_service) {
            return Err(AppError::InvalidInput(
                "fallback_service must differ from preferred_service".into(),
            ));
        }
    }

    Ok(NewMapping {
        function_name,
        preferred_service,
        fallback_service,
        description: opt(mapping.description),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn table() -> FunctionMappingTable {
        FunctionMappingTable::new(Arc::new(MemoryStore::new()))
    }

    fn mapping(function: &str, preferred: &str, fallback: Option<&str>) -> NewMapping {
        NewMapping {
            function_name: function.into(),
            preferred_service: preferred.into(),
            fallback_service: fallback.map(Into::into),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_resolve_missing_is_error() {
        let err = table().resolve("AI Text Generation").await.unwrap_err();
        assert!(matches!(err, AppError::MappingNotFound(name) if name == "AI Text Generation"));
    }

    #[tokio::test]
    async fn test_upsert_replaces_route() {
        let t = table();
        let first = t
            .upsert(mapping("AI Text Generation", "OpenAI", Some("Anthropic")))
            .await
            .unwrap();
        let second = t.upsert(mapping("AI Text Generation", "Anthropic", None)).await.unwrap();
        assert_eq!(first.id, second.id);

        let route = t.resolve("AI Text Generation").await.unwrap();
        assert_eq!(route.preferred_service, "Anthropic");
        assert_eq!(route.fallback_service, None);
        assert_eq!(t.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blank_fallback_means_none() {
        let t = table();
        let saved = t.upsert(mapping("Voice Over", "ElevenLabs", Some("  "))).await.unwrap();
        assert_eq!(saved.fallback_service, None);
    }

    #[tokio::test]
    async fn test_rejects_same_fallback() {
        let err = table()
            .upsert(mapping("AI Text Generation", "OpenAI", Some("openai")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_delete_unknown() {
        let err = table().delete(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
