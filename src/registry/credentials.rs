use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::validator;
use crate::errors::AppError;
use crate::models::credential::{Category, CredentialRecord, CredentialStatus, CredentialView};
use crate::store::RegistryStore;
use crate::vault::builtin::VaultCrypto;
use crate::vault::fingerprint;

/// Unsealed credential handed to the dispatcher for exactly one call.
pub struct ResolvedCredential {
    pub id: Uuid,
    pub service_name: String,
    pub category: Category,
    pub base_url: Option<String>,
    pub api_key: Zeroizing<String>,
}

impl fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCredential")
            .field("id", &self.id)
            .field("service_name", &self.service_name)
            .field("category", &self.category)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn RegistryStore>,
    vault: Arc<VaultCrypto>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn RegistryStore>, vault: Arc<VaultCrypto>) -> Self {
        Self { store, vault }
    }

    /// Creates or replaces the credential for (service, category).
    ///
    /// The key is validated and sealed on every submission. An invalid key is
    /// still saved, with its errors, as `invalid` and inactive. A key that is
    /// valid keeps the current activation flag, unless the credential was
    /// previously invalid, in which case it is reactivated.
    pub async fn upsert_credential(
        &self,
        service_name: &str,
        category: Category,
        key_material: &str,
        base_url: Option<&str>,
    ) -> Result<CredentialView, AppError> {
        let service_name = service_name.trim();
        if service_name.is_empty() {
            return Err(AppError::InvalidInput("service_name must not be empty".into()));
        }
        if key_material.trim().is_empty() {
            return Err(AppError::InvalidInput("api_key must not be empty".into()));
        }
        let base_url = base_url.map(str::trim).filter(|u| !u.is_empty());

        let validation = validator::validate(service_name, key_material, base_url);
        let existing = self.store.find_credential(service_name, category).await?;

        let is_active = match (&existing, validation.is_valid) {
            (_, false) => false,
            (Some(prev), true) if prev.status != CredentialStatus::Invalid => prev.is_active,
            _ => true,
        };

        let now = Utc::now();
        let record = CredentialRecord {
            id: Uuid::new_v4(),
            service_name: service_name.to_string(),
            category,
            sealed_key: self.vault.seal(key_material)?,
            key_fingerprint: fingerprint(key_material),
            base_url: base_url.map(str::to_string),
            is_active,
            status: CredentialStatus::derive(&validation.errors, is_active),
            validation_errors: validation.errors,
            last_validated: Some(now),
            created_at: now,
            updated_at: now,
        };

        let saved = self.store.save_credential(&record).await?;
        let is_primary = self.store.primaries().await?.get(&category) == Some(&saved.id);

        if saved.status == CredentialStatus::Invalid {
            tracing::warn!(
                credential_id = %saved.id,
                service = %saved.service_name,
                category = %category,
                errors = ?saved.validation_errors,
                "credential saved with validation errors"
            );
        } else {
            tracing::info!(
                credential_id = %saved.id,
                service = %saved.service_name,
                category = %category,
                fingerprint = %saved.key_fingerprint,
                "credential saved"
            );
        }

        Ok(saved.view(is_primary))
    }

    /// Makes the credential the only primary of its category.
    pub async fn set_primary(&self, credential_id: Uuid, category: Category) -> Result<CredentialView, AppError> {
        let cred = self
            .store
            .get_credential(credential_id)
            .await?
            .ok_or(AppError::NotFound("credential"))?;

        if cred.category != category {
            return Err(AppError::InvalidInput(format!(
                "credential {} belongs to '{}', not '{}'",
                credential_id, cred.category, category
            )));
        }

        if !self.store.set_primary(credential_id, category).await? {
            // deleted between the read and the write
            return Err(AppError::NotFound("credential"));
        }

        tracing::info!(credential_id = %credential_id, category = %category, "primary credential set");

        let cred = self
            .store
            .get_credential(credential_id)
            .await?
            .ok_or(AppError::NotFound("credential"))?;
        Ok(cred.view(true))
    }

    pub async fn set_active(&self, credential_id: Uuid, is_active: bool) -> Result<CredentialView, AppError> {
        let cred = self
            .store
            .get_credential(credential_id)
            .await?
            .ok_or(AppError::NotFound("credential"))?;

        if is_active && cred.status == CredentialStatus::Invalid {
            return Err(AppError::ValidationFailed(cred.validation_errors));
        }

        if !self.store.set_credential_active(credential_id, is_active).await? {
            return Err(AppError::NotFound("credential"));
        }

        tracing::info!(credential_id = %credential_id, is_active, "credential activation changed");

        let cred = self
            .store
            .get_credential(credential_id)
            .await?
            .ok_or(AppError::NotFound("credential"))?;
        let is_primary = self.store.primaries().await?.get(&cred.category) == Some(&cred.id);
        Ok(cred.view(is_primary))
    }

    pub async fn delete(&self, credential_id: Uuid) -> Result<(), AppError> {
        if !self.store.delete_credential(credential_id).await? {
            return Err(AppError::NotFound("credential"));
        }
        tracing::info!(credential_id = %credential_id, "credential deleted");
        Ok(())
    }

    /// Redacted credentials grouped by category. Every category is present,
    /// possibly with an empty list.
    pub async fn list_by_category(&self) -> Result<BTreeMap<Category, Vec<CredentialView>>, AppError> {
        let creds = self.store.list_credentials().await?;
        let primaries = self.store.primaries().await?;

        let mut grouped: BTreeMap<Category, Vec<CredentialView>> =
            Category::ALL.iter().map(|c| (*c, Vec::new())).collect();
        for cred in creds {
            let is_primary = primaries.get(&cred.category) == Some(&cred.id);
            grouped.entry(cred.category).or_default().push(cred.view(is_primary));
        }
        for views in grouped.values_mut() {
            views.sort_by_key(|v| v.service_name.to_lowercase());
        }
        Ok(grouped)
    }

    /// Unsealed key for the best active credential of a service: a category
    /// primary first, then the most recently updated.
    pub async fn resolve_for_service(&self, service_name: &str) -> Result<ResolvedCredential, AppError> {
        let creds = self.store.credentials_for_service(service_name).await?;
        if creds.is_empty() {
            return Err(AppError::CredentialNotFound(service_name.to_string()));
        }

        let primaries = self.store.primaries().await?;
        let best = creds
            .into_iter()
            .filter(|c| c.is_active && c.status == CredentialStatus::Active)
            .max_by_key(|c| (primaries.get(&c.category) == Some(&c.id), c.updated_at))
            .ok_or_else(|| AppError::CredentialInactive(service_name.to_string()))?;

        let api_key = self.vault.open(&best.sealed_key)?;

        Ok(ResolvedCredential {
            id: best.id,
            service_name: best.service_name,
            category: best.category,
            base_url: best.base_url,
            api_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PLACEHOLDER_MASTER_KEY;
    use crate::store::memory::MemoryStore;

    fn credential_store() -> CredentialStore {
        CredentialStore::new(
            Arc::new(MemoryStore::new()),
            Arc::new(VaultCrypto::new(PLACEHOLDER_MASTER_KEY).unwrap()),
        )
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let creds = credential_store();
        let first = creds
            .upsert_credential("OpenAI", Category::TextGeneration, "sk-first-key-123", None)
            .await
            .unwrap();
        let second = creds
            .upsert_credential("OpenAI", Category::TextGeneration, "sk-second-key-456", None)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_ne!(first.key_fingerprint, second.key_fingerprint);
        assert_eq!(second.status, CredentialStatus::Active);

        let listed = creds.list_by_category().await.unwrap();
        assert_eq!(listed[&Category::TextGeneration].len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_empty_inputs() {
        let creds = credential_store();
        assert!(matches!(
            creds.upsert_credential("  ", Category::Research, "sk-12345678", None).await,
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            creds.upsert_credential("OpenAI", Category::Research, "", None).await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_key_saved_inactive() {
        let creds = credential_store();
        let view = creds
            .upsert_credential("OpenAI", Category::TextGeneration, "abc", None)
            .await
            .unwrap();
        assert_eq!(view.status, CredentialStatus::Invalid);
        assert!(!view.is_active);
        assert_eq!(view.validation_errors, vec!["API key must be at least 8 characters long"]);

        let err = creds.set_active(view.id, true).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationFailed(_)));

        // a corrected key brings it back
        let fixed = creds
            .upsert_credential("OpenAI", Category::TextGeneration, "sk-now-valid-key", None)
            .await
            .unwrap();
        assert_eq!(fixed.status, CredentialStatus::Active);
        assert!(fixed.is_active);
    }

    #[tokio::test]
    async fn test_resubmission_preserves_disabled() {
        let creds = credential_store();
        let view = creds
            .upsert_credential("Anthropic", Category::TextGeneration, "sk-ant-one-1234", None)
            .await
            .unwrap();
        creds.set_active(view.id, false).await.unwrap();

        let again = creds
            .upsert_credential("Anthropic", Category::TextGeneration, "sk-ant-two-1234", None)
            .await
            .unwrap();
        assert!(!again.is_active);
        assert_eq!(again.status, CredentialStatus::Disabled);
    }

    #[tokio::test]
    async fn test_listing_never_contains_key_material() {
        let creds = credential_store();
        let secret = "sk-super-secret-material-0042";
        creds
            .upsert_credential("OpenAI", Category::TextGeneration, secret, None)
            .await
            .unwrap();

        let json = serde_json::to_string(&creds.list_by_category().await.unwrap()).unwrap();
        assert!(!json.contains(secret));
        assert!(!json.contains("super-secret"));
        assert!(!json.contains("sealed"));
    }

    #[tokio::test]
    async fn test_set_primary_unique_per_category() {
        let creds = credential_store();
        let openai = creds
            .upsert_credential("OpenAI", Category::TextGeneration, "sk-openai-1234", None)
            .await
            .unwrap();
        let anthropic = creds
            .upsert_credential("Anthropic", Category::TextGeneration, "sk-ant-12345678", None)
            .await
            .unwrap();
        let voice = creds
            .upsert_credential("ElevenLabs", Category::VoiceGeneration, "test_voice", None)
            .await
            .unwrap();

        creds.set_primary(openai.id, Category::TextGeneration).await.unwrap();
        creds.set_primary(voice.id, Category::VoiceGeneration).await.unwrap();
        creds.set_primary(anthropic.id, Category::TextGeneration).await.unwrap();

        let listed = creds.list_by_category().await.unwrap();
        let text_primaries: Vec<_> = listed[&Category::TextGeneration]
            .iter()
            .filter(|v| v.is_primary)
            .map(|v| v.id)
            .collect();
        assert_eq!(text_primaries, vec![anthropic.id]);
        assert!(listed[&Category::VoiceGeneration][0].is_primary);
    }

    #[tokio::test]
    async fn test_concurrent_set_primary_leaves_one() {
        let creds = credential_store();
        let mut ids = Vec::new();
        for i in 0..8 {
            let view = creds
                .upsert_credential(&format!("Service{}", i), Category::Research, "test_key", None)
                .await
                .unwrap();
            ids.push(view.id);
        }

        let handles: Vec<_> = ids
            .iter()
            .map(|id| {
                let creds = creds.clone();
                let id = *id;
                tokio::spawn(async move { creds.set_primary(id, Category::Research).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let listed = creds.list_by_category().await.unwrap();
        let primaries = listed[&Category::Research].iter().filter(|v| v.is_primary).count();
        assert_eq!(primaries, 1);
    }

    #[tokio::test]
    async fn test_set_primary_errors() {
        let creds = credential_store();
        assert!(matches!(
            creds.set_primary(Uuid::new_v4(), Category::Research).await,
            Err(AppError::NotFound(_))
        ));

        let view = creds
            .upsert_credential("OpenAI", Category::TextGeneration, "sk-openai-1234", None)
            .await
            .unwrap();
        assert!(matches!(
            creds.set_primary(view.id, Category::ImageGeneration).await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_set_active_keeps_primary() {
        let creds = credential_store();
        let view = creds
            .upsert_credential("OpenAI", Category::TextGeneration, "sk-openai-1234", None)
            .await
            .unwrap();
        creds.set_primary(view.id, Category::TextGeneration).await.unwrap();
        let disabled = creds.set_active(view.id, false).await.unwrap();
        assert!(disabled.is_primary);
        assert_eq!(disabled.status, CredentialStatus::Disabled);
    }

    #[tokio::test]
    async fn test_resolve_for_service() {
        let creds = credential_store();
        assert!(matches!(
            creds.resolve_for_service("OpenAI").await,
            Err(AppError::CredentialNotFound(_))
        ));

        let view = creds
            .upsert_credential("OpenAI", Category::TextGeneration, "sk-openai-1234", None)
            .await
            .unwrap();
        let resolved = creds.resolve_for_service("openai").await.unwrap();
        assert_eq!(resolved.api_key.as_str(), "sk-openai-1234");
        assert!(!format!("{:?}", resolved).contains("sk-openai"));

        creds.set_active(view.id, false).await.unwrap();
        assert!(matches!(
            creds.resolve_for_service("OpenAI").await,
            Err(AppError::CredentialInactive(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_prefers_primary() {
        let creds = credential_store();
        let text = creds
            .upsert_credential("OpenAI", Category::TextGeneration, "sk-text-key-1", None)
            .await
            .unwrap();
        creds
            .upsert_credential("OpenAI", Category::ImageGeneration, "sk-image-key-2", None)
            .await
            .unwrap();

        // most recent wins without a primary
        assert_eq!(
            creds.resolve_for_service("OpenAI").await.unwrap().api_key.as_str(),
            "sk-image-key-2"
        );

        creds.set_primary(text.id, Category::TextGeneration).await.unwrap();
        let resolved = creds.resolve_for_service("OpenAI").await.unwrap();
        assert_eq!(resolved.id, text.id);
        assert_eq!(resolved.category, Category::TextGeneration);
    }

    #[tokio::test]
    async fn test_delete() {
        let creds = credential_store();
        let view = creds
            .upsert_credential("OpenAI", Category::TextGeneration, "sk-openai-1234", None)
            .await
            .unwrap();
        creds.delete(view.id).await.unwrap();
        assert!(matches!(creds.delete(view.id).await, Err(AppError::NotFound(_))));
    }
}
