use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coarse capability grouping. At most one credential per category is primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Text Generation")]
    TextGeneration,
    #[serde(rename = "Voice Generation")]
    VoiceGeneration,
    #[serde(rename = "Image Generation")]
    ImageGeneration,
    #[serde(rename = "Research")]
    Research,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::TextGeneration,
        Category::VoiceGeneration,
        Category::ImageGeneration,
        Category::Research,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::TextGeneration => "Text Generation",
            Category::VoiceGeneration => "Voice Generation",
            Category::ImageGeneration => "Image Generation",
            Category::Research => "Research",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Accepts the display name ("Text Generation") or a slug ("text-generation", "text_generation").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "textgeneration" | "text" => Ok(Category::TextGeneration),
            "voicegeneration" | "voice" => Ok(Category::VoiceGeneration),
            "imagegeneration" | "image" => Ok(Category::ImageGeneration),
            "research" => Ok(Category::Research),
            _ => Err(format!(
                "unknown category '{}'. Must be one of: {}",
                s,
                Category::ALL.map(|c| c.as_str()).join(", ")
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    Active,
    Disabled,
    Invalid,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Active => "active",
            CredentialStatus::Disabled => "disabled",
            CredentialStatus::Invalid => "invalid",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => CredentialStatus::Active,
            "invalid" => CredentialStatus::Invalid,
            _ => CredentialStatus::Disabled,
        }
    }

    /// Status of a credential given its validation errors and activation flag.
    pub fn derive(validation_errors: &[String], is_active: bool) -> Self {
        if !validation_errors.is_empty() {
            CredentialStatus::Invalid
        } else if is_active {
            CredentialStatus::Active
        } else {
            CredentialStatus::Disabled
        }
    }
}

/// A persisted credential. `sealed_key` is the vault envelope, never plaintext.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub service_name: String,
    pub category: Category,
    pub sealed_key: String,
    pub key_fingerprint: String,
    pub base_url: Option<String>,
    pub is_active: bool,
    pub status: CredentialStatus,
    pub validation_errors: Vec<String>,
    pub last_validated: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    pub fn view(&self, is_primary: bool) -> CredentialView {
        CredentialView {
            id: self.id,
            service_name: self.service_name.clone(),
            category: self.category,
            key_fingerprint: self.key_fingerprint.clone(),
            base_url: self.base_url.clone(),
            is_primary,
            is_active: self.is_active,
            status: self.status,
            validation_errors: self.validation_errors.clone(),
            last_validated: self.last_validated,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Display-safe credential. Carries a fingerprint instead of any key text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialView {
    pub id: Uuid,
    pub service_name: String,
    pub category: Category,
    pub key_fingerprint: String,
    pub base_url: Option<String>,
    pub is_primary: bool,
    pub is_active: bool,
    pub status: CredentialStatus,
    pub validation_errors: Vec<String>,
    pub last_validated: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_accepts_display_and_slug() {
        assert_eq!("Text Generation".parse::<Category>(), Ok(Category::TextGeneration));
        assert_eq!("voice-generation".parse::<Category>(), Ok(Category::VoiceGeneration));
        assert_eq!("image_generation".parse::<Category>(), Ok(Category::ImageGeneration));
        assert_eq!("RESEARCH".parse::<Category>(), Ok(Category::Research));
        assert!("Memes".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_serializes_as_display_name() {
        let json = serde_json::to_string(&Category::VoiceGeneration).unwrap();
        assert_eq!(json, "\"Voice Generation\"");
    }

    #[test]
    fn test_status_derivation() {
        assert_eq!(CredentialStatus::derive(&[], true), CredentialStatus::Active);
        assert_eq!(CredentialStatus::derive(&[], false), CredentialStatus::Disabled);
        assert_eq!(
            CredentialStatus::derive(&["too short".into()], true),
            CredentialStatus::Invalid
        );
    }
}
