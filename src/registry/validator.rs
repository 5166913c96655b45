//! Advisory API key format checks.
//!
//! Nothing here talks to a provider: a key that passes can still be rejected
//! at call time, which surfaces as a dispatch failure instead.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::proxy::providers::ProviderKind;

/// Keys with this prefix are always accepted (demo and benchmark setups).
pub const TEST_KEY_PREFIX: &str = "test_";

pub const MIN_KEY_LENGTH: usize = 8;

static ELEVENLABS_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{32,}$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    /// All reasons joined into a single operator-facing message.
    pub fn error_message(&self) -> Option<String> {
        (!self.errors.is_empty()).then(|| self.errors.join("; "))
    }
}

pub fn validate(service_name: &str, key_material: &str, base_url: Option<&str>) -> ValidationResult {
    // Demo keys skip every check, base URL included
    if key_material.starts_with(TEST_KEY_PREFIX) {
        return ValidationResult {
            is_valid: true,
            errors: Vec::new(),
        };
    }

    let mut errors = Vec::new();
    check_key(service_name, key_material, &mut errors);

    if let Some(base_url) = base_url.map(str::trim).filter(|u| !u.is_empty()) {
        match url::Url::parse(base_url) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
            Ok(u) => errors.push(format!(
                "Base URL must use http or https, got '{}'",
                u.scheme()
            )),
            Err(e) => errors.push(format!("Base URL is not a valid URL: {}", e)),
        }
    }

    ValidationResult {
        is_valid: errors.is_empty(),
        errors,
    }
}

fn check_key(service_name: &str, key: &str, errors: &mut Vec<String>) {
    if key.chars().count() < MIN_KEY_LENGTH {
        errors.push(format!(
            "API key must be at least {} characters long",
            MIN_KEY_LENGTH
        ));
        return;
    }

    if key.chars().any(char::is_whitespace) {
        errors.push("API key must not contain whitespace".to_string());
        return;
    }

    match ProviderKind::from_service_name(service_name) {
        ProviderKind::Anthropic => {
            if !key.starts_with("sk-ant-") {
                errors.push("Anthropic API keys must start with 'sk-ant-'".to_string());
            }
        }
        ProviderKind::OpenAI => {
            if !key.starts_with("sk-") {
                errors.push("OpenAI API keys must start with 'sk-'".to_string());
            } else if key.starts_with("sk-ant-") {
                errors.push("This looks like an Anthropic key, not an OpenAI key".to_string());
            }
        }
        ProviderKind::Gemini => {
            if !key.starts_with("AIza") {
                errors.push("Google Gemini API keys must start with 'AIza'".to_string());
            }
        }
        ProviderKind::ElevenLabs => {
            if !ELEVENLABS_KEY.is_match(key) {
                errors.push(
                    "ElevenLabs API keys must be at least 32 letters, digits or underscores"
                        .to_string(),
                );
            }
        }
        ProviderKind::OpenAICompatible => {}
    }
}
