//! The routing registry: credentials, validation, function mappings,
//! per-service rate limits and the usage log.

pub mod credentials;
pub mod mappings;
pub mod rate_limit;
pub mod usage;
pub mod validator;

use std::sync::Arc;

use crate::config::Config;
use crate::store::RegistryStore;
use crate::vault::builtin::VaultCrypto;

pub use credentials::{CredentialStore, ResolvedCredential};
pub use mappings::FunctionMappingTable;
pub use rate_limit::RateLimitLedger;
pub use usage::UsageLogger;

/// All registry components over one shared store.
#[derive(Clone)]
pub struct Registry {
    pub credentials: CredentialStore,
    pub mappings: FunctionMappingTable,
    pub rate_limits: RateLimitLedger,
    pub usage: UsageLogger,
}

impl Registry {
    pub fn new(store: Arc<dyn RegistryStore>, vault: Arc<VaultCrypto>, config: &Config) -> Self {
        Self {
            credentials: CredentialStore::new(store.clone(), vault),
            mappings: FunctionMappingTable::new(store.clone()),
            rate_limits: RateLimitLedger::new(
                store.clone(),
                config.rate_limit_period_days,
                config.enforce_rate_limits,
            ),
            usage: UsageLogger::new(store),
        }
    }
}
