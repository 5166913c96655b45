use std::sync::Arc;

use crate::config::Config;
use crate::proxy::dispatcher::Dispatcher;
use crate::registry::Registry;
use crate::store::RegistryStore;
use crate::vault::builtin::VaultCrypto;

/// Shared state handed to every handler, job and CLI command.
pub struct AppState {
    pub config: Config,
    pub registry: Registry,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn RegistryStore>) -> anyhow::Result<Self> {
        let vault = Arc::new(VaultCrypto::new(&config.master_key)?);
        let registry = Registry::new(store, vault, &config);
        let dispatcher = Dispatcher::from_config(registry.clone(), &config)?;
        Ok(Self {
            config,
            registry,
            dispatcher,
        })
    }
}
