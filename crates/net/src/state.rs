use pledge_database::basic_db::SafeDatabase;
use pledge_service::config::PledgeConfig;
use pledge_service::distribution::CompletionCriteria;
use pledge_service::MdbxLedgerStore;
use std::sync::Arc;
use std::time::Duration;

/// Shared by every handler. Cloning is cheap: the store wraps an `Arc`.
pub struct AppState<T: SafeDatabase> {
    pub store: MdbxLedgerStore<T>,
    pub config: Arc<PledgeConfig>,
    pub criteria: Arc<CompletionCriteria>,
}

impl<T: SafeDatabase> AppState<T> {
    pub fn new(database: T, config: PledgeConfig) -> Self {
        let criteria = CompletionCriteria::from(&config.engine);
        Self {
            store: MdbxLedgerStore::new(database),
            config: Arc::new(config),
            criteria: Arc::new(criteria),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.config.server.store_timeout_ms)
    }
}

impl<T: SafeDatabase> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: Arc::clone(&self.config),
            criteria: Arc::clone(&self.criteria),
        }
    }
}
